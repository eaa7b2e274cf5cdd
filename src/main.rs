use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use plugin_console::config::ConsoleConfig;

/// Remote administration console for game-server plugins
#[derive(Parser)]
#[command(name = "plugin-console")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "PLUGIN_CONSOLE_CONFIG", default_value = "config.yml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = match ConsoleConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    log::info!(
        "Starting plugin console v{} with {}",
        env!("CARGO_PKG_VERSION"),
        cli.config.display()
    );

    if let Err(e) = plugin_console::run(config).await {
        log::error!("Plugin console stopped: {}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
