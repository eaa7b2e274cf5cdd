use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, Request},
    middleware::Next,
    response::Response,
};

use super::blocking;
use crate::auth::Principal;
use crate::error::ConsoleError;
use crate::AppState;

/// Run the access gate for the peer address and attach the resulting
/// [`Principal`] to the request.
pub async fn access_gate(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, ConsoleError> {
    let source = peer.ip();
    let path = req.uri().path().to_string();
    let method = req.method().clone();
    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let gate_state = state.clone();
    let gate_path = path.clone();
    let session = blocking(move || {
        gate_state
            .gate
            .check(source, &gate_path, authorization.as_deref())
            .map_err(ConsoleError::AccessDenied)
    })
    .await?;

    let user = session.username.clone();
    req.extensions_mut().insert(Principal {
        session,
        source_address: source,
    });

    let response = next.run(req).await;
    log::debug!(
        "user={} method={} path={} status={}",
        user,
        method,
        path,
        response.status().as_u16()
    );
    Ok(response)
}
