//! Request actor extraction for the audit trail

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use fleetgate_control::Actor;
use std::convert::Infallible;

/// Header naming the operator behind a request
pub const ACTOR_HEADER: &str = "x-actor";
pub const DEFAULT_ACTOR: &str = "operator";

/// Who issued the request, taken from `X-Actor`, `X-Forwarded-For` and
/// `User-Agent`
#[derive(Debug, Clone)]
pub struct RequestActor(pub Actor);

impl<S> FromRequestParts<S> for RequestActor
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(RequestActor(actor_from_headers(&parts.headers)))
    }
}

fn actor_from_headers(headers: &HeaderMap) -> Actor {
    let value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    let mut actor = Actor::new(value(ACTOR_HEADER).unwrap_or_else(|| DEFAULT_ACTOR.to_string()));
    // First hop is the client
    actor.origin_ip = value("x-forwarded-for").and_then(|forwarded| {
        forwarded
            .split(',')
            .next()
            .map(|ip| ip.trim().to_string())
            .filter(|ip| !ip.is_empty())
    });
    actor.user_agent = value(header::USER_AGENT.as_str());
    actor
}
