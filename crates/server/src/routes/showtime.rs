//! `GET /campaigns/showtime`: the per-pageview decision endpoint.
//!
//! The client script loads this URL through a `<script>` tag, so the answer
//! is JSONP when a `callback` is given and plain JSON otherwise:
//!
//! ```text
//! /**/callback({"success":true,"errors":[],"data":[...],"providerData":{...}});
//! ```
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::{ConnectInfo, FromRequestParts, Query, State};
use axum::http::header::{CONTENT_TYPE, USER_AGENT};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use decision::{DecisionContext, DecisionError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{ServerError, ServerResult};
use crate::state::ServerState;

const MAX_CALLBACK_LEN: usize = 128;

#[derive(Debug, Default, Deserialize)]
pub struct ShowtimeQuery {
    /// JSON-encoded [`DecisionContext`].
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub callback: Option<String>,
}

/// Body of every showtime answer.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShowtimeResponse {
    pub success: bool,
    pub errors: Vec<String>,
    pub data: Vec<Value>,
    pub provider_data: Value,
}

impl ShowtimeResponse {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            errors: vec![message.into()],
            data: Vec::new(),
            provider_data: json!({}),
        }
    }
}

/// Address of the visitor: first `X-Forwarded-For` hop, then `X-Real-IP`,
/// then the peer address of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIp(pub Option<IpAddr>);

impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header_ip = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .and_then(|v| v.trim().parse::<IpAddr>().ok())
        };
        let ip = header_ip("x-forwarded-for")
            .or_else(|| header_ip("x-real-ip"))
            .or_else(|| {
                parts
                    .extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip())
            });
        Ok(ClientIp(ip))
    }
}

/// JSON or JSONP payload.
pub struct Jsonp {
    callback: Option<String>,
    status: StatusCode,
    body: ShowtimeResponse,
}

impl IntoResponse for Jsonp {
    fn into_response(self) -> Response {
        let json = match serde_json::to_string(&self.body) {
            Ok(json) => json,
            Err(err) => return ServerError::Internal(err.to_string()).into_response(),
        };
        match self.callback {
            Some(callback) => (
                self.status,
                [(
                    CONTENT_TYPE,
                    HeaderValue::from_static("application/javascript; charset=utf-8"),
                )],
                format!("/**/{callback}({json});"),
            )
                .into_response(),
            None => (
                self.status,
                [(CONTENT_TYPE, HeaderValue::from_static("application/json"))],
                json,
            )
                .into_response(),
        }
    }
}

/// JavaScript identifier path such as `cb`, `$jsonp_1` or `remplib.campaign.cb`.
pub fn is_valid_callback(callback: &str) -> bool {
    let ident_start = |c: char| c.is_ascii_alphabetic() || c == '_' || c == '$';
    let ident_rest = |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '$';
    !callback.is_empty()
        && callback.len() <= MAX_CALLBACK_LEN
        && callback.split('.').all(|part| {
            let mut chars = part.chars();
            chars.next().is_some_and(ident_start) && chars.all(ident_rest)
        })
}

pub async fn showtime(
    State(state): State<Arc<ServerState>>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    Query(query): Query<ShowtimeQuery>,
) -> ServerResult<Jsonp> {
    let callback = match query.callback {
        Some(cb) if is_valid_callback(&cb) => Some(cb),
        Some(_) => {
            return Err(ServerError::BadRequest(
                "callback must be a JavaScript identifier".to_string(),
            ))
        }
        None => None,
    };
    let respond = |status: StatusCode, body: ShowtimeResponse| Jsonp {
        callback: callback.clone(),
        status,
        body,
    };

    let parsed = query.data.as_deref().map(serde_json::from_str::<DecisionContext>);
    let mut ctx = match parsed {
        Some(Ok(ctx)) => ctx,
        Some(Err(err)) => {
            tracing::debug!(error = %err, "undecodable showtime payload");
            return Ok(respond(
                StatusCode::BAD_REQUEST,
                ShowtimeResponse::failure(format!("data is not valid JSON: {err}")),
            ));
        }
        None => DecisionContext::default(),
    };
    if ip.is_some() {
        ctx.ip = ip;
    }
    if ctx.user_agent.is_none() {
        ctx.user_agent = headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .filter(|ua| !ua.trim().is_empty())
            .map(str::to_string);
    }

    match state.showtime.engine().decide(&ctx).await {
        Ok(result) => {
            let data = result
                .decisions
                .iter()
                .map(serde_json::to_value)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(respond(
                StatusCode::OK,
                ShowtimeResponse {
                    success: true,
                    errors: Vec::new(),
                    data,
                    provider_data: result.provider_data,
                },
            ))
        }
        Err(DecisionError::Validation(err)) => {
            let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::BAD_REQUEST);
            Ok(respond(status, ShowtimeResponse::failure(err.to_string())))
        }
        Err(err) => Err(ServerError::Internal(err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_names_are_restricted_to_identifier_paths() {
        for ok in ["cb", "_cb1", "$jsonp", "remplib.campaign.cb"] {
            assert!(is_valid_callback(ok), "{ok}");
        }
        for bad in ["", "1cb", "cb()", "alert(1);cb", "a..b", "a.", "<script>"] {
            assert!(!is_valid_callback(bad), "{bad}");
        }
        assert!(!is_valid_callback(&"a".repeat(MAX_CALLBACK_LEN + 1)));
    }

    #[test]
    fn jsonp_wraps_body_in_callback() {
        let response = Jsonp {
            callback: Some("cb".into()),
            status: StatusCode::OK,
            body: ShowtimeResponse::failure("x"),
        }
        .into_response();
        assert_eq!(
            response.headers()[CONTENT_TYPE],
            "application/javascript; charset=utf-8"
        );
    }
}
