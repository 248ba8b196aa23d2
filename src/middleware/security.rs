use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::AppError;
use crate::state::AppState;

/// Reject requests whose Host header is not in the trusted list.
pub async fn enforce_trusted_hosts(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if state
        .config
        .trusted_hosts
        .iter()
        .any(|host| host.trim() == "*")
    {
        return next.run(request).await;
    }

    let host = request
        .headers()
        .get(axum::http::header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(strip_port)
        .unwrap_or_default();

    if host.is_empty()
        || !state
            .config
            .trusted_hosts
            .iter()
            .any(|trusted| trusted.trim().eq_ignore_ascii_case(host))
    {
        return AppError::BadRequest("Invalid host header.".to_string()).into_response();
    }

    next.run(request).await
}

fn strip_port(host: &str) -> &str {
    host.trim().rsplit_once(':').map_or(host.trim(), |(name, port)| {
        if port.chars().all(|character| character.is_ascii_digit()) {
            name
        } else {
            host.trim()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::strip_port;

    #[test]
    fn strips_numeric_ports_only() {
        assert_eq!(strip_port("localhost:8000"), "localhost");
        assert_eq!(strip_port("api.example.com"), "api.example.com");
        assert_eq!(strip_port(" localhost "), "localhost");
    }
}
