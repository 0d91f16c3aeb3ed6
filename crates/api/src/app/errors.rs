use core::str::FromStr;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tracing::error;

use postview_core::DomainError;

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    let message = err.to_string();
    match err {
        DomainError::NotFound { .. } => json_error(StatusCode::NOT_FOUND, "not_found", message),
        DomainError::Validation(_) => json_error(StatusCode::BAD_REQUEST, "validation_error", message),
        DomainError::InvalidId(_) => json_error(StatusCode::BAD_REQUEST, "invalid_id", message),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Parse a path identifier, mapping failures to a 400 response.
pub fn parse_id<T>(raw: &str) -> Result<T, axum::response::Response>
where
    T: FromStr<Err = DomainError>,
{
    raw.parse::<T>().map_err(domain_error_to_response)
}

/// Run a synchronous service call on tokio's blocking pool.
///
/// Service calls may wait for a publish acknowledgement or a view store round
/// trip; neither may hold a runtime worker thread.
pub async fn run_blocking<T, F>(f: F) -> Result<T, axum::response::Response>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!(error = %e, "blocking service call failed");
        json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "internal error")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    use postview_core::PostId;

    #[test]
    fn maps_domain_errors_to_status_codes() {
        let cases = [
            (DomainError::not_found("post", 1), StatusCode::NOT_FOUND),
            (DomainError::validation("title must not be blank"), StatusCode::BAD_REQUEST),
            (DomainError::invalid_id("abc"), StatusCode::BAD_REQUEST),
        ];
        for (err, status) in cases {
            assert_eq!(domain_error_to_response(err).status(), status);
        }
    }

    #[test]
    fn bad_path_ids_are_rejected() {
        assert_eq!(parse_id::<PostId>("42").unwrap(), PostId::new(42));
        assert_eq!(parse_id::<PostId>("forty-two").unwrap_err().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn blocking_calls_leave_the_runtime_responsive() {
        let started = Instant::now();
        let slow = tokio::spawn(run_blocking(|| {
            std::thread::sleep(Duration::from_millis(300));
            7
        }));

        // On this current-thread runtime the timer could not fire before the
        // slow call finished if that call ran on the runtime thread.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(started.elapsed() < Duration::from_millis(200));
        assert_eq!(slow.await.unwrap().unwrap(), 7);
    }

    #[tokio::test]
    async fn panicking_call_maps_to_internal_error() {
        let resp = run_blocking(|| -> u8 { panic!("service blew up") }).await.unwrap_err();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
