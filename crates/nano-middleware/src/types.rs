//! Common types used throughout the middleware pipeline.

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use http_body_util::Full;
use nano_core::{HandlerError, ServerError};

/// The HTTP request type used in the middleware pipeline.
pub type Request = http::Request<Full<Bytes>>;

/// The HTTP response type used in the middleware pipeline.
pub type Response = http::Response<Full<Bytes>>;

/// What handlers and middleware stages return.
pub type HandlerResult = Result<Response, HandlerError>;

/// Extension trait for building responses.
pub trait ResponseExt {
    /// Creates a JSON response.
    fn json(status: StatusCode, body: &serde_json::Value) -> Response;

    /// Creates the error envelope response for a domain error.
    fn envelope(error: &ServerError) -> Response;

    /// Creates a response for an error that escaped every recovery stage.
    fn from_handler_error(error: &HandlerError) -> Response;
}

impl ResponseExt for Response {
    fn json(status: StatusCode, body: &serde_json::Value) -> Response {
        let mut response = http::Response::new(Full::new(Bytes::from(body.to_string())));
        *response.status_mut() = status;
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        response
    }

    fn envelope(error: &ServerError) -> Response {
        let body = serde_json::to_value(error.to_envelope()).unwrap_or_default();
        Self::json(error.status(), &body)
    }

    fn from_handler_error(error: &HandlerError) -> Response {
        match error {
            HandlerError::Domain(err) => Self::envelope(err),
            HandlerError::Other(_) => Self::envelope(&ServerError::unknown()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn test_envelope_response() {
        let err = ServerError::project_validator().with_details(vec!["name".into()]);
        let response = Response::envelope(&err);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/json; charset=utf-8"
        );

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["code"], "10002");
        assert_eq!(json["msg"], "project_validator_error");
        assert_eq!(json["details"][0], "name");
        assert_eq!(json["status"], 400);
    }

    #[test]
    fn test_unhandled_other_error_is_masked() {
        let err = HandlerError::other(anyhow::anyhow!("db down"));
        let response = Response::from_handler_error(&err);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_not_found_status() {
        let response = Response::envelope(&ServerError::not_found());
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
