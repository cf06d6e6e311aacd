//! Uniform handling of Pyxis JSON responses

use crate::error::{HttpFailure, PyxisError, Result};
use crate::registry::session::ApiResponse;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::debug;

/// Non-2xx statuses accepted as success for a given method: a POST that
/// hits an existing record (409) and a DELETE of a record already gone (404).
pub fn is_tolerated(method: &Method, status: StatusCode) -> bool {
    (*method == Method::POST && status == StatusCode::CONFLICT)
        || (*method == Method::DELETE && status == StatusCode::NOT_FOUND)
}

/// Parse the body (empty object when it is not JSON) and apply the status
/// tolerance rules. Every other non-2xx becomes [`PyxisError::Http`].
pub async fn handle_json_response(response: ApiResponse) -> Result<Value> {
    let method = response.method().clone();
    let body = response.read_body().await?;

    if body.status.is_success() {
        return Ok(body.json);
    }
    if is_tolerated(&method, body.status) {
        debug!(%method, url = %body.url, status = %body.status, "tolerated status");
        return Ok(body.json);
    }

    Err(PyxisError::Http(HttpFailure {
        status: body.status,
        url: body.url,
        body: body.json,
        text: body.text,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::registry::session::{RequestOptions, Session};
    use serde_json::json;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_tolerance_rules() {
        assert!(is_tolerated(&Method::POST, StatusCode::CONFLICT));
        assert!(is_tolerated(&Method::DELETE, StatusCode::NOT_FOUND));
        assert!(!is_tolerated(&Method::GET, StatusCode::NOT_FOUND));
        assert!(!is_tolerated(&Method::POST, StatusCode::NOT_FOUND));
        assert!(!is_tolerated(&Method::DELETE, StatusCode::CONFLICT));
        assert!(!is_tolerated(&Method::PUT, StatusCode::CONFLICT));
    }

    async fn respond(verb: &str, template: ResponseTemplate) -> Result<Value> {
        let server = MockServer::start().await;
        Mock::given(method(verb))
            .respond_with(template)
            .mount(&server)
            .await;
        let policy = RetryPolicy {
            retries: 0,
            backoff_factor: 0.0,
        };
        let session = Session::new(server.uri(), policy, true)?;
        let verb = Method::from_bytes(verb.as_bytes()).unwrap();
        let response = session.request(verb, "signatures", RequestOptions::new()).await?;
        handle_json_response(response).await
    }

    #[tokio::test]
    async fn test_conflict_on_post_returns_body() {
        let body = json!({"detail": "E11000 duplicate key error"});
        let value = respond("POST", ResponseTemplate::new(409).set_body_json(body.clone()))
            .await
            .unwrap();
        assert_eq!(value, body);
    }

    #[tokio::test]
    async fn test_not_found_on_delete_is_success() {
        let value = respond("DELETE", ResponseTemplate::new(404)).await.unwrap();
        assert_eq!(value, json!({}));
    }

    #[tokio::test]
    async fn test_not_found_on_get_is_error() {
        let err = respond(
            "GET",
            ResponseTemplate::new(404).set_body_json(json!({"detail": "no such repository"})),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
        assert!(err.to_string().starts_with("404 Client Error: Not Found for url: "));
        assert!(err.to_string().ends_with(": no such repository"));
    }

    #[tokio::test]
    async fn test_server_error_keeps_raw_text() {
        let err = respond("DELETE", ResponseTemplate::new(500).set_body_string("boom"))
            .await
            .unwrap_err();
        match err {
            PyxisError::Http(failure) => {
                assert_eq!(failure.status(), StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(failure.text, "boom");
                assert_eq!(failure.body, json!({}));
            }
            other => panic!("expected HTTP error, got {:?}", other),
        }
    }
}
