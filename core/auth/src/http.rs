//! Translation of HTTP failures into the local error taxonomy.
//!
//! Every REST adapter funnels responses through [`check`] so that a 401
//! from Stripe and a 401 from Google surface the same way.

use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;

use flextk_common::Error;

/// Map a non-success status to an error kind.
pub fn status_error(status: StatusCode, what: &str, body: &str) -> Error {
    let detail = if body.is_empty() {
        format!("{}: {}", what, status)
    } else {
        format!("{}: {} - {}", what, status, body.trim())
    };
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Auth(detail),
        StatusCode::NOT_FOUND => Error::NotFound(detail),
        _ => Error::Provider(detail),
    }
}

/// Wrap a transport-level failure.
pub fn transport_error(what: &str, err: reqwest::Error) -> Error {
    Error::Provider(format!("{}: {}", what, err))
}

/// Pass successful responses through; turn the rest into errors.
pub async fn check(response: Response, what: &str) -> flextk_common::Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, what, &body))
}

/// [`check`] the response, then decode its JSON body.
pub async fn json<T: DeserializeOwned>(response: Response, what: &str) -> flextk_common::Result<T> {
    check(response, what)
        .await?
        .json()
        .await
        .map_err(|e| Error::Provider(format!("{}: malformed response: {}", what, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, "x", ""),
            Error::Auth(_)
        ));
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, "x", ""),
            Error::Auth(_)
        ));
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, "x", ""),
            Error::NotFound(_)
        ));
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, "x", ""),
            Error::Provider(_)
        ));
    }

    #[test]
    fn test_body_included_in_message() {
        let err = status_error(StatusCode::BAD_REQUEST, "Upload", "{\"error\":\"bad\"}\n");
        assert_eq!(
            err.to_string(),
            "Provider error: Upload: 400 Bad Request - {\"error\":\"bad\"}"
        );
    }
}
