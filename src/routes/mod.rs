//! HTTP routes for Gatehouse

pub mod health;
pub mod plans;
pub mod subscriptions;

use bson::oid::ObjectId;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::types::GatehouseError;

pub(crate) type FullBody = Full<Bytes>;

/// Serialize a value as a JSON response.
pub(crate) fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<FullBody> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(json)))
        .unwrap()
}

/// Error envelope: `{"error": "..."}` with the message clients match on.
pub(crate) fn error_response(status: StatusCode, message: &str) -> Response<FullBody> {
    json_response(status, &serde_json::json!({ "error": message }))
}

/// Map a core error onto the wire.
pub(crate) fn api_error(e: &GatehouseError) -> Response<FullBody> {
    error_response(e.status_code(), &e.to_string())
}

/// Parse a path segment as an ObjectId, rejecting malformed ids as 400.
pub(crate) fn parse_object_id(raw: &str, what: &str) -> Result<ObjectId, Response<FullBody>> {
    ObjectId::parse_str(raw)
        .map_err(|_| error_response(StatusCode::BAD_REQUEST, &format!("invalid {} id", what)))
}

/// Collect and deserialize a JSON request body, bounded by the configured
/// size limit.
pub(crate) async fn read_json_body<T: DeserializeOwned>(
    req: Request<Incoming>,
    max_bytes: usize,
) -> Result<T, Response<FullBody>> {
    let limited = Limited::new(req.into_body(), max_bytes);
    let bytes = match limited.collect().await {
        Ok(b) => b.to_bytes(),
        Err(_) => {
            return Err(error_response(
                StatusCode::BAD_REQUEST,
                "request body too large or unreadable",
            ))
        }
    };
    serde_json::from_slice(&bytes)
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, &format!("invalid JSON: {}", e)))
}

/// Parse an optional RFC 3339 date string into a BSON datetime.
pub(crate) fn parse_date(
    raw: Option<&str>,
    field: &str,
) -> Result<Option<bson::DateTime>, Response<FullBody>> {
    match raw {
        None => Ok(None),
        Some(s) => chrono::DateTime::parse_from_rfc3339(s)
            .map(|dt| Some(bson::DateTime::from_chrono(dt.with_timezone(&chrono::Utc))))
            .map_err(|_| {
                error_response(
                    StatusCode::BAD_REQUEST,
                    &format!("{} must be an RFC 3339 date", field),
                )
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_object_id_rejects_garbage() {
        assert!(parse_object_id("not-an-id", "plan").is_err());
        let id = ObjectId::new();
        assert_eq!(parse_object_id(&id.to_hex(), "plan").unwrap(), id);
    }

    #[test]
    fn test_parse_date() {
        assert!(parse_date(None, "startDate").unwrap().is_none());
        let parsed = parse_date(Some("2026-01-15T00:00:00Z"), "startDate")
            .unwrap()
            .unwrap();
        assert_eq!(parsed.try_to_rfc3339_string().unwrap(), "2026-01-15T00:00:00Z");
        assert!(parse_date(Some("15/01/2026"), "startDate").is_err());
    }
}
