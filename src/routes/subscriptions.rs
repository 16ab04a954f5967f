//! User subscription endpoints
//!
//! ## Endpoints
//!
//! - `POST /api/v1/subscriptions/subscribe` - Subscribe a user to a plan
//! - `POST /api/v1/subscriptions` - Create with an explicit window
//! - `GET /api/v1/subscriptions` - List all records
//! - `GET /api/v1/subscriptions/{id}` - Get one record
//! - `PUT /api/v1/subscriptions/{id}` - Patch fields
//! - `DELETE /api/v1/subscriptions/{id}` - Remove a record
//! - `GET /api/v1/subscriptions/user/{userId}` - List a user's records
//! - `GET /api/v1/subscriptions/user/{userId}/active` - Currently valid records
//! - `POST /api/v1/subscriptions/{id}/use-view` - Consume one property view
//! - `PUT /api/v1/subscriptions/{id}/end` - Terminate early
//! - `PUT /api/v1/subscriptions/{id}/upgrade` - Move to a new plan
//!
//! Responses carry records with plan and user references expanded.

use bson::DateTime;
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

use crate::db::schemas::ViewedProperty;
use crate::entitlements::{CreateParams, SubscribeParams, UpdatePatch, UpgradeParams};
use crate::routes::{
    api_error, error_response, json_response, parse_date, parse_object_id, read_json_body,
    FullBody,
};
use crate::server::AppState;
use crate::types::GatehouseError;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscribeRequest {
    user_id: String,
    plan_id: String,
    start_date: Option<String>,
    end_date: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRequest {
    user_id: String,
    plan_id: String,
    start_date: String,
    end_date: String,
    available: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ViewedPropertyPatch {
    property_id: String,
    viewed_at: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct UpdateRequest {
    start_date: Option<String>,
    end_date: Option<String>,
    available: Option<i64>,
    viewed_properties: Option<Vec<ViewedPropertyPatch>>,
    active: Option<bool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpgradeRequest {
    new_plan_id: String,
    #[serde(default = "default_inherit")]
    inherit_remaining: bool,
}

fn default_inherit() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UseViewRequest {
    property_id: String,
}

/// Body-referenced ids that turn out missing are the caller's mistake,
/// not an absent resource: report 400, keep the message.
fn body_ref_error(e: GatehouseError) -> Response<FullBody> {
    match e {
        GatehouseError::NotFound(_) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
        other => api_error(&other),
    }
}

/// Main handler for /api/v1/subscriptions/* routes
pub async fn handle_subscriptions_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
    path: &str,
) -> Response<FullBody> {
    let method = req.method().clone();
    let subpath = path.strip_prefix("/api/v1/subscriptions").unwrap_or("");

    match (method, subpath) {
        (Method::POST, "/subscribe") => handle_subscribe(req, state).await,

        (Method::POST, "") | (Method::POST, "/") => handle_create(req, state).await,

        (Method::GET, "") | (Method::GET, "/") => handle_list(state).await,

        (Method::GET, p) if p.starts_with("/user/") && p.ends_with("/active") => {
            let raw = p
                .strip_prefix("/user/")
                .and_then(|s| s.strip_suffix("/active"))
                .unwrap_or("");
            handle_active_for_user(state, raw).await
        }

        (Method::GET, p) if p.starts_with("/user/") => {
            let raw = p.strip_prefix("/user/").unwrap_or("");
            handle_list_for_user(state, raw).await
        }

        (Method::POST, p) if p.ends_with("/use-view") => {
            let raw = p
                .strip_prefix('/')
                .and_then(|s| s.strip_suffix("/use-view"))
                .unwrap_or("");
            handle_use_view(req, state, raw).await
        }

        (Method::PUT, p) if p.ends_with("/end") => {
            let raw = p
                .strip_prefix('/')
                .and_then(|s| s.strip_suffix("/end"))
                .unwrap_or("");
            handle_end(state, raw).await
        }

        (Method::PUT, p) if p.ends_with("/upgrade") => {
            let raw = p
                .strip_prefix('/')
                .and_then(|s| s.strip_suffix("/upgrade"))
                .unwrap_or("");
            handle_upgrade(req, state, raw).await
        }

        (Method::GET, p) if p.matches('/').count() == 1 => {
            handle_get(state, p.trim_start_matches('/')).await
        }

        (Method::PUT, p) if p.matches('/').count() == 1 => {
            handle_update(req, state, p.trim_start_matches('/')).await
        }

        (Method::DELETE, p) if p.matches('/').count() == 1 => {
            handle_delete(state, p.trim_start_matches('/')).await
        }

        _ => error_response(StatusCode::NOT_FOUND, "not found"),
    }
}

async fn handle_subscribe(req: Request<Incoming>, state: Arc<AppState>) -> Response<FullBody> {
    let request: SubscribeRequest = match read_json_body(req, state.args.max_body_bytes).await {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    let user_id = match parse_object_id(&request.user_id, "user") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let plan_id = match parse_object_id(&request.plan_id, "plan") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let start_date = match parse_date(request.start_date.as_deref(), "startDate") {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    let end_date = match parse_date(request.end_date.as_deref(), "endDate") {
        Ok(d) => d,
        Err(resp) => return resp,
    };

    let params = SubscribeParams {
        user_id,
        plan_id,
        start_date,
        end_date,
    };

    match state.engine.subscribe(params).await {
        Ok(record) => match state.store.expand(record).await {
            Ok(view) => json_response(StatusCode::CREATED, &view),
            Err(e) => api_error(&e),
        },
        Err(e) => body_ref_error(e),
    }
}

async fn handle_create(req: Request<Incoming>, state: Arc<AppState>) -> Response<FullBody> {
    let request: CreateRequest = match read_json_body(req, state.args.max_body_bytes).await {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    let user_id = match parse_object_id(&request.user_id, "user") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let plan_id = match parse_object_id(&request.plan_id, "plan") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let start_date = match parse_date(Some(&request.start_date), "startDate") {
        Ok(Some(d)) => d,
        _ => return error_response(StatusCode::BAD_REQUEST, "startDate must be an RFC 3339 date"),
    };
    let end_date = match parse_date(Some(&request.end_date), "endDate") {
        Ok(Some(d)) => d,
        _ => return error_response(StatusCode::BAD_REQUEST, "endDate must be an RFC 3339 date"),
    };
    if let Some(available) = request.available {
        if available < 0 {
            return error_response(StatusCode::BAD_REQUEST, "available must not be negative");
        }
    }

    let params = CreateParams {
        user_id,
        plan_id,
        start_date,
        end_date,
        available: request.available,
    };

    match state.engine.create(params).await {
        Ok(record) => match state.store.expand(record).await {
            Ok(view) => json_response(StatusCode::CREATED, &view),
            Err(e) => api_error(&e),
        },
        Err(e) => body_ref_error(e),
    }
}

async fn handle_list(state: Arc<AppState>) -> Response<FullBody> {
    let records = match state.store.find_all().await {
        Ok(r) => r,
        Err(e) => return api_error(&e),
    };
    match state.store.expand_many(records).await {
        Ok(views) => json_response(StatusCode::OK, &views),
        Err(e) => api_error(&e),
    }
}

async fn handle_get(state: Arc<AppState>, raw_id: &str) -> Response<FullBody> {
    let id = match parse_object_id(raw_id, "subscription") {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let record = match state.store.find(&id).await {
        Ok(r) => r,
        Err(e) => return api_error(&e),
    };
    match state.store.expand(record).await {
        Ok(view) => json_response(StatusCode::OK, &view),
        Err(e) => api_error(&e),
    }
}

async fn handle_list_for_user(state: Arc<AppState>, raw_id: &str) -> Response<FullBody> {
    let user_id = match parse_object_id(raw_id, "user") {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let records = match state.store.find_all_for_user(&user_id).await {
        Ok(r) => r,
        Err(e) => return api_error(&e),
    };
    match state.store.expand_many(records).await {
        Ok(views) => json_response(StatusCode::OK, &views),
        Err(e) => api_error(&e),
    }
}

async fn handle_active_for_user(state: Arc<AppState>, raw_id: &str) -> Response<FullBody> {
    let user_id = match parse_object_id(raw_id, "user") {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let records = match state.store.find_active_for_user(&user_id, DateTime::now()).await {
        Ok(r) => r,
        Err(e) => return api_error(&e),
    };
    match state.store.expand_many(records).await {
        Ok(views) => json_response(StatusCode::OK, &views),
        Err(e) => api_error(&e),
    }
}

async fn handle_update(
    req: Request<Incoming>,
    state: Arc<AppState>,
    raw_id: &str,
) -> Response<FullBody> {
    let id = match parse_object_id(raw_id, "subscription") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let request: UpdateRequest = match read_json_body(req, state.args.max_body_bytes).await {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    let start_date = match parse_date(request.start_date.as_deref(), "startDate") {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    let end_date = match parse_date(request.end_date.as_deref(), "endDate") {
        Ok(d) => d,
        Err(resp) => return resp,
    };

    let viewed_properties = match request.viewed_properties {
        None => None,
        Some(entries) => {
            let mut parsed = Vec::with_capacity(entries.len());
            for entry in entries {
                let property_id = match parse_object_id(&entry.property_id, "property") {
                    Ok(id) => id,
                    Err(resp) => return resp,
                };
                let viewed_at = match parse_date(entry.viewed_at.as_deref(), "viewedAt") {
                    Ok(d) => d.unwrap_or_else(DateTime::now),
                    Err(resp) => return resp,
                };
                parsed.push(ViewedProperty {
                    property_id,
                    viewed_at,
                });
            }
            Some(parsed)
        }
    };

    let patch = UpdatePatch {
        start_date,
        end_date,
        available: request.available,
        viewed_properties,
        active: request.active,
    };

    match state.engine.update(&id, patch).await {
        Ok(record) => match state.store.expand(record).await {
            Ok(view) => json_response(StatusCode::OK, &view),
            Err(e) => api_error(&e),
        },
        Err(e) => api_error(&e),
    }
}

async fn handle_delete(state: Arc<AppState>, raw_id: &str) -> Response<FullBody> {
    let id = match parse_object_id(raw_id, "subscription") {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match state.engine.remove(&id).await {
        Ok(()) => json_response(StatusCode::OK, &serde_json::json!({ "success": true })),
        Err(e) => api_error(&e),
    }
}

async fn handle_use_view(
    req: Request<Incoming>,
    state: Arc<AppState>,
    raw_id: &str,
) -> Response<FullBody> {
    let id = match parse_object_id(raw_id, "subscription") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let request: UseViewRequest = match read_json_body(req, state.args.max_body_bytes).await {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let property_id = match parse_object_id(&request.property_id, "property") {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let record = match state.meter.use_view(&id, &property_id).await {
        Ok(r) => r,
        Err(e) => {
            warn!(subscription = %id, property = %property_id, error = %e, "View consume rejected");
            return api_error(&e);
        }
    };

    let remaining = record.remaining_views();
    match state.store.expand(record).await {
        Ok(view) => json_response(
            StatusCode::OK,
            &serde_json::json!({
                "userSubscription": view,
                "remainingViews": remaining,
            }),
        ),
        Err(e) => api_error(&e),
    }
}

async fn handle_end(state: Arc<AppState>, raw_id: &str) -> Response<FullBody> {
    let id = match parse_object_id(raw_id, "subscription") {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match state.engine.end(&id).await {
        Ok(record) => match state.store.expand(record).await {
            Ok(view) => json_response(StatusCode::OK, &view),
            Err(e) => api_error(&e),
        },
        Err(e) => api_error(&e),
    }
}

async fn handle_upgrade(
    req: Request<Incoming>,
    state: Arc<AppState>,
    raw_id: &str,
) -> Response<FullBody> {
    let id = match parse_object_id(raw_id, "subscription") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let request: UpgradeRequest = match read_json_body(req, state.args.max_body_bytes).await {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let new_plan_id = match parse_object_id(&request.new_plan_id, "plan") {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let params = UpgradeParams {
        new_plan_id,
        inherit_remaining: request.inherit_remaining,
    };

    match state.engine.upgrade(&id, params).await {
        Ok(record) => match state.store.expand(record).await {
            Ok(view) => json_response(StatusCode::OK, &view),
            Err(e) => body_ref_error(e),
        },
        Err(e) => body_ref_error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upgrade_request_defaults_inherit() {
        let req: UpgradeRequest =
            serde_json::from_str(r#"{"newPlanId":"65f000000000000000000001"}"#).unwrap();
        assert!(req.inherit_remaining);

        let req: UpgradeRequest = serde_json::from_str(
            r#"{"newPlanId":"65f000000000000000000001","inheritRemaining":false}"#,
        )
        .unwrap();
        assert!(!req.inherit_remaining);
    }

    #[test]
    fn test_subscribe_request_dates_optional() {
        let req: SubscribeRequest = serde_json::from_str(
            r#"{"userId":"65f000000000000000000001","planId":"65f000000000000000000002"}"#,
        )
        .unwrap();
        assert!(req.start_date.is_none());
        assert!(req.end_date.is_none());
    }

    #[test]
    fn test_body_ref_error_downgrades_not_found() {
        let resp = body_ref_error(GatehouseError::NotFound("plan"));
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = body_ref_error(GatehouseError::NoQuota);
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
