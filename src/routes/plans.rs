//! Plan catalog endpoints
//!
//! - `GET /api/v1/plans` - List available plans
//! - `GET /api/v1/plans/{id}` - Get one plan
//!
//! Read-only; plans are written by the seeding process.

use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

use crate::db::schemas::PlanDoc;
use crate::routes::{api_error, error_response, json_response, parse_object_id, FullBody};
use crate::server::AppState;

/// Plan in wire form
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanView {
    pub id: String,
    pub name: String,
    pub time_label: String,
    pub duration_days: i64,
    pub accessible_slots: i64,
    pub price: f64,
    pub is_active: bool,
}

impl From<PlanDoc> for PlanView {
    fn from(plan: PlanDoc) -> Self {
        Self {
            id: plan._id.map(|id| id.to_hex()).unwrap_or_default(),
            name: plan.name,
            time_label: plan.time_label,
            duration_days: plan.duration_days,
            accessible_slots: plan.accessible_slots,
            price: plan.price,
            is_active: plan.is_active,
        }
    }
}

/// Main handler for /api/v1/plans/* routes
pub async fn handle_plans_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
    path: &str,
) -> Response<FullBody> {
    let method = req.method().clone();
    let subpath = path.strip_prefix("/api/v1/plans").unwrap_or("");

    match (method, subpath) {
        (Method::GET, "") | (Method::GET, "/") => handle_list(state).await,

        (Method::GET, p) if p.matches('/').count() == 1 => {
            let raw = p.trim_start_matches('/');
            handle_get(state, raw).await
        }

        _ => error_response(StatusCode::NOT_FOUND, "not found"),
    }
}

async fn handle_list(state: Arc<AppState>) -> Response<FullBody> {
    match state.catalog.list().await {
        Ok(plans) => {
            let views: Vec<PlanView> = plans.into_iter().map(PlanView::from).collect();
            json_response(StatusCode::OK, &views)
        }
        Err(e) => api_error(&e),
    }
}

async fn handle_get(state: Arc<AppState>, raw_id: &str) -> Response<FullBody> {
    let id = match parse_object_id(raw_id, "plan") {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match state.catalog.get(&id).await {
        Ok(plan) => json_response(StatusCode::OK, &PlanView::from(plan)),
        Err(e) => api_error(&e),
    }
}
