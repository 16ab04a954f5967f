//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::catalog::PlanCatalog;
use crate::config::Args;
use crate::db::MongoClient;
use crate::entitlements::{EntitlementStore, SubscriptionEngine, ViewMeter};
use crate::routes;
use crate::types::GatehouseError;

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub mongo: MongoClient,
    /// Read-only plan lookups
    pub catalog: PlanCatalog,
    /// Entitlement record reads and reference expansion
    pub store: EntitlementStore,
    /// Transactional lifecycle operations
    pub engine: SubscriptionEngine,
    /// Atomic view-quota consumption
    pub meter: ViewMeter,
}

impl AppState {
    pub fn new(args: Args, mongo: MongoClient) -> Self {
        let catalog = PlanCatalog::new(mongo.clone());
        let store = EntitlementStore::new(mongo.clone());
        let engine = SubscriptionEngine::new(mongo.clone());
        let meter = ViewMeter::new(mongo.clone());
        Self {
            args,
            mongo,
            catalog,
            store,
            engine,
            meter,
        }
    }
}

/// Start the HTTP server
pub async fn run(state: Arc<AppState>) -> Result<(), GatehouseError> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "Gatehouse listening on {} as node {}",
        state.args.listen, state.args.node_id
    );

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .preserve_header_case(true)
                        .title_case_headers(true)
                        .serve_connection(io, service)
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    info!("[{}] {} {}", addr, method, path);

    let response = match (method, path.as_str()) {
        // Health checks
        (Method::GET, "/health") | (Method::GET, "/healthz") => {
            to_boxed(routes::health::health_check(state).await)
        }
        (Method::GET, "/ready") | (Method::GET, "/readyz") => {
            to_boxed(routes::health::readiness_check(state).await)
        }
        (Method::GET, "/version") => to_boxed(routes::health::version_info()),

        // CORS preflight
        (Method::OPTIONS, _) => to_boxed(preflight_response()),

        // Plan catalog
        _ if path.starts_with("/api/v1/plans") => {
            to_boxed(routes::plans::handle_plans_request(req, state, &path).await)
        }

        // Subscription lifecycle and metering
        _ if path.starts_with("/api/v1/subscriptions") => {
            to_boxed(routes::subscriptions::handle_subscriptions_request(req, state, &path).await)
        }

        _ => to_boxed(not_found_response(&path)),
    };

    Ok(response)
}

/// Convert a Full<Bytes> body to BoxBody
fn to_boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed())
}

/// CORS preflight response
fn preflight_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Headers", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, PUT, DELETE, OPTIONS")
        .body(Full::new(Bytes::new()))
        .unwrap()
}

/// Not found response
fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "not found",
        "path": path,
    });

    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}
