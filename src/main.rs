//! Gatehouse - subscription and view-entitlement backend

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gatehouse::{
    config::Args,
    db::schemas::{EntitlementDoc, PlanDoc, UserDoc, ENTITLEMENT_COLLECTION, PLAN_COLLECTION, USER_COLLECTION},
    db::MongoClient,
    server,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing/logging
    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("gatehouse={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Validate configuration
    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    // Print startup banner
    info!("======================================");
    info!("  Gatehouse - Subscription Backend");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!("MongoDB: {}", args.mongodb_uri);
    info!("Database: {}", args.mongodb_db);
    info!("======================================");

    // Connect to MongoDB; every endpoint needs it, so a failed
    // connection is fatal.
    let mongo = match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
        Ok(client) => {
            info!("MongoDB connected successfully");
            client
        }
        Err(e) => {
            error!("MongoDB connection failed: {}", e);
            std::process::exit(1);
        }
    };

    // Ensure collections exist with their indexes before serving traffic
    mongo.collection::<PlanDoc>(PLAN_COLLECTION).await?;
    mongo.collection::<UserDoc>(USER_COLLECTION).await?;
    mongo
        .collection::<EntitlementDoc>(ENTITLEMENT_COLLECTION)
        .await?;
    info!("Collections and indexes ready");

    let state = Arc::new(server::AppState::new(args, mongo));
    server::run(state).await?;

    Ok(())
}
