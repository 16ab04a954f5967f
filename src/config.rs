//! Configuration for Gatehouse
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use uuid::Uuid;

/// Gatehouse - subscription and view-entitlement backend
#[derive(Parser, Debug, Clone)]
#[command(name = "gatehouse")]
#[command(about = "Subscription backend for the rental marketplace")]
pub struct Args {
    /// Unique node identifier for this instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "gatehouse")]
    pub mongodb_db: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Maximum accepted request body size in bytes
    #[arg(long, env = "MAX_BODY_BYTES", default_value = "65536")]
    pub max_body_bytes: usize,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.mongodb_uri.is_empty() {
            return Err("MONGODB_URI must not be empty".to_string());
        }
        if self.mongodb_db.is_empty() {
            return Err("MONGODB_DB must not be empty".to_string());
        }
        if self.max_body_bytes == 0 {
            return Err("MAX_BODY_BYTES must be greater than zero".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Args {
        Args::parse_from(["gatehouse"])
    }

    #[test]
    fn test_defaults_validate() {
        assert!(base_args().validate().is_ok());
    }

    #[test]
    fn test_empty_db_rejected() {
        let mut args = base_args();
        args.mongodb_db = String::new();
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_zero_body_limit_rejected() {
        let mut args = base_args();
        args.max_body_bytes = 0;
        assert!(args.validate().is_err());
    }
}
