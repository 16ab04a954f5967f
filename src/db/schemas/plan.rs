//! Subscription plan schema
//!
//! Read-only reference rows describing purchasable plans: how many
//! property-contact views a term grants and how long the term runs.
//! Plans are created by an administrative seeding process; the core
//! never mutates them.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for plans
pub const PLAN_COLLECTION: &str = "plans";

/// Default term length in days when a plan carries no positive duration
pub const DEFAULT_DURATION_DAYS: i64 = 30;

/// Plan document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct PlanDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Plan name (e.g. "Silver", "Gold", "Diamond")
    pub name: String,

    /// Display label for the term length (e.g. "15 Days")
    #[serde(default)]
    pub time_label: String,

    /// Term length in days
    #[serde(default)]
    pub duration_days: i64,

    /// Number of property-contact views granted per term
    #[serde(default)]
    pub accessible_slots: i64,

    /// Price including tax
    #[serde(default)]
    pub price: f64,

    /// Whether the plan is currently offered
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl PlanDoc {
    /// Effective term length: the plan's duration when positive, otherwise
    /// the 30-day fallback.
    pub fn effective_duration_days(&self) -> i64 {
        if self.duration_days > 0 {
            self.duration_days
        } else {
            DEFAULT_DURATION_DAYS
        }
    }
}

impl IntoIndexes for PlanDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Seeding dedupes by name
            (
                doc! { "name": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("plan_name_unique".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for PlanDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_duration_uses_plan_value() {
        let plan = PlanDoc {
            duration_days: 15,
            ..Default::default()
        };
        assert_eq!(plan.effective_duration_days(), 15);
    }

    #[test]
    fn test_effective_duration_falls_back_to_thirty_days() {
        let plan = PlanDoc::default();
        assert_eq!(plan.effective_duration_days(), 30);

        let negative = PlanDoc {
            duration_days: -5,
            ..Default::default()
        };
        assert_eq!(negative.effective_duration_days(), 30);
    }
}
