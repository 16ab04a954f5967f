//! User subscription (entitlement) schema
//!
//! One document per purchased subscription term. Tracks the remaining
//! metered view quota, the validity window, and which properties have
//! already been viewed under this term.
//!
//! Two fields are derived, never authoritative on their own:
//!
//! - `access_level` is a pure function of `available`
//! - `active` caches `start_date <= now <= end_date && available > 0`
//!
//! Both are recomputed on every mutating operation; a stale value
//! self-corrects on the next write.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for user subscriptions
pub const ENTITLEMENT_COLLECTION: &str = "user_subscriptions";

/// Access tier derived from remaining quota
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    /// More than 10 views remaining
    #[default]
    Full,
    /// 1 to 10 views remaining
    Limited,
    /// Quota exhausted
    None,
}

impl AccessLevel {
    /// Derive the tier from a remaining-view count.
    pub fn from_remaining(remaining: i64) -> Self {
        if remaining <= 0 {
            AccessLevel::None
        } else if remaining <= 10 {
            AccessLevel::Limited
        } else {
            AccessLevel::Full
        }
    }

    /// Wire/storage representation, as serialized by serde.
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::Full => "full",
            AccessLevel::Limited => "limited",
            AccessLevel::None => "none",
        }
    }
}

/// One property view charged against a subscription.
///
/// `property_id` is unique within a record; uniqueness is enforced by the
/// metering protocol's conditional update, never by post-hoc dedup.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ViewedProperty {
    pub property_id: ObjectId,
    pub viewed_at: DateTime,
}

/// User subscription document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct EntitlementDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Owning user
    pub user_id: ObjectId,

    /// Plan this term was purchased under
    pub plan_id: ObjectId,

    /// Term start
    pub start_date: DateTime,

    /// Term end
    pub end_date: DateTime,

    /// Remaining metered views; decremented only by the metering
    /// protocol, never negative
    #[serde(default)]
    pub available: i64,

    /// Properties already viewed under this term
    #[serde(default)]
    pub viewed_properties: Vec<ViewedProperty>,

    /// Derived tier, see [`AccessLevel::from_remaining`]
    #[serde(default)]
    pub access_level: AccessLevel,

    /// Cached "currently usable" flag, see [`compute_active`]
    #[serde(default)]
    pub active: bool,
}

// Manual impl because `bson::DateTime` has no `Default`; matches the
// derive otherwise, with the date fields at the Unix epoch.
impl Default for EntitlementDoc {
    fn default() -> Self {
        Self {
            _id: None,
            metadata: Metadata::default(),
            user_id: ObjectId::default(),
            plan_id: ObjectId::default(),
            start_date: DateTime::from_millis(0),
            end_date: DateTime::from_millis(0),
            available: 0,
            viewed_properties: Vec::new(),
            access_level: AccessLevel::default(),
            active: false,
        }
    }
}

/// Whether a record is usable at `as_of`: inside the term window with
/// quota remaining.
pub fn compute_active(start: DateTime, end: DateTime, available: i64, as_of: DateTime) -> bool {
    start <= as_of && as_of <= end && available > 0
}

impl EntitlementDoc {
    /// Recompute `active` as of the given instant.
    pub fn compute_active(&self, as_of: DateTime) -> bool {
        compute_active(self.start_date, self.end_date, self.available, as_of)
    }

    /// Whether this property was already viewed under this term.
    pub fn has_viewed(&self, property_id: &ObjectId) -> bool {
        self.viewed_properties
            .iter()
            .any(|vp| vp.property_id == *property_id)
    }

    /// Remaining metered views.
    pub fn remaining_views(&self) -> i64 {
        self.available
    }
}

impl IntoIndexes for EntitlementDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "user_id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("entitlement_user".to_string())
                        .build(),
                ),
            ),
            // Serves the active-for-user date-window query
            (
                doc! { "user_id": 1, "start_date": 1, "end_date": 1 },
                Some(
                    IndexOptions::builder()
                        .name("entitlement_user_window".to_string())
                        .build(),
                ),
            ),
            // Serves the metering protocol's duplicate-view precondition
            (
                doc! { "viewed_properties.property_id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("entitlement_viewed_property".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for EntitlementDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(millis: i64) -> DateTime {
        DateTime::from_millis(millis)
    }

    #[test]
    fn test_access_level_boundaries() {
        assert_eq!(AccessLevel::from_remaining(-3), AccessLevel::None);
        assert_eq!(AccessLevel::from_remaining(0), AccessLevel::None);
        assert_eq!(AccessLevel::from_remaining(1), AccessLevel::Limited);
        assert_eq!(AccessLevel::from_remaining(10), AccessLevel::Limited);
        assert_eq!(AccessLevel::from_remaining(11), AccessLevel::Full);
        assert_eq!(AccessLevel::from_remaining(19), AccessLevel::Full);
    }

    #[test]
    fn test_access_level_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&AccessLevel::Full).unwrap(),
            "\"full\""
        );
        assert_eq!(
            serde_json::to_string(&AccessLevel::Limited).unwrap(),
            "\"limited\""
        );
        assert_eq!(
            serde_json::to_string(&AccessLevel::None).unwrap(),
            "\"none\""
        );
    }

    #[test]
    fn test_compute_active_truth_table() {
        // inside window, quota left
        assert!(compute_active(dt(0), dt(100), 1, dt(50)));
        // window boundaries are inclusive
        assert!(compute_active(dt(0), dt(100), 1, dt(0)));
        assert!(compute_active(dt(0), dt(100), 1, dt(100)));
        // before start / after end
        assert!(!compute_active(dt(10), dt(100), 1, dt(5)));
        assert!(!compute_active(dt(0), dt(100), 1, dt(101)));
        // quota exhausted inside window
        assert!(!compute_active(dt(0), dt(100), 0, dt(50)));
        assert!(!compute_active(dt(0), dt(100), -1, dt(50)));
    }

    #[test]
    fn test_has_viewed() {
        let property = ObjectId::new();
        let other = ObjectId::new();
        let record = EntitlementDoc {
            viewed_properties: vec![ViewedProperty {
                property_id: property,
                viewed_at: DateTime::now(),
            }],
            ..Default::default()
        };
        assert!(record.has_viewed(&property));
        assert!(!record.has_viewed(&other));
    }
}
