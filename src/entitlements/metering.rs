//! Atomic view metering
//!
//! Consuming a view is a single conditional `findOneAndUpdate`: the
//! filter checks activity, remaining quota, and duplicate protection,
//! and the update decrements the quota and appends the viewed property
//! in the same document-atomic step. Concurrent requests for the last
//! remaining view can never both succeed, and the same property is
//! never charged twice against one record.
//!
//! A second, non-atomic step refreshes the derived fields (access level,
//! exhaustion flip of `active`). That step is idempotent, so a crash
//! between the two steps costs nothing but a stale derived field that
//! the next successful consume repairs.

use bson::{doc, oid::ObjectId, DateTime, Document};
use tracing::{debug, warn};

use crate::db::schemas::{AccessLevel, EntitlementDoc, ENTITLEMENT_COLLECTION};
use crate::db::{MongoClient, MongoCollection};
use crate::types::{GatehouseError, Result};

/// Filter for the conditional consume: the record must exist, be active,
/// have quota left, not already contain this property, and not be
/// soft-deleted.
pub fn metering_filter(id: &ObjectId, property_id: &ObjectId) -> Document {
    doc! {
        "_id": id,
        "active": true,
        "available": { "$gte": 1 },
        "viewed_properties.property_id": { "$ne": property_id },
        "metadata.is_deleted": { "$ne": true },
    }
}

/// Update for the conditional consume: one quota slot down, one viewed
/// property appended.
pub fn metering_update(property_id: &ObjectId, viewed_at: DateTime) -> Document {
    doc! {
        "$inc": { "available": -1 },
        "$push": { "viewed_properties": {
            "property_id": property_id,
            "viewed_at": viewed_at,
        } },
        "$set": { "metadata.updated_at": viewed_at },
    }
}

/// Consumes view quota against entitlement records
#[derive(Clone)]
pub struct ViewMeter {
    mongo: MongoClient,
}

impl ViewMeter {
    pub fn new(mongo: MongoClient) -> Self {
        Self { mongo }
    }

    async fn entitlements(&self) -> Result<MongoCollection<EntitlementDoc>> {
        self.mongo
            .collection::<EntitlementDoc>(ENTITLEMENT_COLLECTION)
            .await
    }

    /// Consume one view of `property_id` against record `id`.
    ///
    /// Returns the record as it stands after the consume, derived fields
    /// refreshed. When the conditional update matches nothing, the
    /// record is re-read and the failure is classified: missing record,
    /// duplicate view, exhausted or inactive record, or a lost race.
    pub async fn use_view(
        &self,
        id: &ObjectId,
        property_id: &ObjectId,
    ) -> Result<EntitlementDoc> {
        let entitlements = self.entitlements().await?;
        let now = DateTime::now();
        let updated = entitlements
            .find_one_and_update(metering_filter(id, property_id), metering_update(property_id, now))
            .await?;

        let record = match updated {
            Some(record) => record,
            None => return Err(self.classify_rejection(id, property_id).await),
        };
        debug!(record = %id, property = %property_id, remaining = record.available, "View consumed");

        self.refresh_derived(record).await
    }

    /// Why did the conditional update match nothing? Checked in a fixed
    /// order so overlapping causes report deterministically: duplicate
    /// wins over exhaustion.
    async fn classify_rejection(&self, id: &ObjectId, property_id: &ObjectId) -> GatehouseError {
        let entitlements = match self.entitlements().await {
            Ok(c) => c,
            Err(e) => return e,
        };
        let record = match entitlements.find_one(doc! { "_id": id }).await {
            Ok(Some(record)) => record,
            Ok(None) => return GatehouseError::NotFound("user subscription"),
            Err(e) => return e,
        };

        if record.has_viewed(property_id) {
            return GatehouseError::AlreadyViewed;
        }
        if !record.active || record.available <= 0 {
            return GatehouseError::NoQuota;
        }
        // Filter rejected but the re-read looks consumable: a concurrent
        // consume landed between the two reads.
        warn!(record = %id, property = %property_id, "View registration lost a race");
        GatehouseError::UpdateConflict
    }

    /// Step two of the consume: re-derive `access_level` and flip
    /// `active` off on exhaustion. Pure function of `available`, safe to
    /// repeat.
    async fn refresh_derived(&self, record: EntitlementDoc) -> Result<EntitlementDoc> {
        let id = record
            ._id
            .ok_or_else(|| GatehouseError::Database("record has no id".into()))?;

        let level = AccessLevel::from_remaining(record.available);
        let mut set = doc! { "access_level": level.as_str() };
        if record.available <= 0 {
            set.insert("active", false);
        }

        self.entitlements()
            .await?
            .update_one(doc! { "_id": id }, doc! { "$set": set })
            .await?;

        Ok(EntitlementDoc {
            access_level: level,
            active: record.active && record.available > 0,
            ..record
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::Metadata;

    fn record(available: i64, active: bool) -> EntitlementDoc {
        EntitlementDoc {
            _id: Some(ObjectId::new()),
            metadata: Metadata::default(),
            user_id: ObjectId::new(),
            plan_id: ObjectId::new(),
            start_date: DateTime::from_millis(0),
            end_date: DateTime::from_millis(i64::MAX),
            available,
            viewed_properties: Vec::new(),
            access_level: AccessLevel::from_remaining(available),
            active,
        }
    }

    #[test]
    fn test_metering_filter_shape() {
        let id = ObjectId::new();
        let property = ObjectId::new();
        let filter = metering_filter(&id, &property);

        assert_eq!(filter.get_object_id("_id").unwrap(), id);
        assert_eq!(filter.get_bool("active").unwrap(), true);
        assert_eq!(
            filter.get_document("available").unwrap(),
            &doc! { "$gte": 1 }
        );
        assert_eq!(
            filter.get_document("viewed_properties.property_id").unwrap(),
            &doc! { "$ne": property }
        );
        assert_eq!(
            filter.get_document("metadata.is_deleted").unwrap(),
            &doc! { "$ne": true }
        );
    }

    #[test]
    fn test_metering_update_decrements_and_appends() {
        let property = ObjectId::new();
        let at = DateTime::from_millis(1_700_000_000_000);
        let update = metering_update(&property, at);

        assert_eq!(
            update.get_document("$inc").unwrap(),
            &doc! { "available": -1 }
        );
        let pushed = update
            .get_document("$push")
            .unwrap()
            .get_document("viewed_properties")
            .unwrap();
        assert_eq!(pushed.get_object_id("property_id").unwrap(), property);
        assert_eq!(pushed.get_datetime("viewed_at").unwrap(), &at);
    }

    #[test]
    fn test_duplicate_detectable_on_exhausted_record() {
        // A record can be both exhausted and already contain the
        // property; classification checks the duplicate first, so the
        // viewed set must answer regardless of quota state.
        let property = ObjectId::new();
        let mut r = record(0, false);
        r.viewed_properties.push(crate::db::schemas::ViewedProperty {
            property_id: property,
            viewed_at: DateTime::from_millis(0),
        });

        assert!(r.has_viewed(&property));
        assert!(!r.active);
        assert_eq!(r.available, 0);
    }

    #[test]
    fn test_exhaustion_flips_active_and_level() {
        let r = record(1, true);
        // after consuming the last view: available 0 -> level none, inactive
        let after = r.available - 1;
        assert_eq!(AccessLevel::from_remaining(after), AccessLevel::None);
        assert!(!(r.active && after > 0));
    }
}
