//! Entitlement record store
//!
//! Read access to user subscription records, and the read-side reference
//! expansion that joins plan and user summaries onto a record. The write
//! path stores ids only; expansion always happens after the core write
//! completes, outside any transaction.

use bson::{doc, oid::ObjectId, DateTime, Document};
use serde::Serialize;
use tracing::warn;

use crate::db::schemas::{
    AccessLevel, EntitlementDoc, PlanDoc, UserDoc, ENTITLEMENT_COLLECTION, PLAN_COLLECTION,
    USER_COLLECTION,
};
use crate::db::MongoClient;
use crate::types::{GatehouseError, Result};

/// Build the active-for-user filter: term window contains `as_of`.
///
/// Deliberately date-only. Records whose quota is exhausted but whose term
/// still runs DO match; callers that also need quota should check
/// `available` themselves. This mirrors the source system's behavior.
pub fn active_window_filter(user_id: &ObjectId, as_of: DateTime) -> Document {
    doc! {
        "user_id": user_id,
        "start_date": { "$lte": as_of },
        "end_date": { "$gte": as_of },
    }
}

/// Plan summary joined onto an expanded record
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSummary {
    pub id: String,
    pub name: String,
    pub price: f64,
    pub duration_days: i64,
    pub accessible_slots: i64,
}

impl From<PlanDoc> for PlanSummary {
    fn from(plan: PlanDoc) -> Self {
        Self {
            id: plan._id.map(|id| id.to_hex()).unwrap_or_default(),
            name: plan.name,
            price: plan.price,
            duration_days: plan.duration_days,
            accessible_slots: plan.accessible_slots,
        }
    }
}

/// User summary joined onto an expanded record
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub name: String,
    pub email: String,
}

impl From<UserDoc> for UserSummary {
    fn from(user: UserDoc) -> Self {
        Self {
            id: user._id.map(|id| id.to_hex()).unwrap_or_default(),
            name: user.name,
            email: user.email,
        }
    }
}

/// Viewed-property entry in wire form
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewedPropertyView {
    pub property_id: String,
    pub viewed_at: String,
}

/// An entitlement record with its references expanded for responses
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementView {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanSummary>,
    pub start_date: String,
    pub end_date: String,
    pub available: i64,
    pub viewed_properties: Vec<ViewedPropertyView>,
    pub access_level: AccessLevel,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

fn rfc3339(dt: DateTime) -> String {
    dt.try_to_rfc3339_string().unwrap_or_default()
}

/// Read access to entitlement records
#[derive(Clone)]
pub struct EntitlementStore {
    mongo: MongoClient,
}

impl EntitlementStore {
    pub fn new(mongo: MongoClient) -> Self {
        Self { mongo }
    }

    /// Find one record by id.
    pub async fn find(&self, id: &ObjectId) -> Result<EntitlementDoc> {
        let collection = self
            .mongo
            .collection::<EntitlementDoc>(ENTITLEMENT_COLLECTION)
            .await?;
        collection
            .find_one(doc! { "_id": id })
            .await?
            .ok_or(GatehouseError::NotFound("user subscription"))
    }

    /// List every record.
    pub async fn find_all(&self) -> Result<Vec<EntitlementDoc>> {
        let collection = self
            .mongo
            .collection::<EntitlementDoc>(ENTITLEMENT_COLLECTION)
            .await?;
        collection.find_many(doc! {}).await
    }

    /// List every record owned by a user.
    pub async fn find_all_for_user(&self, user_id: &ObjectId) -> Result<Vec<EntitlementDoc>> {
        let collection = self
            .mongo
            .collection::<EntitlementDoc>(ENTITLEMENT_COLLECTION)
            .await?;
        collection.find_many(doc! { "user_id": user_id }).await
    }

    /// List a user's records whose term window contains `as_of`.
    ///
    /// See [`active_window_filter`] for why this does not also filter by
    /// remaining quota.
    pub async fn find_active_for_user(
        &self,
        user_id: &ObjectId,
        as_of: DateTime,
    ) -> Result<Vec<EntitlementDoc>> {
        let collection = self
            .mongo
            .collection::<EntitlementDoc>(ENTITLEMENT_COLLECTION)
            .await?;
        collection
            .find_many(active_window_filter(user_id, as_of))
            .await
    }

    /// Expand a record with plan and user summaries.
    ///
    /// A dangling reference degrades to a missing summary rather than
    /// failing the read; the record itself is still returned.
    pub async fn expand(&self, record: EntitlementDoc) -> Result<EntitlementView> {
        let plans = self.mongo.collection::<PlanDoc>(PLAN_COLLECTION).await?;
        let users = self.mongo.collection::<UserDoc>(USER_COLLECTION).await?;

        let plan = plans.find_one(doc! { "_id": record.plan_id }).await?;
        if plan.is_none() {
            warn!(plan_id = %record.plan_id, "Entitlement references a missing plan");
        }
        let user = users.find_one(doc! { "_id": record.user_id }).await?;
        if user.is_none() {
            warn!(user_id = %record.user_id, "Entitlement references a missing user");
        }

        Ok(Self::view(record, plan, user))
    }

    /// Expand many records.
    pub async fn expand_many(&self, records: Vec<EntitlementDoc>) -> Result<Vec<EntitlementView>> {
        let mut views = Vec::with_capacity(records.len());
        for record in records {
            views.push(self.expand(record).await?);
        }
        Ok(views)
    }

    fn view(
        record: EntitlementDoc,
        plan: Option<PlanDoc>,
        user: Option<UserDoc>,
    ) -> EntitlementView {
        EntitlementView {
            id: record._id.map(|id| id.to_hex()).unwrap_or_default(),
            user: user.map(UserSummary::from),
            plan: plan.map(PlanSummary::from),
            start_date: rfc3339(record.start_date),
            end_date: rfc3339(record.end_date),
            available: record.available,
            viewed_properties: record
                .viewed_properties
                .iter()
                .map(|vp| ViewedPropertyView {
                    property_id: vp.property_id.to_hex(),
                    viewed_at: rfc3339(vp.viewed_at),
                })
                .collect(),
            access_level: record.access_level,
            active: record.active,
            created_at: record.metadata.created_at.map(rfc3339),
            updated_at: record.metadata.updated_at.map(rfc3339),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_window_filter_is_date_only() {
        // Intentional: no `available` clause. Time-valid records with
        // exhausted quota must still match.
        let user_id = ObjectId::new();
        let as_of = DateTime::from_millis(1_700_000_000_000);
        let filter = active_window_filter(&user_id, as_of);

        assert_eq!(
            filter,
            doc! {
                "user_id": user_id,
                "start_date": { "$lte": as_of },
                "end_date": { "$gte": as_of },
            }
        );
        assert!(!filter.contains_key("available"));
        assert!(!filter.contains_key("active"));
    }

    #[test]
    fn test_view_serializes_camel_case() {
        let record = EntitlementDoc {
            _id: Some(ObjectId::new()),
            user_id: ObjectId::new(),
            plan_id: ObjectId::new(),
            start_date: DateTime::from_millis(0),
            end_date: DateTime::from_millis(86_400_000),
            available: 12,
            access_level: AccessLevel::Full,
            active: true,
            ..Default::default()
        };
        let view = EntitlementStore::view(record, None, None);
        let json = serde_json::to_value(&view).unwrap();

        assert_eq!(json["available"], 12);
        assert_eq!(json["accessLevel"], "full");
        assert_eq!(json["active"], true);
        assert!(json.get("startDate").is_some());
        assert!(json.get("viewedProperties").is_some());
        // dangling references degrade to absent summaries
        assert!(json.get("user").is_none());
        assert!(json.get("plan").is_none());
    }
}
