//! Subscription lifecycle operations
//!
//! The record-level state machine: Pending → Active → {Exhausted,
//! Expired, Ended}, modeled through the derived `active`/`access_level`
//! fields rather than an explicit status column.
//!
//! Every operation here touches both the entitlement record and the
//! user's current-subscription pointer, so each one runs inside a single
//! multi-document transaction: both writes land or neither does. Any
//! error aborts the transaction and surfaces unchanged; no partial state
//! is ever observable.

use bson::{doc, oid::ObjectId, DateTime};
use mongodb::{ClientSession, Collection};
use tracing::info;

use crate::db::schemas::{
    compute_active, AccessLevel, EntitlementDoc, Metadata, PlanDoc, UserDoc, ViewedProperty,
    ENTITLEMENT_COLLECTION, PLAN_COLLECTION, USER_COLLECTION,
};
use crate::db::mongo::soft_delete_update;
use crate::db::MongoClient;
use crate::entitlements::sync::PointerSync;
use crate::types::{GatehouseError, Result};

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Term end for a start date and a duration in days.
pub fn term_end(start: DateTime, duration_days: i64) -> DateTime {
    DateTime::from_millis(start.timestamp_millis() + duration_days * MILLIS_PER_DAY)
}

fn record_id_hex(record: &EntitlementDoc) -> String {
    record._id.map(|id| id.to_hex()).unwrap_or_default()
}

/// Quota after an upgrade: carry the remainder over or replace it.
pub fn upgraded_available(old_available: i64, new_plan_slots: i64, inherit_remaining: bool) -> i64 {
    if inherit_remaining {
        old_available.max(0) + new_plan_slots
    } else {
        new_plan_slots
    }
}

/// Input for `subscribe`
#[derive(Debug, Clone)]
pub struct SubscribeParams {
    pub user_id: ObjectId,
    pub plan_id: ObjectId,
    /// Defaults to now
    pub start_date: Option<DateTime>,
    /// Defaults to start + plan duration (30-day fallback)
    pub end_date: Option<DateTime>,
}

/// Input for `create` (explicit-window administrative grant)
#[derive(Debug, Clone)]
pub struct CreateParams {
    pub user_id: ObjectId,
    pub plan_id: ObjectId,
    pub start_date: DateTime,
    pub end_date: DateTime,
    /// Defaults to the plan's slot count
    pub available: Option<i64>,
}

/// Partial update for `update`
#[derive(Debug, Clone, Default)]
pub struct UpdatePatch {
    pub start_date: Option<DateTime>,
    pub end_date: Option<DateTime>,
    pub available: Option<i64>,
    /// Administrative escape hatch: replaces the viewed set wholesale,
    /// bypassing the metering dedup guarantee.
    pub viewed_properties: Option<Vec<ViewedProperty>>,
    /// When absent, `active` is recomputed by the standard rule.
    pub active: Option<bool>,
}

/// Input for `upgrade`
#[derive(Debug, Clone)]
pub struct UpgradeParams {
    pub new_plan_id: ObjectId,
    pub inherit_remaining: bool,
}

/// Transactional lifecycle operations over entitlement records
#[derive(Clone)]
pub struct SubscriptionEngine {
    mongo: MongoClient,
    entitlements: Collection<EntitlementDoc>,
    plans: Collection<PlanDoc>,
    users: Collection<UserDoc>,
    sync: PointerSync,
}

impl SubscriptionEngine {
    pub fn new(mongo: MongoClient) -> Self {
        let entitlements = mongo.raw_collection::<EntitlementDoc>(ENTITLEMENT_COLLECTION);
        let plans = mongo.raw_collection::<PlanDoc>(PLAN_COLLECTION);
        let users = mongo.raw_collection::<UserDoc>(USER_COLLECTION);
        let sync = PointerSync::new(&mongo);
        Self {
            mongo,
            entitlements,
            plans,
            users,
            sync,
        }
    }

    async fn start_transaction(&self) -> Result<ClientSession> {
        let mut session = self
            .mongo
            .inner()
            .start_session()
            .await
            .map_err(|e| GatehouseError::Transaction(e.to_string()))?;
        session
            .start_transaction()
            .await
            .map_err(|e| GatehouseError::Transaction(e.to_string()))?;
        Ok(session)
    }

    async fn commit(&self, mut session: ClientSession) -> Result<()> {
        session
            .commit_transaction()
            .await
            .map_err(|e| GatehouseError::Transaction(e.to_string()))
    }

    async fn abort(&self, mut session: ClientSession) {
        // The triggering error is what callers see; abort failures only
        // mean the server will time the transaction out on its own.
        let _ = session.abort_transaction().await;
    }

    async fn load_record(
        &self,
        session: &mut ClientSession,
        id: &ObjectId,
    ) -> Result<EntitlementDoc> {
        self.entitlements
            .find_one(doc! { "_id": id, "metadata.is_deleted": { "$ne": true } })
            .session(&mut *session)
            .await?
            .ok_or(GatehouseError::NotFound("user subscription"))
    }

    async fn load_plan(&self, session: &mut ClientSession, id: &ObjectId) -> Result<PlanDoc> {
        self.plans
            .find_one(doc! { "_id": id, "metadata.is_deleted": { "$ne": true } })
            .session(&mut *session)
            .await?
            .ok_or(GatehouseError::NotFound("plan"))
    }

    async fn require_user(&self, session: &mut ClientSession, id: &ObjectId) -> Result<UserDoc> {
        self.users
            .find_one(doc! { "_id": id, "metadata.is_deleted": { "$ne": true } })
            .session(&mut *session)
            .await?
            .ok_or(GatehouseError::NotFound("user"))
    }

    async fn save_record(
        &self,
        session: &mut ClientSession,
        record: &mut EntitlementDoc,
    ) -> Result<()> {
        let id = record
            ._id
            .ok_or_else(|| GatehouseError::Database("record has no id".into()))?;
        record.metadata.updated_at = Some(DateTime::now());
        self.entitlements
            .replace_one(doc! { "_id": id }, &*record)
            .session(&mut *session)
            .await?;
        Ok(())
    }

    /// Create a subscription term for a user under a plan.
    ///
    /// Dates default to [now, now + plan duration]; quota is seeded from
    /// the plan's slot count. When the new record is active, the user
    /// pointer is set to it in the same transaction.
    pub async fn subscribe(&self, params: SubscribeParams) -> Result<EntitlementDoc> {
        let mut session = self.start_transaction().await?;
        match self.subscribe_in_tx(&mut session, params).await {
            Ok(record) => {
                self.commit(session).await?;
                info!(record = %record_id_hex(&record), "Subscription created");
                Ok(record)
            }
            Err(e) => {
                self.abort(session).await;
                Err(e)
            }
        }
    }

    async fn subscribe_in_tx(
        &self,
        session: &mut ClientSession,
        params: SubscribeParams,
    ) -> Result<EntitlementDoc> {
        let user = self.require_user(session, &params.user_id).await?;
        let plan = self.load_plan(session, &params.plan_id).await?;

        let now = DateTime::now();
        let start = params.start_date.unwrap_or(now);
        let end = params
            .end_date
            .unwrap_or_else(|| term_end(start, plan.effective_duration_days()));

        self.insert_record(session, &user, &plan, start, end, plan.accessible_slots)
            .await
    }

    /// Administrative grant with an explicit validity window.
    pub async fn create(&self, params: CreateParams) -> Result<EntitlementDoc> {
        let mut session = self.start_transaction().await?;
        match self.create_in_tx(&mut session, params).await {
            Ok(record) => {
                self.commit(session).await?;
                info!(record = %record_id_hex(&record), "Subscription granted");
                Ok(record)
            }
            Err(e) => {
                self.abort(session).await;
                Err(e)
            }
        }
    }

    async fn create_in_tx(
        &self,
        session: &mut ClientSession,
        params: CreateParams,
    ) -> Result<EntitlementDoc> {
        let user = self.require_user(session, &params.user_id).await?;
        let plan = self.load_plan(session, &params.plan_id).await?;
        let available = params.available.unwrap_or(plan.accessible_slots);

        self.insert_record(
            session,
            &user,
            &plan,
            params.start_date,
            params.end_date,
            available,
        )
        .await
    }

    async fn insert_record(
        &self,
        session: &mut ClientSession,
        user: &UserDoc,
        plan: &PlanDoc,
        start: DateTime,
        end: DateTime,
        available: i64,
    ) -> Result<EntitlementDoc> {
        if start > end {
            return Err(GatehouseError::Validation(
                "startDate must not be after endDate".into(),
            ));
        }

        let user_id = user
            ._id
            .ok_or_else(|| GatehouseError::Database("user has no id".into()))?;
        let plan_id = plan
            ._id
            .ok_or_else(|| GatehouseError::Database("plan has no id".into()))?;

        let now = DateTime::now();
        let mut record = EntitlementDoc {
            _id: None,
            metadata: Metadata::new(),
            user_id,
            plan_id,
            start_date: start,
            end_date: end,
            available,
            viewed_properties: Vec::new(),
            access_level: AccessLevel::from_remaining(available),
            active: compute_active(start, end, available, now),
        };

        let result = self
            .entitlements
            .insert_one(&record)
            .session(&mut *session)
            .await?;
        record._id = result.inserted_id.as_object_id();

        if record.active {
            self.sync
                .set_current(session, &user_id, record._id.as_ref())
                .await?;
        }

        Ok(record)
    }

    /// Generic field patch.
    ///
    /// `active` is recomputed by the standard rule unless the patch
    /// supplies it explicitly; `access_level` is always re-derived from
    /// the resulting quota. The user pointer is re-evaluated against the
    /// record's new state.
    pub async fn update(&self, id: &ObjectId, patch: UpdatePatch) -> Result<EntitlementDoc> {
        let mut session = self.start_transaction().await?;
        match self.update_in_tx(&mut session, id, patch).await {
            Ok(record) => {
                self.commit(session).await?;
                Ok(record)
            }
            Err(e) => {
                self.abort(session).await;
                Err(e)
            }
        }
    }

    async fn update_in_tx(
        &self,
        session: &mut ClientSession,
        id: &ObjectId,
        patch: UpdatePatch,
    ) -> Result<EntitlementDoc> {
        let mut record = self.load_record(session, id).await?;

        if let Some(start) = patch.start_date {
            record.start_date = start;
        }
        if let Some(end) = patch.end_date {
            record.end_date = end;
        }
        if record.start_date > record.end_date {
            return Err(GatehouseError::Validation(
                "startDate must not be after endDate".into(),
            ));
        }
        if let Some(available) = patch.available {
            if available < 0 {
                return Err(GatehouseError::Validation(
                    "available must not be negative".into(),
                ));
            }
            record.available = available;
        }
        if let Some(viewed) = patch.viewed_properties {
            record.viewed_properties = viewed;
        }

        record.access_level = AccessLevel::from_remaining(record.available);
        record.active = match patch.active {
            Some(explicit) => explicit,
            None => record.compute_active(DateTime::now()),
        };

        self.save_record(session, &mut record).await?;
        self.sync.resync(session, &record).await?;
        Ok(record)
    }

    /// Move a record onto a new plan.
    ///
    /// The term restarts now for the new plan's duration; quota either
    /// carries over (`old + new slots`) or is replaced by the new plan's
    /// slot count.
    pub async fn upgrade(&self, id: &ObjectId, params: UpgradeParams) -> Result<EntitlementDoc> {
        let mut session = self.start_transaction().await?;
        match self.upgrade_in_tx(&mut session, id, params).await {
            Ok(record) => {
                self.commit(session).await?;
                info!(record = %id, plan = %record.plan_id, "Subscription upgraded");
                Ok(record)
            }
            Err(e) => {
                self.abort(session).await;
                Err(e)
            }
        }
    }

    async fn upgrade_in_tx(
        &self,
        session: &mut ClientSession,
        id: &ObjectId,
        params: UpgradeParams,
    ) -> Result<EntitlementDoc> {
        let mut record = self.load_record(session, id).await?;
        let new_plan = self.load_plan(session, &params.new_plan_id).await?;

        let now = DateTime::now();
        let available = upgraded_available(
            record.available,
            new_plan.accessible_slots,
            params.inherit_remaining,
        );
        let end = term_end(now, new_plan.effective_duration_days());

        record.plan_id = params.new_plan_id;
        record.available = available;
        record.start_date = now;
        record.end_date = end;
        record.access_level = AccessLevel::from_remaining(available);
        record.active = compute_active(now, end, available, now);

        self.save_record(session, &mut record).await?;
        self.sync.resync(session, &record).await?;
        Ok(record)
    }

    /// Terminate a record early, regardless of remaining quota.
    pub async fn end(&self, id: &ObjectId) -> Result<EntitlementDoc> {
        let mut session = self.start_transaction().await?;
        match self.end_in_tx(&mut session, id).await {
            Ok(record) => {
                self.commit(session).await?;
                info!(record = %id, "Subscription ended");
                Ok(record)
            }
            Err(e) => {
                self.abort(session).await;
                Err(e)
            }
        }
    }

    async fn end_in_tx(
        &self,
        session: &mut ClientSession,
        id: &ObjectId,
    ) -> Result<EntitlementDoc> {
        let mut record = self.load_record(session, id).await?;

        record.end_date = DateTime::now();
        record.active = false;

        self.save_record(session, &mut record).await?;
        self.sync.resync(session, &record).await?;
        Ok(record)
    }

    /// Delete a record, clearing the user pointer first when it
    /// references this record.
    pub async fn remove(&self, id: &ObjectId) -> Result<()> {
        let mut session = self.start_transaction().await?;
        match self.remove_in_tx(&mut session, id).await {
            Ok(()) => {
                self.commit(session).await?;
                info!(record = %id, "Subscription removed");
                Ok(())
            }
            Err(e) => {
                self.abort(session).await;
                Err(e)
            }
        }
    }

    async fn remove_in_tx(&self, session: &mut ClientSession, id: &ObjectId) -> Result<()> {
        let record = self.load_record(session, id).await?;

        let user = self
            .users
            .find_one(doc! { "_id": record.user_id })
            .session(&mut *session)
            .await?;
        if let Some(user) = user {
            if user.current_subscription == record._id {
                self.sync.set_current(session, &record.user_id, None).await?;
            }
        }

        self.entitlements
            .update_one(doc! { "_id": id }, soft_delete_update())
            .session(&mut *session)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(millis: i64) -> DateTime {
        DateTime::from_millis(millis)
    }

    #[test]
    fn test_term_end_adds_whole_days() {
        let start = dt(1_000);
        assert_eq!(term_end(start, 15).timestamp_millis(), 1_000 + 15 * MILLIS_PER_DAY);
        assert_eq!(term_end(start, 30).timestamp_millis(), 1_000 + 30 * MILLIS_PER_DAY);
    }

    #[test]
    fn test_upgrade_quota_math() {
        // remaining 3, new plan grants 5
        assert_eq!(upgraded_available(3, 5, true), 8);
        assert_eq!(upgraded_available(3, 5, false), 5);
        // exhausted records carry nothing extra over
        assert_eq!(upgraded_available(0, 5, true), 5);
        // a never-valid negative remainder is not inherited
        assert_eq!(upgraded_available(-2, 5, true), 5);
    }

    #[test]
    fn test_subscribe_defaults_follow_plan_duration() {
        // Gold: 19 slots over 15 days. A record created at T0 must end at
        // T0 + 15d with 19 views and be immediately active.
        let plan = PlanDoc {
            name: "Gold".into(),
            duration_days: 15,
            accessible_slots: 19,
            ..Default::default()
        };
        let t0 = dt(1_700_000_000_000);
        let end = term_end(t0, plan.effective_duration_days());

        assert_eq!(end.timestamp_millis() - t0.timestamp_millis(), 15 * MILLIS_PER_DAY);
        assert_eq!(AccessLevel::from_remaining(plan.accessible_slots), AccessLevel::Full);
        assert!(compute_active(t0, end, plan.accessible_slots, t0));
    }
}
