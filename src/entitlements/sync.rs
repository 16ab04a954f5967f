//! User pointer synchronizer
//!
//! The ONLY writer of `UserDoc.current_subscription`. Every lifecycle
//! operation that can change whether a record is active calls into here,
//! inside its own transaction, so the pointer and the record move
//! together or not at all. No retry logic lives here; atomicity comes
//! from the enclosing transaction.

use bson::{doc, oid::ObjectId, Bson, DateTime, Document};
use mongodb::{ClientSession, Collection};
use tracing::debug;

use crate::db::schemas::{EntitlementDoc, UserDoc, USER_COLLECTION};
use crate::db::MongoClient;
use crate::types::Result;

/// Pointer decision for a record's current state.
///
/// `Some(value)` means write `value` to the pointer; `None` means leave
/// it alone. Active records always claim the pointer; inactive records
/// release it only when it references them, so another record's claim is
/// never disturbed.
pub fn pointer_action(
    active: bool,
    current: Option<ObjectId>,
    record_id: ObjectId,
) -> Option<Option<ObjectId>> {
    if active {
        Some(Some(record_id))
    } else if current == Some(record_id) {
        Some(None)
    } else {
        None
    }
}

/// Update document for a pointer write. `None` stores an explicit null.
pub fn pointer_update(record_id: Option<&ObjectId>) -> Document {
    let value = match record_id {
        Some(id) => Bson::ObjectId(*id),
        None => Bson::Null,
    };
    doc! {
        "$set": {
            "current_subscription": value,
            "metadata.updated_at": DateTime::now(),
        }
    }
}

/// Keeps `UserDoc.current_subscription` consistent with entitlement state
#[derive(Clone)]
pub struct PointerSync {
    users: Collection<UserDoc>,
}

impl PointerSync {
    pub fn new(mongo: &MongoClient) -> Self {
        Self {
            users: mongo.raw_collection::<UserDoc>(USER_COLLECTION),
        }
    }

    /// Unconditionally overwrite the user's current-subscription pointer.
    ///
    /// `None` clears it. Must be called inside the transaction of the
    /// lifecycle operation that triggered the change.
    pub async fn set_current(
        &self,
        session: &mut ClientSession,
        user_id: &ObjectId,
        record_id: Option<&ObjectId>,
    ) -> Result<()> {
        debug!(user = %user_id, pointer = ?record_id, "Synchronizing current subscription pointer");

        self.users
            .update_one(doc! { "_id": user_id }, pointer_update(record_id))
            .session(&mut *session)
            .await?;
        Ok(())
    }

    /// Re-evaluate the pointer against a record's current state, applying
    /// the [`pointer_action`] rule.
    pub async fn resync(
        &self,
        session: &mut ClientSession,
        record: &EntitlementDoc,
    ) -> Result<()> {
        let record_id = match record._id {
            Some(id) => id,
            None => return Ok(()),
        };

        // The current pointer only matters for the release decision.
        let current = if record.active {
            None
        } else {
            self.users
                .find_one(doc! { "_id": record.user_id })
                .session(&mut *session)
                .await?
                .and_then(|user| user.current_subscription)
        };

        match pointer_action(record.active, current, record_id) {
            Some(value) => {
                self.set_current(session, &record.user_id, value.as_ref())
                    .await
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_action_active_claims() {
        let record = ObjectId::new();
        let other = ObjectId::new();

        assert_eq!(pointer_action(true, None, record), Some(Some(record)));
        // an active record claims the pointer even from another record
        assert_eq!(pointer_action(true, Some(other), record), Some(Some(record)));
    }

    #[test]
    fn test_pointer_action_inactive_releases_own_claim_only() {
        let record = ObjectId::new();
        let other = ObjectId::new();

        // pointing here: clear
        assert_eq!(pointer_action(false, Some(record), record), Some(None));
        // pointing at another record: leave it alone
        assert_eq!(pointer_action(false, Some(other), record), None);
        // nothing to release
        assert_eq!(pointer_action(false, None, record), None);
    }

    #[test]
    fn test_pointer_update_shape() {
        let id = ObjectId::new();

        let set = pointer_update(Some(&id));
        let set = set.get_document("$set").unwrap();
        assert_eq!(set.get_object_id("current_subscription").unwrap(), id);
        assert!(set.get_datetime("metadata.updated_at").is_ok());

        // clearing stores an explicit null, not a field removal
        let clear = pointer_update(None);
        let clear = clear.get_document("$set").unwrap();
        assert_eq!(clear.get("current_subscription"), Some(&Bson::Null));
    }
}
