//! Subscription entitlement core
//!
//! The four components of the view-entitlement engine:
//!
//! - **store**: reads over entitlement records, plus read-side reference
//!   expansion (plan/user summaries joined after the write path).
//! - **lifecycle**: subscribe/create/update/upgrade/end/remove, each
//!   wrapped in one multi-document transaction together with the user
//!   pointer write.
//! - **metering**: the atomic "consume one view" conditional update with
//!   duplicate-view protection.
//! - **sync**: the sole writer of `UserDoc.current_subscription`.

pub mod lifecycle;
pub mod metering;
pub mod store;
pub mod sync;

pub use lifecycle::{
    CreateParams, SubscribeParams, SubscriptionEngine, UpdatePatch, UpgradeParams,
};
pub use metering::ViewMeter;
pub use store::{EntitlementStore, EntitlementView, PlanSummary, UserSummary};
pub use sync::PointerSync;
