//! Plan catalog
//!
//! Read-only access to the subscription plan reference data. Plans are
//! written by an administrative seeding process outside this service.

use bson::{doc, oid::ObjectId};

use crate::db::schemas::{PlanDoc, PLAN_COLLECTION};
use crate::db::MongoClient;
use crate::types::{GatehouseError, Result};

/// Read-only plan lookups
#[derive(Clone)]
pub struct PlanCatalog {
    mongo: MongoClient,
}

impl PlanCatalog {
    pub fn new(mongo: MongoClient) -> Self {
        Self { mongo }
    }

    /// Look up a plan by id.
    pub async fn get(&self, plan_id: &ObjectId) -> Result<PlanDoc> {
        let collection = self.mongo.collection::<PlanDoc>(PLAN_COLLECTION).await?;
        collection
            .find_one(doc! { "_id": plan_id })
            .await?
            .ok_or(GatehouseError::NotFound("plan"))
    }

    /// List all plans.
    pub async fn list(&self) -> Result<Vec<PlanDoc>> {
        let collection = self.mongo.collection::<PlanDoc>(PLAN_COLLECTION).await?;
        collection.find_many(doc! {}).await
    }
}
