use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, DateTime as BsonDateTime},
    options::{FindOptions, UpdateOptions},
    Client as MongoClient, Collection, Database,
};
use serde::{Deserialize, Serialize};

use super::role_store::{RoleStore, RoleStoreError};
use crate::models::RoleRecord;

pub const ROLE_COLLECTION: &str = "userRoles";

/// Document shape of `userRoles/{uid}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleDocument {
    #[serde(rename = "_id")]
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_utc: Option<BsonDateTime>,
}

impl From<RoleDocument> for RoleRecord {
    fn from(document: RoleDocument) -> Self {
        Self {
            uid: document.uid,
            role: document.role,
            updated_utc: document.updated_utc.map(|dt| dt.to_chrono()),
        }
    }
}

#[derive(Clone)]
pub struct MongoRoleStore {
    client: MongoClient,
    db: Database,
}

impl MongoRoleStore {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, RoleStoreError> {
        tracing::info!(database = %database, "Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!("Failed to connect to MongoDB: {}", e);
            classify(e)
        })?;
        let db = client.database(database);
        tracing::info!(database = %database, "Successfully connected to MongoDB database");
        Ok(Self { client, db })
    }

    pub fn roles(&self) -> Collection<RoleDocument> {
        self.db.collection(ROLE_COLLECTION)
    }
}

fn classify(err: mongodb::error::Error) -> RoleStoreError {
    use mongodb::error::ErrorKind;

    match *err.kind {
        ErrorKind::Authentication { .. } => RoleStoreError::PermissionDenied(err.to_string()),
        ErrorKind::Command(ref command) if command.code == 13 => {
            RoleStoreError::PermissionDenied(command.message.clone())
        }
        _ => RoleStoreError::Database(err.to_string()),
    }
}

#[async_trait]
impl RoleStore for MongoRoleStore {
    async fn find_role(&self, uid: &str) -> Result<Option<RoleRecord>, RoleStoreError> {
        let document = self
            .roles()
            .find_one(doc! { "_id": uid }, None)
            .await
            .map_err(|e| {
                tracing::error!(uid = %uid, "Failed to read role record: {}", e);
                classify(e)
            })?;
        Ok(document.map(RoleRecord::from))
    }

    async fn set_role(&self, uid: &str, role: &str) -> Result<(), RoleStoreError> {
        let update = doc! {
            "$set": {
                "role": role,
                "updated_utc": BsonDateTime::now(),
            }
        };
        let options = UpdateOptions::builder().upsert(true).build();

        self.roles()
            .update_one(doc! { "_id": uid }, update, options)
            .await
            .map_err(|e| {
                tracing::error!(uid = %uid, "Failed to write role record: {}", e);
                classify(e)
            })?;
        Ok(())
    }

    async fn list_roles(&self) -> Result<Vec<RoleRecord>, RoleStoreError> {
        let options = FindOptions::builder().sort(doc! { "_id": 1 }).build();

        let cursor = self.roles().find(doc! {}, options).await.map_err(|e| {
            tracing::error!("Failed to list role records: {}", e);
            classify(e)
        })?;

        let documents: Vec<RoleDocument> = cursor.try_collect().await.map_err(|e| {
            tracing::error!("Failed to collect role records: {}", e);
            classify(e)
        })?;

        Ok(documents.into_iter().map(RoleRecord::from).collect())
    }

    async fn health_check(&self) -> Result<(), RoleStoreError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                tracing::error!("MongoDB health check failed: {}", e);
                classify(e)
            })?;
        Ok(())
    }

    fn store_name(&self) -> &'static str {
        "mongodb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_maps_to_record() {
        let now = BsonDateTime::now();
        let record = RoleRecord::from(RoleDocument {
            uid: "u1".to_string(),
            role: Some("admin".to_string()),
            updated_utc: Some(now),
        });

        assert_eq!(record.uid, "u1");
        assert_eq!(record.role.as_deref(), Some("admin"));
        assert_eq!(record.updated_utc, Some(now.to_chrono()));
    }

    #[test]
    fn document_without_role_field_deserializes() {
        let document: RoleDocument =
            mongodb::bson::from_document(doc! { "_id": "u2" }).unwrap();
        assert_eq!(document.uid, "u2");
        assert!(document.role.is_none());
    }

    /// Requires a reachable MongoDB at `TEST_MONGODB_URI`.
    #[tokio::test]
    #[ignore = "Requires MongoDB (set TEST_MONGODB_URI)"]
    async fn round_trips_against_mongodb() {
        let uri = std::env::var("TEST_MONGODB_URI")
            .unwrap_or_else(|_| "mongodb://localhost:27017".to_string());
        let database = format!("dashboard_test_{}", uuid::Uuid::new_v4().simple());
        let store = MongoRoleStore::connect(&uri, &database).await.unwrap();

        store.health_check().await.unwrap();
        assert!(store.find_role("u1").await.unwrap().is_none());

        store.set_role("u1", "admin").await.unwrap();
        store.set_role("u1", "user").await.unwrap();
        let record = store.find_role("u1").await.unwrap().unwrap();
        assert_eq!(record.role.as_deref(), Some("user"));
        assert_eq!(store.list_roles().await.unwrap().len(), 1);

        store.db.drop(None).await.unwrap();
    }
}
