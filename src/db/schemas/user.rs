//! User document schema
//!
//! Stores login credentials. The email address is the unique identifier.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for users
pub const USER_COLLECTION: &str = "users";

/// User document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct UserDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    /// Display name
    pub name: String,

    /// Login identifier (lowercased email)
    pub identifier: String,

    /// Argon2 password hash
    pub password_hash: String,

    /// Token version for invalidation (increment to invalidate all tokens)
    #[serde(default)]
    pub token_version: u32,

    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl UserDoc {
    /// Create a new user document
    pub fn new(name: String, identifier: String, password_hash: String) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            name,
            identifier,
            password_hash,
            token_version: 1,
            is_active: true,
        }
    }
}

impl IntoIndexes for UserDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "identifier": 1 },
            Some(
                IndexOptions::builder()
                    .unique(true)
                    .name("identifier_unique".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for UserDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
