//! Organization schema

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

pub const ORGANIZATION_COLLECTION: &str = "organizations";

/// A group of users; the owner approves join requests
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct OrganizationDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub name: String,

    pub owner_id: ObjectId,

    /// Members, including the owner
    #[serde(default)]
    pub member_ids: Vec<ObjectId>,
}

impl OrganizationDoc {
    pub fn new(name: String, owner_id: ObjectId) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            name,
            owner_id,
            member_ids: vec![owner_id],
        }
    }

    pub fn is_member(&self, user_id: &ObjectId) -> bool {
        self.member_ids.contains(user_id)
    }
}

impl IntoIndexes for OrganizationDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "owner_id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("owner_id_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "member_ids": 1 },
                Some(
                    IndexOptions::builder()
                        .name("member_ids_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for OrganizationDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
