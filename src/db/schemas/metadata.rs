//! Bookkeeping sub-document shared by every collection

use bson::DateTime;
use serde::{Deserialize, Serialize};

/// Creation, update and soft-deletion timestamps
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Metadata {
    #[serde(default)]
    pub is_deleted: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime>,
}

impl Metadata {
    /// Metadata for a document created now
    pub fn new() -> Self {
        let now = DateTime::now();
        Self {
            is_deleted: false,
            deleted_at: None,
            updated_at: Some(now),
            created_at: Some(now),
        }
    }

    /// Creation time as RFC 3339, for response bodies
    pub fn created_at_rfc3339(&self) -> Option<String> {
        self.created_at
            .and_then(|t| t.try_to_rfc3339_string().ok())
    }
}
