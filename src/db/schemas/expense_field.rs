//! Expense field schema
//!
//! An expense field is a budget category owned by one user. `balance` starts
//! at `received_amount` and moves as expenses are logged or removed.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

pub const EXPENSE_FIELD_COLLECTION: &str = "expense_fields";

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ExpenseFieldDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub field_name: String,

    #[serde(default)]
    pub received_amount: f64,

    #[serde(default)]
    pub balance: f64,

    /// Owning user
    pub user_id: ObjectId,
}

impl ExpenseFieldDoc {
    pub fn new(field_name: String, received_amount: f64, user_id: ObjectId) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            field_name,
            received_amount,
            balance: received_amount,
            user_id,
        }
    }

    /// Amount spent so far against this field
    pub fn spent(&self) -> f64 {
        self.received_amount - self.balance
    }
}

impl IntoIndexes for ExpenseFieldDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "user_id": 1 },
            Some(
                IndexOptions::builder()
                    .name("user_id_index".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for ExpenseFieldDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
