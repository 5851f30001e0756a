//! Expense line item schema

use bson::{doc, oid::ObjectId, DateTime, Document};
use chrono::{NaiveDate, NaiveTime};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

pub const EXPENSE_COLLECTION: &str = "expenses";

/// One expense logged against an expense field
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ExpenseDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub desc: String,

    pub category: String,

    #[serde(default = "default_qty")]
    pub qty: f64,

    /// Unit price
    pub price: f64,

    /// Calendar day of the expense, stored as midnight UTC
    pub date: DateTime,

    pub field_id: ObjectId,

    pub user_id: ObjectId,
}

fn default_qty() -> f64 {
    1.0
}

impl ExpenseDoc {
    pub fn new(
        desc: String,
        category: String,
        qty: f64,
        price: f64,
        day: NaiveDate,
        field_id: ObjectId,
        user_id: ObjectId,
    ) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            desc,
            category,
            qty,
            price,
            date: Self::date_from_day(day),
            field_id,
            user_id,
        }
    }

    /// Total cost of the line item
    pub fn amount(&self) -> f64 {
        self.qty * self.price
    }

    /// Store a calendar day as a BSON datetime at midnight UTC
    pub fn date_from_day(day: NaiveDate) -> DateTime {
        DateTime::from_chrono(day.and_time(NaiveTime::MIN).and_utc())
    }

    /// Calendar day of the expense
    pub fn day(&self) -> NaiveDate {
        self.date.to_chrono().date_naive()
    }
}

impl IntoIndexes for ExpenseDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "user_id": 1, "date": -1 },
                Some(
                    IndexOptions::builder()
                        .name("user_date_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "field_id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("field_id_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for ExpenseDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
