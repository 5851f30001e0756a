//! Database schemas for Spendbook
//!
//! MongoDB document structures for users, expense fields, expenses,
//! organizations and join requests.

mod expense;
mod expense_field;
mod metadata;
mod organization;
mod request;
mod user;

pub use expense::{ExpenseDoc, EXPENSE_COLLECTION};
pub use expense_field::{ExpenseFieldDoc, EXPENSE_FIELD_COLLECTION};
pub use metadata::Metadata;
pub use organization::{OrganizationDoc, ORGANIZATION_COLLECTION};
pub use request::{RequestDoc, RequestStatus, REQUEST_COLLECTION};
pub use user::{UserDoc, USER_COLLECTION};
