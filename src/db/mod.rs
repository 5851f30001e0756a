//! Database layer for Spendbook
//!
//! The [`ConnectionHandle`] guards the single lazily established MongoDB
//! connection; schemas describe the documents stored through it.

pub mod handle;
pub mod mongo;
pub mod schemas;

pub use handle::{ConnectionHandle, Connector, HandleState};
pub use mongo::{MongoClient, MongoCollection, MongoConnector};
pub use schemas::{ExpenseDoc, ExpenseFieldDoc, Metadata, OrganizationDoc, RequestDoc, UserDoc};

/// The handle type used by the running service
pub type StoreHandle = ConnectionHandle<MongoConnector>;
