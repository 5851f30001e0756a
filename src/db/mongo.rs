//! MongoDB connector and collection wrapper
//!
//! [`MongoConnector`] is the physical connect primitive behind the
//! connection handle. [`MongoClient`] is the connection it produces, and
//! [`MongoCollection`] wraps typed collections with metadata stamping,
//! soft-delete filtering and a per-operation time bound.

use async_trait::async_trait;
use bson::{doc, oid::ObjectId, Bson, DateTime, Document};
use futures::{Stream, TryStreamExt};
use mongodb::{
    error::{Error as MongoError, ErrorKind},
    options::{ClientOptions, IndexOptions, ServerAddress, Tls},
    results::UpdateResult,
    Client, Collection, IndexModel,
};
use serde::{de::DeserializeOwned, Serialize};
use std::future::IntoFuture;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{AddressFamily, ConnectionConfig};
use crate::db::handle::Connector;
use crate::db::schemas::{
    ExpenseDoc, ExpenseFieldDoc, Metadata, OrganizationDoc, RequestDoc, UserDoc,
    EXPENSE_COLLECTION, EXPENSE_FIELD_COLLECTION, ORGANIZATION_COLLECTION, REQUEST_COLLECTION,
    USER_COLLECTION,
};
use crate::types::{ConnectionError, SpendbookError};

/// Default MongoDB port when the URI omits one
const DEFAULT_PORT: u16 = 27017;

/// Trait for schemas that provide index definitions
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// Trait for schemas with mutable metadata
pub trait MutMetadata {
    fn mut_metadata(&mut self) -> &mut Metadata;
}

/// Connects to MongoDB using the handle's [`ConnectionConfig`]
#[derive(Debug, Clone, Default)]
pub struct MongoConnector;

#[async_trait]
impl Connector for MongoConnector {
    type Connection = MongoClient;

    async fn connect(&self, config: &ConnectionConfig) -> Result<MongoClient, ConnectionError> {
        info!("Connecting to MongoDB database '{}'", config.db_name);

        let mut options = ClientOptions::parse(&config.uri)
            .await
            .map_err(classify_connect_error)?;
        options.app_name = Some("spendbook".to_string());
        options.max_pool_size = Some(config.pool_size_max);
        options.server_selection_timeout = Some(config.connect_timeout());
        options.connect_timeout = Some(config.connect_timeout());
        apply_address_family(&mut options, config.address_family).await?;

        let client = Client::with_options(options).map_err(classify_connect_error)?;

        // The driver connects lazily; ping to surface auth and network errors now
        client
            .database(&config.db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(classify_connect_error)?;

        let client = MongoClient {
            client,
            db_name: config.db_name.clone(),
            operation_timeout: config.operation_timeout(),
        };
        client.prepare_collections().await?;

        info!("Connected to MongoDB database '{}'", config.db_name);
        Ok(client)
    }
}

/// Rewrite TCP hosts to addresses of the preferred family.
///
/// With TLS enabled the host names are kept for certificate validation and
/// only checked for an address of the requested family.
async fn apply_address_family(
    options: &mut ClientOptions,
    family: AddressFamily,
) -> Result<(), ConnectionError> {
    if family == AddressFamily::Any {
        return Ok(());
    }

    let keep_names = matches!(options.tls, Some(Tls::Enabled(_)));
    let mut hosts = Vec::with_capacity(options.hosts.len());

    for address in &options.hosts {
        let (host, port) = match address {
            ServerAddress::Tcp { host, port } => (host.clone(), port.unwrap_or(DEFAULT_PORT)),
            other => {
                hosts.push(other.clone());
                continue;
            }
        };

        let resolved = tokio::net::lookup_host((host.as_str(), port))
            .await
            .map_err(|e| ConnectionError::Unavailable(format!("Failed to resolve {host}: {e}")))?
            .find(|addr| family.matches(addr.ip()))
            .ok_or_else(|| {
                ConnectionError::Unavailable(format!("{host} has no {family:?} address"))
            })?;

        debug!(%host, address = %resolved, "Resolved store host");

        hosts.push(if keep_names {
            ServerAddress::Tcp {
                host,
                port: Some(port),
            }
        } else {
            ServerAddress::Tcp {
                host: resolved.ip().to_string(),
                port: Some(resolved.port()),
            }
        });
    }

    options.hosts = hosts;
    Ok(())
}

/// Map a driver error raised while connecting into the connection taxonomy
pub fn classify_connect_error(err: MongoError) -> ConnectionError {
    match err.kind.as_ref() {
        ErrorKind::Authentication { message, .. } => ConnectionError::Refused(message.clone()),
        ErrorKind::InvalidArgument { message, .. } => ConnectionError::Refused(message.clone()),
        // 13 Unauthorized, 18 AuthenticationFailed
        ErrorKind::Command(cmd) if cmd.code == 13 || cmd.code == 18 => {
            ConnectionError::Refused(cmd.message.clone())
        }
        _ => ConnectionError::Unavailable(err.to_string()),
    }
}

/// Whether a driver error means the underlying connection is no longer usable
pub fn is_connection_broken(err: &MongoError) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Io(_)
            | ErrorKind::ServerSelection { .. }
            | ErrorKind::ConnectionPoolCleared { .. }
    )
}

/// A verified MongoDB connection
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
    operation_timeout: Duration,
}

impl MongoClient {
    /// Get a typed collection
    pub fn collection<T>(&self, name: &str) -> MongoCollection<T>
    where
        T: Serialize + DeserializeOwned + Unpin + Send + Sync,
    {
        MongoCollection {
            inner: self.client.database(&self.db_name).collection::<T>(name),
            operation_timeout: self.operation_timeout,
        }
    }

    /// Apply schema-defined indexes for every collection
    async fn prepare_collections(&self) -> Result<(), ConnectionError> {
        self.apply_indexes::<UserDoc>(USER_COLLECTION).await?;
        self.apply_indexes::<ExpenseFieldDoc>(EXPENSE_FIELD_COLLECTION).await?;
        self.apply_indexes::<ExpenseDoc>(EXPENSE_COLLECTION).await?;
        self.apply_indexes::<OrganizationDoc>(ORGANIZATION_COLLECTION).await?;
        self.apply_indexes::<RequestDoc>(REQUEST_COLLECTION).await?;
        Ok(())
    }

    async fn apply_indexes<T>(&self, name: &str) -> Result<(), ConnectionError>
    where
        T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes,
    {
        let indices: Vec<IndexModel> = T::into_indices()
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        if indices.is_empty() {
            return Ok(());
        }

        self.collection::<T>(name)
            .inner
            .create_indexes(indices)
            .await
            .map_err(classify_connect_error)?;

        debug!("Indexes ready for '{}'", name);
        Ok(())
    }
}

/// Typed MongoDB collection
#[derive(Debug, Clone)]
pub struct MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync,
{
    inner: Collection<T>,
    operation_timeout: Duration,
}

impl<T> MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync,
{
    /// Run one driver operation under the configured time bound
    async fn bounded<R>(
        &self,
        what: &str,
        op: impl IntoFuture<Output = mongodb::error::Result<R>>,
    ) -> Result<R, SpendbookError> {
        match tokio::time::timeout(self.operation_timeout, op.into_future()).await {
            Ok(Ok(r)) => Ok(r),
            Ok(Err(e)) => Err(map_operation_error(what, e)),
            Err(_) => Err(SpendbookError::Connection(ConnectionError::Timeout {
                after_ms: self.operation_timeout.as_millis() as u64,
            })),
        }
    }

    /// Find one live document by filter
    pub async fn find_one(&self, filter: Document) -> Result<Option<T>, SpendbookError> {
        self.bounded("Find", self.inner.find_one(live(filter))).await
    }

    /// Find one live document by id
    pub async fn find_by_id(&self, id: ObjectId) -> Result<Option<T>, SpendbookError> {
        self.find_one(doc! { "_id": id }).await
    }

    /// Find live documents by filter, ordered by `sort`.
    ///
    /// The cursor is drained under the same time bound as the query; a
    /// failure part way through fails the whole read.
    pub async fn find_many(&self, filter: Document, sort: Document) -> Result<Vec<T>, SpendbookError> {
        let find = self.inner.find(live(filter)).sort(sort);
        self.bounded("Find", async move { drain(find.await?).await })
            .await
    }

    /// Update one live document, stamping `metadata.updated_at`
    pub async fn update_one(
        &self,
        filter: Document,
        update: Document,
    ) -> Result<UpdateResult, SpendbookError> {
        self.bounded("Update", self.inner.update_one(live(filter), touched(update)))
            .await
    }

    /// Update every live document matching the filter
    pub async fn update_many(
        &self,
        filter: Document,
        update: Document,
    ) -> Result<UpdateResult, SpendbookError> {
        self.bounded("Update", self.inner.update_many(live(filter), touched(update)))
            .await
    }

    /// Soft delete one document
    pub async fn soft_delete(&self, filter: Document) -> Result<UpdateResult, SpendbookError> {
        self.update_one(filter, deletion()).await
    }

    /// Soft delete every document matching the filter
    pub async fn soft_delete_many(&self, filter: Document) -> Result<UpdateResult, SpendbookError> {
        self.update_many(filter, deletion()).await
    }
}

impl<T> MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync + MutMetadata,
{
    /// Insert a document, setting metadata timestamps
    pub async fn insert_one(&self, mut item: T) -> Result<ObjectId, SpendbookError> {
        let now = DateTime::now();
        let metadata = item.mut_metadata();
        metadata.is_deleted = false;
        metadata.created_at = Some(now);
        metadata.updated_at = Some(now);

        let result = self.bounded("Insert", self.inner.insert_one(item)).await?;

        result
            .inserted_id
            .as_object_id()
            .ok_or_else(|| SpendbookError::Database("Failed to get inserted ID".into()))
    }
}

/// Collect every document from a cursor, stopping at the first error
async fn drain<T, S>(cursor: S) -> mongodb::error::Result<Vec<T>>
where
    S: Stream<Item = mongodb::error::Result<T>>,
{
    cursor.try_collect().await
}

/// Exclude soft-deleted documents
fn live(mut filter: Document) -> Document {
    filter.insert("metadata.is_deleted", doc! { "$ne": true });
    filter
}

/// Add `metadata.updated_at` to the `$set` stage of an update
fn touched(mut update: Document) -> Document {
    let set = update
        .entry("$set".to_string())
        .or_insert_with(|| Bson::Document(Document::new()));
    if let Bson::Document(set) = set {
        set.insert("metadata.updated_at", DateTime::now());
    }
    update
}

fn deletion() -> Document {
    doc! {
        "$set": {
            "metadata.is_deleted": true,
            "metadata.deleted_at": DateTime::now(),
        }
    }
}

fn map_operation_error(what: &str, err: MongoError) -> SpendbookError {
    if is_connection_broken(&err) {
        return SpendbookError::Connection(ConnectionError::Unavailable(format!(
            "{what} failed: {err}"
        )));
    }

    let message = err.to_string();
    // E11000 duplicate key
    if message.contains("E11000") || message.contains("duplicate key") {
        return SpendbookError::Conflict("Document already exists".into());
    }

    SpendbookError::Database(format!("{what} failed: {message}"))
}
