//! Per-request context handed to resource handlers
//!
//! By the time a handler runs the store connection has been acquired and the
//! body has been read, so handlers only validate input and talk to the store.

use bson::{doc, oid::ObjectId};
use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::{Body, Incoming};
use hyper::header::AUTHORIZATION;
use hyper::{HeaderMap, Request};
use serde::de::DeserializeOwned;

use crate::auth::extract_token_from_header;
use crate::db::schemas::{UserDoc, USER_COLLECTION};
use crate::db::MongoClient;
use crate::server::AppState;
use crate::types::{Result, SpendbookError};

/// Largest accepted request body
pub const MAX_BODY_BYTES: usize = 6 * 1024 * 1024;

pub struct ApiRequest<'a> {
    pub state: &'a AppState,
    pub db: &'a MongoClient,
    headers: HeaderMap,
    query: Option<String>,
    body: Bytes,
}

impl<'a> ApiRequest<'a> {
    /// Consume the hyper request, reading at most [`MAX_BODY_BYTES`]
    pub async fn read(
        state: &'a AppState,
        db: &'a MongoClient,
        req: Request<Incoming>,
    ) -> Result<ApiRequest<'a>> {
        let (parts, body) = req.into_parts();

        let body = read_limited(body, MAX_BODY_BYTES).await?;
        Ok(Self::from_parts(state, db, parts.headers, parts.uri.query(), body))
    }

    pub fn from_parts(
        state: &'a AppState,
        db: &'a MongoClient,
        headers: HeaderMap,
        query: Option<&str>,
        body: Bytes,
    ) -> Self {
        Self {
            state,
            db,
            headers,
            query: query.map(str::to_owned),
            body,
        }
    }

    /// Deserialize the JSON body
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        parse_json(&self.body)
    }

    /// Deserialize the query string
    pub fn query<T: DeserializeOwned>(&self) -> Result<T> {
        parse_query(self.query.as_deref())
    }

    /// Resolve the bearer token to a live user.
    ///
    /// Tokens for deactivated users, or issued before the user's current
    /// `token_version`, are rejected.
    pub async fn authenticate(&self) -> Result<UserDoc> {
        let header = self
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        let token = extract_token_from_header(header)
            .ok_or_else(|| SpendbookError::Unauthorized("No token provided".into()))?;

        let claims = self.state.jwt.verify_token(token).into_claims()?;
        let user_id = claims.user_id()?;

        let user = self
            .db
            .collection::<UserDoc>(USER_COLLECTION)
            .find_one(doc! { "_id": user_id, "is_active": true })
            .await?
            .ok_or_else(|| SpendbookError::Unauthorized("User no longer exists".into()))?;

        if user.token_version != claims.version {
            return Err(SpendbookError::Unauthorized("Token has been revoked".into()));
        }

        Ok(user)
    }
}

/// Collect a body, failing with 413 once it grows past `limit` bytes
pub async fn read_limited<B>(body: B, limit: usize) -> Result<Bytes>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => Err(
            SpendbookError::PayloadTooLarge(format!("Request body exceeds {limit} bytes")),
        ),
        Err(e) => Err(SpendbookError::Http(format!("Failed to read body: {}", e))),
    }
}

pub fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    if body.is_empty() {
        return Err(SpendbookError::BadRequest("Request body is required".into()));
    }
    serde_json::from_slice(body)
        .map_err(|e| SpendbookError::BadRequest(format!("Invalid JSON: {}", e)))
}

pub fn parse_query<T: DeserializeOwned>(query: Option<&str>) -> Result<T> {
    serde_urlencoded::from_str(query.unwrap_or(""))
        .map_err(|e| SpendbookError::BadRequest(format!("Invalid query: {}", e)))
}

/// Parse a path or body id, naming the resource in the error
pub fn parse_id(raw: &str, what: &str) -> Result<ObjectId> {
    ObjectId::parse_str(raw).map_err(|_| SpendbookError::BadRequest(format!("Invalid {what} id")))
}

/// Id of a document loaded from the store
pub fn doc_id(id: Option<ObjectId>) -> Result<ObjectId> {
    id.ok_or_else(|| SpendbookError::Internal("Stored document has no _id".into()))
}

/// Trim a required text input, rejecting blanks
pub fn required(value: &str, name: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(SpendbookError::BadRequest(format!("{name} is required")));
    }
    Ok(value.to_string())
}
