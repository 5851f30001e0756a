//! HTTP routes for Spendbook
//!
//! Resource routes resolve to an [`Endpoint`] before any I/O, then pass
//! through the store readiness step: the connection handle is acquired, and
//! a failure there answers `503` without reaching the handler.

pub mod context;
pub mod expense;
pub mod field;
pub mod health;
pub mod organization;
pub mod request;
pub mod respond;
pub mod user;

use hyper::body::Incoming;
use hyper::{Method, Request, Response};
use std::sync::Arc;
use tracing::warn;

use crate::db::schemas::RequestStatus;
use crate::server::AppState;
use crate::types::{Result, SpendbookError};

pub use context::ApiRequest;
pub use health::{health_check, ping};
pub use respond::BoxBody;

/// A resolved resource route
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Signup,
    Signin,
    Me,
    CreateField,
    ListFields,
    UpdateField(String),
    DeleteField(String),
    CreateExpense,
    ListExpenses,
    DeleteExpense(String),
    CreateOrganization,
    ListOrganizations,
    CreateRequest,
    ListRequests,
    DecideRequest(String, RequestStatus),
}

impl Endpoint {
    /// Match a method and path against the resource routes
    pub fn resolve(method: &Method, path: &str) -> Option<Self> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        let endpoint = match (method, segments.as_slice()) {
            (&Method::POST, ["user", "signup"]) => Self::Signup,
            (&Method::POST, ["user", "signin"]) => Self::Signin,
            (&Method::GET, ["user", "me"]) => Self::Me,

            (&Method::POST, ["field", "createField"]) => Self::CreateField,
            (&Method::GET, ["field"]) => Self::ListFields,
            (&Method::PATCH, ["field", id]) => Self::UpdateField(id.to_string()),
            (&Method::DELETE, ["field", id]) => Self::DeleteField(id.to_string()),

            (&Method::POST, ["expenses"]) => Self::CreateExpense,
            (&Method::GET, ["expenses"]) => Self::ListExpenses,
            (&Method::DELETE, ["expenses", id]) => Self::DeleteExpense(id.to_string()),

            (&Method::POST, ["organization"]) => Self::CreateOrganization,
            (&Method::GET, ["organization"]) => Self::ListOrganizations,

            (&Method::POST, ["request"]) => Self::CreateRequest,
            (&Method::GET, ["request"]) => Self::ListRequests,
            (&Method::POST, ["request", id, "approve"]) => {
                Self::DecideRequest(id.to_string(), RequestStatus::Approved)
            }
            (&Method::POST, ["request", id, "reject"]) => {
                Self::DecideRequest(id.to_string(), RequestStatus::Rejected)
            }

            _ => return None,
        };

        Some(endpoint)
    }
}

/// Serve a resource route.
///
/// A failed `acquire()` becomes `503 dependency unavailable`. When a handler
/// reports that the connection broke mid-use, the handle is invalidated so the
/// next request reconnects.
pub async fn handle_api_request(
    state: Arc<AppState>,
    endpoint: Endpoint,
    req: Request<Incoming>,
) -> Response<BoxBody> {
    let db = match state.db.acquire().await {
        Ok(db) => db,
        Err(e) => {
            warn!(error = %e, ?endpoint, "Store unavailable, rejecting request");
            return respond::error_response(&SpendbookError::Connection(e));
        }
    };

    let result = match ApiRequest::read(&state, &db, req).await {
        Ok(api) => dispatch(&api, endpoint).await,
        Err(e) => Err(e),
    };

    if let Err(SpendbookError::Connection(e)) = &result {
        warn!(error = %e, "Store connection broke during request");
        state.db.invalidate_connection(&db);
    }

    respond::from_result(result)
}

async fn dispatch(api: &ApiRequest<'_>, endpoint: Endpoint) -> Result<Response<BoxBody>> {
    match endpoint {
        Endpoint::Signup => user::signup(api).await,
        Endpoint::Signin => user::signin(api).await,
        Endpoint::Me => user::me(api).await,
        Endpoint::CreateField => field::create(api).await,
        Endpoint::ListFields => field::list(api).await,
        Endpoint::UpdateField(id) => field::update(api, &id).await,
        Endpoint::DeleteField(id) => field::delete(api, &id).await,
        Endpoint::CreateExpense => expense::create(api).await,
        Endpoint::ListExpenses => expense::list(api).await,
        Endpoint::DeleteExpense(id) => expense::delete(api, &id).await,
        Endpoint::CreateOrganization => organization::create(api).await,
        Endpoint::ListOrganizations => organization::list(api).await,
        Endpoint::CreateRequest => request::create(api).await,
        Endpoint::ListRequests => request::list(api).await,
        Endpoint::DecideRequest(id, status) => request::decide(api, &id, status).await,
    }
}
