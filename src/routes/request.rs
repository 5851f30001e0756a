//! Join request routes
//!
//! - POST /request             - Ask to join an organization
//! - GET  /request             - Pending requests for organizations the caller owns
//! - POST /request/:id/approve - Owner accepts; requester becomes a member
//! - POST /request/:id/reject  - Owner declines

use bson::{doc, oid::ObjectId, Document};
use hyper::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::schemas::{
    OrganizationDoc, RequestDoc, RequestStatus, ORGANIZATION_COLLECTION, REQUEST_COLLECTION,
};
use crate::routes::context::{doc_id, parse_id, ApiRequest};
use crate::routes::respond::{json_response, BoxBody};
use crate::types::{Result, SpendbookError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJoinRequest {
    pub organization_id: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestView {
    pub id: String,
    pub organization_id: String,
    pub requester_id: String,
    pub status: RequestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl RequestView {
    pub fn from_doc(request: &RequestDoc) -> Result<Self> {
        Ok(Self {
            id: doc_id(request._id)?.to_hex(),
            organization_id: request.organization_id.to_hex(),
            requester_id: request.requester_id.to_hex(),
            status: request.status,
            message: request.message.clone(),
            created_at: request.metadata.created_at_rfc3339(),
        })
    }
}

#[derive(Debug, Serialize)]
struct RequestResponse {
    success: bool,
    request: RequestView,
}

#[derive(Debug, Serialize)]
struct RequestListResponse {
    success: bool,
    requests: Vec<RequestView>,
}

/// Blank messages are dropped rather than stored
fn clean_message(message: Option<String>) -> Option<String> {
    message
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
}

/// Filter and update that move a request out of pending.
///
/// The filter only matches a pending request, so of two concurrent
/// decisions at most one is applied.
fn decision_update(request_id: ObjectId, decision: RequestStatus) -> (Document, Document) {
    (
        doc! { "_id": request_id, "status": RequestStatus::Pending.as_str() },
        doc! { "$set": { "status": decision.as_str() } },
    )
}

/// Organization update adding an approved requester; a repeat is a no-op
fn membership_update(requester_id: ObjectId) -> Document {
    doc! { "$addToSet": { "member_ids": requester_id } }
}

/// POST /request
pub async fn create(api: &ApiRequest<'_>) -> Result<Response<BoxBody>> {
    let user = api.authenticate().await?;
    let user_id = doc_id(user._id)?;
    let body: CreateJoinRequest = api.json()?;
    let org_id = parse_id(&body.organization_id, "organization")?;

    let org = api
        .db
        .collection::<OrganizationDoc>(ORGANIZATION_COLLECTION)
        .find_by_id(org_id)
        .await?
        .ok_or_else(|| SpendbookError::NotFound("Organization does not exist".into()))?;

    if org.is_member(&user_id) {
        return Err(SpendbookError::Conflict(
            "Already a member of this organization".into(),
        ));
    }

    let requests = api.db.collection::<RequestDoc>(REQUEST_COLLECTION);
    let pending = requests
        .find_one(doc! {
            "organization_id": org_id,
            "requester_id": user_id,
            "status": RequestStatus::Pending.as_str(),
        })
        .await?;
    if pending.is_some() {
        return Err(SpendbookError::Conflict(
            "A request to join this organization is already pending".into(),
        ));
    }

    let mut request = RequestDoc::new(org_id, user_id, clean_message(body.message));
    request._id = Some(requests.insert_one(request.clone()).await?);

    info!("{} asked to join '{}'", user.identifier, org.name);
    Ok(json_response(
        StatusCode::CREATED,
        &RequestResponse {
            success: true,
            request: RequestView::from_doc(&request)?,
        },
    ))
}

/// GET /request
pub async fn list(api: &ApiRequest<'_>) -> Result<Response<BoxBody>> {
    let user = api.authenticate().await?;
    let user_id = doc_id(user._id)?;

    let owned: Vec<ObjectId> = api
        .db
        .collection::<OrganizationDoc>(ORGANIZATION_COLLECTION)
        .find_many(doc! { "owner_id": user_id }, doc! { "_id": 1 })
        .await?
        .into_iter()
        .filter_map(|org| org._id)
        .collect();

    let requests = if owned.is_empty() {
        Vec::new()
    } else {
        api.db
            .collection::<RequestDoc>(REQUEST_COLLECTION)
            .find_many(
                doc! {
                    "organization_id": { "$in": owned },
                    "status": RequestStatus::Pending.as_str(),
                },
                doc! { "metadata.created_at": 1 },
            )
            .await?
            .iter()
            .map(RequestView::from_doc)
            .collect::<Result<Vec<_>>>()?
    };

    Ok(json_response(
        StatusCode::OK,
        &RequestListResponse {
            success: true,
            requests,
        },
    ))
}

/// POST /request/:id/approve and /request/:id/reject
pub async fn decide(
    api: &ApiRequest<'_>,
    id: &str,
    decision: RequestStatus,
) -> Result<Response<BoxBody>> {
    if decision == RequestStatus::Pending {
        return Err(SpendbookError::BadRequest(
            "A request can only be approved or rejected".into(),
        ));
    }

    let user = api.authenticate().await?;
    let user_id = doc_id(user._id)?;
    let request_id = parse_id(id, "request")?;

    let requests = api.db.collection::<RequestDoc>(REQUEST_COLLECTION);
    let mut request = requests
        .find_by_id(request_id)
        .await?
        .ok_or_else(|| SpendbookError::NotFound("Request does not exist".into()))?;

    let organizations = api.db.collection::<OrganizationDoc>(ORGANIZATION_COLLECTION);
    let org = organizations
        .find_by_id(request.organization_id)
        .await?
        .ok_or_else(|| SpendbookError::NotFound("Organization does not exist".into()))?;

    if org.owner_id != user_id {
        return Err(SpendbookError::Forbidden(
            "Only the organization owner can decide requests".into(),
        ));
    }

    if request.status != RequestStatus::Pending {
        return Err(SpendbookError::Conflict(format!(
            "Request is already {}",
            request.status
        )));
    }

    let (filter, update) = decision_update(request_id, decision);
    let result = requests.update_one(filter, update).await?;
    if result.modified_count == 0 {
        return Err(SpendbookError::Conflict(
            "Request was decided concurrently".into(),
        ));
    }
    request.status = decision;

    if decision == RequestStatus::Approved {
        organizations
            .update_one(
                doc! { "_id": request.organization_id },
                membership_update(request.requester_id),
            )
            .await?;
    }

    info!("Request {} {} for '{}'", request_id, decision, org.name);
    Ok(json_response(
        StatusCode::OK,
        &RequestResponse {
            success: true,
            request: RequestView::from_doc(&request)?,
        },
    ))
}
