//! Organization routes
//!
//! - POST /organization - Create an organization owned by the caller
//! - GET  /organization - Organizations the caller belongs to

use bson::doc;
use hyper::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::schemas::{OrganizationDoc, ORGANIZATION_COLLECTION};
use crate::routes::context::{doc_id, required, ApiRequest};
use crate::routes::respond::{json_response, BoxBody};
use crate::types::Result;

#[derive(Debug, Deserialize)]
pub struct CreateOrganizationRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationView {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub member_ids: Vec<String>,
    pub is_owner: bool,
}

impl OrganizationView {
    pub fn for_viewer(org: &OrganizationDoc, viewer: &bson::oid::ObjectId) -> Result<Self> {
        Ok(Self {
            id: doc_id(org._id)?.to_hex(),
            name: org.name.clone(),
            owner_id: org.owner_id.to_hex(),
            member_ids: org.member_ids.iter().map(|id| id.to_hex()).collect(),
            is_owner: &org.owner_id == viewer,
        })
    }
}

#[derive(Debug, Serialize)]
struct OrganizationResponse {
    success: bool,
    organization: OrganizationView,
}

#[derive(Debug, Serialize)]
struct OrganizationListResponse {
    success: bool,
    organizations: Vec<OrganizationView>,
}

/// POST /organization
pub async fn create(api: &ApiRequest<'_>) -> Result<Response<BoxBody>> {
    let user = api.authenticate().await?;
    let user_id = doc_id(user._id)?;
    let body: CreateOrganizationRequest = api.json()?;
    let name = required(&body.name, "name")?;

    let mut org = OrganizationDoc::new(name, user_id);
    org._id = Some(
        api.db
            .collection::<OrganizationDoc>(ORGANIZATION_COLLECTION)
            .insert_one(org.clone())
            .await?,
    );

    info!("Created organization '{}' owned by {}", org.name, user.identifier);
    Ok(json_response(
        StatusCode::CREATED,
        &OrganizationResponse {
            success: true,
            organization: OrganizationView::for_viewer(&org, &user_id)?,
        },
    ))
}

/// GET /organization
pub async fn list(api: &ApiRequest<'_>) -> Result<Response<BoxBody>> {
    let user = api.authenticate().await?;
    let user_id = doc_id(user._id)?;

    let organizations = api
        .db
        .collection::<OrganizationDoc>(ORGANIZATION_COLLECTION)
        .find_many(doc! { "member_ids": user_id }, doc! { "name": 1 })
        .await?
        .iter()
        .map(|org| OrganizationView::for_viewer(org, &user_id))
        .collect::<Result<Vec<_>>>()?;

    Ok(json_response(
        StatusCode::OK,
        &OrganizationListResponse {
            success: true,
            organizations,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::oid::ObjectId;

    #[test]
    fn test_view_marks_owner() {
        let owner = ObjectId::new();
        let member = ObjectId::new();
        let mut org = OrganizationDoc::new("Household".into(), owner);
        org._id = Some(ObjectId::new());
        org.member_ids.push(member);

        let as_owner = OrganizationView::for_viewer(&org, &owner).unwrap();
        assert!(as_owner.is_owner);
        assert_eq!(as_owner.member_ids.len(), 2);

        let as_member = OrganizationView::for_viewer(&org, &member).unwrap();
        assert!(!as_member.is_owner);

        let json = serde_json::to_value(&as_member).unwrap();
        assert_eq!(json["ownerId"], owner.to_hex());
    }
}
