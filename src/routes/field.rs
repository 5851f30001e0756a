//! Expense field routes
//!
//! - POST   /field/createField - Create a budget category
//! - GET    /field             - List the caller's categories
//! - PATCH  /field/:id         - Rename or change the received amount
//! - DELETE /field/:id         - Delete a category and its expenses

use bson::{doc, oid::ObjectId, Document};
use hyper::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::schemas::{
    ExpenseDoc, ExpenseFieldDoc, EXPENSE_COLLECTION, EXPENSE_FIELD_COLLECTION,
};
use crate::routes::context::{doc_id, parse_id, required, ApiRequest};
use crate::routes::respond::{json_response, BoxBody, MessageResponse};
use crate::types::{Result, SpendbookError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFieldRequest {
    pub field_name: String,
    #[serde(default)]
    pub received_amount: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFieldRequest {
    #[serde(default)]
    pub field_name: Option<String>,
    #[serde(default)]
    pub received_amount: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldView {
    pub id: String,
    pub field_name: String,
    pub received_amount: f64,
    pub balance: f64,
    pub spent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl FieldView {
    pub fn from_doc(field: &ExpenseFieldDoc) -> Result<Self> {
        Ok(Self {
            id: doc_id(field._id)?.to_hex(),
            field_name: field.field_name.clone(),
            received_amount: field.received_amount,
            balance: field.balance,
            spent: field.spent(),
            created_at: field.metadata.created_at_rfc3339(),
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FieldResponse {
    success: bool,
    field: FieldView,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FieldListResponse {
    success: bool,
    expense_field: Vec<FieldView>,
}

fn check_amount(amount: f64) -> Result<f64> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(SpendbookError::BadRequest(
            "receivedAmount must be a non-negative number".into(),
        ));
    }
    Ok(amount)
}

/// Filter and update document for a PATCH, applied to `field` in memory.
///
/// A received-amount change moves the balance by the delta and only matches
/// while the stored amount is still the one the delta was computed from.
fn field_update(
    field: &mut ExpenseFieldDoc,
    field_name: Option<&str>,
    received_amount: Option<f64>,
) -> Result<(Document, Document)> {
    let mut filter = doc! { "_id": doc_id(field._id)? };
    let mut set = doc! {};
    let mut inc = doc! {};

    if let Some(name) = field_name {
        field.field_name = required(name, "fieldName")?;
        set.insert("field_name", field.field_name.clone());
    }

    if let Some(amount) = received_amount {
        let amount = check_amount(amount)?;
        let delta = amount - field.received_amount;
        filter.insert("received_amount", field.received_amount);
        field.received_amount = amount;
        field.balance += delta;
        set.insert("received_amount", amount);
        inc.insert("balance", delta);
    }

    if set.is_empty() {
        return Err(SpendbookError::BadRequest(
            "Nothing to update: provide fieldName or receivedAmount".into(),
        ));
    }

    let mut update = doc! { "$set": set };
    if !inc.is_empty() {
        update.insert("$inc", inc);
    }
    Ok((filter, update))
}

/// Expenses removed along with their field
fn cascade_filter(field_id: ObjectId) -> Document {
    doc! { "field_id": field_id }
}

/// Load a field owned by `user_id`; other users' fields look absent
pub async fn owned_field(api: &ApiRequest<'_>, user_id: ObjectId, field_id: ObjectId) -> Result<ExpenseFieldDoc> {
    api.db
        .collection::<ExpenseFieldDoc>(EXPENSE_FIELD_COLLECTION)
        .find_one(doc! { "_id": field_id, "user_id": user_id })
        .await?
        .ok_or_else(|| SpendbookError::NotFound("Field does not exist".into()))
}

/// POST /field/createField
pub async fn create(api: &ApiRequest<'_>) -> Result<Response<BoxBody>> {
    let user = api.authenticate().await?;
    let body: CreateFieldRequest = api.json()?;

    let field_name = required(&body.field_name, "fieldName")?;
    let received = check_amount(body.received_amount.unwrap_or(0.0))?;

    let mut field = ExpenseFieldDoc::new(field_name, received, doc_id(user._id)?);
    field._id = Some(
        api.db
            .collection::<ExpenseFieldDoc>(EXPENSE_FIELD_COLLECTION)
            .insert_one(field.clone())
            .await?,
    );

    info!("Created field '{}' for {}", field.field_name, user.identifier);
    Ok(json_response(
        StatusCode::CREATED,
        &FieldResponse {
            success: true,
            field: FieldView::from_doc(&field)?,
        },
    ))
}

/// GET /field
pub async fn list(api: &ApiRequest<'_>) -> Result<Response<BoxBody>> {
    let user = api.authenticate().await?;

    let fields = api
        .db
        .collection::<ExpenseFieldDoc>(EXPENSE_FIELD_COLLECTION)
        .find_many(
            doc! { "user_id": doc_id(user._id)? },
            doc! { "metadata.created_at": 1 },
        )
        .await?;

    let expense_field = fields
        .iter()
        .map(FieldView::from_doc)
        .collect::<Result<Vec<_>>>()?;

    Ok(json_response(
        StatusCode::OK,
        &FieldListResponse {
            success: true,
            expense_field,
        },
    ))
}

/// PATCH /field/:id
///
/// Changing the received amount moves the balance by the same delta, so
/// spending already logged is preserved.
pub async fn update(api: &ApiRequest<'_>, id: &str) -> Result<Response<BoxBody>> {
    let user = api.authenticate().await?;
    let field_id = parse_id(id, "field")?;
    let body: UpdateFieldRequest = api.json()?;

    let mut field = owned_field(api, doc_id(user._id)?, field_id).await?;
    let (filter, update) = field_update(
        &mut field,
        body.field_name.as_deref(),
        body.received_amount,
    )?;

    let result = api
        .db
        .collection::<ExpenseFieldDoc>(EXPENSE_FIELD_COLLECTION)
        .update_one(filter, update)
        .await?;
    if result.matched_count == 0 {
        return Err(SpendbookError::Conflict(
            "Field was modified concurrently".into(),
        ));
    }

    Ok(json_response(
        StatusCode::OK,
        &FieldResponse {
            success: true,
            field: FieldView::from_doc(&field)?,
        },
    ))
}

/// DELETE /field/:id
pub async fn delete(api: &ApiRequest<'_>, id: &str) -> Result<Response<BoxBody>> {
    let user = api.authenticate().await?;
    let field_id = parse_id(id, "field")?;
    let field = owned_field(api, doc_id(user._id)?, field_id).await?;

    let removed = api
        .db
        .collection::<ExpenseDoc>(EXPENSE_COLLECTION)
        .soft_delete_many(cascade_filter(field_id))
        .await?;

    api.db
        .collection::<ExpenseFieldDoc>(EXPENSE_FIELD_COLLECTION)
        .soft_delete(doc! { "_id": field_id })
        .await?;

    info!(
        "Deleted field '{}' and {} expense(s)",
        field.field_name, removed.modified_count
    );
    Ok(json_response(
        StatusCode::OK,
        &MessageResponse::ok("Field deleted successfully"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_request_uses_camel_case() {
        let body: CreateFieldRequest =
            serde_json::from_str(r#"{"fieldName":"Rent","receivedAmount":1200.5}"#).unwrap();
        assert_eq!(body.field_name, "Rent");
        assert_eq!(body.received_amount, Some(1200.5));

        let body: CreateFieldRequest = serde_json::from_str(r#"{"fieldName":"Rent"}"#).unwrap();
        assert_eq!(body.received_amount, None);
    }

    #[test]
    fn test_check_amount() {
        assert!(check_amount(0.0).is_ok());
        assert!(check_amount(-1.0).is_err());
        assert!(check_amount(f64::NAN).is_err());
        assert!(check_amount(f64::INFINITY).is_err());
    }

    #[test]
    fn test_field_view_reports_spent() {
        let mut field = ExpenseFieldDoc::new("Food".into(), 300.0, ObjectId::new());
        field._id = Some(ObjectId::new());
        field.balance = 120.0;

        let json = serde_json::to_value(FieldView::from_doc(&field).unwrap()).unwrap();
        assert_eq!(json["fieldName"], "Food");
        assert_eq!(json["receivedAmount"], 300.0);
        assert_eq!(json["spent"], 180.0);
    }

    fn stored_field(received: f64, balance: f64) -> ExpenseFieldDoc {
        let mut field = ExpenseFieldDoc::new("Food".into(), received, ObjectId::new());
        field._id = Some(ObjectId::new());
        field.balance = balance;
        field
    }

    #[test]
    fn test_amount_change_moves_balance_by_delta() {
        // 300 received, 180 already spent
        let mut field = stored_field(300.0, 120.0);
        let id = field._id.unwrap();

        let (filter, update) = field_update(&mut field, None, Some(500.0)).unwrap();

        assert_eq!(filter, doc! { "_id": id, "received_amount": 300.0 });
        assert_eq!(update.get_document("$inc").unwrap(), &doc! { "balance": 200.0 });
        assert_eq!(
            update.get_document("$set").unwrap(),
            &doc! { "received_amount": 500.0 }
        );
        assert_eq!(field.balance, 320.0);
        assert_eq!(field.spent(), 180.0);
    }

    #[test]
    fn test_amount_decrease_can_overdraw() {
        let mut field = stored_field(300.0, 120.0);
        let (_, update) = field_update(&mut field, None, Some(100.0)).unwrap();

        assert_eq!(update.get_document("$inc").unwrap(), &doc! { "balance": -200.0 });
        assert_eq!(field.balance, -80.0);
    }

    #[test]
    fn test_rename_only_is_unconditional_on_amount() {
        let mut field = stored_field(300.0, 120.0);
        let id = field._id.unwrap();

        let (filter, update) = field_update(&mut field, Some(" Groceries "), None).unwrap();

        assert_eq!(filter, doc! { "_id": id });
        assert_eq!(update, doc! { "$set": { "field_name": "Groceries" } });
        assert_eq!(field.balance, 120.0);
    }

    #[test]
    fn test_empty_update_is_rejected() {
        let mut field = stored_field(300.0, 120.0);
        let err = field_update(&mut field, None, None).unwrap_err();
        assert!(matches!(err, SpendbookError::BadRequest(_)));

        let err = field_update(&mut field, None, Some(-5.0)).unwrap_err();
        assert!(matches!(err, SpendbookError::BadRequest(_)));
        assert_eq!(field.received_amount, 300.0);
    }

    #[test]
    fn test_delete_cascades_to_field_expenses() {
        let field_id = ObjectId::new();
        assert_eq!(cascade_filter(field_id), doc! { "field_id": field_id });
    }
}
