//! Expense routes
//!
//! - POST   /expenses          - Log an expense against a field
//! - GET    /expenses          - List expenses, optionally `?fieldId=`
//! - DELETE /expenses/:id      - Remove an expense and refund its field
//!
//! Every expense moves its field's balance: logging subtracts
//! `qty * price`, deleting adds it back.

use bson::{doc, Document};
use chrono::NaiveDate;
use hyper::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::schemas::{ExpenseDoc, ExpenseFieldDoc, EXPENSE_COLLECTION, EXPENSE_FIELD_COLLECTION};
use crate::routes::context::{doc_id, parse_id, required, ApiRequest};
use crate::routes::field::owned_field;
use crate::routes::respond::{json_response, BoxBody, MessageResponse};
use crate::types::{Result, SpendbookError};

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateExpenseRequest {
    pub desc: String,
    pub category: String,
    #[serde(default)]
    pub qty: Option<f64>,
    pub price: f64,
    pub date: String,
    pub field_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListExpensesQuery {
    #[serde(default)]
    pub field_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseView {
    pub id: String,
    pub desc: String,
    pub category: String,
    pub qty: f64,
    pub price: f64,
    pub amount: f64,
    pub date: String,
    pub field_id: String,
}

impl ExpenseView {
    pub fn from_doc(expense: &ExpenseDoc) -> Result<Self> {
        Ok(Self {
            id: doc_id(expense._id)?.to_hex(),
            desc: expense.desc.clone(),
            category: expense.category.clone(),
            qty: expense.qty,
            price: expense.price,
            amount: expense.amount(),
            date: expense.day().format(DATE_FORMAT).to_string(),
            field_id: expense.field_id.to_hex(),
        })
    }
}

#[derive(Debug, Serialize)]
struct ExpenseResponse {
    success: bool,
    expense: ExpenseView,
    balance: f64,
}

#[derive(Debug, Serialize)]
struct ExpenseListResponse {
    success: bool,
    expenses: Vec<ExpenseView>,
}

/// Parse a calendar day in `YYYY-MM-DD` form
pub fn parse_day(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
        .map_err(|_| SpendbookError::BadRequest("date must be in YYYY-MM-DD format".into()))
}

fn check_positive(value: f64, name: &str) -> Result<f64> {
    if !value.is_finite() || value <= 0.0 {
        return Err(SpendbookError::BadRequest(format!(
            "{name} must be a positive number"
        )));
    }
    Ok(value)
}

/// Total cost of a line item, rejected when the product overflows
fn checked_amount(qty: f64, price: f64) -> Result<f64> {
    let amount = qty * price;
    if !amount.is_finite() {
        return Err(SpendbookError::BadRequest(
            "qty * price is too large".into(),
        ));
    }
    Ok(amount)
}

/// Field update that moves its balance by `delta`
fn balance_change(delta: f64) -> Document {
    doc! { "$inc": { "balance": delta } }
}

/// POST /expenses
pub async fn create(api: &ApiRequest<'_>) -> Result<Response<BoxBody>> {
    let user = api.authenticate().await?;
    let user_id = doc_id(user._id)?;
    let body: CreateExpenseRequest = api.json()?;

    let desc = required(&body.desc, "desc")?;
    let category = required(&body.category, "category")?;
    let qty = check_positive(body.qty.unwrap_or(1.0), "qty")?;
    let price = check_positive(body.price, "price")?;
    let amount = checked_amount(qty, price)?;
    let day = parse_day(&body.date)?;
    let field_id = parse_id(&body.field_id, "field")?;

    let field = owned_field(api, user_id, field_id).await?;

    let mut expense = ExpenseDoc::new(desc, category, qty, price, day, field_id, user_id);
    expense._id = Some(
        api.db
            .collection::<ExpenseDoc>(EXPENSE_COLLECTION)
            .insert_one(expense.clone())
            .await?,
    );

    api.db
        .collection::<ExpenseFieldDoc>(EXPENSE_FIELD_COLLECTION)
        .update_one(doc! { "_id": field_id }, balance_change(-amount))
        .await?;

    info!(
        "Logged expense '{}' ({}) against '{}'",
        expense.desc, amount, field.field_name
    );
    Ok(json_response(
        StatusCode::CREATED,
        &ExpenseResponse {
            success: true,
            expense: ExpenseView::from_doc(&expense)?,
            balance: field.balance - amount,
        },
    ))
}

/// GET /expenses
pub async fn list(api: &ApiRequest<'_>) -> Result<Response<BoxBody>> {
    let user = api.authenticate().await?;
    let query: ListExpensesQuery = api.query()?;

    let mut filter = doc! { "user_id": doc_id(user._id)? };
    if let Some(raw) = query.field_id.as_deref().filter(|s| !s.is_empty()) {
        filter.insert("field_id", parse_id(raw, "field")?);
    }

    let expenses = api
        .db
        .collection::<ExpenseDoc>(EXPENSE_COLLECTION)
        .find_many(filter, doc! { "date": -1, "metadata.created_at": -1 })
        .await?
        .iter()
        .map(ExpenseView::from_doc)
        .collect::<Result<Vec<_>>>()?;

    Ok(json_response(
        StatusCode::OK,
        &ExpenseListResponse {
            success: true,
            expenses,
        },
    ))
}

/// DELETE /expenses/:id
pub async fn delete(api: &ApiRequest<'_>, id: &str) -> Result<Response<BoxBody>> {
    let user = api.authenticate().await?;
    let expense_id = parse_id(id, "expense")?;

    let expenses = api.db.collection::<ExpenseDoc>(EXPENSE_COLLECTION);
    let expense = expenses
        .find_one(doc! { "_id": expense_id, "user_id": doc_id(user._id)? })
        .await?
        .ok_or_else(|| SpendbookError::NotFound("Expense does not exist".into()))?;

    let result = expenses.soft_delete(doc! { "_id": expense_id }).await?;
    // A concurrent delete already refunded the field
    if result.modified_count == 0 {
        return Err(SpendbookError::NotFound("Expense does not exist".into()));
    }

    api.db
        .collection::<ExpenseFieldDoc>(EXPENSE_FIELD_COLLECTION)
        .update_one(
            doc! { "_id": expense.field_id },
            balance_change(expense.amount()),
        )
        .await?;

    Ok(json_response(
        StatusCode::OK,
        &MessageResponse::ok("Expense deleted successfully"),
    ))
}
