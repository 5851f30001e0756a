//! User registration and login
//!
//! - POST /user/signup - Create an account and get a token
//! - POST /user/signin - Authenticate and get a token
//! - GET  /user/me     - Current user from token

use bson::doc;
use hyper::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::auth::{check_password_strength, hash_password, verify_password, TokenInput};
use crate::db::schemas::{UserDoc, USER_COLLECTION};
use crate::routes::context::{doc_id, required, ApiRequest};
use crate::routes::respond::{json_response, BoxBody};
use crate::types::{Result, SpendbookError};

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct SigninRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct UserView {
    pub id: String,
    pub name: String,
    pub email: String,
}

impl UserView {
    pub fn from_doc(user: &UserDoc) -> Result<Self> {
        Ok(Self {
            id: doc_id(user._id)?.to_hex(),
            name: user.name.clone(),
            email: user.identifier.clone(),
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub success: bool,
    pub token: String,
    pub expires_at: u64,
    pub user: UserView,
}

/// Lowercase and sanity-check an email identifier
pub fn normalize_email(email: &str) -> Result<String> {
    let email = required(email, "email")?.to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(SpendbookError::BadRequest("Invalid email address".into())),
    }
}

/// POST /user/signup
pub async fn signup(api: &ApiRequest<'_>) -> Result<Response<BoxBody>> {
    let body: SignupRequest = api.json()?;
    let name = required(&body.name, "name")?;
    let email = normalize_email(&body.email)?;
    check_password_strength(&body.password)?;

    let users = api.db.collection::<UserDoc>(USER_COLLECTION);
    if users.find_one(doc! { "identifier": &email }).await?.is_some() {
        return Err(SpendbookError::Conflict(
            "An account with this email already exists".into(),
        ));
    }

    let password_hash = hash_password(&body.password)?;
    let mut user = UserDoc::new(name, email, password_hash);
    // The unique index still guards against a concurrent signup
    user._id = Some(users.insert_one(user.clone()).await?);

    info!("Registered new user: {}", user.identifier);
    auth_response(api, &user, StatusCode::CREATED)
}

/// POST /user/signin
pub async fn signin(api: &ApiRequest<'_>) -> Result<Response<BoxBody>> {
    let body: SigninRequest = api.json()?;
    let email = normalize_email(&body.email)?;
    if body.password.is_empty() {
        return Err(SpendbookError::BadRequest("password is required".into()));
    }

    let invalid = || SpendbookError::Unauthorized("Invalid credentials".into());

    let user = api
        .db
        .collection::<UserDoc>(USER_COLLECTION)
        .find_one(doc! { "identifier": &email, "is_active": true })
        .await?
        .ok_or_else(|| {
            warn!("Signin failed - user not found: {}", email);
            invalid()
        })?;

    if !verify_password(&body.password, &user.password_hash)? {
        warn!("Signin failed - invalid password: {}", email);
        return Err(invalid());
    }

    info!("Signin successful: {}", email);
    auth_response(api, &user, StatusCode::OK)
}

/// GET /user/me
pub async fn me(api: &ApiRequest<'_>) -> Result<Response<BoxBody>> {
    let user = api.authenticate().await?;
    Ok(json_response(StatusCode::OK, &UserView::from_doc(&user)?))
}

fn auth_response(api: &ApiRequest<'_>, user: &UserDoc, status: StatusCode) -> Result<Response<BoxBody>> {
    let (token, expires_at) = api.state.jwt.generate_token(TokenInput {
        user_id: doc_id(user._id)?,
        email: user.identifier.clone(),
        token_version: user.token_version,
    })?;

    Ok(json_response(
        status,
        &AuthResponse {
            success: true,
            token,
            expires_at,
            user: UserView::from_doc(user)?,
        },
    ))
}
