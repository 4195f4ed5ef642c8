use super::common::{success_response, validate_input, MessageResponse};
use crate::auth::AuthUser;
use crate::errors::ApiError;
use crate::handlers::AppState;
use crate::services::carts::{AddCartItemInput, CartOwner};
use axum::{
    extract::{Json, Query, State},
    response::Response,
    routing::{get, post},
    Router,
};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestQuery {
    pub guest_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeCartRequest {
    pub guest_id: String,
}

/// Signed-in callers own their cart; anonymous callers name a guest cart.
fn resolve_owner(user: Option<AuthUser>, guest: GuestQuery) -> Result<CartOwner, ApiError> {
    if let Some(user) = user {
        return Ok(CartOwner::User(user.user_id));
    }
    guest
        .guest_id
        .map(|g| g.trim().to_string())
        .filter(|g| !g.is_empty())
        .map(CartOwner::Guest)
        .ok_or(ApiError::Unauthorized)
}

async fn get_cart(
    State(state): State<AppState>,
    user: Option<AuthUser>,
    Query(guest): Query<GuestQuery>,
) -> Result<Response, ApiError> {
    let owner = resolve_owner(user, guest)?;
    let cart = state.services.carts.get_cart(&owner).await?;
    Ok(success_response(cart))
}

async fn add_item(
    State(state): State<AppState>,
    user: Option<AuthUser>,
    Query(guest): Query<GuestQuery>,
    Json(input): Json<AddCartItemInput>,
) -> Result<Response, ApiError> {
    let owner = resolve_owner(user, guest)?;
    validate_input(&input)?;
    let cart = state.services.carts.add_item(&owner, input).await?;
    Ok(success_response(cart))
}

async fn clear_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Response, ApiError> {
    state.services.carts.clear(user.user_id).await?;
    Ok(success_response(MessageResponse::new("Cart cleared")))
}

/// Fold a guest cart into the signed-in user's cart after login
async fn merge_cart(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<MergeCartRequest>,
) -> Result<Response, ApiError> {
    let cart = state
        .services
        .carts
        .merge_guest_cart(user.user_id, request.guest_id.trim())
        .await?;
    Ok(success_response(cart))
}

pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart).delete(clear_cart))
        .route("/items", post(add_item))
        .route("/merge", post(merge_cart))
}
