use super::common::success_response;
use crate::auth::AuthUser;
use crate::errors::ApiError;
use crate::handlers::AppState;
use axum::{
    extract::{Path, State},
    response::Response,
    routing::get,
    Router,
};
use uuid::Uuid;

/// The caller's orders, newest first
async fn my_orders(State(state): State<AppState>, user: AuthUser) -> Result<Response, ApiError> {
    let orders = state.services.orders.list_for_user(user.user_id).await?;
    Ok(success_response(orders))
}

async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let order = state
        .services
        .orders
        .get_visible_to(id, user.user_id, user.is_admin())
        .await?;
    Ok(success_response(order))
}

pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/my", get(my_orders))
        .route("/:id", get(get_order))
}
