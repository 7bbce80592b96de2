use axum::Json;
use axum::extract::rejection::PathRejection;
use axum::extract::{Extension, Path, State};
use axum::response::IntoResponse;
use serde_json::json;

use super::AppState;
use super::error::ApiError;
use crate::db;
use crate::middleware::CurrentUser;

/// Follow another user. The edge means "I follow them"; a repeat follow is
/// a 409 and leaves exactly one edge in place.
pub async fn follow(
    State(app): State<AppState>,
    Extension(principal): Extension<CurrentUser>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let user = principal.require()?.clone();

    let Path(following_id) = id.map_err(|err| ApiError::bad_request(err.body_text()))?;
    if following_id < 1 {
        return Err(ApiError::bad_request("invalid user ID"));
    }

    if following_id == user.user_id {
        return Err(ApiError::bad_request("cannot follow yourself"));
    }

    // 404 for a missing target, before any edge is written.
    db::users::get(&app.db, following_id).await?;

    db::social::follow(&app.db, user.user_id, following_id).await?;

    Ok(Json(json!({ "status": "followed" })))
}
