use axum::Json;
use axum::extract::rejection::PathRejection;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use super::AppState;
use super::error::ApiError;
use crate::db;
use crate::events::DomainEvent;
use crate::middleware::CurrentUser;
use crate::notifications;

pub async fn like_post(
    State(app): State<AppState>,
    Extension(principal): Extension<CurrentUser>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let user = principal.require()?.clone();

    let Path(post_id) = id.map_err(|err| ApiError::bad_request(err.body_text()))?;
    if post_id < 1 {
        return Err(ApiError::bad_request("id must be a positive integer"));
    }

    let (like, post_user_id) = db::likes::like_post(&app.db, post_id, user.user_id).await?;

    let event = DomainEvent::PostLike {
        post_id,
        post_user_id,
        like_user_id: user.user_id,
        liked_at: like.created_at,
    };
    spawn_like_published(app, event);

    Ok((StatusCode::CREATED, Json(json!({ "post_like": like }))))
}

pub async fn like_comment(
    State(app): State<AppState>,
    Extension(principal): Extension<CurrentUser>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let user = principal.require()?.clone();

    let Path(comment_id) = id.map_err(|err| ApiError::bad_request(err.body_text()))?;
    if comment_id < 1 {
        return Err(ApiError::bad_request("id must be a positive integer"));
    }

    let (like, comment_user_id) =
        db::likes::like_comment(&app.db, comment_id, user.user_id).await?;

    let event = DomainEvent::CommentLike {
        comment_id,
        comment_user_id,
        like_user_id: user.user_id,
        liked_at: like.created_at,
    };
    spawn_like_published(app, event);

    Ok((StatusCode::CREATED, Json(json!({ "comment_like": like }))))
}

fn spawn_like_published(app: AppState, event: DomainEvent) {
    tokio::spawn(async move {
        if let Err(err) = notifications::publish(&app.redis, &app.bus_name, &event).await {
            tracing::warn!(error = %err, "failed to publish like notification");
        }
    });
}
