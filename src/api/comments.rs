use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Extension, Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

use super::AppState;
use super::error::ApiError;
use super::posts::validate_body;
use crate::db::{self, Filters};
use crate::events::DomainEvent;
use crate::middleware::CurrentUser;
use crate::{broker, events, notifications};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCommentInput {
    #[validate(custom(function = validate_body))]
    pub body: String,
    #[validate(range(min = 1, message = "must be a valid integer"))]
    pub post_id: i64,
}

pub async fn create_comment(
    State(app): State<AppState>,
    Extension(principal): Extension<CurrentUser>,
    payload: Result<Json<CreateCommentInput>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let user = principal.require()?.clone();

    let Json(input) = payload.map_err(|err| ApiError::bad_request(err.body_text()))?;
    input.validate()?;

    let comment = db::comments::insert_root(&app.db, input.post_id, &input.body, user.user_id)
        .await?;

    spawn_comment_published(app, comment.clone(), None);

    let location = format!("/v1/comments/{}", comment.id);
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(json!({ "comment": comment })),
    ))
}

pub async fn create_sub_comment(
    State(app): State<AppState>,
    Extension(principal): Extension<CurrentUser>,
    parent: Result<Path<i64>, PathRejection>,
    payload: Result<Json<CreateCommentInput>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let user = principal.require()?.clone();

    let Path(parent_id) = parent.map_err(|err| ApiError::bad_request(err.body_text()))?;
    if parent_id < 1 {
        return Err(ApiError::bad_request("invalid comment id"));
    }

    let Json(input) = payload.map_err(|err| ApiError::bad_request(err.body_text()))?;
    input.validate()?;

    let (comment, parent_user_id) =
        db::comments::insert_sub(&app.db, input.post_id, &input.body, user.user_id, parent_id)
            .await?;

    spawn_comment_published(app, comment.clone(), Some(parent_user_id));

    let location = format!("/v1/comments/{}", comment.id);
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(json!({ "comment": comment })),
    ))
}

/// Publish the broker payload and the notification-bus events for a new
/// comment. A sub-comment emits a `CommentAdded` for the post author and a
/// `SubCommentAdded` for the parent-comment author; a root comment emits
/// only the former.
fn spawn_comment_published(app: AppState, comment: db::comments::Comment, parent_user_id: Option<i64>) {
    tokio::spawn(async move {
        let channel = if parent_user_id.is_some() {
            events::SUB_COMMENT_ADDED
        } else {
            events::COMMENT_ADDED
        };

        match serde_json::to_string(&comment) {
            Ok(payload) => {
                if let Err(err) = broker::publish(&app.redis, channel, payload).await {
                    tracing::warn!(comment_id = comment.id, error = %err, "failed to publish {channel}");
                }
            }
            Err(err) => {
                tracing::warn!(comment_id = comment.id, error = %err, "failed to serialize comment");
                return;
            }
        }

        let post_author = match db::posts::author(&app.db, comment.post_id).await {
            Ok(author) => author,
            Err(err) => {
                tracing::warn!(
                    post_id = comment.post_id,
                    error = %err,
                    "skipping notification: post author lookup failed"
                );
                return;
            }
        };

        let preview = events::body_preview(&comment.body).to_string();

        let comment_added = DomainEvent::CommentAdded {
            post_id: post_author.post_id,
            comment_id: comment.id,
            post_user_id: post_author.user_id,
            comment_user_id: comment.user.id,
            comment_user_name: comment.user.username.clone(),
            created_at: comment.created_at,
            body_preview: preview.clone(),
        };

        if let Err(err) = notifications::publish(&app.redis, &app.bus_name, &comment_added).await {
            tracing::warn!(comment_id = comment.id, error = %err, "failed to publish notification");
        }

        if let Some(parent_user_id) = parent_user_id {
            let sub_comment_added = DomainEvent::SubCommentAdded {
                post_id: comment.post_id,
                parent_comment_id: comment.parent_id,
                child_comment_id: comment.id,
                parent_comment_user_id: parent_user_id,
                child_comment_user_id: comment.user.id,
                child_comment_username: comment.user.username.clone(),
                created_at: comment.created_at,
                body_preview: preview,
            };

            if let Err(err) =
                notifications::publish(&app.redis, &app.bus_name, &sub_comment_added).await
            {
                tracing::warn!(comment_id = comment.id, error = %err, "failed to publish notification");
            }
        }
    });
}

pub async fn get_comment(
    State(app): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    filters: Result<Query<Filters>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path(id) = id.map_err(|err| ApiError::bad_request(err.body_text()))?;
    if id < 1 {
        return Err(ApiError::bad_request("invalid comment id"));
    }

    let Query(filters) = filters.map_err(|err| ApiError::bad_request(err.body_text()))?;
    filters.validate()?;

    let comment = db::comments::get(&app.db, id, filters).await?;

    Ok(Json(json!({ "comment": comment })))
}

pub async fn delete_comment(
    State(app): State<AppState>,
    Extension(principal): Extension<CurrentUser>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    principal.require()?;

    let Path(id) = id.map_err(|err| ApiError::bad_request(err.body_text()))?;
    if id < 1 {
        return Err(ApiError::bad_request("invalid comment id"));
    }

    db::comments::delete(&app.db, id).await?;

    Ok(Json(json!({ "message": "comment successfully deleted" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_requires_a_plausible_post_id() {
        let input = CreateCommentInput {
            body: "hello".to_string(),
            post_id: 0,
        };
        assert!(input.validate().is_err());

        let input = CreateCommentInput {
            body: "hello".to_string(),
            post_id: 1,
        };
        assert!(input.validate().is_ok());
    }
}
