use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Extension, Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::json;
use validator::{Validate, ValidationError};

use super::AppState;
use super::error::ApiError;
use crate::db::{self, Filters};
use crate::events::DomainEvent;
use crate::middleware::CurrentUser;
use crate::{broker, events, notifications};

/// Bodies are capped at 20,000 bytes for posts and comments alike.
pub const BODY_MAX_BYTES: usize = 20_000;

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePostInput {
    #[validate(custom(function = validate_body))]
    pub body: String,
}

/// Byte-length validation; the cap is on bytes, not characters.
pub(crate) fn validate_body(body: &str) -> Result<(), ValidationError> {
    if body.is_empty() {
        return Err(ValidationError::new("required").with_message("must be provided".into()));
    }

    if body.len() > BODY_MAX_BYTES {
        return Err(ValidationError::new("too_long")
            .with_message("must not be more than 20,000 bytes long".into()));
    }

    Ok(())
}

pub async fn create_post(
    State(app): State<AppState>,
    Extension(principal): Extension<CurrentUser>,
    payload: Result<Json<CreatePostInput>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let user = principal.require()?.clone();

    let Json(input) = payload.map_err(|err| ApiError::bad_request(err.body_text()))?;
    input.validate()?;

    let post = db::posts::insert(&app.db, &input.body, user.user_id).await?;

    // Fanout happens off the request path; the client never waits on it.
    spawn_post_published(app, post.clone());

    let location = format!("/v1/posts/{}", post.id);
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(json!({ "post": post })),
    ))
}

fn spawn_post_published(app: AppState, post: db::posts::Post) {
    tokio::spawn(async move {
        match serde_json::to_string(&post) {
            Ok(payload) => {
                if let Err(err) = broker::publish(&app.redis, events::POST_ADDED, payload).await {
                    tracing::warn!(post_id = post.id, error = %err, "failed to publish post-added");
                }
            }
            Err(err) => {
                tracing::warn!(post_id = post.id, error = %err, "failed to serialize post");
                return;
            }
        }

        let event = DomainEvent::PostAdded {
            post_id: post.id,
            user_id: post.user.id,
            username: post.user.username.clone(),
            created_at: post.created_at,
        };

        if let Err(err) = notifications::publish(&app.redis, &app.bus_name, &event).await {
            tracing::warn!(post_id = post.id, error = %err, "failed to publish notification");
        }
    });
}

pub async fn list_posts(
    State(app): State<AppState>,
    filters: Result<Query<Filters>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(filters) = filters.map_err(|err| ApiError::bad_request(err.body_text()))?;
    filters.validate()?;

    let posts = db::posts::get_all(&app.db, filters).await?;

    Ok(Json(json!({ "posts": posts })))
}

pub async fn get_post(
    State(app): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    filters: Result<Query<Filters>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path(id) = id.map_err(|err| ApiError::bad_request(err.body_text()))?;
    if id < 1 {
        return Err(ApiError::bad_request("id must be a positive integer"));
    }

    let Query(filters) = filters.map_err(|err| ApiError::bad_request(err.body_text()))?;
    filters.validate()?;

    let post = db::posts::get(&app.db, id, filters).await?;

    Ok(Json(json!({ "post": post })))
}

pub async fn delete_post(
    State(app): State<AppState>,
    Extension(principal): Extension<CurrentUser>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    principal.require()?;

    let Path(id) = id.map_err(|err| ApiError::bad_request(err.body_text()))?;
    if id < 1 {
        return Err(ApiError::bad_request("id must be a positive integer"));
    }

    db::posts::delete(&app.db, id).await?;

    Ok(Json(json!({ "message": "post successfully deleted" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_boundaries() {
        assert!(validate_body("").is_err());
        assert!(validate_body("a").is_ok());
        assert!(validate_body(&"a".repeat(BODY_MAX_BYTES)).is_ok());
        assert!(validate_body(&"a".repeat(BODY_MAX_BYTES + 1)).is_err());
    }

    #[test]
    fn body_cap_counts_bytes_not_chars() {
        // 7,000 three-byte chars: 7,000 chars but 21,000 bytes.
        let body = "日".repeat(7_000);
        assert!(validate_body(&body).is_err());
    }

    #[test]
    fn create_post_input_surfaces_field_errors() {
        let input = CreatePostInput {
            body: String::new(),
        };

        let err = ApiError::from(input.validate().unwrap_err());
        let ApiError::FailedValidation(fields) = err else {
            panic!("expected validation error");
        };
        assert_eq!(fields.get("body").map(String::as_str), Some("must be provided"));
    }
}
