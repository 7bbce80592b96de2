use axum::{
    Router,
    routing::{get, post},
};

use super::AppState;
use super::{auth, comments, health, likes, posts, social, subscribe, ws};

/// V1 API routes
///
/// ## Public
/// - GET  /healthcheck - Liveness probe
/// - GET  /posts - List posts with root-comment activity
/// - GET  /posts/{id} - One post with paginated root comments
/// - GET  /comments/{id} - One comment with paginated sub-comments
/// - GET  /subscribe/posts - SSE stream of post-added events
/// - GET  /subscribe/comments - SSE stream of comment-added events
/// - GET  /subscribe/sub-comments - SSE stream of sub-comment-added events
///
/// ## Session required
/// - POST   /posts - Create post
/// - DELETE /posts/{id} - Delete post
/// - POST   /posts/{id}/like - Like post
/// - POST   /comments - Create root comment
/// - POST   /comments/{id} - Create sub-comment under parent
/// - DELETE /comments/{id} - Delete comment and descendants
/// - POST   /comments/{id}/like - Like comment
/// - POST   /social/follow/{id} - Follow a user
/// - GET    /ws - WebSocket upgrade for push notifications
pub fn v1_routes() -> Router<AppState> {
    Router::new()
        .route("/healthcheck", get(health::healthcheck))
        .route("/posts", post(posts::create_post).get(posts::list_posts))
        .route(
            "/posts/{id}",
            get(posts::get_post).delete(posts::delete_post),
        )
        .route("/posts/{id}/like", post(likes::like_post))
        .route("/subscribe/posts", get(subscribe::subscribe_posts))
        .route("/comments", post(comments::create_comment))
        .route(
            "/comments/{id}",
            post(comments::create_sub_comment)
                .get(comments::get_comment)
                .delete(comments::delete_comment),
        )
        .route("/comments/{id}/like", post(likes::like_comment))
        .route("/subscribe/comments", get(subscribe::subscribe_comments))
        .route(
            "/subscribe/sub-comments",
            get(subscribe::subscribe_sub_comments),
        )
        .route("/social/follow/{id}", post(social::follow))
        .route("/ws", get(ws::upgrade))
}

/// Sign-in flow routes, mounted at the root: the OAuth provider redirects
/// back to fixed paths.
pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/signin", get(auth::signin))
        .route("/auth", get(auth::begin_auth))
        .route("/auth/callback", get(auth::auth_callback))
        .route("/signout", get(auth::signout))
}
