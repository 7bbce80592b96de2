pub mod auth;
pub mod rate_limit;

pub use auth::{CSRF_COOKIE, CurrentUser, REDIRECT_COOKIE, SESSION_COOKIE, find_cookie};
pub use rate_limit::RateLimiter;
