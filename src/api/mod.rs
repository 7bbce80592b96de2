use std::sync::Arc;

use redis::aio::ConnectionManager;
use sqlx::PgPool;

use crate::broker::Broker;
use crate::cache::CacheService;
use crate::config::Environment;
use crate::notifications::gateway::Gateway;
use crate::notifications::registry::ConnectionRegistry;

pub mod auth;
pub mod comments;
pub mod error;
pub mod health;
pub mod likes;
pub mod posts;
pub mod routes;
pub mod social;
pub mod subscribe;
pub mod ws;

// ============================================
// Application State
// ============================================

/// Everything handlers need, built once at startup. No process-level
/// mutable state lives outside this struct.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub redis: ConnectionManager,
    pub cache: CacheService,
    pub broker: Arc<Broker>,
    pub registry: ConnectionRegistry,
    pub gateway: Arc<Gateway>,
    pub identity: Arc<dyn auth::IdentityProvider>,
    pub session_secret: Arc<str>,
    pub bus_name: Arc<str>,
    pub env: Environment,
}
