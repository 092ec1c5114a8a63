use std::sync::Arc;

use {
    murmur_auth::{TokenService, UserService},
    murmur_chat::ManagerService,
    murmur_storage::Db,
};

use crate::registry::Registry;

/// Shared gateway runtime state, wrapped in `Arc` for use across async
/// tasks. Created at startup, torn down on shutdown; injected, never
/// global.
pub struct AppState {
    pub db: Db,
    pub manager: Arc<ManagerService>,
    pub registry: Arc<Registry>,
    pub users: Arc<UserService>,
    pub tokens: Arc<TokenService>,
}
