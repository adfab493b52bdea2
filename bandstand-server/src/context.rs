use std::sync::Arc;
use std::time::Duration;

use axum::extract::FromRef;
use bandstand_core::Config;
use bandstand_session::{MetadataProvider, RateLimiter, Session};

use crate::gateway::Gateway;

#[derive(Clone, FromRef)]
pub struct ServerContext {
    pub config: Config,
    pub session: Arc<Session>,
    pub provider: Arc<dyn MetadataProvider>,
    pub gateway: Arc<Gateway>,
    pub limits: Arc<Limits>,
}

/// Per-class rate limiters, keyed by client address.
pub struct Limits {
    pub chat: RateLimiter,
    pub action: RateLimiter,
    pub room_create: RateLimiter,
    pub search: RateLimiter,
}

impl Limits {
    pub fn new() -> Self {
        Self {
            chat: RateLimiter::new(5, Duration::from_secs(10)),
            action: RateLimiter::new(10, Duration::from_secs(5)),
            room_create: RateLimiter::new(3, Duration::from_secs(60)),
            search: RateLimiter::new(10, Duration::from_secs(60)),
        }
    }

    pub fn cleanup(&self) {
        self.chat.cleanup();
        self.action.cleanup();
        self.room_create.cleanup();
        self.search.cleanup();
    }
}
