//! Application state management
//!
//! Contains shared state accessible across all handlers.

use crate::mirror::MirrorOrchestrator;
use crate::store::AuditStore;
use std::sync::Arc;

/// Application state shared across all handlers
pub struct AppState {
    /// Database handle the orchestrator works against
    pub store: Arc<dyn AuditStore>,

    /// Attached tables, cipher engine and shadow schema cache
    pub mirror: MirrorOrchestrator,

    /// JWT secret key for token validation
    pub jwt_secret: String,
}

impl AppState {
    pub fn new(store: Arc<dyn AuditStore>, mirror: MirrorOrchestrator, jwt_secret: String) -> Self {
        Self {
            store,
            mirror,
            jwt_secret,
        }
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;
