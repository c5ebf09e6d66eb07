use std::sync::Arc;

use crate::events::ServiceEmitters;
use crate::registry::ConnectionRegistry;

/// Shared application state passed to the dispatcher and handlers.
///
/// Registry and emitters wrap `Arc`s internally, so cloning per request is
/// inexpensive. Built once at startup and handed to handlers explicitly;
/// there is no implicit global lookup.
#[derive(Clone)]
pub struct AppState {
    pub registry: ConnectionRegistry,
    pub emitters: ServiceEmitters,
    pub jwt_secret: Arc<str>,
}

impl AppState {
    pub fn new(jwt_secret: &str) -> Self {
        AppState {
            registry: ConnectionRegistry::new(),
            emitters: ServiceEmitters::new(),
            jwt_secret: Arc::from(jwt_secret),
        }
    }
}
