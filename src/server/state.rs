use std::sync::Arc;

use crate::registry::Registry;
use crate::workflow::Engine;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub fn registry(&self) -> &Registry {
        self.engine.registry()
    }
}
