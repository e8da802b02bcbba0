//! Management API for Autoreply
//!
//! REST endpoints for automation CRUD and the operator dashboard.

pub mod error;
pub mod rest;

pub use error::{ApiError, Result};
pub use rest::router::create_router;

use autoreply_engine::AutomationEngine;
use std::sync::Arc;

/// Shared state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<AutomationEngine>,
}

impl AppState {
    pub fn new(engine: Arc<AutomationEngine>) -> Self {
        Self { engine }
    }
}
