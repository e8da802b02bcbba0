//! REST surface

pub mod automations;
pub mod dashboard;
pub mod router;
