//! Dispatch core for an emergency-mobility platform: hospital selection, the lifecycle of
//! an emergency request, and proximity-triggered green corridors through traffic signals.

pub mod collaborators;
pub mod config;
pub mod control_system;
pub mod dispatch;
pub mod error;
pub mod geo;
pub mod global_variables;
pub mod hospital_selector;
pub mod lifecycle;
pub mod models;
pub mod monitoring;
pub mod notification;
pub mod shared_data;

pub use error::{DispatchError, Result};
