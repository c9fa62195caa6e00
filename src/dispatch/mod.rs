// dispatch/mod.rs
pub mod coordinator;
mod lifecycle_task;
mod registry;

pub use coordinator::DispatchCoordinator;
pub use registry::Transition;
