// models/mod.rs
pub mod emergency;
pub mod hospital;
pub mod signal;
pub mod vehicle;
