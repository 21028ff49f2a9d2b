pub mod config;
pub mod runtime;
pub mod store;
pub mod sync;
pub mod walker;
