pub mod app;
pub mod config;
pub mod engine;
pub mod runtime;
pub mod shared;
pub mod store;
