// Library exports for the binary and integration tests
pub mod api;
pub mod cli;
pub mod config;
pub mod content;
pub mod error;
pub mod logging;
pub mod service;
pub mod store;
