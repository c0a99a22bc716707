// Library root: exposes internal modules for integration tests in `tests/`.
// Production entry point remains `src/main.rs`.

pub mod api;
pub mod db;
pub mod metrics;
pub mod relay;
pub mod repository;
pub mod scheduler;
pub mod services;
pub mod sources;
pub mod store;

// Binary-side modules. Declared pub so `main.rs` and integration tests can
// reach them.
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
