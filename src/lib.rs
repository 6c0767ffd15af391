//! Graymill: asynchronous image processing with pluggable storage.
//!
//! Clients submit a file, a background worker transforms it, and the result
//! is retrieved by job id. Inputs, outputs, and the job registry live in one
//! configured storage backend: local disk, Google Cloud Storage, or Azure
//! Blob Storage.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
