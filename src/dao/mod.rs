/// Backend trait and errors.
pub mod backend;
/// In-process backend.
pub mod memory;
/// Table rows.
pub mod models;
/// PostgREST-style HTTP backend.
#[cfg(feature = "rest-backend")]
pub mod rest;
/// Request-budget decorator.
pub mod throttled;
