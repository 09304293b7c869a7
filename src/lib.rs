//! Library crate for random-sync, exposing modules for binaries and integration tests.

/// Injectable time source.
pub mod clock;
/// Application configuration.
pub mod config;
/// Backend access: trait, memory and REST implementations.
pub mod dao;
/// Request and response payloads.
pub mod dto;
/// Service and HTTP error types.
pub mod error;
/// Rate limiter and request throttler.
pub mod guard;
/// Change-notification channels.
pub mod realtime;
/// HTTP routes.
pub mod routes;
/// Business logic behind the routes.
pub mod services;
/// Shared application state.
pub mod state;
