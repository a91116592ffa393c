//! Face Swap Job Service
//!
//! This library provides the core of the face-swap-api system: an HTTP API
//! that accepts face-swap jobs, a SQLite job store, a local image store and a
//! worker pool that performs the swap through an OpenRouter image model.

pub mod app_state;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
