//! # Order Sync Library
//!
//! This library provides the staged order synchronization engine: it pushes
//! locally recorded sales into the ERP as resumable background jobs, together
//! with the HTTP API, worker and persistence it runs on.

pub mod app;
pub mod config;
pub mod db;
pub mod erp;
pub mod error;
pub mod handlers;
pub mod mail;
pub mod models;
pub mod repositories;
pub mod server;
pub mod sync;
pub mod telemetry;
pub use migration;
