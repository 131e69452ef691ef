//! # gamevault common library
//!
//! Shared code for the gamevault services:
//! - Catalog data model (platforms, items, provider ids)
//! - Scan event types and the `EventBus`
//! - Configuration loading
//! - Catalog schema creation

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod events;
pub mod models;

pub use error::{Error, Result};
