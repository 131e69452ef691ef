//! Database access for gv-scan
//!
//! - `catalog`: platform and item rows behind the `CatalogRepository` trait
//! - `runs`: durable scan run records

pub mod catalog;
pub mod runs;

pub use catalog::{CatalogRepository, SqliteCatalog};
