//! Test Helper Utilities
//!
//! Shared utilities for testing gv-scan

#![allow(dead_code)]

pub mod db_utils;
pub mod fakes;

pub use db_utils::{create_test_db, write_library};
pub use fakes::{
    game, wait_for_terminal, MemoryCatalog, ScriptedProvider, StaticInventory,
};
