//! Scan services
//!
//! - File name tag parsing
//! - Library filesystem inventory
//! - Identification policy
//! - Reconciliation engine
//! - Run coordination

pub mod coordinator;
pub mod inventory;
pub mod policy;
pub mod reconciler;
pub mod tag_parser;

pub use coordinator::{
    CoordinatorError, CoordinatorSettings, RunGuard, RunHandle, RunLock, ScanCoordinator, ScanWorker,
};
pub use inventory::{Exclusions, FilesystemInventory, FsItem, InventoryError, LibraryInventory, LibraryLayout};
pub use policy::{needs_identification, processes_platform, PolicyContext};
pub use reconciler::{PhaseTracker, Reconciler, ReconcilerSettings, RunOutcome};
pub use tag_parser::{parse_file_name, parse_name, ParsedName};
