//! Identification decision policy
//!
//! Pure functions deciding, per scan mode, whether a platform is processed
//! and whether an item is sent to the metadata providers.
//!
//! | mode          | identify when                                          |
//! |---------------|--------------------------------------------------------|
//! | quick         | no catalog row for the file name                       |
//! | unidentified  | row exists with zero external ids                      |
//! | partial       | row exists and lacks a configured provider's id        |
//! | complete      | always                                                 |
//! | selected      | row exists and its id is in the selection              |
//! | new_platforms | platform was new at the start of processing, no row    |

use gv_common::models::{Item, ProviderKind, ScanMode};
use std::collections::HashSet;

/// Per-platform inputs to the item decision
#[derive(Debug, Clone, Copy)]
pub struct PolicyContext<'a> {
    pub mode: ScanMode,
    /// Platform had no catalog row when its processing started
    pub platform_is_new: bool,
    pub selected_ids: &'a HashSet<i64>,
    pub configured_providers: &'a [ProviderKind],
}

/// Whether a platform is processed at all in this mode
pub fn processes_platform(mode: ScanMode, platform_is_new: bool) -> bool {
    mode != ScanMode::NewPlatforms || platform_is_new
}

/// Whether an item needs (re)identification
pub fn needs_identification(ctx: &PolicyContext<'_>, existing: Option<&Item>) -> bool {
    match ctx.mode {
        ScanMode::Quick => existing.is_none(),
        ScanMode::Unidentified => existing.is_some_and(|item| item.provider_ids.is_empty()),
        ScanMode::Partial => existing.is_some_and(|item| {
            ctx.configured_providers
                .iter()
                .any(|provider| !item.provider_ids.contains(*provider))
        }),
        ScanMode::Complete => true,
        ScanMode::Selected => existing.is_some_and(|item| ctx.selected_ids.contains(&item.id)),
        ScanMode::NewPlatforms => ctx.platform_is_new && existing.is_none(),
    }
}
