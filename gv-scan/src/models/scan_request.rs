//! Scan request validation

use gv_common::models::ScanMode;
use gv_common::{Error, Result};
use serde::{Deserialize, Serialize};

/// A request to scan the library
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRequest {
    /// Catalog platform ids to scan; empty means every platform on disk
    #[serde(default)]
    pub platform_ids: Vec<i64>,

    #[serde(default)]
    pub mode: ScanMode,

    /// Catalog item ids, only meaningful in `selected` mode
    #[serde(default)]
    pub selected_ids: Vec<i64>,
}

impl ScanRequest {
    pub fn new(mode: ScanMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    pub fn with_platforms(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.platform_ids = ids.into_iter().collect();
        self
    }

    pub fn with_selection(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.selected_ids = ids.into_iter().collect();
        self
    }

    /// Normalize and check the request once, at the boundary
    ///
    /// `selected` mode needs a non-empty selection. A selection sent with any
    /// other mode is dropped with a warning. Duplicate ids are removed.
    pub fn validate(mut self) -> Result<Self> {
        dedup_in_order(&mut self.platform_ids);

        if self.mode == ScanMode::Selected {
            if self.selected_ids.is_empty() {
                return Err(Error::InvalidInput(
                    "selected mode requires at least one selected id".to_string(),
                ));
            }
            dedup_in_order(&mut self.selected_ids);
        } else if !self.selected_ids.is_empty() {
            tracing::warn!(
                mode = %self.mode,
                count = self.selected_ids.len(),
                "Ignoring selected ids outside selected mode"
            );
            self.selected_ids.clear();
        }

        Ok(self)
    }
}

fn dedup_in_order<T: Clone + Eq + std::hash::Hash>(values: &mut Vec<T>) {
    let mut seen = std::collections::HashSet::new();
    values.retain(|v| seen.insert(v.clone()));
}
