//! Metadata providers
//!
//! A provider is an external reference database that can identify platforms
//! and look up games by name or by its own id. The reconciliation engine only
//! sees the [`MetadataProvider`] trait; tests substitute scripted fakes.

pub mod igdb;
pub mod mobygames;
pub mod tgdb;

pub use igdb::IgdbProvider;
pub use mobygames::MobyGamesProvider;
pub use tgdb::TgdbProvider;

use async_trait::async_trait;
use gv_common::models::{MetadataBlob, ProviderKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Provider call errors
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Rate limited, transport failure, bad payload or timeout
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    /// Requested external id does not exist
    #[error("Not found: {0}")]
    NotFound(String),
}

/// One candidate returned by a provider lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderMatch {
    pub external_id: i64,
    pub name: String,
    /// Provider-defined rank, 0 is best
    pub rank: u32,
    pub cover_url: Option<String>,
    pub summary: Option<String>,
    pub slug: Option<String>,
    /// Raw provider payload for this candidate
    pub metadata: MetadataBlob,
}

/// Provider identification of a platform directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformMatch {
    pub external_id: i64,
    pub name: String,
}

/// Cover art size variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverSize {
    Small,
    Large,
}

/// Capability set of one metadata provider
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Resolve a normalized platform slug to the provider's platform
    async fn identify_platform(&self, fs_slug: &str) -> Result<Option<PlatformMatch>, ProviderError>;

    /// Candidates for a display name on a platform, best first
    async fn search(
        &self,
        name: &str,
        platform_external_id: i64,
    ) -> Result<Vec<ProviderMatch>, ProviderError>;

    /// Fetch one game by the provider's own id
    async fn get_by_id(&self, external_id: i64) -> Result<ProviderMatch, ProviderError>;

    /// Cover art location for an accepted candidate
    async fn get_cover_url(&self, candidate: &ProviderMatch) -> Result<Option<String>, ProviderError>;

    /// Size variant of a cover URL
    fn cover_variant(&self, url: &str, _size: CoverSize) -> String {
        url.to_string()
    }
}

/// Configured providers in priority order
pub type ProviderSet = Vec<Arc<dyn MetadataProvider>>;

/// Map an HTTP status to a provider error (`Ok` for success)
pub(crate) fn check_status(status: reqwest::StatusCode, what: &str) -> Result<(), ProviderError> {
    if status.is_success() {
        return Ok(());
    }
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(ProviderError::NotFound(what.to_string()));
    }
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(ProviderError::Unavailable(format!("rate limited ({})", what)));
    }
    Err(ProviderError::Unavailable(format!(
        "HTTP {} for {}",
        status.as_u16(),
        what
    )))
}

/// Lower-case, hyphen-separated form of a display name
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;

    for ch in name.chars() {
        if ch.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(ch.to_lowercase());
        } else {
            pending_dash = true;
        }
    }

    slug
}
