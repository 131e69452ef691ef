//! Catalog data model
//!
//! Platforms and items are identified by filesystem identity (platform slug,
//! item file name). The numeric `id` fields are assigned by the catalog
//! repository and are ignored on upsert.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// External reference database supplying identifying metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Internet Game Database (igdb.com)
    Igdb,
    /// MobyGames (mobygames.com)
    Mobygames,
    /// TheGamesDB (thegamesdb.net)
    Tgdb,
}

impl ProviderKind {
    /// All known providers, in default priority order
    pub const ALL: [ProviderKind; 3] = [ProviderKind::Igdb, ProviderKind::Mobygames, ProviderKind::Tgdb];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Igdb => "igdb",
            ProviderKind::Mobygames => "mobygames",
            ProviderKind::Tgdb => "tgdb",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "igdb" => Ok(ProviderKind::Igdb),
            "mobygames" | "moby" => Ok(ProviderKind::Mobygames),
            "tgdb" | "thegamesdb" => Ok(ProviderKind::Tgdb),
            other => Err(Error::InvalidInput(format!("Unknown provider: {}", other))),
        }
    }
}

/// Per-provider external ids (zero or more, one per provider)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalIds(BTreeMap<ProviderKind, i64>);

impl ExternalIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, provider: ProviderKind) -> Option<i64> {
        self.0.get(&provider).copied()
    }

    pub fn set(&mut self, provider: ProviderKind, id: i64) {
        self.0.insert(provider, id);
    }

    pub fn contains(&self, provider: ProviderKind) -> bool {
        self.0.contains_key(&provider)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ProviderKind, i64)> + '_ {
        self.0.iter().map(|(k, v)| (*k, *v))
    }
}

impl FromIterator<(ProviderKind, i64)> for ExternalIds {
    fn from_iter<I: IntoIterator<Item = (ProviderKind, i64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Raw metadata returned by a provider for an accepted match
pub type MetadataBlob = serde_json::Map<String, serde_json::Value>;

/// A top-level library partition backed by one filesystem directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Platform {
    /// Catalog id (assigned by the repository)
    pub id: i64,
    /// Filesystem directory name
    pub slug: String,
    /// Normalized slug used for provider platform lookup
    pub fs_slug: String,
    /// Display name
    pub name: String,
    /// Provider platform ids
    pub provider_ids: ExternalIds,
    /// Logo reference
    pub logo_path: Option<String>,
    /// Number of cataloged items (derived on read)
    #[serde(default)]
    pub item_count: i64,
}

impl Platform {
    /// New, not yet persisted platform for a directory
    pub fn new(slug: impl Into<String>, fs_slug: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: 0,
            slug: slug.into(),
            fs_slug: fs_slug.into(),
            name: name.into(),
            provider_ids: ExternalIds::new(),
            logo_path: None,
            item_count: 0,
        }
    }
}

/// A cataloged file or grouped multi-file unit within a platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Catalog id (assigned by the repository)
    pub id: i64,
    /// Owning platform catalog id
    pub platform_id: i64,
    /// File (or container directory) name, unique within the platform
    pub file_name: String,
    /// File name without bracketed tags and extension
    pub file_name_no_tags: String,
    /// Display name (provider title when matched)
    pub name: String,
    pub file_extension: String,
    /// Directory containing the item, relative to the library root
    pub file_path: String,
    /// Total size in bytes over all member files
    pub file_size: u64,
    pub region: Option<String>,
    pub revision: Option<String>,
    /// Free-form bracketed tags, in file-name order
    pub tags: Vec<String>,
    /// Identification summary text
    pub summary: Option<String>,
    pub cover_small: Option<String>,
    pub cover_large: Option<String>,
    pub provider_ids: ExternalIds,
    pub provider_metadata: BTreeMap<ProviderKind, MetadataBlob>,
    /// True when the item groups several member files
    pub multi: bool,
    /// Ordered member files; a single-file item lists itself
    pub files: Vec<String>,
}

impl Item {
    /// True when no provider has identified this item
    pub fn is_unmatched(&self) -> bool {
        self.provider_ids.is_empty()
    }
}

/// How a scan run decides which items need (re)identification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    /// Only items without a catalog row
    #[default]
    Quick,
    /// Rows with no provider ids at all
    Unidentified,
    /// Rows missing at least one configured provider's id
    Partial,
    /// Every item
    Complete,
    /// Only platforms absent from the catalog
    #[serde(alias = "new-platforms")]
    NewPlatforms,
    /// Only explicitly selected catalog items
    Selected,
}

impl ScanMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanMode::Quick => "quick",
            ScanMode::Unidentified => "unidentified",
            ScanMode::Partial => "partial",
            ScanMode::Complete => "complete",
            ScanMode::NewPlatforms => "new_platforms",
            ScanMode::Selected => "selected",
        }
    }
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "quick" => Ok(ScanMode::Quick),
            "unidentified" => Ok(ScanMode::Unidentified),
            "partial" => Ok(ScanMode::Partial),
            "complete" => Ok(ScanMode::Complete),
            "new_platforms" => Ok(ScanMode::NewPlatforms),
            "selected" => Ok(ScanMode::Selected),
            other => Err(Error::InvalidInput(format!("Unknown scan mode: {}", other))),
        }
    }
}

/// Counters accumulated over one scan run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    pub platforms_scanned: usize,
    pub platforms_skipped: usize,
    pub items_identified: usize,
    pub items_matched: usize,
    pub items_unmatched: usize,
    pub items_failed: usize,
    pub items_purged: u64,
    pub platforms_purged: u64,
}
