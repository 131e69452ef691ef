//! Filesystem inventory
//!
//! Lists platform directories and the items inside them. Two library layouts
//! are recognised:
//! - `<root>/roms/<platform>/<items>` (selected when `<root>/roms` exists)
//! - `<root>/<platform>/roms/<items>`
//!
//! Every call re-reads the filesystem; nothing is cached between calls.
//! Listing is blocking I/O and runs on the blocking thread pool.

use async_trait::async_trait;
use glob::Pattern;
use gv_common::config::ExclusionConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use walkdir::WalkDir;

/// Directory holding item files in both layouts
pub const ROMS_DIR: &str = "roms";

/// System files never treated as items
const IGNORED_NAMES: &[&str] = &["Thumbs.db", "desktop.ini", "$RECYCLE.BIN", "System Volume Information"];

/// Inventory errors
#[derive(Debug, Error)]
pub enum InventoryError {
    /// Library root missing or no supported layout observed (fatal for a run)
    #[error("{0}")]
    FolderStructure(String),

    /// Platform directory missing or empty (skips the platform)
    #[error("No items found for platform {0}")]
    NoItemsFound(String),
}

/// One logical item as observed on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsItem {
    /// File name, or container directory name for multi-file items
    pub file_name: String,
    /// Directory containing the item, relative to the library root
    pub file_path: String,
    /// Bytes, summed over member files
    pub file_size: u64,
    pub multi: bool,
    /// Ordered member files (relative to the container for multi-file items)
    pub files: Vec<String>,
}

/// Filesystem listing capability used by the reconciliation engine
#[async_trait]
pub trait FilesystemInventory: Send + Sync {
    /// Platform directory names, sorted; excluded platforms omitted
    async fn get_platforms(&self) -> Result<Vec<String>, InventoryError>;

    /// Items of one platform, sorted by file name
    async fn get_items(&self, platform_slug: &str) -> Result<Vec<FsItem>, InventoryError>;
}

/// Observed library layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryLayout {
    /// `<root>/roms/<platform>`
    RomsFirst,
    /// `<root>/<platform>/roms`
    PlatformFirst,
}

/// Compiled exclusion rules
#[derive(Debug, Clone, Default)]
pub struct Exclusions {
    platforms: Vec<Pattern>,
    single_file_extensions: HashSet<String>,
    single_file_names: Vec<Pattern>,
    multi_file_names: Vec<Pattern>,
}

impl Exclusions {
    /// Compile glob patterns from configuration
    pub fn from_config(config: &ExclusionConfig) -> gv_common::Result<Self> {
        Ok(Self {
            platforms: compile_patterns(&config.platforms)?,
            single_file_extensions: config
                .single_file_extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            single_file_names: compile_patterns(&config.single_file_names)?,
            multi_file_names: compile_patterns(&config.multi_file_names)?,
        })
    }

    pub fn excludes_platform(&self, name: &str) -> bool {
        self.platforms.iter().any(|p| p.matches(name))
    }

    pub fn excludes_single_file(&self, name: &str) -> bool {
        let extension = Path::new(name)
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase());
        if let Some(ext) = extension {
            if self.single_file_extensions.contains(&ext) {
                return true;
            }
        }
        self.single_file_names.iter().any(|p| p.matches(name))
    }

    pub fn excludes_multi_file(&self, name: &str) -> bool {
        self.multi_file_names.iter().any(|p| p.matches(name))
    }
}

fn compile_patterns(raw: &[String]) -> gv_common::Result<Vec<Pattern>> {
    raw.iter()
        .map(|p| {
            Pattern::new(p).map_err(|e| {
                gv_common::Error::Config(format!("Invalid exclusion pattern '{}': {}", p, e))
            })
        })
        .collect()
}

/// Inventory over a library root on the local filesystem
#[derive(Debug, Clone)]
pub struct LibraryInventory {
    root: PathBuf,
    exclusions: Arc<Exclusions>,
}

impl LibraryInventory {
    pub fn new(root: impl Into<PathBuf>, exclusions: Exclusions) -> Self {
        Self {
            root: root.into(),
            exclusions: Arc::new(exclusions),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Detect which supported layout the library root uses
    pub fn detect_layout(&self) -> Result<LibraryLayout, InventoryError> {
        if !self.root.is_dir() {
            return Err(InventoryError::FolderStructure(format!(
                "Library root not found: {}",
                self.root.display()
            )));
        }

        if self.root.join(ROMS_DIR).is_dir() {
            return Ok(LibraryLayout::RomsFirst);
        }

        let has_platform_dirs = list_visible_dirs(&self.root)
            .map_err(|e| folder_error(&self.root, e))?
            .iter()
            .any(|name| self.root.join(name).join(ROMS_DIR).is_dir());

        if has_platform_dirs {
            Ok(LibraryLayout::PlatformFirst)
        } else {
            Err(InventoryError::FolderStructure(format!(
                "Expected {root}/{roms}/<platform> or {root}/<platform>/{roms} under the library root",
                root = self.root.display(),
                roms = ROMS_DIR
            )))
        }
    }

    /// Blocking platform listing
    pub fn list_platforms(&self) -> Result<Vec<String>, InventoryError> {
        let mut platforms = match self.detect_layout()? {
            LibraryLayout::RomsFirst => {
                let roms = self.root.join(ROMS_DIR);
                list_visible_dirs(&roms).map_err(|e| folder_error(&roms, e))?
            }
            LibraryLayout::PlatformFirst => list_visible_dirs(&self.root)
                .map_err(|e| folder_error(&self.root, e))?
                .into_iter()
                .filter(|name| self.root.join(name).join(ROMS_DIR).is_dir())
                .collect(),
        };

        platforms.retain(|name| {
            let excluded = self.exclusions.excludes_platform(name);
            if excluded {
                tracing::debug!(platform = %name, "Platform excluded by configuration");
            }
            !excluded
        });
        platforms.sort();

        Ok(platforms)
    }

    /// Blocking item listing for one platform
    pub fn list_items(&self, platform_slug: &str) -> Result<Vec<FsItem>, InventoryError> {
        let layout = self.detect_layout()?;
        let relative_dir = match layout {
            LibraryLayout::RomsFirst => format!("{}/{}", ROMS_DIR, platform_slug),
            LibraryLayout::PlatformFirst => format!("{}/{}", platform_slug, ROMS_DIR),
        };
        let items_dir = self.root.join(&relative_dir);

        let entries = fs::read_dir(&items_dir)
            .map_err(|_| InventoryError::NoItemsFound(platform_slug.to_string()))?;

        let mut items = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(platform = %platform_slug, "Error accessing entry: {}", e);
                    continue;
                }
            };

            let name = entry.file_name().to_string_lossy().to_string();
            if is_ignored(&name) {
                continue;
            }

            let path = entry.path();
            if path.is_file() {
                if self.exclusions.excludes_single_file(&name) {
                    tracing::debug!(platform = %platform_slug, file = %name, "File excluded");
                    continue;
                }
                let file_size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                items.push(FsItem {
                    file_name: name.clone(),
                    file_path: relative_dir.clone(),
                    file_size,
                    multi: false,
                    files: vec![name],
                });
            } else if path.is_dir() {
                if self.exclusions.excludes_multi_file(&name) {
                    tracing::debug!(platform = %platform_slug, dir = %name, "Directory excluded");
                    continue;
                }
                let (files, file_size) = collect_members(&path);
                if files.is_empty() {
                    tracing::debug!(platform = %platform_slug, dir = %name, "Skipping empty directory");
                    continue;
                }
                items.push(FsItem {
                    file_name: name,
                    file_path: relative_dir.clone(),
                    file_size,
                    multi: true,
                    files,
                });
            }
        }

        if items.is_empty() {
            return Err(InventoryError::NoItemsFound(platform_slug.to_string()));
        }

        items.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(items)
    }
}

#[async_trait]
impl FilesystemInventory for LibraryInventory {
    async fn get_platforms(&self) -> Result<Vec<String>, InventoryError> {
        let inventory = self.clone();
        tokio::task::spawn_blocking(move || inventory.list_platforms())
            .await
            .map_err(|e| InventoryError::FolderStructure(format!("Listing task failed: {}", e)))?
    }

    async fn get_items(&self, platform_slug: &str) -> Result<Vec<FsItem>, InventoryError> {
        let inventory = self.clone();
        let slug = platform_slug.to_string();
        tokio::task::spawn_blocking(move || inventory.list_items(&slug))
            .await
            .map_err(|_| InventoryError::NoItemsFound(platform_slug.to_string()))?
    }
}

fn is_ignored(name: &str) -> bool {
    name.starts_with('.') || IGNORED_NAMES.contains(&name)
}

fn folder_error(path: &Path, err: std::io::Error) -> InventoryError {
    InventoryError::FolderStructure(format!("Cannot read {}: {}", path.display(), err))
}

/// Visible sub-directory names of `dir`
fn list_visible_dirs(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if !is_ignored(&name) && entry.path().is_dir() {
            names.push(name);
        }
    }
    Ok(names)
}

/// Member files of a container directory (recursive, relative, sorted) and
/// their total size
fn collect_members(container: &Path) -> (Vec<String>, u64) {
    let mut files = Vec::new();
    let mut total_size = 0u64;

    let walker = WalkDir::new(container)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_ignored(&e.file_name().to_string_lossy()));

    for entry in walker {
        match entry {
            Ok(entry) if entry.file_type().is_file() => {
                let Ok(relative) = entry.path().strip_prefix(container) else {
                    continue;
                };
                let relative = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                total_size += entry.metadata().map(|m| m.len()).unwrap_or(0);
                files.push(relative);
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("Error accessing entry: {}", e);
            }
        }
    }

    files.sort();
    (files, total_size)
}
