//! In-memory fakes for the engine's injected capabilities
//!
//! Each fake records the calls it receives so tests can assert on side
//! effects (purge calls in particular) as well as on the final catalog.

use async_trait::async_trait;
use gv_common::events::ScanEvent;
use gv_common::models::{Item, Platform, ProviderKind};
use gv_common::{Error, Result};
use gv_scan::db::CatalogRepository;
use gv_scan::providers::{MetadataProvider, PlatformMatch, ProviderError, ProviderMatch};
use gv_scan::services::{FilesystemInventory, FsItem, InventoryError};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Catalog
// ============================================================================

#[derive(Default)]
struct CatalogState {
    platforms: Vec<Platform>,
    items: Vec<Item>,
    next_platform_id: i64,
    next_item_id: i64,
    platform_purges: Vec<Vec<String>>,
    item_purges: Vec<(i64, Vec<String>)>,
    failing_upserts: HashSet<String>,
    failing_item_purge: bool,
}

/// Catalog kept in memory
#[derive(Default)]
pub struct MemoryCatalog {
    state: Mutex<CatalogState>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a platform row, assigning its id
    pub fn seed_platform(&self, mut platform: Platform) -> Platform {
        let mut state = self.state.lock().unwrap();
        state.next_platform_id += 1;
        platform.id = state.next_platform_id;
        state.platforms.push(platform.clone());
        platform
    }

    /// Seed an item row, assigning its id
    pub fn seed_item(&self, mut item: Item) -> Item {
        let mut state = self.state.lock().unwrap();
        state.next_item_id += 1;
        item.id = state.next_item_id;
        state.items.push(item.clone());
        item
    }

    /// Make `upsert_item` fail for one file name
    pub fn fail_upsert_for(&self, file_name: &str) {
        self.state.lock().unwrap().failing_upserts.insert(file_name.to_string());
    }

    /// Make every `purge_items` call fail
    pub fn fail_item_purge(&self) {
        self.state.lock().unwrap().failing_item_purge = true;
    }

    pub fn platforms(&self) -> Vec<Platform> {
        self.state.lock().unwrap().platforms.clone()
    }

    pub fn platform(&self, slug: &str) -> Option<Platform> {
        self.platforms().into_iter().find(|p| p.slug == slug)
    }

    pub fn items(&self) -> Vec<Item> {
        self.state.lock().unwrap().items.clone()
    }

    pub fn items_for(&self, slug: &str) -> Vec<Item> {
        let Some(platform) = self.platform(slug) else {
            return Vec::new();
        };
        let mut items: Vec<Item> = self
            .items()
            .into_iter()
            .filter(|i| i.platform_id == platform.id)
            .collect();
        items.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        items
    }

    pub fn item(&self, slug: &str, file_name: &str) -> Option<Item> {
        self.items_for(slug).into_iter().find(|i| i.file_name == file_name)
    }

    pub fn platform_purge_calls(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().platform_purges.clone()
    }

    pub fn item_purge_calls(&self) -> Vec<(i64, Vec<String>)> {
        self.state.lock().unwrap().item_purges.clone()
    }

    pub fn purge_call_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.platform_purges.len() + state.item_purges.len()
    }

    fn with_count(state: &CatalogState, mut platform: Platform) -> Platform {
        platform.item_count = state
            .items
            .iter()
            .filter(|i| i.platform_id == platform.id)
            .count() as i64;
        platform
    }
}

#[async_trait]
impl CatalogRepository for MemoryCatalog {
    async fn get_platform(&self, id: i64) -> Result<Option<Platform>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .platforms
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .map(|p| Self::with_count(&state, p)))
    }

    async fn get_platform_by_slug(&self, slug: &str) -> Result<Option<Platform>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .platforms
            .iter()
            .find(|p| p.slug == slug)
            .cloned()
            .map(|p| Self::with_count(&state, p)))
    }

    async fn upsert_platform(&self, platform: &Platform) -> Result<Platform> {
        let mut state = self.state.lock().unwrap();
        let position = state.platforms.iter().position(|p| p.slug == platform.slug);
        let stored = match position {
            Some(index) => {
                let stored = Platform {
                    id: state.platforms[index].id,
                    ..platform.clone()
                };
                state.platforms[index] = stored.clone();
                stored
            }
            None => {
                state.next_platform_id += 1;
                let stored = Platform {
                    id: state.next_platform_id,
                    ..platform.clone()
                };
                state.platforms.push(stored.clone());
                stored
            }
        };
        Ok(Self::with_count(&state, stored))
    }

    async fn purge_platforms(&self, existing_slugs: &[String]) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        state.platform_purges.push(existing_slugs.to_vec());

        let stale: HashSet<i64> = state
            .platforms
            .iter()
            .filter(|p| !existing_slugs.contains(&p.slug))
            .map(|p| p.id)
            .collect();
        state.items.retain(|i| !stale.contains(&i.platform_id));
        state.platforms.retain(|p| !stale.contains(&p.id));
        Ok(stale.len() as u64)
    }

    async fn get_item(&self, platform_id: i64, file_name: &str) -> Result<Option<Item>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .items
            .iter()
            .find(|i| i.platform_id == platform_id && i.file_name == file_name)
            .cloned())
    }

    async fn upsert_item(&self, item: &Item) -> Result<Item> {
        let mut state = self.state.lock().unwrap();
        if state.failing_upserts.contains(&item.file_name) {
            return Err(Error::Internal("disk I/O error".to_string()));
        }

        let position = state
            .items
            .iter()
            .position(|i| i.platform_id == item.platform_id && i.file_name == item.file_name);
        let stored = match position {
            Some(index) => Item {
                id: state.items[index].id,
                ..item.clone()
            },
            None => {
                state.next_item_id += 1;
                Item {
                    id: state.next_item_id,
                    ..item.clone()
                }
            }
        };
        match position {
            Some(index) => state.items[index] = stored.clone(),
            None => state.items.push(stored.clone()),
        }
        Ok(stored)
    }

    async fn purge_items(&self, platform_id: i64, existing_file_names: &[String]) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        state.item_purges.push((platform_id, existing_file_names.to_vec()));
        if state.failing_item_purge {
            return Err(Error::Internal("disk I/O error".to_string()));
        }

        let before = state.items.len();
        state
            .items
            .retain(|i| i.platform_id != platform_id || existing_file_names.contains(&i.file_name));
        Ok((before - state.items.len()) as u64)
    }
}

// ============================================================================
// Inventory
// ============================================================================

/// Library listing kept in memory
///
/// A platform with no files answers `NoItemsFound`. An entry ending in `/`
/// is listed as a multi-file directory.
#[derive(Default)]
pub struct StaticInventory {
    platforms: Mutex<Vec<(String, Vec<String>)>>,
    broken: Mutex<Option<String>>,
    lost_platforms: Mutex<HashSet<String>>,
}

impl StaticInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_platform(self, slug: &str, files: &[&str]) -> Self {
        self.set_platform(slug, files);
        self
    }

    /// Replace or add a platform listing
    pub fn set_platform(&self, slug: &str, files: &[&str]) {
        let mut platforms = self.platforms.lock().unwrap();
        let files: Vec<String> = files.iter().map(|f| f.to_string()).collect();
        match platforms.iter_mut().find(|(s, _)| s == slug) {
            Some(entry) => entry.1 = files,
            None => platforms.push((slug.to_string(), files)),
        }
        platforms.sort_by(|a, b| a.0.cmp(&b.0));
    }

    pub fn remove_platform(&self, slug: &str) {
        self.platforms.lock().unwrap().retain(|(s, _)| s != slug);
    }

    /// Make `get_platforms` fail with a folder structure error
    pub fn break_layout(&self, detail: &str) {
        *self.broken.lock().unwrap() = Some(detail.to_string());
    }

    /// Make `get_items` fail with a folder structure error for one platform
    pub fn lose_platform(&self, slug: &str) {
        self.lost_platforms.lock().unwrap().insert(slug.to_string());
    }
}

#[async_trait]
impl FilesystemInventory for StaticInventory {
    async fn get_platforms(&self) -> std::result::Result<Vec<String>, InventoryError> {
        if let Some(detail) = self.broken.lock().unwrap().clone() {
            return Err(InventoryError::FolderStructure(detail));
        }
        Ok(self.platforms.lock().unwrap().iter().map(|(s, _)| s.clone()).collect())
    }

    async fn get_items(&self, platform_slug: &str) -> std::result::Result<Vec<FsItem>, InventoryError> {
        if self.lost_platforms.lock().unwrap().contains(platform_slug) {
            return Err(InventoryError::FolderStructure(format!(
                "platform directory {} vanished",
                platform_slug
            )));
        }

        let platforms = self.platforms.lock().unwrap();
        let files = platforms
            .iter()
            .find(|(s, _)| s == platform_slug)
            .map(|(_, files)| files.clone())
            .unwrap_or_default();
        if files.is_empty() {
            return Err(InventoryError::NoItemsFound(platform_slug.to_string()));
        }

        let mut items: Vec<FsItem> = files
            .into_iter()
            .map(|file_name| match file_name.strip_suffix('/') {
                // Trailing slash marks a multi-file directory
                Some(dir) => FsItem {
                    file_name: dir.to_string(),
                    file_path: format!("roms/{}", platform_slug),
                    file_size: 6,
                    multi: true,
                    files: vec!["disc1.bin".to_string(), "disc2.bin".to_string()],
                },
                None => FsItem {
                    file_name,
                    file_path: format!("roms/{}", platform_slug),
                    file_size: 3,
                    multi: false,
                    files: Vec::new(),
                },
            })
            .collect();
        items.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(items)
    }
}

// ============================================================================
// Provider
// ============================================================================

/// Candidate with a cover and summary derived from its id
pub fn game(external_id: i64, name: &str) -> ProviderMatch {
    let metadata = match json!({"id": external_id, "name": name}) {
        serde_json::Value::Object(map) => map,
        _ => unreachable!(),
    };
    ProviderMatch {
        external_id,
        name: name.to_string(),
        rank: 0,
        cover_url: Some(format!("https://covers.test/{}.jpg", external_id)),
        summary: Some(format!("About {}", name)),
        slug: None,
        metadata,
    }
}

/// Provider that answers from fixed tables
pub struct ScriptedProvider {
    kind: ProviderKind,
    platforms: HashMap<String, PlatformMatch>,
    games: HashMap<String, Vec<ProviderMatch>>,
    by_id: HashMap<i64, ProviderMatch>,
    delay: Option<Duration>,
    panics: bool,
    unavailable: AtomicBool,
    cancel_on_search: Mutex<Option<CancellationToken>>,
    search_calls: Mutex<Vec<(String, i64)>>,
    get_by_id_calls: Mutex<Vec<i64>>,
}

impl ScriptedProvider {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            platforms: HashMap::new(),
            games: HashMap::new(),
            by_id: HashMap::new(),
            delay: None,
            panics: false,
            unavailable: AtomicBool::new(false),
            cancel_on_search: Mutex::new(None),
            search_calls: Mutex::new(Vec::new()),
            get_by_id_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_platform(mut self, fs_slug: &str, external_id: i64, name: &str) -> Self {
        self.platforms.insert(
            fs_slug.to_string(),
            PlatformMatch {
                external_id,
                name: name.to_string(),
            },
        );
        self
    }

    /// Answer `search(name, _)` with `candidates`
    pub fn with_search(mut self, name: &str, candidates: Vec<ProviderMatch>) -> Self {
        self.games.insert(name.to_string(), candidates);
        self
    }

    /// Answer `get_by_id` for the candidate's id
    pub fn with_game_by_id(mut self, candidate: ProviderMatch) -> Self {
        self.by_id.insert(candidate.external_id, candidate);
        self
    }

    /// Sleep before answering every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Panic inside `search`
    pub fn panicking(mut self) -> Self {
        self.panics = true;
        self
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Cancel `token` from inside the first `search` call
    pub fn cancel_on_search(&self, token: CancellationToken) {
        *self.cancel_on_search.lock().unwrap() = Some(token);
    }

    pub fn search_calls(&self) -> Vec<(String, i64)> {
        self.search_calls.lock().unwrap().clone()
    }

    pub fn get_by_id_calls(&self) -> Vec<i64> {
        self.get_by_id_calls.lock().unwrap().clone()
    }

    async fn pause(&self) -> std::result::Result<(), ProviderError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("rate limited".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataProvider for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn identify_platform(
        &self,
        fs_slug: &str,
    ) -> std::result::Result<Option<PlatformMatch>, ProviderError> {
        self.pause().await?;
        Ok(self.platforms.get(fs_slug).cloned())
    }

    async fn search(
        &self,
        name: &str,
        platform_external_id: i64,
    ) -> std::result::Result<Vec<ProviderMatch>, ProviderError> {
        self.search_calls
            .lock()
            .unwrap()
            .push((name.to_string(), platform_external_id));
        if let Some(token) = self.cancel_on_search.lock().unwrap().take() {
            token.cancel();
        }
        if self.panics {
            panic!("scripted provider failure");
        }
        self.pause().await?;
        Ok(self.games.get(name).cloned().unwrap_or_default())
    }

    async fn get_by_id(&self, external_id: i64) -> std::result::Result<ProviderMatch, ProviderError> {
        self.get_by_id_calls.lock().unwrap().push(external_id);
        self.pause().await?;
        self.by_id
            .get(&external_id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(format!("game {}", external_id)))
    }

    async fn get_cover_url(
        &self,
        candidate: &ProviderMatch,
    ) -> std::result::Result<Option<String>, ProviderError> {
        Ok(candidate.cover_url.clone())
    }
}

// ============================================================================
// Events
// ============================================================================

/// Collect events until the run's terminal event
pub async fn wait_for_terminal(rx: &mut broadcast::Receiver<ScanEvent>) -> Vec<ScanEvent> {
    let mut events = Vec::new();
    let collect = async {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let terminal = event.is_terminal();
                    events.push(event);
                    if terminal {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), collect)
        .await
        .expect("run did not finish within 10s");
    events
}
