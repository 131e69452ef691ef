//! Reconciliation engine
//!
//! Runs one scan: lists platforms, decides per item whether identification
//! is needed, calls the metadata providers, writes the catalog and finally
//! purges rows whose files or platform directories are gone.
//!
//! # Phases
//! `Inventorying → {Identifying → Matching → Persisting} per platform →
//! Purging`. The current phase is published through a [`PhaseTracker`] so
//! the coordinator can overlay it on the persisted run record.
//!
//! # Failure containment
//! - Provider unavailability and per-item persistence errors stay with the item
//! - A missing or empty platform directory skips the platform
//! - A failed item purge only aborts that platform's purge
//! - A folder structure error or cancellation ends the run without any purge

use chrono::Utc;
use gv_common::events::{EventBus, ScanEvent};
use gv_common::models::{Item, Platform, ProviderKind, ScanMode, ScanStats};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db::CatalogRepository;
use crate::models::{FailureReason, RunState, ScanRequest};
use crate::providers::{CoverSize, MetadataProvider, ProviderError, ProviderMatch, ProviderSet};
use crate::services::inventory::{FilesystemInventory, FsItem, InventoryError};
use crate::services::policy::{needs_identification, processes_platform, PolicyContext};
use crate::services::tag_parser::{parse_file_name, parse_name};

/// Live phase of the active run
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    tx: Arc<watch::Sender<RunState>>,
}

impl PhaseTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(RunState::Queued);
        Self { tx: Arc::new(tx) }
    }

    pub fn set(&self, state: RunState) {
        self.tx.send_replace(state);
    }

    pub fn current(&self) -> RunState {
        *self.tx.borrow()
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// How a run ended, as seen by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Done(ScanStats),
    Failed {
        reason: FailureReason,
        stats: ScanStats,
    },
}

/// Engine tuning
#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    /// Upper bound on each provider call
    pub provider_timeout: Duration,
    /// Platform directory name -> provider platform slug
    pub platform_bindings: HashMap<String, String>,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            provider_timeout: Duration::from_secs(30),
            platform_bindings: HashMap::new(),
        }
    }
}

/// Result of identifying one item against every configured provider
struct Identification {
    item: Item,
    matched: bool,
}

/// Scan/reconciliation engine
pub struct Reconciler {
    catalog: Arc<dyn CatalogRepository>,
    inventory: Arc<dyn FilesystemInventory>,
    providers: ProviderSet,
    event_bus: EventBus,
    settings: ReconcilerSettings,
}

impl Reconciler {
    pub fn new(
        catalog: Arc<dyn CatalogRepository>,
        inventory: Arc<dyn FilesystemInventory>,
        providers: ProviderSet,
        event_bus: EventBus,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            catalog,
            inventory,
            providers,
            event_bus,
            settings,
        }
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Normalized provider lookup slug for a platform directory
    pub fn fs_slug_for(&self, slug: &str) -> String {
        self.settings
            .platform_bindings
            .get(slug)
            .cloned()
            .unwrap_or_else(|| slug.to_lowercase())
    }

    /// Execute one scan run to completion, failure or cancellation
    pub async fn run(
        &self,
        run_id: Uuid,
        request: &ScanRequest,
        cancel: &CancellationToken,
        phase: &PhaseTracker,
    ) -> RunOutcome {
        let mut stats = ScanStats::default();

        phase.set(RunState::Inventorying);
        let fs_platforms = match self.inventory.get_platforms().await {
            Ok(platforms) => platforms,
            Err(e) => {
                tracing::error!(run_id = %run_id, "Library inventory failed: {}", e);
                return RunOutcome::Failed {
                    reason: FailureReason::FolderStructure(e.to_string()),
                    stats,
                };
            }
        };

        let platforms = self
            .platforms_to_scan(run_id, request, &fs_platforms, &mut stats)
            .await;
        let selected: HashSet<i64> = request.selected_ids.iter().copied().collect();
        let configured: Vec<ProviderKind> = self.providers.iter().map(|p| p.kind()).collect();

        tracing::info!(
            run_id = %run_id,
            mode = %request.mode,
            platforms = platforms.len(),
            providers = configured.len(),
            "Scan started"
        );

        for slug in &platforms {
            if cancel.is_cancelled() {
                return self.cancelled(run_id, stats);
            }

            match self
                .scan_platform(run_id, slug, request.mode, &selected, &configured, cancel, phase, &mut stats)
                .await
            {
                Ok(()) => {}
                Err(PlatformAbort::Cancelled) => return self.cancelled(run_id, stats),
                Err(PlatformAbort::FolderStructure(detail)) => {
                    tracing::error!(run_id = %run_id, platform = %slug, "Library layout lost: {}", detail);
                    return RunOutcome::Failed {
                        reason: FailureReason::FolderStructure(detail),
                        stats,
                    };
                }
            }
        }

        if cancel.is_cancelled() {
            return self.cancelled(run_id, stats);
        }

        phase.set(RunState::Purging);
        match self.catalog.purge_platforms(&fs_platforms).await {
            Ok(purged) => {
                stats.platforms_purged = purged;
                if purged > 0 {
                    tracing::info!(run_id = %run_id, purged, "Purged platforms no longer on disk");
                }
            }
            Err(e) => {
                tracing::error!(run_id = %run_id, "Platform purge aborted: {}", e);
            }
        }

        tracing::info!(run_id = %run_id, ?stats, "Scan finished");
        RunOutcome::Done(stats)
    }

    /// Resolve requested catalog platform ids to the directory slugs to scan
    ///
    /// Ids that are unknown to the catalog, or whose directory is gone from
    /// disk, are skipped with a warning. The result keeps disk order.
    async fn platforms_to_scan(
        &self,
        run_id: Uuid,
        request: &ScanRequest,
        fs_platforms: &[String],
        stats: &mut ScanStats,
    ) -> Vec<String> {
        if request.platform_ids.is_empty() {
            return fs_platforms.to_vec();
        }

        let mut wanted: HashSet<String> = HashSet::new();
        for &platform_id in &request.platform_ids {
            match self.catalog.get_platform(platform_id).await {
                Ok(Some(platform)) if fs_platforms.contains(&platform.slug) => {
                    wanted.insert(platform.slug);
                }
                Ok(Some(platform)) => {
                    tracing::warn!(
                        run_id = %run_id,
                        platform_id,
                        platform = %platform.slug,
                        "Requested platform not found on disk"
                    );
                    stats.platforms_skipped += 1;
                }
                Ok(None) => {
                    tracing::warn!(run_id = %run_id, platform_id, "Requested platform not in catalog");
                    stats.platforms_skipped += 1;
                }
                Err(e) => {
                    tracing::warn!(run_id = %run_id, platform_id, "Failed to look up requested platform: {}", e);
                    stats.platforms_skipped += 1;
                }
            }
        }

        fs_platforms
            .iter()
            .filter(|slug| wanted.contains(*slug))
            .cloned()
            .collect()
    }

    fn cancelled(&self, run_id: Uuid, stats: ScanStats) -> RunOutcome {
        tracing::info!(run_id = %run_id, "Scan cancelled");
        self.event_bus.emit_lossy(ScanEvent::ScanCancelled {
            run_id,
            timestamp: Utc::now(),
        });
        RunOutcome::Failed {
            reason: FailureReason::Cancelled,
            stats,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn scan_platform(
        &self,
        run_id: Uuid,
        slug: &str,
        mode: ScanMode,
        selected: &HashSet<i64>,
        configured: &[ProviderKind],
        cancel: &CancellationToken,
        phase: &PhaseTracker,
        stats: &mut ScanStats,
    ) -> Result<(), PlatformAbort> {
        phase.set(RunState::Identifying);

        let existing = match self.catalog.get_platform_by_slug(slug).await {
            Ok(existing) => existing,
            Err(e) => {
                tracing::error!(run_id = %run_id, platform = %slug, "Failed to read platform: {}", e);
                stats.platforms_skipped += 1;
                return Ok(());
            }
        };
        let platform_is_new = existing.is_none();

        if !processes_platform(mode, platform_is_new) {
            tracing::debug!(run_id = %run_id, platform = %slug, "Platform already cataloged, skipping");
            stats.platforms_skipped += 1;
            return Ok(());
        }

        phase.set(RunState::Matching);
        let candidate = self.identify_platform(slug, existing.as_ref()).await;

        phase.set(RunState::Persisting);
        let platform = match self.catalog.upsert_platform(&candidate).await {
            Ok(platform) => platform,
            Err(e) => {
                tracing::error!(run_id = %run_id, platform = %slug, "Failed to store platform: {}", e);
                stats.platforms_skipped += 1;
                return Ok(());
            }
        };
        self.event_bus.emit_lossy(ScanEvent::ScanningPlatform {
            run_id,
            platform: platform.clone(),
            timestamp: Utc::now(),
        });

        let listing = match self.inventory.get_items(slug).await {
            Ok(items) => items,
            Err(InventoryError::NoItemsFound(_)) => {
                tracing::warn!(run_id = %run_id, platform = %slug, "No items found, skipping platform");
                stats.platforms_skipped += 1;
                return Ok(());
            }
            Err(InventoryError::FolderStructure(detail)) => {
                return Err(PlatformAbort::FolderStructure(detail));
            }
        };
        stats.platforms_scanned += 1;

        let ctx = PolicyContext {
            mode,
            platform_is_new,
            selected_ids: selected,
            configured_providers: configured,
        };

        for fs_item in &listing {
            if cancel.is_cancelled() {
                return Err(PlatformAbort::Cancelled);
            }
            phase.set(RunState::Identifying);
            self.scan_item(run_id, &platform, fs_item, &ctx, phase, stats).await;
        }

        if cancel.is_cancelled() {
            return Err(PlatformAbort::Cancelled);
        }

        phase.set(RunState::Purging);
        let file_names: Vec<String> = listing.iter().map(|i| i.file_name.clone()).collect();
        match self.catalog.purge_items(platform.id, &file_names).await {
            Ok(purged) => {
                stats.items_purged += purged;
                if purged > 0 {
                    tracing::info!(run_id = %run_id, platform = %slug, purged, "Purged items no longer on disk");
                }
            }
            Err(e) => {
                tracing::error!(run_id = %run_id, platform = %slug, "Item purge aborted: {}", e);
            }
        }

        Ok(())
    }

    async fn scan_item(
        &self,
        run_id: Uuid,
        platform: &Platform,
        fs_item: &FsItem,
        ctx: &PolicyContext<'_>,
        phase: &PhaseTracker,
        stats: &mut ScanStats,
    ) {
        let existing = match self.catalog.get_item(platform.id, &fs_item.file_name).await {
            Ok(existing) => existing,
            Err(e) => {
                tracing::error!(
                    run_id = %run_id,
                    platform = %platform.slug,
                    file = %fs_item.file_name,
                    "Failed to read item: {}", e
                );
                stats.items_failed += 1;
                return;
            }
        };

        if !needs_identification(ctx, existing.as_ref()) {
            return;
        }

        phase.set(RunState::Matching);
        let identification = self
            .identify_item(platform, fs_item, existing.as_ref(), ctx.mode)
            .await;

        phase.set(RunState::Persisting);
        match self.catalog.upsert_item(&identification.item).await {
            Ok(stored) => {
                stats.items_identified += 1;
                if identification.matched {
                    stats.items_matched += 1;
                } else {
                    stats.items_unmatched += 1;
                }
                self.event_bus.emit_lossy(ScanEvent::ScanningItem {
                    run_id,
                    platform_name: platform.name.clone(),
                    platform_slug: platform.slug.clone(),
                    item: stored,
                    timestamp: Utc::now(),
                });
            }
            Err(e) => {
                tracing::error!(
                    run_id = %run_id,
                    platform = %platform.slug,
                    file = %fs_item.file_name,
                    "Failed to store item: {}", e
                );
                stats.items_failed += 1;
            }
        }
    }

    /// Platform row to upsert, with provider ids refreshed where possible
    async fn identify_platform(&self, slug: &str, existing: Option<&Platform>) -> Platform {
        let fs_slug = self.fs_slug_for(slug);
        let mut platform = match existing {
            Some(existing) => Platform {
                fs_slug: fs_slug.clone(),
                ..existing.clone()
            },
            None => Platform::new(slug, fs_slug.clone(), slug),
        };

        let mut named = false;
        for provider in &self.providers {
            let kind = provider.kind();
            match self.bounded(provider.identify_platform(&fs_slug)).await {
                Ok(Some(found)) => {
                    platform.provider_ids.set(kind, found.external_id);
                    if !named {
                        platform.name = found.name;
                        named = true;
                    }
                }
                Ok(None) => {
                    tracing::debug!(platform = %slug, provider = %kind, "Platform not known to provider");
                }
                Err(e) => {
                    tracing::warn!(platform = %slug, provider = %kind, "Platform lookup failed: {}", e);
                }
            }
        }

        platform
    }

    /// Build the item row for one listing entry, querying each provider
    /// that knows the platform
    async fn identify_item(
        &self,
        platform: &Platform,
        fs_item: &FsItem,
        existing: Option<&Item>,
        mode: ScanMode,
    ) -> Identification {
        let parsed = if fs_item.multi {
            parse_name(&fs_item.file_name)
        } else {
            parse_file_name(&fs_item.file_name)
        };

        let mut item = existing.cloned().unwrap_or_else(|| Item {
            id: 0,
            platform_id: platform.id,
            file_name: fs_item.file_name.clone(),
            file_name_no_tags: String::new(),
            name: parsed.name.clone(),
            file_extension: String::new(),
            file_path: String::new(),
            file_size: 0,
            region: None,
            revision: None,
            tags: Vec::new(),
            summary: None,
            cover_small: None,
            cover_large: None,
            provider_ids: Default::default(),
            provider_metadata: Default::default(),
            multi: false,
            files: Vec::new(),
        });

        item.platform_id = platform.id;
        item.file_name_no_tags = parsed.name_no_tags.clone();
        item.file_extension = parsed.extension.clone();
        item.file_path = fs_item.file_path.clone();
        item.file_size = fs_item.file_size;
        item.region = parsed.region.clone();
        item.revision = parsed.revision.clone();
        item.tags = parsed.tags.clone();
        item.multi = fs_item.multi;
        item.files = fs_item.files.clone();

        let refresh_known = matches!(mode, ScanMode::Complete | ScanMode::Partial | ScanMode::Selected);
        let mut matched = false;
        let mut covered = false;

        for provider in &self.providers {
            let kind = provider.kind();
            let Some(platform_external_id) = platform.provider_ids.get(kind) else {
                continue;
            };

            let known_id = existing
                .and_then(|e| e.provider_ids.get(kind))
                .filter(|_| refresh_known);

            let candidate = match self
                .lookup(provider.as_ref(), &parsed.name, platform_external_id, known_id)
                .await
            {
                Ok(Some(candidate)) => candidate,
                Ok(None) => {
                    tracing::debug!(file = %fs_item.file_name, provider = %kind, "No match");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(file = %fs_item.file_name, provider = %kind, "Provider lookup failed: {}", e);
                    continue;
                }
            };

            item.provider_ids.set(kind, candidate.external_id);
            item.provider_metadata.insert(kind, candidate.metadata.clone());

            if !matched {
                item.name = candidate.name.clone();
                if candidate.summary.is_some() {
                    item.summary = candidate.summary.clone();
                }
                matched = true;
            }

            if !covered {
                match self.bounded(provider.get_cover_url(&candidate)).await {
                    Ok(Some(url)) => {
                        item.cover_large = Some(provider.cover_variant(&url, CoverSize::Large));
                        item.cover_small = Some(provider.cover_variant(&url, CoverSize::Small));
                        covered = true;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(file = %fs_item.file_name, provider = %kind, "Cover lookup failed: {}", e);
                    }
                }
            }
        }

        Identification { item, matched }
    }

    /// Refresh a known id through `get_by_id`, falling back to a name search
    async fn lookup(
        &self,
        provider: &dyn MetadataProvider,
        name: &str,
        platform_external_id: i64,
        known_id: Option<i64>,
    ) -> Result<Option<ProviderMatch>, ProviderError> {
        if let Some(id) = known_id {
            match self.bounded(provider.get_by_id(id)).await {
                Ok(found) => return Ok(Some(found)),
                Err(ProviderError::NotFound(_)) => {
                    tracing::debug!(provider = %provider.kind(), id, "Known id gone, searching by name");
                }
                Err(e) => return Err(e),
            }
        }

        let candidates = self.bounded(provider.search(name, platform_external_id)).await?;
        Ok(candidates.into_iter().next())
    }

    /// Bound a provider call by the configured timeout
    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, ProviderError>>,
    ) -> Result<T, ProviderError> {
        match tokio::time::timeout(self.settings.provider_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Unavailable(format!(
                "timed out after {:?}",
                self.settings.provider_timeout
            ))),
        }
    }
}

/// Reasons a platform's processing ends the whole run
enum PlatformAbort {
    Cancelled,
    FolderStructure(String),
}
