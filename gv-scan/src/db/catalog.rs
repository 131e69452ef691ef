//! Catalog repository
//!
//! Platform and item rows keyed by filesystem identity: platforms by slug,
//! items by `(platform_id, file_name)`. External ids, metadata, tags and
//! member lists are stored as JSON text.

use async_trait::async_trait;
use gv_common::models::{Item, Platform};
use gv_common::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;

use crate::utils::retry_on_lock;

/// Catalog persistence used by the reconciliation engine
///
/// Not-found is `Ok(None)`. Upserts ignore the incoming `id` and return the
/// stored row.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn get_platform(&self, id: i64) -> Result<Option<Platform>>;

    async fn get_platform_by_slug(&self, slug: &str) -> Result<Option<Platform>>;

    async fn upsert_platform(&self, platform: &Platform) -> Result<Platform>;

    /// Delete platforms whose slug is not listed; returns the number deleted
    async fn purge_platforms(&self, existing_slugs: &[String]) -> Result<u64>;

    async fn get_item(&self, platform_id: i64, file_name: &str) -> Result<Option<Item>>;

    async fn upsert_item(&self, item: &Item) -> Result<Item>;

    /// Delete a platform's items whose file name is not listed
    async fn purge_items(&self, platform_id: i64, existing_file_names: &[String]) -> Result<u64>;
}

/// SQLite-backed catalog
#[derive(Clone)]
pub struct SqliteCatalog {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

const PLATFORM_COLUMNS: &str = r#"
    p.id, p.slug, p.fs_slug, p.name, p.provider_ids, p.logo_path,
    (SELECT COUNT(*) FROM items i WHERE i.platform_id = p.id) AS item_count
"#;

const ITEM_COLUMNS: &str = r#"
    id, platform_id, file_name, file_name_no_tags, name, file_extension,
    file_path, file_size, region, revision, tags, summary, cover_small,
    cover_large, provider_ids, provider_metadata, multi, files
"#;

impl SqliteCatalog {
    pub fn new(pool: SqlitePool, max_lock_wait_ms: u64) -> Self {
        Self {
            pool,
            max_lock_wait_ms,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn to_json<T: Serialize>(value: &T, what: &str) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| Error::Internal(format!("Failed to serialize {}: {}", what, e)))
}

fn from_json<T: DeserializeOwned>(raw: &str, what: &str) -> Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| Error::Internal(format!("Failed to deserialize {}: {}", what, e)))
}

fn platform_from_row(row: &SqliteRow) -> Result<Platform> {
    let provider_ids: String = row.try_get("provider_ids")?;
    Ok(Platform {
        id: row.try_get("id")?,
        slug: row.try_get("slug")?,
        fs_slug: row.try_get("fs_slug")?,
        name: row.try_get("name")?,
        provider_ids: from_json(&provider_ids, "platform provider_ids")?,
        logo_path: row.try_get("logo_path")?,
        item_count: row.try_get("item_count")?,
    })
}

fn item_from_row(row: &SqliteRow) -> Result<Item> {
    let tags: String = row.try_get("tags")?;
    let provider_ids: String = row.try_get("provider_ids")?;
    let provider_metadata: String = row.try_get("provider_metadata")?;
    let files: String = row.try_get("files")?;
    let file_size: i64 = row.try_get("file_size")?;

    Ok(Item {
        id: row.try_get("id")?,
        platform_id: row.try_get("platform_id")?,
        file_name: row.try_get("file_name")?,
        file_name_no_tags: row.try_get("file_name_no_tags")?,
        name: row.try_get("name")?,
        file_extension: row.try_get("file_extension")?,
        file_path: row.try_get("file_path")?,
        file_size: file_size.max(0) as u64,
        region: row.try_get("region")?,
        revision: row.try_get("revision")?,
        tags: from_json(&tags, "item tags")?,
        summary: row.try_get("summary")?,
        cover_small: row.try_get("cover_small")?,
        cover_large: row.try_get("cover_large")?,
        provider_ids: from_json(&provider_ids, "item provider_ids")?,
        provider_metadata: from_json(&provider_metadata, "item provider_metadata")?,
        multi: row.try_get::<i64, _>("multi")? != 0,
        files: from_json(&files, "item files")?,
    })
}

#[async_trait]
impl CatalogRepository for SqliteCatalog {
    async fn get_platform(&self, id: i64) -> Result<Option<Platform>> {
        let row = sqlx::query(&format!("SELECT {} FROM platforms p WHERE p.id = ?", PLATFORM_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(platform_from_row).transpose()
    }

    async fn get_platform_by_slug(&self, slug: &str) -> Result<Option<Platform>> {
        let row = sqlx::query(&format!("SELECT {} FROM platforms p WHERE p.slug = ?", PLATFORM_COLUMNS))
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(platform_from_row).transpose()
    }

    async fn upsert_platform(&self, platform: &Platform) -> Result<Platform> {
        let provider_ids = to_json(&platform.provider_ids, "platform provider_ids")?;

        retry_on_lock("upsert_platform", self.max_lock_wait_ms, || async {
            sqlx::query(
                r#"
                INSERT INTO platforms (slug, fs_slug, name, provider_ids, logo_path)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(slug) DO UPDATE SET
                    fs_slug = excluded.fs_slug,
                    name = excluded.name,
                    provider_ids = excluded.provider_ids,
                    logo_path = excluded.logo_path,
                    updated_at = CURRENT_TIMESTAMP
                "#,
            )
            .bind(&platform.slug)
            .bind(&platform.fs_slug)
            .bind(&platform.name)
            .bind(&provider_ids)
            .bind(&platform.logo_path)
            .execute(&self.pool)
            .await?;
            Ok::<_, Error>(())
        })
        .await?;

        self.get_platform_by_slug(&platform.slug)
            .await?
            .ok_or_else(|| Error::Internal(format!("Platform {} vanished after upsert", platform.slug)))
    }

    async fn purge_platforms(&self, existing_slugs: &[String]) -> Result<u64> {
        let keep: HashSet<&str> = existing_slugs.iter().map(String::as_str).collect();

        let stored: Vec<(i64, String)> = sqlx::query_as("SELECT id, slug FROM platforms")
            .fetch_all(&self.pool)
            .await?;
        let stale: Vec<i64> = stored
            .into_iter()
            .filter(|(_, slug)| !keep.contains(slug.as_str()))
            .map(|(id, _)| id)
            .collect();

        if stale.is_empty() {
            return Ok(0);
        }

        retry_on_lock("purge_platforms", self.max_lock_wait_ms, || async {
            let mut tx = self.pool.begin().await?;
            let mut deleted = 0u64;
            for id in &stale {
                // Items first so the purge holds without foreign key enforcement
                sqlx::query("DELETE FROM items WHERE platform_id = ?")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                deleted += sqlx::query("DELETE FROM platforms WHERE id = ?")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
            }
            tx.commit().await?;
            Ok::<_, Error>(deleted)
        })
        .await
    }

    async fn get_item(&self, platform_id: i64, file_name: &str) -> Result<Option<Item>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM items WHERE platform_id = ? AND file_name = ?",
            ITEM_COLUMNS
        ))
        .bind(platform_id)
        .bind(file_name)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(item_from_row).transpose()
    }

    async fn upsert_item(&self, item: &Item) -> Result<Item> {
        let tags = to_json(&item.tags, "item tags")?;
        let provider_ids = to_json(&item.provider_ids, "item provider_ids")?;
        let provider_metadata = to_json(&item.provider_metadata, "item provider_metadata")?;
        let files = to_json(&item.files, "item files")?;
        let file_size = i64::try_from(item.file_size).unwrap_or(i64::MAX);

        retry_on_lock("upsert_item", self.max_lock_wait_ms, || async {
            sqlx::query(
                r#"
                INSERT INTO items (
                    platform_id, file_name, file_name_no_tags, name, file_extension,
                    file_path, file_size, region, revision, tags, summary,
                    cover_small, cover_large, provider_ids, provider_metadata, multi, files
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(platform_id, file_name) DO UPDATE SET
                    file_name_no_tags = excluded.file_name_no_tags,
                    name = excluded.name,
                    file_extension = excluded.file_extension,
                    file_path = excluded.file_path,
                    file_size = excluded.file_size,
                    region = excluded.region,
                    revision = excluded.revision,
                    tags = excluded.tags,
                    summary = excluded.summary,
                    cover_small = excluded.cover_small,
                    cover_large = excluded.cover_large,
                    provider_ids = excluded.provider_ids,
                    provider_metadata = excluded.provider_metadata,
                    multi = excluded.multi,
                    files = excluded.files,
                    updated_at = CURRENT_TIMESTAMP
                "#,
            )
            .bind(item.platform_id)
            .bind(&item.file_name)
            .bind(&item.file_name_no_tags)
            .bind(&item.name)
            .bind(&item.file_extension)
            .bind(&item.file_path)
            .bind(file_size)
            .bind(&item.region)
            .bind(&item.revision)
            .bind(&tags)
            .bind(&item.summary)
            .bind(&item.cover_small)
            .bind(&item.cover_large)
            .bind(&provider_ids)
            .bind(&provider_metadata)
            .bind(item.multi)
            .bind(&files)
            .execute(&self.pool)
            .await?;
            Ok::<_, Error>(())
        })
        .await?;

        self.get_item(item.platform_id, &item.file_name)
            .await?
            .ok_or_else(|| Error::Internal(format!("Item {} vanished after upsert", item.file_name)))
    }

    async fn purge_items(&self, platform_id: i64, existing_file_names: &[String]) -> Result<u64> {
        let keep: HashSet<&str> = existing_file_names.iter().map(String::as_str).collect();

        let stored: Vec<(i64, String)> =
            sqlx::query_as("SELECT id, file_name FROM items WHERE platform_id = ?")
                .bind(platform_id)
                .fetch_all(&self.pool)
                .await?;
        let stale: Vec<i64> = stored
            .into_iter()
            .filter(|(_, name)| !keep.contains(name.as_str()))
            .map(|(id, _)| id)
            .collect();

        if stale.is_empty() {
            return Ok(0);
        }

        retry_on_lock("purge_items", self.max_lock_wait_ms, || async {
            let mut tx = self.pool.begin().await?;
            let mut deleted = 0u64;
            for id in &stale {
                deleted += sqlx::query("DELETE FROM items WHERE id = ?")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
            }
            tx.commit().await?;
            Ok::<_, Error>(deleted)
        })
        .await
    }
}
