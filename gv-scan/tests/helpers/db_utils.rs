//! Database and filesystem fixtures

use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;
use tempfile::TempDir;

/// Create a file-backed catalog in a temporary directory
///
/// Returns (TempDir, SqlitePool); TempDir must be kept alive for the
/// duration of the test.
pub async fn create_test_db() -> Result<(TempDir, SqlitePool)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test_gamevault.db");
    let pool = gv_common::db::init_database(&db_path).await?;
    Ok((temp_dir, pool))
}

/// Write a `roms/<platform>/<file>` library under `root`
///
/// Entries ending in `/` become directories (multi-file items); every other
/// entry is written as a small file.
pub fn write_library(root: &Path, platforms: &[(&str, &[&str])]) -> Result<()> {
    for (platform, entries) in platforms {
        let platform_dir = root.join("roms").join(platform);
        std::fs::create_dir_all(&platform_dir)?;

        for entry in *entries {
            let path = platform_dir.join(entry.trim_end_matches('/'));
            if entry.ends_with('/') {
                std::fs::create_dir_all(&path)?;
                std::fs::write(path.join("disc1.bin"), b"disc")?;
            } else {
                std::fs::write(&path, b"rom")?;
            }
        }
    }
    Ok(())
}
