//! Provider credential resolution for gv-scan
//!
//! Credentials resolve with Environment → TOML priority. A provider whose
//! credentials are missing is left out of the provider set; a scan with no
//! providers still inventories and purges but never matches.

use gv_common::config::TomlConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::providers::{IgdbProvider, MobyGamesProvider, ProviderSet, TgdbProvider};

pub const IGDB_CLIENT_ID_ENV: &str = "GV_IGDB_CLIENT_ID";
pub const IGDB_CLIENT_SECRET_ENV: &str = "GV_IGDB_CLIENT_SECRET";
pub const MOBYGAMES_API_KEY_ENV: &str = "GV_MOBYGAMES_API_KEY";
pub const TGDB_API_KEY_ENV: &str = "GV_TGDB_API_KEY";

/// Where a credential came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Environment,
    Toml,
}

/// Validate a credential (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// Resolve one credential from `env_var`, then the TOML value
pub fn resolve_credential(
    label: &str,
    env_var: &str,
    toml_value: Option<&str>,
) -> Option<(String, CredentialSource)> {
    let env_value = std::env::var(env_var).ok().filter(|v| is_valid_key(v));
    let toml_value = toml_value.filter(|v| is_valid_key(v));

    if env_value.is_some() && toml_value.is_some() {
        warn!(
            "{} found in both {} and TOML config. Using environment (highest priority).",
            label, env_var
        );
    }

    if let Some(value) = env_value {
        info!("{} loaded from environment variable", label);
        return Some((value, CredentialSource::Environment));
    }

    if let Some(value) = toml_value {
        info!("{} loaded from TOML config", label);
        return Some((value.to_string(), CredentialSource::Toml));
    }

    None
}

/// Build the configured provider set: IGDB, MobyGames, TheGamesDB
pub fn build_providers(config: &TomlConfig) -> ProviderSet {
    let timeout = Duration::from_secs(config.scan.provider_timeout_secs.max(1));
    let mut providers: ProviderSet = Vec::new();

    let igdb = &config.providers.igdb;
    let client_id = resolve_credential("IGDB client id", IGDB_CLIENT_ID_ENV, igdb.client_id.as_deref());
    let client_secret = resolve_credential(
        "IGDB client secret",
        IGDB_CLIENT_SECRET_ENV,
        igdb.client_secret.as_deref(),
    );
    match (client_id, client_secret) {
        (Some((id, _)), Some((secret, _))) => match IgdbProvider::new(id, secret, timeout) {
            Ok(provider) => providers.push(Arc::new(provider)),
            Err(e) => warn!("IGDB provider disabled: {}", e),
        },
        (None, None) => info!("IGDB credentials not configured, provider disabled"),
        _ => warn!(
            "IGDB needs both {} and {}, provider disabled",
            IGDB_CLIENT_ID_ENV, IGDB_CLIENT_SECRET_ENV
        ),
    }

    let moby_key = resolve_credential(
        "MobyGames API key",
        MOBYGAMES_API_KEY_ENV,
        config.providers.mobygames.api_key.as_deref(),
    );
    match moby_key {
        Some((key, _)) => match MobyGamesProvider::new(key, timeout) {
            Ok(provider) => providers.push(Arc::new(provider)),
            Err(e) => warn!("MobyGames provider disabled: {}", e),
        },
        None => info!("MobyGames API key not configured, provider disabled"),
    }

    let tgdb_key = resolve_credential(
        "TheGamesDB API key",
        TGDB_API_KEY_ENV,
        config.providers.tgdb.api_key.as_deref(),
    );
    match tgdb_key {
        Some((key, _)) => match TgdbProvider::new(key, timeout) {
            Ok(provider) => providers.push(Arc::new(provider)),
            Err(e) => warn!("TheGamesDB provider disabled: {}", e),
        },
        None => info!("TheGamesDB API key not configured, provider disabled"),
    }

    if providers.is_empty() {
        warn!("No metadata providers configured; scans will leave items unmatched");
    }

    providers
}
