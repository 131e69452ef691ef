//! TheGamesDB provider
//!
//! API-key authenticated REST client for `https://api.thegamesdb.net/v1`.
//! Game lookups ask for the `overview` field and the `boxart` include; the
//! front box art, when present, becomes the cover.

use super::{check_status, slugify, CoverSize, MetadataProvider, PlatformMatch, ProviderError, ProviderMatch};
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use gv_common::models::{MetadataBlob, ProviderKind};
use serde::Deserialize;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::time::Duration;

const TGDB_BASE_URL: &str = "https://api.thegamesdb.net/v1";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
    #[serde(default)]
    include: Option<Include>,
}

#[derive(Debug, Deserialize)]
struct GamesData {
    #[serde(default)]
    games: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct TgdbGame {
    id: i64,
    game_title: String,
    #[serde(default)]
    overview: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Include {
    #[serde(default)]
    boxart: Option<Boxart>,
}

#[derive(Debug, Deserialize)]
struct Boxart {
    base_url: BoxartBase,
    /// Images keyed by game id
    #[serde(default)]
    data: HashMap<String, Vec<BoxartImage>>,
}

#[derive(Debug, Deserialize)]
struct BoxartBase {
    original: String,
}

#[derive(Debug, Deserialize)]
struct BoxartImage {
    #[serde(default)]
    side: Option<String>,
    filename: String,
}

#[derive(Debug, Deserialize)]
struct PlatformsData {
    #[serde(default)]
    platforms: HashMap<String, TgdbPlatform>,
}

#[derive(Debug, Deserialize)]
struct TgdbPlatform {
    id: i64,
    name: String,
    #[serde(default)]
    alias: Option<String>,
}

/// TheGamesDB metadata provider
pub struct TgdbProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    /// Keys carry a monthly allowance, keep bursts small
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl TgdbProvider {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .user_agent(concat!("gamevault/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::Unavailable(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: TGDB_BASE_URL.to_string(),
            rate_limiter: RateLimiter::direct(Quota::per_second(NonZeroU32::new(2).expect("2 is non-zero"))),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(url = %url, "Querying TheGamesDB");

        let response = self
            .client
            .get(&url)
            .query(&[("apikey", self.api_key.as_str())])
            .query(params)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("TheGamesDB request failed: {}", e)))?;

        check_status(response.status(), path)?;

        response
            .json()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("TheGamesDB payload: {}", e)))
    }

    async fn games(&self, path: &str, params: &[(&str, String)]) -> Result<Vec<ProviderMatch>, ProviderError> {
        let mut params = params.to_vec();
        params.push(("fields", "overview".to_string()));
        params.push(("include", "boxart".to_string()));

        let envelope: Envelope<GamesData> = self.get(path, &params).await?;
        let include = envelope.include.unwrap_or_default();

        envelope
            .data
            .games
            .into_iter()
            .enumerate()
            .map(|(rank, raw)| to_match(raw, rank as u32, include.boxart.as_ref()))
            .collect()
    }
}

/// URL of the front box art for a game, if the include carries one
fn front_cover(boxart: &Boxart, game_id: i64) -> Option<String> {
    boxart
        .data
        .get(&game_id.to_string())?
        .iter()
        .find(|image| image.side.as_deref() == Some("front"))
        .map(|image| format!("{}{}", boxart.base_url.original, image.filename))
}

fn to_match(raw: serde_json::Value, rank: u32, boxart: Option<&Boxart>) -> Result<ProviderMatch, ProviderError> {
    let game: TgdbGame = serde_json::from_value(raw.clone())
        .map_err(|e| ProviderError::Unavailable(format!("TheGamesDB game payload: {}", e)))?;
    let metadata: MetadataBlob = match raw {
        serde_json::Value::Object(map) => map,
        _ => MetadataBlob::new(),
    };

    Ok(ProviderMatch {
        external_id: game.id,
        slug: Some(slugify(&game.game_title)),
        name: game.game_title,
        rank,
        cover_url: boxart.and_then(|b| front_cover(b, game.id)),
        summary: game.overview,
        metadata,
    })
}

#[async_trait]
impl MetadataProvider for TgdbProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Tgdb
    }

    async fn identify_platform(&self, fs_slug: &str) -> Result<Option<PlatformMatch>, ProviderError> {
        let envelope: Envelope<PlatformsData> = self.get("/Platforms", &[]).await?;

        let mut platforms: Vec<TgdbPlatform> = envelope.data.platforms.into_values().collect();
        platforms.sort_by_key(|p| p.id);

        let found = platforms
            .iter()
            .position(|p| p.alias.as_deref() == Some(fs_slug))
            .or_else(|| platforms.iter().position(|p| slugify(&p.name) == fs_slug));

        Ok(found.map(|index| {
            let platform = platforms.swap_remove(index);
            PlatformMatch {
                external_id: platform.id,
                name: platform.name,
            }
        }))
    }

    async fn search(
        &self,
        name: &str,
        platform_external_id: i64,
    ) -> Result<Vec<ProviderMatch>, ProviderError> {
        self.games(
            "/Games/ByGameName",
            &[
                ("name", name.to_string()),
                ("filter[platform]", platform_external_id.to_string()),
            ],
        )
        .await
    }

    async fn get_by_id(&self, external_id: i64) -> Result<ProviderMatch, ProviderError> {
        // Unknown ids come back as an empty list, not a 404
        self.games("/Games/ByGameID", &[("id", external_id.to_string())])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::NotFound(format!("game {}", external_id)))
    }

    async fn get_cover_url(&self, candidate: &ProviderMatch) -> Result<Option<String>, ProviderError> {
        Ok(candidate.cover_url.clone())
    }

    fn cover_variant(&self, url: &str, size: CoverSize) -> String {
        match size {
            CoverSize::Large => url.to_string(),
            CoverSize::Small => url.replacen("/images/original/", "/images/thumb/", 1),
        }
    }
}
