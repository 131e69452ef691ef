//! MobyGames provider
//!
//! API-key authenticated REST client for `https://api.mobygames.com/v1`.

use super::{check_status, slugify, MetadataProvider, PlatformMatch, ProviderError, ProviderMatch};
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use gv_common::models::{MetadataBlob, ProviderKind};
use serde::Deserialize;
use std::num::NonZeroU32;
use std::time::Duration;

const MOBYGAMES_BASE_URL: &str = "https://api.mobygames.com/v1";

#[derive(Debug, Deserialize)]
struct GamesResponse {
    #[serde(default)]
    games: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct MobyGame {
    game_id: i64,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    moby_url: Option<String>,
    #[serde(default)]
    sample_cover: Option<MobyCover>,
}

#[derive(Debug, Deserialize)]
struct MobyCover {
    #[serde(default)]
    image: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlatformsResponse {
    #[serde(default)]
    platforms: Vec<MobyPlatform>,
}

#[derive(Debug, Deserialize)]
struct MobyPlatform {
    platform_id: i64,
    platform_name: String,
}

/// MobyGames metadata provider
pub struct MobyGamesProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    /// Free tier allows one request per second
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl MobyGamesProvider {
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
            base_url: MOBYGAMES_BASE_URL.to_string(),
            rate_limiter: RateLimiter::direct(Quota::per_second(NonZeroU32::new(1).expect("1 is non-zero"))),
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
        tracing::debug!(url = %url, "Querying MobyGames");

        let response = self
            .client
            .get(&url)
            .query(&[("api_key", self.api_key.as_str())])
            .query(params)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("MobyGames request failed: {}", e)))?;

        check_status(response.status(), path)?;

        response
            .json()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("MobyGames payload: {}", e)))
    }
}

fn to_match(raw: serde_json::Value, rank: u32) -> Result<ProviderMatch, ProviderError> {
    let game: MobyGame = serde_json::from_value(raw.clone())
        .map_err(|e| ProviderError::Unavailable(format!("MobyGames game payload: {}", e)))?;
    let metadata: MetadataBlob = match raw {
        serde_json::Value::Object(map) => map,
        _ => MetadataBlob::new(),
    };

    let slug = game
        .moby_url
        .as_deref()
        .and_then(|url| url.trim_end_matches('/').rsplit('/').next())
        .map(str::to_string);

    Ok(ProviderMatch {
        external_id: game.game_id,
        name: game.title,
        rank,
        cover_url: game.sample_cover.and_then(|c| c.image),
        summary: game.description,
        slug,
        metadata,
    })
}

#[async_trait]
impl MetadataProvider for MobyGamesProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Mobygames
    }

    async fn identify_platform(&self, fs_slug: &str) -> Result<Option<PlatformMatch>, ProviderError> {
        let response: PlatformsResponse = self.get("/platforms", &[]).await?;

        Ok(response
            .platforms
            .into_iter()
            .find(|p| slugify(&p.platform_name) == fs_slug)
            .map(|p| PlatformMatch {
                external_id: p.platform_id,
                name: p.platform_name,
            }))
    }

    async fn search(
        &self,
        name: &str,
        platform_external_id: i64,
    ) -> Result<Vec<ProviderMatch>, ProviderError> {
        let response: GamesResponse = self
            .get(
                "/games",
                &[
                    ("title", name.to_string()),
                    ("platform", platform_external_id.to_string()),
                    ("format", "normal".to_string()),
                ],
            )
            .await?;

        response
            .games
            .into_iter()
            .enumerate()
            .map(|(rank, raw)| to_match(raw, rank as u32))
            .collect()
    }

    async fn get_by_id(&self, external_id: i64) -> Result<ProviderMatch, ProviderError> {
        let raw: serde_json::Value = self
            .get(&format!("/games/{}", external_id), &[("format", "normal".to_string())])
            .await?;
        to_match(raw, 0)
    }

    async fn get_cover_url(&self, candidate: &ProviderMatch) -> Result<Option<String>, ProviderError> {
        Ok(candidate.cover_url.clone())
    }
}
