//! IGDB provider
//!
//! Authenticates with Twitch client credentials and queries the IGDB v4 API
//! with Apicalypse request bodies. The access token is cached until shortly
//! before it expires.

use super::{check_status, CoverSize, MetadataProvider, PlatformMatch, ProviderError, ProviderMatch};
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use gv_common::models::{MetadataBlob, ProviderKind};
use serde::Deserialize;
use std::num::NonZeroU32;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const IGDB_BASE_URL: &str = "https://api.igdb.com/v4";
const TWITCH_TOKEN_URL: &str = "https://id.twitch.tv/oauth2/token";
const IMAGE_BASE_URL: &str = "https://images.igdb.com/igdb/image/upload";
const GAME_FIELDS: &str = "id,name,slug,summary,cover.url,cover.image_id";
const SEARCH_LIMIT: u32 = 10;
/// Refresh the token this long before the advertised expiry
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

const COVER_SIZE_TOKENS: &[&str] = &["t_thumb", "t_cover_small", "t_cover_big"];

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct IgdbGame {
    id: i64,
    name: String,
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    cover: Option<IgdbCover>,
}

#[derive(Debug, Deserialize)]
struct IgdbCover {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    image_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IgdbPlatform {
    id: i64,
    name: String,
}

/// IGDB metadata provider
pub struct IgdbProvider {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    base_url: String,
    token_url: String,
    token: Mutex<Option<AccessToken>>,
    /// IGDB allows 4 requests per second
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl IgdbProvider {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .user_agent(concat!("gamevault/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::Unavailable(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            base_url: IGDB_BASE_URL.to_string(),
            token_url: TWITCH_TOKEN_URL.to_string(),
            token: Mutex::new(None),
            rate_limiter: RateLimiter::direct(Quota::per_second(NonZeroU32::new(4).expect("4 is non-zero"))),
        })
    }

    /// Point the provider at another API and token endpoint
    pub fn with_endpoints(mut self, base_url: impl Into<String>, token_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self.token_url = token_url.into();
        self
    }

    async fn access_token(&self) -> Result<String, ProviderError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        tracing::debug!("Requesting IGDB access token");
        let response = self
            .client
            .post(&self.token_url)
            .query(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("IGDB token request failed: {}", e)))?;

        check_status(response.status(), "IGDB token").map_err(|e| match e {
            ProviderError::NotFound(what) => ProviderError::Unavailable(what),
            other => other,
        })?;

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("IGDB token payload: {}", e)))?;

        let lifetime = Duration::from_secs(body.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        *cached = Some(AccessToken {
            value: body.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });

        Ok(body.access_token)
    }

    /// POST an Apicalypse query and return the raw JSON rows
    async fn query(&self, endpoint: &str, body: String) -> Result<Vec<serde_json::Value>, ProviderError> {
        let token = self.access_token().await?;
        self.rate_limiter.until_ready().await;

        let url = format!("{}/{}", self.base_url, endpoint);
        tracing::debug!(url = %url, query = %body, "Querying IGDB");

        let response = self
            .client
            .post(&url)
            .header("Client-ID", &self.client_id)
            .bearer_auth(&token)
            .header("Accept", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("IGDB request failed: {}", e)))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            // Token revoked early; next call fetches a new one
            *self.token.lock().await = None;
        }
        check_status(response.status(), endpoint)?;

        response
            .json()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("IGDB payload: {}", e)))
    }
}

/// Escape a value for use inside an Apicalypse string literal
fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn search_query(name: &str, platform_external_id: i64) -> String {
    format!(
        "search \"{}\"; fields {}; where platforms = ({}); limit {};",
        escape_query(name),
        GAME_FIELDS,
        platform_external_id,
        SEARCH_LIMIT
    )
}

fn normalize_cover_url(cover: &IgdbCover) -> Option<String> {
    if let Some(url) = cover.url.as_deref() {
        let absolute = if url.starts_with("//") {
            format!("https:{}", url)
        } else {
            url.to_string()
        };
        return Some(replace_size_token(&absolute, "t_cover_big"));
    }
    cover
        .image_id
        .as_deref()
        .map(|id| format!("{}/t_cover_big/{}.jpg", IMAGE_BASE_URL, id))
}

fn replace_size_token(url: &str, target: &str) -> String {
    COVER_SIZE_TOKENS
        .iter()
        .find(|token| url.contains(*token))
        .map(|token| url.replacen(token, target, 1))
        .unwrap_or_else(|| url.to_string())
}

/// Convert one raw row into a candidate, keeping the row as metadata
fn to_match(raw: serde_json::Value, rank: u32) -> Result<ProviderMatch, ProviderError> {
    let game: IgdbGame = serde_json::from_value(raw.clone())
        .map_err(|e| ProviderError::Unavailable(format!("IGDB game payload: {}", e)))?;
    let metadata: MetadataBlob = match raw {
        serde_json::Value::Object(map) => map,
        _ => MetadataBlob::new(),
    };

    Ok(ProviderMatch {
        external_id: game.id,
        name: game.name,
        rank,
        cover_url: game.cover.as_ref().and_then(normalize_cover_url),
        summary: game.summary,
        slug: game.slug,
        metadata,
    })
}

#[async_trait]
impl MetadataProvider for IgdbProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Igdb
    }

    async fn identify_platform(&self, fs_slug: &str) -> Result<Option<PlatformMatch>, ProviderError> {
        let rows = self
            .query(
                "platforms",
                format!("fields id,name,slug; where slug = \"{}\"; limit 1;", escape_query(fs_slug)),
            )
            .await?;

        match rows.into_iter().next() {
            Some(row) => {
                let platform: IgdbPlatform = serde_json::from_value(row)
                    .map_err(|e| ProviderError::Unavailable(format!("IGDB platform payload: {}", e)))?;
                Ok(Some(PlatformMatch {
                    external_id: platform.id,
                    name: platform.name,
                }))
            }
            None => Ok(None),
        }
    }

    async fn search(
        &self,
        name: &str,
        platform_external_id: i64,
    ) -> Result<Vec<ProviderMatch>, ProviderError> {
        let rows = self.query("games", search_query(name, platform_external_id)).await?;
        rows.into_iter()
            .enumerate()
            .map(|(rank, row)| to_match(row, rank as u32))
            .collect()
    }

    async fn get_by_id(&self, external_id: i64) -> Result<ProviderMatch, ProviderError> {
        let rows = self
            .query(
                "games",
                format!("fields {}; where id = {}; limit 1;", GAME_FIELDS, external_id),
            )
            .await?;

        match rows.into_iter().next() {
            Some(row) => to_match(row, 0),
            None => Err(ProviderError::NotFound(format!("IGDB game {}", external_id))),
        }
    }

    async fn get_cover_url(&self, candidate: &ProviderMatch) -> Result<Option<String>, ProviderError> {
        Ok(candidate.cover_url.clone())
    }

    fn cover_variant(&self, url: &str, size: CoverSize) -> String {
        match size {
            CoverSize::Small => replace_size_token(url, "t_cover_small"),
            CoverSize::Large => replace_size_token(url, "t_cover_big"),
        }
    }
}
