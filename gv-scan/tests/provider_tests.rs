//! Provider HTTP client tests against local fake APIs

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use gv_scan::providers::{
    CoverSize, IgdbProvider, MetadataProvider, MobyGamesProvider, ProviderError, TgdbProvider,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Serve a router on an ephemeral port and return its base URL
async fn spawn_server(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[derive(Clone, Default)]
struct IgdbFake {
    token_requests: Arc<AtomicUsize>,
    queries: Arc<Mutex<Vec<(String, String)>>>,
    /// Status returned for the next games query
    games_status: Arc<Mutex<Option<StatusCode>>>,
}

async fn igdb_token(State(fake): State<IgdbFake>) -> Json<Value> {
    let n = fake.token_requests.fetch_add(1, Ordering::SeqCst) + 1;
    Json(json!({"access_token": format!("token-{}", n), "expires_in": 3600, "token_type": "bearer"}))
}

async fn igdb_platforms(State(fake): State<IgdbFake>, body: String) -> Json<Value> {
    fake.queries.lock().unwrap().push(("platforms".into(), body.clone()));
    if body.contains("\"nes\"") {
        Json(json!([{"id": 18, "name": "Nintendo Entertainment System", "slug": "nes"}]))
    } else {
        Json(json!([]))
    }
}

async fn igdb_games(
    State(fake): State<IgdbFake>,
    headers: HeaderMap,
    body: String,
) -> axum::response::Response {
    fake.queries.lock().unwrap().push(("games".into(), body.clone()));

    if headers.get("client-id").and_then(|v| v.to_str().ok()) != Some("client") {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if let Some(status) = fake.games_status.lock().unwrap().take() {
        return status.into_response();
    }

    if body.contains("where id = 1074") {
        return Json(json!([{
            "id": 1074,
            "name": "Super Mario Bros.",
            "slug": "super-mario-bros",
            "cover": {"url": "//images.igdb.com/igdb/image/upload/t_thumb/co1.jpg"}
        }]))
        .into_response();
    }
    if body.contains("where id =") {
        return Json(json!([])).into_response();
    }

    Json(json!([
        {"id": 1074, "name": "Super Mario Bros.", "summary": "Plumbers", "cover": {"image_id": "co1"}},
        {"id": 2000, "name": "Super Mario Bros. 3"}
    ]))
    .into_response()
}

async fn igdb_fixture() -> (IgdbFake, IgdbProvider) {
    let fake = IgdbFake::default();
    let app = Router::new()
        .route("/oauth2/token", post(igdb_token))
        .route("/v4/platforms", post(igdb_platforms))
        .route("/v4/games", post(igdb_games))
        .with_state(fake.clone());
    let base = spawn_server(app).await;

    let provider = IgdbProvider::new("client", "secret", Duration::from_secs(5))
        .unwrap()
        .with_endpoints(format!("{}/v4", base), format!("{}/oauth2/token", base));
    (fake, provider)
}

#[tokio::test]
async fn test_igdb_search_maps_candidates_in_rank_order() {
    let (fake, provider) = igdb_fixture().await;

    let candidates = provider.search("Super \"Mario\" Bros", 18).await.unwrap();

    assert_eq!(candidates.len(), 2);
    assert_eq!(candidates[0].external_id, 1074);
    assert_eq!(candidates[0].rank, 0);
    assert_eq!(candidates[0].summary.as_deref(), Some("Plumbers"));
    assert_eq!(
        candidates[0].cover_url.as_deref(),
        Some("https://images.igdb.com/igdb/image/upload/t_cover_big/co1.jpg")
    );
    assert_eq!(candidates[0].metadata["id"], 1074);
    assert_eq!(candidates[1].rank, 1);
    assert!(candidates[1].cover_url.is_none());

    let queries = fake.queries.lock().unwrap().clone();
    assert_eq!(queries.len(), 1);
    assert!(queries[0].1.contains("search \"Super \\\"Mario\\\" Bros\""));
    assert!(queries[0].1.contains("where platforms = (18)"));
}

#[tokio::test]
async fn test_igdb_token_is_cached_between_calls() {
    let (fake, provider) = igdb_fixture().await;

    provider.search("Zelda", 18).await.unwrap();
    provider.get_by_id(1074).await.unwrap();

    assert_eq!(fake.token_requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_igdb_get_by_id_and_cover_variants() {
    let (_fake, provider) = igdb_fixture().await;

    let game = provider.get_by_id(1074).await.unwrap();
    let cover = provider.get_cover_url(&game).await.unwrap().expect("cover");

    assert_eq!(cover, "https://images.igdb.com/igdb/image/upload/t_cover_big/co1.jpg");
    assert!(provider.cover_variant(&cover, CoverSize::Small).contains("t_cover_small"));
    assert!(provider.cover_variant(&cover, CoverSize::Large).contains("t_cover_big"));

    let missing = provider.get_by_id(99).await;
    assert!(matches!(missing, Err(ProviderError::NotFound(_))));
}

#[tokio::test]
async fn test_igdb_rate_limit_is_unavailable() {
    let (fake, provider) = igdb_fixture().await;
    *fake.games_status.lock().unwrap() = Some(StatusCode::TOO_MANY_REQUESTS);

    let result = provider.search("Zelda", 18).await;
    assert!(matches!(result, Err(ProviderError::Unavailable(_))));

    // Next call succeeds again
    assert_eq!(provider.search("Zelda", 18).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_igdb_unauthorized_drops_cached_token() {
    let (fake, provider) = igdb_fixture().await;
    provider.search("Zelda", 18).await.unwrap();
    *fake.games_status.lock().unwrap() = Some(StatusCode::UNAUTHORIZED);

    assert!(matches!(
        provider.search("Zelda", 18).await,
        Err(ProviderError::Unavailable(_))
    ));
    provider.search("Zelda", 18).await.unwrap();

    assert_eq!(fake.token_requests.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_igdb_identify_platform() {
    let (_fake, provider) = igdb_fixture().await;

    let nes = provider.identify_platform("nes").await.unwrap().expect("nes");
    assert_eq!(nes.external_id, 18);
    assert_eq!(nes.name, "Nintendo Entertainment System");

    assert!(provider.identify_platform("unknown-console").await.unwrap().is_none());
}

#[tokio::test]
async fn test_igdb_unreachable_token_endpoint_is_unavailable() {
    let provider = IgdbProvider::new("client", "secret", Duration::from_secs(1))
        .unwrap()
        .with_endpoints("http://127.0.0.1:9/v4", "http://127.0.0.1:9/token");

    assert!(matches!(
        provider.search("Zelda", 18).await,
        Err(ProviderError::Unavailable(_))
    ));
}

async fn moby_platforms(Query(params): Query<HashMap<String, String>>) -> axum::response::Response {
    if params.get("api_key").map(String::as_str) != Some("moby-key") {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!({"platforms": [
        {"platform_id": 22, "platform_name": "NES"},
        {"platform_id": 15, "platform_name": "SNES"},
        {"platform_id": 10, "platform_name": "Game Boy"}
    ]}))
    .into_response()
}

async fn moby_games(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    if params.get("title").map(String::as_str) == Some("Tetris") && params.get("platform").map(String::as_str) == Some("10") {
        Json(json!({"games": [{
            "game_id": 217,
            "title": "Tetris",
            "description": "Falling blocks",
            "moby_url": "https://www.mobygames.com/game/217/tetris/",
            "sample_cover": {"image": "https://cdn.mobygames.test/217.jpg"}
        }]}))
    } else {
        Json(json!({"games": []}))
    }
}

async fn moby_game(Path(id): Path<i64>) -> axum::response::Response {
    match id {
        217 => Json(json!({"game_id": 217, "title": "Tetris"})).into_response(),
        429 => StatusCode::TOO_MANY_REQUESTS.into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn moby_fixture() -> MobyGamesProvider {
    let app = Router::new()
        .route("/v1/platforms", get(moby_platforms))
        .route("/v1/games", get(moby_games))
        .route("/v1/games/:id", get(moby_game));
    let base = spawn_server(app).await;

    MobyGamesProvider::new("moby-key", Duration::from_secs(5))
        .unwrap()
        .with_base_url(format!("{}/v1", base))
}

#[tokio::test]
async fn test_mobygames_identify_platform_by_slugified_name() {
    let provider = moby_fixture().await;

    let gb = provider.identify_platform("game-boy").await.unwrap().expect("game boy");
    assert_eq!(gb.external_id, 10);
    assert_eq!(gb.name, "Game Boy");
}

#[tokio::test]
async fn test_mobygames_search() {
    let provider = moby_fixture().await;

    let candidates = provider.search("Tetris", 10).await.unwrap();

    assert_eq!(candidates.len(), 1);
    let tetris = &candidates[0];
    assert_eq!(tetris.external_id, 217);
    assert_eq!(tetris.slug.as_deref(), Some("tetris"));
    assert_eq!(tetris.summary.as_deref(), Some("Falling blocks"));
    assert_eq!(
        provider.get_cover_url(tetris).await.unwrap().as_deref(),
        Some("https://cdn.mobygames.test/217.jpg")
    );
}

#[tokio::test]
async fn test_mobygames_get_by_id_status_mapping() {
    let provider = moby_fixture().await;

    assert_eq!(provider.get_by_id(217).await.unwrap().name, "Tetris");
    assert!(matches!(provider.get_by_id(5).await, Err(ProviderError::NotFound(_))));
    assert!(matches!(provider.get_by_id(429).await, Err(ProviderError::Unavailable(_))));
}

fn tgdb_games_payload(games: Value) -> Value {
    json!({
        "code": 200,
        "status": "Success",
        "data": {"count": games.as_array().map_or(0, Vec::len), "games": games},
        "include": {"boxart": {
            "base_url": {
                "original": "https://cdn.thegamesdb.test/images/original/",
                "thumb": "https://cdn.thegamesdb.test/images/thumb/"
            },
            "data": {"3043": [{"id": 1, "type": "boxart", "side": "front", "filename": "boxart/front/3043-1.jpg"}]}
        }}
    })
}

async fn tgdb_platforms(Query(params): Query<HashMap<String, String>>) -> axum::response::Response {
    if params.get("apikey").map(String::as_str) != Some("tgdb-key") {
        return StatusCode::FORBIDDEN.into_response();
    }
    Json(json!({"code": 200, "status": "Success", "data": {"count": 3, "platforms": {
        "7": {"id": 7, "name": "Nintendo Entertainment System (NES)", "alias": "nintendo-entertainment-system-nes"},
        "4": {"id": 4, "name": "Nintendo Game Boy", "alias": "nintendo-gameboy"},
        "6": {"id": 6, "name": "Super Nintendo (SNES)", "alias": "snes"}
    }}}))
    .into_response()
}

async fn tgdb_by_name(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    let wanted = params.get("name").map(String::as_str) == Some("Tetris")
        && params.get("filter[platform]").map(String::as_str) == Some("4")
        && params.get("include").map(String::as_str) == Some("boxart");
    if wanted {
        Json(tgdb_games_payload(json!([
            {"id": 3043, "game_title": "Tetris", "overview": "Falling blocks", "platform": 4},
            {"id": 9001, "game_title": "Tetris DX", "platform": 4}
        ])))
    } else {
        Json(tgdb_games_payload(json!([])))
    }
}

async fn tgdb_by_id(Query(params): Query<HashMap<String, String>>) -> axum::response::Response {
    match params.get("id").map(String::as_str) {
        Some("3043") => Json(tgdb_games_payload(json!([
            {"id": 3043, "game_title": "Tetris", "platform": 4}
        ])))
        .into_response(),
        Some("429") => StatusCode::TOO_MANY_REQUESTS.into_response(),
        _ => Json(tgdb_games_payload(json!([]))).into_response(),
    }
}

async fn tgdb_fixture(api_key: &str) -> TgdbProvider {
    let app = Router::new()
        .route("/v1/Platforms", get(tgdb_platforms))
        .route("/v1/Games/ByGameName", get(tgdb_by_name))
        .route("/v1/Games/ByGameID", get(tgdb_by_id));
    let base = spawn_server(app).await;

    TgdbProvider::new(api_key, Duration::from_secs(5))
        .unwrap()
        .with_base_url(format!("{}/v1", base))
}

#[tokio::test]
async fn test_tgdb_identify_platform_by_alias_or_name() {
    let provider = tgdb_fixture("tgdb-key").await;

    let snes = provider.identify_platform("snes").await.unwrap().expect("by alias");
    assert_eq!(snes.external_id, 6);
    assert_eq!(snes.name, "Super Nintendo (SNES)");

    let gb = provider
        .identify_platform("nintendo-game-boy")
        .await
        .unwrap()
        .expect("by slugified name");
    assert_eq!(gb.external_id, 4);

    assert!(provider.identify_platform("dreamcast").await.unwrap().is_none());
}

#[tokio::test]
async fn test_tgdb_search_with_box_art_covers() {
    let provider = tgdb_fixture("tgdb-key").await;

    let candidates = provider.search("Tetris", 4).await.unwrap();

    assert_eq!(candidates.len(), 2);
    let tetris = &candidates[0];
    assert_eq!(tetris.external_id, 3043);
    assert_eq!(tetris.rank, 0);
    assert_eq!(tetris.summary.as_deref(), Some("Falling blocks"));

    let cover = provider.get_cover_url(tetris).await.unwrap().expect("front box art");
    assert_eq!(cover, "https://cdn.thegamesdb.test/images/original/boxart/front/3043-1.jpg");
    assert_eq!(
        provider.cover_variant(&cover, CoverSize::Small),
        "https://cdn.thegamesdb.test/images/thumb/boxart/front/3043-1.jpg"
    );
    assert_eq!(provider.cover_variant(&cover, CoverSize::Large), cover);

    assert!(candidates[1].cover_url.is_none());
    assert!(provider.search("Tetris", 7).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_tgdb_get_by_id_status_mapping() {
    let provider = tgdb_fixture("tgdb-key").await;

    assert_eq!(provider.get_by_id(3043).await.unwrap().name, "Tetris");
    assert!(matches!(provider.get_by_id(5).await, Err(ProviderError::NotFound(_))));
    assert!(matches!(provider.get_by_id(429).await, Err(ProviderError::Unavailable(_))));
}

#[tokio::test]
async fn test_tgdb_rejected_key_is_unavailable() {
    let provider = tgdb_fixture("wrong-key").await;

    assert!(matches!(
        provider.identify_platform("snes").await,
        Err(ProviderError::Unavailable(_))
    ));
}
