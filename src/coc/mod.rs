pub mod metrics;

use crate::config::Config;
use anyhow::{Context, Result};
use http::StatusCode;
use regex::Regex;
use reqwest::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{message}")]
    Http { status: StatusCode, message: String },

    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("failed to decode response: {0}")]
    Decode(#[source] reqwest::Error),
}

/// Outcome of fetching a clan together with its current war and capital raids.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ComprehensiveClanData {
    pub success: bool,
    pub clan: Option<Value>,
    pub war: Option<Value>,
    pub capital: Option<Value>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlayerFetchError {
    pub tag: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchPlayers {
    pub success: bool,
    pub players: Vec<Value>,
    pub errors: Vec<PlayerFetchError>,
}

/// `#2PP` and `2PP` both become `%232PP`, ready for a path segment.
pub fn encode_tag(tag: &str) -> String {
    let trimmed = tag.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    format!("%23{}", trimmed.strip_prefix('#').unwrap_or(trimmed))
}

/// Canonical stored form of a tag: trimmed, upper-case, `#`-prefixed.
pub fn normalize_tag(tag: &str) -> String {
    let trimmed = tag.trim();
    format!("#{}", trimmed.strip_prefix('#').unwrap_or(trimmed).to_uppercase())
}

pub fn is_valid_tag(tag: &str) -> bool {
    static TAG_PATTERN: OnceLock<Regex> = OnceLock::new();
    TAG_PATTERN
        .get_or_init(|| Regex::new(r"(?i)^#?[0289PYLQGRJCUV]+$").expect("static tag pattern"))
        .is_match(tag.trim())
}

#[derive(Debug, Clone)]
pub struct CocClient {
    http: Client,
    base_url: String,
}

impl CocClient {
    pub fn new(base_url: &str, timeout_seconds: u64, token: Option<&str>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(token) = token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {token}"))
                    .context("Failed to build Authorization header")?,
            );
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .default_headers(headers)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.api_base_url,
            config.http_timeout_seconds,
            config.resolve_api_token().as_deref(),
        )
    }

    pub async fn fetch(&self, endpoint: &str) -> Result<Value, FetchError> {
        let url = format!("{}{endpoint}", self.base_url);
        debug!(url = %url, "fetching");

        let response = self.http.get(&url).send().await.map_err(FetchError::Transport)?;
        read_json(response).await
    }

    pub async fn get_player(&self, player_tag: &str) -> Result<Value, FetchError> {
        self.fetch(&format!("/players/{}", encode_tag(player_tag))).await
    }

    pub async fn verify_player_token(&self, player_tag: &str, token: &str) -> Result<Value, FetchError> {
        let url = format!("{}/players/{}/verifytoken", self.base_url, encode_tag(player_tag));

        let response = self
            .http
            .post(&url)
            .json(&json!({ "token": token }))
            .send()
            .await
            .map_err(FetchError::Transport)?;
        read_json(response).await
    }

    pub async fn search_clans(&self, name: &str) -> Result<Value, FetchError> {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("name", name)
            .finish();
        self.fetch(&format!("/clans?{query}")).await
    }

    pub async fn get_clan(&self, clan_tag: &str) -> Result<Value, FetchError> {
        self.fetch(&format!("/clans/{}", encode_tag(clan_tag))).await
    }

    pub async fn get_clan_members(&self, clan_tag: &str) -> Result<Value, FetchError> {
        self.fetch(&format!("/clans/{}/members", encode_tag(clan_tag))).await
    }

    pub async fn get_war_log(&self, clan_tag: &str) -> Result<Value, FetchError> {
        self.fetch(&format!("/clans/{}/warlog", encode_tag(clan_tag))).await
    }

    pub async fn get_current_war(&self, clan_tag: &str) -> Result<Value, FetchError> {
        self.fetch(&format!("/clans/{}/currentwar", encode_tag(clan_tag))).await
    }

    pub async fn get_war_league_group(&self, clan_tag: &str) -> Result<Value, FetchError> {
        self.fetch(&format!("/clans/{}/currentwar/leaguegroup", encode_tag(clan_tag)))
            .await
    }

    pub async fn get_capital_raid_seasons(&self, clan_tag: &str) -> Result<Value, FetchError> {
        self.fetch(&format!("/clans/{}/capitalraidseasons", encode_tag(clan_tag)))
            .await
    }

    pub async fn get_leagues(&self) -> Result<Value, FetchError> {
        self.fetch("/leagues").await
    }

    pub async fn get_league(&self, league_id: &str) -> Result<Value, FetchError> {
        self.fetch(&format!("/leagues/{league_id}")).await
    }

    pub async fn get_locations(&self) -> Result<Value, FetchError> {
        self.fetch("/locations").await
    }

    pub async fn get_location(&self, location_id: &str) -> Result<Value, FetchError> {
        self.fetch(&format!("/locations/{location_id}")).await
    }

    pub async fn get_player_rankings(&self, location_id: &str) -> Result<Value, FetchError> {
        self.fetch(&format!("/locations/{location_id}/rankings/players"))
            .await
    }

    pub async fn get_clan_rankings(&self, location_id: &str) -> Result<Value, FetchError> {
        self.fetch(&format!("/locations/{location_id}/rankings/clans"))
            .await
    }

    pub async fn get_clan_labels(&self) -> Result<Value, FetchError> {
        self.fetch("/labels/clans").await
    }

    pub async fn get_player_labels(&self) -> Result<Value, FetchError> {
        self.fetch("/labels/players").await
    }

    pub async fn get_gold_pass(&self) -> Result<Value, FetchError> {
        self.fetch("/goldpass").await
    }

    pub async fn get_war_leagues(&self) -> Result<Value, FetchError> {
        self.fetch("/warleagues").await
    }

    pub async fn get_war_league(&self, league_id: &str) -> Result<Value, FetchError> {
        self.fetch(&format!("/warleagues/{league_id}")).await
    }

    pub async fn get_builder_base_leagues(&self) -> Result<Value, FetchError> {
        self.fetch("/builderbase/leagues").await
    }

    /// Clan, current war and capital raids fetched concurrently. Only the clan
    /// is required for success.
    pub async fn comprehensive_clan_data(&self, clan_tag: &str) -> ComprehensiveClanData {
        let (clan, war, capital) = tokio::join!(
            self.get_clan(clan_tag),
            self.get_current_war(clan_tag),
            self.get_capital_raid_seasons(clan_tag),
        );

        combine_clan_results(clan, war, capital)
    }

    /// Players fetched concurrently; failures are reported per tag, in input order.
    pub async fn batch_get_players(&self, player_tags: &[String]) -> BatchPlayers {
        let mut tasks = JoinSet::new();
        player_tags.iter().cloned().enumerate().for_each(|(index, tag)| {
            let client = self.clone();
            tasks.spawn(async move {
                let result = client.get_player(&tag).await;
                (index, tag, result)
            });
        });

        let mut outcomes = Vec::with_capacity(player_tags.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(error) => warn!(error = %error, "player fetch task failed"),
            }
        }
        outcomes.sort_by_key(|(index, _, _)| *index);

        let mut batch = BatchPlayers {
            success: true,
            ..BatchPlayers::default()
        };
        outcomes.into_iter().for_each(|(_, tag, result)| match result {
            Ok(player) => batch.players.push(player),
            Err(error) => batch.errors.push(PlayerFetchError {
                tag,
                error: error.to_string(),
            }),
        });

        batch
    }
}

async fn read_json(response: reqwest::Response) -> Result<Value, FetchError> {
    let status = response.status();

    if !status.is_success() {
        let body = response.json::<Value>().await.unwrap_or(Value::Null);
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| {
                format!(
                    "HTTP {}: {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown")
                )
            });

        warn!(status = status.as_u16(), message = %message, "API request failed");
        return Err(FetchError::Http { status, message });
    }

    response.json::<Value>().await.map_err(FetchError::Decode)
}

pub fn combine_clan_results(
    clan: Result<Value, FetchError>,
    war: Result<Value, FetchError>,
    capital: Result<Value, FetchError>,
) -> ComprehensiveClanData {
    let mut data = ComprehensiveClanData::default();

    match clan {
        Ok(value) => data.clan = Some(value),
        Err(error) => {
            warn!(error = %error, "clan fetch failed");
            data.errors.push("Failed to fetch clan data".to_string());
        }
    }

    // No current war is a normal state, so a failure here is not reported.
    data.war = war.ok();

    match capital {
        Ok(value) => data.capital = Some(value),
        Err(error) => {
            warn!(error = %error, "capital fetch failed");
            data.errors.push("Failed to fetch capital data".to_string());
        }
    }

    data.success = data.clan.is_some();
    data
}

#[cfg(test)]
mod tests {
    use super::{
        CocClient, FetchError, combine_clan_results, encode_tag, is_valid_tag, normalize_tag,
    };
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;

    fn not_found() -> FetchError {
        FetchError::Http {
            status: StatusCode::NOT_FOUND,
            message: "notFound".to_string(),
        }
    }

    #[test]
    fn tags_are_percent_encoded() {
        assert_eq!(encode_tag("#2PP"), "%232PP");
        assert_eq!(encode_tag("  2PP "), "%232PP");
        assert_eq!(encode_tag(""), "");
        assert_eq!(normalize_tag(" 2pp"), "#2PP");
        assert_eq!(normalize_tag("#q8r"), "#Q8R");
    }

    #[test]
    fn tag_validation_uses_game_alphabet() {
        assert!(is_valid_tag("#2pp"));
        assert!(is_valid_tag("#Q8RLY0V"));
        assert!(!is_valid_tag("#ABC"));
        assert!(!is_valid_tag(""));
    }

    #[test]
    fn failed_war_does_not_fail_the_clan_fetch() {
        let combined = combine_clan_results(
            Ok(json!({"tag": "#2PP"})),
            Err(not_found()),
            Ok(json!({"items": []})),
        );

        assert!(combined.success);
        assert_eq!(combined.war, None);
        assert!(combined.errors.is_empty());
    }

    #[test]
    fn failed_clan_and_capital_are_reported() {
        let combined = combine_clan_results(Err(not_found()), Ok(json!({})), Err(not_found()));

        assert!(!combined.success);
        assert_eq!(
            combined.errors,
            vec!["Failed to fetch clan data", "Failed to fetch capital data"]
        );
    }

    async fn spawn_fake_api() -> String {
        let app = Router::new()
            .route(
                "/clans/:tag",
                get(|Path(tag): Path<String>| async move { Json(json!({ "tag": tag })) }),
            )
            .route(
                "/clans/:tag/currentwar",
                get(|| async {
                    (
                        StatusCode::FORBIDDEN,
                        Json(json!({ "reason": "accessDenied", "message": "war log is private" })),
                    )
                }),
            )
            .route(
                "/clans/:tag/capitalraidseasons",
                get(|| async { Json(json!({ "items": [{ "state": "ended" }] })) }),
            )
            .route(
                "/players/:tag",
                get(|Path(tag): Path<String>| async move {
                    if tag == "#BAD" {
                        Err(StatusCode::NOT_FOUND)
                    } else {
                        Ok(Json(json!({ "tag": tag })))
                    }
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let address = listener.local_addr().expect("address");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });

        format!("http://{address}")
    }

    #[tokio::test]
    async fn comprehensive_fetch_tolerates_private_war_log() {
        let base_url = spawn_fake_api().await;
        let client = CocClient::new(&base_url, 5, None).expect("client");

        let combined = client.comprehensive_clan_data("#2PP").await;

        assert!(combined.success);
        assert_eq!(combined.clan, Some(json!({ "tag": "#2PP" })));
        assert_eq!(combined.war, None);
        assert_eq!(combined.capital, Some(json!({ "items": [{ "state": "ended" }] })));
    }

    #[tokio::test]
    async fn error_message_comes_from_body_or_status() {
        let base_url = spawn_fake_api().await;
        let client = CocClient::new(&base_url, 5, None).expect("client");

        let private = client.get_current_war("#2PP").await.expect_err("forbidden");
        assert_eq!(private.to_string(), "war log is private");

        let missing = client.get_player("#BAD").await.expect_err("missing");
        assert_eq!(missing.to_string(), "HTTP 404: Not Found");
    }

    #[tokio::test]
    async fn batch_players_keeps_input_order_and_collects_failures() {
        let base_url = spawn_fake_api().await;
        let client = CocClient::new(&base_url, 5, None).expect("client");
        let tags = ["#P2", "#BAD", "#P1"].map(String::from).to_vec();

        let batch = client.batch_get_players(&tags).await;

        assert!(batch.success);
        assert_eq!(batch.players, vec![json!({ "tag": "#P2" }), json!({ "tag": "#P1" })]);
        assert_eq!(batch.errors.len(), 1);
        assert_eq!(batch.errors[0].tag, "#BAD");
    }
}
