//! Remote decision service client.
//! Plain-text HTTP against three endpoints under the configured base URL:
//! `POST /start` (bottom side), `POST /move` (occupancy) and `GET /getmove`.
//! Every endpoint answers with an empty body, a move such as `e2e4`, or one of
//! the sentinels `None`, `Invalid`, `Game Over`.
//! Latency: network dependent; one retry on transport or status errors.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

use crate::board::{Occupancy, Side};

const MAX_API_RETRIES: u32 = 1;
const RETRY_DELAY_MS: u64 = 500;
const TIMEOUT_SECS: u64 = 30;

/// What the service said, with sentinels told apart from moves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServiceReply {
    Empty,
    Move(String),
    NoneAvailable,
    Invalid,
    GameOver,
}

impl ServiceReply {
    pub fn parse(body: &str) -> Self {
        let body = body.trim();
        if body.is_empty() {
            return ServiceReply::Empty;
        }
        match body.to_ascii_lowercase().as_str() {
            "none" => ServiceReply::NoneAvailable,
            "invalid" => ServiceReply::Invalid,
            "game over" => ServiceReply::GameOver,
            _ => ServiceReply::Move(body.to_string()),
        }
    }

    pub fn into_move(self) -> Option<String> {
        match self {
            ServiceReply::Move(mv) => Some(mv),
            _ => None,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        matches!(
            self,
            ServiceReply::NoneAvailable | ServiceReply::Invalid | ServiceReply::GameOver
        )
    }
}

#[async_trait]
pub trait RemoteSync: Send + Sync {
    /// Announces a new session with the side whose home rows are at the bottom.
    async fn begin_session(&self, bottom: Side) -> Result<ServiceReply>;
    async fn report_occupancy(&self, occupancy: &Occupancy) -> Result<ServiceReply>;
    async fn fetch_move(&self) -> Result<ServiceReply>;
}

// *************** HTTP implementation ***************

pub struct HttpSyncClient {
    client: Client,
    base_url: String,
}

impl HttpSyncClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn post_text(&self, path: &str, body: String) -> Result<ServiceReply> {
        let url = self.url(path);
        let (client, target) = (&self.client, url.as_str());
        self.with_retry(target, || {
            let body = body.clone();
            async move {
                let response = client
                    .post(target)
                    .header("Content-Type", "text/plain")
                    .body(body)
                    .send()
                    .await
                    .with_context(|| format!("Failed to send request to {}", target))?;
                read_reply(response).await
            }
        })
        .await
    }

    async fn get(&self, path: &str) -> Result<ServiceReply> {
        let url = self.url(path);
        let (client, target) = (&self.client, url.as_str());
        self.with_retry(target, || async move {
            let response = client
                .get(target)
                .send()
                .await
                .with_context(|| format!("Failed to send request to {}", target))?;
            read_reply(response).await
        })
        .await
    }

    async fn with_retry<F, Fut>(&self, url: &str, mut call: F) -> Result<ServiceReply>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<ServiceReply>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(reply) => {
                    debug!(url, ?reply, "Service replied");
                    return Ok(reply);
                }
                Err(e) if attempt <= MAX_API_RETRIES => {
                    warn!(
                        url,
                        attempt,
                        max = MAX_API_RETRIES + 1,
                        error = %format!("{:#}", e),
                        "Service call failed, retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

async fn read_reply(response: reqwest::Response) -> Result<ServiceReply> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("Decision service error {}: {}", status, body.trim());
    }
    let body = response
        .text()
        .await
        .context("Failed to read decision service response")?;
    Ok(ServiceReply::parse(&body))
}

#[async_trait]
impl RemoteSync for HttpSyncClient {
    async fn begin_session(&self, bottom: Side) -> Result<ServiceReply> {
        self.post_text("start", bottom.wire_name().to_string()).await
    }

    async fn report_occupancy(&self, occupancy: &Occupancy) -> Result<ServiceReply> {
        self.post_text("move", occupancy.to_wire()).await
    }

    async fn fetch_move(&self) -> Result<ServiceReply> {
        self.get("getmove").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sentinels_case_insensitively() {
        assert_eq!(ServiceReply::parse("None"), ServiceReply::NoneAvailable);
        assert_eq!(ServiceReply::parse("none"), ServiceReply::NoneAvailable);
        assert_eq!(ServiceReply::parse("Invalid"), ServiceReply::Invalid);
        assert_eq!(ServiceReply::parse("Game Over"), ServiceReply::GameOver);
        assert_eq!(ServiceReply::parse(" GAME OVER\n"), ServiceReply::GameOver);
    }

    #[test]
    fn test_parse_moves_and_empty() {
        assert_eq!(ServiceReply::parse(""), ServiceReply::Empty);
        assert_eq!(ServiceReply::parse("  \n"), ServiceReply::Empty);
        assert_eq!(ServiceReply::parse("e2e4\n"), ServiceReply::Move("e2e4".into()));
        assert!(ServiceReply::parse("Game Over").is_sentinel());
        assert!(!ServiceReply::parse("e7e5").is_sentinel());
        assert_eq!(ServiceReply::parse("e7e5").into_move().as_deref(), Some("e7e5"));
        assert_eq!(ServiceReply::parse("Invalid").into_move(), None);
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let client = HttpSyncClient::new("https://example.ngrok.io/").unwrap();
        assert_eq!(client.url("start"), "https://example.ngrok.io/start");
    }

    #[tokio::test]
    #[ignore = "requires a running decision service on localhost:5000"]
    async fn test_real_service_round_trip() {
        // Run with: cargo test test_real_service_round_trip -- --ignored
        let client = HttpSyncClient::new("http://localhost:5000").unwrap();
        let reply = client.begin_session(Side::White).await;
        println!("Result: {:?}", reply);
        assert!(reply.is_ok());
    }
}
