//! Profile service client

use crate::error::{Result, TournamentError};
use crate::types::{PlayerId, PlayerProfile};
use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Source of player profiles
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProfileService: Send + Sync {
    async fn fetch_profile(&self, player_id: PlayerId) -> Result<PlayerProfile>;
}

#[derive(Debug, Deserialize)]
struct ProfileEnvelope {
    data: Option<PlayerProfile>,
    #[serde(default)]
    message: String,
}

/// HTTP client for the user service
#[derive(Debug, Clone)]
pub struct HttpProfileClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpProfileClient {
    /// `base_url` may be given with or without a scheme; plain hosts get `http://`
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = if base_url.starts_with("http://") || base_url.starts_with("https://") {
            base_url.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", base_url.trim_end_matches('/'))
        };

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build profile HTTP client")?;

        Ok(Self { base_url, client })
    }

    pub fn profile_url(&self, player_id: PlayerId) -> String {
        format!("{}/api/v1/users/{}", self.base_url, player_id)
    }
}

#[async_trait]
impl ProfileService for HttpProfileClient {
    async fn fetch_profile(&self, player_id: PlayerId) -> Result<PlayerProfile> {
        let response = self
            .client
            .get(self.profile_url(player_id))
            .header("x-internal", "true")
            .header("x-authenticated", "true")
            .header("x-user-id", player_id.to_string())
            .send()
            .await
            .map_err(|e| TournamentError::ProfileServiceFailed {
                message: format!("request for player {} failed: {}", player_id, e),
            })?;

        let status = response.status();
        let envelope: ProfileEnvelope =
            response
                .json()
                .await
                .map_err(|e| TournamentError::ProfileServiceFailed {
                    message: format!("unreadable profile for player {}: {}", player_id, e),
                })?;

        if !status.is_success() {
            return Err(TournamentError::ProfileServiceFailed {
                message: format!("status {}: {}", status, envelope.message),
            }
            .into());
        }

        let profile = envelope
            .data
            .ok_or_else(|| TournamentError::ProfileServiceFailed {
                message: format!("empty profile for player {}", player_id),
            })?;

        debug!("Fetched profile for player {}", player_id);
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_url() {
        let client = HttpProfileClient::new("users:3000/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.profile_url(5), "http://users:3000/api/v1/users/5");

        let client =
            HttpProfileClient::new("https://users.internal", Duration::from_secs(1)).unwrap();
        assert_eq!(client.profile_url(5), "https://users.internal/api/v1/users/5");
    }

    #[test]
    fn test_envelope_decoding() {
        let body = r#"{"data":{"id":5,"nickname":"ari","avatarUrl":"https://cdn/a.png"},"message":"ok"}"#;
        let envelope: ProfileEnvelope = serde_json::from_str(body).unwrap();
        let profile = envelope.data.unwrap();
        assert_eq!(profile.nickname, "ari");
        assert_eq!(profile.avatar_url, "https://cdn/a.png");
    }
}
