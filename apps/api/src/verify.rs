use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uwchat_error::{ChatError, Result};

/// Human-verification gate consulted before any quota or AI cost is
/// incurred. `Ok(false)` means the challenge failed; `Err` means the
/// verification service itself was unreachable.
#[async_trait]
pub trait HumanVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<bool>;
}

const DEFAULT_VERIFY_URL: &str = "https://challenges.cloudflare.com/turnstile/v0/siteverify";

/// Cloudflare Turnstile siteverify client: secret key + submitted token in,
/// success boolean out.
pub struct TurnstileVerifier {
    http: reqwest::Client,
    secret_key: String,
    verify_url: String,
}

impl TurnstileVerifier {
    pub fn new(secret_key: String, verify_url: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            secret_key,
            verify_url: verify_url.unwrap_or_else(|| DEFAULT_VERIFY_URL.to_string()),
        }
    }
}

#[derive(Serialize)]
struct SiteVerifyReq<'a> {
    secret: &'a str,
    response: &'a str,
}

#[derive(Deserialize)]
struct SiteVerifyResp {
    success: bool,
}

#[async_trait]
impl HumanVerifier for TurnstileVerifier {
    #[instrument(skip(self, token))]
    async fn verify(&self, token: &str) -> Result<bool> {
        let resp = self
            .http
            .post(&self.verify_url)
            .form(&SiteVerifyReq {
                secret: &self.secret_key,
                response: token,
            })
            .send()
            .await
            .map_err(|e| ChatError::Network {
                operation: "human_verification".to_string(),
                message: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(ChatError::Network {
                operation: "human_verification".to_string(),
                message: format!("status={}", status),
            });
        }

        let data: SiteVerifyResp = resp.json().await.map_err(|e| ChatError::Network {
            operation: "human_verification".to_string(),
            message: e.to_string(),
        })?;
        Ok(data.success)
    }
}

/// Pass-through verifier for local development with verification disabled.
pub struct AllowAllVerifier;

#[async_trait]
impl HumanVerifier for AllowAllVerifier {
    async fn verify(&self, _token: &str) -> Result<bool> {
        Ok(true)
    }
}
