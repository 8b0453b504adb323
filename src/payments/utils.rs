use crate::payments::error::{GatewayError, GatewayResponse};
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use sha2::{Sha256, Sha512};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

#[derive(Clone)]
pub struct GatewayHttpClient {
    gateway: &'static str,
    client: Client,
    timeout: Duration,
    max_retries: u32,
}

impl GatewayHttpClient {
    pub fn new(gateway: &'static str, timeout: Duration, max_retries: u32) -> GatewayResponse<Self> {
        let client =
            Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| GatewayError::Network {
                    message: format!("failed to initialize HTTP client: {}", e),
                })?;

        Ok(Self {
            gateway,
            client,
            timeout,
            max_retries,
        })
    }

    /// POSTs `body` and decodes a JSON reply. Server errors and rate limits
    /// are retried with exponential backoff; client errors are not.
    pub async fn post_json<T: DeserializeOwned>(
        &self,
        url: &str,
        auth: Option<&BasicAuth>,
        body: &JsonValue,
    ) -> GatewayResponse<T> {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            let mut request = self.client.post(url).timeout(self.timeout).json(body);
            if let Some(auth) = auth {
                request = request.basic_auth(&auth.username, Some(&auth.password));
            }

            let response = request.send().await.map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout {
                        message: format!("{} request timed out: {}", self.gateway, e),
                    }
                } else {
                    GatewayError::Network {
                        message: format!("{} request failed: {}", self.gateway, e),
                    }
                }
            });

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    if status.is_success() {
                        return serde_json::from_str::<T>(&text).map_err(|e| {
                            GatewayError::Provider {
                                gateway: self.gateway.to_string(),
                                message: format!("invalid gateway JSON response: {}", e),
                                code: None,
                                retryable: false,
                            }
                        });
                    }

                    if status.as_u16() == 429 {
                        if attempt < self.max_retries {
                            tokio::time::sleep(Duration::from_millis(100 << attempt)).await;
                            continue;
                        }
                        return Err(GatewayError::RateLimited {
                            message: format!("{} rate limit exceeded", self.gateway),
                            retry_after_seconds: None,
                        });
                    }

                    if status.is_server_error() && attempt < self.max_retries {
                        warn!(
                            gateway = self.gateway,
                            status = %status,
                            attempt = attempt + 1,
                            "gateway server error, retrying"
                        );
                        tokio::time::sleep(Duration::from_millis(100 << attempt)).await;
                        continue;
                    }

                    return Err(GatewayError::Provider {
                        gateway: self.gateway.to_string(),
                        message: format!("HTTP {}: {}", status, text),
                        code: Some(status.as_u16().to_string()),
                        retryable: status.is_server_error(),
                    });
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_millis(100 << attempt)).await;
                        continue;
                    }
                }
            }
        }

        Err(last_error.unwrap_or(GatewayError::Network {
            message: format!("{} request failed", self.gateway),
        }))
    }
}

pub fn sign_hmac_sha512_hex(payload: &[u8], secret: &str) -> Option<String> {
    type HmacSha512 = Hmac<Sha512>;
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(payload);
    Some(hex::encode(mac.finalize().into_bytes()))
}

pub fn verify_hmac_sha512_hex(payload: &[u8], secret: &str, signature: &str) -> bool {
    match sign_hmac_sha512_hex(payload, secret) {
        Some(computed) => secure_eq(computed.as_bytes(), signature.trim().as_bytes()),
        None => false,
    }
}

/// HMAC-SHA256 keyed with a hex-encoded key, base64 output.
pub fn sign_hmac_sha256_base64(payload: &[u8], hex_key: &str) -> Option<String> {
    type HmacSha256 = Hmac<Sha256>;
    let key = hex::decode(hex_key.trim()).ok()?;
    let mut mac = HmacSha256::new_from_slice(&key).ok()?;
    mac.update(payload);
    Some(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

pub fn verify_hmac_sha256_base64(payload: &[u8], hex_key: &str, signature: &str) -> bool {
    match sign_hmac_sha256_base64(payload, hex_key) {
        Some(computed) => secure_eq(computed.as_bytes(), signature.trim().as_bytes()),
        None => false,
    }
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
