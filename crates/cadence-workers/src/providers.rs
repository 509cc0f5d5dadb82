//! Outbound provider HTTP clients (voice initiate, SMS send, email send).
//! All bearer-authenticated JSON POSTs with bounded timeouts and explicit
//! status handling. Envelopes carry `enrollmentId`/`stepId` so webhook
//! echoes can be correlated.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl ProviderError {
    /// Permanent rejections (malformed number, blocked address) go to the
    /// healer; everything else retries with backoff.
    pub fn is_permanent(&self) -> bool {
        match self {
            ProviderError::Api { status, .. } => {
                (400..500).contains(status) && *status != 429 && *status != 408
            }
            _ => false,
        }
    }
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Metadata envelope echoed back by the voice provider's webhooks.
#[derive(Debug, Clone)]
pub struct CallMetadata {
    pub tenant_id: String,
    pub umbrella_id: String,
    pub enrollment_id: String,
    pub step_id: String,
}

pub struct VoiceProvider {
    client: reqwest::Client,
    base_url: String,
    callback_url: String,
    timeout: Duration,
}

impl VoiceProvider {
    pub fn new(base_url: String, callback_url: String, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            callback_url,
            timeout,
        }
    }

    /// Initiate an outbound call. The per-umbrella api key comes from the
    /// resolver (each umbrella is its own provider account). Returns the
    /// provider's call id.
    #[allow(clippy::too_many_arguments)]
    pub async fn initiate_call(
        &self,
        api_key: &str,
        phone: &str,
        first_message: &str,
        system_prompt: &str,
        assistant_id: Option<&str>,
        overrides: Option<&HashMap<String, String>>,
        metadata: &CallMetadata,
    ) -> ProviderResult<String> {
        let assistant = match assistant_id {
            Some(id) => json!({ "assistantId": id, "assistantOverrides": overrides }),
            None => json!({
                "assistant": {
                    "firstMessage": first_message,
                    "model": { "systemPrompt": system_prompt },
                },
                "assistantOverrides": overrides,
            }),
        };
        let mut body = json!({
            "phoneNumber": phone,
            "serverUrl": self.callback_url,
            "metadata": {
                "tenantId": metadata.tenant_id,
                "umbrellaId": metadata.umbrella_id,
                "enrollmentId": metadata.enrollment_id,
                "stepId": metadata.step_id,
            },
        });
        merge(&mut body, assistant);

        debug!(phone, "initiating outbound call");
        let resp = self
            .client
            .post(format!("{}/call/phone", self.base_url))
            .timeout(self.timeout)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "voice provider rejected call initiation");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        let parsed: IdResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(parsed.id)
    }
}

pub struct SmsProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    from_number: String,
    timeout: Duration,
}

impl SmsProvider {
    pub fn new(base_url: String, api_key: String, from_number: String, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            from_number,
            timeout,
        }
    }

    /// Send one SMS; returns the provider message id.
    pub async fn send(
        &self,
        to: &str,
        body: &str,
        enrollment_id: &str,
        step_id: &str,
    ) -> ProviderResult<String> {
        let payload = json!({
            "from": self.from_number,
            "to": to,
            "body": body,
            "metadata": { "enrollmentId": enrollment_id, "stepId": step_id },
        });

        let resp = self
            .client
            .post(format!("{}/messages", self.base_url))
            .timeout(self.timeout)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "sms provider rejected send");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }
        let parsed: IdResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(parsed.id)
    }
}

pub struct EmailProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    from_address: String,
    timeout: Duration,
}

impl EmailProvider {
    pub fn new(base_url: String, api_key: String, from_address: String, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            from_address,
            timeout,
        }
    }

    /// Send one email; returns the provider message id.
    pub async fn send(
        &self,
        to: &str,
        subject: &str,
        html: &str,
        text: &str,
        enrollment_id: &str,
        step_id: &str,
    ) -> ProviderResult<String> {
        let payload = json!({
            "from": self.from_address,
            "to": to,
            "subject": subject,
            "html": html,
            "text": text,
            "metadata": { "enrollmentId": enrollment_id, "stepId": step_id },
        });

        let resp = self
            .client
            .post(format!("{}/send", self.base_url))
            .timeout(self.timeout)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "email provider rejected send");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }
        let parsed: IdResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(parsed.id)
    }
}

#[derive(Deserialize)]
struct IdResponse {
    id: String,
}

fn merge(target: &mut serde_json::Value, addition: serde_json::Value) {
    if let (Some(obj), Some(add)) = (target.as_object_mut(), addition.as_object()) {
        for (k, v) in add {
            obj.insert(k.clone(), v.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_vs_transient_classification() {
        let bad_number = ProviderError::Api {
            status: 400,
            message: "invalid number".into(),
        };
        assert!(bad_number.is_permanent());

        let rate_limited = ProviderError::Api {
            status: 429,
            message: "slow down".into(),
        };
        assert!(!rate_limited.is_permanent());

        let server_err = ProviderError::Api {
            status: 503,
            message: "unavailable".into(),
        };
        assert!(!server_err.is_permanent());
    }
}
