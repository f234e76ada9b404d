use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde_json::json;

use super::{DeliveryError, Destination};

const MAX_ERROR_BODY: usize = 200;

/// Generic HTTP endpoint; the reminder is POSTed as `{"destination", "text"}`.
#[derive(Debug, Clone)]
pub struct WebhookDestination {
    name: String,
    url: Url,
    headers: Vec<(String, String)>,
    http: Client,
}

impl WebhookDestination {
    pub fn new(
        name: String,
        url: &str,
        headers: Vec<(String, String)>,
    ) -> Result<Self, DeliveryError> {
        if url.trim().is_empty() {
            return Err(DeliveryError::Permanent("webhook url is required".into()));
        }
        let url = Url::parse(url.trim())
            .map_err(|e| DeliveryError::Permanent(format!("invalid webhook url: {e}")))?;
        let http = Client::builder()
            .user_agent("class-scheduler/0.1")
            .build()
            .map_err(|e| DeliveryError::Permanent(format!("http client: {e}")))?;
        Ok(Self {
            name,
            url,
            headers,
            http,
        })
    }
}

/// 429 and 5xx are worth retrying; other non-success codes are not.
pub fn classify_status(status: StatusCode, body: &str) -> Result<(), DeliveryError> {
    if status.is_success() {
        return Ok(());
    }
    let body: String = body.chars().take(MAX_ERROR_BODY).collect();
    let msg = format!("HTTP {status}: {body}");
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Err(DeliveryError::Transient(msg))
    } else {
        Err(DeliveryError::Permanent(msg))
    }
}

#[async_trait]
impl Destination for WebhookDestination {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &str) -> Result<(), DeliveryError> {
        let mut req = self.http.post(self.url.clone()).json(&json!({
            "destination": self.name,
            "text": message,
        }));
        for (key, value) in &self.headers {
            req = req.header(key.as_str(), value.as_str());
        }
        let resp = req.send().await.map_err(|e| {
            if e.is_builder() {
                DeliveryError::Permanent(format!("webhook request invalid: {e}"))
            } else {
                DeliveryError::Transient(format!("webhook request failed: {e}"))
            }
        })?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        classify_status(status, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(classify_status(StatusCode::OK, "").is_ok());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "down")
            .unwrap_err()
            .is_transient());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "")
            .unwrap_err()
            .is_transient());
        let err = classify_status(StatusCode::UNAUTHORIZED, "bad token").unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("bad token"));
    }

    #[test]
    fn blank_or_invalid_urls_are_rejected() {
        assert!(WebhookDestination::new("ops".into(), " ", vec![]).is_err());
        assert!(WebhookDestination::new("ops".into(), "not a url", vec![]).is_err());
        assert!(WebhookDestination::new("ops".into(), "https://example.com/hook", vec![]).is_ok());
    }
}
