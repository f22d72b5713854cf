// src/deliver/relay.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::Serialize;
use tracing::info;

use super::{Delivery, Dispatcher};
use crate::config::Config;

const RELAY_SUBJECT: &str = "New Verified Addresses";
const RELAY_MESSAGE: &str = "New batch of verified addresses is attached.";

#[derive(Debug, Serialize)]
struct RelayRequest<'a> {
    service_id: &'a str,
    template_id: &'a str,
    user_id: &'a str,
    #[serde(rename = "accessToken")]
    access_token: &'a str,
    template_params: RelayParams<'a>,
}

#[derive(Debug, Serialize)]
struct RelayParams<'a> {
    to_email: &'a str,
    subject: &'a str,
    message: &'a str,
    attachment: String,
    filename: &'a str,
}

/// Forwards a file as a base64 email attachment through EmailJS to a fixed
/// inbox (a chat channel's email bridge).
pub struct AttachmentRelay {
    http: Client,
    endpoint: String,
    service_id: String,
    template_id: String,
    public_key: String,
    private_key: String,
    to_email: String,
}

impl AttachmentRelay {
    pub fn from_config(http: Client, cfg: &Config) -> Result<Self> {
        Ok(Self {
            http,
            endpoint: cfg.emailjs_url.clone(),
            service_id: Config::require(&cfg.emailjs_service_id, "EMAILJS_SERVICE_ID")?.into(),
            template_id: Config::require(&cfg.emailjs_template_id, "EMAILJS_TEMPLATE_ID")?.into(),
            public_key: Config::require(&cfg.emailjs_public_key, "EMAILJS_PUBLIC_KEY")?.into(),
            private_key: Config::require(&cfg.emailjs_private_key, "EMAILJS_PRIVATE_KEY")?.into(),
            to_email: Config::require(&cfg.relay_to_email, "RELAY_TO_EMAIL")?.into(),
        })
    }

    fn request<'a>(&'a self, bytes: &[u8], filename: &'a str) -> RelayRequest<'a> {
        RelayRequest {
            service_id: &self.service_id,
            template_id: &self.template_id,
            user_id: &self.public_key,
            access_token: &self.private_key,
            template_params: RelayParams {
                to_email: &self.to_email,
                subject: RELAY_SUBJECT,
                message: RELAY_MESSAGE,
                attachment: STANDARD.encode(bytes),
                filename,
            },
        }
    }

    pub async fn relay(&self, bytes: &[u8], filename: &str) -> Result<()> {
        self.http
            .post(&self.endpoint)
            .json(&self.request(bytes, filename))
            .send()
            .await
            .context("sending attachment relay request")?
            .error_for_status()
            .context("attachment relay rejected the file")?;
        info!(filename, size = bytes.len(), "relayed attachment");
        Ok(())
    }
}

#[async_trait]
impl Dispatcher for AttachmentRelay {
    fn name(&self) -> &str {
        "send to Slack"
    }

    async fn deliver(&self, delivery: &Delivery<'_>) -> Result<String> {
        self.relay(&delivery.artifact.bytes, &delivery.artifact.filename)
            .await?;
        Ok("File sent to Slack channel successfully".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn config() -> Config {
        Config::from_lookup(|key| {
            let v = match key {
                "EMAILJS_SERVICE_ID" => "service_1",
                "EMAILJS_TEMPLATE_ID" => "template_1",
                "EMAILJS_PUBLIC_KEY" => "pub",
                "EMAILJS_PRIVATE_KEY" => "priv",
                "RELAY_TO_EMAIL" => "channel@team.slack.com",
                _ => return None,
            };
            Some(v.to_string())
        })
        .unwrap()
    }

    #[test]
    fn test_payload_carries_base64_attachment() {
        let relay = AttachmentRelay::from_config(Client::new(), &config()).unwrap();
        let body: Value =
            serde_json::to_value(relay.request(b"hello", "verified_addresses.xlsx")).unwrap();

        assert_eq!(body["service_id"], "service_1");
        assert_eq!(body["accessToken"], "priv");
        let params = &body["template_params"];
        assert_eq!(params["to_email"], "channel@team.slack.com");
        assert_eq!(params["subject"], RELAY_SUBJECT);
        assert_eq!(params["filename"], "verified_addresses.xlsx");
        assert_eq!(params["attachment"], "aGVsbG8=");
    }

    #[test]
    fn test_missing_destination_is_an_error() {
        let cfg = Config {
            relay_to_email: None,
            ..config()
        };
        let err = AttachmentRelay::from_config(Client::new(), &cfg).err().unwrap();
        assert!(err.to_string().contains("RELAY_TO_EMAIL"));
    }
}
