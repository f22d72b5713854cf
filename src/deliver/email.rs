// src/deliver/email.rs
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};
use url::Url;

use super::{Delivery, Dispatcher};
use crate::config::Config;
use crate::process::MergedRow;

pub const EMAIL_SUBJECT: &str = "Please Confirm Your Updated Address";

/// SendGrid accepts at most this many personalizations per request.
const MAX_PERSONALIZATIONS: usize = 1000;

pub const DEFAULT_TEMPLATE: &str = "Dear {{customer_name}},

We've recently reviewed and verified your shipping address in our system. Please take a moment to confirm if the updated address is correct:

Original Address:
{{original_address}}

Verified Address:
{{verified_address}}

Please click one of the links below to confirm:
[Yes, this is correct] - {{confirmation_url}}
[No, this needs correction] - {{correction_url}}

If you have any questions or concerns, please don't hesitate to reach out to us.

Best regards,
Your Company Name";

/// One customer to ask for confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub email: String,
    pub original_address: String,
    pub verified_address: String,
}

/// Everything a template can reference, resolved for one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateData {
    pub customer_name: String,
    pub original_address: String,
    pub verified_address: String,
    pub confirmation_url: String,
    pub correction_url: String,
}

/// Local part of an email address, used as a greeting name.
pub fn customer_name(email: &str) -> &str {
    email.split('@').next().unwrap_or(email)
}

/// `<app_url>/confirm-address?id=<base64 email>&status=<status>`
pub fn confirmation_link(app_url: &str, email: &str, status: &str) -> Result<String> {
    let mut url = Url::parse(app_url).with_context(|| format!("invalid APP_URL {app_url:?}"))?;
    url.path_segments_mut()
        .map_err(|_| anyhow!("APP_URL {app_url:?} cannot be a base URL"))?
        .pop_if_empty()
        .push("confirm-address");
    url.query_pairs_mut()
        .append_pair("id", &STANDARD.encode(email))
        .append_pair("status", status);
    Ok(url.into())
}

impl TemplateData {
    pub fn new(app_url: &str, recipient: &Recipient) -> Result<Self> {
        Ok(Self {
            customer_name: customer_name(&recipient.email).to_string(),
            original_address: recipient.original_address.clone(),
            verified_address: recipient.verified_address.clone(),
            confirmation_url: confirmation_link(app_url, &recipient.email, "correct")?,
            correction_url: confirmation_link(app_url, &recipient.email, "incorrect")?,
        })
    }

    /// Replace the first occurrence of each `{{token}}` in `template`.
    pub fn render(&self, template: &str) -> String {
        [
            ("{{customer_name}}", &self.customer_name),
            ("{{original_address}}", &self.original_address),
            ("{{verified_address}}", &self.verified_address),
            ("{{confirmation_url}}", &self.confirmation_url),
            ("{{correction_url}}", &self.correction_url),
        ]
        .into_iter()
        .fold(template.to_string(), |body, (token, value)| {
            body.replacen(token, value.as_str(), 1)
        })
    }
}

#[derive(Debug, Serialize)]
struct Address<'a> {
    email: &'a str,
}

#[derive(Debug, Serialize)]
struct Personalization<'a> {
    to: [Address<'a>; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    dynamic_template_data: Option<TemplateData>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct MailSend<'a> {
    personalizations: Vec<Personalization<'a>>,
    from: Address<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    subject: Option<&'static str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    content: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    template_id: Option<&'a str>,
}

/// SendGrid v3 `mail/send` client.
pub struct SendGridClient {
    http: Client,
    endpoint: String,
    api_key: String,
    from: String,
    template_id: Option<String>,
    app_url: String,
}

impl SendGridClient {
    pub fn from_config(http: Client, cfg: &Config) -> Result<Self> {
        Ok(Self {
            http,
            endpoint: cfg.sendgrid_url.clone(),
            api_key: Config::require(&cfg.sendgrid_api_key, "SENDGRID_API_KEY")?.into(),
            from: Config::require(&cfg.sendgrid_from_email, "SENDGRID_FROM_EMAIL")?.into(),
            template_id: cfg.sendgrid_template_id.clone(),
            app_url: Config::require(&cfg.app_url, "APP_URL")?.into(),
        })
    }

    /// Render `template` (or [`DEFAULT_TEMPLATE`]) for one recipient.
    pub fn render(&self, recipient: &Recipient, template: Option<&str>) -> Result<String> {
        let data = TemplateData::new(&self.app_url, recipient)?;
        Ok(data.render(template.unwrap_or(DEFAULT_TEMPLATE)))
    }

    fn single_message<'a>(&'a self, to: &'a str, html: &'a str) -> MailSend<'a> {
        MailSend {
            personalizations: vec![Personalization {
                to: [Address { email: to }],
                dynamic_template_data: None,
            }],
            from: Address { email: &self.from },
            subject: Some(EMAIL_SUBJECT),
            content: vec![Content {
                kind: "text/html",
                value: html,
            }],
            template_id: None,
        }
    }

    fn batch_messages<'a>(
        &'a self,
        template_id: &'a str,
        recipients: &'a [Recipient],
    ) -> Result<Vec<MailSend<'a>>> {
        recipients
            .chunks(MAX_PERSONALIZATIONS)
            .map(|chunk| {
                let personalizations = chunk
                    .iter()
                    .map(|r| {
                        Ok(Personalization {
                            to: [Address { email: &r.email }],
                            dynamic_template_data: Some(TemplateData::new(&self.app_url, r)?),
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(MailSend {
                    personalizations,
                    from: Address { email: &self.from },
                    subject: None,
                    content: Vec::new(),
                    template_id: Some(template_id),
                })
            })
            .collect()
    }

    async fn post(&self, message: &MailSend<'_>) -> Result<()> {
        self.http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(message)
            .send()
            .await
            .context("sending mail request")?
            .error_for_status()
            .context("mail service rejected the request")?;
        Ok(())
    }

    /// Send one verification email built from `template` by token substitution.
    #[instrument(level = "info", skip(self, recipient, template), fields(to = %recipient.email))]
    pub async fn send_verification_email(
        &self,
        recipient: &Recipient,
        template: Option<&str>,
    ) -> Result<()> {
        let html = self.render(recipient, template)?;
        self.post(&self.single_message(&recipient.email, &html))
            .await
            .context("Failed to send verification email")?;
        info!("verification email sent");
        Ok(())
    }

    /// Send one message per recipient through the registered dynamic template.
    #[instrument(level = "info", skip(self, recipients), fields(count = recipients.len()))]
    pub async fn send_batch(&self, recipients: &[Recipient]) -> Result<usize> {
        if recipients.is_empty() {
            return Ok(0);
        }
        let template_id = Config::require(&self.template_id, "SENDGRID_TEMPLATE_ID")?;
        for message in self.batch_messages(template_id, recipients)? {
            self.post(&message)
                .await
                .context("Failed to send verification emails")?;
        }
        info!("batch verification emails sent");
        Ok(recipients.len())
    }
}

/// Rows that can be emailed: a customer email and an address to confirm.
pub fn recipients_from_rows(rows: &[MergedRow]) -> Vec<Recipient> {
    rows.iter()
        .filter(|r| !r.customer_email().trim().is_empty() && !r.original_address.is_empty())
        .map(|r| Recipient {
            email: r.customer_email().trim().to_string(),
            original_address: r.original_address.clone(),
            verified_address: r.verified.full_address.clone(),
        })
        .collect()
}

/// Emails every customer in the batch through [`SendGridClient::send_batch`].
pub struct BatchEmailDispatcher {
    client: Arc<SendGridClient>,
}

impl BatchEmailDispatcher {
    pub fn new(client: Arc<SendGridClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Dispatcher for BatchEmailDispatcher {
    fn name(&self) -> &str {
        "email customers"
    }

    async fn deliver(&self, delivery: &Delivery<'_>) -> Result<String> {
        let recipients = recipients_from_rows(delivery.rows);
        let sent = self.client.send_batch(&recipients).await?;
        Ok(format!("Sent {sent} verification emails"))
    }
}
