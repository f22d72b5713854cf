// src/normalize/openai.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;

use super::{AddressNormalizer, VerifyError};
use crate::config::Config;

const ADDRESS_SYSTEM_PROMPT: &str = r#"You are an address verification expert. Given an address, verify, correct and complete it using the formatting rules of its country.
Reply with a JSON object containing exactly these fields:
{
  "address1": "primary address line",
  "address2": "secondary address line or empty string",
  "address3": "tertiary address line or empty string",
  "city": "verified city/suburb/locality",
  "state": "state/county/region",
  "zone": "zone if applicable or empty string",
  "postalCode": "postal code or 0000 if none",
  "country": "full country name",
  "fullAddress": "complete formatted address"
}

Country rules:

Australia:
- State: territory abbreviation (NSW, VIC, QLD, ...)
- Postcode: 4 digits
- Units: keep "Unit #/##" or "U #/##" as written
- Street ranges: keep hyphenated ranges such as 92-94
- Example: "Unit 1/92-94 Sturgeon St, Ormiston QLD 4160"
- City: the most accurate suburb/locality for the postal address
- Keep building or complex names

United Kingdom:
- County: include when applicable
- Postcode: standard UK format
- Example: "123 High Street, Manchester, Greater Manchester M1 1AA"

United States:
- State: two-letter abbreviation
- ZIP: 5 digits or ZIP+4
- Example: "123 Main St, Boston, MA 02108"

United Arab Emirates:
- No postcodes (use 0000)
- Include the Emirate
- Example: "Villa 12, Street 7B, Al Wasl, Dubai 0000, UAE"

Hong Kong:
- No postcodes (use 0000)
- Include the District
- Example: "Flat 12A, Tower 1, Pacific Place, 88 Queensway, Central, Hong Kong 0000"

General:
1. Always include the regional division (state/county/emirate/district)
2. Use 0000 for countries without postcodes
3. Follow local address conventions
4. Use the full country name
5. Keep abbreviations consistent with local standards
6. Preserve street number ranges (e.g. 92-94)
7. Use the most accurate locality/suburb name for postal addressing

RESPOND ONLY WITH THE JSON OBJECT, NO OTHER TEXT."#;

const TEMPLATE_SYSTEM_PROMPT: &str = "You are an expert at writing professional, friendly email communications. Create a polite email template for address verification.";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// First non-blank completion in the response, if any.
fn completion_text(resp: ChatResponse) -> Option<String> {
    resp.choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
}

/// Chat-completions client used both as the address normalizer and for
/// generating email templates.
#[derive(Clone)]
pub struct OpenAiClient {
    http: Client,
    api_key: String,
    model: String,
    endpoint: Url,
}

impl OpenAiClient {
    pub fn new(http: Client, api_key: &str, model: &str, base_url: &str) -> Result<Self> {
        let mut base = base_url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let endpoint = Url::parse(&base)
            .with_context(|| format!("invalid OpenAI base URL {base_url:?}"))?
            .join("chat/completions")?;
        Ok(Self {
            http,
            api_key: api_key.to_string(),
            model: model.to_string(),
            endpoint,
        })
    }

    pub fn from_config(http: Client, cfg: &Config) -> Result<Self> {
        let key = Config::require(&cfg.openai_api_key, "OPENAI_API_KEY")?;
        Self::new(http, key, &cfg.openai_model, &cfg.openai_base_url)
    }

    fn address_request(&self, address: &str) -> ChatRequest<'_> {
        ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: ADDRESS_SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: format!("Verify and correct this address: {address}"),
                },
            ],
            temperature: 0.3,
            max_tokens: 500,
            response_format: Some(ResponseFormat {
                kind: "json_object",
            }),
        }
    }

    fn template_request(&self, original: &str, verified: &str) -> ChatRequest<'_> {
        ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: TEMPLATE_SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: format!(
                        "Generate a professional email template to notify a customer about an address update. \
                         Original address: \"{original}\", Verified address: \"{verified}\". \
                         The email should be friendly, clear, and ask for their confirmation."
                    ),
                },
            ],
            temperature: 0.7,
            max_tokens: 500,
            response_format: None,
        }
    }

    async fn chat(&self, request: &ChatRequest<'_>) -> Result<String, VerifyError> {
        debug!(endpoint = %self.endpoint, model = %self.model, "chat completion");
        let resp = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(VerifyError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = resp.json().await?;
        completion_text(parsed).ok_or(VerifyError::EmptyCompletion)
    }

    /// Ask for a friendly prose email announcing an address correction.
    #[instrument(level = "info", skip(self))]
    pub async fn generate_email_template(&self, original: &str, verified: &str) -> Result<String> {
        self.chat(&self.template_request(original, verified))
            .await
            .context("Failed to generate email template")
    }
}

#[async_trait]
impl AddressNormalizer for OpenAiClient {
    async fn complete(&self, address: &str) -> Result<String, VerifyError> {
        self.chat(&self.address_request(address)).await
    }
}
