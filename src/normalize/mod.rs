// src/normalize/mod.rs
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

pub mod openai;

pub use openai::OpenAiClient;

/// A corrected address as returned by the normalizer service.
///
/// Every field is a plain string; the service uses `0000` as the postal code
/// for countries without one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VerifiedAddress {
    pub address1: String,
    pub address2: String,
    pub address3: String,
    pub city: String,
    pub state: String,
    pub zone: String,
    pub postal_code: String,
    pub country: String,
    pub full_address: String,
}

impl VerifiedAddress {
    /// Degraded record substituted when normalization fails: the input goes
    /// into `address1` and `full_address`, everything else stays empty.
    pub fn fallback(address: &str) -> Self {
        Self {
            address1: address.to_string(),
            full_address: address.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("address cannot be empty")]
    EmptyAddress,

    #[error("normalizer request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("normalizer returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("normalizer returned no content")]
    EmptyCompletion,

    #[error("unparsable normalizer response: {0}")]
    Shape(#[from] serde_json::Error),
}

/// Remote text-completion service that turns a free-form address into the
/// JSON shape of [`VerifiedAddress`].
///
/// Implementations only return the raw completion text; validation and
/// fallback live in [`normalize_address`] and [`verify_or_fallback`] so every
/// consumer treats the service as untrusted.
#[async_trait]
pub trait AddressNormalizer: Send + Sync {
    async fn complete(&self, address: &str) -> Result<String, VerifyError>;
}

/// Strictly parse a completion into a [`VerifiedAddress`].
pub fn parse_verified(text: &str) -> Result<VerifiedAddress, VerifyError> {
    Ok(serde_json::from_str(text.trim())?)
}

/// Normalize one address, propagating every failure.
pub async fn normalize_address(
    normalizer: &dyn AddressNormalizer,
    address: &str,
) -> Result<VerifiedAddress, VerifyError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(VerifyError::EmptyAddress);
    }
    let text = normalizer.complete(address).await?;
    parse_verified(&text)
}

/// Normalize one address, degrading remote and shape failures into
/// [`VerifiedAddress::fallback`]. Only empty input is reported.
pub async fn verify_or_fallback(
    normalizer: &dyn AddressNormalizer,
    address: &str,
) -> Result<VerifiedAddress, VerifyError> {
    match normalize_address(normalizer, address).await {
        Ok(verified) => Ok(verified),
        Err(VerifyError::EmptyAddress) => Err(VerifyError::EmptyAddress),
        Err(e) => {
            warn!(address, error = %e, "normalization failed, using fallback");
            Ok(VerifiedAddress::fallback(address.trim()))
        }
    }
}
