// src/config.rs
use anyhow::{anyhow, Context, Result};
use std::{env, path::PathBuf};
use tracing_subscriber::EnvFilter;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1/";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
pub const DEFAULT_SENDGRID_URL: &str = "https://api.sendgrid.com/v3/mail/send";
pub const DEFAULT_EMAILJS_URL: &str = "https://api.emailjs.com/api/v1.0/email/send";
pub const DEFAULT_MAX_IN_FLIGHT: usize = 8;

/// Settings read from the environment.
///
/// Service credentials stay optional here; each client asks for what it needs
/// through [`Config::require`] so a missing key only breaks that client.
#[derive(Debug, Clone)]
pub struct Config {
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: String,

    pub sendgrid_api_key: Option<String>,
    pub sendgrid_from_email: Option<String>,
    pub sendgrid_template_id: Option<String>,
    pub sendgrid_url: String,

    pub emailjs_service_id: Option<String>,
    pub emailjs_template_id: Option<String>,
    pub emailjs_public_key: Option<String>,
    pub emailjs_private_key: Option<String>,
    pub emailjs_url: String,
    pub relay_to_email: Option<String>,

    /// Base URL of the confirmation page linked from customer emails.
    pub app_url: Option<String>,

    /// Upper bound on concurrent normalizer calls within one batch.
    pub max_in_flight: usize,
    pub output_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let max_in_flight = match get("MAX_IN_FLIGHT") {
            Some(raw) => raw
                .parse::<usize>()
                .with_context(|| format!("MAX_IN_FLIGHT must be a positive integer, got {raw:?}"))?
                .max(1),
            None => DEFAULT_MAX_IN_FLIGHT,
        };

        Ok(Self {
            openai_api_key: get("OPENAI_API_KEY"),
            openai_model: get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.into()),
            openai_base_url: get("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.into()),
            sendgrid_api_key: get("SENDGRID_API_KEY"),
            sendgrid_from_email: get("SENDGRID_FROM_EMAIL"),
            sendgrid_template_id: get("SENDGRID_TEMPLATE_ID"),
            sendgrid_url: get("SENDGRID_BASE_URL").unwrap_or_else(|| DEFAULT_SENDGRID_URL.into()),
            emailjs_service_id: get("EMAILJS_SERVICE_ID"),
            emailjs_template_id: get("EMAILJS_TEMPLATE_ID"),
            emailjs_public_key: get("EMAILJS_PUBLIC_KEY"),
            emailjs_private_key: get("EMAILJS_PRIVATE_KEY"),
            emailjs_url: get("EMAILJS_BASE_URL").unwrap_or_else(|| DEFAULT_EMAILJS_URL.into()),
            relay_to_email: get("RELAY_TO_EMAIL"),
            app_url: get("APP_URL"),
            max_in_flight,
            output_dir: get("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
        })
    }

    /// Fetch a required value, naming the missing variable on failure.
    pub fn require<'a>(value: &'a Option<String>, key: &str) -> Result<&'a str> {
        value
            .as_deref()
            .ok_or_else(|| anyhow!("missing configuration value {key}"))
    }
}

/// `RUST_LOG` when it parses, otherwise `LOG_LEVEL` (default `info`).
pub fn log_filter(rust_log: Option<&str>, log_level: Option<&str>) -> EnvFilter {
    rust_log
        .and_then(|v| EnvFilter::try_new(v).ok())
        .unwrap_or_else(|| EnvFilter::new(log_level.unwrap_or("info")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let cfg = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.openai_model, "gpt-4o");
        assert_eq!(cfg.max_in_flight, DEFAULT_MAX_IN_FLIGHT);
        assert_eq!(cfg.output_dir, PathBuf::from("."));
        assert!(cfg.openai_api_key.is_none());
    }

    #[test]
    fn test_blank_values_are_unset() {
        let cfg = Config::from_lookup(lookup(&[("APP_URL", "   ")])).unwrap();
        assert!(cfg.app_url.is_none());
    }

    #[test]
    fn test_max_in_flight_parsing() {
        let cfg = Config::from_lookup(lookup(&[("MAX_IN_FLIGHT", "0")])).unwrap();
        assert_eq!(cfg.max_in_flight, 1);
        assert!(Config::from_lookup(lookup(&[("MAX_IN_FLIGHT", "lots")])).is_err());
    }

    #[test]
    fn test_require_names_missing_key() {
        let cfg = Config::from_lookup(lookup(&[("SENDGRID_API_KEY", "sg-key")])).unwrap();
        assert_eq!(
            Config::require(&cfg.sendgrid_api_key, "SENDGRID_API_KEY").unwrap(),
            "sg-key"
        );
        let err = Config::require(&cfg.sendgrid_from_email, "SENDGRID_FROM_EMAIL").unwrap_err();
        assert!(err.to_string().contains("SENDGRID_FROM_EMAIL"));
    }

    #[test]
    fn test_rust_log_wins_over_log_level() {
        assert_eq!(log_filter(Some("debug"), None).to_string(), "debug");
        assert_eq!(log_filter(Some("debug"), Some("warn")).to_string(), "debug");
        assert_eq!(log_filter(None, Some("warn")).to_string(), "warn");
        assert_eq!(log_filter(None, None).to_string(), "info");
    }
}
