use address_verifier::{
    config::{log_filter, Config},
    deliver::{email::Recipient, SendGridClient},
    normalize::{verify_or_fallback, OpenAiClient},
    pipeline::{run_batch, Dispatchers},
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::Client;
use std::{env, path::PathBuf};
use tracing::info;
use tracing_subscriber::fmt;

#[derive(Parser)]
#[command(name = "address-verifier", about = "Verify and correct postal addresses")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Verify a single free-form address and print the result as JSON
    Verify { address: String },

    /// Verify every row of a CSV or XLSX export and write verified_addresses.xlsx
    Batch {
        file: PathBuf,
        /// Directory for the workbook (defaults to OUTPUT_DIR)
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// Skip relaying the workbook as an email attachment
        #[arg(long)]
        no_relay: bool,
        /// Email every customer with a confirmation request
        #[arg(long)]
        email_customers: bool,
    },

    /// Generate a prose email template for an address correction
    Template {
        #[arg(long)]
        original: String,
        #[arg(long)]
        verified: String,
    },

    /// Send one confirmation email
    Email {
        #[arg(long)]
        to: String,
        #[arg(long)]
        original: String,
        #[arg(long)]
        verified: String,
        /// Template file with {{...}} tokens (defaults to the built-in template)
        #[arg(long, conflicts_with = "generate")]
        template: Option<PathBuf>,
        /// Generate the template instead of using a file
        #[arg(long)]
        generate: bool,
        /// Print the rendered body instead of sending it
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let filter = log_filter(
        env::var("RUST_LOG").ok().as_deref(),
        env::var("LOG_LEVEL").ok().as_deref(),
    );
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let cli = Cli::parse();

    // ─── 2) configuration ────────────────────────────────────────────
    let cfg = Config::from_env()?;
    let http = Client::new();

    match cli.command {
        Command::Verify { address } => {
            let openai = OpenAiClient::from_config(http, &cfg)?;
            let verified = verify_or_fallback(&openai, &address)
                .await
                .context("Failed to verify address. Please try again.")?;
            println!("{}", serde_json::to_string_pretty(&verified)?);
        }

        Command::Batch {
            file,
            output_dir,
            no_relay,
            email_customers,
        } => {
            let openai = OpenAiClient::from_config(http.clone(), &cfg)?;
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let file_name = file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();

            // ─── 3) dispatchers, local file first ───────────────────────
            let dispatchers = Dispatchers::from_config(
                &http,
                &cfg,
                output_dir.unwrap_or_else(|| cfg.output_dir.clone()),
                !no_relay,
                email_customers,
            );

            let report =
                run_batch(&file_name, &bytes, &openai, &dispatchers, cfg.max_in_flight).await?;
            for line in &report.status {
                println!("{line}");
            }
        }

        Command::Template { original, verified } => {
            let openai = OpenAiClient::from_config(http, &cfg)?;
            let template = openai.generate_email_template(&original, &verified).await?;
            println!("{template}");
        }

        Command::Email {
            to,
            original,
            verified,
            template,
            generate,
            dry_run,
        } => {
            let sendgrid = SendGridClient::from_config(http.clone(), &cfg)?;
            let template = match (template, generate) {
                (Some(path), _) => Some(
                    tokio::fs::read_to_string(&path)
                        .await
                        .with_context(|| format!("reading template {}", path.display()))?,
                ),
                (None, true) => Some(
                    OpenAiClient::from_config(http, &cfg)?
                        .generate_email_template(&original, &verified)
                        .await?,
                ),
                (None, false) => None,
            };
            let recipient = Recipient {
                email: to,
                original_address: original,
                verified_address: verified,
            };

            if dry_run {
                println!("{}", sendgrid.render(&recipient, template.as_deref())?);
            } else {
                sendgrid
                    .send_verification_email(&recipient, template.as_deref())
                    .await?;
                info!(to = %recipient.email, "email sent");
                println!("Email sent to {}", recipient.email);
            }
        }
    }

    Ok(())
}
