//! MailRelay - send mail as an Entra ID application or user
//!
//! Settings come from `MAILRELAY_*` environment variables (or `.env`); the
//! flags below override them for a single run.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use mailrelay_auth::{CredentialCache, TokenCache};
use mailrelay_core::{vars, EmailDispatchFlow, FlowKind, RelayConfig, TransportKind};
use mailrelay_smtp::{OutgoingAttachment, OutgoingMessage};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "mailrelay", version, about = "Send mail with OAuth2 credentials")]
struct Cli {
    /// Token acquisition flow
    #[arg(long, global = true)]
    flow: Option<FlowKind>,

    /// Delivery transport
    #[arg(long, global = true)]
    transport: Option<TransportKind>,

    /// Mailbox to send as
    #[arg(long, global = true)]
    sender: Option<String>,

    /// Token cache file
    #[arg(long, global = true)]
    cache_path: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send a message
    Send(SendArgs),
    /// Acquire a token (or reuse the cached one) without sending
    Token {
        /// Print the access token itself
        #[arg(long)]
        show_token: bool,
    },
    /// Forget the cached token for the configured account
    ClearCache,
}

#[derive(Debug, Args)]
struct SendArgs {
    /// Recipient address (repeatable)
    #[arg(long, required = true)]
    to: Vec<String>,

    #[arg(long)]
    cc: Vec<String>,

    #[arg(long)]
    bcc: Vec<String>,

    #[arg(long, short, default_value = "")]
    subject: String,

    /// Plain text body
    #[arg(long)]
    body: Option<String>,

    /// HTML body
    #[arg(long)]
    html: Option<String>,

    /// File to attach (repeatable)
    #[arg(long)]
    attach: Vec<PathBuf>,
}

impl Cli {
    /// Flag values keyed by the environment variable they replace
    fn overrides(&self) -> Vec<(&'static str, String)> {
        let mut overrides = Vec::new();
        if let Some(flow) = self.flow {
            overrides.push((vars::FLOW, flow.to_string()));
        }
        if let Some(transport) = self.transport {
            overrides.push((vars::TRANSPORT, transport.to_string()));
        }
        if let Some(sender) = &self.sender {
            overrides.push((vars::SENDER, sender.clone()));
        }
        if let Some(path) = &self.cache_path {
            overrides.push((vars::CACHE_PATH, path.display().to_string()));
        }
        overrides
    }
}

impl SendArgs {
    async fn into_message(self, config: &RelayConfig) -> anyhow::Result<OutgoingMessage> {
        let mut message = OutgoingMessage::new(&config.sender, self.subject);
        message.from_name = config.sender_name.clone();
        message.to = self.to;
        message.cc = self.cc;
        message.bcc = self.bcc;
        message.text_body = self.body;
        message.html_body = self.html;

        for path in &self.attach {
            let attachment = OutgoingAttachment::from_path(path)
                .await
                .with_context(|| format!("Failed to attach {}", path.display()))?;
            message = message.attachment(attachment);
        }
        Ok(message)
    }
}

fn init_logging(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose { "mailrelay=debug" } else { "mailrelay=info" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(level.parse()?))
        .init();
    Ok(())
}

fn build_flow(config: &RelayConfig) -> anyhow::Result<EmailDispatchFlow> {
    let cache = TokenCache::new(CredentialCache::new(&config.cache_path));
    Ok(EmailDispatchFlow::new(
        config.acquirer()?,
        config.mail_transport(),
        cache,
        config.scopes(),
    ))
}

fn format_expiry(expires_at: Option<i64>) -> String {
    expires_at
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .map(|at| at.to_rfc3339())
        .unwrap_or_else(|| "unknown".to_string())
}

fn format_remaining(expires_in: Option<i64>) -> String {
    match expires_in {
        Some(secs) if secs <= 0 => "expired".to_string(),
        Some(secs) => format!("{}m {}s", secs / 60, secs % 60),
        None => "unknown".to_string(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let config = RelayConfig::from_env_with(&cli.overrides())?;
    tracing::debug!(
        "Using {} flow over {} for {}",
        config.flow,
        config.transport,
        config.sender
    );
    let flow = build_flow(&config)?;

    match cli.command {
        Command::Send(args) => {
            let message = args.into_message(&config).await?;
            let report = flow.dispatch(&message).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "Sent to {} recipient(s) via {} (token from {:?})",
                    report.recipients, report.transport, report.token_source
                );
                if let Some(err) = &report.cache_error {
                    eprintln!("warning: token cache not updated: {}", err);
                }
            }
        }
        Command::Token { show_token } => {
            let acquired = flow.token().await?;
            if cli.json {
                let mut value = serde_json::json!({
                    "source": acquired.source,
                    "expires_at": format_expiry(acquired.token.expires_at),
                    "expires_in": acquired.token.expires_in(),
                    "scopes": flow.scopes(),
                    "cache_error": acquired.cache_error,
                });
                if show_token {
                    value["access_token"] = acquired.token.access_token.clone().into();
                }
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("Token source: {:?}", acquired.source);
                println!(
                    "Expires: {} (in {})",
                    format_expiry(acquired.token.expires_at),
                    format_remaining(acquired.token.expires_in())
                );
                if show_token {
                    println!("{}", acquired.token.access_token);
                }
                if let Some(err) = &acquired.cache_error {
                    eprintln!("warning: token cache not updated: {}", err);
                }
            }
        }
        Command::ClearCache => {
            let removed = flow.clear_cached_token();
            if cli.json {
                println!("{}", serde_json::json!({ "removed": removed }));
            } else if removed {
                println!("Cached token removed from {}", config.cache_path.display());
            } else {
                println!("No cached token for this account");
            }
        }
    }

    Ok(())
}
