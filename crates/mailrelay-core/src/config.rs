//! Settings read from the environment
//!
//! Everything comes from `MAILRELAY_*` variables, optionally loaded from a
//! `.env` file in the working directory.

use crate::{ConfigError, CoreResult};
use mailrelay_auth::{
    microsoft, ClientCredentialsAcquirer, CredentialCache, InteractiveAcquirer, OAuth2Config,
    TokenAcquirer, DEFAULT_REDIRECT_PORT,
};
use mailrelay_smtp::{GraphClient, MailTransport, SmtpClient};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::debug;
use vars::*;

/// Environment variable names
pub mod vars {
    pub const TENANT_ID: &str = "MAILRELAY_TENANT_ID";
    pub const CLIENT_ID: &str = "MAILRELAY_CLIENT_ID";
    pub const CLIENT_SECRET: &str = "MAILRELAY_CLIENT_SECRET";
    pub const SENDER: &str = "MAILRELAY_SENDER";
    pub const SENDER_NAME: &str = "MAILRELAY_SENDER_NAME";
    pub const FLOW: &str = "MAILRELAY_FLOW";
    pub const TRANSPORT: &str = "MAILRELAY_TRANSPORT";
    pub const SMTP_HOST: &str = "MAILRELAY_SMTP_HOST";
    pub const SMTP_PORT: &str = "MAILRELAY_SMTP_PORT";
    pub const REDIRECT_PORT: &str = "MAILRELAY_REDIRECT_PORT";
    pub const CACHE_PATH: &str = "MAILRELAY_CACHE_PATH";
    pub const SCOPES: &str = "MAILRELAY_SCOPES";
}

/// How the token is obtained
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlowKind {
    /// App-only token from a client secret
    #[default]
    ClientCredentials,
    /// User signs in through the browser
    Interactive,
}

impl FromStr for FlowKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "client-credentials" | "client_credentials" | "app" => Ok(Self::ClientCredentials),
            "interactive" | "auth-code" | "user" => Ok(Self::Interactive),
            _ => Err(ConfigError::Invalid {
                key: FLOW,
                value: s.to_string(),
                reason: "expected client-credentials or interactive".to_string(),
            }),
        }
    }
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ClientCredentials => "client-credentials",
            Self::Interactive => "interactive",
        })
    }
}

/// Where the message is handed off
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// SMTP submission with XOAUTH2
    #[default]
    Smtp,
    /// Microsoft Graph sendMail
    Graph,
}

impl FromStr for TransportKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "smtp" => Ok(Self::Smtp),
            "graph" => Ok(Self::Graph),
            _ => Err(ConfigError::Invalid {
                key: TRANSPORT,
                value: s.to_string(),
                reason: "expected smtp or graph".to_string(),
            }),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Smtp => "smtp",
            Self::Graph => "graph",
        })
    }
}

/// Resolved MailRelay settings
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Entra ID tenant, `common` when unset
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    /// Mailbox the message is sent as
    pub sender: String,
    pub sender_name: Option<String>,
    pub flow: FlowKind,
    pub transport: TransportKind,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub redirect_port: u16,
    pub cache_path: PathBuf,
    /// Replaces the default scopes for the flow and transport
    pub scopes: Option<Vec<String>>,
}

impl RelayConfig {
    /// Read settings from the process environment and `.env`
    pub fn from_env() -> CoreResult<Self> {
        Self::from_env_with(&[])
    }

    /// Like `from_env`, with `overrides` taking precedence
    pub fn from_env_with(overrides: &[(&str, String)]) -> CoreResult<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!("Loaded environment from {}", path.display());
        }
        Self::from_lookup(|key| {
            overrides
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| value.clone())
                .or_else(|| std::env::var(key).ok())
        })
    }

    /// Read settings through `lookup`, which maps a variable name to its value
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> CoreResult<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let flow = get(FLOW)
            .map(|v| v.parse::<FlowKind>())
            .transpose()?
            .unwrap_or_default();
        let client_secret = get(CLIENT_SECRET);
        if flow == FlowKind::ClientCredentials && client_secret.is_none() {
            return Err(ConfigError::Missing(CLIENT_SECRET).into());
        }

        Ok(Self {
            tenant_id: get(TENANT_ID).unwrap_or_else(|| "common".to_string()),
            client_id: required(CLIENT_ID)?,
            client_secret,
            sender: required(SENDER)?,
            sender_name: get(SENDER_NAME),
            flow,
            transport: get(TRANSPORT)
                .map(|v| v.parse::<TransportKind>())
                .transpose()?
                .unwrap_or_default(),
            smtp_host: get(SMTP_HOST).unwrap_or_else(|| microsoft::SMTP_HOST.to_string()),
            smtp_port: parse_port(SMTP_PORT, get(SMTP_PORT))?.unwrap_or(microsoft::SMTP_PORT),
            redirect_port: parse_port(REDIRECT_PORT, get(REDIRECT_PORT))?
                .unwrap_or(DEFAULT_REDIRECT_PORT),
            cache_path: get(CACHE_PATH)
                .map(PathBuf::from)
                .unwrap_or_else(CredentialCache::default_path),
            scopes: get(SCOPES).map(|v| v.split_whitespace().map(str::to_string).collect()),
        })
    }

    /// Scopes to request, chosen by flow and transport unless overridden
    pub fn scopes(&self) -> Vec<String> {
        if let Some(scopes) = &self.scopes {
            return scopes.clone();
        }
        let scopes: &[&str] = match (self.flow, self.transport) {
            (FlowKind::ClientCredentials, TransportKind::Smtp) => &[microsoft::SMTP_APP_SCOPE],
            (FlowKind::ClientCredentials, TransportKind::Graph) => &[microsoft::GRAPH_APP_SCOPE],
            (FlowKind::Interactive, TransportKind::Smtp) => {
                &[microsoft::SMTP_SEND_SCOPE, microsoft::OFFLINE_ACCESS_SCOPE]
            }
            (FlowKind::Interactive, TransportKind::Graph) => {
                &[microsoft::GRAPH_SEND_SCOPE, microsoft::OFFLINE_ACCESS_SCOPE]
            }
        };
        scopes.iter().map(|s| s.to_string()).collect()
    }

    pub fn oauth2_config(&self) -> OAuth2Config {
        OAuth2Config {
            redirect_port: self.redirect_port,
            ..microsoft::oauth2_config(&self.tenant_id, &self.client_id, self.client_secret.clone())
        }
    }

    /// Token acquirer for the configured flow
    pub fn acquirer(&self) -> CoreResult<Box<dyn TokenAcquirer>> {
        let acquirer: Box<dyn TokenAcquirer> = match self.flow {
            FlowKind::ClientCredentials => {
                Box::new(ClientCredentialsAcquirer::new(self.oauth2_config())?)
            }
            FlowKind::Interactive => Box::new(InteractiveAcquirer::new(self.oauth2_config())?),
        };
        Ok(acquirer)
    }

    /// Mail transport for the configured transport kind
    pub fn mail_transport(&self) -> Box<dyn MailTransport> {
        match self.transport {
            TransportKind::Smtp => Box::new(SmtpClient::new(&self.smtp_host, self.smtp_port)),
            TransportKind::Graph if self.flow == FlowKind::Interactive => {
                Box::new(GraphClient::new().delegated())
            }
            TransportKind::Graph => Box::new(GraphClient::new()),
        }
    }
}

fn parse_port(key: &'static str, value: Option<String>) -> Result<Option<u16>, ConfigError> {
    value
        .map(|v| {
            v.trim().parse::<u16>().map_err(|e| ConfigError::Invalid {
                key,
                value: v.clone(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::vars::*;
    use super::*;
    use crate::CoreError;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> CoreResult<RelayConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RelayConfig::from_lookup(|key| vars.get(key).cloned())
    }

    const BASE: [(&str, &str); 3] = [
        (CLIENT_ID, "client-id"),
        (CLIENT_SECRET, "secret"),
        (SENDER, "sender@contoso.com"),
    ];

    #[test]
    fn test_defaults() {
        let config = load(&BASE).unwrap();

        assert_eq!(config.tenant_id, "common");
        assert_eq!(config.flow, FlowKind::ClientCredentials);
        assert_eq!(config.transport, TransportKind::Smtp);
        assert_eq!(config.smtp_host, "smtp.office365.com");
        assert_eq!(config.smtp_port, 587);
        assert_eq!(config.redirect_port, 8855);
        assert_eq!(config.scopes(), ["https://outlook.office365.com/.default"]);
        assert!(config.cache_path.ends_with("token_cache.bin"));
    }

    #[test]
    fn test_overrides() {
        let mut vars = BASE.to_vec();
        vars.extend([
            (TENANT_ID, "contoso"),
            (FLOW, "Interactive"),
            (TRANSPORT, "graph"),
            (SMTP_PORT, "465"),
            (CACHE_PATH, "/tmp/relay/cache.bin"),
        ]);
        let config = load(&vars).unwrap();

        assert_eq!(config.flow, FlowKind::Interactive);
        assert_eq!(config.transport, TransportKind::Graph);
        assert_eq!(config.smtp_port, 465);
        assert_eq!(config.cache_path, PathBuf::from("/tmp/relay/cache.bin"));
        assert_eq!(
            config.scopes(),
            ["https://graph.microsoft.com/Mail.Send", "offline_access"]
        );
        assert_eq!(
            config.oauth2_config().token_url,
            "https://login.microsoftonline.com/contoso/oauth2/v2.0/token"
        );
        assert_eq!(config.mail_transport().name(), "graph");
    }

    #[test]
    fn test_scope_override() {
        let mut vars = BASE.to_vec();
        vars.push((SCOPES, "  a  b "));
        assert_eq!(load(&vars).unwrap().scopes(), ["a", "b"]);
    }

    #[test]
    fn test_missing_required() {
        let err = load(&[(CLIENT_ID, "client-id"), (CLIENT_SECRET, "s")]).unwrap_err();
        assert!(matches!(err, CoreError::Config(ConfigError::Missing(SENDER))));

        // Blank counts as unset
        let err = load(&[(CLIENT_ID, "id"), (SENDER, "a@b.c"), (CLIENT_SECRET, " ")]).unwrap_err();
        assert!(matches!(err, CoreError::Config(ConfigError::Missing(CLIENT_SECRET))));
    }

    #[test]
    fn test_interactive_needs_no_secret() {
        let config = load(&[
            (CLIENT_ID, "client-id"),
            (SENDER, "me@contoso.com"),
            (FLOW, "interactive"),
        ])
        .unwrap();
        assert!(config.client_secret.is_none());
        assert!(config.acquirer().is_ok());
        assert_eq!(config.mail_transport().name(), "smtp");
    }

    #[test]
    fn test_invalid_values() {
        let mut vars = BASE.to_vec();
        vars.push((SMTP_PORT, "not-a-port"));
        let err = load(&vars).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Config(ConfigError::Invalid { key: SMTP_PORT, .. })
        ));

        let mut vars = BASE.to_vec();
        vars.push((TRANSPORT, "carrier-pigeon"));
        assert!(load(&vars).is_err());
    }

    #[test]
    fn test_kind_round_trip() {
        for flow in [FlowKind::ClientCredentials, FlowKind::Interactive] {
            assert_eq!(flow.to_string().parse::<FlowKind>().unwrap(), flow);
        }
        for transport in [TransportKind::Smtp, TransportKind::Graph] {
            assert_eq!(transport.to_string().parse::<TransportKind>().unwrap(), transport);
        }
    }
}
