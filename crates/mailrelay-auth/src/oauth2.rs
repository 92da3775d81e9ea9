//! OAuth2 grants against the identity provider
//!
//! Wraps the `oauth2` crate for the three grants MailRelay uses:
//! client credentials for daemon senders, authorization code with PKCE
//! (RFC 7636) for interactive sign-in, and refresh tokens to renew the latter.

use crate::{AuthError, AuthResult};
use oauth2::{
    basic::{BasicClient, BasicTokenResponse},
    AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, RefreshToken, Scope, TokenResponse, TokenUrl,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

/// Seconds before expiry at which a token is no longer handed out
const EXPIRY_MARGIN_SECS: i64 = 300;

/// OAuth2 provider configuration
#[derive(Debug, Clone)]
pub struct OAuth2Config {
    /// OAuth2 client ID
    pub client_id: String,
    /// OAuth2 client secret (required for client credentials)
    pub client_secret: Option<String>,
    /// Authorization endpoint URL
    pub auth_url: String,
    /// Token endpoint URL
    pub token_url: String,
    /// Required scopes
    pub scopes: Vec<String>,
    /// Local port for OAuth2 callback
    pub redirect_port: u16,
}

/// Token pair containing access and refresh tokens
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TokenPair {
    /// Access token for API calls
    pub access_token: String,
    /// Refresh token for obtaining new access tokens
    pub refresh_token: Option<String>,
    /// Token expiration timestamp (Unix seconds)
    pub expires_at: Option<i64>,
    /// Scopes granted by the provider
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
}

impl TokenPair {
    /// Check if the access token is expired or about to expire
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at - chrono::Utc::now().timestamp() < EXPIRY_MARGIN_SECS,
            None => false,
        }
    }

    /// Seconds until expiry, if the provider reported one
    pub fn expires_in(&self) -> Option<i64> {
        self.expires_at
            .map(|expires_at| expires_at - chrono::Utc::now().timestamp())
    }

    fn from_response(response: &BasicTokenResponse, previous_refresh: Option<&str>) -> Self {
        let expires_at = response
            .expires_in()
            .map(|duration| chrono::Utc::now().timestamp() + duration.as_secs() as i64);

        Self {
            access_token: response.access_token().secret().clone(),
            refresh_token: response
                .refresh_token()
                .map(|t| t.secret().clone())
                .or_else(|| previous_refresh.map(str::to_string)),
            expires_at,
            scopes: response
                .scopes()
                .map(|scopes| scopes.iter().map(|s| s.to_string()).collect())
                .unwrap_or_default(),
        }
    }
}

/// Runs OAuth2 grants for one client registration
pub struct OAuth2Flow {
    config: OAuth2Config,
    client: BasicClient,
    pkce_verifier: Option<PkceCodeVerifier>,
    csrf_token: Option<CsrfToken>,
}

impl OAuth2Flow {
    /// Create a new OAuth2 flow
    pub fn new(config: OAuth2Config) -> AuthResult<Self> {
        let client_id = ClientId::new(config.client_id.clone());
        let client_secret = config.client_secret.clone().map(ClientSecret::new);
        let auth_url = AuthUrl::new(config.auth_url.clone())
            .map_err(|e| AuthError::InvalidConfig(format!("Invalid auth URL: {}", e)))?;
        let token_url = TokenUrl::new(config.token_url.clone())
            .map_err(|e| AuthError::InvalidConfig(format!("Invalid token URL: {}", e)))?;

        let redirect_url = RedirectUrl::new(format!(
            "http://127.0.0.1:{}/callback",
            config.redirect_port
        ))
        .map_err(|e| AuthError::InvalidConfig(format!("Invalid redirect URL: {}", e)))?;

        // Entra ID expects the secret in the form body rather than Basic auth
        let client = BasicClient::new(client_id, client_secret, auth_url, Some(token_url))
            .set_auth_type(AuthType::RequestBody)
            .set_redirect_uri(redirect_url);

        Ok(Self {
            config,
            client,
            pkce_verifier: None,
            csrf_token: None,
        })
    }

    pub fn config(&self) -> &OAuth2Config {
        &self.config
    }

    /// Request an app-only token with the client credentials grant
    pub async fn client_credentials(&self, scopes: &[String]) -> AuthResult<TokenPair> {
        if self.config.client_secret.is_none() {
            return Err(AuthError::InvalidConfig(
                "Client credentials grant requires a client secret".to_string(),
            ));
        }

        let mut request = self.client.exchange_client_credentials();
        for scope in scopes {
            request = request.add_scope(Scope::new(scope.clone()));
        }

        let token_response = request
            .request_async(oauth2::reqwest::async_http_client)
            .await
            .map_err(|e| AuthError::TokenExchangeFailed(e.to_string()))?;

        info!("Acquired app token for client {}", self.config.client_id);
        Ok(TokenPair::from_response(&token_response, None))
    }

    /// Generate the authorization URL for the user to visit
    pub fn get_auth_url(&mut self) -> String {
        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let mut auth_request = self
            .client
            .authorize_url(CsrfToken::new_random)
            .set_pkce_challenge(pkce_challenge);

        for scope in &self.config.scopes {
            auth_request = auth_request.add_scope(Scope::new(scope.clone()));
        }

        let (auth_url, csrf_token) = auth_request.url();

        self.pkce_verifier = Some(pkce_verifier);
        self.csrf_token = Some(csrf_token);

        auth_url.to_string()
    }

    /// Bind the loopback redirect port
    ///
    /// Do this before showing the authorization URL, so a busy port fails
    /// before the user signs in rather than after.
    pub async fn bind_callback(&self) -> AuthResult<TcpListener> {
        let listener = TcpListener::bind(("127.0.0.1", self.config.redirect_port))
            .await
            .map_err(|e| {
                AuthError::CallbackServerFailed(format!(
                    "Cannot listen on port {}: {}",
                    self.config.redirect_port, e
                ))
            })?;

        info!(
            "Listening for OAuth2 callback on port {}",
            self.config.redirect_port
        );
        Ok(listener)
    }

    /// Wait for the OAuth2 callback and exchange the code for tokens
    ///
    /// Accepts the single request the browser makes on `listener` after the
    /// user authorizes the application.
    pub async fn wait_for_callback(&mut self, listener: TcpListener) -> AuthResult<TokenPair> {
        let pkce_verifier = self
            .pkce_verifier
            .take()
            .ok_or_else(|| AuthError::InvalidConfig("Auth URL not generated".to_string()))?;

        let csrf_token = self
            .csrf_token
            .take()
            .ok_or_else(|| AuthError::InvalidConfig("Auth URL not generated".to_string()))?;

        let (mut stream, _) = listener
            .accept()
            .await
            .map_err(|e| AuthError::CallbackServerFailed(e.to_string()))?;

        let mut request_line = String::new();
        BufReader::new(&mut stream)
            .read_line(&mut request_line)
            .await
            .map_err(|e| AuthError::CallbackServerFailed(e.to_string()))?;

        debug!("Received callback request: {}", request_line.trim());

        let (code, state) = match parse_callback_url(&request_line) {
            Ok(parsed) => parsed,
            Err(e) => {
                send_http_response(&mut stream, "Error", &e.to_string()).await;
                return Err(e);
            }
        };

        if state != *csrf_token.secret() {
            send_http_response(&mut stream, "Error", "Invalid state parameter").await;
            return Err(AuthError::AuthorizationFailed(
                "CSRF token mismatch".to_string(),
            ));
        }

        send_http_response(
            &mut stream,
            "Success",
            "You can close this window and return to the terminal.",
        )
        .await;

        let token_response = self
            .client
            .exchange_code(AuthorizationCode::new(code))
            .set_pkce_verifier(pkce_verifier)
            .request_async(oauth2::reqwest::async_http_client)
            .await
            .map_err(|e| AuthError::TokenExchangeFailed(e.to_string()))?;

        Ok(TokenPair::from_response(&token_response, None))
    }

    /// Refresh an access token using a refresh token
    pub async fn refresh_token(&self, refresh_token: &str) -> AuthResult<TokenPair> {
        let token_response = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(oauth2::reqwest::async_http_client)
            .await
            .map_err(|e| AuthError::TokenExchangeFailed(e.to_string()))?;

        Ok(TokenPair::from_response(&token_response, Some(refresh_token)))
    }
}

/// Parse the authorization code and state from a callback request line
fn parse_callback_url(request_line: &str) -> AuthResult<(String, String)> {
    // Request line format: "GET /callback?code=xxx&state=yyy HTTP/1.1"
    let path = request_line
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| AuthError::AuthorizationFailed("Invalid callback request".to_string()))?;

    let url = url::Url::parse(&format!("http://localhost{}", path))
        .map_err(|e| AuthError::AuthorizationFailed(format!("Invalid callback URL: {}", e)))?;

    let mut code = None;
    let mut state = None;

    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.to_string()),
            "state" => state = Some(value.to_string()),
            "error" => {
                let description = url
                    .query_pairs()
                    .find(|(k, _)| k == "error_description")
                    .map(|(_, v)| v.to_string())
                    .unwrap_or_else(|| value.to_string());
                return Err(AuthError::AuthorizationFailed(description));
            }
            _ => {}
        }
    }

    match (code, state) {
        (Some(c), Some(s)) => Ok((c, s)),
        _ => Err(AuthError::AuthorizationFailed(
            "Missing code or state in callback".to_string(),
        )),
    }
}

/// Send a minimal HTML page back to the browser
async fn send_http_response(stream: &mut TcpStream, title: &str, message: &str) {
    let body = format!(
        "<!DOCTYPE html>\n<html><head><title>{title} - MailRelay</title></head>\
         <body style=\"font-family: system-ui, sans-serif; text-align: center; margin-top: 4rem\">\
         <h1>{title}</h1><p>{message}</p></body></html>"
    );

    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\n\
         Connection: close\r\n\r\n{}",
        body.len(),
        body
    );

    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.flush().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> OAuth2Config {
        OAuth2Config {
            client_id: "client".to_string(),
            client_secret: None,
            auth_url: "https://login.example.com/authorize".to_string(),
            token_url: "https://login.example.com/token".to_string(),
            scopes: vec!["SMTP.Send".to_string(), "offline_access".to_string()],
            redirect_port: 8855,
        }
    }

    #[test]
    fn test_token_pair_expiration() {
        // Token that expires in 1 hour - should not be expired
        let token = TokenPair {
            access_token: "test".to_string(),
            refresh_token: None,
            expires_at: Some(chrono::Utc::now().timestamp() + 3600),
            scopes: Vec::new(),
        };
        assert!(!token.is_expired());

        // Token that expires in 2 minutes - inside the 5 minute margin
        let token = TokenPair {
            expires_at: Some(chrono::Utc::now().timestamp() + 120),
            ..token
        };
        assert!(token.is_expired());

        let token = TokenPair {
            expires_at: Some(chrono::Utc::now().timestamp() - 100),
            ..token
        };
        assert!(token.is_expired());

        let token = TokenPair {
            expires_at: None,
            ..token
        };
        assert!(!token.is_expired());
    }

    #[test]
    fn test_parse_callback() {
        let (code, state) =
            parse_callback_url("GET /callback?code=abc%2F1&state=xyz HTTP/1.1\r\n").unwrap();
        assert_eq!(code, "abc/1");
        assert_eq!(state, "xyz");
    }

    #[test]
    fn test_parse_callback_error() {
        let err = parse_callback_url(
            "GET /callback?error=access_denied&error_description=User+declined HTTP/1.1",
        )
        .unwrap_err();
        assert!(matches!(err, AuthError::AuthorizationFailed(ref d) if d == "User declined"));

        assert!(parse_callback_url("GET /callback?code=abc HTTP/1.1").is_err());
        assert!(parse_callback_url("garbage").is_err());
    }

    #[test]
    fn test_auth_url_contains_pkce_and_scopes() {
        let mut flow = OAuth2Flow::new(config()).unwrap();
        let url = flow.get_auth_url();

        assert!(url.starts_with("https://login.example.com/authorize?"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("SMTP.Send"));
        assert!(url.contains("redirect_uri=http%3A%2F%2F127.0.0.1%3A8855%2Fcallback"));
    }

    #[test]
    fn test_invalid_urls_rejected() {
        let mut bad = config();
        bad.token_url = "not a url".to_string();
        assert!(matches!(
            OAuth2Flow::new(bad),
            Err(AuthError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_client_credentials_requires_secret() {
        let flow = OAuth2Flow::new(config()).unwrap();
        let result = flow.client_credentials(&["scope".to_string()]).await;
        assert!(matches!(result, Err(AuthError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_callback_requires_auth_url() {
        let mut flow = OAuth2Flow::new(OAuth2Config {
            redirect_port: 0,
            ..config()
        })
        .unwrap();
        let listener = flow.bind_callback().await.unwrap();
        assert!(matches!(
            flow.wait_for_callback(listener).await,
            Err(AuthError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_busy_port_fails_to_bind() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();
        let flow = OAuth2Flow::new(OAuth2Config {
            redirect_port: port,
            ..config()
        })
        .unwrap();

        assert!(matches!(
            flow.bind_callback().await,
            Err(AuthError::CallbackServerFailed(_))
        ));
    }
}
