//! Microsoft Graph API email sending
//!
//! Sends emails via `POST /users/{sender}/sendMail`, or `/me/sendMail` for
//! delegated tokens. App-only tokens need the `Mail.Send` application
//! permission; they cannot use `/me`.

use crate::{MailTransport, OutgoingMessage, SmtpError, SmtpResult};
use async_trait::async_trait;
use base64::Engine;
use mailrelay_auth::XOAuth2Token;
use serde::Serialize;
use tracing::{debug, info};

const GRAPH_BASE: &str = "https://graph.microsoft.com/v1.0";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMailRequest {
    message: GraphMessage,
    save_to_sent_items: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GraphMessage {
    subject: String,
    body: GraphBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    from: Option<GraphRecipient>,
    to_recipients: Vec<GraphRecipient>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    cc_recipients: Vec<GraphRecipient>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    bcc_recipients: Vec<GraphRecipient>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<GraphAttachment>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GraphBody {
    content_type: &'static str,
    content: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GraphRecipient {
    email_address: GraphEmailAddress,
}

#[derive(Serialize)]
struct GraphEmailAddress {
    address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GraphAttachment {
    #[serde(rename = "@odata.type")]
    odata_type: &'static str,
    name: String,
    content_type: String,
    content_bytes: String,
}

fn recipients(addresses: &[String]) -> Vec<GraphRecipient> {
    addresses
        .iter()
        .map(|address| GraphRecipient {
            email_address: GraphEmailAddress {
                address: address.clone(),
                name: None,
            },
        })
        .collect()
}

impl SendMailRequest {
    fn from_message(message: &OutgoingMessage) -> Self {
        // Graph takes a single body, so HTML wins over plain text
        let body = match (&message.html_body, &message.text_body) {
            (Some(html), _) => GraphBody {
                content_type: "HTML",
                content: html.clone(),
            },
            (None, text) => GraphBody {
                content_type: "Text",
                content: text.clone().unwrap_or_default(),
            },
        };

        let engine = base64::engine::general_purpose::STANDARD;
        let attachments = message
            .attachments
            .iter()
            .map(|att| GraphAttachment {
                odata_type: "#microsoft.graph.fileAttachment",
                name: att.filename.clone(),
                content_type: att.mime_type.clone(),
                content_bytes: engine.encode(&att.data),
            })
            .collect();

        Self {
            message: GraphMessage {
                subject: message.subject.clone(),
                body,
                from: message.from_name.as_ref().map(|name| GraphRecipient {
                    email_address: GraphEmailAddress {
                        address: message.from.clone(),
                        name: Some(name.clone()),
                    },
                }),
                to_recipients: recipients(&message.to),
                cc_recipients: recipients(&message.cc),
                bcc_recipients: recipients(&message.bcc),
                attachments,
            },
            save_to_sent_items: true,
        }
    }
}

/// Sends mail through the Graph REST API
#[derive(Debug, Clone)]
pub struct GraphClient {
    client: reqwest::Client,
    base_url: String,
    delegated: bool,
}

impl GraphClient {
    /// Client for app-only tokens, sending as the message's From address
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: GRAPH_BASE.to_string(),
            delegated: false,
        }
    }

    /// Send as the signed-in user via `/me`
    pub fn delegated(mut self) -> Self {
        self.delegated = true;
        self
    }

    /// Point at a different Graph deployment (national clouds, tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn send_mail_url(&self, sender: &str) -> String {
        if self.delegated {
            format!("{}/me/sendMail", self.base_url)
        } else {
            format!("{}/users/{}/sendMail", self.base_url, sender)
        }
    }
}

impl Default for GraphClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MailTransport for GraphClient {
    fn name(&self) -> &str {
        "graph"
    }

    async fn send(&self, message: &OutgoingMessage, credential: &XOAuth2Token) -> SmtpResult<()> {
        message.validate()?;

        let url = self.send_mail_url(credential.email());
        let request = SendMailRequest::from_message(message);
        info!("Sending email via Microsoft Graph as {}", credential.email());
        debug!("Graph sendMail to: {:?}", message.to);

        let response = self
            .client
            .post(&url)
            .bearer_auth(credential.access_token())
            .json(&request)
            .send()
            .await
            .map_err(|e| SmtpError::SendFailed(format!("Graph API request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            info!("Email sent successfully via Graph API (status {})", status);
            return Ok(());
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read response body".to_string());
        Err(SmtpError::ApiError {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OutgoingAttachment;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn sample() -> OutgoingMessage {
        OutgoingMessage::new("sender@contoso.com", "Quarterly report")
            .to("a@example.com")
            .cc("b@example.com")
            .text("See attached.")
            .attachment(OutgoingAttachment {
                filename: "q3.csv".to_string(),
                mime_type: "text/csv".to_string(),
                data: b"a,b\n1,2\n".to_vec(),
            })
    }

    #[test]
    fn test_request_shape() {
        let json = serde_json::to_value(SendMailRequest::from_message(&sample())).unwrap();

        assert_eq!(json["saveToSentItems"], true);
        assert_eq!(json["message"]["subject"], "Quarterly report");
        assert_eq!(json["message"]["body"]["contentType"], "Text");
        assert_eq!(
            json["message"]["toRecipients"][0]["emailAddress"]["address"],
            "a@example.com"
        );
        assert_eq!(
            json["message"]["ccRecipients"][0]["emailAddress"]["address"],
            "b@example.com"
        );
        assert!(json["message"].get("bccRecipients").is_none());
        assert!(json["message"].get("from").is_none());

        let attachment = &json["message"]["attachments"][0];
        assert_eq!(attachment["@odata.type"], "#microsoft.graph.fileAttachment");
        assert_eq!(attachment["contentBytes"], "YSxiCjEsMgo=");
    }

    #[test]
    fn test_html_body_preferred() {
        let msg = sample().html("<p>See attached.</p>").from_name("Reports");
        let json = serde_json::to_value(SendMailRequest::from_message(&msg)).unwrap();

        assert_eq!(json["message"]["body"]["contentType"], "HTML");
        assert_eq!(json["message"]["from"]["emailAddress"]["name"], "Reports");
    }

    #[test]
    fn test_send_mail_url() {
        let client = GraphClient::new().with_base_url("http://localhost:1/v1.0/");
        assert_eq!(
            client.send_mail_url("sender@contoso.com"),
            "http://localhost:1/v1.0/users/sender@contoso.com/sendMail"
        );
        assert_eq!(
            client.delegated().send_mail_url("ignored@contoso.com"),
            "http://localhost:1/v1.0/me/sendMail"
        );
    }

    /// Accepts one HTTP request and answers with `status_line`
    async fn serve_once(
        status_line: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}/v1.0", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .find_map(|l| {
                            l.to_ascii_lowercase()
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if request.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).to_string()
        });

        (base, handle)
    }

    #[tokio::test]
    async fn test_send_posts_with_bearer_token() {
        let (base, server) = serve_once("202 Accepted", "").await;
        let client = GraphClient::new().with_base_url(base);
        let credential = XOAuth2Token::new("sender@contoso.com", "app-token");

        client.send(&sample(), &credential).await.unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /v1.0/users/sender@contoso.com/sendMail"));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer app-token"));
        assert!(request.contains("\"saveToSentItems\":true"));
    }

    #[tokio::test]
    async fn test_send_reports_api_error() {
        let (base, server) = serve_once("403 Forbidden", "{\"error\":\"ErrorAccessDenied\"}").await;
        let client = GraphClient::new().with_base_url(base);
        let credential = XOAuth2Token::new("sender@contoso.com", "app-token");

        let result = client.send(&sample(), &credential).await;
        server.await.unwrap();

        match result {
            Err(SmtpError::ApiError { status, body }) => {
                assert_eq!(status, 403);
                assert!(body.contains("ErrorAccessDenied"));
            }
            other => panic!("expected ApiError, got {:?}", other),
        }
    }
}
