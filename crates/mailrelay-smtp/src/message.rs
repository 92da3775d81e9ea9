//! Outgoing message composition

use crate::{SmtpError, SmtpResult};
use lettre::{
    message::{header::ContentType, Attachment, Mailbox, MultiPart, SinglePart},
    Address, Message,
};
use std::path::Path;

const OCTET_STREAM: &str = "application/octet-stream";

/// An attachment to include in an outgoing message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingAttachment {
    /// Filename to display
    pub filename: String,
    /// MIME type (e.g., "application/pdf")
    pub mime_type: String,
    /// Raw file data
    pub data: Vec<u8>,
}

impl OutgoingAttachment {
    /// Read a file from disk, guessing its MIME type from the extension
    pub async fn from_path(path: impl AsRef<Path>) -> SmtpResult<Self> {
        let path = path.as_ref();
        let data = tokio::fs::read(path)
            .await
            .map_err(|source| SmtpError::Attachment {
                path: path.display().to_string(),
                source,
            })?;

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());

        Ok(Self {
            mime_type: mime_type_for(&filename).to_string(),
            filename,
            data,
        })
    }
}

/// Email message to send
#[derive(Debug, Clone, Default)]
pub struct OutgoingMessage {
    /// From address
    pub from: String,
    /// From display name
    pub from_name: Option<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    /// Plain text body
    pub text_body: Option<String>,
    /// HTML body
    pub html_body: Option<String>,
    pub attachments: Vec<OutgoingAttachment>,
}

impl OutgoingMessage {
    /// Start a message from `from` with the given subject
    pub fn new(from: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            subject: subject.into(),
            ..Default::default()
        }
    }

    pub fn from_name(mut self, name: impl Into<String>) -> Self {
        self.from_name = Some(name.into());
        self
    }

    pub fn to(mut self, address: impl Into<String>) -> Self {
        self.to.push(address.into());
        self
    }

    pub fn cc(mut self, address: impl Into<String>) -> Self {
        self.cc.push(address.into());
        self
    }

    pub fn bcc(mut self, address: impl Into<String>) -> Self {
        self.bcc.push(address.into());
        self
    }

    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.text_body = Some(body.into());
        self
    }

    pub fn html(mut self, body: impl Into<String>) -> Self {
        self.html_body = Some(body.into());
        self
    }

    pub fn attachment(mut self, attachment: OutgoingAttachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// All envelope recipients
    pub fn recipients(&self) -> impl Iterator<Item = &str> {
        self.to
            .iter()
            .chain(&self.cc)
            .chain(&self.bcc)
            .map(String::as_str)
    }

    /// Check addresses and recipients before handing off to a transport
    pub fn validate(&self) -> SmtpResult<()> {
        parse_address(&self.from)?;
        if self.recipients().next().is_none() {
            return Err(SmtpError::NoRecipients);
        }
        for address in self.recipients() {
            parse_address(address)?;
        }
        Ok(())
    }
}

fn parse_address(address: &str) -> SmtpResult<Address> {
    address
        .parse()
        .map_err(|e| SmtpError::InvalidAddress(format!("{}: {}", address, e)))
}

/// Build a MIME message with lettre
pub fn build_lettre_message(msg: &OutgoingMessage) -> SmtpResult<Message> {
    msg.validate()?;

    let from = Mailbox::new(msg.from_name.clone(), parse_address(&msg.from)?);
    let mut builder = Message::builder().from(from).subject(&msg.subject);

    for to in &msg.to {
        builder = builder.to(Mailbox::new(None, parse_address(to)?));
    }
    for cc in &msg.cc {
        builder = builder.cc(Mailbox::new(None, parse_address(cc)?));
    }
    for bcc in &msg.bcc {
        builder = builder.bcc(Mailbox::new(None, parse_address(bcc)?));
    }

    let text_part = |body: &str| {
        SinglePart::builder()
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
    };
    let html_part = |body: &str| {
        SinglePart::builder()
            .header(ContentType::TEXT_HTML)
            .body(body.to_string())
    };

    let body = match (&msg.text_body, &msg.html_body) {
        (Some(text), Some(html)) => MultiPart::alternative()
            .singlepart(text_part(text))
            .singlepart(html_part(html)),
        (None, Some(html)) => MultiPart::alternative().singlepart(html_part(html)),
        (Some(text), None) => MultiPart::alternative().singlepart(text_part(text)),
        (None, None) => MultiPart::alternative().singlepart(text_part("")),
    };

    let body = if msg.attachments.is_empty() {
        body
    } else {
        let mut mixed = MultiPart::mixed().multipart(body);
        for att in &msg.attachments {
            let content_type = ContentType::parse(&att.mime_type)
                .or_else(|_| ContentType::parse(OCTET_STREAM))
                .map_err(|e| SmtpError::MessageBuildError(e.to_string()))?;
            mixed = mixed.singlepart(
                Attachment::new(att.filename.clone()).body(att.data.clone(), content_type),
            );
        }
        mixed
    };

    builder
        .multipart(body)
        .map_err(|e| SmtpError::MessageBuildError(e.to_string()))
}

/// MIME type for common attachment extensions
fn mime_type_for(filename: &str) -> &'static str {
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "txt" | "log" => "text/plain",
        "csv" => "text/csv",
        "htm" | "html" => "text/html",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => OCTET_STREAM,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> OutgoingMessage {
        OutgoingMessage::new("sender@contoso.com", "Test Email via SMTP OAuth")
            .from_name("Sender Name")
            .to("recipient@example.com")
            .text("This is a test email sent using SMTP with OAuth2.")
    }

    fn formatted(msg: &OutgoingMessage) -> String {
        String::from_utf8(build_lettre_message(msg).unwrap().formatted()).unwrap()
    }

    #[test]
    fn test_builds_plain_message() {
        let raw = formatted(&sample());
        assert!(raw.contains("Sender Name"));
        assert!(raw.contains("<sender@contoso.com>"));
        assert!(raw.contains("To: recipient@example.com"));
        assert!(raw.contains("Subject: Test Email via SMTP OAuth"));
        assert!(raw.contains("text/plain"));
        assert!(!raw.contains("multipart/mixed"));
    }

    #[test]
    fn test_attachments_use_mixed() {
        let msg = sample().attachment(OutgoingAttachment {
            filename: "report.pdf".to_string(),
            mime_type: "not a mime type".to_string(),
            data: b"%PDF-1.4".to_vec(),
        });

        let raw = formatted(&msg);
        assert!(raw.contains("multipart/mixed"));
        assert!(raw.contains("report.pdf"));
        assert!(raw.contains("application/octet-stream"));
    }

    #[test]
    fn test_rejects_missing_recipients() {
        let msg = OutgoingMessage::new("sender@contoso.com", "No one");
        assert!(matches!(
            build_lettre_message(&msg),
            Err(SmtpError::NoRecipients)
        ));
    }

    #[test]
    fn test_rejects_bad_address() {
        let msg = sample().cc("not-an-address");
        assert!(matches!(
            msg.validate(),
            Err(SmtpError::InvalidAddress(ref a)) if a.starts_with("not-an-address")
        ));

        let msg = OutgoingMessage::new("nobody", "x").to("recipient@example.com");
        assert!(matches!(msg.validate(), Err(SmtpError::InvalidAddress(_))));
    }

    #[test]
    fn test_recipients_cover_all_fields() {
        let msg = sample().cc("cc@example.com").bcc("bcc@example.com");
        let all: Vec<&str> = msg.recipients().collect();
        assert_eq!(
            all,
            ["recipient@example.com", "cc@example.com", "bcc@example.com"]
        );
    }

    #[test]
    fn test_mime_type_guess() {
        assert_eq!(mime_type_for("Report.PDF"), "application/pdf");
        assert_eq!(mime_type_for("photo.jpeg"), "image/jpeg");
        assert_eq!(mime_type_for("README"), OCTET_STREAM);
    }

    #[tokio::test]
    async fn test_attachment_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"hello").unwrap();

        let att = OutgoingAttachment::from_path(&path).await.unwrap();
        assert_eq!(att.filename, "notes.txt");
        assert_eq!(att.mime_type, "text/plain");
        assert_eq!(att.data, b"hello");

        let missing = OutgoingAttachment::from_path(dir.path().join("missing.bin")).await;
        assert!(matches!(missing, Err(SmtpError::Attachment { .. })));
    }
}
