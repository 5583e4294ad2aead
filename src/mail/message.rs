//! Inbound and outbound message types.

use lettre::Message;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use mail_parser::MessageParser;

use crate::error::ResponderError;

/// A message fetched from the source folder. Never mutated after fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Folder-scoped IMAP UID.
    pub uid: u32,
    /// Sender address.
    pub from: String,
    pub subject: String,
    /// Plain-text body.
    pub text: String,
    /// Headers in message order, as `(name, value)`.
    pub headers: Vec<(String, String)>,
}

impl InboundMessage {
    /// Case-insensitive header lookup, first match wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Raw `Message-ID` header value, angle brackets included.
    pub fn message_id(&self) -> Option<&str> {
        self.header("Message-ID")
    }

    /// Already part of a reply thread.
    pub fn is_reply(&self) -> bool {
        self.headers
            .iter()
            .any(|(n, _)| n.eq_ignore_ascii_case("In-Reply-To"))
    }

    /// Parse an RFC 5322 message fetched under `uid`.
    pub fn parse(uid: u32, raw: &[u8]) -> Option<Self> {
        let parsed = MessageParser::default().parse(raw)?;

        let from = parsed
            .from()
            .and_then(|addr| addr.first())
            .and_then(|a| a.address())
            .map(|s| s.to_string())
            .unwrap_or_default();
        let subject = parsed.subject().unwrap_or_default().to_string();

        let text = if let Some(text) = parsed.body_text(0) {
            text.into_owned()
        } else if let Some(html) = parsed.body_html(0) {
            strip_html(html.as_ref())
        } else {
            String::new()
        };

        let headers = parsed
            .headers()
            .iter()
            .map(|h| {
                let name = h.name().to_string();
                let value = if name.eq_ignore_ascii_case("Message-ID") {
                    parsed
                        .message_id()
                        .map(|id| format!("<{id}>"))
                        .unwrap_or_default()
                } else {
                    h.value().as_text().unwrap_or_default().to_string()
                };
                (name, value)
            })
            .collect();

        Some(Self {
            uid,
            from,
            subject,
            text,
            headers,
        })
    }
}

/// A composed reply, built once per processed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub in_reply_to: Option<String>,
    pub body: String,
}

impl OutboundMessage {
    /// Build the RFC 5322 message.
    pub fn to_message(&self) -> Result<Message, ResponderError> {
        let from: Mailbox = self
            .from
            .parse()
            .map_err(|e| ResponderError::Compose(format!("invalid from address: {e}")))?;

        let mut builder = Message::builder().from(from).subject(self.subject.clone());
        for to in &self.to {
            let mailbox: Mailbox = to.parse().map_err(|e| {
                ResponderError::Compose(format!("invalid recipient address {to:?}: {e}"))
            })?;
            builder = builder.to(mailbox);
        }
        if let Some(in_reply_to) = &self.in_reply_to {
            builder = builder.in_reply_to(in_reply_to.clone());
        }

        builder
            .header(ContentType::TEXT_PLAIN)
            .body(self.body.clone())
            .map_err(|e| ResponderError::Compose(format!("failed to build email: {e}")))
    }

    /// Wire form of the message, as it will be sent.
    pub fn render(&self) -> Result<String, ResponderError> {
        let message = self.to_message()?;
        Ok(String::from_utf8_lossy(&message.formatted()).into_owned())
    }
}

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &str = "From: Jane Recruiter <jane@acme.example>\r\n\
        To: me@example.com\r\n\
        Subject: Opportunity at Acme\r\n\
        Message-ID: <abc123@acme.example>\r\n\
        Content-Type: text/plain; charset=utf-8\r\n\
        \r\n\
        Hi there,\r\n\
        We have a role for you.\r\n";

    fn inbound(headers: &[(&str, &str)]) -> InboundMessage {
        InboundMessage {
            uid: 1,
            from: "a@b.example".into(),
            subject: "s".into(),
            text: "t".into(),
            headers: headers
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn parse_extracts_fields() {
        let msg = InboundMessage::parse(7, RAW.as_bytes()).unwrap();
        assert_eq!(msg.uid, 7);
        assert_eq!(msg.from, "jane@acme.example");
        assert_eq!(msg.subject, "Opportunity at Acme");
        assert!(msg.text.contains("We have a role for you."));
        assert_eq!(msg.message_id(), Some("<abc123@acme.example>"));
        assert!(!msg.is_reply());
    }

    #[test]
    fn parse_detects_reply_header() {
        let raw = RAW.replace(
            "Message-ID: <abc123@acme.example>\r\n",
            "Message-ID: <abc123@acme.example>\r\nIn-Reply-To: <x@y.example>\r\n",
        );
        let msg = InboundMessage::parse(1, raw.as_bytes()).unwrap();
        assert!(msg.is_reply());
    }

    #[test]
    fn parse_falls_back_to_html() {
        let raw = "From: a@b.example\r\nSubject: Hi\r\nContent-Type: text/html\r\n\r\n<p>Hello <b>there</b></p>\r\n";
        let msg = InboundMessage::parse(1, raw.as_bytes()).unwrap();
        assert!(msg.text.contains("Hello"));
        assert!(msg.text.contains("there"));
        assert!(!msg.text.contains("<b>"));
    }

    #[test]
    fn reply_detection_is_case_insensitive() {
        assert!(inbound(&[("in-reply-to", "<x>")]).is_reply());
        assert!(inbound(&[("IN-REPLY-TO", "<x>")]).is_reply());
        assert!(!inbound(&[("References", "<x>")]).is_reply());
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let msg = inbound(&[("message-id", "<m@x>")]);
        assert_eq!(msg.message_id(), Some("<m@x>"));
        assert_eq!(inbound(&[]).message_id(), None);
    }

    #[test]
    fn outbound_renders_threading_headers() {
        let out = OutboundMessage {
            from: "me@example.com".into(),
            to: vec!["jane@acme.example".into()],
            subject: "Re:Opportunity at Acme".into(),
            in_reply_to: Some("<abc123@acme.example>".into()),
            body: "Hi Jane,\n".into(),
        };
        let rendered = out.render().unwrap();
        assert!(rendered.contains("From: me@example.com"));
        assert!(rendered.contains("To: jane@acme.example"));
        assert!(rendered.contains("Subject: Re:Opportunity at Acme"));
        assert!(rendered.contains("In-Reply-To: <abc123@acme.example>"));
        assert!(rendered.contains("Hi Jane,"));
    }

    #[test]
    fn outbound_rejects_bad_address() {
        let out = OutboundMessage {
            from: "me@example.com".into(),
            to: vec!["not an address".into()],
            subject: "Re:x".into(),
            in_reply_to: None,
            body: String::new(),
        };
        assert!(matches!(out.to_message(), Err(ResponderError::Compose(_))));
    }

    #[test]
    fn strip_html_nested_tags() {
        assert_eq!(
            strip_html("<div><b>Bold</b> and <i>italic</i></div>"),
            "Bold and italic"
        );
    }

    #[test]
    fn strip_html_plain_text_passthrough() {
        assert_eq!(strip_html("No HTML here"), "No HTML here");
    }
}
