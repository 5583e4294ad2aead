//! Courtesy reply composition.

use crate::extractor::ExtractionResult;
use crate::mail::{InboundMessage, OutboundMessage};

/// Reply subject: `Re:` glued to the original, no space.
pub fn reply_subject(original: &str) -> String {
    format!("Re:{original}")
}

/// Characters that end a line, besides the `\r\n` pair.
const LINE_BREAKS: &[char] = &[
    '\n', '\r', '\u{0b}', '\u{0c}', '\u{1c}', '\u{1d}', '\u{1e}', '\u{85}', '\u{2028}', '\u{2029}',
];

/// Every line of `text` prefixed with `"> "`, each ending in `\n`. A bare
/// `\r` ends a line just like `\n` or `\r\n`.
pub fn quote_original(text: &str) -> String {
    let text = text.replace("\r\n", "\n");
    let mut lines: Vec<&str> = text.split(LINE_BREAKS).collect();
    if lines.last() == Some(&"") {
        lines.pop();
    }
    lines.iter().map(|line| format!("> {line}\n")).collect()
}

/// The fixed decline template followed by the quoted original.
pub fn render_body(extraction: &ExtractionResult, signature: &str, original: &str) -> String {
    let name = non_empty(extraction.name.as_deref()).unwrap_or("");
    let company = non_empty(extraction.company.as_deref()).unwrap_or("your company");

    format!(
        "Hi {name},\n\
         \n\
         Thanks for reaching out! I'm not interested in new opportunities at this time, \
         but I'll keep {company} in mind for the future.\n\
         \n\
         \n\
         Thanks again,\n\
         {signature}\n\
         \n\
         {quoted}",
        quoted = quote_original(original),
    )
}

/// Build the reply to `original`, addressed to its sender only.
pub fn compose(
    original: &InboundMessage,
    extraction: &ExtractionResult,
    from_address: &str,
    signature: &str,
) -> OutboundMessage {
    OutboundMessage {
        from: from_address.to_string(),
        to: vec![original.from.clone()],
        subject: reply_subject(&original.subject),
        in_reply_to: original.message_id().map(str::to_string),
        body: render_body(extraction, signature, &original.text),
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
