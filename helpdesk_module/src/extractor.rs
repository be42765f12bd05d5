//! Plain-text extraction from Gmail MIME part trees.
//!
//! Gmail hands back a recursive part structure whose leaves carry
//! base64url-encoded bodies. Extraction scans the whole tree first: the
//! concatenated text/plain leaves win when any exist, and stripped
//! text/html is the fallback, regardless of which of the two the sender
//! serialized first.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::gmail::types::{GmailMessage, MessagePart};

/// A MIME part reduced to what extraction needs. Containers recurse into
/// their children; any body data on the container itself is ignored.
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Leaf {
        mime_type: String,
        data: Option<String>,
    },
    Container {
        mime_type: String,
        children: Vec<Part>,
    },
}

/// Best-effort text body of a fetched message. None when the message has
/// no payload or no usable text part.
pub fn extract_message_text(message: &GmailMessage) -> Option<String> {
    let payload = message.payload.as_ref()?;
    extract_plain_text(&part_from_payload(payload))
}

pub(crate) fn part_from_payload(payload: &MessagePart) -> Part {
    if payload.parts.is_empty() {
        Part::Leaf {
            mime_type: payload.mime_type.clone(),
            data: payload.body.as_ref().and_then(|body| body.data.clone()),
        }
    } else {
        Part::Container {
            mime_type: payload.mime_type.clone(),
            children: payload.parts.iter().map(part_from_payload).collect(),
        }
    }
}

pub fn extract_plain_text(part: &Part) -> Option<String> {
    let mut plain = Vec::new();
    let mut html = Vec::new();
    collect_texts(part, &mut plain, &mut html);
    let text = if plain.is_empty() {
        html.iter()
            .map(|markup| strip_html_tags(markup))
            .filter(|stripped| !stripped.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    } else {
        plain.join("\n")
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Depth-first walk collecting every decodable text leaf in document
/// order, so the plain-over-html preference cannot depend on where the
/// sender placed the parts.
fn collect_texts(part: &Part, plain: &mut Vec<String>, html: &mut Vec<String>) {
    match part {
        Part::Leaf { mime_type, data } => {
            let mime = mime_type.to_ascii_lowercase();
            let is_plain = mime.starts_with("text/plain");
            let is_html = mime.starts_with("text/html");
            if !is_plain && !is_html {
                return;
            }
            let Some(data) = data else { return };
            let Some(decoded) = decode_body_data(data) else {
                return;
            };
            let trimmed = decoded.trim();
            if trimmed.is_empty() {
                return;
            }
            if is_plain {
                plain.push(trimmed.to_string());
            } else {
                html.push(decoded);
            }
        }
        Part::Container { children, .. } => {
            for child in children {
                collect_texts(child, plain, html);
            }
        }
    }
}

/// Gmail body data is URL-safe base64, sometimes still carrying `=`
/// padding. Invalid data yields None rather than an error; a single
/// undecodable part should not sink the whole message.
pub(crate) fn decode_body_data(data: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(data.trim_end_matches('=')).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

pub fn strip_html_tags(input: &str) -> String {
    let mut text = String::with_capacity(input.len());
    let mut in_tag = false;
    for ch in input.chars() {
        match ch {
            '<' => {
                in_tag = true;
                text.push(' ');
            }
            '>' => in_tag = false,
            _ if !in_tag => text.push(ch),
            _ => {}
        }
    }
    collapse_whitespace(&decode_entities(&text))
}

// &amp; goes last so "&amp;lt;" comes out as a literal "&lt;".
fn decode_entities(input: &str) -> String {
    input
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn collapse_whitespace(input: &str) -> String {
    let mut lines = Vec::new();
    for line in input.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if !collapsed.is_empty() {
            lines.push(collapsed);
        }
    }
    lines.join("\n")
}
