//! Tolerant HTML reader and writer for page snapshots.
//!
//! The reader is not a conforming HTML5 parser. It understands elements,
//! quoted/unquoted attributes, void and raw-text elements, comments (dropped),
//! the doctype and the common character references, and it recovers from
//! unbalanced end tags by closing up to the nearest matching open element.

use super::{Document, NodeId, NodeKind};
use anyhow::Result;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

pub fn parse(input: &str) -> Result<Document> {
    let mut doc = Document::new();
    let mut stack: Vec<NodeId> = vec![doc.root()];
    let mut pos = 0;

    while pos < input.len() {
        let rest = &input[pos..];

        if rest.starts_with("<!--") {
            pos += rest.find("-->").map_or(rest.len(), |end| end + 3);
            continue;
        }

        if rest.starts_with("<!") || rest.starts_with("<?") {
            let end = rest.find('>').unwrap_or(rest.len());
            let declaration = &rest[2..end];
            if declaration.to_ascii_lowercase().starts_with("doctype") {
                doc.set_doctype(Some(declaration.trim().to_string()));
            }
            pos += (end + 1).min(rest.len());
            continue;
        }

        if let Some(after) = rest.strip_prefix("</") {
            let end = after.find('>').unwrap_or(after.len());
            let name = after[..end].trim().to_ascii_lowercase();
            close_element(&doc, &mut stack, &name);
            pos += 2 + (end + 1).min(after.len());
            continue;
        }

        if rest.starts_with('<') && rest[1..].starts_with(|c: char| c.is_ascii_alphabetic()) {
            let (tag, consumed) = read_start_tag(&rest[1..]);
            pos += 1 + consumed;

            let parent = *stack.last().unwrap_or(&doc.root());
            let element = doc.create_element(&tag.name);
            for (name, value) in &tag.attrs {
                doc.set_attr(element, name, value)?;
            }
            doc.append_child(parent, element)?;

            if RAW_TEXT_ELEMENTS.contains(&tag.name.as_str()) && !tag.self_closing {
                let body = &input[pos..];
                let close = format!("</{}", tag.name);
                let end = find_ignore_ascii_case(body, &close).unwrap_or(body.len());
                if end > 0 {
                    let text = doc.create_text(&body[..end]);
                    doc.append_child(element, text)?;
                }
                pos += end;
                let body = &input[pos..];
                pos += body.find('>').map_or(body.len(), |gt| gt + 1);
            } else if !tag.self_closing && !VOID_ELEMENTS.contains(&tag.name.as_str()) {
                stack.push(element);
            }
            continue;
        }

        // Text up to the next '<', always consuming at least one character
        let first = rest.chars().next().map_or(1, char::len_utf8);
        let end = rest[first..]
            .find('<')
            .map_or(rest.len(), |offset| offset + first);
        let text = decode_entities(&rest[..end]);
        let parent = *stack.last().unwrap_or(&doc.root());
        let node = doc.create_text(&text);
        doc.append_child(parent, node)?;
        pos += end;
    }

    Ok(doc)
}

fn close_element(doc: &Document, stack: &mut Vec<NodeId>, name: &str) {
    // Index 0 is the document root and is never closed
    if let Some(index) = stack
        .iter()
        .rposition(|&id| doc.tag(id) == Some(name))
        .filter(|&index| index > 0)
    {
        stack.truncate(index);
    }
}

struct StartTag {
    name: String,
    attrs: Vec<(String, String)>,
    self_closing: bool,
}

/// Reads a start tag from just after '<'; returns it and the bytes consumed.
fn read_start_tag(input: &str) -> (StartTag, usize) {
    let bytes = input.as_bytes();
    let name_end = input
        .find(|c: char| c.is_ascii_whitespace() || c == '>' || c == '/')
        .unwrap_or(input.len());
    let name = input[..name_end].to_ascii_lowercase();
    let mut i = name_end;

    let mut attrs: Vec<(String, String)> = Vec::new();
    let mut self_closing = false;

    while i < bytes.len() {
        match bytes[i] {
            b'>' => {
                i += 1;
                break;
            }
            b'/' => {
                self_closing = true;
                i += 1;
            }
            b if b.is_ascii_whitespace() => i += 1,
            _ => {
                self_closing = false;
                let rest = &input[i..];
                let key_end = rest
                    .find(|c: char| c.is_ascii_whitespace() || c == '=' || c == '>' || c == '/')
                    .unwrap_or(rest.len());
                let key = rest[..key_end].to_ascii_lowercase();
                i += key_end;

                while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                    i += 1;
                }
                let mut value = String::new();
                if i < bytes.len() && bytes[i] == b'=' {
                    i += 1;
                    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                        i += 1;
                    }
                    if i < bytes.len() && (bytes[i] == b'"' || bytes[i] == b'\'') {
                        let quote = bytes[i] as char;
                        let rest = &input[i + 1..];
                        let end = rest.find(quote).unwrap_or(rest.len());
                        value = decode_entities(&rest[..end]);
                        i += 1 + (end + 1).min(rest.len());
                    } else {
                        let rest = &input[i..];
                        let end = rest
                            .find(|c: char| c.is_ascii_whitespace() || c == '>')
                            .unwrap_or(rest.len());
                        value = decode_entities(&rest[..end]);
                        i += end;
                    }
                }
                if !key.is_empty() && !attrs.iter().any(|(k, _)| *k == key) {
                    attrs.push((key, value));
                }
            }
        }
    }

    (
        StartTag {
            name,
            attrs,
            self_closing,
        },
        i,
    )
}

fn find_ignore_ascii_case(haystack: &str, needle: &str) -> Option<usize> {
    let needle = needle.as_bytes();
    haystack
        .as_bytes()
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
}

pub fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let decoded = rest[1..]
            .find(';')
            .filter(|&semi| semi <= 10)
            .and_then(|semi| decode_reference(&rest[1..semi + 1]).map(|c| (c, semi + 2)));
        match decoded {
            Some((c, len)) => {
                out.push(c);
                rest = &rest[len..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_reference(name: &str) -> Option<char> {
    if let Some(number) = name.strip_prefix('#') {
        let code = match number.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => number.parse().ok()?,
        };
        return char::from_u32(code);
    }
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        "yen" => Some('\u{a5}'),
        "euro" => Some('\u{20ac}'),
        _ => None,
    }
}

fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
}

fn escape_attr(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
}

/// Writes the attached tree back out as HTML.
pub fn serialize(doc: &Document) -> String {
    let mut out = String::new();
    if let Some(doctype) = doc.doctype() {
        out.push_str(&format!("<!{doctype}>"));
    }
    for &child in doc.children(doc.root()) {
        write_node(doc, child, &mut out);
    }
    out
}

/// Writes one subtree as HTML.
pub fn serialize_node(doc: &Document, id: NodeId) -> String {
    let mut out = String::new();
    write_node(doc, id, &mut out);
    out
}

fn write_node(doc: &Document, id: NodeId, out: &mut String) {
    let Some(kind) = doc.kind(id) else {
        return;
    };
    match kind {
        NodeKind::Text(text) => {
            let raw = doc
                .parent(id)
                .and_then(|p| doc.tag(p))
                .is_some_and(|tag| RAW_TEXT_ELEMENTS.contains(&tag));
            if raw {
                out.push_str(text);
            } else {
                escape_text(text, out);
            }
        }
        NodeKind::Element { tag, attrs } => {
            out.push('<');
            out.push_str(tag);
            for (name, value) in attrs {
                out.push(' ');
                out.push_str(name);
                out.push_str("=\"");
                escape_attr(value, out);
                out.push('"');
            }
            out.push('>');
            if VOID_ELEMENTS.contains(&tag.as_str()) {
                return;
            }
            for &child in doc.children(id) {
                write_node(doc, child, out);
            }
            out.push_str("</");
            out.push_str(tag);
            out.push('>');
        }
    }
}
