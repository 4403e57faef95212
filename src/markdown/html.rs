//! Markdown to HTML, and HTML back into translator events.
//!
//! pulldown-cmark does the markdown work; the scanner here is a deliberately
//! small tokenizer for the HTML it produces plus whatever raw HTML the model
//! wrote inline. Anything it cannot tokenize is reported as an [`HtmlError`]
//! and the caller falls back to plain text.

use crate::markdown::markup::{translate, Attributes, Tag, TagEvent};
use pulldown_cmark::{html, Options, Parser};
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HtmlError {
    #[error("Unterminated tag at byte {0}")]
    UnterminatedTag(usize),
    #[error("Unterminated comment at byte {0}")]
    UnterminatedComment(usize),
    #[error("Unterminated attribute value at byte {0}")]
    UnterminatedAttribute(usize),
}

static STRIKE_REGEX: OnceLock<Regex> = OnceLock::new();

fn strike_regex() -> &'static Regex {
    STRIKE_REGEX.get_or_init(|| Regex::new(r"~~(.*?)~~").expect("Invalid strikethrough regex"))
}

/// Renders markdown to HTML with tables and footnotes enabled.
pub fn htmlify(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_FOOTNOTES);
    let parser = Parser::new_ext(markdown, options);

    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

/// Markdown source of a text block to markup.
pub fn text_to_markup(markdown: &str) -> Result<String, HtmlError> {
    let prepared = strike_regex().replace_all(markdown, "<s>${1}</s>");
    let html = htmlify(&prepared);
    let events = scan(&html)?;
    Ok(translate(&events))
}

/// Tokenizes HTML into start, end and text events.
///
/// Self-closing tags produce a start and an end event. Comments, doctypes and
/// processing instructions are skipped. Character references in text and
/// attribute values are decoded.
pub fn scan(html: &str) -> Result<Vec<TagEvent>, HtmlError> {
    let mut events = Vec::new();
    let mut text = String::new();
    let bytes = html.as_bytes();
    let mut pos = 0;

    while pos < html.len() {
        let rest = &html[pos..];
        let Some(lt) = rest.find('<') else {
            text.push_str(rest);
            break;
        };
        text.push_str(&rest[..lt]);
        pos += lt;

        let rest = &html[pos..];
        let next = bytes.get(pos + 1).copied();

        if rest.starts_with("<!--") {
            let end = rest
                .find("-->")
                .ok_or(HtmlError::UnterminatedComment(pos))?;
            pos += end + 3;
            continue;
        }

        match next {
            Some(b'!') | Some(b'?') => {
                let end = rest.find('>').ok_or(HtmlError::UnterminatedTag(pos))?;
                pos += end + 1;
            }
            Some(b'/') => {
                let end = rest.find('>').ok_or(HtmlError::UnterminatedTag(pos))?;
                let name = rest[2..end].trim();
                flush_text(&mut text, &mut events);
                events.push(TagEvent::End(Tag::from_name(name)));
                pos += end + 1;
            }
            Some(c) if c.is_ascii_alphabetic() => {
                let (tag, attrs, self_closing, len) = parse_start_tag(rest, pos)?;
                flush_text(&mut text, &mut events);
                events.push(TagEvent::Start(tag, attrs));
                if self_closing {
                    events.push(TagEvent::End(tag));
                }
                pos += len;
            }
            _ => {
                // A bare '<' is ordinary text.
                text.push('<');
                pos += 1;
            }
        }
    }

    flush_text(&mut text, &mut events);
    Ok(events)
}

fn flush_text(text: &mut String, events: &mut Vec<TagEvent>) {
    if !text.is_empty() {
        events.push(TagEvent::Text(decode_entities(text)));
        text.clear();
    }
}

/// Parses `<name attr="v" ...>` at the start of `rest`.
///
/// Returns the tag, its attributes, whether it was self-closing, and the byte
/// length consumed. `offset` is only used for error positions.
fn parse_start_tag(rest: &str, offset: usize) -> Result<(Tag, Attributes, bool, usize), HtmlError> {
    let mut chars = rest.char_indices().skip(1).peekable();

    let mut name = String::new();
    while let Some(&(_, c)) = chars.peek() {
        if c.is_ascii_alphanumeric() {
            name.push(c);
            chars.next();
        } else {
            break;
        }
    }

    let mut attrs = Attributes::new();
    let mut self_closing = false;
    loop {
        let Some((i, c)) = chars.next() else {
            return Err(HtmlError::UnterminatedTag(offset));
        };
        match c {
            '>' => return Ok((Tag::from_name(&name), attrs, self_closing, i + 1)),
            '/' => self_closing = true,
            c if c.is_whitespace() => {}
            _ => {
                self_closing = false;
                let mut attr_name = String::from(c);
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_whitespace() || matches!(c, '=' | '>' | '/') {
                        break;
                    }
                    attr_name.push(c);
                    chars.next();
                }
                while chars.peek().is_some_and(|&(_, c)| c.is_whitespace()) {
                    chars.next();
                }

                let mut value = String::new();
                if chars.peek().is_some_and(|&(_, c)| c == '=') {
                    chars.next();
                    while chars.peek().is_some_and(|&(_, c)| c.is_whitespace()) {
                        chars.next();
                    }
                    match chars.peek().map(|&(_, c)| c) {
                        Some(quote @ ('"' | '\'')) => {
                            let (start, _) = chars.next().unwrap_or((0, quote));
                            loop {
                                match chars.next() {
                                    Some((_, c)) if c == quote => break,
                                    Some((_, c)) => value.push(c),
                                    None => {
                                        return Err(HtmlError::UnterminatedAttribute(
                                            offset + start,
                                        ))
                                    }
                                }
                            }
                        }
                        _ => {
                            while let Some(&(_, c)) = chars.peek() {
                                if c.is_whitespace() || c == '>' {
                                    break;
                                }
                                value.push(c);
                                chars.next();
                            }
                        }
                    }
                }
                attrs.push((attr_name.to_ascii_lowercase(), decode_entities(&value)));
            }
        }
    }
}

/// Decodes the handful of named references pulldown-cmark emits, plus numeric ones.
/// Unknown references are left as written.
pub fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];

        let decoded = rest.find(';').filter(|&semi| semi <= 10).and_then(|semi| {
            let entity = &rest[1..semi];
            let c = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some('\u{a0}'),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                    .and_then(char::from_u32),
            };
            c.map(|c| (c, semi))
        });

        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &rest[semi + 1..];
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
