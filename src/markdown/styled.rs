//! Turns markup into styled terminal lines.
//!
//! This is the host side of the markup contract: it understands exactly the
//! spans the translator emits (`b`, `i`, `s`, `tt`, `u`, `a`, and `span` with
//! `size`/`weight`). Unknown or unbalanced tags are tolerated, never rejected.

use crate::markdown::html::decode_entities;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};

/// Style for ordinary model text.
pub fn base_style() -> Style {
    Style::default().fg(Color::Cyan)
}

fn inline_code_style(style: Style) -> Style {
    style.bg(Color::Rgb(50, 50, 50)).fg(Color::Yellow)
}

fn span_style(style: Style, attrs: &str) -> Style {
    let mut style = style;
    let attr = |name: &str| -> Option<String> {
        let start = attrs.find(&format!("{name}="))? + name.len() + 1;
        let rest = &attrs[start..];
        let quote = rest.chars().next()?;
        if quote == '\'' || quote == '"' {
            let end = rest[1..].find(quote)?;
            Some(rest[1..1 + end].to_string())
        } else {
            Some(rest.split_whitespace().next()?.to_string())
        }
    };

    if attr("weight").as_deref() == Some("bold") {
        style = style.add_modifier(Modifier::BOLD);
    }
    match attr("size").as_deref() {
        Some("xx-large") => {
            style = style
                .fg(Color::Magenta)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        }
        Some("x-large") => style = style.fg(Color::Magenta).add_modifier(Modifier::BOLD),
        Some("large") => style = style.fg(Color::LightMagenta).add_modifier(Modifier::BOLD),
        _ => {}
    }
    style
}

/// Parses `markup` into lines, starting from `base`.
pub fn markup_to_lines(markup: &str, base: Style) -> Vec<Line<'static>> {
    let mut lines: Vec<Line<'static>> = Vec::new();
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut stack: Vec<Style> = vec![base];
    let mut rest = markup;

    let push_text = |text: &str, style: Style, spans: &mut Vec<Span<'static>>, lines: &mut Vec<Line<'static>>| {
        let decoded = decode_entities(text);
        let mut parts = decoded.split('\n');
        if let Some(first) = parts.next() {
            if !first.is_empty() {
                spans.push(Span::styled(first.to_string(), style));
            }
        }
        for part in parts {
            lines.push(Line::from(std::mem::take(spans)));
            if !part.is_empty() {
                spans.push(Span::styled(part.to_string(), style));
            }
        }
    };

    while !rest.is_empty() {
        let current = stack.last().copied().unwrap_or(base);
        let Some(lt) = rest.find('<') else {
            push_text(rest, current, &mut spans, &mut lines);
            break;
        };
        if lt > 0 {
            push_text(&rest[..lt], current, &mut spans, &mut lines);
        }
        rest = &rest[lt..];

        let Some(gt) = rest.find('>') else {
            push_text(rest, current, &mut spans, &mut lines);
            break;
        };
        let tag = &rest[1..gt];
        rest = &rest[gt + 1..];

        if tag.starts_with('/') {
            if stack.len() > 1 {
                stack.pop();
            }
            continue;
        }

        let (name, attrs) = tag.split_once(char::is_whitespace).unwrap_or((tag, ""));
        let next = match name {
            "b" => current.add_modifier(Modifier::BOLD),
            "i" => current.add_modifier(Modifier::ITALIC),
            "s" => current.add_modifier(Modifier::CROSSED_OUT),
            "u" => current.add_modifier(Modifier::UNDERLINED),
            "tt" => inline_code_style(current),
            "a" => current.fg(Color::Blue).add_modifier(Modifier::UNDERLINED),
            "span" => span_style(current, attrs),
            _ => current,
        };
        stack.push(next);
    }

    if !spans.is_empty() || lines.is_empty() {
        lines.push(Line::from(spans));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn plain(lines: &[Line<'static>]) -> Vec<String> {
        lines
            .iter()
            .map(|l| l.spans.iter().map(|s| s.content.as_ref()).collect())
            .collect()
    }

    #[test]
    fn splits_lines_and_decodes_entities() {
        let lines = markup_to_lines("a &amp; b\nc &lt; d", base_style());
        assert_eq!(plain(&lines), vec!["a & b", "c < d"]);
    }

    #[test]
    fn nested_styles_accumulate_and_unwind() {
        let lines = markup_to_lines("x <b>bold <i>both</i></b> y", base_style());
        let spans = &lines[0].spans;
        assert_eq!(spans.len(), 4);
        assert!(spans[1].style.add_modifier.contains(Modifier::BOLD));
        assert!(spans[2].style.add_modifier.contains(Modifier::BOLD | Modifier::ITALIC));
        assert_eq!(spans[3].style, base_style());
    }

    #[test]
    fn monospace_table_keeps_alignment() {
        let lines = markup_to_lines("<tt>a   | bb\nccc | d </tt>", base_style());
        assert_eq!(plain(&lines), vec!["a   | bb", "ccc | d "]);
        assert_eq!(lines[1].spans[0].style.bg, Some(Color::Rgb(50, 50, 50)));
    }

    #[test]
    fn heading_span_is_bold() {
        let lines = markup_to_lines("<span size='xx-large' weight='bold'>T</span>", base_style());
        assert!(lines[0].spans[0].style.add_modifier.contains(Modifier::BOLD));
        assert_eq!(lines[0].spans[0].style.fg, Some(Color::Magenta));
    }

    #[test]
    fn unbalanced_markup_is_tolerated() {
        let lines = markup_to_lines("</b>text <i>open", base_style());
        assert_eq!(plain(&lines), vec!["text open"]);
        let lines = markup_to_lines("dangling <b", base_style());
        assert_eq!(plain(&lines), vec!["dangling <b"]);
    }

    #[test]
    fn empty_markup_is_one_empty_line() {
        assert_eq!(markup_to_lines("", base_style()).len(), 1);
    }
}
