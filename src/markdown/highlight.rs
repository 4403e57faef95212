//! Syntax highlighting for code viewers.
//!
//! Wraps syntect with the two-face grammar bundle and one fixed dark theme.
//! Lookups that fail, and inputs past the size guardrails, return `None`;
//! callers render plain monospace text instead.

use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use std::sync::OnceLock;
use syntect::easy::HighlightLines;
use syntect::highlighting::{FontStyle, Style as SyntectStyle, Theme};
use syntect::parsing::{SyntaxReference, SyntaxSet};
use syntect::util::LinesWithEndings;
use two_face::theme::EmbeddedThemeName;

/// Inputs larger than this are shown unhighlighted.
const MAX_HIGHLIGHT_BYTES: usize = 512 * 1024;
const MAX_HIGHLIGHT_LINES: usize = 10_000;

static SYNTAX_SET: OnceLock<SyntaxSet> = OnceLock::new();
static THEME: OnceLock<Theme> = OnceLock::new();

fn syntax_set() -> &'static SyntaxSet {
    SYNTAX_SET.get_or_init(two_face::syntax::extra_newlines)
}

fn theme() -> &'static Theme {
    THEME.get_or_init(|| {
        two_face::theme::extra()
            .get(EmbeddedThemeName::Base16OceanDark)
            .clone()
    })
}

/// Resolves a fence language to a grammar: by token, by name, then by extension.
pub fn lookup_language(name: &str) -> Option<&'static SyntaxReference> {
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let ss = syntax_set();

    let patched = match name.to_ascii_lowercase().as_str() {
        "golang" => "go".to_string(),
        "python3" | "py3" => "python".to_string(),
        "shell" | "zsh" | "console" => "bash".to_string(),
        "csharp" | "c-sharp" => "c#".to_string(),
        lower => lower.to_string(),
    };

    ss.find_syntax_by_token(&patched)
        .or_else(|| ss.find_syntax_by_name(name))
        .or_else(|| {
            ss.syntaxes()
                .iter()
                .find(|s| s.name.eq_ignore_ascii_case(&patched))
        })
        .or_else(|| ss.find_syntax_by_extension(&patched))
}

fn convert_style(style: SyntectStyle) -> Style {
    let mut out = Style::default();
    let fg = style.foreground;
    if fg.a > 0 {
        out = out.fg(Color::Rgb(fg.r, fg.g, fg.b));
    }
    if style.font_style.contains(FontStyle::BOLD) {
        out = out.add_modifier(Modifier::BOLD);
    }
    out
}

/// Highlights `code` line by line. Returns `None` when the code is empty or
/// too large, or when the grammar fails partway through.
pub fn highlight(code: &str, syntax: &SyntaxReference) -> Option<Vec<Line<'static>>> {
    if code.is_empty()
        || code.len() > MAX_HIGHLIGHT_BYTES
        || code.lines().count() > MAX_HIGHLIGHT_LINES
    {
        return None;
    }

    let mut highlighter = HighlightLines::new(syntax, theme());
    let mut lines = Vec::new();
    for line in LinesWithEndings::from(code) {
        let ranges = match highlighter.highlight_line(line, syntax_set()) {
            Ok(ranges) => ranges,
            Err(err) => {
                tracing::debug!(language = %syntax.name, "highlighting failed: {err}");
                return None;
            }
        };
        let spans: Vec<Span<'static>> = ranges
            .into_iter()
            .filter_map(|(style, text)| {
                let text = text.trim_end_matches(['\n', '\r']);
                (!text.is_empty()).then(|| Span::styled(text.to_string(), convert_style(style)))
            })
            .collect();
        lines.push(Line::from(spans));
    }
    if code.ends_with('\n') {
        lines.push(Line::default());
    }
    Some(lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_common_fence_languages() {
        for lang in ["rust", "rs", "python", "py", "Python", "js", "bash", "sh", "json", "golang"] {
            assert!(lookup_language(lang).is_some(), "no grammar for {lang:?}");
        }
        assert!(lookup_language("").is_none());
        assert!(lookup_language("definitely-not-a-language").is_none());
    }

    #[test]
    fn highlight_keeps_line_count() {
        let syntax = lookup_language("rust").expect("rust grammar");
        let lines = highlight("fn main() {\n    let x = 1;\n}", syntax).expect("highlighted");
        assert_eq!(lines.len(), 3);
        let first: String = lines[0].spans.iter().map(|s| s.content.as_ref()).collect();
        assert_eq!(first, "fn main() {");
        assert!(lines[0].spans.iter().any(|s| s.style.fg.is_some()));
    }

    #[test]
    fn empty_code_is_not_highlighted() {
        let syntax = lookup_language("rust").expect("rust grammar");
        assert!(highlight("", syntax).is_none());
    }
}
