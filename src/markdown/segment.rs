//! Splits a raw response buffer into an ordered list of text and code blocks.
//!
//! The segmenter is re-run over the whole buffer on every render pass, so it
//! has to cope with half-received input: an opening fence whose closing fence
//! has not arrived yet still yields a code block, and a fence line sitting at
//! the very end of the buffer yields nothing until more text shows up.
//!
//! Fences tagged `markdown`/`md` are not code at all; their content is
//! segmented again and spliced in place, so a model that wraps its whole answer
//! in a markdown fence still renders as ordinary formatted text.

use regex::Regex;
use std::sync::OnceLock;

/// Nested markdown fences deeper than this are flattened into one text block.
pub const MAX_NESTING_DEPTH: usize = 8;

/// Language names recognised when a fence carries its language on the next line.
const ORPHAN_LANGUAGES: &[&str] = &[
    "markdown", "md", "python", "py", "bash", "sh", "javascript", "js", "html", "css", "json",
    "xml", "sql", "java", "c", "cpp", "go", "rs", "rust",
];

static FENCE_OPEN_REGEX: OnceLock<Regex> = OnceLock::new();
static FENCE_CLOSE_REGEX: OnceLock<Regex> = OnceLock::new();
static RULE_REGEX: OnceLock<Regex> = OnceLock::new();
static HEADING_REGEX: OnceLock<Regex> = OnceLock::new();

fn fence_open_regex() -> &'static Regex {
    FENCE_OPEN_REGEX
        .get_or_init(|| Regex::new(r"^(\s*)(`{3,}|~{3,})(.*)$").expect("Invalid fence regex"))
}

fn fence_close_regex() -> &'static Regex {
    FENCE_CLOSE_REGEX
        .get_or_init(|| Regex::new(r"^(\s*)(`{3,}|~{3,})\s*$").expect("Invalid fence regex"))
}

fn rule_regex() -> &'static Regex {
    RULE_REGEX.get_or_init(|| Regex::new(r"^[-*_]{3,}\s*$").expect("Invalid rule regex"))
}

fn heading_regex() -> &'static Regex {
    HEADING_REGEX.get_or_init(|| Regex::new(r"^#{1,6}\s").expect("Invalid heading regex"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Text,
    Code,
}

/// One contiguous unit of a response: markdown prose or literal code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub kind: BlockKind,
    /// Fence language for code blocks. Empty means unspecified; always empty for text.
    pub language: String,
    /// Markdown source for text, or the code with its fence lines stripped.
    pub content: String,
}

impl Block {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: BlockKind::Text,
            language: String::new(),
            content: content.into(),
        }
    }

    pub fn code(language: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: BlockKind::Code,
            language: language.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceMarker {
    Backtick,
    Tilde,
}

impl FenceMarker {
    fn from_char(c: char) -> Option<Self> {
        match c {
            '`' => Some(FenceMarker::Backtick),
            '~' => Some(FenceMarker::Tilde),
            _ => None,
        }
    }
}

/// An opening fence line, e.g. "  ```rust".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FenceDescriptor {
    /// Leading whitespace before the markers. Tracked, not stripped from content.
    pub indent: String,
    pub marker: FenceMarker,
    pub length: usize,
    pub language: String,
}

impl FenceDescriptor {
    /// Parses a line as an opening fence.
    pub fn parse_open(line: &str) -> Option<Self> {
        let caps = fence_open_regex().captures(line)?;
        let fence = caps.get(2)?.as_str();
        let marker = FenceMarker::from_char(fence.chars().next()?)?;
        Some(Self {
            indent: caps.get(1).map_or("", |m| m.as_str()).to_string(),
            marker,
            length: fence.len(),
            language: caps.get(3).map_or("", |m| m.as_str()).trim().to_string(),
        })
    }

    /// A closing fence uses the same marker, is at least as long, and carries
    /// nothing but whitespace after the markers.
    pub fn is_closed_by(&self, line: &str) -> bool {
        let Some(caps) = fence_close_regex().captures(line) else {
            return false;
        };
        let Some(fence) = caps.get(2).map(|m| m.as_str()) else {
            return false;
        };
        fence
            .chars()
            .next()
            .and_then(FenceMarker::from_char)
            .is_some_and(|marker| marker == self.marker && fence.len() >= self.length)
    }
}

fn is_markdown_language(language: &str) -> bool {
    matches!(language.to_ascii_lowercase().as_str(), "markdown" | "md")
}

/// Guesses the language of a fence that had none, from the line after it.
///
/// Returns the language and whether that line was consumed as the language tag.
fn sniff_orphan_language(next_line: &str) -> Option<(String, bool)> {
    let trimmed = next_line.trim();
    let cleaned = trimmed.trim_matches('`');
    let lower = cleaned.to_ascii_lowercase();
    if ORPHAN_LANGUAGES.contains(&lower.as_str()) {
        return Some((cleaned.to_string(), true));
    }
    if rule_regex().is_match(trimmed) || heading_regex().is_match(trimmed) {
        return Some(("markdown".to_string(), false));
    }
    None
}

/// Segments `text` into text and code blocks in document order.
pub fn segment(text: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    segment_into(text, 0, &mut blocks);
    tracing::trace!(
        input_len = text.len(),
        blocks = blocks.len(),
        "segmented response buffer"
    );
    blocks
}

fn push_text(blocks: &mut Vec<Block>, content: String) {
    if !content.trim().is_empty() {
        blocks.push(Block::text(content));
    }
}

fn segment_into(text: &str, depth: usize, blocks: &mut Vec<Block>) {
    let lines: Vec<&str> = text.split('\n').collect();
    let n = lines.len();
    let mut i = 0;

    while i < n {
        if let Some(mut fence) = FenceDescriptor::parse_open(lines[i]) {
            let mut content_start = i + 1;
            if content_start >= n {
                // Fence with nothing after it yet.
                break;
            }

            if fence.language.is_empty() {
                if let Some((language, consumed)) = sniff_orphan_language(lines[content_start]) {
                    fence.language = language;
                    if consumed {
                        content_start += 1;
                    }
                }
            }

            let mut code_lines = Vec::new();
            i = content_start;
            while i < n {
                if fence.is_closed_by(lines[i]) {
                    i += 1;
                    break;
                }
                code_lines.push(lines[i]);
                i += 1;
            }
            let code = code_lines.join("\n");

            if is_markdown_language(&fence.language) {
                if depth + 1 < MAX_NESTING_DEPTH {
                    segment_into(&code, depth + 1, blocks);
                } else {
                    tracing::debug!(depth, "markdown fence nesting limit reached; flattening");
                    push_text(blocks, code);
                }
            } else {
                blocks.push(Block::code(fence.language, code));
            }
            continue;
        }

        let start = i;
        while i < n && FenceDescriptor::parse_open(lines[i]).is_none() {
            i += 1;
        }
        push_text(blocks, lines[start..i].join("\n"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn plain_text_is_one_block() {
        let text = "Hello **world**\n\n- one\n- two\n";
        assert_eq!(segment(text), vec![Block::text(text)]);
    }

    #[test]
    fn whitespace_only_input_yields_nothing() {
        assert_eq!(segment(""), vec![]);
        assert_eq!(segment("  \n\t\n"), vec![]);
    }

    #[test]
    fn fenced_code_between_text() {
        let text = "Intro\n```rust\nfn main() {}\n```\nOutro";
        assert_eq!(
            segment(text),
            vec![
                Block::text("Intro"),
                Block::code("rust", "fn main() {}"),
                Block::text("Outro"),
            ]
        );
    }

    #[test]
    fn unterminated_fence_is_still_code() {
        assert_eq!(
            segment("```python\nprint(1)"),
            vec![Block::code("python", "print(1)")]
        );
    }

    #[test]
    fn fence_at_end_of_input_is_not_emitted() {
        assert_eq!(segment("Some text\n```rust"), vec![Block::text("Some text")]);
    }

    #[test]
    fn orphan_language_on_next_line() {
        assert_eq!(
            segment("```\npython\nprint(1)\n```"),
            vec![Block::code("python", "print(1)")]
        );
        assert_eq!(
            segment("```\n`Rust`\nlet x = 1;\n```"),
            vec![Block::code("Rust", "let x = 1;")]
        );
    }

    #[test]
    fn unknown_orphan_line_stays_in_code() {
        assert_eq!(
            segment("```\nprint(1)\n```"),
            vec![Block::code("", "print(1)")]
        );
    }

    #[test]
    fn markdown_fence_is_spliced() {
        assert_eq!(segment("```markdown\n# Title\n```"), segment("# Title"));
        assert_eq!(segment("```md\n# Title\n```"), vec![Block::text("# Title")]);
    }

    #[test]
    fn markdown_looking_orphan_is_expanded() {
        let text = "```\n# Heading\nbody\n```";
        assert_eq!(segment(text), vec![Block::text("# Heading\nbody")]);

        let text = "```\n---\ntext\n```";
        assert_eq!(segment(text), vec![Block::text("---\ntext")]);
    }

    #[test]
    fn nested_code_inside_markdown_fence() {
        let text = "````markdown\nSee:\n```sh\nls\n```\n````\nDone";
        assert_eq!(
            segment(text),
            vec![
                Block::text("See:"),
                Block::code("sh", "ls"),
                Block::text("Done"),
            ]
        );
    }

    #[test]
    fn mismatched_marker_does_not_close() {
        assert_eq!(
            segment("~~~js\nlet a;\n```\nlet b;\n~~~"),
            vec![Block::code("js", "let a;\n```\nlet b;")]
        );
    }

    #[test]
    fn shorter_closing_fence_does_not_close() {
        assert_eq!(
            segment("````\ncode\n```\nmore\n`````\nafter"),
            vec![Block::code("", "code\n```\nmore"), Block::text("after")]
        );
    }

    #[test]
    fn closing_fence_with_trailing_text_does_not_close() {
        assert_eq!(
            segment("```c\nint x;\n``` nope\n```"),
            vec![Block::code("c", "int x;\n``` nope")]
        );
    }

    #[test]
    fn indented_fence_keeps_content_verbatim() {
        assert_eq!(
            segment("  ```go\n  x := 1\n  ```"),
            vec![Block::code("go", "  x := 1")]
        );
        let fence = FenceDescriptor::parse_open("  ```go").expect("fence");
        assert_eq!(fence.indent, "  ");
        assert_eq!(fence.marker, FenceMarker::Backtick);
        assert_eq!(fence.length, 3);
    }

    #[test]
    fn deep_markdown_nesting_is_flattened() {
        let depth = MAX_NESTING_DEPTH + 2;
        let mut text = String::from("leaf");
        for level in 0..depth {
            let fence = "`".repeat(3 + level);
            text = format!("{fence}markdown\n{text}\n{fence}");
        }
        let blocks = segment(&text);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].kind, BlockKind::Text);
        assert!(blocks[0].content.starts_with("````markdown\n```markdown\nleaf"));
    }

    #[test]
    fn streaming_prefixes_grow_monotonically() {
        let full = "Intro\n```rust\nfn a() {}\n```\nOutro text";
        let mut previous = 0;
        for end in 0..=full.len() {
            let count = segment(&full[..end]).len();
            assert!(count >= previous, "block count shrank at prefix {end}");
            previous = count;
        }
        assert_eq!(
            segment(full),
            vec![
                Block::text("Intro"),
                Block::code("rust", "fn a() {}"),
                Block::text("Outro text"),
            ]
        );
    }
}
