//! Translates a stream of HTML-like tag events into Pango-style markup.
//!
//! The target markup has spans for weight, size, italics, strikethrough,
//! monospace and links, but no table element. Tables are therefore collected
//! cell by cell and re-flowed into one fixed-width monospace block when the
//! table closes.

use regex::Regex;
use std::sync::OnceLock;

/// Width of the box-drawing rule emitted for `<hr>`.
const RULE_WIDTH: usize = 20;

static TAG_REGEX: OnceLock<Regex> = OnceLock::new();

fn tag_regex() -> &'static Regex {
    TAG_REGEX.get_or_init(|| Regex::new(r"<[^>]+>").expect("Invalid tag regex"))
}

static ENTITY_REGEX: OnceLock<Regex> = OnceLock::new();

fn entity_regex() -> &'static Regex {
    ENTITY_REGEX.get_or_init(|| {
        Regex::new(r"&(#[xX][0-9a-fA-F]+|#[0-9]+|[A-Za-z][A-Za-z0-9]*);").expect("Invalid entity regex")
    })
}

/// The structural and inline tags the translator understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Heading(u8),
    Bold,
    Italic,
    Strike,
    Code,
    Paragraph,
    ListStart,
    ListItem,
    Link,
    Break,
    Rule,
    Pre,
    Quote,
    TableStart,
    Row,
    Cell,
    Unknown,
}

impl Tag {
    /// Maps an HTML tag name (any case) to a tag. Unrecognised names are `Unknown`.
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "h1" => Tag::Heading(1),
            "h2" => Tag::Heading(2),
            "h3" => Tag::Heading(3),
            "h4" => Tag::Heading(4),
            "h5" => Tag::Heading(5),
            "h6" => Tag::Heading(6),
            "strong" | "b" => Tag::Bold,
            "em" | "i" => Tag::Italic,
            "s" | "del" | "strike" => Tag::Strike,
            "code" | "tt" => Tag::Code,
            "p" => Tag::Paragraph,
            "ul" | "ol" => Tag::ListStart,
            "li" => Tag::ListItem,
            "a" => Tag::Link,
            "br" => Tag::Break,
            "hr" => Tag::Rule,
            "pre" => Tag::Pre,
            "blockquote" => Tag::Quote,
            "table" => Tag::TableStart,
            "tr" => Tag::Row,
            "td" | "th" => Tag::Cell,
            _ => Tag::Unknown,
        }
    }
}

pub type Attributes = Vec<(String, String)>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagEvent {
    Start(Tag, Attributes),
    End(Tag),
    Text(String),
}

/// Escapes text for inclusion in markup or a quoted attribute.
pub fn escape_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// Length of `markup` as displayed: tags are removed and each entity counts as one character.
pub fn visible_len(markup: &str) -> usize {
    let text = tag_regex().replace_all(markup, "");
    entity_regex().replace_all(&text, "_").chars().count()
}

/// Rows of a table being translated. Cells hold already-translated markup.
#[derive(Debug, Default)]
pub struct TableAccumulator {
    rows: Vec<Vec<String>>,
    current_row: Vec<String>,
    cell: Option<String>,
}

impl TableAccumulator {
    /// Flattens the table into monospace text with left-aligned, padded columns.
    pub fn render(&self) -> Option<String> {
        if self.rows.is_empty() {
            return None;
        }

        let mut widths: Vec<usize> = Vec::new();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                let len = visible_len(cell);
                match widths.get_mut(i) {
                    Some(width) => *width = (*width).max(len),
                    None => widths.push(len),
                }
            }
        }

        let lines: Vec<String> = self
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .map(|(i, cell)| {
                        let padding = widths[i].saturating_sub(visible_len(cell));
                        format!("{cell}{}", " ".repeat(padding))
                    })
                    .collect::<Vec<_>>()
                    .join(" | ")
            })
            .collect();

        Some(format!("<tt>{}</tt>", lines.join("\n")))
    }
}

/// Translation state: the markup produced so far and the open table, if any.
#[derive(Debug, Default)]
pub struct ParserState {
    output: Vec<String>,
    table: Option<TableAccumulator>,
}

impl ParserState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_table(&self) -> bool {
        self.table.is_some()
    }

    /// Appends inline markup to the open cell when inside a table, else to the output.
    /// Inside a table but outside any cell the fragment has nowhere to go and is dropped.
    fn push_inline(&mut self, fragment: &str) {
        match self.table.as_mut() {
            Some(table) => {
                if let Some(cell) = table.cell.as_mut() {
                    cell.push_str(fragment);
                }
            }
            None => self.output.push(fragment.to_string()),
        }
    }

    fn tail(&self) -> impl Iterator<Item = char> + '_ {
        self.output.iter().rev().flat_map(|s| s.chars().rev())
    }

    /// True when the output produced so far ends with a blank line.
    fn ends_paragraph(&self) -> bool {
        let mut tail = self.tail();
        tail.next() == Some('\n') && tail.next() == Some('\n')
    }

    pub fn apply(&mut self, event: &TagEvent) {
        match event {
            TagEvent::Start(tag, attrs) => self.start(*tag, attrs),
            TagEvent::End(tag) => self.end(*tag),
            TagEvent::Text(text) => self.data(text),
        }
    }

    pub fn start(&mut self, tag: Tag, attrs: &[(String, String)]) {
        match tag {
            Tag::TableStart => {
                self.table = Some(TableAccumulator::default());
                self.output.push("\n".to_string());
            }
            Tag::Row => {
                if let Some(table) = self.table.as_mut() {
                    table.current_row = Vec::new();
                }
            }
            Tag::Cell => match self.table.as_mut() {
                Some(table) => table.cell = Some(String::new()),
                None => self.output.push(" | ".to_string()),
            },
            Tag::Heading(level) => {
                let size = match level {
                    1 | 2 => "xx-large",
                    3 => "x-large",
                    _ => "large",
                };
                self.output
                    .push(format!("\n<span size='{size}' weight='bold'>"));
            }
            Tag::Bold => self.push_inline("<b>"),
            Tag::Italic => self.push_inline("<i>"),
            Tag::Strike => self.push_inline("<s>"),
            Tag::Code => self.push_inline("<tt>"),
            Tag::Paragraph => {
                if !self.in_table() && !self.output.is_empty() && !self.ends_paragraph() {
                    self.output.push("\n".to_string());
                }
            }
            Tag::ListStart => self.output.push("\n".to_string()),
            Tag::ListItem => self.output.push("• ".to_string()),
            Tag::Link => {
                let href = attrs
                    .iter()
                    .find(|(name, _)| name == "href")
                    .map_or("", |(_, value)| value.as_str());
                self.push_inline(&format!("<a href='{}'>", escape_markup(href)));
            }
            Tag::Break => {
                if self.in_table() {
                    self.push_inline(" ");
                } else {
                    self.output.push("\n".to_string());
                }
            }
            Tag::Rule => self
                .output
                .push(format!("\n{}\n", "─".repeat(RULE_WIDTH))),
            Tag::Pre => self.output.push("\n  ".to_string()),
            Tag::Quote => self.output.push("\n  <i>".to_string()),
            Tag::Unknown => {}
        }
    }

    pub fn end(&mut self, tag: Tag) {
        match tag {
            Tag::TableStart => {
                if let Some(table) = self.table.take() {
                    if let Some(rendered) = table.render() {
                        self.output.push(rendered);
                    }
                }
                self.output.push("\n".to_string());
            }
            Tag::Row => match self.table.as_mut() {
                Some(table) => {
                    let row = std::mem::take(&mut table.current_row);
                    table.rows.push(row);
                }
                None => self.output.push("\n".to_string()),
            },
            Tag::Cell => {
                if let Some(table) = self.table.as_mut() {
                    if let Some(cell) = table.cell.take() {
                        table.current_row.push(cell.trim().to_string());
                    }
                }
            }
            Tag::Heading(_) => self.output.push("</span>\n".to_string()),
            Tag::Bold => self.push_inline("</b>"),
            Tag::Italic => self.push_inline("</i>"),
            Tag::Strike => self.push_inline("</s>"),
            Tag::Code => self.push_inline("</tt>"),
            Tag::Paragraph => {
                if !self.in_table() {
                    self.output.push("\n".to_string());
                }
            }
            Tag::Link => self.push_inline("</a>"),
            Tag::ListItem => self.output.push("\n".to_string()),
            Tag::Quote => self.output.push("</i>\n".to_string()),
            Tag::Pre => self.output.push("\n".to_string()),
            Tag::ListStart | Tag::Break | Tag::Rule | Tag::Unknown => {}
        }
    }

    /// Escapes raw text into the open cell, or into the output outside tables.
    ///
    /// Newline-only text right after a line break is serializer whitespace
    /// between block tags and is dropped.
    pub fn data(&mut self, text: &str) {
        match self.table.as_mut() {
            Some(table) => {
                if let Some(cell) = table.cell.as_mut() {
                    cell.push_str(&escape_markup(text));
                }
            }
            None => {
                if text.chars().all(|c| c == '\n') && self.tail().next() == Some('\n') {
                    return;
                }
                self.output.push(escape_markup(text));
            }
        }
    }

    /// Concatenates the output and trims surrounding whitespace.
    pub fn finish(self) -> String {
        self.output.concat().trim().to_string()
    }
}

/// Runs a full event stream through a fresh [`ParserState`].
pub fn translate<'a>(events: impl IntoIterator<Item = &'a TagEvent>) -> String {
    let mut state = ParserState::new();
    for event in events {
        state.apply(event);
    }
    state.finish()
}

static H3_REGEX: OnceLock<Regex> = OnceLock::new();
static H2_REGEX: OnceLock<Regex> = OnceLock::new();
static H1_REGEX: OnceLock<Regex> = OnceLock::new();
static BOLD_REGEX: OnceLock<Regex> = OnceLock::new();
static ITALIC_REGEX: OnceLock<Regex> = OnceLock::new();
static INLINE_CODE_REGEX: OnceLock<Regex> = OnceLock::new();
static DISPLAY_MATH_REGEX: OnceLock<Regex> = OnceLock::new();
static INLINE_MATH_REGEX: OnceLock<Regex> = OnceLock::new();

fn cached(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("Invalid quick markup regex"))
}

/// Line-oriented markdown to markup for short texts such as the user's own prompts.
///
/// Handles `#`..`###` headings, bold, italics, inline code and `\[..\]` /
/// `\(..\)` math, which is shown as monospace.
pub fn quick_markup(text: &str) -> String {
    let text = escape_markup(text);
    let text = cached(&H3_REGEX, r"(?m)^###\s+(.+)$")
        .replace_all(&text, "<span size='large' weight='bold'>${1}</span>");
    let text = cached(&H2_REGEX, r"(?m)^##\s+(.+)$")
        .replace_all(&text, "<span size='x-large' weight='bold'>${1}</span>");
    let text = cached(&H1_REGEX, r"(?m)^#\s+(.+)$")
        .replace_all(&text, "<span size='xx-large' weight='bold'>${1}</span>");
    let text = cached(&BOLD_REGEX, r"\*\*(.+?)\*\*").replace_all(&text, "<b>${1}</b>");
    let text = cached(&ITALIC_REGEX, r"\*(.+?)\*").replace_all(&text, "<i>${1}</i>");
    let text = cached(&INLINE_CODE_REGEX, r"`(.+?)`").replace_all(&text, "<tt>${1}</tt>");
    let text = cached(&DISPLAY_MATH_REGEX, r"(?s)\\\[(.*?)\\\]").replace_all(&text, "<tt>${1}</tt>");
    let text = cached(&INLINE_MATH_REGEX, r"\\\((.*?)\\\)").replace_all(&text, "<tt>${1}</tt>");
    text.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn start(tag: Tag) -> TagEvent {
        TagEvent::Start(tag, Vec::new())
    }

    fn text(s: &str) -> TagEvent {
        TagEvent::Text(s.to_string())
    }

    fn table(rows: &[&[&str]]) -> Vec<TagEvent> {
        let mut events = vec![start(Tag::TableStart)];
        for row in rows {
            events.push(start(Tag::Row));
            for cell in *row {
                events.push(start(Tag::Cell));
                events.push(text(cell));
                events.push(TagEvent::End(Tag::Cell));
            }
            events.push(TagEvent::End(Tag::Row));
        }
        events.push(TagEvent::End(Tag::TableStart));
        events
    }

    #[test]
    fn tag_names_map_to_variants() {
        assert_eq!(Tag::from_name("H3"), Tag::Heading(3));
        assert_eq!(Tag::from_name("del"), Tag::Strike);
        assert_eq!(Tag::from_name("th"), Tag::Cell);
        assert_eq!(Tag::from_name("marquee"), Tag::Unknown);
    }

    #[test]
    fn table_is_flattened_to_fixed_width() {
        let markup = translate(&table(&[&["a", "bb"], &["ccc", "d"]]));
        assert_eq!(markup, "<tt>a   | bb\nccc | d </tt>");
    }

    #[test]
    fn escaped_characters_count_once_in_table_width() {
        let markup = translate(&table(&[
            &["name", "note"],
            &["don't", "x"],
            &["a&b", "longer"],
        ]));
        assert_eq!(
            markup,
            "<tt>name  | note  \ndon&#x27;t | x     \na&amp;b   | longer</tt>"
        );
        assert_eq!(visible_len("&lt;b&gt; &#60;&quot;"), 6);
    }

    #[test]
    fn table_width_ignores_markup_in_cells() {
        let mut events = table(&[&["x", "long"]]);
        // Insert a bold cell row before the table closes.
        let close = events.pop().expect("table end");
        events.extend([
            start(Tag::Row),
            start(Tag::Cell),
            start(Tag::Bold),
            text("yy"),
            TagEvent::End(Tag::Bold),
            TagEvent::End(Tag::Cell),
            start(Tag::Cell),
            text("z"),
            TagEvent::End(Tag::Cell),
            TagEvent::End(Tag::Row),
            close,
        ]);
        assert_eq!(
            translate(&events),
            "<tt>x  | long\n<b>yy</b> | z   </tt>"
        );
    }

    #[test]
    fn links_inside_cells_are_kept() {
        let events = vec![
            start(Tag::TableStart),
            start(Tag::Row),
            start(Tag::Cell),
            TagEvent::Start(Tag::Link, vec![("href".into(), "https://x.y/?a=1&b=2".into())]),
            text("site"),
            TagEvent::End(Tag::Link),
            TagEvent::End(Tag::Cell),
            TagEvent::End(Tag::Row),
            TagEvent::End(Tag::TableStart),
        ];
        assert_eq!(
            translate(&events),
            "<tt><a href='https://x.y/?a=1&amp;b=2'>site</a></tt>"
        );
    }

    #[test]
    fn break_in_cell_is_a_space() {
        let events = vec![
            start(Tag::TableStart),
            start(Tag::Row),
            start(Tag::Cell),
            text("one"),
            start(Tag::Break),
            text("two"),
            TagEvent::End(Tag::Cell),
            TagEvent::End(Tag::Row),
            TagEvent::End(Tag::TableStart),
        ];
        assert_eq!(translate(&events), "<tt>one two</tt>");
    }

    #[test]
    fn cell_outside_table_is_a_separator() {
        let events = vec![start(Tag::Cell), text("a"), TagEvent::End(Tag::Cell)];
        assert_eq!(translate(&events), "| a");
    }

    #[test]
    fn headings_and_inline_spans() {
        let events = vec![
            start(Tag::Heading(1)),
            text("Title"),
            TagEvent::End(Tag::Heading(1)),
            start(Tag::Paragraph),
            text("a "),
            start(Tag::Bold),
            text("b"),
            TagEvent::End(Tag::Bold),
            text(" "),
            start(Tag::Italic),
            text("c"),
            TagEvent::End(Tag::Italic),
            text(" "),
            start(Tag::Code),
            text("x < y"),
            TagEvent::End(Tag::Code),
            TagEvent::End(Tag::Paragraph),
        ];
        assert_eq!(
            translate(&events),
            "<span size='xx-large' weight='bold'>Title</span>\n\na <b>b</b> <i>c</i> <tt>x &lt; y</tt>"
        );
    }

    #[test]
    fn heading_sizes() {
        for (level, size) in [(2, "xx-large"), (3, "x-large"), (5, "large")] {
            let events = vec![
                start(Tag::Heading(level)),
                text("h"),
                TagEvent::End(Tag::Heading(level)),
            ];
            assert_eq!(
                translate(&events),
                format!("<span size='{size}' weight='bold'>h</span>")
            );
        }
    }

    #[test]
    fn lists_quotes_and_rules() {
        let events = vec![
            start(Tag::ListStart),
            start(Tag::ListItem),
            text("one"),
            TagEvent::End(Tag::ListItem),
            start(Tag::ListItem),
            text("two"),
            TagEvent::End(Tag::ListItem),
            TagEvent::End(Tag::ListStart),
            start(Tag::Rule),
            start(Tag::Quote),
            text("quoted"),
            TagEvent::End(Tag::Quote),
        ];
        assert_eq!(
            translate(&events),
            format!(
                "• one\n• two\n\n{}\n\n  <i>quoted</i>",
                "─".repeat(RULE_WIDTH)
            )
        );
    }

    #[test]
    fn unknown_tags_are_ignored() {
        let events = vec![start(Tag::Unknown), text("plain"), TagEvent::End(Tag::Unknown)];
        assert_eq!(translate(&events), "plain");
    }

    #[test]
    fn escape_covers_quotes() {
        assert_eq!(escape_markup(r#"<a href="x">'&'"#), "&lt;a href=&quot;x&quot;&gt;&#x27;&amp;&#x27;");
    }

    #[test]
    fn quick_markup_handles_common_inline_forms() {
        assert_eq!(
            quick_markup("# Hi\n**bold** and *it* with `a<b`"),
            "<span size='xx-large' weight='bold'>Hi</span>\n<b>bold</b> and <i>it</i> with <tt>a&lt;b</tt>"
        );
        assert_eq!(quick_markup(r"area \(\pi r^2\)"), r"area <tt>\pi r^2</tt>");
        assert_eq!(quick_markup("### small"), "<span size='large' weight='bold'>small</span>");
    }
}
