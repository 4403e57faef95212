//! Block renderer: one displayable widget per segmented block.
//!
//! Text blocks become [`TextNode`]s holding translated markup; code blocks
//! become read-only [`CodeView`]s with optional syntax highlighting. Rendering
//! never fails: a text block whose markdown cannot be translated is shown as
//! its escaped source.

use crate::markdown::highlight::{highlight, lookup_language};
use crate::markdown::html::text_to_markup;
use crate::markdown::markup::escape_markup;
use crate::markdown::segment::{Block, BlockKind};
use crate::markdown::styled::{base_style, markup_to_lines};
use ratatui::style::{Color, Style};
use ratatui::text::{Line, Span};

/// Natural height cap of a code viewer, in rows. Taller code scrolls inside the viewer.
pub const CODE_VIEW_MAX_HEIGHT: usize = 20;

fn code_style() -> Style {
    Style::default().bg(Color::Rgb(40, 40, 40)).fg(Color::White)
}

/// Markdown source of a text block to markup, falling back to escaped text.
pub fn text_markup(source: &str) -> String {
    match text_to_markup(source) {
        Ok(markup) => markup,
        Err(err) => {
            tracing::warn!("Error parsing Markdown, showing plain text: {err}");
            escape_markup(source)
        }
    }
}

/// A word-wrapped, left-aligned, selectable rich-text node.
#[derive(Debug, Clone)]
pub struct TextNode {
    source: String,
    markup: String,
    lines: Vec<Line<'static>>,
}

impl TextNode {
    pub fn new(source: &str) -> Self {
        let markup = text_markup(source);
        let lines = markup_to_lines(&markup, base_style());
        Self {
            source: source.to_string(),
            markup,
            lines,
        }
    }

    /// Replaces the node's content. Returns false when `source` is what the
    /// node already shows, in which case nothing is re-translated.
    pub fn set_source(&mut self, source: &str) -> bool {
        if self.source == source {
            return false;
        }
        *self = Self::new(source);
        true
    }

    pub fn markup(&self) -> &str {
        &self.markup
    }

    pub fn lines(&self) -> &[Line<'static>] {
        &self.lines
    }
}

/// A read-only, horizontally scrollable, monospaced code viewer.
#[derive(Debug, Clone)]
pub struct CodeView {
    language: String,
    source: String,
    lines: Vec<Line<'static>>,
    highlighted: bool,
    scroll: usize,
}

impl CodeView {
    pub fn new(language: &str, source: &str) -> Self {
        let mut view = Self {
            language: language.to_string(),
            source: source.to_string(),
            lines: Vec::new(),
            highlighted: false,
            scroll: 0,
        };
        view.relayout();
        view
    }

    fn relayout(&mut self) {
        let highlighted = lookup_language(&self.language).and_then(|syntax| highlight(&self.source, syntax));
        self.highlighted = highlighted.is_some();
        self.lines = highlighted.unwrap_or_else(|| {
            self.source
                .split('\n')
                .map(|line| Line::from(Span::styled(line.to_string(), code_style())))
                .collect()
        });
        self.scroll = self.scroll.min(self.max_scroll());
    }

    /// Replaces the buffer. Returns false, and does no work, when neither the
    /// code nor its language changed.
    pub fn set_content(&mut self, language: &str, source: &str) -> bool {
        if self.source == source && self.language == language {
            return false;
        }
        self.language = language.to_string();
        self.source = source.to_string();
        self.relayout();
        true
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_highlighted(&self) -> bool {
        self.highlighted
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Displayed height: the natural height, capped.
    pub fn height(&self) -> usize {
        self.lines.len().min(CODE_VIEW_MAX_HEIGHT)
    }

    fn max_scroll(&self) -> usize {
        self.lines.len().saturating_sub(CODE_VIEW_MAX_HEIGHT)
    }

    pub fn scroll(&self) -> usize {
        self.scroll
    }

    pub fn scroll_by(&mut self, delta: isize) {
        self.scroll = self
            .scroll
            .saturating_add_signed(delta)
            .min(self.max_scroll());
    }

    /// The rows currently inside the viewport.
    pub fn visible_lines(&self) -> &[Line<'static>] {
        let end = (self.scroll + CODE_VIEW_MAX_HEIGHT).min(self.lines.len());
        &self.lines[self.scroll..end]
    }
}

/// The displayed counterpart of a [`Block`].
#[derive(Debug, Clone)]
pub enum Widget {
    Text(TextNode),
    Code(CodeView),
}

impl Widget {
    pub fn kind(&self) -> BlockKind {
        match self {
            Widget::Text(_) => BlockKind::Text,
            Widget::Code(_) => BlockKind::Code,
        }
    }

    /// Updates the widget in place from a block of the same kind.
    /// Returns whether anything changed.
    pub fn update_from(&mut self, block: &Block) -> bool {
        match self {
            Widget::Text(node) => node.set_source(&block.content),
            Widget::Code(view) => view.set_content(&block.language, &block.content),
        }
    }
}

/// Whether `block` produces a visible widget. Blank text does not.
pub fn is_renderable(block: &Block) -> bool {
    match block.kind {
        BlockKind::Text => !block.content.trim().is_empty(),
        BlockKind::Code => true,
    }
}

/// Renders one block, or `None` for blank text.
pub fn render_block(block: &Block) -> Option<Widget> {
    if !is_renderable(block) {
        return None;
    }
    Some(match block.kind {
        BlockKind::Text => Widget::Text(TextNode::new(&block.content)),
        BlockKind::Code => Widget::Code(CodeView::new(&block.language, &block.content)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn text_block_renders_markup() {
        let Some(Widget::Text(node)) = render_block(&Block::text("**hi**")) else {
            panic!("expected text widget");
        };
        assert_eq!(node.markup(), "<b>hi</b>");
        assert_eq!(node.lines().len(), 1);
    }

    #[test]
    fn blank_text_renders_nothing() {
        assert!(render_block(&Block::text("  \n ")).is_none());
    }

    #[test]
    fn malformed_html_falls_back_to_escaped_source() {
        let source = "<div class='x\nstill open";
        let Some(Widget::Text(node)) = render_block(&Block::text(source)) else {
            panic!("expected text widget");
        };
        assert_eq!(node.markup(), escape_markup(source));
    }

    #[test]
    fn known_language_is_highlighted() {
        let Some(Widget::Code(view)) = render_block(&Block::code("python", "print(1)")) else {
            panic!("expected code widget");
        };
        assert!(view.is_highlighted());
        assert_eq!(view.line_count(), 1);
    }

    #[test]
    fn unknown_language_is_plain_monospace() {
        let view = CodeView::new("", "a\nb");
        assert!(!view.is_highlighted());
        assert_eq!(view.line_count(), 2);
        assert_eq!(view.visible_lines()[0].spans[0].style, code_style());
    }

    #[test]
    fn tall_code_scrolls_inside_the_viewer() {
        let source = (0..50).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
        let mut view = CodeView::new("", &source);
        assert_eq!(view.height(), CODE_VIEW_MAX_HEIGHT);
        view.scroll_by(100);
        assert_eq!(view.scroll(), 50 - CODE_VIEW_MAX_HEIGHT);
        assert_eq!(view.visible_lines().last().map(|l| l.spans[0].content.as_ref()), Some("49"));
        view.scroll_by(-1000);
        assert_eq!(view.scroll(), 0);
    }

    #[test]
    fn unchanged_content_is_not_reapplied() {
        let mut view = CodeView::new("rust", "let a = 1;");
        assert!(!view.set_content("rust", "let a = 1;"));
        assert!(view.set_content("rust", "let a = 2;"));
        assert!(view.set_content("python", "let a = 2;"));

        let mut node = TextNode::new("one");
        assert!(!node.set_source("one"));
        assert!(node.set_source("one two"));
        assert_eq!(node.markup(), "one two");
    }
}
