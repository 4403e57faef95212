//! Keeps a list of displayed widgets in step with a growing response.
//!
//! Each pass re-segments the whole buffer, then walks the fresh block list and
//! the existing widgets together. Widgets whose kind still matches are updated
//! in place (usually a no-op for everything but the last block); mismatches
//! are replaced; leftovers are dropped.

use crate::markdown::render::{is_renderable, render_block, Widget};
use crate::markdown::segment::{segment, Block};

/// What one reconciliation pass did to the widget list.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileStats {
    /// Widgets whose content changed in place.
    pub updated: usize,
    /// Widgets that matched and already showed the right content.
    pub unchanged: usize,
    pub inserted: usize,
    pub removed: usize,
}

/// Brings `widgets` in line with `blocks`.
pub fn reconcile(widgets: &mut Vec<Widget>, blocks: &[Block]) -> ReconcileStats {
    let mut stats = ReconcileStats::default();
    let mut pos = 0;

    for block in blocks.iter().filter(|b| is_renderable(b)) {
        match widgets.get_mut(pos) {
            Some(widget) if widget.kind() == block.kind => {
                if widget.update_from(block) {
                    stats.updated += 1;
                } else {
                    stats.unchanged += 1;
                }
            }
            Some(widget) => {
                if let Some(fresh) = render_block(block) {
                    *widget = fresh;
                    stats.removed += 1;
                    stats.inserted += 1;
                }
            }
            None => {
                if let Some(fresh) = render_block(block) {
                    widgets.push(fresh);
                    stats.inserted += 1;
                }
            }
        }
        pos += 1;
    }

    if widgets.len() > pos {
        stats.removed += widgets.len() - pos;
        widgets.truncate(pos);
    }
    stats
}

/// A vertical stack of rendered blocks for one response.
#[derive(Debug, Default)]
pub struct MarkdownView {
    widgets: Vec<Widget>,
}

impl MarkdownView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discards every widget and renders `full_text` from scratch.
    pub fn render(&mut self, full_text: &str) -> ReconcileStats {
        let removed = self.widgets.len();
        self.widgets.clear();
        let mut stats = reconcile(&mut self.widgets, &segment(full_text));
        stats.removed += removed;
        stats
    }

    /// Reconciles the existing widgets against `full_text`.
    pub fn update(&mut self, full_text: &str) -> ReconcileStats {
        let blocks = segment(full_text);
        let stats = reconcile(&mut self.widgets, &blocks);
        tracing::trace!(
            blocks = blocks.len(),
            updated = stats.updated,
            inserted = stats.inserted,
            removed = stats.removed,
            "markdown view reconciled"
        );
        stats
    }

    pub fn widgets(&self) -> &[Widget] {
        &self.widgets
    }

    pub fn widgets_mut(&mut self) -> &mut [Widget] {
        &mut self.widgets
    }

    pub fn is_empty(&self) -> bool {
        self.widgets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markdown::segment::BlockKind;
    use pretty_assertions::assert_eq;

    fn kinds(view: &MarkdownView) -> Vec<BlockKind> {
        view.widgets().iter().map(Widget::kind).collect()
    }

    fn markup_of(widget: &Widget) -> String {
        match widget {
            Widget::Text(node) => node.markup().to_string(),
            Widget::Code(view) => view.source().to_string(),
        }
    }

    #[test]
    fn only_changed_block_is_updated() {
        let mut widgets = Vec::new();
        reconcile(&mut widgets, &[Block::text("A"), Block::code("rs", "B")]);

        let stats = reconcile(&mut widgets, &[Block::text("A changed"), Block::code("rs", "B")]);
        assert_eq!(
            stats,
            ReconcileStats {
                updated: 1,
                unchanged: 1,
                inserted: 0,
                removed: 0,
            }
        );
    }

    #[test]
    fn kind_mismatch_replaces_in_place() {
        let mut widgets = Vec::new();
        reconcile(&mut widgets, &[Block::text("A"), Block::text("B")]);
        let stats = reconcile(
            &mut widgets,
            &[Block::text("A"), Block::code("", "x"), Block::text("C")],
        );
        assert_eq!(stats.removed, 1);
        assert_eq!(stats.inserted, 2);
        assert_eq!(stats.unchanged, 1);
        let kinds: Vec<_> = widgets.iter().map(Widget::kind).collect();
        assert_eq!(kinds, vec![BlockKind::Text, BlockKind::Code, BlockKind::Text]);
    }

    #[test]
    fn leftover_widgets_are_removed() {
        let mut widgets = Vec::new();
        reconcile(&mut widgets, &[Block::text("A"), Block::code("", "x"), Block::text("C")]);
        let stats = reconcile(&mut widgets, &[Block::text("A")]);
        assert_eq!(stats.removed, 2);
        assert_eq!(widgets.len(), 1);
    }

    #[test]
    fn blank_text_blocks_are_skipped() {
        let mut widgets = Vec::new();
        let stats = reconcile(&mut widgets, &[Block::text("  "), Block::code("", "x")]);
        assert_eq!(stats.inserted, 1);
        assert_eq!(widgets[0].kind(), BlockKind::Code);
    }

    #[test]
    fn render_is_idempotent() {
        let text = "# T\n\nbody\n```rust\nfn f() {}\n```\n| a | b |\n|---|---|\n| 1 | 2 |";
        let mut once = MarkdownView::new();
        once.render(text);
        let mut twice = MarkdownView::new();
        twice.render(text);
        twice.render(text);

        assert_eq!(kinds(&once), kinds(&twice));
        let once_markup: Vec<_> = once.widgets().iter().map(markup_of).collect();
        let twice_markup: Vec<_> = twice.widgets().iter().map(markup_of).collect();
        assert_eq!(once_markup, twice_markup);

        let stats = twice.update(text);
        assert_eq!(stats.updated + stats.inserted + stats.removed, 0);
    }

    #[test]
    fn streaming_appends_touch_only_the_tail() {
        let full = "Intro paragraph.\n\n```python\nprint(1)\nprint(2)\n```\nAfter.";
        let mut view = MarkdownView::new();
        let mut replaced = 0;
        for end in 1..=full.len() {
            let stats = view.update(&full[..end]);
            replaced += stats.removed;
            assert!(stats.updated <= 1, "more than the tail changed at {end}");
        }
        assert_eq!(replaced, 0);
        assert_eq!(
            kinds(&view),
            vec![BlockKind::Text, BlockKind::Code, BlockKind::Text]
        );
        let mut fresh = MarkdownView::new();
        fresh.render(full);
        let a: Vec<_> = view.widgets().iter().map(markup_of).collect();
        let b: Vec<_> = fresh.widgets().iter().map(markup_of).collect();
        assert_eq!(a, b);
    }
}
