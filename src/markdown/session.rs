//! One streamed response: its raw buffer, its view, and render throttling.
//!
//! Fragments are appended as they arrive, but the view is only re-rendered
//! once per throttle interval. Pending renders hold a weak handle to the
//! session, so a render scheduled for a response whose view has since been
//! closed simply does nothing.

use crate::markdown::view::{MarkdownView, ReconcileStats};
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

/// Default coalescing interval for re-renders while streaming.
pub const DEFAULT_RENDER_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Empty,
    Streaming,
    Finalized,
}

#[derive(Debug)]
pub struct ResponseSession {
    buffer: String,
    view: MarkdownView,
    state: StreamState,
    render_scheduled: bool,
}

impl Default for ResponseSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseSession {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            view: MarkdownView::new(),
            state: StreamState::Empty,
            render_scheduled: false,
        }
    }

    /// A finalized session showing `text`, e.g. a response restored from history.
    pub fn from_text(text: &str) -> Self {
        let mut session = Self::new();
        session.buffer.push_str(text);
        session.view.render(text);
        session.state = StreamState::Finalized;
        session
    }

    /// Appends a fragment to the raw buffer without rendering.
    ///
    /// Returns true when the caller should schedule a render, i.e. none is
    /// pending yet. Fragments arriving after finalization are dropped.
    pub fn append_fragment(&mut self, text: &str) -> bool {
        if self.state == StreamState::Finalized {
            tracing::debug!(len = text.len(), "dropping fragment for finalized response");
            return false;
        }
        self.state = StreamState::Streaming;
        self.buffer.push_str(text);
        if self.render_scheduled {
            return false;
        }
        self.render_scheduled = true;
        true
    }

    /// Runs a pending render, if there is one.
    pub fn flush(&mut self) -> Option<ReconcileStats> {
        if !self.render_scheduled {
            return None;
        }
        self.render_scheduled = false;
        Some(self.view.update(&self.buffer))
    }

    /// Renders whatever is buffered and closes the session to further fragments.
    pub fn finalize(&mut self) {
        if self.state == StreamState::Finalized {
            return;
        }
        self.render_scheduled = false;
        self.view.update(&self.buffer);
        self.state = StreamState::Finalized;
    }

    pub fn text(&self) -> &str {
        &self.buffer
    }

    pub fn view(&self) -> &MarkdownView {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut MarkdownView {
        &mut self.view
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_render_scheduled(&self) -> bool {
        self.render_scheduled
    }
}

pub type SharedSession = Rc<RefCell<ResponseSession>>;

#[derive(Debug)]
struct PendingRender {
    due: Instant,
    session: Weak<RefCell<ResponseSession>>,
}

/// Coalesces fragment arrivals into at most one render per session per interval.
#[derive(Debug)]
pub struct RenderThrottle {
    interval: Duration,
    pending: Vec<PendingRender>,
}

impl RenderThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            pending: Vec::new(),
        }
    }

    /// Appends `fragment` to `session` and schedules a render if none is pending.
    pub fn append(&mut self, session: &SharedSession, fragment: &str, now: Instant) {
        if session.borrow_mut().append_fragment(fragment) {
            self.pending.push(PendingRender {
                due: now + self.interval,
                session: Rc::downgrade(session),
            });
        }
    }

    /// Runs every render that is due at `now`. Returns how many actually rendered.
    pub fn run_due(&mut self, now: Instant) -> usize {
        let mut rendered = 0;
        self.pending.retain(|pending| {
            if pending.due > now {
                return true;
            }
            match pending.session.upgrade() {
                Some(session) => {
                    if session.borrow_mut().flush().is_some() {
                        rendered += 1;
                    }
                }
                None => tracing::trace!("skipping render for a closed view"),
            }
            false
        });
        rendered
    }

    /// Earliest instant at which a pending render becomes due.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.iter().map(|p| p.due).min()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

impl Default for RenderThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_RENDER_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markdown::render::Widget;
    use crate::markdown::segment::BlockKind;
    use pretty_assertions::assert_eq;

    fn shared() -> SharedSession {
        Rc::new(RefCell::new(ResponseSession::new()))
    }

    #[test]
    fn state_moves_forward_only() {
        let mut session = ResponseSession::new();
        assert_eq!(session.state(), StreamState::Empty);
        session.append_fragment("hi");
        assert_eq!(session.state(), StreamState::Streaming);
        session.finalize();
        assert_eq!(session.state(), StreamState::Finalized);
        assert!(!session.append_fragment(" more"));
        assert_eq!(session.text(), "hi");
        assert_eq!(session.state(), StreamState::Finalized);
    }

    #[test]
    fn bursts_are_coalesced_into_one_render() {
        let session = shared();
        let mut throttle = RenderThrottle::new(Duration::from_millis(50));
        let start = Instant::now();

        for fragment in ["Hel", "lo ", "**wor", "ld**"] {
            throttle.append(&session, fragment, start);
        }
        assert!(session.borrow().view().is_empty());
        assert_eq!(throttle.run_due(start + Duration::from_millis(10)), 0);
        assert_eq!(throttle.run_due(start + Duration::from_millis(50)), 1);
        assert!(!throttle.has_pending());

        let session = session.borrow();
        let [Widget::Text(node)] = session.view().widgets() else {
            panic!("expected one text widget");
        };
        assert_eq!(node.markup(), "Hello <b>world</b>");
    }

    #[test]
    fn closed_view_is_never_rendered() {
        let session = shared();
        let mut throttle = RenderThrottle::default();
        let start = Instant::now();
        throttle.append(&session, "text", start);
        drop(session);
        assert_eq!(throttle.run_due(start + Duration::from_secs(1)), 0);
        assert!(!throttle.has_pending());
    }

    #[test]
    fn finalize_renders_immediately_and_cancels_pending() {
        let session = shared();
        let mut throttle = RenderThrottle::default();
        let start = Instant::now();
        throttle.append(&session, "```rust\nfn x() {}", start);
        session.borrow_mut().finalize();
        assert_eq!(session.borrow().view().widgets()[0].kind(), BlockKind::Code);
        assert_eq!(throttle.run_due(start + Duration::from_secs(1)), 0);
    }

    #[test]
    fn next_deadline_tracks_earliest_pending() {
        let a = shared();
        let b = shared();
        let mut throttle = RenderThrottle::new(Duration::from_millis(30));
        let start = Instant::now();
        throttle.append(&a, "a", start + Duration::from_millis(5));
        throttle.append(&b, "b", start);
        assert_eq!(throttle.next_deadline(), Some(start + Duration::from_millis(30)));
    }

    #[test]
    fn restored_text_is_rendered_and_final() {
        let session = ResponseSession::from_text("# Saved\n```sh\nls\n```");
        assert_eq!(session.state(), StreamState::Finalized);
        assert_eq!(session.view().widgets().len(), 2);
    }
}
