//! Incremental streaming markdown rendering.
//!
//! `segment` splits the raw buffer into blocks, `html` + `markup` turn text
//! blocks into markup, `render` builds a widget per block, and `view` keeps
//! the widget list in step with the buffer as it grows. `session` ties a
//! buffer to its view and throttles re-rendering.

pub mod highlight;
pub mod html;
pub mod markup;
pub mod render;
pub mod segment;
pub mod session;
pub mod styled;
pub mod view;

pub use render::{render_block, CodeView, TextNode, Widget};
pub use segment::{segment, Block, BlockKind};
pub use session::{RenderThrottle, ResponseSession, SharedSession, StreamState};
pub use view::{reconcile, MarkdownView, ReconcileStats};
