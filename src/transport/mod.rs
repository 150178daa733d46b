//! Completion-driven transport primitives
//!
//! Event loops in this crate never await I/O inside a session's turn.
//! Instead, a turn *starts* an operation tagged with the session id; the
//! operation runs on the loop's runtime and posts a `(tag, ok, event)`
//! completion when it finishes. The loop pulls completions one at a time
//! and hands each to the session owning the tag.
//!
//! ```text
//!  session turn ──start(tag, op)──► [runtime task] ──► CompletionQueue
//!        ▲                                                  │
//!        └──────────── proceed(ok, event) ◄── loop: next() ─┘
//! ```

pub mod completion;

pub use completion::{Completion, CompletionHandle, CompletionQueue, Tag};
