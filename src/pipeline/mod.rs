//! Pipeline glue: event subscription in, derived notifications out

pub mod notify;
pub mod transformer;

pub use notify::{derive_notify, ImageCropper, PassthroughCropper, Region};
pub use transformer::{TransformStats, Transformer};

use crate::message::{Event, Notify};

/// The standard stage: detection events in, notifications out
pub type EventTransformer = Transformer<Event, Notify>;
