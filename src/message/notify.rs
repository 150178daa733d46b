//! Derived notification records

use serde::{Deserialize, Serialize};

use super::event::Image;
use super::Message;

/// Classified object notification derived from an [`Event`](super::Event)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Notify {
    pub fov_id: String,
    pub timestamp: u64,
    /// Object rectangle within the source frame
    pub frame_x: i32,
    pub frame_y: i32,
    pub frame_width: i32,
    pub frame_height: i32,
    pub metric: f32,
    pub object_width: u32,
    pub object_height: u32,
    pub category: String,
    pub sdu_id: u64,
    pub coordinate: String,
    pub status: u32,
    pub images: Vec<Image>,
}

impl Notify {
    /// Weight for bounded queues: total encoded size of all images
    pub fn payload_size(&self) -> usize {
        self.images.iter().map(Image::len).sum()
    }
}

impl Message for Notify {
    const SERVICE: &'static str = "fov.NotifySubscriber";
}
