//! Raw detection events
//!
//! An event carries the full encoded frame and every object the detector
//! found in it. Image bytes are held in [`Bytes`], so the clone made for
//! each subscriber shares the same allocation.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::Message;

/// Encoded image (JPEG/PNG bytes) with its pixel dimensions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub width: i32,
    pub height: i32,
    pub data: Bytes,
}

impl Image {
    pub fn new(width: i32, height: i32, data: impl Into<Bytes>) -> Self {
        Self {
            width,
            height,
            data: data.into(),
        }
    }

    /// Size of the encoded payload in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// One detected object, in frame pixel coordinates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
    pub metric: f32,
    pub centroid_x: f32,
    pub centroid_y: f32,
    /// Classifier label
    pub label: String,
    /// Classifier confidence in `[0, 1]`
    pub score: f32,
}

/// Detection event for one frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Field-of-view identifier
    pub fov_id: String,
    /// Sensor data unit the frame came from
    pub sdu_id: u64,
    /// Capture time, milliseconds since the Unix epoch
    pub timestamp: u64,
    /// Free-form location, e.g. `"angle;distance"`
    pub coordinate: String,
    pub image: Image,
    pub objects: Vec<DetectedObject>,
}

impl Event {
    /// Weight of the event for bounded queues: the encoded image size
    pub fn payload_size(&self) -> usize {
        self.image.len()
    }
}

impl Message for Event {
    const SERVICE: &'static str = "fov.EventSubscriber";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_shares_image_bytes() {
        let event = Event {
            image: Image::new(2, 2, vec![1u8, 2, 3, 4]),
            ..Default::default()
        };

        let copy = event.clone();
        assert_eq!(copy.image.data.as_ptr(), event.image.data.as_ptr());
        assert_eq!(copy.payload_size(), 4);
    }
}
