//! Event to notification derivation

use std::time::{SystemTime, UNIX_EPOCH};

use crate::message::{DetectedObject, Event, Image, Notify};

/// Scores below this are reported as an unknown category
pub const CATEGORY_SCORE_THRESHOLD: f32 = 0.01;

/// Label used when the classifier is not confident enough
pub const UNKNOWN_CATEGORY: &str = "Unknown";

/// Margin added around the object when cropping
pub const CROP_PADDING: i32 = 100;

/// Axis-aligned pixel rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Region {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Bounding box of a detected object
    pub fn of(object: &DetectedObject) -> Self {
        Self::new(object.x, object.y, object.w, object.h)
    }

    /// Grow by `padding` on every side, clamped to a `width` x `height` image
    pub fn padded(&self, padding: i32, width: i32, height: i32) -> Self {
        let x = (self.x - padding).clamp(0, width.max(0));
        let y = (self.y - padding).clamp(0, height.max(0));
        let right = (self.x + self.width + padding).clamp(x, width.max(x));
        let bottom = (self.y + self.height + padding).clamp(y, height.max(y));

        Self::new(x, y, right - x, bottom - y)
    }
}

/// Produces the image attached to a notification
pub trait ImageCropper {
    fn crop(&self, image: &Image, region: &Region) -> Image;
}

/// Keeps the full encoded image
///
/// Image decoding is outside this crate; deployments that need real crops
/// plug in their own [`ImageCropper`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughCropper;

impl ImageCropper for PassthroughCropper {
    fn crop(&self, image: &Image, _region: &Region) -> Image {
        image.clone()
    }
}

/// Derive the notification for an event's first detected object
///
/// Events without objects produce nothing.
pub fn derive_notify<C: ImageCropper + ?Sized>(event: &Event, cropper: &C) -> Option<Notify> {
    let object = event.objects.first()?;

    let (category, metric) = if object.score >= CATEGORY_SCORE_THRESHOLD {
        (object.label.clone(), object.score)
    } else {
        (UNKNOWN_CATEGORY.to_string(), 0.0)
    };

    let region = Region::of(object).padded(CROP_PADDING, event.image.width, event.image.height);

    Some(Notify {
        fov_id: now_millis().to_string(),
        timestamp: event.timestamp,
        frame_x: object.x,
        frame_y: object.y,
        frame_width: object.w,
        frame_height: object.h,
        metric,
        object_width: object.w.max(0) as u32,
        object_height: object.h.max(0) as u32,
        category,
        sdu_id: event.sdu_id,
        coordinate: event.coordinate.clone(),
        status: 0,
        images: vec![cropper.crop(&event.image, &region)],
    })
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}
