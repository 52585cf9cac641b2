use std::sync::Arc;

use anyhow::{anyhow, Result};

/// Maximum visible length of a detection class label.
pub const MAX_LABEL_LEN: usize = 15;

/// Bounded-length class label, validated at construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Label(String);

impl Label {
    pub fn new(text: &str) -> Result<Self> {
        if text.is_empty() {
            return Err(anyhow!("label must not be empty"));
        }
        if text.len() > MAX_LABEL_LEN {
            return Err(anyhow!(
                "label '{}' exceeds {} bytes",
                text,
                MAX_LABEL_LEN
            ));
        }
        Ok(Self(text.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One detected pedestrian. Immutable once created.
///
/// Corner coordinates are in image pixel space; `score` is in [0, 1].
#[derive(Clone, Debug)]
pub struct DetectionBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub score: f32,
    pub label: Label,
}

/// The published copy of the frame a result was computed from.
///
/// Detection copies the compressed bytes out of the pool buffer, so readers
/// holding this image never race the pool release.
#[derive(Clone, Debug)]
pub struct FrameImage {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Result of one detect cycle. Exactly one result is current at any time;
/// there is no retained history.
#[derive(Clone, Debug)]
pub struct DetectionData {
    /// Capture timestamp, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Frame the result was computed from; `None` only before the first cycle.
    pub image: Option<Arc<FrameImage>>,
    /// Detections in detector output order.
    pub boxes: Vec<DetectionBox>,
}

impl DetectionData {
    pub fn empty(timestamp_ms: u64, image: Option<Arc<FrameImage>>) -> Self {
        Self {
            timestamp_ms,
            image,
            boxes: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_rejects_oversized_text() {
        assert!(Label::new("person").is_ok());
        assert!(Label::new("a".repeat(MAX_LABEL_LEN).as_str()).is_ok());
        assert!(Label::new("a".repeat(MAX_LABEL_LEN + 1).as_str()).is_err());
        assert!(Label::new("").is_err());
    }
}
