use std::sync::Arc;

use anyhow::{Context, Result};

use crate::detect::engine::{InferenceEngine, JpegDecoder};
use crate::detect::result::{DetectionBox, DetectionData, FrameImage, Label};
use crate::frame::FrameGuard;
use crate::now_millis;

/// Raw detections at or below this score are discarded.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.3;

/// The single class this detector supports.
pub const PEDESTRIAN_LABEL: &str = "person";

/// Pedestrian detector. Owns the decode and inference seams.
pub struct Detector {
    decoder: Box<dyn JpegDecoder>,
    engine: Box<dyn InferenceEngine>,
    threshold: f32,
    label: Label,
    current: Option<DetectionData>,
}

impl Detector {
    /// Allocate the model resource and build the detector.
    ///
    /// Warm-up failure means no detection is possible at all; callers treat
    /// it as fatal to startup.
    pub fn init(
        decoder: Box<dyn JpegDecoder>,
        mut engine: Box<dyn InferenceEngine>,
        threshold: f32,
    ) -> Result<Self> {
        engine
            .warm_up()
            .with_context(|| format!("allocate pedestrian detection model ({})", engine.name()))?;
        let label = Label::new(PEDESTRIAN_LABEL)?;
        log::info!("pedestrian detector initialized (engine: {})", engine.name());
        Ok(Self {
            decoder,
            engine,
            threshold,
            label,
            current: None,
        })
    }

    /// Run one detect cycle on a borrowed frame.
    ///
    /// Never fails: decode or inference errors yield an empty detection
    /// list for this frame and the loop moves on. The compressed bytes are
    /// copied into the result up front, so the caller may return the frame
    /// to the pool as soon as this returns.
    pub fn detect(&mut self, frame: &FrameGuard) -> DetectionData {
        let timestamp_ms = now_millis();
        let image = Arc::new(FrameImage {
            jpeg: frame.jpeg().to_vec(),
            width: frame.width(),
            height: frame.height(),
        });

        let raw = match self.decoder.decode(frame.jpeg()) {
            Ok(pixels) => {
                // `pixels` is owned by this arm and drops when it ends,
                // whether inference succeeds or errors.
                self.engine.run(&pixels)
            }
            Err(err) => {
                log::warn!("failed to decode jpeg frame for detection: {err:#}");
                let result = DetectionData::empty(timestamp_ms, Some(image));
                self.current = Some(result.clone());
                return result;
            }
        };

        let raw = match raw {
            Ok(raw) => raw,
            Err(err) => {
                log::warn!("inference failed on this frame: {err:#}");
                Vec::new()
            }
        };

        let mut boxes = Vec::with_capacity(raw.len());
        for det in raw {
            if det.score <= self.threshold {
                continue;
            }
            log::info!(
                "pedestrian detected [score: {:.2}, x1: {:.1}, y1: {:.1}, x2: {:.1}, y2: {:.1}]",
                det.score,
                det.bbox[0],
                det.bbox[1],
                det.bbox[2],
                det.bbox[3]
            );
            boxes.push(DetectionBox {
                x1: det.bbox[0],
                y1: det.bbox[1],
                x2: det.bbox[2],
                y2: det.bbox[3],
                score: det.score,
                label: self.label.clone(),
            });
        }

        if boxes.is_empty() {
            log::debug!("no pedestrians detected in this frame");
        } else {
            log::info!("detection completed: found {} pedestrians", boxes.len());
        }

        let result = DetectionData {
            timestamp_ms,
            image: Some(image),
            boxes,
        };
        self.current = Some(result.clone());
        result
    }

    /// Most recent result, if any cycle has run.
    pub fn current(&self) -> Option<&DetectionData> {
        self.current.as_ref()
    }
}
