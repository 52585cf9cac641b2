//! Pedestrian detection.
//!
//! One detect cycle: decode the compressed frame, run the inference engine
//! on the owned pixel buffer, filter by confidence, map survivors into
//! `DetectionBox` values. Decode and inference failures degrade to an empty
//! result; they never abort the worker.

mod detector;
mod engine;
mod result;

pub use detector::{Detector, DEFAULT_CONFIDENCE_THRESHOLD, PEDESTRIAN_LABEL};
pub use engine::{ImageDecoder, InferenceEngine, JpegDecoder, PixelBuffer, RawDetection, StubEngine};
pub use result::{DetectionBox, DetectionData, FrameImage, Label, MAX_LABEL_LEN};
