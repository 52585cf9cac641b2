//! Pedestrian Detection Sentinel
//!
//! This crate implements a capture/detect/publish pipeline for a small
//! camera device with an attached inference accelerator, plus the local
//! HTTP gateway that exposes the results.
//!
//! # Architecture
//!
//! One worker runs the capture loop: acquire a frame from the fixed pool,
//! decode and run pedestrian detection on it, publish the result, return
//! the frame to the pool, yield. Request handlers run concurrently and
//! only ever read published snapshots; they never coordinate back to the
//! worker. Network association completes before the gateway is reachable.
//!
//! # Module Structure
//!
//! - `frame`: fixed frame pool and the scoped frame borrow (`FrameGuard`)
//! - `detect`: JPEG decode + inference + confidence filtering
//! - `wifi`: bounded-retry network association state machine
//! - `state`: single-slot detection store and the bounded message log
//! - `gateway`: local HTTP interface over the published state
//! - `pipeline`: the capture/detect worker loop
//! - `config`: daemon configuration (file + environment)

use std::time::{SystemTime, UNIX_EPOCH};

pub mod config;
pub mod detect;
pub mod frame;
pub mod gateway;
pub mod pipeline;
pub mod state;
pub mod wifi;

pub use config::SentineldConfig;
pub use detect::{
    DetectionBox, DetectionData, Detector, FrameImage, ImageDecoder, InferenceEngine, JpegDecoder,
    Label, PixelBuffer, RawDetection, StubEngine, DEFAULT_CONFIDENCE_THRESHOLD, PEDESTRIAN_LABEL,
};
pub use frame::{FrameGuard, FramePool, FrameSource, StubFrameSource};
pub use gateway::{Gateway, GatewayConfig, GatewayContext, GatewayHandle};
pub use pipeline::run_capture_loop;
pub use state::{MessageLog, SharedState, DEFAULT_MESSAGE_CAPACITY};
pub use wifi::{
    ConnectionEvents, ConnectionManager, ConnectionState, UnmanagedDriver, WifiCredentials,
    WifiDriver, DEFAULT_MAX_RETRIES,
};

/// Milliseconds since the Unix epoch. Capture timestamps use this clock.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Wall-clock prefix for system messages, e.g. `[14:32:07] `.
pub(crate) fn clock_prefix() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format!(
        "[{:02}:{:02}:{:02}] ",
        (secs / 3600) % 24,
        (secs / 60) % 60,
        secs % 60
    )
}
