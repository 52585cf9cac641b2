//! The capture/detect worker loop.
//!
//! One dedicated worker repeats: acquire a frame, run detection, publish
//! the result, return the frame to the pool (guard drop), then yield for a
//! fixed short interval so watchdog bookkeeping and other work can run.
//! Nothing in the loop blocks indefinitely and no error escapes it: frame
//! acquisition failures are logged and retried after a pause.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::detect::Detector;
use crate::frame::FrameSource;
use crate::state::{MessageLog, SharedState};

/// Fixed cooperative yield at the end of every cycle.
pub const WORKER_YIELD: Duration = Duration::from_millis(20);

/// Pause before retrying after a failed frame acquisition.
pub const CAPTURE_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Run the worker loop until `shutdown` trips.
pub fn run_capture_loop(
    source: &mut dyn FrameSource,
    detector: &mut Detector,
    state: &SharedState,
    messages: &MessageLog,
    shutdown: &AtomicBool,
) {
    while !shutdown.load(Ordering::SeqCst) {
        let frame = match source.acquire() {
            Ok(frame) => frame,
            Err(err) => {
                log::error!("failed to take picture: {err:#}");
                messages.append("ERROR: Failed to take picture");
                std::thread::sleep(CAPTURE_RETRY_DELAY);
                continue;
            }
        };

        let result = detector.detect(&frame);
        if result.boxes.is_empty() {
            log::debug!("no objects detected");
        } else {
            log::info!("objects detected: {}", result.boxes.len());
        }

        state.publish(result);
        // Guard drop returns the buffer to the pool before the yield.
        drop(frame);

        std::thread::sleep(WORKER_YIELD);
    }
    log::info!("capture loop stopped");
}
