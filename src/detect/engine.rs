use anyhow::{anyhow, Context, Result};
use image::GenericImageView;

/// Owned raw pixel buffer produced by the decode step.
///
/// Ownership is the release contract: the buffer is freed when the value
/// drops at the end of the decode-success scope, on every path out of it,
/// including inference errors. There is no manual free call to misplace.
pub struct PixelBuffer {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl PixelBuffer {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

/// One raw detection as produced by the inference engine, before
/// confidence filtering. `bbox` is `[x1, y1, x2, y2]` in pixel space.
#[derive(Clone, Debug)]
pub struct RawDetection {
    pub bbox: [f32; 4],
    pub score: f32,
}

/// The inference accelerator seam.
///
/// Implementations wrap the model runtime. `warm_up` allocates the model
/// resource once; a failure there is fatal to startup since no detection
/// is possible without it.
pub trait InferenceEngine: Send {
    /// Engine identifier for logs.
    fn name(&self) -> &'static str;

    /// Allocate the model resource. Called once at detector init.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }

    /// Run the model on a decoded frame.
    fn run(&mut self, pixels: &PixelBuffer) -> Result<Vec<RawDetection>>;
}

/// The JPEG decode seam. Takes compressed bytes, returns an owned raw
/// pixel buffer or failure.
pub trait JpegDecoder: Send {
    fn decode(&self, jpeg: &[u8]) -> Result<PixelBuffer>;
}

/// Default decoder backed by the `image` crate. Produces RGB888.
pub struct ImageDecoder;

impl JpegDecoder for ImageDecoder {
    fn decode(&self, jpeg: &[u8]) -> Result<PixelBuffer> {
        let decoded = image::load_from_memory(jpeg).context("decode jpeg")?;
        let (width, height) = decoded.dimensions();
        let rgb = decoded.into_rgb8();
        Ok(PixelBuffer::new(rgb.into_raw(), width, height))
    }
}

/// Stub engine for testing. Replays a canned detection list on every frame.
pub struct StubEngine {
    canned: Vec<RawDetection>,
    fail_warm_up: bool,
    fail_run: bool,
}

impl StubEngine {
    pub fn new(canned: Vec<RawDetection>) -> Self {
        Self {
            canned,
            fail_warm_up: false,
            fail_run: false,
        }
    }

    /// Simulate model allocation failure.
    pub fn failing_warm_up() -> Self {
        Self {
            canned: Vec::new(),
            fail_warm_up: true,
            fail_run: false,
        }
    }

    /// Simulate a per-frame inference error.
    pub fn failing_run() -> Self {
        Self {
            canned: Vec::new(),
            fail_warm_up: false,
            fail_run: true,
        }
    }
}

impl InferenceEngine for StubEngine {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn warm_up(&mut self) -> Result<()> {
        if self.fail_warm_up {
            return Err(anyhow!("stub engine out of accelerator memory"));
        }
        Ok(())
    }

    fn run(&mut self, _pixels: &PixelBuffer) -> Result<Vec<RawDetection>> {
        if self.fail_run {
            return Err(anyhow!("stub engine inference fault"));
        }
        Ok(self.canned.clone())
    }
}
