//! Camera frame acquisition.
//!
//! Frames come out of a small fixed pool owned by the camera peripheral.
//! The pool is the hard memory bound of the device: a buffer that is not
//! returned is a buffer the camera can never fill again, and once all of
//! them are lost capture stalls permanently.
//!
//! `FrameGuard` is the scoped borrow of one pool buffer. It returns the
//! buffer on drop, so every path out of a detect cycle (success, decode
//! failure, inference failure) releases exactly once.

use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex};

/// A source of compressed camera frames.
///
/// Implementations wrap the actual peripheral driver. The returned guard
/// borrows one buffer from the source's pool for the duration of a single
/// detect cycle.
pub trait FrameSource: Send {
    fn acquire(&mut self) -> Result<FrameGuard>;
}

/// Fixed pool of reusable frame buffers.
///
/// Cloning the pool is cheap and shares the same buffers.
#[derive(Clone)]
pub struct FramePool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    free: Mutex<Vec<Vec<u8>>>,
    frames: usize,
}

impl FramePool {
    pub fn new(frames: usize) -> Self {
        let free = (0..frames).map(|_| Vec::new()).collect();
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(free),
                frames,
            }),
        }
    }

    /// Total number of buffers the pool was created with.
    pub fn frames(&self) -> usize {
        self.inner.frames
    }

    /// Buffers currently available for capture.
    pub fn available(&self) -> usize {
        self.inner
            .free
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .len()
    }

    fn take(&self) -> Result<Vec<u8>> {
        self.inner
            .free
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .pop()
            .ok_or_else(|| anyhow!("frame pool exhausted ({} buffers outstanding)", self.frames()))
    }

    fn put_back(&self, mut buf: Vec<u8>) {
        buf.clear();
        self.inner
            .free
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .push(buf);
    }
}

/// Scoped borrow of one pool buffer holding a compressed JPEG frame.
///
/// The buffer goes back to the pool when the guard drops.
pub struct FrameGuard {
    jpeg: Option<Vec<u8>>,
    width: u32,
    height: u32,
    pool: FramePool,
}

impl FrameGuard {
    pub fn new(pool: FramePool, jpeg: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            jpeg: Some(jpeg),
            width,
            height,
            pool,
        }
    }

    /// Compressed frame bytes.
    pub fn jpeg(&self) -> &[u8] {
        self.jpeg.as_deref().unwrap_or(&[])
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        if let Some(buf) = self.jpeg.take() {
            self.pool.put_back(buf);
        }
    }
}

/// Stub frame source for testing and for deployments without a camera
/// peripheral driver. Cycles through a fixed set of canned payloads.
pub struct StubFrameSource {
    pool: FramePool,
    payloads: Vec<Vec<u8>>,
    cursor: usize,
    width: u32,
    height: u32,
}

impl StubFrameSource {
    pub fn new(pool: FramePool, payloads: Vec<Vec<u8>>, width: u32, height: u32) -> Self {
        Self {
            pool,
            payloads,
            cursor: 0,
            width,
            height,
        }
    }
}

impl FrameSource for StubFrameSource {
    fn acquire(&mut self) -> Result<FrameGuard> {
        let payload = self
            .payloads
            .get(self.cursor % self.payloads.len().max(1))
            .ok_or_else(|| anyhow!("stub frame source has no payloads"))?;
        let mut buf = self.pool.take()?;
        buf.extend_from_slice(payload);
        self.cursor = self.cursor.wrapping_add(1);
        Ok(FrameGuard::new(
            self.pool.clone(),
            buf,
            self.width,
            self.height,
        ))
    }
}
