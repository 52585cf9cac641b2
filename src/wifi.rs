//! Network association state machine.
//!
//! `connect` blocks its caller until association resolves one way or the
//! other. Association and address-acquisition events arrive from the wifi
//! stack's own context through a `ConnectionEvents` handle; the rendezvous
//! is a Condvar over the shared state, not polling.
//!
//! Transitions:
//! - `Disconnected -> Connecting` when `connect` starts
//! - `Connecting -> Connecting` on loss while the retry count is below the
//!   bound (a re-association is requested)
//! - `Connecting -> Failed` on the loss that reaches the bound
//! - `Connecting -> Connected` on address acquisition (retry count resets)
//!
//! `Connected` and `Failed` are terminal for one `connect` call. Failure is
//! reported, not retried further; the caller decides whether it is fatal.

use std::net::IpAddr;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

/// Disassociation events tolerated before `connect` resolves `Failed`.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Network credentials, passed in explicitly at connect time.
#[derive(Clone, Debug, Deserialize)]
pub struct WifiCredentials {
    pub ssid: String,
    pub passphrase: String,
}

/// The wifi stack seam.
///
/// `start` brings the interface up and begins association; the stack keeps
/// the events handle and reports outcomes through it from its own context.
/// `reassociate` re-attempts association after a loss.
pub trait WifiDriver: Send + Sync {
    fn start(&self, creds: &WifiCredentials, events: ConnectionEvents) -> Result<()>;

    fn reassociate(&self) -> Result<()> {
        Ok(())
    }
}

struct Shared {
    inner: Mutex<Inner>,
    resolved: Condvar,
}

struct Inner {
    state: ConnectionState,
    retries: u32,
    address: Option<IpAddr>,
}

/// Event handle given to the driver. Safe to call from any thread.
#[derive(Clone)]
pub struct ConnectionEvents {
    driver: Arc<dyn WifiDriver>,
    max_retries: u32,
    shared: Arc<Shared>,
}

impl ConnectionEvents {
    /// The stack lost (or never reached) association.
    pub fn association_lost(&self) {
        let mut inner = self.shared.inner.lock().unwrap_or_else(|err| err.into_inner());
        if inner.state != ConnectionState::Connecting {
            return;
        }
        inner.retries += 1;
        if inner.retries < self.max_retries {
            log::info!(
                "retrying association, attempt {}/{}",
                inner.retries,
                self.max_retries
            );
            drop(inner);
            if let Err(err) = self.driver.reassociate() {
                log::warn!("re-association request failed: {err:#}");
            }
        } else {
            log::error!(
                "association failed after {} attempts",
                self.max_retries
            );
            inner.state = ConnectionState::Failed;
            self.shared.resolved.notify_all();
        }
    }

    /// The stack acquired an address; association is complete.
    pub fn address_acquired(&self, address: IpAddr) {
        let mut inner = self.shared.inner.lock().unwrap_or_else(|err| err.into_inner());
        if inner.state != ConnectionState::Connecting {
            return;
        }
        log::info!("acquired address {}", address);
        inner.retries = 0;
        inner.address = Some(address);
        inner.state = ConnectionState::Connected;
        self.shared.resolved.notify_all();
    }
}

/// Drives association to a terminal state. One instance per process.
pub struct ConnectionManager {
    driver: Arc<dyn WifiDriver>,
    max_retries: u32,
    shared: Arc<Shared>,
}

impl ConnectionManager {
    pub fn new(driver: Arc<dyn WifiDriver>, max_retries: u32) -> Self {
        Self {
            driver,
            max_retries,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: ConnectionState::Disconnected,
                    retries: 0,
                    address: None,
                }),
                resolved: Condvar::new(),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared
            .inner
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .state
    }

    /// Disassociation events seen during the current/last `connect`.
    pub fn retry_count(&self) -> u32 {
        self.shared
            .inner
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .retries
    }

    /// Block until association resolves. May block indefinitely if the
    /// lower stack never reports anything; use `connect_with_deadline`
    /// where that is unacceptable.
    pub fn connect(&self, creds: &WifiCredentials) -> Result<IpAddr> {
        self.connect_inner(creds, None)
    }

    /// Like `connect`, but gives up after `deadline` even if the lower
    /// stack stays silent.
    pub fn connect_with_deadline(
        &self,
        creds: &WifiCredentials,
        deadline: Duration,
    ) -> Result<IpAddr> {
        self.connect_inner(creds, Some(deadline))
    }

    fn connect_inner(&self, creds: &WifiCredentials, deadline: Option<Duration>) -> Result<IpAddr> {
        {
            let mut inner = self.shared.inner.lock().unwrap_or_else(|err| err.into_inner());
            inner.state = ConnectionState::Connecting;
            inner.retries = 0;
            inner.address = None;
        }

        let events = ConnectionEvents {
            driver: self.driver.clone(),
            max_retries: self.max_retries,
            shared: self.shared.clone(),
        };
        log::info!("connecting to ssid: {}", creds.ssid);
        self.driver
            .start(creds, events)
            .context("start wifi association")?;

        let started = Instant::now();
        let mut inner = self.shared.inner.lock().unwrap_or_else(|err| err.into_inner());
        loop {
            match inner.state {
                ConnectionState::Connected => {
                    return inner
                        .address
                        .ok_or_else(|| anyhow!("connected without an address"));
                }
                ConnectionState::Failed => {
                    return Err(anyhow!(
                        "failed to associate with ssid '{}' after {} attempts",
                        creds.ssid,
                        self.max_retries
                    ));
                }
                _ => {}
            }

            inner = match deadline {
                None => self
                    .shared
                    .resolved
                    .wait(inner)
                    .unwrap_or_else(|err| err.into_inner()),
                Some(limit) => {
                    let remaining = limit.checked_sub(started.elapsed()).ok_or_else(|| {
                        anyhow!("association did not resolve within {:?}", limit)
                    })?;
                    let (guard, _) = self
                        .shared
                        .resolved
                        .wait_timeout(inner, remaining)
                        .unwrap_or_else(|err| err.into_inner());
                    guard
                }
            };
        }
    }
}

/// Driver for deployments where the operating system already manages the
/// link. Reports the configured address immediately.
pub struct UnmanagedDriver {
    address: IpAddr,
}

impl UnmanagedDriver {
    pub fn new(address: IpAddr) -> Self {
        Self { address }
    }
}

impl WifiDriver for UnmanagedDriver {
    fn start(&self, _creds: &WifiCredentials, events: ConnectionEvents) -> Result<()> {
        events.address_acquired(self.address);
        Ok(())
    }
}
