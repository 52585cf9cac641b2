//! sentineld - pedestrian detection sentinel daemon
//!
//! Startup order mirrors the dependency order:
//! 1. Load configuration (file + environment)
//! 2. Complete network association; the gateway is unreachable before this
//! 3. Start the HTTP gateway
//! 4. Initialize the detector (model allocation)
//! 5. Run the capture/detect/publish loop until shutdown
//!
//! Any failure in 1-4 is fatal: it is surfaced as a system message and an
//! error return, and the main loop is never entered.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;

use ped_sentinel::{
    run_capture_loop, ConnectionManager, Detector, FramePool, FrameSource, Gateway,
    GatewayConfig, ImageDecoder, MessageLog, SentineldConfig, SharedState, StubEngine,
    StubFrameSource, UnmanagedDriver, WifiCredentials,
};

#[derive(Parser, Debug)]
#[command(name = "sentineld", about = "Pedestrian detection sentinel daemon")]
struct Args {
    /// Path to the JSON config file (overrides SENTINEL_CONFIG).
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let cfg = match &args.config {
        Some(path) => SentineldConfig::load_from(Some(path)),
        None => SentineldConfig::load(),
    }?;

    let messages = MessageLog::with_capacity(cfg.messages.capacity);
    let state = SharedState::new();

    // Network association gates external reachability. The in-tree driver
    // assumes the OS manages the link; managed-radio deployments provide
    // their own WifiDriver.
    log::info!("connecting to network...");
    let driver = UnmanagedDriver::new(gateway_bind_ip(&cfg.http.addr));
    let manager = ConnectionManager::new(Arc::new(driver), cfg.wifi.max_retries);
    let credentials = WifiCredentials {
        ssid: cfg.wifi.ssid.clone(),
        passphrase: cfg.wifi.passphrase.clone(),
    };
    let address = match manager.connect(&credentials) {
        Ok(address) => address,
        Err(err) => {
            log::error!("network association failed: {err:#}");
            messages.append("ERROR: Network association failed");
            return Err(err);
        }
    };
    log::info!("network ready at {}", address);

    let gateway = Gateway::new(
        GatewayConfig {
            addr: cfg.http.addr.clone(),
            index_path: cfg.http.index_path.clone(),
        },
        state.clone(),
        messages.clone(),
    );
    let handle = match gateway.spawn() {
        Ok(handle) => handle,
        Err(err) => {
            log::error!("failed to start web server: {err:#}");
            messages.append("ERROR: Web server failed to start");
            return Err(err);
        }
    };
    log::info!("web server started at {}", handle.addr);
    messages.append(&format!(
        "Web server started. IP: http://{}:{}",
        address,
        handle.addr.port()
    ));

    let mut detector = match Detector::init(
        Box::new(ImageDecoder),
        Box::new(StubEngine::new(Vec::new())),
        cfg.detector.confidence_threshold,
    ) {
        Ok(detector) => detector,
        Err(err) => {
            log::error!("failed to initialize detector: {err:#}");
            messages.append("ERROR: Detector initialization failed");
            let _ = handle.stop();
            return Err(err);
        }
    };

    let mut source = match build_source(&cfg) {
        Ok(source) => source,
        Err(err) => {
            log::error!("failed to initialize camera: {err:#}");
            messages.append("ERROR: Camera initialization failed");
            let _ = handle.stop();
            return Err(err);
        }
    };

    messages.append("System initialized successfully");
    log::info!("starting main loop...");

    let shutdown = Arc::new(AtomicBool::new(false));
    let ctrlc_flag = shutdown.clone();
    ctrlc::set_handler(move || {
        log::info!("shutdown requested");
        ctrlc_flag.store(true, Ordering::SeqCst);
    })
    .context("install shutdown handler")?;

    run_capture_loop(
        source.as_mut(),
        &mut detector,
        &state,
        &messages,
        &shutdown,
    );

    handle.stop()?;
    Ok(())
}

fn gateway_bind_ip(addr: &str) -> IpAddr {
    addr.parse::<SocketAddr>()
        .map(|a| a.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

fn build_source(cfg: &SentineldConfig) -> Result<Box<dyn FrameSource>> {
    let pool = FramePool::new(cfg.camera.pool_frames);
    if cfg.camera.source.starts_with("stub://") {
        let payload = placeholder_jpeg(cfg.camera.width, cfg.camera.height)?;
        return Ok(Box::new(StubFrameSource::new(
            pool,
            vec![payload],
            cfg.camera.width,
            cfg.camera.height,
        )));
    }
    Err(anyhow!(
        "unsupported camera source '{}'; peripheral drivers implement FrameSource",
        cfg.camera.source
    ))
}

fn placeholder_jpeg(width: u32, height: u32) -> Result<Vec<u8>> {
    let img = image::RgbImage::new(width, height);
    let mut bytes = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut bytes, 80);
    encoder
        .encode_image(&img)
        .context("encode placeholder jpeg")?;
    Ok(bytes)
}
