use color_eyre::{eyre::eyre, Result};
use spacemouse::config::{default_config_path, AppConfig, DeviceConfig, TransportKind};
use spacemouse::device::mock::{drive_synthetic, MockTransport};
use spacemouse::device::{DeviceCatalog, DeviceManager, ManagerSettings, Transport};
use spacemouse::{DofGroup, FilterConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config_path = default_config_path();
    let app_config = AppConfig::ensure_default_config(&config_path)
        .await
        .map_err(|e| eyre!("Failed to load config {}: {}", config_path.display(), e))?;

    let catalog = match &app_config.device.catalog {
        Some(path) => DeviceCatalog::load(path)
            .await
            .map_err(|e| eyre!("Failed to load device catalog {}: {}", path.display(), e))?,
        None => DeviceCatalog::builtin(),
    };

    let (transport, simulator) = build_transport(&app_config, &catalog)?;
    let filter = FilterConfig::new(&app_config.filter)
        .map_err(|e| eyre!("Invalid filter settings: {}", e))?;

    let manager = DeviceManager::new(
        catalog,
        transport,
        filter,
        Some(ManagerSettings {
            buffer_capacity: app_config.buffer.capacity,
            ..Default::default()
        }),
    );

    let cancel = CancellationToken::new();
    let event_logger = tokio::spawn(log_events(manager.clone(), cancel.clone()));
    let reporter = tokio::spawn(report_status(
        manager.clone(),
        app_config.report.interval_ms,
        cancel.clone(),
    ));

    let mut driver = None;
    if app_config.device.engage_on_start {
        if let Some(device) = engage(manager.clone(), app_config.device.clone()).await? {
            if let Some(mock) = &simulator {
                driver = mock
                    .device(&device)
                    .map(|d| drive_synthetic(d, app_config.transport.control_rate_hz));
            }
        }
    } else {
        info!("engage_on_start disabled, waiting for shutdown");
    }

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| eyre!("Failed to listen for shutdown signal: {}", e))?;
    info!("Shutting down");

    cancel.cancel();
    let _ = tokio::join!(event_logger, reporter);

    tokio::task::spawn_blocking(move || {
        manager.disengage();
        if let Some(driver) = driver {
            let _ = driver.join();
        }
    })
    .await
    .map_err(|e| eyre!("Shutdown task failed: {}", e))?;

    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    let level = match std::env::var("RUST_LOG").as_deref() {
        Ok("trace") => Level::TRACE,
        Ok("debug") => Level::DEBUG,
        Ok("warn") => Level::WARN,
        Ok("error") => Level::ERROR,
        _ => Level::INFO,
    };
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}

fn build_transport(
    config: &AppConfig,
    catalog: &DeviceCatalog,
) -> Result<(Arc<dyn Transport>, Option<Arc<MockTransport>>)> {
    match config.transport.kind {
        #[cfg(feature = "hid")]
        TransportKind::Hid => {
            let hid = spacemouse::device::hid::HidTransport::new(config.transport.control_rate_hz)
                .map_err(|e| eyre!("Failed to initialize HID transport: {}", e))?;
            let transport: Arc<dyn Transport> = Arc::new(hid);
            Ok((transport, None))
        }
        #[cfg(not(feature = "hid"))]
        TransportKind::Hid => {
            warn!("Built without the `hid` feature, falling back to the simulated transport");
            Ok(simulated(catalog))
        }
        TransportKind::Simulated => Ok(simulated(catalog)),
    }
}

fn simulated(catalog: &DeviceCatalog) -> (Arc<dyn Transport>, Option<Arc<MockTransport>>) {
    info!("Using simulated transport");
    let mock = Arc::new(MockTransport::with_available(&catalog.names()));
    let transport: Arc<dyn Transport> = mock.clone();
    (transport, Some(mock))
}

/// Engages the configured device, or discovers one; a missing device is not fatal
async fn engage(manager: Arc<DeviceManager>, device: DeviceConfig) -> Result<Option<String>> {
    let result = tokio::task::spawn_blocking(move || match &device.name {
        Some(name) => match manager.engage_by_name(name) {
            Ok(()) => Ok(name.clone()),
            Err(e) if device.discover => {
                warn!("Could not engage {}: {}, trying discovery", name, e);
                manager.discover()
            }
            Err(e) => Err(e),
        },
        None => manager.discover(),
    })
    .await
    .map_err(|e| eyre!("Engage task failed: {}", e))?;

    match result {
        Ok(name) => {
            info!("Engaged {}", name);
            Ok(Some(name))
        }
        Err(e) => {
            warn!("Continuing without a device: {}", e);
            Ok(None)
        }
    }
}

async fn log_events(manager: Arc<DeviceManager>, cancel: CancellationToken) {
    let mut events = manager.subscribe_events();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Ok(event) => info!(
                    "[{}] {:?}: {} (session {})",
                    event.at.format("%H:%M:%S%.3f"),
                    event.kind,
                    event.device,
                    event.session_id
                ),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Event log lagged, skipped {} events", skipped)
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    debug!("Event logger stopped");
}

async fn report_status(manager: Arc<DeviceManager>, interval_ms: u64, cancel: CancellationToken) {
    if interval_ms == 0 {
        return;
    }
    let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                if !manager.status().is_connected() {
                    continue;
                }
                let buffer = manager.buffer();
                let latest = buffer.latest();
                let peak_t = buffer.magnitude(DofGroup::Translation).fold(0.0, f64::max);
                let peak_r = buffer.magnitude(DofGroup::Rotation).fold(0.0, f64::max);
                info!(
                    "xyz [{:+.3} {:+.3} {:+.3}] rpy [{:+.3} {:+.3} {:+.3}] peak |t| {:.3} |r| {:.3}",
                    latest.translation[0],
                    latest.translation[1],
                    latest.translation[2],
                    latest.rotation[0],
                    latest.rotation[1],
                    latest.rotation[2],
                    peak_t,
                    peak_r
                );
            }
        }
    }
    debug!("Status reporter stopped");
}
