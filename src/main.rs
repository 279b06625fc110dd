/*
 *  main.rs
 *
 *  LySurface - control surface host
 *  (c) 2020-26 Stuart Hunter
 *
 *  Runs the virtual surface plugin under the plugin host
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use env_logger::Env;
use local_ip_address::local_ip;
use log::{error, info, warn};
use serde_json::Value;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

use lysurface::config;
use lysurface::drivers::VirtualSurfacePlugin;
use lysurface::firmware::HttpJsonFetcher;
use lysurface::graphics::{HostGraphics, RasterGraphics};
use lysurface::plugin::{AcceptAllPolicy, HostContext, PluginHost, SurfaceEvents};
use lysurface::surface::FirmwareUpdateInfo;

include!(concat!(env!("OUT_DIR"), "/build_info.rs"));

/// Writes every host event to the log
struct LoggingEvents;

impl SurfaceEvents for LoggingEvents {
    fn disconnected(&self, surface_id: &str) {
        warn!("{} disconnected", surface_id);
    }

    fn input_press(&self, surface_id: &str, control_id: &str, pressed: bool) {
        info!("{} {} {}", surface_id, control_id, if pressed { "down" } else { "up" });
    }

    fn input_rotate(&self, surface_id: &str, control_id: &str, delta: i8) {
        info!("{} {} rotate {:+}", surface_id, control_id, delta);
    }

    fn set_variable_value(&self, surface_id: &str, name: &str, value: &Value) {
        info!("{} variable {} = {}", surface_id, name, value);
    }

    fn pincode_entry(&self, surface_id: &str, digit: u8) {
        info!("{} pincode digit {}", surface_id, digit);
    }

    fn firmware_update_info(&self, surface_id: &str, info: Option<&FirmwareUpdateInfo>) {
        match info {
            Some(info) => info!("{} firmware update available: {}", surface_id, info.update_url),
            None => info!("{} firmware is up to date", surface_id),
        }
    }
}

/// Waits for a SIGINT, SIGTERM, or SIGHUP signal.
#[cfg(unix)]
async fn signal_handler() -> Result<(), std::io::Error> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT received. Initiating graceful shutdown.");
        }
        _ = sigterm.recv() => {
            info!("SIGTERM received. Initiating graceful shutdown.");
        }
        _ = sighup.recv() => {
            info!("SIGHUP received. Initiating graceful shutdown.");
        }
    }
    Ok(())
}

#[cfg(not(unix))]
async fn signal_handler() -> Result<(), std::io::Error> {
    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received. Initiating graceful shutdown.");
    Ok(())
}

async fn run_until(run_secs: Option<u64>) {
    match run_secs {
        Some(secs) => {
            tokio::select! {
                _ = signal_handler() => {}
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {
                    info!("Run time of {}s elapsed", secs);
                }
            }
        }
        None => {
            if let Err(e) = signal_handler().await {
                error!("Signal handler failed: {}", e);
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load().context("loading configuration")?;
    let log_level = cfg.log_level.clone().unwrap_or_else(|| "info".to_string());

    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_secs()
        .init();

    info!("{} v.{} built {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"), BUILD_DATE);

    let host_cfg = cfg.host();
    let firmware_cfg = cfg.firmware();
    let display_host = host_cfg.display_host.clone().unwrap_or_else(|| {
        local_ip()
            .map(|ip| ip.to_string())
            .unwrap_or_else(|_| "127.0.0.1".to_string())
    });
    let status = host_cfg.status.clone().unwrap_or_else(|| "Connected".to_string());
    let detect = host_cfg.detect.unwrap_or(false);

    let surfaces = cfg.surfaces();
    if surfaces.is_empty() {
        warn!("No surfaces configured");
    }

    let plugin = Arc::new(if detect {
        VirtualSurfacePlugin::detecting(surfaces)
    } else {
        VirtualSurfacePlugin::scanning(surfaces)
    });

    let fetcher = HttpJsonFetcher::new(firmware_cfg.fetch_timeout(), firmware_cfg.connect_timeout())
        .context("building firmware metadata client")?;

    let host = PluginHost::new(
        plugin.clone(),
        HostContext {
            events: Arc::new(LoggingEvents),
            policy: Arc::new(AcceptAllPolicy),
            graphics: HostGraphics::new(Arc::new(RasterGraphics::new("LySurface"))),
        },
        Arc::new(fetcher),
        firmware_cfg.settings(),
    );

    host.init().await.context("initialising plugin")?;
    info!("Plugin features: {:?}", host.features());

    // detection opens surfaces itself; scans are opened here
    for device in host.scan_for_devices().await? {
        match host.open_scanned_device(&device).await {
            Ok(Some(opened)) => info!(
                "Opened {} ({}) with {} controls",
                opened.surface_id,
                opened.description,
                opened.surface_layout.controls.len()
            ),
            Ok(None) => {}
            Err(e) => error!("Failed to open {}: {}", device.surface_id, e),
        }
    }

    for surface in host.registry().open_surfaces() {
        if let Err(e) = host.show_status(surface.surface_id(), &display_host, &status) {
            warn!("Failed to show status on {}: {}", surface.surface_id(), e);
        }
    }

    run_until(host_cfg.run_secs).await;

    host.destroy().await.context("shutting down plugin")?;
    info!("Shutdown complete");
    Ok(())
}
