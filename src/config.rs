/*
 *  config.rs
 *
 *  LySurface - control surface host
 *  (c) 2020-26 Stuart Hunter
 *
 *  YAML configuration layered with command line overrides
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

use clap::{ArgAction, Parser, ValueHint};
use dirs_next::home_dir;
use std::collections::HashSet;
use std::time::Duration;
use std::{fs, path::{Path, PathBuf}};
use thiserror::Error;

use crate::drivers::virtual_surface::VirtualSurfaceConfig;
use crate::firmware::FirmwareSettings;

/// Error type for config loading/validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Top-level app configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Default)]
pub struct Config {
    pub log_level: Option<String>,     // e.g., "info" | "debug"
    pub host: Option<HostConfig>,
    pub firmware: Option<FirmwareConfig>,
    /// virtual surfaces served by the built-in plugin
    pub surfaces: Option<Vec<VirtualSurfaceConfig>>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Default)]
pub struct HostConfig {
    /// shown on status cards, defaults to the local address
    pub display_host: Option<String>,
    pub status: Option<String>,
    /// push detection instead of scanning
    pub detect: Option<bool>,
    /// seconds to run before shutting down, runs until Ctrl-C when unset
    pub run_secs: Option<u64>,
}

/// All durations in seconds
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Default)]
pub struct FirmwareConfig {
    pub poll_interval_secs: Option<u64>,
    pub initial_delay_secs: Option<u64>,
    pub cache_ttl_secs: Option<u64>,
    pub cache_max_ttl_secs: Option<u64>,
    pub fetch_timeout_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
}

impl FirmwareConfig {
    pub fn settings(&self) -> FirmwareSettings {
        let defaults = FirmwareSettings::default();
        let secs = |v: Option<u64>, d: Duration| v.map(Duration::from_secs).unwrap_or(d);
        FirmwareSettings {
            poll_interval: secs(self.poll_interval_secs, defaults.poll_interval),
            initial_delay: secs(self.initial_delay_secs, defaults.initial_delay),
            cache_ttl: secs(self.cache_ttl_secs, defaults.cache_ttl),
            cache_max_ttl: secs(self.cache_max_ttl_secs, defaults.cache_max_ttl),
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.unwrap_or(30))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.unwrap_or(10))
    }
}

impl Config {
    pub fn host(&self) -> HostConfig {
        self.host.clone().unwrap_or_default()
    }

    pub fn firmware(&self) -> FirmwareConfig {
        self.firmware.clone().unwrap_or_default()
    }

    pub fn surfaces(&self) -> Vec<VirtualSurfaceConfig> {
        self.surfaces.clone().unwrap_or_default()
    }
}

/// CLI overrides. All fields are Options so we can layer them over YAML.
#[derive(Debug, Parser, Clone, Default)]
#[command(name = "LySurface", about = "LySurface control surface host", disable_help_flag = false)]
pub struct Cli {
    /// Path to a YAML config file (overrides search)
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub log_level: Option<String>,
    #[arg(long)]
    pub display_host: Option<String>,
    #[arg(long, action = ArgAction::Set)]
    pub detect: Option<bool>,
    #[arg(long)]
    pub run_secs: Option<u64>,
    #[arg(long)]
    pub firmware_poll_secs: Option<u64>,
    /// dump fully merged config (after overrides) and exit
    #[arg(long, action = ArgAction::SetTrue)]
    pub dump_config: bool,
}

/// Public entry point: parse CLI, read YAML, merge, validate.
pub fn load() -> Result<Config, ConfigError> {
    let cli = Cli::parse();
    let cfg = load_with(&cli)?;

    if cli.dump_config {
        // Pretty YAML of effective config (nice for debugging)
        let s = serde_yaml::to_string(&cfg)?;
        println!("{s}");
        std::process::exit(0);
    }

    Ok(cfg)
}

/// Defaults, then YAML, then CLI, then validation.
pub fn load_with(cli: &Cli) -> Result<Config, ConfigError> {
    let mut cfg = Config::default();

    if let Some(p) = cli.config.as_ref() {
        if p.exists() {
            let y = read_yaml(p)?;
            merge(&mut cfg, y);
        } else {
            return Err(ConfigError::Validation(format!(
                "Config file not found: {}",
                p.display()
            )));
        }
    } else if let Some(p) = find_config_file() {
        let y = read_yaml(&p)?;
        merge(&mut cfg, y);
    }

    apply_cli_overrides(&mut cfg, cli);
    validate(&cfg)?;
    Ok(cfg)
}

/// Try common locations in order (first hit wins).
fn find_config_file() -> Option<PathBuf> {
    // XDG-style: ~/.config/lysurface/config.yaml
    if let Some(home) = home_dir() {
        let p = home.join(".config/lysurface/config.yaml");
        if p.exists() { return Some(p) }
        let p = home.join(".config/lysurface.yaml");
        if p.exists() { return Some(p) }
    }
    // project local
    for candidate in &["lysurface.yaml", "config/lysurface.yaml"] {
        let p = PathBuf::from(candidate);
        if p.exists() { return Some(p) }
    }
    None
}

fn read_yaml(path: &Path) -> Result<Config, ConfigError> {
    let s = fs::read_to_string(path)?;
    parse_yaml(&s)
}

pub fn parse_yaml(s: &str) -> Result<Config, ConfigError> {
    let cfg: Config = serde_yaml::from_str(s)?;
    Ok(cfg)
}

/// Shallow merge `src` into `dst`, Option-by-Option.
fn merge(dst: &mut Config, src: Config) {
    if src.log_level.is_some()      { dst.log_level = src.log_level; }
    if src.surfaces.is_some()       { dst.surfaces = src.surfaces; }
    match (&mut dst.host, src.host) {
        (None, Some(c)) => dst.host = Some(c),
        (Some(d), Some(s)) => merge_host(d, s),
        _ => {}
    }
    match (&mut dst.firmware, src.firmware) {
        (None, Some(c)) => dst.firmware = Some(c),
        (Some(d), Some(s)) => merge_firmware(d, s),
        _ => {}
    }
}

fn merge_host(dst: &mut HostConfig, src: HostConfig) {
    if src.display_host.is_some()   { dst.display_host = src.display_host; }
    if src.status.is_some()         { dst.status = src.status; }
    if src.detect.is_some()         { dst.detect = src.detect; }
    if src.run_secs.is_some()       { dst.run_secs = src.run_secs; }
}

fn merge_firmware(dst: &mut FirmwareConfig, src: FirmwareConfig) {
    if src.poll_interval_secs.is_some()   { dst.poll_interval_secs = src.poll_interval_secs; }
    if src.initial_delay_secs.is_some()   { dst.initial_delay_secs = src.initial_delay_secs; }
    if src.cache_ttl_secs.is_some()       { dst.cache_ttl_secs = src.cache_ttl_secs; }
    if src.cache_max_ttl_secs.is_some()   { dst.cache_max_ttl_secs = src.cache_max_ttl_secs; }
    if src.fetch_timeout_secs.is_some()   { dst.fetch_timeout_secs = src.fetch_timeout_secs; }
    if src.connect_timeout_secs.is_some() { dst.connect_timeout_secs = src.connect_timeout_secs; }
}

fn apply_cli_overrides(cfg: &mut Config, cli: &Cli) {
    if cli.log_level.is_some()       { cfg.log_level = cli.log_level.clone(); }

    let any_host = cli.display_host.is_some() || cli.detect.is_some() || cli.run_secs.is_some();
    if any_host && cfg.host.is_none() {
        cfg.host = Some(HostConfig::default());
    }
    if let Some(host) = cfg.host.as_mut() {
        if cli.display_host.is_some()    { host.display_host = cli.display_host.clone(); }
        if cli.detect.is_some()          { host.detect = cli.detect; }
        if cli.run_secs.is_some()        { host.run_secs = cli.run_secs; }
    }

    if cli.firmware_poll_secs.is_some() {
        let firmware = cfg.firmware.get_or_insert_with(FirmwareConfig::default);
        firmware.poll_interval_secs = cli.firmware_poll_secs;
    }
}

/// Put any invariants here (required fields, ranges, etc.)
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if let Some(firmware) = cfg.firmware.as_ref() {
        let settings = firmware.settings();
        if settings.poll_interval.is_zero() {
            return Err(ConfigError::Validation("firmware poll_interval_secs must be > 0".into()));
        }
        if settings.cache_max_ttl < settings.cache_ttl {
            return Err(ConfigError::Validation(
                "firmware cache_max_ttl_secs must be >= cache_ttl_secs".into(),
            ));
        }
    }

    let mut seen = HashSet::new();
    for surface in cfg.surfaces.iter().flatten() {
        if !seen.insert(surface.surface_id.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate surface_id {}",
                surface.surface_id
            )));
        }
        if surface.rows == 0 || surface.columns == 0 {
            return Err(ConfigError::Validation(format!(
                "surface {} rows/columns must be > 0",
                surface.surface_id
            )));
        }
        if let Some(bitmap) = surface.bitmap {
            if bitmap.w == 0 || bitmap.h == 0 {
                return Err(ConfigError::Validation(format!(
                    "surface {} bitmap width/height must be > 0",
                    surface.surface_id
                )));
            }
        }
        if let Some(map) = surface.pincode.as_ref() {
            map.validate().map_err(|e| {
                ConfigError::Validation(format!("surface {}: {}", surface.surface_id, e))
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
log_level: debug
host:
  display_host: 10.0.0.2
  detect: true
firmware:
  poll_interval_secs: 3600
surfaces:
  - surface_id: desk-1
    rows: 2
    columns: 4
  - surface_id: desk-2
    bitmap: { w: 72, h: 72 }
"#;

    #[test]
    fn test_parse_and_validate() {
        let cfg = parse_yaml(SAMPLE).unwrap();
        validate(&cfg).unwrap();

        assert_eq!(cfg.host().display_host.as_deref(), Some("10.0.0.2"));
        assert_eq!(cfg.firmware().settings().poll_interval, Duration::from_secs(3600));
        assert_eq!(cfg.firmware().settings().cache_ttl, FirmwareSettings::default().cache_ttl);
        let surfaces = cfg.surfaces();
        assert_eq!(surfaces.len(), 2);
        assert_eq!((surfaces[1].rows, surfaces[1].columns), (3, 5));
    }

    #[test]
    fn test_cli_overrides_yaml() {
        let mut cfg = parse_yaml(SAMPLE).unwrap();
        let cli = Cli {
            detect: Some(false),
            firmware_poll_secs: Some(60),
            ..Default::default()
        };
        apply_cli_overrides(&mut cfg, &cli);

        assert_eq!(cfg.host().detect, Some(false));
        assert_eq!(cfg.host().display_host.as_deref(), Some("10.0.0.2"));
        assert_eq!(cfg.firmware().poll_interval_secs, Some(60));
    }

    #[test]
    fn test_merge_keeps_unset_fields() {
        let mut dst = parse_yaml(SAMPLE).unwrap();
        let src = parse_yaml("host:\n  status: Waiting\n").unwrap();
        merge(&mut dst, src);

        let host = dst.host();
        assert_eq!(host.status.as_deref(), Some("Waiting"));
        assert_eq!(host.detect, Some(true));
        assert_eq!(dst.surfaces().len(), 2);
    }

    #[test]
    fn test_validation_errors() {
        let dup = parse_yaml("surfaces:\n  - surface_id: a\n  - surface_id: a\n").unwrap();
        assert!(matches!(validate(&dup), Err(ConfigError::Validation(_))));

        let ttl = parse_yaml("firmware:\n  cache_ttl_secs: 100\n  cache_max_ttl_secs: 10\n").unwrap();
        assert!(validate(&ttl).is_err());

        let pin = parse_yaml(
            "surfaces:\n  - surface_id: a\n    pincode:\n      type: single-page\n      pincode: \"0/0\"\n      digits: { 1: \"0/0\" }\n",
        )
        .unwrap();
        assert!(validate(&pin).is_err());
    }
}
