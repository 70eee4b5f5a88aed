//! Long-lived hardware and service devices.
//!
//! Pollable devices (`rf`, `clock`, `host`, `network`) are sampled by the runtime every
//! `i_polling_period` seconds; each sample is published as a whole new
//! Status. `switch` devices drive a power rail through shell commands.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use cyberdeck_core::{ConfigError, ConfigRecord, Status};
use sysinfo::{Components, Networks, System};
use tracing::info;

use super::{unsupported, Lifecycle, Subsystem};
use crate::error::SubsystemError;
use crate::pipeline::{CommandRunner, ShellRunner};
use crate::rf::{scan_status, serial_keys, RfScanner, SysfsScanner};

/// Default sampling interval for pollable devices.
pub const DEFAULT_POLLING_PERIOD: Duration = Duration::from_secs(2);

/// Device implementation selected by `s_kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Rf,
    Clock,
    Host,
    Network,
    Switch,
    Proxy,
    Publisher,
}

impl DeviceKind {
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "rf" => Some(DeviceKind::Rf),
            "clock" => Some(DeviceKind::Clock),
            "host" => Some(DeviceKind::Host),
            "network" => Some(DeviceKind::Network),
            "switch" => Some(DeviceKind::Switch),
            "proxy" => Some(DeviceKind::Proxy),
            "publisher" => Some(DeviceKind::Publisher),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Rf => "rf",
            DeviceKind::Clock => "clock",
            DeviceKind::Host => "host",
            DeviceKind::Network => "network",
            DeviceKind::Switch => "switch",
            DeviceKind::Proxy => "proxy",
            DeviceKind::Publisher => "publisher",
        }
    }
}

/// Host health from `sysinfo`: uptime, 1-minute load and the hottest
/// temperature sensor, or the one labelled `s_sensor`.
#[derive(Clone)]
pub struct HostProbe {
    components: Arc<Mutex<Components>>,
}

impl Default for HostProbe {
    fn default() -> Self {
        Self {
            components: Arc::new(Mutex::new(Components::new_with_refreshed_list())),
        }
    }
}

impl HostProbe {
    pub fn sample(&self, sensor: Option<&str>) -> Status {
        let temperatures: Vec<(String, f32)> = {
            let mut components = self.components.lock().unwrap_or_else(|e| e.into_inner());
            components.refresh();
            components
                .iter()
                .map(|c| (c.label().to_string(), c.temperature()))
                .collect()
        };
        host_status(
            System::uptime(),
            System::load_average().one,
            &temperatures,
            sensor,
        )
    }
}

/// Unreadable or unmatched temperatures leave `temp_c` out.
fn host_status(
    uptime_s: u64,
    load_1m: f64,
    temperatures: &[(String, f32)],
    sensor: Option<&str>,
) -> Status {
    let mut status = Status::new()
        .with("uptime_s", uptime_s)
        .with("load_1m", load_1m);
    let reading = temperatures
        .iter()
        .filter(|(label, _)| sensor.map_or(true, |s| label == s))
        .map(|(_, celsius)| *celsius)
        .filter(|celsius| celsius.is_finite())
        .reduce(f32::max);
    if let Some(celsius) = reading {
        status.set("temp_c", f64::from(celsius));
    }
    status
}

/// Interfaces a `network` device reports when `l_interfaces` is not set.
pub const DEFAULT_INTERFACES: &[&str] = &["eth0", "wlan0", "wlan1"];
/// The interface exists but has no IPv4 address.
pub const NO_LINK: &str = "NO LINK";
/// The interface does not exist.
pub const NOT_AVAILABLE: &str = "NOT AVLBL";

fn watched_interfaces(config: &ConfigRecord) -> Vec<String> {
    config
        .get_json("l_interfaces")
        .and_then(|v| v.as_array())
        .map(|list| {
            list.iter()
                .filter_map(|name| name.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_else(|| DEFAULT_INTERFACES.iter().map(|name| name.to_string()).collect())
}

fn sample_interfaces(interfaces: &[String]) -> Status {
    let networks = Networks::new_with_refreshed_list();
    let found: HashMap<String, Vec<IpAddr>> = networks
        .iter()
        .map(|(name, data)| {
            let addrs = data.ip_networks().iter().map(|net| net.addr).collect();
            (name.to_string(), addrs)
        })
        .collect();
    interface_status(interfaces, &found)
}

/// First IPv4 address of each interface.
fn interface_status(interfaces: &[String], found: &HashMap<String, Vec<IpAddr>>) -> Status {
    let mut status = Status::new();
    for name in interfaces {
        let value = match found.get(name) {
            None => NOT_AVAILABLE.to_string(),
            Some(addrs) => addrs
                .iter()
                .find(|addr| addr.is_ipv4())
                .map_or_else(|| NO_LINK.to_string(), IpAddr::to_string),
        };
        status.set(name.as_str(), value);
    }
    status
}

/// A device subsystem.
pub struct Device {
    kind: DeviceKind,
    scanner: Arc<dyn RfScanner>,
    runner: Arc<dyn CommandRunner>,
    host: HostProbe,
    /// Serializes power commands on one switch.
    power: Mutex<()>,
}

impl Device {
    pub fn new(kind: DeviceKind) -> Self {
        Self {
            kind,
            scanner: Arc::new(SysfsScanner::default()),
            runner: Arc::new(ShellRunner),
            host: HostProbe::default(),
            power: Mutex::new(()),
        }
    }

    pub fn with_scanner(mut self, scanner: Arc<dyn RfScanner>) -> Self {
        self.scanner = scanner;
        self
    }

    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_host_probe(mut self, host: HostProbe) -> Self {
        self.host = host;
        self
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub(crate) fn initial_status(&self, config: &ConfigRecord) -> Status {
        match self.kind {
            DeviceKind::Rf => scan_status(config, &[]),
            DeviceKind::Clock => clock_status(),
            DeviceKind::Host => Status::new(),
            DeviceKind::Network => watched_interfaces(config)
                .into_iter()
                .fold(Status::new(), |status, name| status.with(name, "")),
            DeviceKind::Switch => Status::new().with("power", false),
            DeviceKind::Proxy => Status::new().with("running", false),
            DeviceKind::Publisher => Status::new().with("snapshots", 0),
        }
    }

    /// Sampling interval, `None` for devices without a polling loop.
    pub fn polling_period(&self, config: &ConfigRecord) -> Option<Duration> {
        match self.kind {
            DeviceKind::Rf | DeviceKind::Clock | DeviceKind::Host | DeviceKind::Network => Some(
                config
                    .get_i64("i_polling_period")
                    .filter(|secs| *secs > 0)
                    .map_or(DEFAULT_POLLING_PERIOD, |secs| Duration::from_secs(secs as u64)),
            ),
            _ => None,
        }
    }

    /// Take one sample.
    pub fn poll(&self, config: &ConfigRecord) -> Option<Status> {
        match self.kind {
            DeviceKind::Rf => Some(scan_status(config, &self.scanner.scan())),
            DeviceKind::Clock => Some(clock_status()),
            DeviceKind::Host => Some(self.host.sample(config.get_str("s_sensor"))),
            DeviceKind::Network => Some(sample_interfaces(&watched_interfaces(config))),
            _ => None,
        }
    }

    /// Apply `b_on_startup` on switches. Returns `None` when nothing was done.
    pub fn apply_startup(&self, subsystem: &Subsystem) -> Option<Result<Arc<Status>, SubsystemError>> {
        if self.kind != DeviceKind::Switch {
            return None;
        }
        if !subsystem.config().get_bool("b_on_startup").unwrap_or(false) {
            return None;
        }
        Some(self.set_power(subsystem, true))
    }
}

fn clock_status() -> Status {
    Status::new().with(
        "time_utc",
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    )
}

impl Lifecycle for Device {
    fn immutable_keys(&self, config: &ConfigRecord) -> Vec<String> {
        let mut keys = vec!["i_sense_pin".to_string(), "i_control_pin".to_string()];
        keys.extend(serial_keys(config));
        keys
    }

    fn set_power(&self, subsystem: &Subsystem, on: bool) -> Result<Arc<Status>, SubsystemError> {
        if self.kind != DeviceKind::Switch {
            return Err(unsupported("set_power"));
        }
        let _guard = self.power.lock().unwrap_or_else(|e| e.into_inner());

        let key = if on { "s_power_on_cmd" } else { "s_power_off_cmd" };
        let config = subsystem.config();
        let command = config.get_str(key).ok_or_else(|| ConfigError::MissingKey {
            section: subsystem.id().to_string(),
            key: key.to_string(),
        })?;

        self.runner
            .run(command)
            .map_err(SubsystemError::OperationFailed)?;
        info!("Switched {} {}", subsystem.id(), if on { "on" } else { "off" });
        Ok(subsystem.status_cell().update(|s| s.set("power", on)))
    }

    fn toggle_power(&self, subsystem: &Subsystem) -> Result<Arc<Status>, SubsystemError> {
        if self.kind != DeviceKind::Switch {
            return Err(unsupported("toggle_power"));
        }
        let on = subsystem.status().get_bool("power").unwrap_or(false);
        self.set_power(subsystem, !on)
    }
}
