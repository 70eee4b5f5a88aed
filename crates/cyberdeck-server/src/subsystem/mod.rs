//! Managed subsystems.
//!
//! A [`Subsystem`] owns one Configuration Record and one Status Record. Its
//! variant is fixed by `s_type` and its behaviour by `s_kind`; operations a
//! variant does not support report [`SubsystemError::UnsupportedOperation`].

pub mod application;
pub mod device;
pub mod process;
pub mod rigctl;

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use cyberdeck_core::config::ALWAYS_IMMUTABLE;
use cyberdeck_core::{ConfigRecord, ServerSettings, Status, StatusCell, SubsystemType};

use crate::error::SubsystemError;
use crate::pipeline::{CommandRunner, PipelineSpawner};
use crate::rf::RfPool;

pub use application::Application;
pub use device::{Device, DeviceKind, HostProbe};
pub use process::{Process, ProcessKind};
pub use rigctl::RigCommand;

/// Default Proxy endpoints when the `proxy` device does not override them.
pub const DEFAULT_INBOUND_PORT: u16 = 5005;
pub const DEFAULT_OUTBOUND_PORT: u16 = 5006;

/// Shared resources handed to Processes and Applications.
pub struct Context {
    pub settings: ServerSettings,
    pub pool: RfPool,
    pub spawner: Arc<dyn PipelineSpawner>,
    pub runner: Arc<dyn CommandRunner>,
    /// The `proxy` device, if configured.
    pub proxy: Option<Arc<Subsystem>>,
}

impl Context {
    /// Port the Proxy accepts forwarders on.
    pub fn inbound_port(&self) -> u16 {
        proxy_port(self.proxy.as_deref(), "i_inbound_port", DEFAULT_INBOUND_PORT)
    }

    /// Port the Proxy serves subscribers on.
    pub fn outbound_port(&self) -> u16 {
        proxy_port(self.proxy.as_deref(), "i_outbound_port", DEFAULT_OUTBOUND_PORT)
    }

    /// URL forwarders publish to.
    pub fn inbound_url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.inbound_port())
    }

    pub fn outbound_url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.outbound_port())
    }

    pub fn script_path(&self, name: &str) -> PathBuf {
        self.settings.scripts_dir.join(name)
    }
}

fn proxy_port(proxy: Option<&Subsystem>, key: &str, default: u16) -> u16 {
    proxy
        .and_then(|p| p.config().get_i64(key))
        .and_then(|port| u16::try_from(port).ok())
        .unwrap_or(default)
}

/// Capabilities a subsystem variant may implement.
pub trait Lifecycle: Send + Sync {
    /// Keys locked in addition to `s_id`, `s_type` and `s_kind`.
    fn immutable_keys(&self, _config: &ConfigRecord) -> Vec<String> {
        Vec::new()
    }

    fn start(&self, _subsystem: &Subsystem) -> Result<Arc<Status>, SubsystemError> {
        Err(unsupported("start_process"))
    }

    fn stop(&self, _subsystem: &Subsystem) -> Result<Arc<Status>, SubsystemError> {
        Err(unsupported("stop_process"))
    }

    fn set_power(&self, _subsystem: &Subsystem, _on: bool) -> Result<Arc<Status>, SubsystemError> {
        Err(unsupported("set_power"))
    }

    fn toggle_power(&self, _subsystem: &Subsystem) -> Result<Arc<Status>, SubsystemError> {
        Err(unsupported("toggle_power"))
    }

    /// Forward a request to an attached radio; returns its reply.
    fn rig(&self, _subsystem: &Subsystem, command: &RigCommand) -> Result<String, SubsystemError> {
        Err(unsupported(command.name()))
    }
}

pub(crate) fn unsupported(operation: &str) -> SubsystemError {
    SubsystemError::UnsupportedOperation(operation.to_string())
}

/// Variant-specific behaviour of a subsystem.
pub enum SubsystemKind {
    Device(Device),
    Process(Process),
    Application(Application),
}

impl SubsystemKind {
    fn lifecycle(&self) -> &dyn Lifecycle {
        match self {
            SubsystemKind::Device(device) => device,
            SubsystemKind::Process(process) => process,
            SubsystemKind::Application(application) => application,
        }
    }

    fn initial_status(&self, config: &ConfigRecord) -> Status {
        match self {
            SubsystemKind::Device(device) => device.initial_status(config),
            SubsystemKind::Process(process) => process.initial_status(config),
            SubsystemKind::Application(_) => Status::new().with("running", false),
        }
    }
}

/// One managed unit.
pub struct Subsystem {
    id: String,
    section: String,
    subsystem_type: SubsystemType,
    config: RwLock<ConfigRecord>,
    status: StatusCell,
    kind: SubsystemKind,
}

impl Subsystem {
    pub fn new(
        section: impl Into<String>,
        subsystem_type: SubsystemType,
        record: ConfigRecord,
        kind: SubsystemKind,
    ) -> Self {
        let status = StatusCell::new(kind.initial_status(&record));
        Self {
            id: record.id().to_string(),
            section: section.into(),
            subsystem_type,
            config: RwLock::new(record),
            status,
            kind,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Name of the configuration table this subsystem was loaded from.
    pub fn section(&self) -> &str {
        &self.section
    }

    pub fn subsystem_type(&self) -> SubsystemType {
        self.subsystem_type
    }

    pub fn kind(&self) -> &SubsystemKind {
        &self.kind
    }

    pub fn as_device(&self) -> Option<&Device> {
        match &self.kind {
            SubsystemKind::Device(device) => Some(device),
            _ => None,
        }
    }

    pub fn as_process(&self) -> Option<&Process> {
        match &self.kind {
            SubsystemKind::Process(process) => Some(process),
            _ => None,
        }
    }

    pub fn as_application(&self) -> Option<&Application> {
        match &self.kind {
            SubsystemKind::Application(application) => Some(application),
            _ => None,
        }
    }

    /// Copy of the current configuration.
    pub fn config(&self) -> ConfigRecord {
        self.config
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Consistent snapshot of the current status.
    pub fn status(&self) -> Arc<Status> {
        self.status.load()
    }

    pub fn status_cell(&self) -> &StatusCell {
        &self.status
    }

    pub fn is_running(&self) -> bool {
        self.status().is_running()
    }

    /// All keys `set_config` refuses to change.
    pub fn immutable_keys(&self) -> Vec<String> {
        let config = self.config();
        let mut keys: Vec<String> = ALWAYS_IMMUTABLE.iter().map(|k| k.to_string()).collect();
        keys.extend(self.kind.lifecycle().immutable_keys(&config));
        keys
    }

    /// Typed mutation of one configuration key; returns the updated record.
    pub fn set_config(&self, key: &str, raw: &str) -> Result<ConfigRecord, SubsystemError> {
        let locked = self.immutable_keys();
        let locked: Vec<&str> = locked.iter().map(String::as_str).collect();

        let mut config = self.config.write().unwrap_or_else(|e| e.into_inner());
        config.set_config(key, raw, &locked)?;
        Ok(config.clone())
    }

    pub fn start_process(&self) -> Result<Arc<Status>, SubsystemError> {
        self.kind.lifecycle().start(self)
    }

    pub fn stop_process(&self) -> Result<Arc<Status>, SubsystemError> {
        self.kind.lifecycle().stop(self)
    }

    pub fn set_power(&self, on: bool) -> Result<Arc<Status>, SubsystemError> {
        self.kind.lifecycle().set_power(self, on)
    }

    pub fn toggle_power(&self) -> Result<Arc<Status>, SubsystemError> {
        self.kind.lifecycle().toggle_power(self)
    }

    pub fn rig(&self, command: &RigCommand) -> Result<String, SubsystemError> {
        self.kind.lifecycle().rig(self, command)
    }
}

impl std::fmt::Debug for Subsystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subsystem")
            .field("id", &self.id)
            .field("type", &self.subsystem_type)
            .finish_non_exhaustive()
    }
}
