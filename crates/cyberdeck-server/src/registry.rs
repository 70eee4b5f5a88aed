//! The subsystem registry.
//!
//! Owns every [`Subsystem`] in configuration order and answers the public
//! surface: aggregate queries, typed operation dispatch and saving the
//! configuration back to storage.

use std::collections::HashMap;
use std::sync::Arc;

use cyberdeck_core::config::parse_bool;
use cyberdeck_core::{
    ConfigDocument, ConfigError, ConfigRecord, ConfigStorage, Section, ServerSettings, Status,
    SubsystemType,
};
use cyberdeck_protocol::{ConfigStatusEntry, Response, SnapshotMessage};
use cyberdeck_providers::Decoder;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::error::RegistryError;
use crate::pipeline::{CommandRunner, PipelineSpawner, ShellRunner, ShellSpawner};
use crate::rf::{ReceiverProbe, RfPool, RfScanner, SysfsScanner, UsbNodeProbe};
use crate::subsystem::application::ApplicationKind;
use crate::subsystem::rigctl::{parse_frequency, RigCommand};
use crate::subsystem::{
    Application, Context, Device, DeviceKind, HostProbe, Process, ProcessKind, Subsystem,
    SubsystemKind,
};

/// Host integrations used by subsystems. Tests substitute their own.
#[derive(Clone)]
pub struct Services {
    pub spawner: Arc<dyn PipelineSpawner>,
    pub runner: Arc<dyn CommandRunner>,
    pub scanner: Arc<dyn RfScanner>,
    pub receiver_probe: Arc<dyn ReceiverProbe>,
    pub host_probe: HostProbe,
}

impl Services {
    /// Real shell, sysfs, usbfs and sysinfo implementations.
    pub fn system() -> Self {
        Self {
            spawner: Arc::new(ShellSpawner),
            runner: Arc::new(ShellRunner),
            scanner: Arc::new(SysfsScanner::default()),
            receiver_probe: Arc::new(UsbNodeProbe),
            host_probe: HostProbe::default(),
        }
    }
}

impl Default for Services {
    fn default() -> Self {
        Self::system()
    }
}

/// Operations accepted by [`Registry::dispatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    GetStatus,
    GetConfig,
    GetConfigStatus,
    SetConfig { key: String, value: String },
    StartProcess,
    StopProcess,
    SetPower(bool),
    TogglePower,
    /// Rig control request, answered with the rig's reply.
    Rig(RigCommand),
}

impl Operation {
    /// Build an operation from its name and string arguments.
    pub fn parse(name: &str, args: &HashMap<String, String>) -> Result<Self, RegistryError> {
        let arg = |key: &str| {
            args.get(key)
                .cloned()
                .ok_or_else(|| RegistryError::InvalidRequest(format!("{name} requires {key}")))
        };

        match name {
            "get_status" => Ok(Operation::GetStatus),
            "get_config" => Ok(Operation::GetConfig),
            "get_configstatus" => Ok(Operation::GetConfigStatus),
            "set_config" => Ok(Operation::SetConfig {
                key: arg("key")?,
                value: arg("value")?,
            }),
            "start_process" => Ok(Operation::StartProcess),
            "stop_process" => Ok(Operation::StopProcess),
            "set_power" => {
                let raw = arg("power")?;
                parse_bool(&raw)
                    .map(Operation::SetPower)
                    .ok_or_else(|| RegistryError::InvalidRequest(format!("power={raw} is not a boolean")))
            }
            "toggle_power" => Ok(Operation::TogglePower),
            "set_frequency" => {
                let raw = arg("frequency")?;
                parse_frequency(&raw)
                    .map(|hz| Operation::Rig(RigCommand::SetFrequency(hz)))
                    .ok_or_else(|| {
                        RegistryError::InvalidRequest(format!("frequency={raw} is not a frequency"))
                    })
            }
            "get_frequency" => Ok(Operation::Rig(RigCommand::GetFrequency)),
            "set_mode" => Ok(Operation::Rig(RigCommand::SetMode(arg("mode")?))),
            "get_mode" => Ok(Operation::Rig(RigCommand::GetMode)),
            "get_level" => Ok(Operation::Rig(RigCommand::GetLevel)),
            other => Err(RegistryError::InvalidRequest(format!("unknown operation {other}"))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::GetStatus => "get_status",
            Operation::GetConfig => "get_config",
            Operation::GetConfigStatus => "get_configstatus",
            Operation::SetConfig { .. } => "set_config",
            Operation::StartProcess => "start_process",
            Operation::StopProcess => "stop_process",
            Operation::SetPower(_) => "set_power",
            Operation::TogglePower => "toggle_power",
            Operation::Rig(command) => command.name(),
        }
    }
}

/// Result of a dispatched operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Status(Arc<Status>),
    Config(ConfigRecord),
    ConfigStatus(ConfigStatusEntry),
    Reply(String),
}

impl Outcome {
    pub fn to_response(&self) -> Response {
        match self {
            Outcome::Status(status) => Response::ok().with("status", status.to_json()),
            Outcome::Config(config) => Response::ok().with("config", config.to_json()),
            Outcome::ConfigStatus(entry) => Response::ok().with("configstatus", to_json(entry)),
            Outcome::Reply(reply) => Response::ok().with("response", Value::String(reply.clone())),
        }
    }
}

impl RegistryError {
    pub fn to_response(&self) -> Response {
        Response::error(self.to_string())
    }
}

/// One subsystem's value, or every subsystem's keyed by id.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection<T> {
    One(T),
    All(Vec<(String, T)>),
}

fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

impl<T: Serialize> Selection<T> {
    /// `{key: value}`, or `{key: [{"id": .., key: value}, ..]}`.
    pub fn to_response(&self, key: &str) -> Response {
        let value = match self {
            Selection::One(value) => to_json(value),
            Selection::All(items) => Value::Array(
                items
                    .iter()
                    .map(|(id, value)| json!({"id": id, key: to_json(value)}))
                    .collect(),
            ),
        };
        Response::ok().with(key, value)
    }
}

impl Selection<ConfigStatusEntry> {
    /// Entries already carry their id.
    pub fn to_flat_response(&self) -> Response {
        let value = match self {
            Selection::One(entry) => to_json(entry),
            Selection::All(items) => Value::Array(items.iter().map(|(_, e)| to_json(e)).collect()),
        };
        Response::ok().with("configstatus", value)
    }
}

/// The canonical list of subsystems.
pub struct Registry {
    subsystems: Vec<Arc<Subsystem>>,
    ctx: Arc<Context>,
    storage: Arc<dyn ConfigStorage>,
}

fn invalid(section: &str, detail: impl std::fmt::Display) -> RegistryError {
    RegistryError::Config(ConfigError::InvalidData(format!("section {section}: {detail}")))
}

fn subsystem_type(section: &Section) -> Result<SubsystemType, RegistryError> {
    section
        .record
        .subsystem_type()
        .unwrap_or_default()
        .parse()
        .map_err(|e| invalid(&section.name, e))
}

fn kind_name(section: &Section) -> &str {
    section.record.kind().unwrap_or_default()
}

impl Registry {
    /// Load the document from `storage` and build every subsystem.
    pub fn load(storage: Arc<dyn ConfigStorage>, services: Services) -> Result<Self, RegistryError> {
        let document = storage.load()?;
        Self::from_document(document, storage, services)
    }

    pub fn from_document(
        document: ConfigDocument,
        storage: Arc<dyn ConfigStorage>,
        services: Services,
    ) -> Result<Self, RegistryError> {
        let ConfigDocument { server, sections } = document;
        let mut built: Vec<Option<Arc<Subsystem>>> = vec![None; sections.len()];

        // Devices first: the RF pool and proxy endpoints depend on them.
        for (slot, section) in sections.iter().enumerate() {
            if subsystem_type(section)? != SubsystemType::Device {
                continue;
            }
            let kind = DeviceKind::parse(kind_name(section))
                .ok_or_else(|| invalid(&section.name, format!("unknown device kind {:?}", kind_name(section))))?;
            let device = Device::new(kind)
                .with_scanner(Arc::clone(&services.scanner))
                .with_runner(Arc::clone(&services.runner))
                .with_host_probe(services.host_probe.clone());
            built[slot] = Some(Arc::new(Subsystem::new(
                section.name.clone(),
                SubsystemType::Device,
                section.record.clone(),
                SubsystemKind::Device(device),
            )));
        }

        let find_device = |kind: DeviceKind| {
            built
                .iter()
                .flatten()
                .find(|s| s.as_device().is_some_and(|d| d.kind() == kind))
                .cloned()
        };
        let ctx = Arc::new(Context {
            settings: server,
            pool: RfPool::new(find_device(DeviceKind::Rf), Arc::clone(&services.receiver_probe)),
            spawner: Arc::clone(&services.spawner),
            runner: Arc::clone(&services.runner),
            proxy: find_device(DeviceKind::Proxy),
        });

        for (slot, section) in sections.iter().enumerate() {
            let kind = match subsystem_type(section)? {
                SubsystemType::Device => continue,
                SubsystemType::Process => ProcessKind::parse(kind_name(section))
                    .map(|k| SubsystemKind::Process(Process::new(k, Arc::clone(&ctx)))),
                SubsystemType::Application => ApplicationKind::parse(kind_name(section))
                    .map(|k| SubsystemKind::Application(Application::new(k, Arc::clone(&ctx)))),
            }
            .ok_or_else(|| invalid(&section.name, format!("unknown kind {:?}", kind_name(section))))?;

            built[slot] = Some(Arc::new(Subsystem::new(
                section.name.clone(),
                subsystem_type(section)?,
                section.record.clone(),
                kind,
            )));
        }

        let subsystems: Vec<Arc<Subsystem>> = built.into_iter().flatten().collect();
        info!("Loaded {} subsystems", subsystems.len());
        Ok(Self {
            subsystems,
            ctx,
            storage,
        })
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.ctx.settings
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    /// Subsystem ids in configuration order.
    pub fn list_ids(&self) -> Vec<String> {
        self.subsystems.iter().map(|s| s.id().to_string()).collect()
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Subsystem>> {
        self.subsystems.iter().find(|s| s.id() == id)
    }

    pub fn subsystems(&self) -> &[Arc<Subsystem>] {
        &self.subsystems
    }

    pub fn devices(&self, kind: DeviceKind) -> impl Iterator<Item = &Arc<Subsystem>> {
        self.subsystems
            .iter()
            .filter(move |s| s.as_device().is_some_and(|d| d.kind() == kind))
    }

    pub fn applications(&self, kind: ApplicationKind) -> impl Iterator<Item = &Arc<Subsystem>> {
        self.subsystems
            .iter()
            .filter(move |s| s.as_application().is_some_and(|a| a.kind() == kind))
    }

    fn lookup(&self, id: &str) -> Result<&Arc<Subsystem>, RegistryError> {
        self.get(id).ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    fn select<T>(
        &self,
        id: Option<&str>,
        f: impl Fn(&Subsystem) -> T,
    ) -> Result<Selection<T>, RegistryError> {
        match id {
            Some(id) => Ok(Selection::One(f(&**self.lookup(id)?))),
            None => Ok(Selection::All(
                self.subsystems
                    .iter()
                    .map(|s| (s.id().to_string(), f(&**s)))
                    .collect(),
            )),
        }
    }

    pub fn get_status(&self, id: Option<&str>) -> Result<Selection<Arc<Status>>, RegistryError> {
        self.select(id, Subsystem::status)
    }

    pub fn get_config(&self, id: Option<&str>) -> Result<Selection<ConfigRecord>, RegistryError> {
        self.select(id, Subsystem::config)
    }

    pub fn get_configstatus(
        &self,
        id: Option<&str>,
    ) -> Result<Selection<ConfigStatusEntry>, RegistryError> {
        self.select(id, config_status)
    }

    /// Run one operation on one subsystem.
    pub fn dispatch(&self, id: &str, operation: Operation) -> Result<Outcome, RegistryError> {
        let subsystem = self.lookup(id)?;
        debug!("Dispatching {} to {}", operation.name(), id);

        let outcome = match operation {
            Operation::GetStatus => Outcome::Status(subsystem.status()),
            Operation::GetConfig => Outcome::Config(subsystem.config()),
            Operation::GetConfigStatus => Outcome::ConfigStatus(config_status(subsystem)),
            Operation::SetConfig { key, value } => {
                let config = subsystem.set_config(&key, &value)?;
                info!("{}: {} = {}", id, key, value);
                Outcome::Config(config)
            }
            Operation::StartProcess => Outcome::Status(subsystem.start_process()?),
            Operation::StopProcess => Outcome::Status(subsystem.stop_process()?),
            Operation::SetPower(on) => Outcome::Status(subsystem.set_power(on)?),
            Operation::TogglePower => Outcome::Status(subsystem.toggle_power()?),
            Operation::Rig(command) => Outcome::Reply(subsystem.rig(&command)?),
        };
        Ok(outcome)
    }

    /// Current configuration as a document.
    pub fn document(&self) -> ConfigDocument {
        ConfigDocument {
            server: self.ctx.settings.clone(),
            sections: self
                .subsystems
                .iter()
                .map(|s| Section {
                    name: s.section().to_string(),
                    record: s.config(),
                })
                .collect(),
        }
    }

    /// Write every configuration record back to storage.
    pub fn save(&self) -> Result<(), RegistryError> {
        self.storage.save(&self.document()).map_err(|e| {
            error!("Failed to save configuration: {}", e);
            RegistryError::Config(e)
        })?;
        info!("Configuration saved");
        Ok(())
    }

    /// Config and status of every subsystem, timestamped now.
    pub fn snapshot(&self) -> SnapshotMessage {
        SnapshotMessage::new(self.subsystems.iter().map(|s| config_status(s)).collect())
    }

    /// Decoder per tag for every Process whose output goes on the bus.
    pub fn routes(&self) -> HashMap<String, Decoder> {
        self.subsystems
            .iter()
            .filter_map(|s| {
                let process = s.as_process()?;
                let decoder = Decoder::for_kind(process.kind().as_str())?;
                Some((s.id().to_string(), decoder))
            })
            .collect()
    }

    /// Boot-time actions: switch `b_on_startup`, process and application
    /// `b_autostart`.
    pub fn apply_startup(&self) {
        for subsystem in &self.subsystems {
            let result = match subsystem.kind() {
                SubsystemKind::Device(device) => device.apply_startup(subsystem),
                _ if subsystem.config().get_bool("b_autostart").unwrap_or(false) => {
                    Some(subsystem.start_process())
                }
                _ => None,
            };
            match result {
                Some(Ok(_)) => info!("Startup action applied to {}", subsystem.id()),
                Some(Err(e)) => warn!("Startup action for {} failed: {}", subsystem.id(), e),
                None => {}
            }
        }
    }

    /// Stop every running pipeline.
    pub fn stop_all(&self) {
        for subsystem in &self.subsystems {
            if subsystem.as_process().is_some_and(Process::is_active) {
                if let Err(e) = subsystem.stop_process() {
                    warn!("Failed to stop {}: {}", subsystem.id(), e);
                }
            }
        }
    }

    /// Drop pipelines that exited on their own; returns how many.
    pub fn reap_exited(&self) -> usize {
        self.subsystems
            .iter()
            .filter(|s| s.as_process().is_some_and(|p| p.reap(s)))
            .count()
    }
}

fn config_status(subsystem: &Subsystem) -> ConfigStatusEntry {
    ConfigStatusEntry {
        id: subsystem.id().to_string(),
        config: subsystem.config().to_json(),
        status: subsystem.status().to_json(),
    }
}
