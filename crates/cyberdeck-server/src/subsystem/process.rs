//! Decode pipelines.
//!
//! A Process holds at most one running pipeline. Starting one takes the
//! exclusive lease on its RF receiver (unless it reads from the sound card)
//! and keeps it until the pipeline is stopped or found dead.

use std::fmt;
use std::sync::{Arc, Mutex, TryLockError};
use std::time::Duration;

use cyberdeck_core::{ConfigError, ConfigRecord, Status};
use tracing::{debug, info, warn};

use super::{Context, Lifecycle, Subsystem};
use crate::error::SubsystemError;
use crate::pipeline::{command_line, PipelineHandle};
use crate::rf::{Receiver, RfLease};

/// Process implementation selected by `s_kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessKind {
    Aprs,
    Ais,
    Radiosonde,
    RtlTcp,
    Acars,
    Vdl2,
    Ism,
    Adsb,
}

impl ProcessKind {
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "aprs" => Some(ProcessKind::Aprs),
            "ais" => Some(ProcessKind::Ais),
            "radiosonde" => Some(ProcessKind::Radiosonde),
            "rtltcp" => Some(ProcessKind::RtlTcp),
            "acars" => Some(ProcessKind::Acars),
            "vdl2" => Some(ProcessKind::Vdl2),
            "ism" => Some(ProcessKind::Ism),
            "adsb" => Some(ProcessKind::Adsb),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessKind::Aprs => "aprs",
            ProcessKind::Ais => "ais",
            ProcessKind::Radiosonde => "radiosonde",
            ProcessKind::RtlTcp => "rtltcp",
            ProcessKind::Acars => "acars",
            ProcessKind::Vdl2 => "vdl2",
            ProcessKind::Ism => "ism",
            ProcessKind::Adsb => "adsb",
        }
    }

    /// Whether the pipeline ends in a bus forwarder.
    pub fn forwards(&self) -> bool {
        matches!(self, ProcessKind::Aprs | ProcessKind::Ais | ProcessKind::Radiosonde)
    }

    pub fn supports_soundcard(&self) -> bool {
        matches!(self, ProcessKind::Radiosonde)
    }

    /// Configuration keys mirrored into the status.
    fn status_keys(&self) -> &'static [&'static str] {
        match self {
            ProcessKind::Aprs => &["s_device", "i_freq", "i_baud"],
            ProcessKind::Ais => &["s_device", "i_freq_l", "i_freq_r"],
            ProcessKind::Radiosonde => &["s_device", "i_freq", "s_sonde"],
            ProcessKind::RtlTcp => &["s_device", "s_host", "i_port"],
            ProcessKind::Acars | ProcessKind::Vdl2 | ProcessKind::Adsb => &["s_device"],
            ProcessKind::Ism => &["s_device", "i_freq"],
        }
    }
}

impl fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a pipeline reads its signal from.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Rf(Receiver),
    Soundcard,
}

struct ActivePipeline {
    handle: Box<dyn PipelineHandle>,
    // Released when the pipeline is dropped.
    _lease: Option<RfLease>,
    commands: Vec<String>,
}

/// A decode pipeline subsystem.
pub struct Process {
    kind: ProcessKind,
    ctx: Arc<Context>,
    active: Mutex<Option<ActivePipeline>>,
}

impl Process {
    pub fn new(kind: ProcessKind, ctx: Arc<Context>) -> Self {
        Self {
            kind,
            ctx,
            active: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> ProcessKind {
        self.kind
    }

    /// Whether a pipeline is currently held.
    pub fn is_active(&self) -> bool {
        self.lock().is_some()
    }

    /// Command strings of the running pipeline.
    pub fn commands(&self) -> Vec<String> {
        self.lock()
            .as_ref()
            .map(|p| p.commands.clone())
            .unwrap_or_default()
    }

    pub(crate) fn initial_status(&self, config: &ConfigRecord) -> Status {
        let mut status = Status::new()
            .with("running", false)
            .with("commands", Vec::<String>::new());
        mirror_config(&mut status, self.kind, config);
        status
    }

    /// Drop a pipeline that exited on its own. Returns true if one was reaped.
    ///
    /// Skips the check while a start or stop holds the pipeline.
    pub fn reap(&self, subsystem: &Subsystem) -> bool {
        let mut active = match self.active.try_lock() {
            Ok(active) => active,
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
            Err(TryLockError::WouldBlock) => return false,
        };
        let exited = active.as_ref().is_some_and(|p| !p.handle.is_alive());
        if !exited {
            return false;
        }
        if let Some(pipeline) = active.take() {
            warn!(
                "Pipeline for {} exited unexpectedly (pgid {})",
                subsystem.id(),
                pipeline.handle.id()
            );
        }
        subsystem.status_cell().update(mark_stopped);
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<ActivePipeline>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Resolve the input device and take its lease.
    fn claim_input(&self, id: &str, device: &str) -> Result<(Input, Option<RfLease>), SubsystemError> {
        if device == self.ctx.settings.soundcard {
            if !self.kind.supports_soundcard() {
                return Err(SubsystemError::DeviceUnavailable(format!(
                    "{} pipelines cannot read from the sound card",
                    self.kind
                )));
            }
            return Ok((Input::Soundcard, None));
        }

        if self.ctx.pool.manages(device) {
            let lease = self.ctx.pool.acquire(device)?;
            debug!("{} claimed receiver {}", id, device);
            return Ok((Input::Rf(lease.receiver().clone()), Some(lease)));
        }

        Err(SubsystemError::DeviceUnavailable(format!(
            "input device {device} not supported"
        )))
    }
}

fn mark_stopped(status: &mut Status) {
    status.set("running", false);
    status.set("commands", Vec::<String>::new());
}

fn mirror_config(status: &mut Status, kind: ProcessKind, config: &ConfigRecord) {
    for key in kind.status_keys() {
        if let Some(value) = config.get(key).and_then(|v| serde_json::to_value(v).ok()) {
            status.set(*key, value);
        }
    }
}

impl Lifecycle for Process {
    fn start(&self, subsystem: &Subsystem) -> Result<Arc<Status>, SubsystemError> {
        let mut active = self.lock();
        if active.is_some() {
            return Err(SubsystemError::AlreadyRunning);
        }

        let id = subsystem.id();
        let config = subsystem.config();
        let device = required(&config, id, "s_device")?;
        let (input, lease) = self.claim_input(id, &device)?;

        let forwarder = self.kind.forwards().then(|| {
            format!(
                "{} --tag {} --endpoint {}",
                self.ctx.settings.forwarder_command,
                id,
                self.ctx.inbound_url()
            )
        });
        let commands = build_commands(self.kind, id, &config, &input, forwarder)?;

        let handle = self
            .ctx
            .spawner
            .spawn(id, &commands)
            .map_err(SubsystemError::OperationFailed)?;
        info!("Started {} (pgid {}): {}", id, handle.id(), command_line(&commands));

        let status = subsystem.status_cell().update(|s| {
            s.set("running", true);
            s.set("commands", commands.clone());
            mirror_config(s, self.kind, &config);
        });
        *active = Some(ActivePipeline {
            handle,
            _lease: lease,
            commands,
        });
        Ok(status)
    }

    fn stop(&self, subsystem: &Subsystem) -> Result<Arc<Status>, SubsystemError> {
        let mut active = self.lock();
        if let Some(pipeline) = active.take() {
            pipeline
                .handle
                .terminate(Duration::from_millis(self.ctx.settings.stop_grace_ms));
            info!("Stopped {}", subsystem.id());
        } else {
            debug!("{} already stopped", subsystem.id());
        }
        Ok(subsystem.status_cell().update(mark_stopped))
    }
}

fn required(config: &ConfigRecord, id: &str, key: &str) -> Result<String, SubsystemError> {
    config
        .get(key)
        .map(|v| v.to_raw())
        .ok_or_else(|| {
            ConfigError::MissingKey {
                section: id.to_string(),
                key: key.to_string(),
            }
            .into()
        })
}

fn receiver<'a>(kind: ProcessKind, input: &'a Input) -> Result<&'a Receiver, SubsystemError> {
    match input {
        Input::Rf(receiver) => Ok(receiver),
        Input::Soundcard => Err(SubsystemError::DeviceUnavailable(format!(
            "{kind} pipelines need an RF receiver"
        ))),
    }
}

/// `l_freqs` as space-separated decoder arguments.
fn frequencies(config: &ConfigRecord) -> Result<String, SubsystemError> {
    config
        .get_json("l_freqs")
        .and_then(|v| v.as_array())
        .map(|list| list.iter().map(|f| f.to_string()).collect::<Vec<_>>())
        .filter(|list| !list.is_empty())
        .map(|list| list.join(" "))
        .ok_or_else(|| {
            ConfigError::InvalidValue {
                key: "l_freqs".to_string(),
                raw: config.get("l_freqs").map(|v| v.to_raw()).unwrap_or_default(),
            }
            .into()
        })
}

/// Pipeline stages for one process. `forwarder` is appended as the last
/// stage when given.
pub fn build_commands(
    kind: ProcessKind,
    id: &str,
    config: &ConfigRecord,
    input: &Input,
    forwarder: Option<String>,
) -> Result<Vec<String>, SubsystemError> {
    let get = |key: &str| required(config, id, key);

    let mut commands = match kind {
        ProcessKind::Aprs => {
            let rx = receiver(kind, input)?;
            let samprate = get("i_samprate")?;
            vec![
                format!(
                    "rtl_fm -M fm -d {} -f {} -g {} -p {} -s {} -",
                    rx.index,
                    get("i_freq")?,
                    get("i_gain")?,
                    rx.ppm,
                    samprate
                ),
                format!("direwolf -q dh -t 0 -r {} -D 1 -B {} -", samprate, get("i_baud")?),
            ]
        }
        ProcessKind::Ais => {
            let rx = receiver(kind, input)?;
            vec![format!(
                "rtl_ais -d {} -p {} -g {} -l {} -r {} -n",
                rx.index,
                rx.ppm,
                get("i_gain")?,
                get("i_freq_l")?,
                get("i_freq_r")?
            )]
        }
        ProcessKind::Radiosonde => {
            let lowpass = get("i_lowpass")?;
            let mut stages = match input {
                Input::Rf(rx) => vec![
                    format!(
                        "rtl_fm -M fm -d {} -f {} -g {} -p {} -F9 -s 15k",
                        rx.index,
                        get("i_freq")?,
                        get("i_gain")?,
                        rx.ppm
                    ),
                    format!("sox -t raw -r 15k -e s -b 16 -c 1 - -r 48000 -b 8 -t wav - lowpass {lowpass}"),
                ],
                Input::Soundcard => vec![
                    format!("rec -q -t wav --comment {id} -r 48000 -"),
                    format!("sox - -t wav - lowpass {lowpass}"),
                ],
            };
            let sonde = get("s_sonde")?;
            let decoder = match sonde.as_str() {
                "rs41" if config.get_bool("b_inverted").unwrap_or(false) => {
                    "rs41mod --ecc --crc -i --json"
                }
                "rs41" => "rs41mod --ecc --crc --json",
                "dfm" => "dfm09mod --ecc --json --dist --auto",
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "s_sonde".to_string(),
                        raw: sonde.clone(),
                    }
                    .into())
                }
            };
            stages.push(decoder.to_string());
            stages
        }
        ProcessKind::RtlTcp => {
            let rx = receiver(kind, input)?;
            vec![format!(
                "rtl_tcp -a {} -p {} -f {} -g {} -s {} -d {} -P {}",
                get("s_host")?,
                get("i_port")?,
                get("i_freq")?,
                get("i_gain")?,
                get("i_samprate")?,
                rx.index,
                rx.ppm
            )]
        }
        ProcessKind::Acars => {
            let rx = receiver(kind, input)?;
            vec![format!(
                "acarsdec -d {} -p {} -g {} {}",
                rx.index,
                rx.ppm,
                get("i_gain")?,
                frequencies(config)?
            )]
        }
        ProcessKind::Vdl2 => {
            let rx = receiver(kind, input)?;
            vec![format!(
                "dumpvdl2 --rtlsdr {} --correction {} --gain {} --station-id {} --output decoded:json:file:path=- {}",
                rx.index,
                rx.ppm,
                get("i_gain")?,
                id,
                frequencies(config)?
            )]
        }
        ProcessKind::Ism => {
            let rx = receiver(kind, input)?;
            vec![format!(
                "rtl_433 -d {} -p {} -g {} -f {} -s {} -F json -C si",
                rx.index,
                rx.ppm,
                get("i_gain")?,
                get("i_freq")?,
                get("i_samprate")?
            )]
        }
        ProcessKind::Adsb => {
            let rx = receiver(kind, input)?;
            vec![format!(
                "rtl_433 -d {} -p {} -g {} -f {} -s {} -F json",
                rx.index,
                rx.ppm,
                get("i_gain")?,
                get("i_freq")?,
                get("i_samprate")?
            )]
        }
    };

    commands.extend(forwarder);
    Ok(commands)
}
