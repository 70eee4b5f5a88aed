//! Registry and process lifecycle tests.
//!
//! Host integrations are replaced by in-memory fakes so pipelines, receivers
//! and shell commands never touch the machine running the tests.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cyberdeck_core::{ConfigDocument, ConfigError, ConfigStorage, ConfigValue};
use cyberdeck_server::pipeline::{CommandRunner, PipelineHandle, PipelineSpawner};
use cyberdeck_server::rf::{AttachedReceiver, Receiver, ReceiverProbe, RfScanner};
use cyberdeck_server::subsystem::{HostProbe, RigCommand};
use cyberdeck_server::{Operation, Outcome, Registry, RegistryError, Selection, Services, SubsystemError};

const CONFIG: &str = r#"
[server]
forwarder_command = "cyberdeck-forwarder"
soundcard = "soundcard"
stop_grace_ms = 10

[rf]
s_id = "rf"
s_type = "device"
s_kind = "rf"
s_rf1_serial = "00000001"
i_rf1_ppm = 12
i_polling_period = 2

[proxy]
s_id = "proxy"
s_type = "device"
s_kind = "proxy"
i_inbound_port = 6005
i_outbound_port = 6006

[aprs]
s_id = "aprs"
s_type = "process"
s_kind = "aprs"
s_device = "00000001"
i_freq = 144800000
i_gain = 40
i_samprate = 22050
i_baud = 1200

[ais]
s_id = "ais"
s_type = "process"
s_kind = "ais"
s_device = "00000001"
i_gain = 48
i_freq_l = 161975000
i_freq_r = 162025000

[sonde]
s_id = "sonde"
s_type = "process"
s_kind = "radiosonde"
s_device = "soundcard"
s_sonde = "rs41"
i_lowpass = 2600

[mapper]
s_id = "mapper"
s_type = "application"
s_kind = "subscriber"
s_name = "Mapper"

[vdl]
s_id = "vdl"
s_type = "process"
s_kind = "vdl2"
s_device = "00000001"
i_gain = 42
l_freqs = [136650000, 136975000]

[rig]
s_id = "rig"
s_type = "application"
s_kind = "rigctl"
s_name = "Rig"
s_hostname = "127.0.0.1"
i_port = 7356
"#;

#[derive(Default)]
struct MemoryStorage {
    saved: Mutex<Option<ConfigDocument>>,
}

impl ConfigStorage for MemoryStorage {
    fn load(&self) -> Result<ConfigDocument, ConfigError> {
        ConfigDocument::from_toml_str(CONFIG)
    }

    fn save(&self, document: &ConfigDocument) -> Result<(), ConfigError> {
        *self.saved.lock().unwrap() = Some(document.clone());
        Ok(())
    }
}

struct FakeHandle {
    alive: Arc<AtomicBool>,
    stop_delay: Duration,
}

impl PipelineHandle for FakeHandle {
    fn id(&self) -> u32 {
        4242
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn terminate(&self, _grace: Duration) {
        std::thread::sleep(self.stop_delay);
        self.alive.store(false, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct FakeSpawner {
    spawned: Mutex<Vec<(String, Vec<String>, Arc<AtomicBool>)>>,
    /// How long each pipeline takes to die when terminated.
    stop_delay: Duration,
}

impl FakeSpawner {
    fn count(&self) -> usize {
        self.spawned.lock().unwrap().len()
    }

    fn commands(&self, index: usize) -> Vec<String> {
        self.spawned.lock().unwrap()[index].1.clone()
    }

    /// Make the pipeline at `index` exit on its own.
    fn exit(&self, index: usize) {
        self.spawned.lock().unwrap()[index].2.store(false, Ordering::SeqCst);
    }
}

impl PipelineSpawner for FakeSpawner {
    fn spawn(&self, tag: &str, commands: &[String]) -> Result<Box<dyn PipelineHandle>, String> {
        let alive = Arc::new(AtomicBool::new(true));
        self.spawned
            .lock()
            .unwrap()
            .push((tag.to_string(), commands.to_vec(), Arc::clone(&alive)));
        Ok(Box::new(FakeHandle {
            alive,
            stop_delay: self.stop_delay,
        }))
    }
}

struct NoopRunner;

impl CommandRunner for NoopRunner {
    fn run(&self, _command: &str) -> Result<(), String> {
        Ok(())
    }
}

struct FixedScanner(Vec<AttachedReceiver>);

impl RfScanner for FixedScanner {
    fn scan(&self) -> Vec<AttachedReceiver> {
        self.0.clone()
    }
}

struct FreeReceiver;

impl ReceiverProbe for FreeReceiver {
    fn probe(&self, _receiver: &Receiver) -> Result<(), String> {
        Ok(())
    }
}

fn attached() -> Vec<AttachedReceiver> {
    vec![AttachedReceiver {
        serial: "00000001".to_string(),
        index: 1,
        node: PathBuf::from("/dev/bus/usb/001/004"),
    }]
}

/// A receiver claimed by a program the deck does not manage.
struct HeldReceiver;

impl ReceiverProbe for HeldReceiver {
    fn probe(&self, receiver: &Receiver) -> Result<(), String> {
        Err(format!("{}: claimed by another program", receiver.node.display()))
    }
}

fn services(spawner: Arc<FakeSpawner>) -> Services {
    Services {
        spawner,
        runner: Arc::new(NoopRunner),
        scanner: Arc::new(FixedScanner(attached())),
        receiver_probe: Arc::new(FreeReceiver),
        host_probe: HostProbe::default(),
    }
}

fn registry(spawner: Arc<FakeSpawner>, storage: Arc<MemoryStorage>) -> Registry {
    Registry::load(storage, services(spawner)).unwrap()
}

/// Run the rf device's poller once so its receivers show as powered.
fn power_up(registry: &Registry) {
    let rf = registry.get("rf").unwrap();
    let status = rf.as_device().unwrap().poll(&rf.config()).unwrap();
    rf.status_cell().replace(status);
}

fn args(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn test_list_ids_in_file_order() {
    let registry = registry(Arc::default(), Arc::default());
    assert_eq!(
        registry.list_ids(),
        vec!["rf", "proxy", "aprs", "ais", "sonde", "mapper", "vdl", "rig"]
    );
}

#[test]
fn test_unknown_id_is_not_found() {
    let registry = registry(Arc::default(), Arc::default());
    assert_eq!(
        registry.dispatch("nope", Operation::GetStatus),
        Err(RegistryError::NotFound("nope".to_string()))
    );
    assert!(matches!(
        registry.get_status(Some("nope")),
        Err(RegistryError::NotFound(_))
    ));
    let response = RegistryError::NotFound("nope".to_string()).to_response();
    assert!(!response.success);
    assert_eq!(response.message(), Some("System with id nope not found"));
}

#[test]
fn test_set_config_round_trip() {
    let registry = registry(Arc::default(), Arc::default());
    let op = Operation::parse("set_config", &args(&[("key", "i_freq"), ("value", "144390000")])).unwrap();

    let outcome = registry.dispatch("aprs", op).unwrap();
    let Outcome::Config(config) = outcome else {
        panic!("expected a config outcome");
    };
    assert_eq!(config.get_i64("i_freq"), Some(144390000));
    assert_eq!(
        registry.get("aprs").unwrap().config().get("i_freq"),
        Some(&ConfigValue::Int(144390000))
    );
}

#[test]
fn test_set_config_rejections() {
    let registry = registry(Arc::default(), Arc::default());
    let set = |id: &str, key: &str, value: &str| {
        registry.dispatch(
            id,
            Operation::SetConfig {
                key: key.to_string(),
                value: value.to_string(),
            },
        )
    };

    assert_eq!(
        set("aprs", "s_id", "other"),
        Err(RegistryError::Subsystem(SubsystemError::Config(ConfigError::ImmutableKey(
            "s_id".to_string()
        ))))
    );
    assert_eq!(
        set("rf", "s_rf1_serial", "00000002"),
        Err(RegistryError::Subsystem(SubsystemError::Config(ConfigError::ImmutableKey(
            "s_rf1_serial".to_string()
        ))))
    );
    assert_eq!(
        set("mapper", "s_name", "Other"),
        Err(RegistryError::Subsystem(SubsystemError::Config(ConfigError::ImmutableKey(
            "s_name".to_string()
        ))))
    );
    assert_eq!(
        set("aprs", "i_missing", "1"),
        Err(RegistryError::Subsystem(SubsystemError::Config(ConfigError::UnknownKey(
            "i_missing".to_string()
        ))))
    );
    assert!(matches!(
        set("aprs", "i_freq", "fast"),
        Err(RegistryError::Subsystem(SubsystemError::Config(ConfigError::InvalidValue { .. })))
    ));
    // Rejected writes leave the record untouched.
    assert_eq!(registry.get("aprs").unwrap().config().get_i64("i_freq"), Some(144800000));
}

#[test]
fn test_operation_parse() {
    assert_eq!(Operation::parse("get_status", &args(&[])), Ok(Operation::GetStatus));
    assert_eq!(
        Operation::parse("set_power", &args(&[("power", "YES")])),
        Ok(Operation::SetPower(true))
    );
    assert!(matches!(
        Operation::parse("set_power", &args(&[("power", "maybe")])),
        Err(RegistryError::InvalidRequest(_))
    ));
    assert!(matches!(
        Operation::parse("set_config", &args(&[("key", "i_freq")])),
        Err(RegistryError::InvalidRequest(_))
    ));
    assert!(matches!(
        Operation::parse("__init__", &args(&[])),
        Err(RegistryError::InvalidRequest(_))
    ));

    assert_eq!(
        Operation::parse("set_frequency", &args(&[("frequency", "145500000.0")])),
        Ok(Operation::Rig(RigCommand::SetFrequency(145_500_000)))
    );
    assert!(matches!(
        Operation::parse("set_frequency", &args(&[("frequency", "fast")])),
        Err(RegistryError::InvalidRequest(_))
    ));
    assert_eq!(
        Operation::parse("set_mode", &args(&[("mode", "USB")])),
        Ok(Operation::Rig(RigCommand::SetMode("USB".to_string())))
    );
    assert!(matches!(
        Operation::parse("set_mode", &args(&[])),
        Err(RegistryError::InvalidRequest(_))
    ));
    assert_eq!(
        Operation::parse("get_level", &args(&[])).unwrap().name(),
        "get_level"
    );
}

#[test]
fn test_unsupported_operations() {
    let registry = registry(Arc::default(), Arc::default());
    assert!(matches!(
        registry.dispatch("rf", Operation::StartProcess),
        Err(RegistryError::Subsystem(SubsystemError::UnsupportedOperation(_)))
    ));
    assert!(matches!(
        registry.dispatch("aprs", Operation::TogglePower),
        Err(RegistryError::Subsystem(SubsystemError::UnsupportedOperation(_)))
    ));
    assert_eq!(
        registry.dispatch("mapper", Operation::Rig(RigCommand::GetFrequency)),
        Err(RegistryError::Subsystem(SubsystemError::UnsupportedOperation(
            "get_frequency".to_string()
        )))
    );
}

#[test]
fn test_rig_requests_reach_rigctld() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let rig = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut request = String::new();
        reader.read_line(&mut request).unwrap();
        (&stream).write_all(b"RPRT 0\n").unwrap();
        request
    });

    let registry = registry(Arc::default(), Arc::default());
    registry
        .dispatch(
            "rig",
            Operation::SetConfig {
                key: "i_port".to_string(),
                value: port.to_string(),
            },
        )
        .unwrap();

    let outcome = registry
        .dispatch("rig", Operation::Rig(RigCommand::SetFrequency(145_500_000)))
        .unwrap();
    assert_eq!(outcome, Outcome::Reply("RPRT 0".to_string()));
    assert_eq!(outcome.to_response().get("response").unwrap(), "RPRT 0");
    assert_eq!(rig.join().unwrap(), "F 145500000\n");
}

#[test]
fn test_rig_unreachable_fails() {
    let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
    let registry = registry(Arc::default(), Arc::default());
    registry
        .dispatch(
            "rig",
            Operation::SetConfig {
                key: "i_port".to_string(),
                value: port.to_string(),
            },
        )
        .unwrap();

    assert!(matches!(
        registry.dispatch("rig", Operation::Rig(RigCommand::GetMode)),
        Err(RegistryError::Subsystem(SubsystemError::OperationFailed(_)))
    ));
}

#[test]
fn test_vdl2_pipeline_is_not_forwarded() {
    let spawner = Arc::new(FakeSpawner::default());
    let registry = registry(Arc::clone(&spawner), Arc::default());
    power_up(&registry);

    registry.dispatch("vdl", Operation::StartProcess).unwrap();
    assert_eq!(
        spawner.commands(0),
        vec![
            "dumpvdl2 --rtlsdr 1 --correction 12 --gain 42 --station-id vdl \
             --output decoded:json:file:path=- 136650000 136975000"
        ]
    );
    registry.dispatch("vdl", Operation::StopProcess).unwrap();
}

#[test]
fn test_aggregate_status_lists_every_subsystem() {
    let registry = registry(Arc::default(), Arc::default());
    let Selection::All(items) = registry.get_status(None).unwrap() else {
        panic!("expected every subsystem");
    };
    assert_eq!(items.len(), 8);

    let response = registry.get_status(None).unwrap().to_response("status");
    let list = response.get("status").unwrap().as_array().unwrap();
    assert_eq!(list[2]["id"], "aprs");
    assert_eq!(list[2]["status"]["running"], false);

    let snapshot = registry.snapshot();
    assert_eq!(snapshot.configstatus.len(), 8);
    assert_eq!(snapshot.entry("aprs").unwrap().config["i_freq"], 144800000);
}

#[test]
fn test_save_writes_current_records() {
    let storage = Arc::new(MemoryStorage::default());
    let registry = registry(Arc::default(), Arc::clone(&storage));
    registry
        .dispatch(
            "aprs",
            Operation::SetConfig {
                key: "i_baud".to_string(),
                value: "9600".to_string(),
            },
        )
        .unwrap();
    registry.save().unwrap();

    let saved = storage.saved.lock().unwrap().clone().unwrap();
    let aprs = saved.records().find(|r| r.id() == "aprs").unwrap();
    assert_eq!(aprs.get_i64("i_baud"), Some(9600));
    assert_eq!(saved.sections.len(), 8);
}

#[test]
fn test_start_requires_powered_receiver() {
    let spawner = Arc::new(FakeSpawner::default());
    let registry = registry(Arc::clone(&spawner), Arc::default());

    assert!(matches!(
        registry.dispatch("aprs", Operation::StartProcess),
        Err(RegistryError::Subsystem(SubsystemError::DeviceUnavailable(_)))
    ));
    assert_eq!(spawner.count(), 0);
}

#[test]
fn test_start_and_stop_process() {
    let spawner = Arc::new(FakeSpawner::default());
    let registry = registry(Arc::clone(&spawner), Arc::default());
    power_up(&registry);

    let status = registry.get("aprs").unwrap().start_process().unwrap();
    assert!(status.is_running());
    assert_eq!(
        spawner.commands(0),
        vec![
            "rtl_fm -M fm -d 1 -f 144800000 -g 40 -p 12 -s 22050 -",
            "direwolf -q dh -t 0 -r 22050 -D 1 -B 1200 -",
            "cyberdeck-forwarder --tag aprs --endpoint ws://127.0.0.1:6005",
        ]
    );
    assert!(registry.context().pool.is_leased("00000001"));

    // A second start reports the running state, not the held receiver.
    assert_eq!(
        registry.dispatch("aprs", Operation::StartProcess),
        Err(RegistryError::Subsystem(SubsystemError::AlreadyRunning))
    );
    assert_eq!(spawner.count(), 1);

    let status = registry.get("aprs").unwrap().stop_process().unwrap();
    assert!(!status.is_running());
    assert!(!registry.context().pool.is_leased("00000001"));

    // Stopping again is a no-op.
    assert!(!registry.get("aprs").unwrap().stop_process().unwrap().is_running());
}

#[test]
fn test_receiver_is_exclusive() {
    let spawner = Arc::new(FakeSpawner::default());
    let registry = registry(Arc::clone(&spawner), Arc::default());
    power_up(&registry);

    registry.dispatch("aprs", Operation::StartProcess).unwrap();
    assert!(matches!(
        registry.dispatch("ais", Operation::StartProcess),
        Err(RegistryError::Subsystem(SubsystemError::DeviceBusy(_)))
    ));
    assert!(!registry.get("ais").unwrap().is_running());

    registry.dispatch("aprs", Operation::StopProcess).unwrap();
    registry.dispatch("ais", Operation::StartProcess).unwrap();
    assert_eq!(spawner.count(), 2);
}

#[test]
fn test_receiver_held_elsewhere_is_busy() {
    let spawner = Arc::new(FakeSpawner::default());
    let services = Services {
        receiver_probe: Arc::new(HeldReceiver),
        ..services(Arc::clone(&spawner))
    };
    let registry = Registry::load(Arc::new(MemoryStorage::default()), services).unwrap();
    power_up(&registry);

    match registry.dispatch("aprs", Operation::StartProcess) {
        Err(RegistryError::Subsystem(SubsystemError::DeviceBusy(detail))) => {
            assert!(detail.contains("claimed by another program"), "{detail}");
        }
        other => panic!("expected DeviceBusy, got {other:?}"),
    }
    assert_eq!(spawner.count(), 0);
    assert!(!registry.context().pool.is_leased("00000001"));
}

#[test]
fn test_soundcard_input_needs_no_receiver() {
    let spawner = Arc::new(FakeSpawner::default());
    let registry = registry(Arc::clone(&spawner), Arc::default());

    registry.dispatch("sonde", Operation::StartProcess).unwrap();
    assert_eq!(
        spawner.commands(0),
        vec![
            "rec -q -t wav --comment sonde -r 48000 -",
            "sox - -t wav - lowpass 2600",
            "rs41mod --ecc --crc --json",
            "cyberdeck-forwarder --tag sonde --endpoint ws://127.0.0.1:6005",
        ]
    );
}

#[test]
fn test_reap_releases_exited_pipeline() {
    let spawner = Arc::new(FakeSpawner::default());
    let registry = registry(Arc::clone(&spawner), Arc::default());
    power_up(&registry);

    registry.dispatch("aprs", Operation::StartProcess).unwrap();
    assert_eq!(registry.reap_exited(), 0);

    spawner.exit(0);
    assert_eq!(registry.reap_exited(), 1);
    assert!(!registry.get("aprs").unwrap().is_running());
    assert!(!registry.context().pool.is_leased("00000001"));

    // The receiver can be claimed again.
    registry.dispatch("ais", Operation::StartProcess).unwrap();
}

#[test]
fn test_reap_skips_pipeline_being_stopped() {
    let spawner = Arc::new(FakeSpawner {
        stop_delay: Duration::from_millis(800),
        ..FakeSpawner::default()
    });
    let registry = Arc::new(registry(Arc::clone(&spawner), Arc::default()));
    power_up(&registry);
    registry.dispatch("aprs", Operation::StartProcess).unwrap();

    let stopping = Arc::clone(&registry);
    let stop = std::thread::spawn(move || stopping.dispatch("aprs", Operation::StopProcess));
    std::thread::sleep(Duration::from_millis(100));

    let started = Instant::now();
    assert_eq!(registry.reap_exited(), 0);
    assert!(started.elapsed() < Duration::from_millis(300));

    stop.join().unwrap().unwrap();
    assert!(!registry.get("aprs").unwrap().is_running());
    assert!(!registry.context().pool.is_leased("00000001"));
}

#[test]
fn test_stop_all() {
    let spawner = Arc::new(FakeSpawner::default());
    let registry = registry(Arc::clone(&spawner), Arc::default());
    power_up(&registry);

    registry.dispatch("aprs", Operation::StartProcess).unwrap();
    registry.dispatch("sonde", Operation::StartProcess).unwrap();
    registry.stop_all();

    assert!(!registry.get("aprs").unwrap().is_running());
    assert!(!registry.get("sonde").unwrap().is_running());
}

#[test]
fn test_routes_follow_process_kinds() {
    let registry = registry(Arc::default(), Arc::default());
    let routes = registry.routes();
    assert_eq!(routes.len(), 3);
    assert!(routes.contains_key("aprs"));
    assert!(routes.contains_key("ais"));
    assert!(routes.contains_key("sonde"));
}
