//! Applications: external scripts, the telemetry Subscriber and rig control.

use std::sync::{Arc, Mutex};

use cyberdeck_core::{ConfigRecord, Status};
use tokio::sync::watch;
use tracing::info;

use super::rigctl::{RigClient, RigCommand};
use super::{unsupported, Context, Lifecycle, Subsystem};
use crate::error::SubsystemError;

/// Application implementation selected by `s_kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationKind {
    /// `start_<id>.sh` / `stop_<id>.sh` in the scripts directory.
    Script,
    /// The bus Subscriber; start and stop toggle packet processing.
    Subscriber,
    /// A `rigctld` socket at `s_hostname:i_port`.
    RigCtl,
}

impl ApplicationKind {
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "script" => Some(ApplicationKind::Script),
            "subscriber" => Some(ApplicationKind::Subscriber),
            "rigctl" => Some(ApplicationKind::RigCtl),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationKind::Script => "script",
            ApplicationKind::Subscriber => "subscriber",
            ApplicationKind::RigCtl => "rigctl",
        }
    }
}

pub struct Application {
    kind: ApplicationKind,
    ctx: Arc<Context>,
    transition: Mutex<()>,
    running: watch::Sender<bool>,
}

impl Application {
    pub fn new(kind: ApplicationKind, ctx: Arc<Context>) -> Self {
        Self {
            kind,
            ctx,
            transition: Mutex::new(()),
            running: watch::channel(false).0,
        }
    }

    pub fn kind(&self) -> ApplicationKind {
        self.kind
    }

    /// Follows every start and stop.
    pub fn watch_running(&self) -> watch::Receiver<bool> {
        self.running.subscribe()
    }

    fn run_script(&self, action: &str, id: &str) -> Result<(), SubsystemError> {
        let script = self.ctx.script_path(&format!("{action}_{id}.sh"));
        self.ctx
            .runner
            .run(&format!("{} &", script.display()))
            .map_err(SubsystemError::OperationFailed)
    }

    fn set_running(
        &self,
        subsystem: &Subsystem,
        running: bool,
    ) -> Result<Arc<Status>, SubsystemError> {
        let _guard = self.transition.lock().unwrap_or_else(|e| e.into_inner());

        match self.kind {
            ApplicationKind::Script => {
                self.run_script(if running { "start" } else { "stop" }, subsystem.id())?;
            }
            ApplicationKind::Subscriber => {
                if subsystem.is_running() == running {
                    return Err(if running {
                        SubsystemError::AlreadyRunning
                    } else {
                        SubsystemError::AlreadyStopped
                    });
                }
            }
            ApplicationKind::RigCtl => {}
        }

        info!(
            "{} {}",
            if running { "Started" } else { "Stopped" },
            subsystem.id()
        );
        let status = subsystem.status_cell().update(|s| s.set("running", running));
        self.running.send_replace(running);
        Ok(status)
    }
}

impl Lifecycle for Application {
    fn immutable_keys(&self, _config: &ConfigRecord) -> Vec<String> {
        vec!["s_name".to_string()]
    }

    fn start(&self, subsystem: &Subsystem) -> Result<Arc<Status>, SubsystemError> {
        self.set_running(subsystem, true)
    }

    fn stop(&self, subsystem: &Subsystem) -> Result<Arc<Status>, SubsystemError> {
        self.set_running(subsystem, false)
    }

    fn rig(&self, subsystem: &Subsystem, command: &RigCommand) -> Result<String, SubsystemError> {
        if self.kind != ApplicationKind::RigCtl {
            return Err(unsupported(command.name()));
        }
        RigClient::from_config(&subsystem.config()).request(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{CommandRunner, ShellSpawner};
    use crate::rf::{RfPool, UsbNodeProbe};
    use crate::subsystem::SubsystemKind;
    use cyberdeck_core::{ConfigError, ServerSettings, SubsystemType};
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::path::PathBuf;
    use std::thread;

    #[derive(Default)]
    struct RecordingRunner {
        commands: Mutex<Vec<String>>,
    }

    impl CommandRunner for RecordingRunner {
        fn run(&self, command: &str) -> Result<(), String> {
            self.commands.lock().unwrap().push(command.to_string());
            Ok(())
        }
    }

    fn application(kind: ApplicationKind, runner: Arc<RecordingRunner>) -> Subsystem {
        application_with(kind, runner, &[])
    }

    fn application_with(
        kind: ApplicationKind,
        runner: Arc<RecordingRunner>,
        extra: &[(&str, &str)],
    ) -> Subsystem {
        let ctx = Arc::new(Context {
            settings: ServerSettings {
                scripts_dir: PathBuf::from("/opt/cyberdeck/scripts"),
                ..ServerSettings::default()
            },
            pool: RfPool::new(None, Arc::new(UsbNodeProbe)),
            spawner: Arc::new(ShellSpawner),
            runner,
            proxy: None,
        });
        let mut entries = vec![
            ("s_id", "mapper"),
            ("s_type", "application"),
            ("s_kind", kind.as_str()),
            ("s_name", "Mapper"),
        ];
        entries.extend_from_slice(extra);
        let record = ConfigRecord::from_raw(entries).unwrap();
        Subsystem::new(
            "mapper",
            SubsystemType::Application,
            record,
            SubsystemKind::Application(Application::new(kind, ctx)),
        )
    }

    #[test]
    fn test_script_application_runs_scripts() {
        let runner = Arc::new(RecordingRunner::default());
        let app = application(ApplicationKind::Script, runner.clone());

        assert!(app.start_process().unwrap().is_running());
        assert!(!app.stop_process().unwrap().is_running());
        assert_eq!(
            *runner.commands.lock().unwrap(),
            vec![
                "/opt/cyberdeck/scripts/start_mapper.sh &",
                "/opt/cyberdeck/scripts/stop_mapper.sh &",
            ]
        );
    }

    #[test]
    fn test_subscriber_transitions() {
        let runner = Arc::new(RecordingRunner::default());
        let app = application(ApplicationKind::Subscriber, runner.clone());

        assert_eq!(app.stop_process(), Err(SubsystemError::AlreadyStopped));
        assert!(app.start_process().unwrap().is_running());
        assert_eq!(app.start_process(), Err(SubsystemError::AlreadyRunning));
        assert!(!app.stop_process().unwrap().is_running());
        assert!(runner.commands.lock().unwrap().is_empty());
    }

    #[test]
    fn test_running_watch_follows_transitions() {
        let app = application(ApplicationKind::Subscriber, Arc::new(RecordingRunner::default()));
        let mut running = app.as_application().unwrap().watch_running();
        assert!(!*running.borrow_and_update());

        app.start_process().unwrap();
        assert!(running.has_changed().unwrap());
        assert!(*running.borrow_and_update());

        app.stop_process().unwrap();
        assert!(!*running.borrow_and_update());
    }

    #[test]
    fn test_rigctl_application() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port().to_string();
        let rig = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut request = String::new();
            reader.read_line(&mut request).unwrap();
            (&stream).write_all(b"145500000\n").unwrap();
            request
        });

        let runner = Arc::new(RecordingRunner::default());
        let app = application_with(
            ApplicationKind::RigCtl,
            runner.clone(),
            &[("s_hostname", "127.0.0.1"), ("i_port", &port)],
        );

        assert!(app.start_process().unwrap().is_running());
        assert!(app.start_process().unwrap().is_running());
        assert_eq!(app.rig(&RigCommand::GetFrequency).unwrap(), "145500000");
        assert_eq!(rig.join().unwrap(), "f\n");
        assert!(!app.stop_process().unwrap().is_running());
        assert!(runner.commands.lock().unwrap().is_empty());
    }

    #[test]
    fn test_rig_commands_need_rigctl() {
        let app = application(ApplicationKind::Script, Arc::new(RecordingRunner::default()));
        assert_eq!(
            app.rig(&RigCommand::GetMode),
            Err(SubsystemError::UnsupportedOperation("get_mode".to_string()))
        );
    }

    #[test]
    fn test_application_locks_name() {
        let app = application(ApplicationKind::Script, Arc::new(RecordingRunner::default()));
        assert_eq!(
            app.set_config("s_name", "Other"),
            Err(SubsystemError::Config(ConfigError::ImmutableKey("s_name".to_string())))
        );
        assert!(matches!(
            app.set_power(true),
            Err(SubsystemError::UnsupportedOperation(_))
        ));
    }
}
