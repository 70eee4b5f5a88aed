//! Client for a Hamlib `rigctld` style control socket.
//!
//! Each request opens a connection, writes one command line, reads the
//! reply and closes the session with `c`.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use cyberdeck_core::ConfigRecord;
use tracing::debug;

use crate::error::SubsystemError;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 7356;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Largest reply read from one request.
const REPLY_LIMIT: usize = 1024;

/// One rig control request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RigCommand {
    /// Tune to a frequency in Hz.
    SetFrequency(u64),
    GetFrequency,
    SetMode(String),
    GetMode,
    /// Signal strength.
    GetLevel,
}

impl RigCommand {
    /// Operation name used on the HTTP surface.
    pub fn name(&self) -> &'static str {
        match self {
            RigCommand::SetFrequency(_) => "set_frequency",
            RigCommand::GetFrequency => "get_frequency",
            RigCommand::SetMode(_) => "set_mode",
            RigCommand::GetMode => "get_mode",
            RigCommand::GetLevel => "get_level",
        }
    }

    /// Command line sent to the rig, without the newline.
    pub fn line(&self) -> String {
        match self {
            RigCommand::SetFrequency(hz) => format!("F {hz}"),
            RigCommand::GetFrequency => "f".to_string(),
            RigCommand::SetMode(mode) => format!("M {mode}"),
            RigCommand::GetMode => "m".to_string(),
            RigCommand::GetLevel => "l".to_string(),
        }
    }
}

/// Parse a frequency argument. Accepts integral or fractional Hz.
pub fn parse_frequency(raw: &str) -> Option<u64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|hz| hz.is_finite() && *hz > 0.0 && *hz < u64::MAX as f64)
        .map(|hz| hz.round() as u64)
}

/// Interpret a raw reply. `RPRT <code>` with a non-zero code is an error.
pub fn parse_reply(raw: &str) -> Result<String, SubsystemError> {
    let reply = raw.trim();
    if reply.is_empty() {
        return Err(SubsystemError::OperationFailed(
            "rig closed the connection without replying".to_string(),
        ));
    }
    match reply.strip_prefix("RPRT") {
        Some(code) if code.trim() != "0" => Err(SubsystemError::OperationFailed(format!(
            "rig returned error {}",
            code.trim()
        ))),
        _ => Ok(reply.to_string()),
    }
}

#[derive(Debug, Clone)]
pub struct RigClient {
    address: String,
    timeout: Duration,
}

impl RigClient {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }

    /// `s_hostname`, `i_port` and `i_timeout_ms`, with defaults.
    pub fn from_config(config: &ConfigRecord) -> Self {
        let host = config.get_str("s_hostname").unwrap_or(DEFAULT_HOST);
        let port = config
            .get_i64("i_port")
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or(DEFAULT_PORT);
        let timeout = config
            .get_i64("i_timeout_ms")
            .and_then(|ms| u64::try_from(ms).ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TIMEOUT);
        Self::new(format!("{host}:{port}"), timeout)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn request(&self, command: &RigCommand) -> Result<String, SubsystemError> {
        let fail = |e: std::io::Error| {
            SubsystemError::OperationFailed(format!("rig at {}: {e}", self.address))
        };

        let mut stream = TcpStream::connect_timeout(&self.resolve()?, self.timeout).map_err(fail)?;
        stream.set_read_timeout(Some(self.timeout)).map_err(fail)?;
        stream.set_write_timeout(Some(self.timeout)).map_err(fail)?;

        let line = command.line();
        stream.write_all(format!("{line}\n").as_bytes()).map_err(fail)?;

        let mut buf = [0u8; REPLY_LIMIT];
        let n = stream.read(&mut buf).map_err(fail)?;
        if let Err(e) = stream.write_all(b"c\n") {
            debug!("Closing rig session at {}: {}", self.address, e);
        }

        let reply = String::from_utf8_lossy(&buf[..n]);
        debug!("rig {} {:?} -> {:?}", self.address, line, reply.trim());
        parse_reply(&reply)
    }

    fn resolve(&self) -> Result<SocketAddr, SubsystemError> {
        self.address
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| {
                SubsystemError::OperationFailed(format!("cannot resolve rig at {}", self.address))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};

    /// Answers one request with `reply`; yields the lines it received.
    fn fake_rig(reply: &'static str) -> (SocketAddr, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut writer = stream;
            let mut lines = Vec::new();
            for answer in [Some(reply), None] {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                lines.push(line.trim_end().to_string());
                if let Some(answer) = answer {
                    writer.write_all(answer.as_bytes()).unwrap();
                }
            }
            lines
        });
        (addr, handle)
    }

    #[test]
    fn test_command_lines() {
        assert_eq!(RigCommand::SetFrequency(145_500_000).line(), "F 145500000");
        assert_eq!(RigCommand::GetFrequency.line(), "f");
        assert_eq!(RigCommand::SetMode("FM".to_string()).line(), "M FM");
        assert_eq!(RigCommand::GetMode.line(), "m");
        assert_eq!(RigCommand::GetLevel.line(), "l");
        assert_eq!(RigCommand::GetLevel.name(), "get_level");
    }

    #[test]
    fn test_parse_frequency() {
        assert_eq!(parse_frequency("145500000"), Some(145_500_000));
        assert_eq!(parse_frequency(" 144800000.4 "), Some(144_800_000));
        assert_eq!(parse_frequency("-5"), None);
        assert_eq!(parse_frequency("inf"), None);
        assert_eq!(parse_frequency("abc"), None);
    }

    #[test]
    fn test_parse_reply() {
        assert_eq!(parse_reply("145500000\n").unwrap(), "145500000");
        assert_eq!(parse_reply("RPRT 0\n").unwrap(), "RPRT 0");
        assert_eq!(parse_reply("FM\n15000\n").unwrap(), "FM\n15000");
        assert_eq!(
            parse_reply("RPRT -11\n"),
            Err(SubsystemError::OperationFailed("rig returned error -11".to_string()))
        );
        assert!(parse_reply("  \n").is_err());
    }

    #[test]
    fn test_request_round() {
        let (addr, rig) = fake_rig("RPRT 0\n");
        let client = RigClient::new(addr.to_string(), Duration::from_secs(2));

        assert_eq!(
            client.request(&RigCommand::SetFrequency(145_500_000)).unwrap(),
            "RPRT 0"
        );
        assert_eq!(rig.join().unwrap(), vec!["F 145500000", "c"]);
    }

    #[test]
    fn test_request_reports_rig_error() {
        let (addr, rig) = fake_rig("RPRT -1\n");
        let client = RigClient::new(addr.to_string(), Duration::from_secs(2));

        assert!(matches!(
            client.request(&RigCommand::SetMode("XYZ".to_string())),
            Err(SubsystemError::OperationFailed(_))
        ));
        assert_eq!(rig.join().unwrap(), vec!["M XYZ", "c"]);
    }

    #[test]
    fn test_unreachable_rig() {
        let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
        let client = RigClient::new(addr.to_string(), Duration::from_millis(500));
        assert!(matches!(
            client.request(&RigCommand::GetFrequency),
            Err(SubsystemError::OperationFailed(_))
        ));
    }

    #[test]
    fn test_client_from_config() {
        let config = ConfigRecord::from_raw([("s_hostname", "rig.local"), ("i_port", "4532")]).unwrap();
        let client = RigClient::from_config(&config);
        assert_eq!(client.address(), "rig.local:4532");
        assert_eq!(client.timeout, DEFAULT_TIMEOUT);

        let client = RigClient::from_config(&ConfigRecord::default());
        assert_eq!(client.address(), "127.0.0.1:7356");
    }
}
