//! RF receiver discovery and arbitration.
//!
//! The `rf` device lists its receivers by serial (`s_rf1_serial`,
//! `s_rf2_serial`, ...) and its poller publishes `rfN_power`, `rfN_index`
//! and `rfN_node` for each slot. A Process takes an exclusive [`RfLease`] on
//! its receiver for as long as its pipeline runs; the lease is released when
//! dropped.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use cyberdeck_core::{ConfigRecord, Status};
use tracing::debug;

use crate::error::SubsystemError;
use crate::subsystem::Subsystem;

/// USB vendor/product ids of RTL2832U receivers.
const RTL_SDR_IDS: &[(&str, &str)] = &[("0bda", "2838"), ("0bda", "2832")];

/// A receiver found on the USB bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedReceiver {
    pub serial: String,
    /// Enumeration index as used by the rtl-sdr tools (`-d`).
    pub index: u32,
    /// USB device node.
    pub node: PathBuf,
}

/// Enumerates attached receivers.
pub trait RfScanner: Send + Sync {
    fn scan(&self) -> Vec<AttachedReceiver>;
}

/// Pre-flight busy check run after a lease is taken.
pub trait ReceiverProbe: Send + Sync {
    fn probe(&self, receiver: &Receiver) -> Result<(), String>;
}

/// Scans `/sys/bus/usb/devices` for RTL-SDR dongles.
#[derive(Debug, Clone)]
pub struct SysfsScanner {
    root: PathBuf,
}

impl SysfsScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for SysfsScanner {
    fn default() -> Self {
        Self::new("/sys/bus/usb/devices")
    }
}

fn read_attr(dir: &Path, name: &str) -> Option<String> {
    fs::read_to_string(dir.join(name))
        .ok()
        .map(|s| s.trim().to_string())
}

impl RfScanner for SysfsScanner {
    fn scan(&self) -> Vec<AttachedReceiver> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Vec::new();
        };

        let mut found: Vec<(u32, u32, String)> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter_map(|dir| {
                let vendor = read_attr(&dir, "idVendor")?;
                let product = read_attr(&dir, "idProduct")?;
                if !RTL_SDR_IDS.contains(&(vendor.as_str(), product.as_str())) {
                    return None;
                }
                let bus: u32 = read_attr(&dir, "busnum")?.parse().ok()?;
                let dev: u32 = read_attr(&dir, "devnum")?.parse().ok()?;
                let serial = read_attr(&dir, "serial").unwrap_or_default();
                Some((bus, dev, serial))
            })
            .collect();
        found.sort();

        found
            .into_iter()
            .enumerate()
            .map(|(index, (bus, dev, serial))| AttachedReceiver {
                serial,
                index: index as u32,
                node: PathBuf::from(format!("/dev/bus/usb/{bus:03}/{dev:03}")),
            })
            .collect()
    }
}

/// `_IOR('U', 15, unsigned int)` and `_IOR('U', 16, unsigned int)` from
/// `linux/usbdevice_fs.h`.
const USBDEVFS_CLAIMINTERFACE: u32 = 0x8004_550f;
const USBDEVFS_RELEASEINTERFACE: u32 = 0x8004_5510;

/// Opens the receiver's usbfs node and claims interface 0, as the rtl-sdr
/// tools do, then releases it. Fails while another program holds the
/// receiver.
#[derive(Debug, Default, Clone)]
pub struct UsbNodeProbe;

impl ReceiverProbe for UsbNodeProbe {
    fn probe(&self, receiver: &Receiver) -> Result<(), String> {
        let node = receiver.node.display();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&receiver.node)
            .map_err(|e| format!("{node}: {e}"))?;

        usbdevfs(file.as_raw_fd(), USBDEVFS_CLAIMINTERFACE)
            .map_err(|e| claim_failure(&receiver.node, &e))?;
        if let Err(e) = usbdevfs(file.as_raw_fd(), USBDEVFS_RELEASEINTERFACE) {
            debug!("Releasing {} failed: {}", node, e);
        }
        Ok(())
    }
}

fn usbdevfs(fd: RawFd, request: u32) -> io::Result<()> {
    let mut interface: libc::c_uint = 0;
    // SAFETY: both requests read a single unsigned int through the pointer,
    // which is valid for the duration of the call.
    let rc = unsafe { libc::ioctl(fd, request as _, &mut interface as *mut libc::c_uint) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn claim_failure(node: &Path, e: &io::Error) -> String {
    if e.raw_os_error() == Some(libc::EBUSY) {
        format!("{}: claimed by another program", node.display())
    } else {
        format!("{}: cannot claim interface: {e}", node.display())
    }
}

/// Slots configured on the rf device, as `(slot, serial)`.
pub fn configured_slots(config: &ConfigRecord) -> Vec<(u32, String)> {
    let mut slots: Vec<(u32, String)> = config
        .iter()
        .filter_map(|(key, value)| {
            let slot: u32 = key.strip_prefix("s_rf")?.strip_suffix("_serial")?.parse().ok()?;
            Some((slot, value.as_str()?.to_string()))
        })
        .collect();
    slots.sort();
    slots
}

/// Keys locked on the rf device.
pub fn serial_keys(config: &ConfigRecord) -> Vec<String> {
    configured_slots(config)
        .into_iter()
        .map(|(slot, _)| format!("s_rf{slot}_serial"))
        .collect()
}

/// Build the rf device status from a scan.
pub fn scan_status(config: &ConfigRecord, attached: &[AttachedReceiver]) -> Status {
    let mut status = Status::new();
    for (slot, serial) in configured_slots(config) {
        let hit = attached.iter().find(|r| r.serial == serial);
        status.set(format!("rf{slot}_power"), hit.is_some());
        status.set(format!("rf{slot}_index"), hit.map_or(0, |r| r.index));
        status.set(
            format!("rf{slot}_node"),
            hit.map(|r| r.node.display().to_string()).unwrap_or_default(),
        );
    }
    status
}

/// A powered receiver resolved from the rf device.
#[derive(Debug, Clone, PartialEq)]
pub struct Receiver {
    pub serial: String,
    pub slot: u32,
    pub index: u32,
    pub node: PathBuf,
    /// Frequency correction from `i_rfN_ppm`.
    pub ppm: i64,
}

/// Resolves receivers and hands out leases.
pub struct RfPool {
    device: Option<Arc<Subsystem>>,
    leases: Arc<Mutex<HashSet<String>>>,
    probe: Arc<dyn ReceiverProbe>,
}

impl RfPool {
    pub fn new(device: Option<Arc<Subsystem>>, probe: Arc<dyn ReceiverProbe>) -> Self {
        Self {
            device,
            leases: Arc::new(Mutex::new(HashSet::new())),
            probe,
        }
    }

    /// Slot of `serial` on the rf device, if it is one of its receivers.
    pub fn slot_of(&self, serial: &str) -> Option<u32> {
        let device = self.device.as_ref()?;
        let config = device.config();
        configured_slots(&config)
            .into_iter()
            .find(|(_, s)| s == serial)
            .map(|(slot, _)| slot)
    }

    /// Whether `serial` names a receiver managed by this pool.
    pub fn manages(&self, serial: &str) -> bool {
        self.slot_of(serial).is_some()
    }

    /// Resolve a powered receiver.
    pub fn resolve(&self, serial: &str) -> Result<Receiver, SubsystemError> {
        let (device, slot) = self
            .device
            .as_ref()
            .zip(self.slot_of(serial))
            .ok_or_else(|| SubsystemError::DeviceUnavailable(format!("{serial} is not an RF receiver")))?;

        let status = device.status();
        if !status.get_bool(&format!("rf{slot}_power")).unwrap_or(false) {
            return Err(SubsystemError::DeviceUnavailable(format!(
                "receiver {serial} is not connected"
            )));
        }

        let config = device.config();
        Ok(Receiver {
            serial: serial.to_string(),
            slot,
            index: status.get_u64(&format!("rf{slot}_index")).unwrap_or(0) as u32,
            node: PathBuf::from(status.get_str(&format!("rf{slot}_node")).unwrap_or_default()),
            ppm: config.get_i64(&format!("i_rf{slot}_ppm")).unwrap_or(0),
        })
    }

    /// Take the exclusive lease on a powered receiver, then run the busy check.
    pub fn acquire(&self, serial: &str) -> Result<RfLease, SubsystemError> {
        let receiver = self.resolve(serial)?;

        {
            let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
            if !leases.insert(receiver.serial.clone()) {
                return Err(SubsystemError::DeviceBusy(format!(
                    "receiver {serial} is in use by another process"
                )));
            }
        }
        let lease = RfLease {
            receiver,
            leases: Arc::clone(&self.leases),
        };

        // Dropping the lease on failure releases it.
        self.probe
            .probe(&lease.receiver)
            .map_err(SubsystemError::DeviceBusy)?;

        debug!("Leased receiver {} (index {})", serial, lease.receiver.index);
        Ok(lease)
    }

    pub fn is_leased(&self, serial: &str) -> bool {
        self.leases
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(serial)
    }
}

/// Exclusive use of one receiver.
#[derive(Debug)]
pub struct RfLease {
    receiver: Receiver,
    leases: Arc<Mutex<HashSet<String>>>,
}

impl RfLease {
    pub fn receiver(&self) -> &Receiver {
        &self.receiver
    }
}

impl Drop for RfLease {
    fn drop(&mut self) {
        self.leases
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.receiver.serial);
        debug!("Released receiver {}", self.receiver.serial);
    }
}
