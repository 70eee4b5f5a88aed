//! # cyberdeck-server
//!
//! Subsystem manager and telemetry bus for the cyberdeck.
//!
//! - [`Registry`]: every configured device, process and application, and
//!   the operations callers may run on them
//! - [`pipeline`] and [`rf`]: external decode pipelines and RF receiver
//!   arbitration
//! - [`bus`]: Proxy, Forwarder and Subscriber
//! - [`Runtime`]: device pollers, bus tasks, snapshot publisher and the
//!   pipeline supervisor under one shutdown flag

pub mod bus;
pub mod error;
pub mod pipeline;
pub mod registry;
pub mod rf;
pub mod runtime;
pub mod sink;
pub mod snapshot;
pub mod storage;
pub mod subsystem;

pub use error::{RegistryError, SubsystemError};
pub use registry::{Operation, Outcome, Registry, Selection, Services};
pub use runtime::Runtime;
pub use sink::{PersistenceSink, TracingSink};
pub use snapshot::SnapshotPublisher;
pub use storage::FileConfigStorage;
pub use subsystem::{Subsystem, SubsystemKind};
