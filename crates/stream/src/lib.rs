//! Ironstream stream manager -- per-destination buffering, batching and delivery.
//!
//! Each registered destination runs in its own tokio task:
//!
//! ```text
//! dispatch ─▶ filter ─▶ sampling ─▶ capacity ─▶ [command channel]
//!                                                     │
//!                                           open batch ─▶ sealed FIFO ─▶ Connector
//!                                                                │ (retry, circuit)
//!                                                                ▼
//!                                                        dead-letter store
//! ```
//!
//! - [`config`]: settings resolved from `ironstream.toml`
//! - [`filter`], [`sampling`]: admission before an event takes buffer space
//! - [`buffer`], [`batch`]: open batch, sealing and capacity accounting
//! - [`circuit`], [`dead_letter`]: failure isolation
//! - [`connector`]: TCP/UDP syslog, file and mock transports
//! - [`destination`]: the task and its handle
//! - [`manager`]: registry, fan-out and [`Pipeline`](ironstream_core::Pipeline) lifecycle

pub mod batch;
pub mod buffer;
pub mod circuit;
pub mod config;
pub mod connector;
pub mod dead_letter;
pub mod destination;
pub mod error;
pub mod filter;
pub mod manager;
pub mod notification;
pub mod sampling;
pub mod stats;

pub use batch::{Batch, EncodedBatch};
pub use circuit::{CircuitBreaker, CircuitKind};
pub use config::{DestinationSettings, Framing, ProtocolKind, StreamSettings};
pub use connector::{Connector, FileConnector, MockConnector, TcpSyslogConnector, UdpSyslogConnector};
pub use dead_letter::{DeadLetterEntry, DeadLetterStore};
pub use destination::{DestinationHandle, EnqueueOutcome, ShutdownReport};
pub use error::{DeliveryError, StreamError};
pub use filter::{Condition, FilterAction, FilterChain, FilterRule};
pub use manager::{DestinationOutcome, DispatchReport, StreamManager};
pub use notification::{DropReason, StreamNotification};
pub use sampling::SamplingPolicy;
pub use stats::{DestinationCounters, DestinationHealth};
