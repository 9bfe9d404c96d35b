#![warn(missing_docs)]

//! TagFab provider: endpoint lifecycle and tag-matched two-sided messaging
//!
//! This crate exposes a uniform endpoint interface over a tag-matching,
//! RDMA-capable transport. Callers open a [`Domain`] over a transport, open
//! [`Endpoint`]s on it, and issue sends and receives that complete
//! asynchronously. Completions are correlated back to the issuing
//! [`OpContext`] through the endpoint's request pool.

pub mod config;
pub mod context;
pub mod domain;
pub mod endpoint;
pub mod error;
pub mod flags;
pub mod metrics;
pub mod msg;
pub mod options;
pub mod pool;
pub mod sim;
pub mod transport;

pub use config::{ProviderConfig, REQUEST_POOL_SIZE_DEFAULT};
pub use context::{CompletionEvent, CompletionQueue, OpContext};
pub use domain::{Domain, DomainStats};
pub use endpoint::{Endpoint, EndpointAttr};
pub use error::{ProviderError, Result};
pub use flags::{OpFlags, OpKind};
pub use metrics::{MetricsSnapshot, ProviderMetrics};
pub use msg::{MessagingEndpoint, RecvMsg, SendMsg, MSG_TAG_BIT};
pub use options::{
    OptionName, OptionRegistry, MIN_MULTI_RECV_DEFAULT, OPT_BUFFERED_LIMIT, OPT_BUFFERED_MIN,
    OPT_ENDPOINT, OPT_MIN_MULTI_RECV,
};
pub use pool::{PoolStats, RequestHandle, RequestPool};
pub use sim::{FabricStats, SimFabric, SimTransport, SimulatedFabricConfig};
pub use transport::{
    CompletionStatus, NativeHandle, PeerAddr, RequestToken, TagMatch, TagTransport,
    TransportCompletion, TransportKind, TransportStatus,
};
