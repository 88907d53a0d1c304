//! Relay core.
//!
//! Backend-independent message relaying: which channels are linked, whether an
//! event may be relayed, how a copy looks in its destination, and which copies
//! belong to which origin. The chat backend supplies inbound events and a
//! [`RelaySender`]; everything in between lives here.

pub mod correlation;
pub mod dispatcher;
pub mod filter;
pub mod guard;
pub mod log_relay;
pub mod registry;
pub mod sender;
pub mod transformer;

pub use correlation::{run_retention_sweep, CorrelationStore};
pub use dispatcher::Dispatcher;
pub use log_relay::LogRelayLayer;
pub use registry::{ChannelRegistry, SharedRegistry};
pub use sender::RelaySender;
