//! # CNC Bridge Server
//!
//! Sessions, routing, and supervision for the CNC bridge.
//!
//! [`BridgeSupervisor`] owns the motion and drive links, the
//! [`ClientRegistry`], the [`StatusPoller`], and the [`MessageRouter`].
//! [`BridgeServer`] accepts WebSocket sessions and hands their traffic to
//! the supervisor.

pub mod error;
pub mod poller;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod server;
pub mod supervisor;

pub use error::{ServerError, ServerResult};
pub use poller::StatusPoller;
pub use protocol::{BridgeEvent, InboundFrame};
pub use registry::{ClientRegistry, SessionHandle, SessionId, SessionInfo};
pub use router::MessageRouter;
pub use server::BridgeServer;
pub use supervisor::BridgeSupervisor;
