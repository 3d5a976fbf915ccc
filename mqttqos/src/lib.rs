//! Asynchronous MQTT 3.1.1 engine with QoS 0/1/2 delivery.
//!
//! Publishing and subscribing never block the caller's task: every request
//! is a future that resolves when the broker's acknowledgment arrives, when
//! the connection is lost, or is cancelled by dropping it.
//!
//! ## Components
//!
//! - [`varint`]: MQTT variable byte integer codec
//! - [`PacketIdPool`]: packet identifier allocator
//! - [`Completion`]: exactly-once continuation for a pending operation
//! - [`AckTracker`]: per-identifier QoS acknowledgment state machine
//! - [`Session`]: client facade tying the above to a connection
//!
//! ## Example
//!
//! ```no_run
//! use mqttqos::{QoS, Session, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> mqttqos::Result<()> {
//!     let session = Session::connect(SessionConfig::new("127.0.0.1:1883", "client-1")).await?;
//!
//!     session.subscribe(&[("test/topic", QoS::AtLeastOnce)]).await?;
//!
//!     let result = session.publish("test/topic", "hello", QoS::ExactlyOnce).await?;
//!     println!("PUBREC {:?}, PUBCOMP {:?}", result.pubrec, result.pubcomp);
//!
//!     let msg = session.recv().await?;
//!     println!("Received: {:?}", msg);
//!
//!     session.disconnect().await
//! }
//! ```

mod error;
pub mod guard;
pub mod packet_id;
pub mod protocol;
mod session;
pub mod tracker;
pub mod transport;
mod types;
pub mod varint;

pub use error::{Error, Result};
pub use guard::{Completion, ScopeGuard, SharedScopeGuard};
pub use packet_id::PacketIdPool;
pub use session::{Session, SessionConfig};
pub use tracker::{AckTracker, FlowKind, FlowResult, FlowState, FlowTicket};
pub use transport::TransportType;
pub use types::{Message, PacketId, PublishResult, QoS};
