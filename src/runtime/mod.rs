//! # Session Policy Layer
//!
//! Pieces that sit *above* the core session state machine and stay out of it
//! by design:
//!
//! - **Reconnect policy** ([`ReconnectPolicy`], [`Reconnector`]): the state
//!   machine never retries on its own — it reports `Disconnected` and returns
//!   to `Idle`. The application (or this helper) decides when to call
//!   `connect` again, with exponential backoff between attempts.
//! - **Cross-task publishing** ([`PublisherHandle`]): firmware tasks other
//!   than the one driving the session cannot touch the client directly.
//!   They queue owned publish requests on a channel; the session task drains
//!   the channel and forwards the requests to the client it owns.

pub(crate) mod handle;
pub(crate) mod reconnect;

pub use handle::{
    PublishRequest, PublishRequestChannel, PublishRequestReceiver, PublishRequestSender,
    PublisherHandle,
};
pub use reconnect::{ReconnectPolicy, Reconnector};
