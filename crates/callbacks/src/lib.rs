//! Inbound callback handling for remotely executed attempts.
//!
//! Remote jobs report progress by POSTing JSON events to a single HTTP
//! endpoint. Each event carries the correlation key of the attempt that
//! launched it. The [`registry::CallbackRegistry`] routes events to the
//! matching pending attempt, and [`listener::CallbackListener`] owns the
//! socket for the lifetime of the process.

pub mod error;
pub mod listener;
pub mod messages;
pub mod registry;

pub use error::ListenerError;
pub use listener::{router, CallbackListener, CALLBACK_PATH, CORRELATION_HEADER};
pub use messages::{CallbackPayload, CallbackStatus, MessageError};
pub use registry::{CallbackRegistry, DeliveryOutcome, Registration, RegistryError};
