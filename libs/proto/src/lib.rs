//! # cpat-proto
//!
//! The asynchronous control protocol spoken between the controller and the
//! cluster agents it manages.
//!
//! ## Framing
//!
//! Every message travels as one frame: a big-endian `u32` length followed by
//! that many bytes of JSON. A session opens with a `connect` frame naming the
//! participant's role and identity; the peer answers `connected` or `error`.
//! After that either side may send `command` and `event` frames at any time.
//! There is no request/response pairing on the wire: correlation is the
//! receiver's job.
//!
//! ## Message Kinds
//!
//! - Commands (`start`, `stop`, `restart`, `delete`, `stats`, `evacuate`)
//!   instruct the receiver to act
//! - Events (`instance_stopped`, `instance_deleted`, `trace_report`,
//!   `concentrator_instance_added`, `node_connected`, `node_disconnected`)
//!   report something that already happened

mod codec;
mod error;
mod frame;
mod kinds;
mod payloads;

pub use codec::{read_frame, write_frame, MAX_FRAME_LEN};
pub use error::ProtoError;
pub use frame::{ErrorCode, Frame};
pub use kinds::{CommandKind, EventKind, MessageKind, Role};
pub use payloads::*;
