//! Wire schemas for the master-to-slave replication link.
//!
//! The transport is TCP with one UTF-8 JSON object per `\n`-terminated line.
//! Two frame shapes exist:
//!
//! - slave to master, once per connection: [`HandshakeFrame`]
//! - master to slave, one per mutation: [`WireRecord`], the encoded form of
//!   a typed [`ReplicationCommand`]
//!
//! JSON string escaping keeps embedded newlines out of the frame, so no
//! additional escaping layer is needed on top of the line framing.

pub mod handshake;
pub mod record;

pub use handshake::HandshakeFrame;
pub use record::{ReplicationCommand, WireError, WireRecord};
