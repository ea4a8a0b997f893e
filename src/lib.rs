#![doc = include_str!("../README.md")]
#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]
//! Readers of the code are advised to start with `SpacePacket` and the `PacketAssembly` trait,
//! which cover construction and interpretation of packets. `Framer`, `Router` and `Node` build
//! the on-board link behaviour on top of them; `Transport` is the seam to the physical buses.
//!
//! The primary and secondary headers are plain byte structs handled through `zerocopy`, so
//! decoding a header is a copy of its bytes followed by bit masking on access.

extern crate alloc;

pub mod config;
pub mod framing;
pub mod header;
pub mod node;
pub mod packet;
pub mod secondary;
pub mod status;
pub mod transport;

pub use config::{FramingConfig, SecondaryHeaderTemplate, SequencePolicy};
pub use framing::{
    Framer, FramingError, NO_COMMAND, PacketAssembly, Route, Router, RoutingError,
    SensorReading, SequenceCounters,
};
pub use header::{
    Apid, DecodeError, FieldOverflow, InvalidHeader, PacketSequenceCount, PacketType,
    PacketVersionNumber, PrimaryHeader, SecondaryHeaderFlag, SequenceFlag,
};
pub use node::{CommandLatch, Link, Node, NodeError};
pub use packet::{EncodeError, SpacePacket};
pub use secondary::{AduChannelId, AduChannelUsage, AduCount, SecondaryHeader};
pub use status::{StatusCode, StatusTable, Subsystem};
pub use transport::{LoopbackTransport, Transport, TransportError, TransportKind};
#[cfg(feature = "std")]
pub use transport::{UdpConfig, UdpTransport};
