//! Wrapping of statuses, sensor readings and telecommands into Space Packets, the per-transport
//! size guard, and routing of received telecommands by the subsystem nibble of their code.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use log::trace;
use thiserror::Error;

use crate::config::{FramingConfig, SequencePolicy};
use crate::header::{Apid, InvalidHeader, PacketSequenceCount, PacketType, SequenceFlag};
use crate::packet::{EncodeError, SpacePacket};
use crate::secondary::SecondaryHeader;
use crate::status::{StatusCode, Subsystem};

/// The "Packet Assembly" function of CCSDS 133.0-B-2: builds unsegmented Space Packets from
/// octet strings while keeping track of the sequence count of every packet identification.
pub trait PacketAssembly {
    /// Generates a Space Packet around `user_data`. The sequence count is only consumed once
    /// the packet has been built successfully, so a rejected data field leaves no gap.
    fn assemble(
        &mut self,
        packet_type: PacketType,
        apid: Apid,
        secondary_header: Option<SecondaryHeader>,
        user_data: &[u8],
    ) -> Result<SpacePacket, EncodeError> {
        let mut packet = SpacePacket::new();
        packet.set_secondary_header(secondary_header);
        packet.set_user_data(user_data)?;

        let sequence_count = self.packet_sequence_count(packet_type, apid);
        let header = packet.primary_header_mut();
        header.set_packet_type(packet_type);
        header.set_apid(apid);
        header.set_sequence_flag(SequenceFlag::Unsegmented);
        header.set_packet_sequence_count(sequence_count);
        Ok(packet)
    }

    /// Returns the count for the next packet of this identification and advances it.
    fn packet_sequence_count(&mut self, packet_type: PacketType, apid: Apid)
    -> PacketSequenceCount;
}

/// Independent 14-bit counters per (packet type, APID).
#[derive(Clone, Debug, Default)]
pub struct SequenceCounters {
    counts: BTreeMap<(u8, u16), PacketSequenceCount>,
}

impl SequenceCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current count and advances it, wrapping from 16383 to 0.
    pub fn next(&mut self, packet_type: PacketType, apid: Apid) -> PacketSequenceCount {
        let count = self
            .counts
            .entry((packet_type as u8, apid.value()))
            .or_default();
        let current = *count;
        count.increment();
        current
    }

    /// The count the next packet of this identification will carry.
    pub fn peek(&self, packet_type: PacketType, apid: Apid) -> PacketSequenceCount {
        self.counts
            .get(&(packet_type as u8, apid.value()))
            .copied()
            .unwrap_or_default()
    }
}

impl PacketAssembly for SequenceCounters {
    fn packet_sequence_count(
        &mut self,
        packet_type: PacketType,
        apid: Apid,
    ) -> PacketSequenceCount {
        self.next(packet_type, apid)
    }
}

/// A sensor identifier and its value. On the wire the identifier takes two bytes and the value
/// the smallest of one, two or four bytes that holds it, all big-endian.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SensorReading {
    pub sensor_id: u16,
    pub value: u32,
}

impl SensorReading {
    /// A reading of `value` from sensor `sensor_id`.
    pub fn new(sensor_id: u16, value: u32) -> Self {
        Self { sensor_id, value }
    }

    /// Number of bytes the value occupies on the wire.
    pub fn value_width(&self) -> usize {
        if self.value <= 0xff {
            1
        } else if self.value <= 0xffff {
            2
        } else {
            4
        }
    }

    /// The sensor ID followed by the value in the narrowest width that holds it.
    pub fn encode(&self) -> Vec<u8> {
        let width = self.value_width();
        let mut bytes = Vec::with_capacity(2 + width);
        bytes.extend_from_slice(&self.sensor_id.to_be_bytes());
        bytes.extend_from_slice(&self.value.to_be_bytes()[4 - width..]);
        bytes
    }

    /// Decodes the user data of a sensor reading packet; the value width follows from the
    /// length.
    pub fn decode(user_data: &[u8]) -> Result<Self, FramingError> {
        let (id, value) = match user_data {
            [a, b, value @ ..] if matches!(value.len(), 1 | 2 | 4) => ([*a, *b], value),
            _ => {
                return Err(FramingError::InvalidSensorReading {
                    length: user_data.len(),
                });
            }
        };
        let value = value
            .iter()
            .fold(0u32, |value, byte| (value << 8) | u32::from(*byte));
        Ok(Self {
            sensor_id: u16::from_be_bytes(id),
            value,
        })
    }
}

/// Builds the packets a program sends, stamping its APID, secondary header and sequence counts.
#[derive(Clone, Debug)]
pub struct Framer {
    config: FramingConfig,
    counters: SequenceCounters,
    time: [u8; 4],
}

impl Framer {
    /// A framer with fresh sequence counters.
    pub fn new(config: FramingConfig) -> Self {
        Self {
            config,
            counters: SequenceCounters::new(),
            time: [0; 4],
        }
    }

    pub fn config(&self) -> &FramingConfig {
        &self.config
    }

    /// Sets the time stamped into the secondary header of subsequent packets.
    pub fn set_time(&mut self, time: [u8; 4]) {
        self.time = time;
    }

    /// Telemetry packet carrying a 2-byte status code.
    pub fn wrap_status(&mut self, code: StatusCode) -> Result<SpacePacket, EncodeError> {
        self.wrap_user_data(PacketType::Telemetry, &code.to_be_bytes())
    }

    /// Telemetry packet carrying a sensor reading.
    pub fn wrap_sensor_reading(
        &mut self,
        reading: SensorReading,
    ) -> Result<SpacePacket, EncodeError> {
        self.wrap_user_data(PacketType::Telemetry, &reading.encode())
    }

    /// Telecommand packet carrying a 2-byte command code.
    pub fn wrap_telecommand(&mut self, code: u16) -> Result<SpacePacket, EncodeError> {
        self.wrap_user_data(PacketType::Telecommand, &code.to_be_bytes())
    }

    pub fn wrap_user_data(
        &mut self,
        packet_type: PacketType,
        user_data: &[u8],
    ) -> Result<SpacePacket, EncodeError> {
        let apid = self.config.apid;
        let secondary_header = self
            .config
            .secondary_header
            .map(|template| template.build(self.time));
        self.assemble(packet_type, apid, secondary_header, user_data)
    }

    /// Serializes `packet` for a transport accepting at most `max_payload` bytes per frame.
    pub fn encode_for(
        &self,
        packet: &mut SpacePacket,
        max_payload: usize,
    ) -> Result<Vec<u8>, FramingError> {
        let bytes = packet.serialize()?;
        if bytes.len() > max_payload {
            return Err(FramingError::PacketTooLargeForTransport {
                length: bytes.len(),
                max: max_payload,
            });
        }
        trace!(
            "event=packet_encoded apid={:#05x} sequence_count={} length={}",
            packet.apid().value(),
            packet.packet_sequence_count().value(),
            bytes.len()
        );
        Ok(bytes)
    }
}

impl PacketAssembly for Framer {
    fn packet_sequence_count(
        &mut self,
        packet_type: PacketType,
        apid: Apid,
    ) -> PacketSequenceCount {
        match self.config.sequence_policy {
            SequencePolicy::Fixed(count) => count,
            SequencePolicy::Incrementing => self.counters.next(packet_type, apid),
        }
    }
}

/// Failures while building or sizing an outgoing packet.
#[non_exhaustive]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Error)]
pub enum FramingError {
    #[error("packet of {length} bytes does not fit a {max}-byte transport payload")]
    PacketTooLargeForTransport { length: usize, max: usize },
    #[error("sensor reading user data of {length} bytes is malformed")]
    InvalidSensorReading { length: usize },
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// Command code ground tooling sends to mean "no command". It is never dispatched, not even as
/// a broadcast.
pub const NO_COMMAND: u16 = 0xffff;

/// Where a received telecommand goes.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub enum Route {
    /// Addressed to this subsystem: the command code to apply.
    Local(u16),
    /// Addressed to another known subsystem: the user data to pass on.
    Forward { subsystem: Subsystem, payload: Vec<u8> },
    /// Addressed to every subsystem: the code with its subsystem nibble masked off, and the
    /// complete user data.
    Broadcast { state: u16, payload: Vec<u8> },
    /// Carries `NO_COMMAND`: nothing to apply or pass on.
    NoCommand,
}

/// Reasons a received telecommand cannot be routed.
#[non_exhaustive]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Error)]
pub enum RoutingError {
    #[error("command {code:#06x} is addressed to an unknown subsystem")]
    AddressedToWrongSubsystem { code: u16 },
    #[error("user data of {length} bytes carries no command code")]
    MissingCommandCode { length: usize },
    #[error("idle packet carries no command")]
    IdlePacket,
    #[error("invalid primary header: {0}")]
    InvalidHeader(#[from] InvalidHeader),
}

/// Dispatches telecommands on the top nibble of the leading 16-bit code of their user data.
/// The packet type is not inspected: ground tooling sends commands with either type bit.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Router {
    local: Subsystem,
}

impl Router {
    pub fn new(local: Subsystem) -> Self {
        Self { local }
    }

    pub fn local(&self) -> Subsystem {
        self.local
    }

    /// Decides where `packet` goes. `NO_COMMAND` is checked before the nibble, so the
    /// sentinel never reaches the broadcast path.
    pub fn route(&self, packet: SpacePacket) -> Result<Route, RoutingError> {
        packet.primary_header().validate()?;
        if packet.is_idle() {
            return Err(RoutingError::IdlePacket);
        }

        let payload = packet.into_user_data();
        let code = match payload.as_slice() {
            [high, low, ..] => u16::from_be_bytes([*high, *low]),
            _ => {
                return Err(RoutingError::MissingCommandCode {
                    length: payload.len(),
                });
            }
        };

        if code == NO_COMMAND {
            return Ok(Route::NoCommand);
        }
        let nibble = (code >> 12) as u8;
        if nibble == Subsystem::BROADCAST_NIBBLE {
            return Ok(Route::Broadcast {
                state: code & 0x0fff,
                payload,
            });
        }
        match Subsystem::from_nibble(nibble) {
            Some(subsystem) if subsystem == self.local => Ok(Route::Local(code)),
            Some(subsystem) => Ok(Route::Forward { subsystem, payload }),
            None => Err(RoutingError::AddressedToWrongSubsystem { code }),
        }
    }
}

#[cfg(test)]
use crate::config::{OBDH_APID, PAYLOAD_APID};
#[cfg(test)]
use crate::status::{obdh, payload, sensor};
#[cfg(test)]
use crate::transport::TransportKind;
#[cfg(test)]
use rand::{RngCore, SeedableRng};

#[cfg(test)]
fn payload_framer() -> Framer {
    Framer::new(
        FramingConfig::payload()
            .with_sequence_policy(SequencePolicy::Fixed(PacketSequenceCount::constant(1))),
    )
}

#[test]
fn status_packet_bytes() {
    let mut framer = payload_framer();
    let mut packet = framer.wrap_status(payload::INFO_5G_PACKET_RECEIVED).unwrap();
    let bytes = framer
        .encode_for(&mut packet, TransportKind::Can.max_payload())
        .unwrap();
    assert_eq!(bytes, [0x01, 0xab, 0xc0, 0x01, 0x00, 0x01, 0x10, 0x40]);
}

#[test]
fn obdh_status_carries_secondary_header() {
    let mut framer = Framer::new(FramingConfig::obdh());
    framer.set_time([0, 0, 0x12, 0x34]);
    let mut packet = framer.wrap_status(obdh::INFO_STATE_TO_SAFE_MODE).unwrap();
    let bytes = framer
        .encode_for(&mut packet, TransportKind::Udp.max_payload())
        .unwrap();
    assert_eq!(bytes.len(), 6 + 8 + 2);
    assert_eq!(&bytes[..6], &[0x08, 0x0b, 0xc0, 0x00, 0x00, 0x09]);
    assert_eq!(&bytes[6..14], &[0x00, 0x80, 0xc0, 0x00, 0, 0, 0x12, 0x34]);
    assert_eq!(&bytes[14..], &[0x07, 0x01]);

    let decoded = SpacePacket::interpret(&bytes).unwrap();
    assert_eq!(decoded.apid(), OBDH_APID);
    assert_eq!(decoded.user_data(), &[0x07, 0x01]);
}

#[test]
fn sequence_counts_increment_per_identification() {
    let mut framer = Framer::new(FramingConfig::payload());
    let counts: Vec<u16> = (0..3)
        .map(|_| {
            framer
                .wrap_status(payload::INFO_5G_PACKET_RECEIVED)
                .unwrap()
                .packet_sequence_count()
                .value()
        })
        .collect();
    assert_eq!(counts, [0, 1, 2]);

    let telecommand = framer.wrap_telecommand(0x0701).unwrap();
    assert_eq!(telecommand.packet_sequence_count().value(), 0);
    assert!(telecommand.is_telecommand());
}

#[test]
fn sequence_counts_wrap() {
    let mut counters = SequenceCounters::new();
    for _ in 0..=PacketSequenceCount::MAX {
        counters.next(PacketType::Telemetry, PAYLOAD_APID);
    }
    assert_eq!(
        counters.peek(PacketType::Telemetry, PAYLOAD_APID).value(),
        0
    );
}

#[test]
fn rejected_data_field_consumes_no_count() {
    let mut framer = Framer::new(FramingConfig::payload());
    assert!(framer.wrap_user_data(PacketType::Telemetry, &[]).is_err());
    let packet = framer.wrap_status(payload::NO_ERROR).unwrap();
    assert_eq!(packet.packet_sequence_count().value(), 0);
}

#[test]
fn size_guard() {
    let mut framer = Framer::new(FramingConfig::payload());
    let mut packet = framer
        .wrap_user_data(PacketType::Telemetry, &[0u8; 3])
        .unwrap();
    assert_eq!(
        framer.encode_for(&mut packet, TransportKind::Can.max_payload()),
        Err(FramingError::PacketTooLargeForTransport { length: 9, max: 8 })
    );
    assert!(
        framer
            .encode_for(&mut packet, TransportKind::CanFd.max_payload())
            .is_ok()
    );

    let mut packet = framer
        .wrap_user_data(PacketType::Telemetry, &[0u8; 58])
        .unwrap();
    assert!(
        framer
            .encode_for(&mut packet, TransportKind::CanFd.max_payload())
            .is_ok()
    );
    let mut packet = framer
        .wrap_user_data(PacketType::Telemetry, &[0u8; 59])
        .unwrap();
    assert_eq!(
        framer.encode_for(&mut packet, TransportKind::CanFd.max_payload()),
        Err(FramingError::PacketTooLargeForTransport {
            length: 65,
            max: 64
        })
    );
}

#[test]
fn sensor_value_widths() {
    let cases: [(u32, &[u8]); 4] = [
        (0x05, &[0x09, 0x00, 0x05]),
        (0x0105, &[0x09, 0x00, 0x01, 0x05]),
        (0x0001_0000, &[0x09, 0x00, 0x00, 0x01, 0x00, 0x00]),
        (0x0102_0304, &[0x09, 0x00, 0x01, 0x02, 0x03, 0x04]),
    ];
    for (value, expected) in cases {
        let reading = SensorReading::new(sensor::SENSOR_1, value);
        assert_eq!(reading.encode(), expected);
        assert_eq!(SensorReading::decode(expected).unwrap(), reading);
    }
}

#[test]
fn malformed_sensor_readings() {
    for length in [0usize, 1, 2, 5, 7] {
        let user_data = alloc::vec![0u8; length];
        assert_eq!(
            SensorReading::decode(&user_data),
            Err(FramingError::InvalidSensorReading { length })
        );
    }
}

#[test]
fn random_sensor_readings_decode() {
    let mut rng = rand::rngs::SmallRng::seed_from_u64(42);
    for _ in 0..10_000 {
        let reading = SensorReading::new(rng.next_u32() as u16, rng.next_u32());
        let bytes = reading.encode();
        assert_eq!(bytes.len(), 2 + reading.value_width());
        assert_eq!(SensorReading::decode(&bytes).unwrap(), reading);
    }
}

#[cfg(test)]
fn command(code: u16) -> SpacePacket {
    let mut framer = Framer::new(FramingConfig::payload());
    framer.wrap_telecommand(code).unwrap()
}

#[test]
fn routing() {
    let router = Router::new(Subsystem::Obdh);
    assert_eq!(router.route(command(0x0701)), Ok(Route::Local(0x0701)));
    assert_eq!(
        router.route(command(0x1702)),
        Ok(Route::Forward {
            subsystem: Subsystem::Payload,
            payload: alloc::vec![0x17, 0x02],
        })
    );
    assert_eq!(
        router.route(command(0xf701)),
        Ok(Route::Broadcast {
            state: 0x0701,
            payload: alloc::vec![0xf7, 0x01],
        })
    );
    assert_eq!(
        router.route(command(0x5000)),
        Err(RoutingError::AddressedToWrongSubsystem { code: 0x5000 })
    );

    let payload_router = Router::new(Subsystem::Payload);
    assert_eq!(
        payload_router.route(command(0x1702)),
        Ok(Route::Local(0x1702))
    );
    assert!(matches!(
        payload_router.route(command(0x0701)),
        Ok(Route::Forward {
            subsystem: Subsystem::Obdh,
            ..
        })
    ));
}

#[test]
fn no_command_is_never_dispatched() {
    for local in [Subsystem::Obdh, Subsystem::Payload] {
        let router = Router::new(local);
        assert_eq!(router.route(command(NO_COMMAND)), Ok(Route::NoCommand));
    }

    let mut framer = Framer::new(FramingConfig::payload());
    let packet = framer
        .wrap_user_data(PacketType::Telecommand, &[0xff, 0xff, 0x01])
        .unwrap();
    assert_eq!(
        Router::new(Subsystem::Obdh).route(packet),
        Ok(Route::NoCommand)
    );
    assert_eq!(
        Router::new(Subsystem::Obdh).route(command(0xfffe)),
        Ok(Route::Broadcast {
            state: 0x0ffe,
            payload: alloc::vec![0xff, 0xfe],
        })
    );
}

#[test]
fn routing_ignores_packet_type() {
    let mut framer = Framer::new(FramingConfig::payload());
    let packet = framer
        .wrap_user_data(PacketType::Telemetry, &[0x07, 0x02])
        .unwrap();
    assert_eq!(
        Router::new(Subsystem::Obdh).route(packet),
        Ok(Route::Local(0x0702))
    );
}

#[test]
fn routing_rejects_short_and_invalid_packets() {
    let router = Router::new(Subsystem::Obdh);
    let mut framer = Framer::new(FramingConfig::payload());
    let packet = framer
        .wrap_user_data(PacketType::Telecommand, &[0x07])
        .unwrap();
    assert_eq!(
        router.route(packet),
        Err(RoutingError::MissingCommandCode { length: 1 })
    );

    let mut idle = command(0x0701);
    idle.primary_header_mut().set_apid(Apid::IDLE);
    assert_eq!(router.route(idle), Err(RoutingError::IdlePacket));

    let mut bytes = command(0x0701).serialize().unwrap();
    bytes[0] |= 0b0010_0000;
    let packet = SpacePacket::interpret(&bytes).unwrap();
    assert!(matches!(
        router.route(packet),
        Err(RoutingError::InvalidHeader(_))
    ));
}
