//! Bit-exact codec for the CCSDS 133.0-B-2 primary header, together with the field types
//! stored in it.
//!
//! The header is kept in its wire representation: three big-endian 16-bit words that are
//! read and written through masks. Encoding is therefore a plain byte view of the struct and
//! decoding is a byte copy, so a header can never be out of sync with its serialized form.
//! Field types (`Apid`, `PacketSequenceCount`) validate their bit width when constructed,
//! which means that no setter can silently truncate a value.

use thiserror::Error;
use zerocopy::byteorder::network_endian;
use zerocopy::{ByteEq, FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Representation of the fixed-size primary header of a Space Packet. Every packet sent or
/// received by the on-board software starts with exactly these six bytes.
#[repr(C)]
#[derive(Copy, Clone, ByteEq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Hash)]
pub struct PrimaryHeader {
    packet_identification: network_endian::U16,
    packet_sequence_control: network_endian::U16,
    data_length: network_endian::U16,
}

impl PrimaryHeader {
    /// Size of the primary header in bytes. For the Version 1 CCSDS Packet this is always 6.
    pub const LENGTH: usize = 6;

    /// Returns an empty header: version 1 packet, telemetry, no secondary header, APID 0,
    /// unsegmented, sequence count 0 and a zero packet data length field.
    pub fn new() -> Self {
        let mut header = Self::new_zeroed();
        header.initialize_packet_version();
        header.set_sequence_flag(SequenceFlag::Unsegmented);
        header
    }

    /// Decodes a primary header from the first six bytes of `bytes`. Any bytes past the
    /// header are ignored. Never panics: a short buffer results in
    /// `DecodeError::NotACcsdsSpacePacket`.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        match Self::read_from_prefix(bytes) {
            Ok((header, _)) => Ok(header),
            Err(_) => Err(DecodeError::NotACcsdsSpacePacket {
                length: bytes.len(),
            }),
        }
    }

    /// Encodes the header into its six-byte wire form.
    pub fn encode(&self) -> [u8; Self::LENGTH] {
        let mut bytes = [0u8; Self::LENGTH];
        bytes.copy_from_slice(self.as_bytes());
        bytes
    }

    /// Checks the semantic rules of CCSDS 133.0-B-2 that the bit layout alone cannot
    /// enforce: the version must be one this crate understands, and idle packets may not
    /// carry a secondary header.
    ///
    /// Decoding does not depend on this check; it is applied by consumers that act on packet
    /// contents.
    pub fn validate(&self) -> Result<(), InvalidHeader> {
        let version = self.packet_version();
        if !version.is_supported() {
            return Err(InvalidHeader::UnsupportedPacketVersion { version });
        }

        if self.apid().is_idle() && self.secondary_header_flag() == SecondaryHeaderFlag::Present {
            return Err(InvalidHeader::IdlePacketWithSecondaryHeader);
        }

        Ok(())
    }

    /// Since the Space Packet protocol may technically support alternative packet structures in
    /// future versions, the 3-bit packet version field may not actually contain a "correct" value.
    pub fn packet_version(&self) -> PacketVersionNumber {
        use core::ops::Shr;
        PacketVersionNumber(self.packet_identification.as_bytes()[0].shr(5))
    }

    /// Initializes the packet version to the proper value. Must be a fixed value, so this function
    /// takes no arguments.
    pub fn initialize_packet_version(&mut self) {
        self.packet_identification.as_mut_bytes()[0] &= 0b0001_1111;
        self.packet_identification.as_mut_bytes()[0] |=
            PacketVersionNumber::version1_ccsds_packet().0 << 5;
    }

    /// The packet type denotes whether a packet is a telecommand (request) or telemetry (report)
    /// packet.
    pub fn packet_type(&self) -> PacketType {
        match (self.packet_identification.as_bytes()[0] & 0x10) == 0x10 {
            true => PacketType::Telecommand,
            false => PacketType::Telemetry,
        }
    }

    /// Sets the packet type to the given value.
    pub fn set_packet_type(&mut self, packet_type: PacketType) {
        self.packet_identification.as_mut_bytes()[0] &= 0b1110_1111;
        self.packet_identification.as_mut_bytes()[0] |= (packet_type as u8) << 4;
    }

    /// Denotes whether a secondary header follows the primary header.
    pub fn secondary_header_flag(&self) -> SecondaryHeaderFlag {
        match (self.packet_identification.as_bytes()[0] & 0x08) == 0x08 {
            true => SecondaryHeaderFlag::Present,
            false => SecondaryHeaderFlag::Absent,
        }
    }

    /// Updates the value of the secondary header flag with the provided value.
    pub fn set_secondary_header_flag(&mut self, secondary_header_flag: SecondaryHeaderFlag) {
        self.packet_identification.as_mut_bytes()[0] &= 0b1111_0111;
        self.packet_identification.as_mut_bytes()[0] |= (secondary_header_flag as u8) << 3;
    }

    /// Returns the application process ID stored in the packet. On board, the APID identifies
    /// the packet source (the OBDH or the payload program), not its destination: destinations
    /// are encoded in the user data field.
    pub fn apid(&self) -> Apid {
        Apid(self.packet_identification.get() & Apid::MAX)
    }

    /// Sets the APID to the given value.
    pub fn set_apid(&mut self, apid: Apid) {
        let apid = apid.0.to_be_bytes();
        self.packet_identification.as_mut_bytes()[0] &= 0b1111_1000;
        self.packet_identification.as_mut_bytes()[0] |= apid[0] & 0b0000_0111;
        self.packet_identification.as_mut_bytes()[1] = apid[1];
    }

    /// Sequence flags may be used to indicate that the data contained in a packet is only part of
    /// a larger set of application data.
    pub fn sequence_flag(&self) -> SequenceFlag {
        SequenceFlag::from_bits(self.packet_sequence_control.as_bytes()[0] >> 6)
    }

    /// Sets the sequence flag to the provided value.
    pub fn set_sequence_flag(&mut self, sequence_flag: SequenceFlag) {
        self.packet_sequence_control.as_mut_bytes()[0] &= 0b0011_1111;
        self.packet_sequence_control.as_mut_bytes()[0] |= (sequence_flag as u8) << 6;
    }

    /// The packet sequence count is unique per APID and denotes the sequential binary count of
    /// each Space Packet (generated per APID).
    pub fn packet_sequence_count(&self) -> PacketSequenceCount {
        PacketSequenceCount(self.packet_sequence_control.get() & PacketSequenceCount::MAX)
    }

    /// Sets the packet sequence count to the provided value. This value must be provided by an
    /// external counter, see `SequenceCounters`.
    pub fn set_packet_sequence_count(&mut self, sequence_count: PacketSequenceCount) {
        self.packet_sequence_control.as_mut_bytes()[0] &= 0b1100_0000;
        self.packet_sequence_control.as_mut_bytes()[0] |=
            sequence_count.0.to_be_bytes()[0] & 0b0011_1111;
        self.packet_sequence_control.as_mut_bytes()[1] = sequence_count.0.to_be_bytes()[1];
    }

    /// Raw value of the packet data length field, i.e., the number of bytes following the
    /// primary header minus one.
    pub fn packet_data_length_field(&self) -> u16 {
        self.data_length.get()
    }

    /// Number of bytes that follow the primary header (secondary header plus user data), as
    /// declared by the header.
    pub fn packet_data_length(&self) -> usize {
        self.data_length.get() as usize + 1
    }

    /// Total number of bytes of the packet described by this header, primary header included.
    pub fn packet_length(&self) -> usize {
        self.packet_data_length() + Self::LENGTH
    }

    /// Stores the raw packet data length field. Only the packet model writes this field: it
    /// is derived from the secondary header and user data before every serialization.
    pub(crate) fn set_packet_data_length_field(&mut self, length_count: u16) {
        self.data_length.set(length_count);
    }
}

impl Default for PrimaryHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for PrimaryHeader {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "PrimaryHeader {{ version number: {:?}, packet type: {:?}, secondary header flag: {:?}, APID: {:?}, sequence flags: {:?}, sequence count: {:?}, packet data length: {:?} }}",
            self.packet_version(),
            self.packet_type(),
            self.secondary_header_flag(),
            self.apid(),
            self.sequence_flag(),
            self.packet_sequence_count(),
            self.packet_data_length(),
        )
    }
}

impl core::fmt::Display for PrimaryHeader {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        writeln!(f, "Primary header")?;
        writeln!(f, "  version         : {}", self.packet_version().0)?;
        writeln!(f, "  packet type     : {:?}", self.packet_type())?;
        writeln!(f, "  secondary header: {:?}", self.secondary_header_flag())?;
        writeln!(f, "  APID            : {:#05x}", self.apid().0)?;
        writeln!(f, "  sequence flag   : {:?}", self.sequence_flag())?;
        writeln!(f, "  sequence count  : {}", self.packet_sequence_count().0)?;
        writeln!(f, "  data length     : {}", self.packet_data_length_field())
    }
}

/// Set of errors that may be encountered while decoding a Space Packet from a byte buffer.
#[non_exhaustive]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Error)]
pub enum DecodeError {
    /// The buffer cannot even hold a primary header.
    #[error("not a CCSDS space packet (has {length} bytes, at least 6 are required)")]
    NotACcsdsSpacePacket { length: usize },
    /// The length declared by the primary header does not fit the received bytes, or is too
    /// small to hold the secondary header the packet claims to carry.
    #[error(
        "inconsistent packet length (packet declares {packet_length} bytes, buffer holds {buffer_length})"
    )]
    InconsistentPacketLength {
        packet_length: usize,
        buffer_length: usize,
    },
    /// Fewer bytes remain than a secondary header occupies.
    #[error("secondary header truncated (has {length} bytes, 8 are required)")]
    SecondaryHeaderTruncated { length: usize },
}

/// Semantic violations of CCSDS 133.0-B-2 found in an otherwise decodable primary header.
#[non_exhaustive]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Error)]
pub enum InvalidHeader {
    #[error("unsupported CCSDS Space Packet version: {version:?}")]
    UnsupportedPacketVersion { version: PacketVersionNumber },
    #[error("idle packet contains a secondary header, this is forbidden")]
    IdlePacketWithSecondaryHeader,
}

/// Returned when a value does not fit the bit width of the header field it is meant for.
/// Header fields are validated on construction instead of being truncated on encode.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Error)]
#[error("{field} value {value:#x} exceeds the field maximum of {max:#x}")]
pub struct FieldOverflow {
    pub field: &'static str,
    pub value: u32,
    pub max: u32,
}

/// The packet version number represents the version of the Space Packet protocol that is used. In
/// the version presently implemented, this is defined to be zeroes.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct PacketVersionNumber(u8);

impl PacketVersionNumber {
    /// Only the Version 1 CCSDS Packet, indicated by a version number of 0, is supported.
    pub fn is_supported(&self) -> bool {
        matches!(self.0, 0b0000_0000u8)
    }

    /// Returns the packet version number corresponding with the Version 1 CCSDS Packet.
    pub fn version1_ccsds_packet() -> Self {
        Self(0)
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

/// The packet type denotes whether a packet is a telecommand (request) or telemetry (report)
/// packet.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(kani, derive(kani::Arbitrary))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PacketType {
    Telemetry = 0,
    Telecommand = 1,
}

/// Denotes whether the packet contains a secondary header.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(kani, derive(kani::Arbitrary))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SecondaryHeaderFlag {
    Absent = 0,
    Present = 1,
}

/// Application process ID: an 11-bit tag identifying the logical source or category of a
/// packet.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u16", into = "u16"))]
pub struct Apid(u16);

impl Apid {
    pub const MAX: u16 = 0b0000_0111_1111_1111u16;

    /// A special APID value (0x7ff) is reserved for idle Space Packets, i.e., packets that do not
    /// carry any actual data.
    pub const IDLE: Apid = Apid(Self::MAX);

    /// Validates that `id` fits in 11 bits.
    pub fn new(id: u16) -> Result<Self, FieldOverflow> {
        if id > Self::MAX {
            return Err(FieldOverflow {
                field: "APID",
                value: id as u32,
                max: Self::MAX as u32,
            });
        }
        Ok(Self(id))
    }

    /// Builds an APID for a constant. Evaluated in a `const` item, an out-of-range value is a
    /// compile-time error.
    pub const fn constant(id: u16) -> Self {
        assert!(id <= Self::MAX, "APIDs may not exceed 2047 (11 bits)");
        Self(id)
    }

    /// Helper functions used during formal verification to create an APID that is actually within
    /// the stated bounds, since we cannot use the type system to express this range.
    #[cfg(kani)]
    pub(crate) fn any_apid() -> Self {
        match kani::any() {
            any @ 0..=Self::MAX => Self(any),
            _ => Self(42),
        }
    }

    pub const fn value(&self) -> u16 {
        self.0
    }

    /// True for the APID reserved for idle packets.
    pub fn is_idle(&self) -> bool {
        *self == Self::IDLE
    }
}

impl TryFrom<u16> for Apid {
    type Error = FieldOverflow;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Apid> for u16 {
    fn from(value: Apid) -> Self {
        value.0
    }
}

/// Sequence flags may be used to indicate that the data contained in a packet is only part of
/// a larger set of application data. The on-board software only ever sends unsegmented packets.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
#[cfg_attr(kani, derive(kani::Arbitrary))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SequenceFlag {
    Continuation = 0b00,
    First = 0b01,
    Last = 0b10,
    #[default]
    Unsegmented = 0b11,
}

impl SequenceFlag {
    /// Interprets the two least significant bits of `bits`.
    pub(crate) fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => SequenceFlag::Continuation,
            0b01 => SequenceFlag::First,
            0b10 => SequenceFlag::Last,
            _ => SequenceFlag::Unsegmented,
        }
    }
}

/// The packet sequence count is unique per APID and denotes the sequential binary count of
/// each Space Packet (generated per APID).
#[derive(Copy, Clone, PartialEq, Eq, Ord, PartialOrd, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u16", into = "u16"))]
pub struct PacketSequenceCount(u16);

impl PacketSequenceCount {
    pub const MAX: u16 = 0b0011_1111_1111_1111u16;

    /// Validates that `count` fits in 14 bits.
    pub fn new(count: u16) -> Result<Self, FieldOverflow> {
        if count > Self::MAX {
            return Err(FieldOverflow {
                field: "packet sequence count",
                value: count as u32,
                max: Self::MAX as u32,
            });
        }
        Ok(Self(count))
    }

    /// See `Apid::constant`.
    pub const fn constant(count: u16) -> Self {
        assert!(count <= Self::MAX, "sequence counts may not exceed 16383 (14 bits)");
        Self(count)
    }

    /// Helper functions used during formal verification to create a packet sequence count that is
    /// actually within the stated bounds.
    #[cfg(kani)]
    pub(crate) fn any_packet_sequence_count() -> Self {
        match kani::any() {
            any @ 0..=Self::MAX => Self(any),
            _ => Self(42),
        }
    }

    pub const fn value(&self) -> u16 {
        self.0
    }

    /// Wrapping increment: the count that follows 16383 is 0.
    pub fn increment(&mut self) {
        self.0 += 1;
        if self.0 > Self::MAX {
            self.0 = 0;
        }
    }
}

impl TryFrom<u16> for PacketSequenceCount {
    type Error = FieldOverflow;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PacketSequenceCount> for u16 {
    fn from(value: PacketSequenceCount) -> Self {
        value.0
    }
}

/// Test harness for formal verification.
#[cfg(kani)]
mod kani_harness {
    use super::*;
    use ::kani;

    /// Every six-byte pattern decodes into a header whose fields are within their bounds and
    /// whose encoding reproduces the input.
    #[kani::proof]
    fn header_decoding() {
        let bytes: [u8; 6] = kani::any();
        let header = PrimaryHeader::decode(&bytes).unwrap();
        assert!(header.apid().0 <= Apid::MAX);
        assert!(header.packet_sequence_count().0 <= PacketSequenceCount::MAX);
        assert_eq!(header.encode(), bytes);
    }

    /// Setting any valid field value never disturbs the other fields.
    #[kani::proof]
    fn header_setters() {
        let packet_type = kani::any();
        let secondary_header_flag = kani::any();
        let apid = Apid::any_apid();
        let sequence_flag = kani::any();
        let sequence_count = PacketSequenceCount::any_packet_sequence_count();

        let mut header = PrimaryHeader::new();
        header.set_packet_type(packet_type);
        header.set_secondary_header_flag(secondary_header_flag);
        header.set_apid(apid);
        header.set_sequence_flag(sequence_flag);
        header.set_packet_sequence_count(sequence_count);

        assert!(header.packet_version().is_supported());
        assert_eq!(header.packet_type(), packet_type);
        assert_eq!(header.secondary_header_flag(), secondary_header_flag);
        assert_eq!(header.apid(), apid);
        assert_eq!(header.sequence_flag(), sequence_flag);
        assert_eq!(header.packet_sequence_count(), sequence_count);
    }
}

/// Decoding of a relatively trivial header. Used to verify that the bit positions of all fields
/// are correct.
#[test]
fn decode_trivial_header() {
    let bytes = &[
        0b0000_1001u8,
        0b1010_1011u8,
        0b1100_0000u8,
        0b0000_0001u8,
        0b0000_0000u8,
        0b0000_0001u8,
    ];
    let header = PrimaryHeader::decode(bytes).unwrap();

    assert_eq!(
        header.packet_version(),
        PacketVersionNumber::version1_ccsds_packet()
    );
    assert_eq!(header.packet_type(), PacketType::Telemetry);
    assert_eq!(header.secondary_header_flag(), SecondaryHeaderFlag::Present);
    assert_eq!(header.apid(), Apid::new(0x1ab).unwrap());
    assert_eq!(header.sequence_flag(), SequenceFlag::Unsegmented);
    assert_eq!(header.packet_sequence_count(), PacketSequenceCount(1));
    assert_eq!(header.packet_data_length(), 2);
    assert_eq!(header.packet_length(), 8);
}

/// Encoding of a header with every field set to a distinguishable value.
#[test]
fn encode_header_bit_layout() {
    let mut header = PrimaryHeader::new();
    header.set_packet_type(PacketType::Telecommand);
    header.set_secondary_header_flag(SecondaryHeaderFlag::Absent);
    header.set_apid(Apid::new(0x7fe).unwrap());
    header.set_sequence_flag(SequenceFlag::First);
    header.set_packet_sequence_count(PacketSequenceCount::new(0x2abc).unwrap());
    header.set_packet_data_length_field(0x0102);

    assert_eq!(header.encode(), [0x17, 0xfe, 0x6a, 0xbc, 0x01, 0x02]);
}

#[test]
fn decode_requires_six_bytes() {
    for length in 0..PrimaryHeader::LENGTH {
        let bytes = [0xffu8; 6];
        assert_eq!(
            PrimaryHeader::decode(&bytes[..length]),
            Err(DecodeError::NotACcsdsSpacePacket { length })
        );
    }
}

#[test]
fn field_overflow_is_reported() {
    assert_eq!(
        Apid::new(0x80b),
        Err(FieldOverflow {
            field: "APID",
            value: 0x80b,
            max: 0x7ff
        })
    );
    assert!(Apid::new(Apid::MAX).is_ok());
    assert!(PacketSequenceCount::new(0x4000).is_err());
    assert!(PacketSequenceCount::new(PacketSequenceCount::MAX).is_ok());
}

#[test]
fn sequence_count_wraps() {
    let mut count = PacketSequenceCount::new(PacketSequenceCount::MAX).unwrap();
    count.increment();
    assert_eq!(count, PacketSequenceCount::default());
}

#[test]
fn idle_packet_with_secondary_header_is_invalid() {
    let mut header = PrimaryHeader::new();
    header.set_apid(Apid::IDLE);
    assert_eq!(header.validate(), Ok(()));
    header.set_secondary_header_flag(SecondaryHeaderFlag::Present);
    assert_eq!(
        header.validate(),
        Err(InvalidHeader::IdlePacketWithSecondaryHeader)
    );

    let mut bytes = PrimaryHeader::new().encode();
    bytes[0] |= 0b0010_0000;
    let header = PrimaryHeader::decode(&bytes).unwrap();
    assert!(matches!(
        header.validate(),
        Err(InvalidHeader::UnsupportedPacketVersion { .. })
    ));
}

/// Roundtrip of all header fields through encoding and decoding, for 10,000 random headers.
#[test]
fn roundtrip() {
    use rand::{RngCore, SeedableRng};
    // Note that we always use the same seed for reproducibility.
    let mut rng = rand::rngs::SmallRng::seed_from_u64(42);
    for _ in 0..10_000 {
        let packet_type = match rng.next_u32() & 1 {
            0 => PacketType::Telemetry,
            _ => PacketType::Telecommand,
        };
        let secondary_header_flag = match rng.next_u32() & 1 {
            0 => SecondaryHeaderFlag::Absent,
            _ => SecondaryHeaderFlag::Present,
        };
        let apid = Apid::new((rng.next_u32() & Apid::MAX as u32) as u16).unwrap();
        let sequence_flag = SequenceFlag::from_bits(rng.next_u32() as u8);
        let sequence_count =
            PacketSequenceCount::new((rng.next_u32() & PacketSequenceCount::MAX as u32) as u16)
                .unwrap();
        let length_count = rng.next_u32() as u16;

        let mut header = PrimaryHeader::new();
        header.set_packet_type(packet_type);
        header.set_secondary_header_flag(secondary_header_flag);
        header.set_apid(apid);
        header.set_sequence_flag(sequence_flag);
        header.set_packet_sequence_count(sequence_count);
        header.set_packet_data_length_field(length_count);

        let decoded = PrimaryHeader::decode(&header.encode()).unwrap();
        assert_eq!(decoded, header, "header did not survive roundtrip: {header:?}");
        assert_eq!(decoded.packet_type(), packet_type);
        assert_eq!(decoded.secondary_header_flag(), secondary_header_flag);
        assert_eq!(decoded.apid(), apid);
        assert_eq!(decoded.sequence_flag(), sequence_flag);
        assert_eq!(decoded.packet_sequence_count(), sequence_count);
        assert_eq!(decoded.packet_data_length_field(), length_count);
    }
}
