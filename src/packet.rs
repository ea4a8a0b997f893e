//! Owned Space Packet model: primary header, optional secondary header and user data field,
//! serialized and interpreted as one unit.

use alloc::vec::Vec;
use thiserror::Error;

use crate::header::{
    Apid, DecodeError, PacketSequenceCount, PacketType, PrimaryHeader, SecondaryHeaderFlag,
    SequenceFlag,
};
use crate::secondary::SecondaryHeader;

/// Number of user data bytes shown by the `Display` dump before it is cut short.
const MAX_BYTES_DUMPED: usize = 32;

/// A Space Packet as built by the framing layer or received from a transport.
///
/// The packet owns its secondary header even when the primary header flags it as absent; in
/// that case it is neither serialized nor compared, so two packets are equal exactly when
/// their serializations are. The packet data length field of the primary header
/// is derived from the secondary header and user data: it is recomputed whenever the user
/// data is replaced and again on every serialization, so callers never set it themselves.
#[derive(Clone, Default)]
pub struct SpacePacket {
    primary_header: PrimaryHeader,
    secondary_header: SecondaryHeader,
    user_data: Vec<u8>,
}

impl SpacePacket {
    /// Largest packet data field a 16-bit length count can describe.
    pub const MAX_DATA_FIELD_LENGTH: usize = u16::MAX as usize + 1;

    /// Constructs an empty packet: default primary header, zeroed secondary header (marked
    /// absent) and no user data.
    pub fn new() -> Self {
        Self::default()
    }

    /// Interprets `bytes` as a Space Packet.
    ///
    /// The buffer may be longer than the packet it contains: transports such as CAN-FD pad
    /// their frames, so bytes beyond the length declared by the primary header are ignored.
    /// A buffer shorter than the declared length, or a declared length too small for the
    /// secondary header the packet claims to carry, is rejected.
    pub fn interpret(bytes: &[u8]) -> Result<Self, DecodeError> {
        let primary_header = PrimaryHeader::decode(bytes)?;

        let packet_length = primary_header.packet_length();
        if bytes.len() < packet_length {
            return Err(DecodeError::InconsistentPacketLength {
                packet_length,
                buffer_length: bytes.len(),
            });
        }
        let packet_bytes = &bytes[PrimaryHeader::LENGTH..packet_length];

        match primary_header.secondary_header_flag() {
            SecondaryHeaderFlag::Absent => Ok(Self {
                primary_header,
                secondary_header: SecondaryHeader::new(),
                user_data: packet_bytes.to_vec(),
            }),
            SecondaryHeaderFlag::Present => {
                if packet_bytes.len() < SecondaryHeader::LENGTH {
                    return Err(DecodeError::InconsistentPacketLength {
                        packet_length,
                        buffer_length: bytes.len(),
                    });
                }
                let secondary_header = SecondaryHeader::decode(packet_bytes)?;
                Ok(Self {
                    primary_header,
                    secondary_header,
                    user_data: packet_bytes[secondary_header.length()..].to_vec(),
                })
            }
        }
    }

    /// Serializes the packet. The packet data length field is recomputed first, so the stored
    /// header reflects the returned bytes afterwards. Serializing an unmodified packet twice
    /// yields identical bytes.
    pub fn serialize(&mut self) -> Result<Vec<u8>, EncodeError> {
        self.update_packet_data_length()?;

        let mut bytes = Vec::with_capacity(self.packet_length());
        bytes.extend_from_slice(&self.primary_header.encode());
        if self.has_secondary_header() {
            bytes.extend_from_slice(&self.secondary_header.encode());
        }
        bytes.extend_from_slice(&self.user_data);
        Ok(bytes)
    }

    /// Replaces the user data field and immediately recomputes the packet data length. On
    /// error the packet is left untouched.
    pub fn set_user_data(&mut self, user_data: impl Into<Vec<u8>>) -> Result<(), EncodeError> {
        let user_data = user_data.into();
        let length_count = length_count(self.secondary_header_length() + user_data.len())?;
        self.user_data = user_data;
        self.primary_header.set_packet_data_length_field(length_count);
        Ok(())
    }

    /// Recomputes the packet data length field from the current secondary header flag and
    /// user data.
    pub fn update_packet_data_length(&mut self) -> Result<(), EncodeError> {
        let length_count = length_count(self.secondary_header_length() + self.user_data.len())?;
        self.primary_header.set_packet_data_length_field(length_count);
        Ok(())
    }

    /// Attaches `secondary_header` and flags it as present. `None` flags the secondary header
    /// as absent and resets the stored one.
    pub fn set_secondary_header(&mut self, secondary_header: Option<SecondaryHeader>) {
        match secondary_header {
            Some(secondary_header) => {
                self.secondary_header = secondary_header;
                self.primary_header
                    .set_secondary_header_flag(SecondaryHeaderFlag::Present);
            }
            None => {
                self.secondary_header = SecondaryHeader::new();
                self.primary_header
                    .set_secondary_header_flag(SecondaryHeaderFlag::Absent);
            }
        }
    }

    /// The primary header. Its packet data length field is only current after `set_user_data`
    /// or `serialize`.
    pub fn primary_header(&self) -> &PrimaryHeader {
        &self.primary_header
    }

    pub fn primary_header_mut(&mut self) -> &mut PrimaryHeader {
        &mut self.primary_header
    }

    /// The secondary header as stored in memory. Only meaningful when
    /// `has_secondary_header()` holds.
    pub fn secondary_header(&self) -> &SecondaryHeader {
        &self.secondary_header
    }

    /// Edits the secondary header in place. Edits to an absent header are not serialized.
    pub fn secondary_header_mut(&mut self) -> &mut SecondaryHeader {
        &mut self.secondary_header
    }

    /// The user data field, without any secondary header.
    pub fn user_data(&self) -> &[u8] {
        &self.user_data
    }

    /// Consumes the packet, keeping only its user data field.
    pub fn into_user_data(self) -> Vec<u8> {
        self.user_data
    }

    /// Whether the primary header flags a secondary header.
    pub fn has_secondary_header(&self) -> bool {
        self.primary_header.secondary_header_flag() == SecondaryHeaderFlag::Present
    }

    /// Serialized length of the secondary header: zero when it is absent.
    pub fn secondary_header_length(&self) -> usize {
        match self.has_secondary_header() {
            true => self.secondary_header.length(),
            false => 0,
        }
    }

    /// Total serialized length of the packet, primary header included.
    pub fn packet_length(&self) -> usize {
        PrimaryHeader::LENGTH + self.secondary_header_length() + self.user_data.len()
    }

    pub fn packet_type(&self) -> PacketType {
        self.primary_header.packet_type()
    }

    pub fn apid(&self) -> Apid {
        self.primary_header.apid()
    }

    pub fn packet_sequence_count(&self) -> PacketSequenceCount {
        self.primary_header.packet_sequence_count()
    }

    pub fn is_telecommand(&self) -> bool {
        self.packet_type() == PacketType::Telecommand
    }

    pub fn is_telemetry(&self) -> bool {
        self.packet_type() == PacketType::Telemetry
    }

    /// Idle packets carry the reserved APID 0x7FF and no meaningful data.
    pub fn is_idle(&self) -> bool {
        self.apid().is_idle()
    }

    /// True for any packet that is part of a segmented set of application data.
    pub fn is_segmented(&self) -> bool {
        !self.is_unsegmented()
    }

    pub fn is_unsegmented(&self) -> bool {
        self.primary_header.sequence_flag() == SequenceFlag::Unsegmented
    }

    pub fn is_first_segment(&self) -> bool {
        self.primary_header.sequence_flag() == SequenceFlag::First
    }

    pub fn is_continuation_segment(&self) -> bool {
        self.primary_header.sequence_flag() == SequenceFlag::Continuation
    }

    pub fn is_last_segment(&self) -> bool {
        self.primary_header.sequence_flag() == SequenceFlag::Last
    }
}

/// Computes the value stored in the packet data length field for a data field of `length`
/// bytes.
fn length_count(length: usize) -> Result<u16, EncodeError> {
    match length {
        0 => Err(EncodeError::EmptyDataField),
        length if length > SpacePacket::MAX_DATA_FIELD_LENGTH => {
            Err(EncodeError::DataFieldTooLarge { length })
        }
        length => Ok((length - 1) as u16),
    }
}

impl PartialEq for SpacePacket {
    fn eq(&self, other: &Self) -> bool {
        self.primary_header == other.primary_header
            && (!self.has_secondary_header() || self.secondary_header == other.secondary_header)
            && self.user_data == other.user_data
    }
}

impl Eq for SpacePacket {}

impl core::hash::Hash for SpacePacket {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.primary_header.hash(state);
        if self.has_secondary_header() {
            self.secondary_header.hash(state);
        }
        self.user_data.hash(state);
    }
}

impl core::fmt::Debug for SpacePacket {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.has_secondary_header() {
            true => write!(
                f,
                "SpacePacket {{ primary header: {:?}, secondary header: {:?}, user data: {:02x?} }}",
                self.primary_header, self.secondary_header, self.user_data,
            ),
            false => write!(
                f,
                "SpacePacket {{ primary header: {:?}, user data: {:02x?} }}",
                self.primary_header, self.user_data,
            ),
        }
    }
}

/// Human-readable dump. The user data preview is cut after `MAX_BYTES_DUMPED` bytes.
impl core::fmt::Display for SpacePacket {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        writeln!(f, "---------------------------------")?;
        writeln!(f, "SpacePacket")?;
        writeln!(f, "---------------------------------")?;
        write!(f, "{}", self.primary_header)?;
        match self.has_secondary_header() {
            true => write!(f, "{}", self.secondary_header)?,
            false => writeln!(f, "No secondary header")?,
        }

        let length = self.user_data.len();
        if length == 0 {
            return writeln!(f, "No user data field");
        }
        let unit = if length < 2 { "byte" } else { "bytes" };
        writeln!(f, "User data field has {length} {unit}")?;
        for (index, byte) in self.user_data.iter().take(MAX_BYTES_DUMPED).enumerate() {
            if index != 0 {
                write!(f, " ")?;
            }
            write!(f, "0x{byte:02x}")?;
        }
        if length > MAX_BYTES_DUMPED {
            write!(f, " ... (total size = {length} entries)")?;
        }
        writeln!(f)
    }
}

/// Set of errors that may be encountered while serializing a Space Packet.
#[non_exhaustive]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Error)]
pub enum EncodeError {
    /// As per the CCSDS standard, Space Packets shall have at least one byte in their data field.
    #[error("empty data field requested, this is forbidden")]
    EmptyDataField,
    #[error("packet data field of {length} bytes exceeds the maximum of 65536 bytes")]
    DataFieldTooLarge { length: usize },
}

/// Test harness for formal verification.
#[cfg(kani)]
mod kani_harness {
    use super::*;
    use ::kani;

    /// Interpretation of any 24-byte buffer never panics, and every accepted packet satisfies
    /// the packet data length invariant.
    #[kani::proof]
    #[kani::unwind(26)]
    fn packet_interpretation() {
        let bytes: [u8; 24] = kani::any();
        if let Ok(packet) = SpacePacket::interpret(&bytes) {
            assert!(packet.packet_length() <= bytes.len());
            assert_eq!(
                packet.primary_header().packet_data_length(),
                packet.secondary_header_length() + packet.user_data().len()
            );
        }
    }
}

/// Builds the packet used throughout the tests below: a payload status report without
/// secondary header.
#[cfg(test)]
fn status_packet(code: u16) -> SpacePacket {
    let mut packet = SpacePacket::new();
    packet.primary_header_mut().set_apid(Apid::new(0x1ab).unwrap());
    packet
        .primary_header_mut()
        .set_packet_sequence_count(PacketSequenceCount::new(1).unwrap());
    packet.set_user_data(code.to_be_bytes()).unwrap();
    packet
}

/// Serialization of a status report without secondary header. Used to verify the complete wire
/// layout of the smallest packet the on-board software sends.
#[test]
fn serialize_status_packet() {
    let mut packet = status_packet(0x1040);
    let bytes = packet.serialize().unwrap();

    assert_eq!(bytes, [0x01, 0xab, 0xc0, 0x01, 0x00, 0x01, 0x10, 0x40]);
    assert_eq!(packet.primary_header().packet_data_length_field(), 1);

    let decoded = SpacePacket::interpret(&bytes).unwrap();
    assert_eq!(decoded.packet_type(), PacketType::Telemetry);
    assert!(!decoded.has_secondary_header());
    assert_eq!(decoded.user_data(), &[0x10, 0x40]);
    assert_eq!(decoded, packet);
}

#[test]
fn serialize_with_secondary_header() {
    use crate::secondary::{AduChannelId, AduChannelUsage};

    let mut secondary_header = SecondaryHeader::new();
    secondary_header.set_adu_channel_usage(AduChannelUsage::Used);
    secondary_header.set_adu_channel_id(AduChannelId::new(3).unwrap());
    secondary_header.set_adu_segment_flag(SequenceFlag::Unsegmented);

    let mut packet = status_packet(0x0702);
    packet.set_secondary_header(Some(secondary_header));
    let bytes = packet.serialize().unwrap();

    assert_eq!(bytes.len(), 16);
    assert_eq!(bytes[0], 0x09);
    assert_eq!(&bytes[4..6], &[0x00, 0x09]);
    assert_eq!(&bytes[6..14], &[0x00, 0x83, 0xc0, 0x00, 0x00, 0x00, 0x00, 0x00]);
    assert_eq!(&bytes[14..], &[0x07, 0x02]);

    let decoded = SpacePacket::interpret(&bytes).unwrap();
    assert_eq!(decoded.secondary_header(), &secondary_header);
    assert_eq!(decoded.user_data(), &[0x07, 0x02]);
}

/// Packets compare by what goes on the wire: a secondary header that was attached and then
/// removed, or edited while absent, leaves no trace.
#[test]
fn absent_secondary_header_is_not_compared() {
    let mut attached = SecondaryHeader::new();
    attached.set_category(5);

    let mut packet = status_packet(0x0702);
    packet.set_secondary_header(Some(attached));
    packet.set_secondary_header(None);
    assert_eq!(packet.secondary_header(), &SecondaryHeader::new());
    assert_eq!(packet, status_packet(0x0702));

    let mut edited = status_packet(0x0702);
    edited.secondary_header_mut().set_category(9);
    assert_eq!(edited, status_packet(0x0702));
    assert_eq!(
        edited.serialize().unwrap(),
        status_packet(0x0702).serialize().unwrap()
    );

    let mut present = status_packet(0x0702);
    present.set_secondary_header(Some(attached));
    let mut other = status_packet(0x0702);
    other.set_secondary_header(Some(SecondaryHeader::new()));
    assert_ne!(present, other);
}

#[test]
fn serialize_is_idempotent() {
    let mut packet = status_packet(0x17ff);
    let first = packet.serialize().unwrap();
    let second = packet.serialize().unwrap();
    assert_eq!(first, second);
}

/// The length field follows changes made after the user data was set, such as attaching a
/// secondary header.
#[test]
fn serialize_recomputes_packet_data_length() {
    let mut packet = status_packet(0x0001);
    assert_eq!(packet.primary_header().packet_data_length(), 2);
    packet.set_secondary_header(Some(SecondaryHeader::new()));
    assert_eq!(packet.primary_header().packet_data_length(), 2);

    let bytes = packet.serialize().unwrap();
    assert_eq!(packet.primary_header().packet_data_length(), 10);
    assert_eq!(
        PrimaryHeader::decode(&bytes).unwrap().packet_data_length_field(),
        9
    );
}

#[test]
fn interpret_too_short_for_primary_header() {
    let bytes = status_packet(0x1040).serialize().unwrap();
    for length in 0..PrimaryHeader::LENGTH {
        assert_eq!(
            SpacePacket::interpret(&bytes[..length]),
            Err(DecodeError::NotACcsdsSpacePacket { length })
        );
    }
}

#[test]
fn interpret_partial_packet() {
    let bytes = status_packet(0x1040).serialize().unwrap();
    for length in PrimaryHeader::LENGTH..bytes.len() {
        assert_eq!(
            SpacePacket::interpret(&bytes[..length]),
            Err(DecodeError::InconsistentPacketLength {
                packet_length: 8,
                buffer_length: length
            })
        );
    }
}

/// A packet occupying 10 bytes of a 64-byte CAN-FD frame decodes, the padding is ignored.
#[test]
fn interpret_ignores_trailing_bytes() {
    let mut packet = SpacePacket::new();
    packet.set_user_data([1, 2, 3, 4]).unwrap();
    let bytes = packet.serialize().unwrap();
    assert_eq!(bytes.len(), 10);

    let mut frame = [0xa5u8; 64];
    frame[..bytes.len()].copy_from_slice(&bytes);
    let decoded = SpacePacket::interpret(&frame).unwrap();
    assert_eq!(decoded.user_data(), &[1, 2, 3, 4]);
    assert_eq!(decoded.packet_length(), 10);
}

/// A packet that flags a secondary header but declares a data field shorter than that header
/// is structurally broken, even if the buffer holds enough bytes.
#[test]
fn interpret_secondary_header_beyond_declared_length() {
    let mut bytes = [0u8; 16];
    bytes[0] = 0x08;
    bytes[2] = 0xc0;
    bytes[5] = 0x03;
    assert_eq!(
        SpacePacket::interpret(&bytes),
        Err(DecodeError::InconsistentPacketLength {
            packet_length: 10,
            buffer_length: 16
        })
    );
}

#[test]
fn empty_data_field_is_rejected() {
    let mut packet = SpacePacket::new();
    assert_eq!(packet.serialize(), Err(EncodeError::EmptyDataField));
    assert_eq!(packet.set_user_data(Vec::new()), Err(EncodeError::EmptyDataField));

    packet.set_secondary_header(Some(SecondaryHeader::new()));
    assert_eq!(packet.serialize().unwrap().len(), 14);
}

#[test]
fn oversized_data_field_is_rejected() {
    let mut packet = status_packet(0x0001);
    let result = packet.set_user_data(alloc::vec![0u8; SpacePacket::MAX_DATA_FIELD_LENGTH + 1]);
    assert_eq!(
        result,
        Err(EncodeError::DataFieldTooLarge { length: 65537 })
    );
    assert_eq!(packet.user_data(), &[0x00, 0x01]);

    packet
        .set_user_data(alloc::vec![0u8; SpacePacket::MAX_DATA_FIELD_LENGTH])
        .unwrap();
    assert_eq!(packet.primary_header().packet_data_length_field(), u16::MAX);
}

#[test]
fn display_truncates_user_data() {
    use alloc::string::ToString;

    let mut packet = SpacePacket::new();
    packet.set_user_data(alloc::vec![0xabu8; 40]).unwrap();
    let dump = packet.to_string();

    assert!(dump.contains("No secondary header"));
    assert!(dump.contains("User data field has 40 bytes"));
    assert_eq!(dump.matches("0xab").count(), 32);
    assert!(dump.contains("(total size = 40 entries)"));
}

/// Roundtrip serialization and subsequent interpretation of Space Packets shall reproduce all
/// header fields and the user data for any valid input. We test this on 2,000 random packets,
/// half of them carrying a secondary header.
#[test]
fn roundtrip() {
    use crate::secondary::{AduChannelId, AduChannelUsage, AduCount};
    use rand::{RngCore, SeedableRng};
    // Note that we always use the same seed for reproducibility.
    let mut rng = rand::rngs::SmallRng::seed_from_u64(42);
    for _ in 0..2_000 {
        let mut packet = SpacePacket::new();
        let header = packet.primary_header_mut();
        header.set_packet_type(match rng.next_u32() & 1 {
            0 => PacketType::Telemetry,
            _ => PacketType::Telecommand,
        });
        header.set_apid(Apid::new((rng.next_u32() & Apid::MAX as u32) as u16).unwrap());
        header.set_sequence_flag(SequenceFlag::from_bits(rng.next_u32() as u8));
        header.set_packet_sequence_count(
            PacketSequenceCount::new((rng.next_u32() & PacketSequenceCount::MAX as u32) as u16)
                .unwrap(),
        );

        if rng.next_u32() & 1 == 1 {
            let mut secondary_header = SecondaryHeader::new();
            secondary_header.set_category(rng.next_u32() as u8);
            secondary_header.set_adu_channel_usage(AduChannelUsage::Used);
            secondary_header.set_adu_channel_id(
                AduChannelId::new((rng.next_u32() & AduChannelId::MAX as u32) as u8).unwrap(),
            );
            secondary_header.set_adu_segment_flag(SequenceFlag::from_bits(rng.next_u32() as u8));
            let adu_count = (rng.next_u32() & AduCount::MAX as u32) as u16;
            secondary_header.set_adu_count(AduCount::new(adu_count).unwrap());
            secondary_header.set_time(rng.next_u32().to_be_bytes());
            packet.set_secondary_header(Some(secondary_header));
        }

        let mut user_data = alloc::vec![0u8; 1 + (rng.next_u32() % 1024) as usize];
        rng.fill_bytes(&mut user_data);
        packet.set_user_data(user_data).unwrap();

        let bytes = packet.serialize().unwrap();
        assert_eq!(bytes.len(), packet.packet_length());
        let decoded = SpacePacket::interpret(&bytes).unwrap();

        assert_eq!(
            decoded.primary_header(),
            packet.primary_header(),
            "primary header did not survive roundtrip for packet ({packet:?})"
        );
        if packet.has_secondary_header() {
            assert_eq!(decoded.secondary_header(), packet.secondary_header());
        }
        assert_eq!(decoded.user_data(), packet.user_data());
        assert_eq!(
            decoded.primary_header().packet_data_length(),
            packet.secondary_header_length() + packet.user_data().len()
        );
    }
}
