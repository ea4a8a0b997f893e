//! Secondary header carried by OBDH telemetry: category, ADU channel information and a 4-byte
//! absolute time stamp.
//!
//! The layout is fixed at 8 bytes so that its length can be known before its content is
//! decoded:
//!
//! | Byte | Content                                                  |
//! |------|----------------------------------------------------------|
//! | 0    | category                                                 |
//! | 1    | ADU channel usage flag (bit 7), ADU channel ID (bits 6-0)|
//! | 2-3  | ADU segmentation flag (2 bits), ADU count (14 bits)      |
//! | 4-7  | absolute time                                            |

use crate::header::{DecodeError, FieldOverflow, SequenceFlag};
use zerocopy::byteorder::network_endian;
use zerocopy::{ByteEq, FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Fixed 8-byte secondary header of the on-board packets: category, ADU channel, ADU
/// segmentation and a 4-byte time stamp.
#[repr(C)]
#[derive(Copy, Clone, ByteEq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Hash)]
pub struct SecondaryHeader {
    category: u8,
    adu_channel: u8,
    adu_control: network_endian::U16,
    time: [u8; 4],
}

impl SecondaryHeader {
    /// Serialized size in bytes, independent of the header content.
    pub const LENGTH: usize = 8;

    /// All-zero secondary header: category 0, ADU channel unused, continuation segment, count
    /// 0, time 0.
    pub fn new() -> Self {
        Self::new_zeroed()
    }

    /// Length of this header once serialized. Always `SecondaryHeader::LENGTH`; exposed on the
    /// value so that the packet model can locate the user data field without decoding.
    pub fn length(&self) -> usize {
        Self::LENGTH
    }

    /// Decodes a secondary header from the start of `bytes`. Trailing bytes are left to the
    /// caller.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        match Self::read_from_prefix(bytes) {
            Ok((header, _)) => Ok(header),
            Err(_) => Err(DecodeError::SecondaryHeaderTruncated {
                length: bytes.len(),
            }),
        }
    }

    /// The header as it appears on the wire.
    pub fn encode(&self) -> [u8; Self::LENGTH] {
        let mut bytes = [0u8; Self::LENGTH];
        bytes.copy_from_slice(self.as_bytes());
        bytes
    }

    /// Packet category, opaque to the link layer.
    pub fn category(&self) -> u8 {
        self.category
    }

    pub fn set_category(&mut self, category: u8) {
        self.category = category;
    }

    /// Whether the ADU channel fields carry meaning.
    pub fn adu_channel_usage(&self) -> AduChannelUsage {
        match self.adu_channel & 0x80 == 0x80 {
            true => AduChannelUsage::Used,
            false => AduChannelUsage::NotUsed,
        }
    }

    /// Sets the usage bit without touching the channel ID.
    pub fn set_adu_channel_usage(&mut self, usage: AduChannelUsage) {
        self.adu_channel &= 0b0111_1111;
        self.adu_channel |= (usage as u8) << 7;
    }

    /// 7-bit channel identifier of the application data unit.
    pub fn adu_channel_id(&self) -> AduChannelId {
        AduChannelId(self.adu_channel & AduChannelId::MAX)
    }

    /// Sets the channel ID without touching the usage bit.
    pub fn set_adu_channel_id(&mut self, id: AduChannelId) {
        self.adu_channel &= 0b1000_0000;
        self.adu_channel |= id.0;
    }

    /// Segmentation state of the application data unit. Uses the same two-bit encoding as the
    /// primary header sequence flag.
    pub fn adu_segment_flag(&self) -> SequenceFlag {
        SequenceFlag::from_bits(self.adu_control.as_bytes()[0] >> 6)
    }

    pub fn set_adu_segment_flag(&mut self, flag: SequenceFlag) {
        self.adu_control.as_mut_bytes()[0] &= 0b0011_1111;
        self.adu_control.as_mut_bytes()[0] |= (flag as u8) << 6;
    }

    /// 14-bit count of the application data unit, next to the segment flag.
    pub fn adu_count(&self) -> AduCount {
        AduCount(self.adu_control.get() & AduCount::MAX)
    }

    /// Sets the count, preserving the segment flag.
    pub fn set_adu_count(&mut self, count: AduCount) {
        let flag = self.adu_control.get() & !AduCount::MAX;
        self.adu_control.set(flag | count.0);
    }

    /// Absolute time, kept as the four opaque bytes the on-board clock provides.
    pub fn time(&self) -> [u8; 4] {
        self.time
    }

    pub fn set_time(&mut self, time: [u8; 4]) {
        self.time = time;
    }
}

impl Default for SecondaryHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for SecondaryHeader {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "SecondaryHeader {{ category: {}, ADU channel usage: {:?}, ADU channel ID: {:?}, ADU segment flag: {:?}, ADU count: {:?}, time: {:02x?} }}",
            self.category(),
            self.adu_channel_usage(),
            self.adu_channel_id(),
            self.adu_segment_flag(),
            self.adu_count(),
            self.time(),
        )
    }
}

impl core::fmt::Display for SecondaryHeader {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        writeln!(f, "Secondary header")?;
        writeln!(f, "  category        : {}", self.category())?;
        writeln!(f, "  ADU channel     : {:?}", self.adu_channel_usage())?;
        writeln!(f, "  ADU channel ID  : {}", self.adu_channel_id().0)?;
        writeln!(f, "  ADU segment flag: {:?}", self.adu_segment_flag())?;
        writeln!(f, "  ADU count       : {}", self.adu_count().0)?;
        let [t0, t1, t2, t3] = self.time();
        writeln!(f, "  time            : {t0:02x} {t1:02x} {t2:02x} {t3:02x}")
    }
}

/// Top bit of the ADU channel byte.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AduChannelUsage {
    #[default]
    NotUsed = 0,
    Used = 1,
}

/// 7-bit ADU channel identifier.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u8", into = "u8"))]
pub struct AduChannelId(u8);

impl AduChannelId {
    /// Largest channel ID the 7-bit field holds.
    pub const MAX: u8 = 0b0111_1111;

    pub fn new(id: u8) -> Result<Self, FieldOverflow> {
        if id > Self::MAX {
            return Err(FieldOverflow {
                field: "ADU channel ID",
                value: id as u32,
                max: Self::MAX as u32,
            });
        }
        Ok(Self(id))
    }

    pub const fn value(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for AduChannelId {
    type Error = FieldOverflow;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AduChannelId> for u8 {
    fn from(value: AduChannelId) -> Self {
        value.0
    }
}

/// 14-bit ADU count.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u16", into = "u16"))]
pub struct AduCount(u16);

impl AduCount {
    /// Largest count the 14-bit field holds.
    pub const MAX: u16 = 0b0011_1111_1111_1111;

    pub fn new(count: u16) -> Result<Self, FieldOverflow> {
        if count > Self::MAX {
            return Err(FieldOverflow {
                field: "ADU count",
                value: count as u32,
                max: Self::MAX as u32,
            });
        }
        Ok(Self(count))
    }

    pub const fn value(&self) -> u16 {
        self.0
    }
}

impl TryFrom<u16> for AduCount {
    type Error = FieldOverflow;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AduCount> for u16 {
    fn from(value: AduCount) -> Self {
        value.0
    }
}

#[test]
fn bit_layout() {
    let mut header = SecondaryHeader::new();
    header.set_category(0x42);
    header.set_adu_channel_usage(AduChannelUsage::Used);
    header.set_adu_channel_id(AduChannelId::new(0x15).unwrap());
    header.set_adu_segment_flag(SequenceFlag::Unsegmented);
    header.set_adu_count(AduCount::new(0x0123).unwrap());
    header.set_time([0xde, 0xad, 0xbe, 0xef]);

    assert_eq!(
        header.encode(),
        [0x42, 0x95, 0xc1, 0x23, 0xde, 0xad, 0xbe, 0xef]
    );
    assert_eq!(header.length(), SecondaryHeader::LENGTH);
}

#[test]
fn decode_restores_every_field() {
    let bytes = [0x07, 0x8a, 0x7f, 0xff, 0x01, 0x02, 0x03, 0x04, 0xaa];
    let header = SecondaryHeader::decode(&bytes).unwrap();

    assert_eq!(header.category(), 7);
    assert_eq!(header.adu_channel_usage(), AduChannelUsage::Used);
    assert_eq!(header.adu_channel_id(), AduChannelId::new(0x0a).unwrap());
    assert_eq!(header.adu_segment_flag(), SequenceFlag::First);
    assert_eq!(header.adu_count(), AduCount::new(AduCount::MAX).unwrap());
    assert_eq!(header.time(), [1, 2, 3, 4]);
    assert_eq!(&header.encode()[..], &bytes[..8]);
}

#[test]
fn setters_do_not_disturb_neighbouring_fields() {
    let mut header = SecondaryHeader::decode(&[0xff; 8]).unwrap();
    header.set_adu_count(AduCount::new(0).unwrap());
    assert_eq!(header.adu_segment_flag(), SequenceFlag::Unsegmented);
    header.set_adu_channel_id(AduChannelId::new(0).unwrap());
    assert_eq!(header.adu_channel_usage(), AduChannelUsage::Used);
    assert_eq!(header.encode(), [0xff, 0x80, 0xc0, 0x00, 0xff, 0xff, 0xff, 0xff]);
}

#[test]
fn truncated_secondary_header() {
    assert_eq!(
        SecondaryHeader::decode(&[0u8; 7]),
        Err(DecodeError::SecondaryHeaderTruncated { length: 7 })
    );
}

#[test]
fn channel_and_count_overflow() {
    assert!(AduChannelId::new(0x80).is_err());
    assert!(AduCount::new(0x4000).is_err());
}
