//! Link configuration of the two on-board programs.
//!
//! The presets reproduce the compile-time constants of the flight software: APIDs, secondary
//! header usage, retry count and the status codes each program reports link failures with.

use crate::header::{Apid, PacketSequenceCount, SequenceFlag};
use crate::secondary::{AduChannelId, AduChannelUsage, AduCount, SecondaryHeader};
use crate::status::{StatusTable, Subsystem};

/// APID of OBDH telemetry. The flight software configured 0x80b, which does not fit the 11-bit
/// field; 0x00b is the value that actually went out on the wire.
pub const OBDH_APID: Apid = Apid::constant(0x00b);

/// APID of payload telemetry.
pub const PAYLOAD_APID: Apid = Apid::constant(0x1ab);

/// CAN identifier of frames sent by the OBDH.
pub const CAN_ID_OBDH: u32 = 0x100;

/// CAN identifier of frames sent by the payload.
pub const CAN_ID_PAYLOAD: u32 = 0x200;

/// Number of attempts made for every transmission.
pub const NB_RETRIES: u32 = 3;

/// How the framer assigns packet sequence counts.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SequencePolicy {
    /// Every packet carries the same count. The flight software sent 0 (OBDH) and 1 (payload).
    Fixed(PacketSequenceCount),
    /// Counts increase by one per packet and per (packet type, APID), wrapping at 2^14.
    #[default]
    Incrementing,
}

/// Content of the secondary header attached to every packet a program sends. The time field
/// is filled in by the framer at wrapping time.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SecondaryHeaderTemplate {
    pub category: u8,
    pub adu_channel_usage: AduChannelUsage,
    pub adu_channel_id: AduChannelId,
    pub adu_segment_flag: SequenceFlag,
    pub adu_count: AduCount,
}

impl SecondaryHeaderTemplate {
    /// Stamps the template with `time`.
    pub fn build(&self, time: [u8; 4]) -> SecondaryHeader {
        let mut header = SecondaryHeader::new();
        header.set_category(self.category);
        header.set_adu_channel_usage(self.adu_channel_usage);
        header.set_adu_channel_id(self.adu_channel_id);
        header.set_adu_segment_flag(self.adu_segment_flag);
        header.set_adu_count(self.adu_count);
        header.set_time(time);
        header
    }
}

/// Everything that shapes the packets one program sends and how it reports failures.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FramingConfig {
    /// Subsystem this program runs on. Commands addressed to it are applied locally.
    pub subsystem: Subsystem,
    /// APID stamped on every packet this program sends.
    pub apid: Apid,
    /// Secondary header attached to outgoing packets, if any.
    pub secondary_header: Option<SecondaryHeaderTemplate>,
    /// How sequence counts are assigned.
    pub sequence_policy: SequencePolicy,
    /// Attempts per transmission before a transport failure is reported.
    pub retries: u32,
    /// Codes failures are reported with.
    pub status_table: StatusTable,
}

impl FramingConfig {
    /// OBDH program: telemetry to the TT&C over UDP with a secondary header using ADU channel 0.
    pub fn obdh() -> Self {
        Self {
            subsystem: Subsystem::Obdh,
            apid: OBDH_APID,
            secondary_header: Some(SecondaryHeaderTemplate {
                category: 0,
                adu_channel_usage: AduChannelUsage::Used,
                adu_channel_id: AduChannelId::default(),
                adu_segment_flag: SequenceFlag::Unsegmented,
                adu_count: AduCount::default(),
            }),
            sequence_policy: SequencePolicy::Incrementing,
            retries: NB_RETRIES,
            status_table: StatusTable::OBDH,
        }
    }

    /// Payload program: telemetry to the OBDH over classic CAN, without secondary header so that
    /// a status report fits in a single 8-byte frame.
    pub fn payload() -> Self {
        Self {
            subsystem: Subsystem::Payload,
            apid: PAYLOAD_APID,
            secondary_header: None,
            sequence_policy: SequencePolicy::Incrementing,
            retries: NB_RETRIES,
            status_table: StatusTable::PAYLOAD,
        }
    }

    /// Replaces the sequence count policy.
    pub fn with_sequence_policy(mut self, sequence_policy: SequencePolicy) -> Self {
        self.sequence_policy = sequence_policy;
        self
    }
}

#[test]
fn template_builds_secondary_header() {
    let template = FramingConfig::obdh().secondary_header.unwrap();
    let header = template.build([1, 2, 3, 4]);
    assert_eq!(header.encode(), [0x00, 0x80, 0xc0, 0x00, 1, 2, 3, 4]);
}

#[test]
fn presets() {
    let payload = FramingConfig::payload();
    assert_eq!(payload.apid.value(), 0x1ab);
    assert_eq!(payload.subsystem, Subsystem::Payload);
    assert!(payload.secondary_header.is_none());
    assert_eq!(payload.retries, 3);

    let obdh = FramingConfig::obdh()
        .with_sequence_policy(SequencePolicy::Fixed(PacketSequenceCount::default()));
    assert_eq!(obdh.apid.value(), 0x00b);
    assert_eq!(
        obdh.sequence_policy,
        SequencePolicy::Fixed(PacketSequenceCount::default())
    );
}

#[cfg(feature = "serde")]
#[test]
fn config_roundtrips_through_json() {
    let config = FramingConfig::obdh();
    let json = serde_json::to_string(&config).unwrap();
    let decoded: FramingConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(decoded, config);
}

#[cfg(feature = "serde")]
#[test]
fn out_of_range_apid_is_rejected_on_load() {
    let mut json = serde_json::to_value(FramingConfig::payload()).unwrap();
    json["apid"] = serde_json::json!(0x80b);
    assert!(serde_json::from_value::<FramingConfig>(json).is_err());
}
