//! Status/error code space, subsystem addresses and main-state codes of the OBDH and payload
//! programs.
//!
//! Every status is transmitted as the 2-byte big-endian user data of a telemetry packet and is
//! consumed by ground tooling, so the values below are an external contract. The top nibble of
//! a code is the subsystem that emits it (0x0 OBDH, 0x1 payload); within a subsystem, the
//! second nibble separates information codes (0x0-0x7) from error codes (0xE).

/// A 16-bit status or error code.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct StatusCode(pub u16);

impl StatusCode {
    pub const fn value(&self) -> u16 {
        self.0
    }

    pub const fn to_be_bytes(&self) -> [u8; 2] {
        self.0.to_be_bytes()
    }

    /// Top nibble of the code: the emitting subsystem.
    pub const fn subsystem_nibble(&self) -> u8 {
        (self.0 >> 12) as u8
    }

    /// Error codes occupy the 0x_E__ range of their subsystem.
    pub const fn is_error(&self) -> bool {
        (self.0 >> 8) & 0x0f == 0x0e
    }
}

impl core::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Status codes of the program that raised an error, as far as that program defines them. The
/// link layer reports its own failures through these; a `None` entry means the failure can
/// only be logged.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StatusTable {
    pub packet_too_large: Option<StatusCode>,
    pub packet_uninterpretable: Option<StatusCode>,
    pub wrong_subsystem: Option<StatusCode>,
    pub read_failed: Option<StatusCode>,
    pub uplink_write_failed: Option<StatusCode>,
    pub subsystem_write_failed: Option<StatusCode>,
}

impl StatusTable {
    pub const OBDH: StatusTable = StatusTable {
        packet_too_large: Some(obdh::ERR_CCSDS_PACKET_TOO_LARGE),
        packet_uninterpretable: Some(obdh::ERR_CCSDS_PACKET_UNINTERPRETABLE),
        wrong_subsystem: Some(obdh::ERR_TC_TO_WRONG_SUBSYSTEM),
        read_failed: Some(obdh::ERR_READ_CAN_TELEM),
        uplink_write_failed: Some(obdh::ERR_WRITE_UDP_TELEM),
        subsystem_write_failed: Some(obdh::ERR_WRITE_CAN_TC),
    };

    pub const PAYLOAD: StatusTable = StatusTable {
        packet_too_large: Some(payload::ERR_CCSDS_PACKET_TOO_LARGE),
        packet_uninterpretable: None,
        wrong_subsystem: None,
        read_failed: Some(payload::ERR_READ_CAN_PAYLOAD),
        uplink_write_failed: Some(payload::ERR_WRITE_CAN_PAYLOAD),
        subsystem_write_failed: Some(payload::ERR_WRITE_CAN_PAYLOAD),
    };
}

/// Codes emitted by the OBDH program.
pub mod obdh {
    use super::StatusCode;

    pub const NO_ERROR: StatusCode = StatusCode(0x0000);

    // Init
    pub const INFO_INIT_TTC_SUCCESS: StatusCode = StatusCode(0x0000);
    pub const INFO_INIT_OBDH_SUCCESS: StatusCode = StatusCode(0x0001);
    pub const INFO_INIT_EPS_SUCCESS: StatusCode = StatusCode(0x0002);
    pub const INFO_INIT_AOCS_SUCCESS: StatusCode = StatusCode(0x0003);
    pub const INFO_INIT_PAYLOAD_SUCCESS: StatusCode = StatusCode(0x0004);
    pub const INFO_INIT_INTERSAT_SUCCESS: StatusCode = StatusCode(0x0005);
    pub const INFO_INIT_PPU_SUCCESS: StatusCode = StatusCode(0x0006);

    // Safe mode
    pub const INFO_SEND_STOP_PAYLOAD_SUCCESS: StatusCode = StatusCode(0x0020);
    pub const INFO_BROADCAST_SAFE_MODE_SUCCESS: StatusCode = StatusCode(0x0021);

    // Control mode
    pub const INFO_NO_DATA_IN_CAN_BUFFER: StatusCode = StatusCode(0x0040);

    // Restart
    pub const INFO_FREE_PPU_SUCCESS: StatusCode = StatusCode(0x00e0);
    pub const INFO_FREE_INTERSAT_SUCCESS: StatusCode = StatusCode(0x00e1);
    pub const INFO_FREE_PAYLOAD_SUCCESS: StatusCode = StatusCode(0x00e2);
    pub const INFO_FREE_AOCS_SUCCESS: StatusCode = StatusCode(0x00e3);
    pub const INFO_FREE_EPS_SUCCESS: StatusCode = StatusCode(0x00e4);
    pub const INFO_FREE_OBDH_SUCCESS: StatusCode = StatusCode(0x00e5);
    pub const INFO_FREE_TTC_SUCCESS: StatusCode = StatusCode(0x00e6);

    // Main state
    pub const INFO_STATE_TO_INIT: StatusCode = StatusCode(0x0700);
    pub const INFO_STATE_TO_SAFE_MODE: StatusCode = StatusCode(0x0701);
    pub const INFO_STATE_TO_CONTROL_MODE: StatusCode = StatusCode(0x0702);
    pub const INFO_STATE_TO_REGULATE: StatusCode = StatusCode(0x0703);
    pub const INFO_STATE_TO_RESTART: StatusCode = StatusCode(0x07ff);

    // Init errors
    pub const ERR_CREATE_CAN_SOCKET: StatusCode = StatusCode(0x0e00);
    pub const ERR_ENABLE_CAN_FD: StatusCode = StatusCode(0x0e01);
    pub const ERR_SET_CAN_SOCKET_BUF_SIZE: StatusCode = StatusCode(0x0e02);
    pub const ERR_GET_CAN_SOCKET_FLAGS: StatusCode = StatusCode(0x0e03);
    pub const ERR_SET_CAN_SOCKET_NON_BLOCKING: StatusCode = StatusCode(0x0e04);
    pub const ERR_BIND_CAN_ADDR: StatusCode = StatusCode(0x0e05);
    pub const ERR_CREATE_UDP_SOCKET: StatusCode = StatusCode(0x0e06);
    pub const ERR_SET_UDP_SOCKET_BUF_SIZE: StatusCode = StatusCode(0x0e07);
    pub const ERR_GET_UDP_SOCKET_FLAGS: StatusCode = StatusCode(0x0e08);
    pub const ERR_SET_UDP_SOCKET_NON_BLOCKING: StatusCode = StatusCode(0x0e09);
    pub const ERR_BIND_UDP_ADDR: StatusCode = StatusCode(0x0e0a);
    pub const ERR_ALLOC_PARAM_SENSOR_STRUCT: StatusCode = StatusCode(0x0e0b);
    pub const ERR_OPEN_PARAM_SENSORS_FILE: StatusCode = StatusCode(0x0e0c);

    // Control mode errors
    pub const ERR_READ_CAN_TELEM: StatusCode = StatusCode(0x0e20);
    pub const ERR_CCSDS_PACKET_TOO_LARGE: StatusCode = StatusCode(0x0e21);
    pub const ERR_WRITE_UDP_TELEM: StatusCode = StatusCode(0x0e22);
    pub const ERR_WRITE_CAN_TC: StatusCode = StatusCode(0x0e23);
    pub const ERR_SENSOR_WARNING_VALUE: StatusCode = StatusCode(0x0e24);
    pub const ERR_SENSOR_CRITICAL_VALUE: StatusCode = StatusCode(0x0e25);
    pub const ERR_TC_TO_WRONG_SUBSYSTEM: StatusCode = StatusCode(0x0e26);
    pub const ERR_CCSDS_PACKET_UNINTERPRETABLE: StatusCode = StatusCode(0x0e27);

    // Restart errors
    pub const ERR_CLOSE_CAN_SOCKET: StatusCode = StatusCode(0x0ef0);
    pub const ERR_CLOSE_UDP_SOCKET: StatusCode = StatusCode(0x0ef1);
}

/// Codes emitted by the payload program.
pub mod payload {
    use super::StatusCode;

    pub const NO_ERROR: StatusCode = StatusCode(0x0000);

    // Init
    pub const INFO_INIT_OBDH_SUCCESS: StatusCode = StatusCode(0x1000);
    pub const INFO_INIT_PAYLOAD_SUCCESS: StatusCode = StatusCode(0x1001);

    // Safe mode
    pub const INFO_SEND_STOP_PAYLOAD_SUCCESS: StatusCode = StatusCode(0x1020);
    pub const INFO_BROADCAST_SAFE_MODE_SUCCESS: StatusCode = StatusCode(0x1021);

    // Payload mode
    pub const INFO_5G_PACKET_RECEIVED: StatusCode = StatusCode(0x1040);
    pub const INFO_RECEIVE_5G_PACKETS_TIMEOUT: StatusCode = StatusCode(0x1041);
    pub const INFO_NAV_REQ_RECEIVED: StatusCode = StatusCode(0x1042);

    // Restart
    pub const INFO_FREE_PAYLOAD_SUCCESS: StatusCode = StatusCode(0x10e0);
    pub const INFO_FREE_OBDH_SUCCESS: StatusCode = StatusCode(0x10e1);

    // Main state
    pub const INFO_STATE_TO_INIT: StatusCode = StatusCode(0x1700);
    pub const INFO_STATE_TO_PAYLOAD_MODE: StatusCode = StatusCode(0x1701);
    pub const INFO_STATE_TO_RESTART: StatusCode = StatusCode(0x17ff);

    // Init errors
    pub const ERR_CREATE_CAN_SOCKET: StatusCode = StatusCode(0x1e00);
    pub const ERR_SET_CAN_SOCKET_BUF_SIZE: StatusCode = StatusCode(0x1e01);
    pub const ERR_GET_CAN_SOCKET_FLAGS: StatusCode = StatusCode(0x1e02);
    pub const ERR_SET_CAN_SOCKET_NON_BLOCKING: StatusCode = StatusCode(0x1e03);
    pub const ERR_BIND_CAN_ADDR: StatusCode = StatusCode(0x1e04);
    pub const ERR_ALLOC_PARAM_SENSOR_STRUCT: StatusCode = StatusCode(0x1e05);
    pub const ERR_OPEN_PARAM_SENSORS_FILE: StatusCode = StatusCode(0x1e06);

    // Payload mode errors
    pub const ERR_READ_CAN_PAYLOAD: StatusCode = StatusCode(0x1e20);
    pub const ERR_WRITE_CAN_PAYLOAD: StatusCode = StatusCode(0x1e21);
    pub const ERR_READ_CAN_EPS: StatusCode = StatusCode(0x1e22);
    pub const ERR_CCSDS_PACKET_TOO_LARGE: StatusCode = StatusCode(0x1e23);
    pub const ERR_SENSOR_WARNING_VALUE: StatusCode = StatusCode(0x1e24);
    pub const ERR_SENSOR_CRITICAL_VALUE: StatusCode = StatusCode(0x1e25);

    // Restart errors
    pub const ERR_CLOSE_CAN_SOCKET: StatusCode = StatusCode(0x1ef0);
}

/// Logical destinations addressed by the top nibble of a command code.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Subsystem {
    Obdh = 0x0,
    Payload = 0x1,
    Eps = 0x2,
}

impl Subsystem {
    /// Nibble addressing every subsystem at once.
    pub const BROADCAST_NIBBLE: u8 = 0xf;

    pub const ALL: [Subsystem; 3] = [Subsystem::Obdh, Subsystem::Payload, Subsystem::Eps];

    /// The subsystem addressed by a command nibble. The broadcast nibble maps to none.
    pub fn from_nibble(nibble: u8) -> Option<Self> {
        match nibble {
            0x0 => Some(Subsystem::Obdh),
            0x1 => Some(Subsystem::Payload),
            0x2 => Some(Subsystem::Eps),
            _ => None,
        }
    }

    pub const fn nibble(self) -> u8 {
        self as u8
    }

    /// The code prefix of this subsystem, e.g. 0x1000 for the payload.
    pub const fn address(self) -> u16 {
        (self as u16) << 12
    }
}

/// Main states of the OBDH state machine. The discriminants are the command codes that select
/// them.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[repr(u16)]
pub enum ObdhState {
    Init = 0x0700,
    SafeMode = 0x0701,
    ControlMode = 0x0702,
    Regulate = 0x0703,
    Restart = 0x07ff,
    Ending = 0x0fff,
}

impl TryFrom<u16> for ObdhState {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x0700 => Ok(ObdhState::Init),
            0x0701 => Ok(ObdhState::SafeMode),
            0x0702 => Ok(ObdhState::ControlMode),
            0x0703 => Ok(ObdhState::Regulate),
            0x07ff => Ok(ObdhState::Restart),
            0x0fff => Ok(ObdhState::Ending),
            other => Err(other),
        }
    }
}

/// Main states of the payload state machine.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[repr(u16)]
pub enum PayloadState {
    Init = 0x1700,
    PayloadMode = 0x1702,
    ProcessMsg = 0x1703,
    IdleMode = 0x1704,
    ProcessNav = 0x1705,
    Restart = 0x17ff,
    Ending = 0x1fff,
}

impl TryFrom<u16> for PayloadState {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x1700 => Ok(PayloadState::Init),
            0x1702 => Ok(PayloadState::PayloadMode),
            0x1703 => Ok(PayloadState::ProcessMsg),
            0x1704 => Ok(PayloadState::IdleMode),
            0x1705 => Ok(PayloadState::ProcessNav),
            0x17ff => Ok(PayloadState::Restart),
            0x1fff => Ok(PayloadState::Ending),
            other => Err(other),
        }
    }
}

/// Spacecraft sensor identifiers, as carried in sensor reading telemetry.
pub mod sensor {
    pub const SENSOR_1: u16 = 0x0900;
    pub const SENSOR_2: u16 = 0x0901;
    pub const SENSOR_3: u16 = 0x0902;
}

#[test]
fn error_codes_are_recognised() {
    assert!(obdh::ERR_TC_TO_WRONG_SUBSYSTEM.is_error());
    assert!(payload::ERR_CCSDS_PACKET_TOO_LARGE.is_error());
    assert!(!payload::INFO_5G_PACKET_RECEIVED.is_error());
    assert!(!obdh::INFO_STATE_TO_RESTART.is_error());
}

#[test]
fn codes_carry_their_subsystem() {
    assert_eq!(payload::INFO_STATE_TO_RESTART.subsystem_nibble(), 0x1);
    assert_eq!(obdh::ERR_CLOSE_UDP_SOCKET.subsystem_nibble(), 0x0);
    assert_eq!(payload::INFO_5G_PACKET_RECEIVED.to_be_bytes(), [0x10, 0x40]);
}

#[test]
fn main_state_codes() {
    assert_eq!(PayloadState::try_from(0x1702), Ok(PayloadState::PayloadMode));
    assert_eq!(PayloadState::try_from(0x1701), Err(0x1701));
    assert_eq!(ObdhState::try_from(0x0fff), Ok(ObdhState::Ending));
    assert_eq!(ObdhState::Regulate as u16, 0x0703);
}

#[test]
fn subsystem_addresses() {
    assert_eq!(Subsystem::Payload.address(), 0x1000);
    assert_eq!(Subsystem::from_nibble(0x2), Some(Subsystem::Eps));
    assert_eq!(Subsystem::from_nibble(0x3), None);
    assert_eq!(Subsystem::from_nibble(Subsystem::BROADCAST_NIBBLE), None);
}
