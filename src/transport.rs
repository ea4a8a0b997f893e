//! Byte-level transports the link layer sends packets over and receives packets from.
//!
//! A transport moves whole frames: one serialized Space Packet per CAN frame or UDP datagram.
//! All transports are non-blocking. A receive with nothing pending returns `Ok(None)` instead
//! of an error, so that a cooperative loop can poll every link once per iteration.

use alloc::collections::VecDeque;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use thiserror::Error;

/// Largest frame any transport delivers: the UDP receive buffer of the flight software.
pub const MAX_FRAME_LENGTH: usize = 1024;

/// Physical bindings used on board, each with its own maximum payload.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TransportKind {
    /// Classic CAN: 8 data bytes per frame.
    Can,
    /// CAN with flexible data rate: up to 64 data bytes per frame.
    CanFd,
    /// UDP datagram, bounded by the on-board receive buffer.
    Udp,
}

impl TransportKind {
    /// Largest frame the bus carries, in bytes.
    pub const fn max_payload(self) -> usize {
        match self {
            TransportKind::Can => 8,
            TransportKind::CanFd => 64,
            TransportKind::Udp => MAX_FRAME_LENGTH,
        }
    }
}

impl core::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            TransportKind::Can => "can",
            TransportKind::CanFd => "canfd",
            TransportKind::Udp => "udp",
        };
        f.write_str(name)
    }
}

/// A frame-oriented, non-blocking link. CAN sockets are provided by the platform integration;
/// this crate ships a UDP implementation and an in-memory loopback.
pub trait Transport {
    /// Bus this transport runs over.
    fn kind(&self) -> TransportKind;

    /// Largest frame this transport accepts. Defaults to the limit of its kind; a link may be
    /// configured tighter than the physical limit.
    fn max_payload(&self) -> usize {
        self.kind().max_payload()
    }

    /// Sends one frame.
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Receives one frame into `buffer` and returns its length, or `None` when no frame is
    /// pending. Frames longer than `buffer` are truncated.
    fn receive(&mut self, buffer: &mut [u8]) -> Result<Option<usize>, TransportError>;
}

/// Failures of a transport.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum TransportError {
    #[cfg(feature = "std")]
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("short write ({written} of {expected} bytes sent)")]
    ShortWrite { written: usize, expected: usize },
    #[error("frame of {length} bytes exceeds the {max}-byte transport payload")]
    FrameTooLarge { length: usize, max: usize },
    #[error("transport unavailable")]
    Unavailable,
}

type Queue = Rc<RefCell<VecDeque<Vec<u8>>>>;

/// In-memory transport. Endpoints created by `pair` deliver to each other; an endpoint created
/// by `new` delivers to itself. Clones share their queues, so a clone kept aside can observe or
/// feed an endpoint that has been handed to a `Node`.
#[derive(Clone, Debug)]
pub struct LoopbackTransport {
    kind: TransportKind,
    max_payload: usize,
    outbound: Queue,
    inbound: Queue,
    failures: Rc<Cell<usize>>,
}

impl LoopbackTransport {
    /// A single endpoint that receives its own frames.
    pub fn new(kind: TransportKind) -> Self {
        let queue = Queue::default();
        Self {
            kind,
            max_payload: kind.max_payload(),
            outbound: queue.clone(),
            inbound: queue,
            failures: Rc::default(),
        }
    }

    /// Two connected endpoints: frames sent on one are received on the other.
    pub fn pair(kind: TransportKind) -> (Self, Self) {
        let forward = Queue::default();
        let backward = Queue::default();
        let a = Self {
            kind,
            max_payload: kind.max_payload(),
            outbound: forward.clone(),
            inbound: backward.clone(),
            failures: Rc::default(),
        };
        let b = Self {
            kind,
            max_payload: kind.max_payload(),
            outbound: backward,
            inbound: forward,
            failures: Rc::default(),
        };
        (a, b)
    }

    /// Restricts the accepted frame size below the limit of the transport kind.
    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload;
        self
    }

    /// Makes the next `count` sends fail with `TransportError::Unavailable`.
    pub fn fail_next_sends(&self, count: usize) {
        self.failures.set(count);
    }

    /// Number of frames waiting to be received on this endpoint.
    pub fn pending(&self) -> usize {
        self.inbound.borrow().len()
    }
}

impl Transport for LoopbackTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn max_payload(&self) -> usize {
        self.max_payload
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let failures = self.failures.get();
        if failures > 0 {
            self.failures.set(failures - 1);
            return Err(TransportError::Unavailable);
        }
        if frame.len() > self.max_payload {
            return Err(TransportError::FrameTooLarge {
                length: frame.len(),
                max: self.max_payload,
            });
        }
        self.outbound.borrow_mut().push_back(frame.to_vec());
        Ok(())
    }

    fn receive(&mut self, buffer: &mut [u8]) -> Result<Option<usize>, TransportError> {
        let Some(frame) = self.inbound.borrow_mut().pop_front() else {
            return Ok(None);
        };
        let length = frame.len().min(buffer.len());
        buffer[..length].copy_from_slice(&frame[..length]);
        Ok(Some(length))
    }
}

#[cfg(feature = "std")]
pub use udp::{UdpConfig, UdpTransport};

#[cfg(feature = "std")]
mod udp {
    use super::*;
    use log::{debug, trace};
    use std::io::ErrorKind;
    use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};

    /// UDP port the TT&C listens on for telemetry.
    pub const UDP_TELEMETRY_PORT: u16 = 5000;
    /// UDP port the OBDH listens on for telecommands.
    pub const UDP_TELECOMMAND_PORT: u16 = 5001;

    /// Endpoints of a UDP link.
    #[derive(Copy, Clone, Eq, PartialEq, Debug)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct UdpConfig {
        /// Address the socket binds to; telecommands arrive here.
        pub local: SocketAddr,
        /// Address every frame is sent to.
        pub peer: SocketAddr,
    }

    impl Default for UdpConfig {
        /// OBDH to TT&C link on the local host.
        fn default() -> Self {
            Self {
                local: SocketAddr::V4(SocketAddrV4::new(
                    Ipv4Addr::UNSPECIFIED,
                    UDP_TELECOMMAND_PORT,
                )),
                peer: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, UDP_TELEMETRY_PORT)),
            }
        }
    }

    /// Non-blocking UDP socket exchanging one packet per datagram with a fixed peer.
    #[derive(Debug)]
    pub struct UdpTransport {
        socket: UdpSocket,
        peer: SocketAddr,
    }

    impl UdpTransport {
        /// Binds a non-blocking socket to `config.local`.
        pub fn bind(config: &UdpConfig) -> Result<Self, TransportError> {
            let socket = UdpSocket::bind(config.local)?;
            socket.set_nonblocking(true)?;
            debug!(
                "event=udp_bound local={} peer={}",
                socket.local_addr()?,
                config.peer
            );
            Ok(Self {
                socket,
                peer: config.peer,
            })
        }

        pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
            Ok(self.socket.local_addr()?)
        }
    }

    impl Transport for UdpTransport {
        fn kind(&self) -> TransportKind {
            TransportKind::Udp
        }

        fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
            let written = self.socket.send_to(frame, self.peer)?;
            if written != frame.len() {
                return Err(TransportError::ShortWrite {
                    written,
                    expected: frame.len(),
                });
            }
            Ok(())
        }

        fn receive(&mut self, buffer: &mut [u8]) -> Result<Option<usize>, TransportError> {
            match self.socket.recv_from(buffer) {
                Ok((length, source)) => {
                    trace!("event=udp_datagram source={source} length={length}");
                    Ok(Some(length))
                }
                Err(error) if error.kind() == ErrorKind::WouldBlock => Ok(None),
                Err(error) => Err(error.into()),
            }
        }
    }

    #[test]
    fn datagrams_cross_between_sockets() {
        let localhost = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0));
        let mut ground = UdpTransport::bind(&UdpConfig {
            local: localhost,
            peer: localhost,
        })
        .unwrap();
        let mut obdh = UdpTransport::bind(&UdpConfig {
            local: localhost,
            peer: ground.local_addr().unwrap(),
        })
        .unwrap();

        let mut buffer = [0u8; MAX_FRAME_LENGTH];
        assert!(ground.receive(&mut buffer).unwrap().is_none());

        obdh.send(&[0x01, 0xab, 0xc0, 0x01, 0x00, 0x01, 0x10, 0x40])
            .unwrap();

        let mut received = None;
        for _ in 0..1_000 {
            received = ground.receive(&mut buffer).unwrap();
            if received.is_some() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        assert_eq!(received, Some(8));
        assert_eq!(&buffer[6..8], &[0x10, 0x40]);
    }

    #[test]
    fn default_endpoints() {
        let config = UdpConfig::default();
        assert_eq!(config.local.port(), 5001);
        assert_eq!(config.peer.port(), 5000);
    }
}

#[test]
fn pair_delivers_in_order() {
    let (mut a, mut b) = LoopbackTransport::pair(TransportKind::CanFd);
    a.send(&[1]).unwrap();
    a.send(&[2, 3]).unwrap();
    assert_eq!(b.pending(), 2);
    assert_eq!(a.pending(), 0);

    let mut buffer = [0u8; 64];
    assert_eq!(b.receive(&mut buffer).unwrap(), Some(1));
    assert_eq!(buffer[0], 1);
    assert_eq!(b.receive(&mut buffer).unwrap(), Some(2));
    assert_eq!(&buffer[..2], &[2, 3]);
    assert_eq!(b.receive(&mut buffer).unwrap(), None);
}

#[test]
fn frame_limits_are_enforced() {
    let mut can = LoopbackTransport::new(TransportKind::Can);
    assert!(can.send(&[0u8; 8]).is_ok());
    assert!(matches!(
        can.send(&[0u8; 9]),
        Err(TransportError::FrameTooLarge { length: 9, max: 8 })
    ));

    let restricted = LoopbackTransport::new(TransportKind::CanFd).with_max_payload(48);
    assert_eq!(restricted.max_payload(), 48);
}

#[test]
fn injected_failures_are_consumed() {
    let mut transport = LoopbackTransport::new(TransportKind::Udp);
    let observer = transport.clone();
    observer.fail_next_sends(1);
    assert!(matches!(
        transport.send(&[1]),
        Err(TransportError::Unavailable)
    ));
    transport.send(&[1]).unwrap();
    assert_eq!(observer.pending(), 1);
}
