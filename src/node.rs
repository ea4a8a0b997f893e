//! One on-board program's view of the link layer: its uplink, the subsystems it commands, the
//! framer stamping its packets and the latch holding the last command addressed to it.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use log::{debug, error, info, trace, warn};
use thiserror::Error;

use crate::config::FramingConfig;
use crate::framing::{Framer, FramingError, Route, Router, RoutingError, SensorReading};
use crate::header::DecodeError;
use crate::packet::{EncodeError, SpacePacket};
use crate::status::{StatusCode, StatusTable, Subsystem};
use crate::transport::{MAX_FRAME_LENGTH, Transport, TransportError};

/// Holds the most recent command addressed to the local subsystem until the state machine
/// takes it. A command is handed out once: repeats of the command last taken are ignored until
/// a different one arrives.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct CommandLatch {
    latched: Option<u16>,
    applied: Option<u16>,
}

impl CommandLatch {
    /// Code ground tooling sends to mean "no command".
    pub const NO_COMMAND: u16 = crate::framing::NO_COMMAND;

    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the latched command. `NO_COMMAND` clears it.
    pub fn latch(&mut self, code: u16) {
        self.latched = (code != Self::NO_COMMAND).then_some(code);
    }

    /// The latched command, even if it was already taken.
    pub fn latched(&self) -> Option<u16> {
        self.latched
    }

    /// Returns the latched command if it is new, addressed to `local` and accepted by
    /// `is_valid`, and records it as applied.
    pub fn take_new(&mut self, local: Subsystem, is_valid: impl Fn(u16) -> bool) -> Option<u16> {
        let code = self.latched?;
        if self.applied == Some(code) || (code >> 12) as u8 != local.nibble() || !is_valid(code) {
            return None;
        }
        self.applied = Some(code);
        Some(code)
    }
}

/// Either side of a node: the uplink towards the TT&C or OBDH, or one of the subsystems it
/// commands.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Link {
    Uplink,
    Subsystem(Subsystem),
}

impl core::fmt::Display for Link {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Link::Uplink => "uplink",
            Link::Subsystem(Subsystem::Obdh) => "obdh",
            Link::Subsystem(Subsystem::Payload) => "payload",
            Link::Subsystem(Subsystem::Eps) => "eps",
        };
        f.write_str(name)
    }
}

/// Any failure of a node operation.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Framing(#[from] FramingError),
    #[error("failed to interpret packet: {0}")]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Routing(#[from] RoutingError),
    #[error("failed to send on {link}: {source}")]
    Send {
        link: Link,
        #[source]
        source: TransportError,
    },
    #[error("failed to receive on {link}: {source}")]
    Receive {
        link: Link,
        #[source]
        source: TransportError,
    },
    #[error("no transport registered for {0:?}")]
    UnknownSubsystem(Subsystem),
}

impl From<EncodeError> for NodeError {
    fn from(error: EncodeError) -> Self {
        NodeError::Framing(error.into())
    }
}

impl NodeError {
    /// The status code this failure is reported with, if the program defines one.
    pub fn status(&self, table: &StatusTable) -> Option<StatusCode> {
        match self {
            NodeError::Framing(FramingError::PacketTooLargeForTransport { .. }) => {
                table.packet_too_large
            }
            NodeError::Framing(_) | NodeError::Decode(_) => table.packet_uninterpretable,
            NodeError::Routing(RoutingError::AddressedToWrongSubsystem { .. })
            | NodeError::UnknownSubsystem(_) => table.wrong_subsystem,
            NodeError::Routing(_) => table.packet_uninterpretable,
            NodeError::Receive { .. } => table.read_failed,
            NodeError::Send {
                link: Link::Uplink,
                ..
            } => table.uplink_write_failed,
            NodeError::Send { .. } => table.subsystem_write_failed,
        }
    }
}

/// Sends `frame`, making up to `attempts` tries.
fn transmit<T: Transport + ?Sized>(
    transport: &mut T,
    frame: &[u8],
    attempts: u32,
) -> Result<(), TransportError> {
    let mut attempt = 1;
    loop {
        match transport.send(frame) {
            Ok(()) => return Ok(()),
            Err(error) if attempt < attempts => {
                debug!("event=send_retry attempt={attempt} err={error}");
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

/// The link layer of one program. `T` is the transport every link goes through: a node whose
/// links are all of one kind can name it (`Node<UdpTransport>`), while a node mixing buses uses
/// a trait object, `Node<dyn Transport>` or `Node<dyn Transport + Send>` when the node has to
/// move to another thread.
pub struct Node<T: Transport + ?Sized = dyn Transport> {
    framer: Framer,
    router: Router,
    latch: CommandLatch,
    uplink: Box<T>,
    subsystems: BTreeMap<Subsystem, Box<T>>,
}

impl<T: Transport + ?Sized> Node<T> {
    /// A node for the program described by `config`, with no subsystems registered yet.
    pub fn new(config: FramingConfig, uplink: Box<T>) -> Self {
        Self {
            router: Router::new(config.subsystem),
            framer: Framer::new(config),
            latch: CommandLatch::new(),
            uplink,
            subsystems: BTreeMap::new(),
        }
    }

    /// Registers the transport towards `subsystem`, returning the one it replaces.
    pub fn add_subsystem(
        &mut self,
        subsystem: Subsystem,
        transport: Box<T>,
    ) -> Option<Box<T>> {
        info!(
            "event=subsystem_added subsystem={} transport={}",
            Link::Subsystem(subsystem),
            transport.kind()
        );
        self.subsystems.insert(subsystem, transport)
    }

    pub fn config(&self) -> &FramingConfig {
        self.framer.config()
    }

    /// Gives access to the framer, e.g. to update the secondary header time.
    pub fn framer_mut(&mut self) -> &mut Framer {
        &mut self.framer
    }

    /// Registered subsystems, in nibble order.
    pub fn subsystems(&self) -> impl Iterator<Item = Subsystem> + '_ {
        self.subsystems.keys().copied()
    }

    /// Sends `code` to the uplink as status telemetry.
    pub fn send_status(&mut self, code: StatusCode) -> Result<(), NodeError> {
        let packet = self.framer.wrap_status(code)?;
        self.send_packet(Link::Uplink, packet)
    }

    /// Sends `reading` to the uplink as telemetry.
    pub fn send_sensor_reading(&mut self, reading: SensorReading) -> Result<(), NodeError> {
        let packet = self.framer.wrap_sensor_reading(reading)?;
        self.send_packet(Link::Uplink, packet)
    }

    /// Commands `subsystem` with a bare command code.
    pub fn send_telecommand(&mut self, subsystem: Subsystem, code: u16) -> Result<(), NodeError> {
        self.require(subsystem)?;
        let packet = self.framer.wrap_telecommand(code)?;
        self.send_packet(Link::Subsystem(subsystem), packet)
    }

    /// Passes `payload` on to `subsystem` as the user data of a new telecommand.
    pub fn forward(&mut self, subsystem: Subsystem, payload: &[u8]) -> Result<(), NodeError> {
        self.require(subsystem)?;
        let packet = self
            .framer
            .wrap_user_data(crate::header::PacketType::Telecommand, payload)?;
        self.send_packet(Link::Subsystem(subsystem), packet)
    }

    /// Commands `state` on every registered subsystem, prefixing it with each subsystem's own
    /// nibble and appending `arguments`, and latches it for the local subsystem. Every
    /// subsystem is attempted; the last failure is returned.
    pub fn broadcast(&mut self, state: u16, arguments: &[u8]) -> Result<(), NodeError> {
        let state = state & 0x0fff;
        self.latch.latch(self.router.local().address() | state);

        let subsystems: Vec<Subsystem> = self.subsystems().collect();
        let mut result = Ok(());
        for subsystem in subsystems {
            let code = subsystem.address() | state;
            let mut payload = Vec::with_capacity(2 + arguments.len());
            payload.extend_from_slice(&code.to_be_bytes());
            payload.extend_from_slice(arguments);
            if let Err(error) = self.forward(subsystem, &payload) {
                error!(
                    "event=broadcast_failed subsystem={} err={error}",
                    Link::Subsystem(subsystem)
                );
                result = Err(error);
            }
        }
        result
    }

    /// Reads one frame from the uplink and acts on it. `Ok(None)` means no frame was pending.
    pub fn poll_uplink(&mut self) -> Result<Option<Route>, NodeError> {
        let Some(packet) = Self::receive_packet(&mut *self.uplink, Link::Uplink)? else {
            return Ok(None);
        };
        let route = self.router.route(packet)?;
        match &route {
            Route::Local(code) => {
                debug!("event=command_latched code={code:#06x}");
                self.latch.latch(*code);
            }
            Route::Forward { subsystem, payload } => self.forward(*subsystem, payload)?,
            Route::Broadcast { state, payload } => {
                self.broadcast(*state, payload.get(2..).unwrap_or_default())?
            }
            Route::NoCommand => debug!("event=no_command"),
        }
        Ok(Some(route))
    }

    /// Reads one telemetry frame from `subsystem`.
    pub fn poll_subsystem(
        &mut self,
        subsystem: Subsystem,
    ) -> Result<Option<SpacePacket>, NodeError> {
        let transport = self
            .subsystems
            .get_mut(&subsystem)
            .ok_or(NodeError::UnknownSubsystem(subsystem))?;
        let packet = Self::receive_packet(&mut **transport, Link::Subsystem(subsystem))?;
        if let Some(packet) = &packet {
            if let [high, low] = packet.user_data() {
                info!(
                    "event=subsystem_status subsystem={} status={}",
                    Link::Subsystem(subsystem),
                    StatusCode(u16::from_be_bytes([*high, *low]))
                );
            }
        }
        Ok(packet)
    }

    /// Processes every pending frame, the uplink first and then each subsystem, reporting
    /// failures as they occur. Returns the number of frames processed.
    pub fn drain(&mut self) -> usize {
        let mut processed = 0;
        loop {
            match self.poll_uplink() {
                Ok(Some(_)) => processed += 1,
                Ok(None) => break,
                Err(error) => {
                    let receive_failed = matches!(error, NodeError::Receive { .. });
                    self.report(&error);
                    if receive_failed {
                        break;
                    }
                    processed += 1;
                }
            }
        }

        let subsystems: Vec<Subsystem> = self.subsystems().collect();
        for subsystem in subsystems {
            loop {
                match self.poll_subsystem(subsystem) {
                    Ok(Some(_)) => processed += 1,
                    Ok(None) => break,
                    Err(error) => {
                        let receive_failed = matches!(error, NodeError::Receive { .. });
                        self.report(&error);
                        if receive_failed {
                            break;
                        }
                        processed += 1;
                    }
                }
            }
        }
        processed
    }

    /// Logs `error` and sends its status code on the uplink when the program defines one. A
    /// failure to send the report is only logged.
    pub fn report(&mut self, error: &NodeError) {
        let table = self.config().status_table;
        match error.status(&table) {
            Some(code) => {
                warn!("event=error_reported status={code} err={error}");
                if let Err(report_error) = self.send_status(code) {
                    error!("event=report_failed status={code} err={report_error}");
                }
            }
            None => warn!("event=error_unreported err={error}"),
        }
    }

    /// The latched command, once, if it is new, addressed to this program and accepted by
    /// `is_valid`.
    pub fn take_command(&mut self, is_valid: impl Fn(u16) -> bool) -> Option<u16> {
        self.latch.take_new(self.router.local(), is_valid)
    }

    /// The command last latched, whether or not it has been taken.
    pub fn latched_command(&self) -> Option<u16> {
        self.latch.latched()
    }

    fn require(&self, subsystem: Subsystem) -> Result<(), NodeError> {
        if self.subsystems.contains_key(&subsystem) {
            Ok(())
        } else {
            Err(NodeError::UnknownSubsystem(subsystem))
        }
    }

    fn send_packet(&mut self, link: Link, mut packet: SpacePacket) -> Result<(), NodeError> {
        let attempts = self.framer.config().retries.max(1);
        let transport: &mut T = match link {
            Link::Uplink => &mut *self.uplink,
            Link::Subsystem(subsystem) => &mut **self
                .subsystems
                .get_mut(&subsystem)
                .ok_or(NodeError::UnknownSubsystem(subsystem))?,
        };
        let frame = self.framer.encode_for(&mut packet, transport.max_payload())?;
        transmit(transport, &frame, attempts).map_err(|source| NodeError::Send { link, source })?;
        debug!(
            "event=packet_sent link={link} apid={:#05x} length={}",
            packet.apid().value(),
            frame.len()
        );
        Ok(())
    }

    fn receive_packet(
        transport: &mut T,
        link: Link,
    ) -> Result<Option<SpacePacket>, NodeError> {
        let mut buffer = [0u8; MAX_FRAME_LENGTH];
        let length = match transport.receive(&mut buffer) {
            Ok(Some(length)) => length,
            Ok(None) => {
                trace!("event=no_data link={link}");
                return Ok(None);
            }
            Err(source) => return Err(NodeError::Receive { link, source }),
        };
        let packet = SpacePacket::interpret(&buffer[..length])?;
        debug!(
            "event=packet_received link={link} apid={:#05x} length={length}",
            packet.apid().value()
        );
        Ok(Some(packet))
    }
}

impl<T: Transport + ?Sized> core::fmt::Debug for Node<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Node")
            .field("framer", &self.framer)
            .field("latch", &self.latch)
            .field("subsystems", &self.subsystems.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
use crate::config::SequencePolicy;
#[cfg(test)]
use crate::header::{PacketSequenceCount, PacketType};
#[cfg(test)]
use crate::status::{ObdhState, PayloadState, obdh, payload};
#[cfg(test)]
use crate::transport::{LoopbackTransport, TransportKind};
#[cfg(test)]
use alloc::rc::Rc;
#[cfg(test)]
use core::cell::Cell;

#[cfg(test)]
struct Harness {
    node: Node<LoopbackTransport>,
    ground: LoopbackTransport,
    uplink: LoopbackTransport,
    payload: LoopbackTransport,
    payload_side: LoopbackTransport,
}

/// OBDH node with a UDP uplink to the ground and a CAN-FD link to the payload.
#[cfg(test)]
fn obdh() -> Harness {
    let (uplink, ground) = LoopbackTransport::pair(TransportKind::Udp);
    let (payload_side, payload) = LoopbackTransport::pair(TransportKind::CanFd);
    let mut node = Node::new(FramingConfig::obdh(), Box::new(uplink.clone()));
    node.add_subsystem(Subsystem::Payload, Box::new(payload_side.clone()));
    Harness {
        node,
        ground,
        uplink,
        payload,
        payload_side,
    }
}

#[cfg(test)]
fn ground_command(code: u16) -> Vec<u8> {
    let mut framer = Framer::new(FramingConfig::payload());
    let mut packet = framer.wrap_telecommand(code).unwrap();
    packet.serialize().unwrap()
}

#[cfg(test)]
fn receive(transport: &mut LoopbackTransport) -> Option<SpacePacket> {
    let mut buffer = [0u8; MAX_FRAME_LENGTH];
    let length = transport.receive(&mut buffer).unwrap()?;
    Some(SpacePacket::interpret(&buffer[..length]).unwrap())
}

#[cfg(test)]
fn status_codes(transport: &mut LoopbackTransport) -> Vec<u16> {
    core::iter::from_fn(|| receive(transport))
        .map(|packet| u16::from_be_bytes([packet.user_data()[0], packet.user_data()[1]]))
        .collect()
}

/// Transport whose receives always fail, counting how often it was read.
#[cfg(test)]
struct Unreadable {
    reads: Rc<Cell<usize>>,
}

#[cfg(test)]
impl Transport for Unreadable {
    fn kind(&self) -> TransportKind {
        TransportKind::CanFd
    }

    fn send(&mut self, _frame: &[u8]) -> Result<(), TransportError> {
        Ok(())
    }

    fn receive(&mut self, _buffer: &mut [u8]) -> Result<Option<usize>, TransportError> {
        self.reads.set(self.reads.get() + 1);
        Err(TransportError::Unavailable)
    }
}

#[test]
fn status_reaches_the_uplink() {
    let (uplink, mut ttc) = LoopbackTransport::pair(TransportKind::Can);
    let config = FramingConfig::payload()
        .with_sequence_policy(SequencePolicy::Fixed(PacketSequenceCount::constant(1)));
    let mut node = Node::new(config, Box::new(uplink));
    node.send_status(payload::INFO_5G_PACKET_RECEIVED).unwrap();

    let mut buffer = [0u8; 64];
    let length = ttc.receive(&mut buffer).unwrap().unwrap();
    assert_eq!(
        &buffer[..length],
        &[0x01, 0xab, 0xc0, 0x01, 0x00, 0x01, 0x10, 0x40]
    );
}

#[test]
fn sends_are_retried() {
    let mut h = obdh();
    h.uplink.fail_next_sends(2);
    h.node.send_status(obdh::INFO_STATE_TO_SAFE_MODE).unwrap();
    assert_eq!(h.ground.pending(), 1);

    h.uplink.fail_next_sends(3);
    assert!(matches!(
        h.node.send_status(obdh::INFO_STATE_TO_SAFE_MODE),
        Err(NodeError::Send {
            link: Link::Uplink,
            source: TransportError::Unavailable
        })
    ));
    assert_eq!(h.ground.pending(), 1);
}

#[test]
fn oversized_packets_are_not_sent() {
    let (uplink, ttc) = LoopbackTransport::pair(TransportKind::Can);
    let mut node = Node::new(FramingConfig::payload(), Box::new(uplink));
    let error = node
        .send_sensor_reading(SensorReading::new(0x0900, 0x0102_0304))
        .unwrap_err();
    assert!(matches!(
        error,
        NodeError::Framing(FramingError::PacketTooLargeForTransport { length: 12, max: 8 })
    ));
    assert_eq!(
        error.status(&StatusTable::PAYLOAD),
        Some(payload::ERR_CCSDS_PACKET_TOO_LARGE)
    );
    assert_eq!(ttc.pending(), 0);
}

#[test]
fn local_commands_are_latched() {
    let mut h = obdh();
    h.ground.send(&ground_command(0x0702)).unwrap();
    assert_eq!(h.node.poll_uplink().unwrap(), Some(Route::Local(0x0702)));
    assert_eq!(h.node.latched_command(), Some(0x0702));
    assert_eq!(h.node.poll_uplink().unwrap(), None);
}

#[test]
fn no_command_is_neither_forwarded_nor_latched() {
    let mut h = obdh();
    let (eps_side, eps) = LoopbackTransport::pair(TransportKind::CanFd);
    h.node.add_subsystem(Subsystem::Eps, Box::new(eps_side));

    h.ground.send(&ground_command(0xffff)).unwrap();
    assert_eq!(h.node.poll_uplink().unwrap(), Some(Route::NoCommand));
    assert_eq!(h.payload.pending(), 0);
    assert_eq!(eps.pending(), 0);
    assert_eq!(h.node.latched_command(), None);
    assert_eq!(
        h.node.take_command(|code: u16| ObdhState::try_from(code).is_ok()),
        None
    );

    h.ground.send(&ground_command(0xffff)).unwrap();
    assert_eq!(h.node.drain(), 1);
    assert_eq!(h.ground.pending(), 0);
}

#[test]
fn commands_for_the_payload_are_forwarded() {
    let mut h = obdh();
    h.ground.send(&ground_command(0x1702)).unwrap();
    assert!(matches!(
        h.node.poll_uplink().unwrap(),
        Some(Route::Forward {
            subsystem: Subsystem::Payload,
            ..
        })
    ));
    let forwarded = receive(&mut h.payload).unwrap();
    assert!(forwarded.is_telecommand());
    assert_eq!(forwarded.user_data(), &[0x17, 0x02]);
    assert_eq!(h.node.latched_command(), None);
}

#[test]
fn broadcast_reaches_every_subsystem_and_the_local_latch() {
    let mut h = obdh();
    let (eps_side, mut eps) = LoopbackTransport::pair(TransportKind::CanFd);
    h.node.add_subsystem(Subsystem::Eps, Box::new(eps_side));

    h.ground.send(&ground_command(0xf701)).unwrap();
    assert_eq!(
        h.node.poll_uplink().unwrap(),
        Some(Route::Broadcast {
            state: 0x0701,
            payload: alloc::vec![0xf7, 0x01],
        })
    );
    assert_eq!(h.node.latched_command(), Some(0x0701));
    assert_eq!(receive(&mut h.payload).unwrap().user_data(), &[0x17, 0x01]);
    assert_eq!(receive(&mut eps).unwrap().user_data(), &[0x27, 0x01]);
}

#[test]
fn forwarding_to_an_unregistered_subsystem_fails() {
    let mut h = obdh();
    h.ground.send(&ground_command(0x2001)).unwrap();
    let error = h.node.poll_uplink().unwrap_err();
    assert!(matches!(error, NodeError::UnknownSubsystem(Subsystem::Eps)));
    assert_eq!(
        error.status(&StatusTable::OBDH),
        Some(obdh::ERR_TC_TO_WRONG_SUBSYSTEM)
    );
}

#[test]
fn drain_reports_and_continues() {
    let mut h = obdh();
    h.ground.send(&ground_command(0x5001)).unwrap();
    h.ground.send(&[0x00, 0x01, 0x02]).unwrap();
    h.ground.send(&ground_command(0x0703)).unwrap();
    h.payload.send(&ground_command(0x1040)).unwrap();

    assert_eq!(h.node.drain(), 4);
    assert_eq!(h.node.latched_command(), Some(0x0703));
    assert_eq!(
        status_codes(&mut h.ground),
        [
            obdh::ERR_TC_TO_WRONG_SUBSYSTEM.value(),
            obdh::ERR_CCSDS_PACKET_UNINTERPRETABLE.value()
        ]
    );
    assert_eq!(h.payload_side.pending(), 0);
}

#[test]
fn drain_skips_a_failing_subsystem_and_serves_the_others() {
    let (uplink, mut ground) = LoopbackTransport::pair(TransportKind::Udp);
    let (eps_side, mut eps) = LoopbackTransport::pair(TransportKind::CanFd);
    let reads = Rc::new(Cell::new(0));

    let mut node = Node::<dyn Transport>::new(FramingConfig::obdh(), Box::new(uplink));
    node.add_subsystem(
        Subsystem::Payload,
        Box::new(Unreadable {
            reads: reads.clone(),
        }),
    );
    node.add_subsystem(Subsystem::Eps, Box::new(eps_side));

    let mut framer = Framer::new(FramingConfig::payload());
    let mut telemetry = framer
        .wrap_user_data(PacketType::Telemetry, &[0x20, 0x01])
        .unwrap();
    eps.send(&telemetry.serialize().unwrap()).unwrap();

    assert_eq!(node.drain(), 1);
    assert_eq!(reads.get(), 1);
    assert_eq!(eps.pending(), 0);
    assert_eq!(status_codes(&mut ground), [obdh::ERR_READ_CAN_TELEM.value()]);

    assert_eq!(node.drain(), 0);
    assert_eq!(reads.get(), 2);
}

#[test]
fn drain_stops_on_a_failing_uplink() {
    let reads = Rc::new(Cell::new(0));
    let mut node = Node::new(
        FramingConfig::obdh(),
        Box::new(Unreadable {
            reads: reads.clone(),
        }),
    );
    assert_eq!(node.drain(), 0);
    assert_eq!(reads.get(), 1);
}

#[test]
fn node_is_send_when_its_transports_are() {
    fn assert_send<T: Send>() {}
    assert_send::<Node<dyn Transport + Send>>();
    #[cfg(feature = "std")]
    assert_send::<Node<crate::transport::UdpTransport>>();
}

#[test]
fn payload_failures_without_status_are_only_logged() {
    let (uplink, ttc) = LoopbackTransport::pair(TransportKind::Can);
    let mut node = Node::new(FramingConfig::payload(), Box::new(uplink));
    node.report(&NodeError::Routing(RoutingError::MissingCommandCode { length: 1 }));
    assert_eq!(ttc.pending(), 0);

    node.report(&NodeError::Receive {
        link: Link::Uplink,
        source: TransportError::Unavailable,
    });
    assert_eq!(ttc.pending(), 1);
}

#[test]
fn commands_are_taken_once() {
    let (uplink, mut ttc) = LoopbackTransport::pair(TransportKind::Can);
    let mut node = Node::new(FramingConfig::payload(), Box::new(uplink));
    let is_valid = |code: u16| PayloadState::try_from(code).is_ok();

    assert_eq!(node.take_command(is_valid), None);
    for code in [0x1702, 0x1702] {
        ttc.send(&ground_command(code)).unwrap();
        node.poll_uplink().unwrap();
    }
    assert_eq!(node.take_command(is_valid), Some(0x1702));
    assert_eq!(node.take_command(is_valid), None);

    ttc.send(&ground_command(0x1704)).unwrap();
    node.poll_uplink().unwrap();
    assert_eq!(node.take_command(is_valid), Some(0x1704));

    ttc.send(&ground_command(0x1799)).unwrap();
    node.poll_uplink().unwrap();
    assert_eq!(node.take_command(is_valid), None);
}

#[test]
fn latch_filters_foreign_and_sentinel_codes() {
    let mut latch = CommandLatch::new();
    let is_valid = |code: u16| ObdhState::try_from(code).is_ok();
    latch.latch(CommandLatch::NO_COMMAND);
    assert_eq!(latch.latched(), None);
    latch.latch(0x1702);
    assert_eq!(latch.take_new(Subsystem::Obdh, is_valid), None);
    latch.latch(0x0701);
    assert_eq!(latch.take_new(Subsystem::Obdh, is_valid), Some(0x0701));
    latch.latch(0x0701);
    assert_eq!(latch.take_new(Subsystem::Obdh, is_valid), None);
}

#[test]
fn subsystem_telemetry_is_decoded() {
    let mut h = obdh();
    let mut framer = Framer::new(FramingConfig::payload());
    let mut packet = framer
        .wrap_user_data(PacketType::Telemetry, &payload::INFO_NAV_REQ_RECEIVED.to_be_bytes())
        .unwrap();
    h.payload.send(&packet.serialize().unwrap()).unwrap();

    let received = h.node.poll_subsystem(Subsystem::Payload).unwrap().unwrap();
    assert_eq!(received.user_data(), &[0x10, 0x42]);
    assert!(h.node.poll_subsystem(Subsystem::Payload).unwrap().is_none());
    assert!(matches!(
        h.node.poll_subsystem(Subsystem::Eps),
        Err(NodeError::UnknownSubsystem(Subsystem::Eps))
    ));
}
