//! QoS acknowledgment tracking.
//!
//! [`AckTracker`] owns the packet identifier pool of one connection and one
//! flow per identifier in flight:
//!
//! ```text
//! QoS 1        AwaitingAck ──PUBACK──▶ done
//! QoS 2        AwaitingReceived ──PUBREC (send PUBREL)──▶ AwaitingComplete ──PUBCOMP──▶ done
//! SUBSCRIBE    AwaitingSubAck ──SUBACK──▶ done
//! UNSUBSCRIBE  AwaitingUnsubAck ──UNSUBACK──▶ done
//! ```
//!
//! A finished flow fires its [`Completion`] and then gives its identifier
//! back to the pool. Flows never finish silently: acknowledgment,
//! cancellation, connection loss, or dropping the tracker all fire the
//! completion exactly once.

use std::collections::{HashMap, HashSet};

use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};
use crate::guard::Completion;
use crate::packet_id::PacketIdPool;
use crate::protocol::v4::{Packet, PubComp, PubRec, PubRel, SubAck, UnsubAck};
use crate::types::{PacketId, PublishResult};

/// Operation a flow was started for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    /// QoS 1 publish.
    AtLeastOnce,
    /// QoS 2 publish.
    ExactlyOnce,
    /// SUBSCRIBE.
    Subscribe,
    /// UNSUBSCRIBE.
    Unsubscribe,
}

/// Acknowledgment a live flow is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    /// QoS 1, waiting for PUBACK.
    AwaitingAck,
    /// QoS 2, waiting for PUBREC.
    AwaitingReceived,
    /// QoS 2, PUBREL sent, waiting for PUBCOMP.
    AwaitingComplete,
    /// Waiting for SUBACK.
    AwaitingSubAck,
    /// Waiting for UNSUBACK.
    AwaitingUnsubAck,
}

impl FlowState {
    fn initial(kind: FlowKind) -> Self {
        match kind {
            FlowKind::AtLeastOnce => FlowState::AwaitingAck,
            FlowKind::ExactlyOnce => FlowState::AwaitingReceived,
            FlowKind::Subscribe => FlowState::AwaitingSubAck,
            FlowKind::Unsubscribe => FlowState::AwaitingUnsubAck,
        }
    }
}

/// Result delivered to a flow's completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowResult {
    Publish(PublishResult),
    Subscribe(SubAck),
    Unsubscribe(UnsubAck),
}

/// Handle naming one specific flow.
///
/// Identifiers are reused once a flow ends; the sequence number keeps a
/// stale ticket from touching a newer flow on the same identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowTicket {
    id: PacketId,
    seq: u64,
}

impl FlowTicket {
    /// Identifier of the flow.
    pub fn id(&self) -> PacketId {
        self.id
    }
}

struct Flow {
    state: FlowState,
    seq: u64,
    completion: Completion<FlowResult>,
    pubrec: Option<PubRec>,
}

/// Per-connection acknowledgment state.
#[derive(Default)]
pub struct AckTracker {
    ids: PacketIdPool,
    flows: HashMap<PacketId, Flow>,
    // Inbound QoS 2 publishes answered with PUBREC, waiting for PUBREL.
    inbound_qos2: HashSet<PacketId>,
    next_seq: u64,
}

impl AckTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a free identifier.
    pub fn acquire(&mut self) -> Result<PacketId> {
        self.ids.acquire().ok_or(Error::IdentifierExhausted)
    }

    /// Reserve a caller-chosen identifier.
    pub fn register(&mut self, id: PacketId) -> Result<()> {
        self.ids.register(id)
    }

    /// Return an identifier that was acquired but never used for a flow.
    pub fn release(&mut self, id: PacketId) -> Result<()> {
        if self.flows.contains_key(&id) {
            return Err(Error::PacketIdInUse(id));
        }
        self.ids.release(id)
    }

    /// Whether `id` is held, by a flow or by a caller.
    pub fn is_held(&self, id: PacketId) -> bool {
        self.ids.is_in_use(id)
    }

    /// Number of identifiers held.
    pub fn ids_in_use(&self) -> usize {
        self.ids.in_use()
    }

    /// Number of live flows.
    pub fn in_flight(&self) -> usize {
        self.flows.len()
    }

    /// Current state of the flow on `id`.
    pub fn state(&self, id: PacketId) -> Option<FlowState> {
        self.flows.get(&id).map(|flow| flow.state)
    }

    /// Start a flow on a held identifier.
    ///
    /// Call before transmitting the request so an early acknowledgment finds
    /// its flow. On error `completion` is dropped and fires
    /// [`Error::Abandoned`].
    pub fn begin(
        &mut self,
        id: PacketId,
        kind: FlowKind,
        completion: Completion<FlowResult>,
    ) -> Result<FlowTicket> {
        if !self.ids.is_in_use(id) {
            return Err(Error::PacketIdNotHeld(id));
        }
        if self.flows.contains_key(&id) {
            return Err(Error::PacketIdInUse(id));
        }

        self.next_seq += 1;
        let seq = self.next_seq;
        let state = FlowState::initial(kind);
        self.flows.insert(
            id,
            Flow {
                state,
                seq,
                completion,
                pubrec: None,
            },
        );
        trace!(%id, ?state, "flow started");

        Ok(FlowTicket { id, seq })
    }

    /// Advance the flow an acknowledgment refers to.
    ///
    /// Returns the packet that must be sent in response: PUBREL after a
    /// PUBREC, PUBCOMP after a PUBREL. An acknowledgment with no matching
    /// flow, or one the flow is not waiting for, yields
    /// [`Error::UnexpectedAck`] and changes nothing.
    pub fn handle_ack(&mut self, packet: &Packet) -> Result<Option<Packet>> {
        let pkid = packet.ack_id().ok_or_else(|| Error::UnexpectedPacket {
            expected: "acknowledgment".to_string(),
            got: packet.name().to_string(),
        })?;
        let unexpected = || Error::UnexpectedAck {
            packet: packet.name(),
            id: pkid,
        };
        let id = PacketId::new(pkid).ok_or_else(unexpected)?;

        if let Packet::PubRel(_) = packet {
            if !self.inbound_qos2.remove(&id) {
                debug!(%id, "PUBREL for unknown inbound publish");
            }
            return Ok(Some(Packet::PubComp(PubComp { pkid })));
        }

        let flow = self.flows.get_mut(&id).ok_or_else(unexpected)?;
        match (flow.state, packet) {
            (FlowState::AwaitingAck, Packet::PubAck(ack)) => {
                let result = PublishResult {
                    packet_id: Some(id),
                    puback: Some(*ack),
                    ..Default::default()
                };
                self.finish(id, Ok(FlowResult::Publish(result)));
                Ok(None)
            }
            (FlowState::AwaitingReceived, Packet::PubRec(rec)) => {
                flow.state = FlowState::AwaitingComplete;
                flow.pubrec = Some(*rec);
                trace!(%id, "PUBREC received, releasing");
                Ok(Some(Packet::PubRel(PubRel { pkid })))
            }
            (FlowState::AwaitingComplete, Packet::PubComp(comp)) => {
                let result = PublishResult {
                    packet_id: Some(id),
                    pubrec: flow.pubrec,
                    pubcomp: Some(*comp),
                    ..Default::default()
                };
                self.finish(id, Ok(FlowResult::Publish(result)));
                Ok(None)
            }
            (FlowState::AwaitingSubAck, Packet::SubAck(ack)) => {
                let ack = ack.clone();
                self.finish(id, Ok(FlowResult::Subscribe(ack)));
                Ok(None)
            }
            (FlowState::AwaitingUnsubAck, Packet::UnsubAck(ack)) => {
                let ack = *ack;
                self.finish(id, Ok(FlowResult::Unsubscribe(ack)));
                Ok(None)
            }
            (state, _) => {
                warn!(%id, ?state, packet = packet.name(), "acknowledgment does not match flow state");
                Err(unexpected())
            }
        }
    }

    /// Record an inbound QoS 2 publish answered with PUBREC.
    ///
    /// Returns `false` if the identifier is already waiting for its PUBREL,
    /// i.e. the publish is a redelivery that must not be handed to the
    /// application again.
    pub fn receive_qos2(&mut self, id: PacketId) -> bool {
        self.inbound_qos2.insert(id)
    }

    /// Cancel the flow named by `ticket`.
    ///
    /// Returns `false` if that flow already ended. A late acknowledgment for
    /// a cancelled flow is reported as unexpected.
    pub fn cancel(&mut self, ticket: FlowTicket) -> bool {
        match self.flows.get(&ticket.id) {
            Some(flow) if flow.seq == ticket.seq => {
                debug!(id = %ticket.id, "flow cancelled");
                self.finish(ticket.id, Err(Error::Cancelled));
                true
            }
            _ => false,
        }
    }

    /// Fail one flow with `err`. Returns `false` if there is none.
    pub fn fail(&mut self, ticket: FlowTicket, err: Error) -> bool {
        match self.flows.get(&ticket.id) {
            Some(flow) if flow.seq == ticket.seq => {
                self.finish(ticket.id, Err(err));
                true
            }
            _ => false,
        }
    }

    /// Connection loss: fail every live flow with
    /// [`Error::ConnectionClosed`] and release its identifier.
    ///
    /// Returns the number of flows failed.
    pub fn fail_all(&mut self) -> usize {
        let ids: Vec<PacketId> = self.flows.keys().copied().collect();
        for id in &ids {
            self.finish(*id, Err(Error::ConnectionClosed));
        }
        self.inbound_qos2.clear();
        if !ids.is_empty() {
            debug!(count = ids.len(), "failed pending flows on connection loss");
        }
        ids.len()
    }

    fn finish(&mut self, id: PacketId, result: Result<FlowResult>) {
        let Some(mut flow) = self.flows.remove(&id) else {
            return;
        };

        if let Err(e) = flow.completion.fire(result) {
            error!(%id, "flow completion fired twice: {}", e);
        }
        if let Err(e) = self.ids.release(id) {
            error!(%id, "releasing finished flow identifier: {}", e);
        }
        trace!(%id, "flow finished");
    }
}

impl std::fmt::Debug for AckTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AckTracker")
            .field("ids", &self.ids)
            .field("flows", &self.flows.len())
            .field("inbound_qos2", &self.inbound_qos2.len())
            .finish()
    }
}
