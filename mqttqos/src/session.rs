//! MQTT client session.
//!
//! A [`Session`] owns one broker connection. A background reader task
//! reassembles inbound packets, routes acknowledgments through the
//! connection's [`AckTracker`] and queues inbound messages for
//! [`Session::recv`]. Publishing at QoS 1/2, subscribing and unsubscribing
//! suspend until the broker acknowledges, the connection goes away, or the
//! caller drops the future (which cancels the flow).

use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::guard::{Completion, ScopeGuard, SharedScopeGuard};
use crate::protocol::v4::{self, ConnAck, ConnectReturnCode, Packet, PubAck, PubRec, Publish, SubAck, Will};
use crate::protocol::{self, Framer, MAX_PACKET_SIZE};
use crate::tracker::{AckTracker, FlowKind, FlowResult, FlowTicket};
use crate::transport;
use crate::types::{Message, PacketId, PublishResult, QoS};

type SharedWriter = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;
type SharedTracker = Arc<parking_lot::Mutex<AckTracker>>;
type FlowReceiver = oneshot::Receiver<Result<FlowResult>>;

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Broker address (`host:port` or `mqtt://host:port`).
    pub addr: String,
    /// Client ID.
    pub client_id: String,
    /// Username for authentication.
    pub username: Option<String>,
    /// Password for authentication.
    pub password: Option<Vec<u8>>,
    /// Keep alive interval in seconds.
    pub keep_alive: u16,
    /// Clean session flag.
    pub clean_session: bool,
    /// Maximum inbound packet size.
    pub max_packet_size: usize,
    /// Time allowed for dialing and the CONNECT/CONNACK exchange together.
    pub connect_timeout: Duration,
    /// Enable automatic keep-alive (sends PINGREQ at keep_alive/2 intervals).
    pub auto_keepalive: bool,
    /// Undrained inbound items at which a slow-consumer warning is logged.
    ///
    /// The reader never waits for [`Session::recv`], so acknowledgments keep
    /// flowing while the application is not receiving.
    pub inbound_high_water: usize,
    /// Last Will and Testament sent with CONNECT.
    pub will: Option<Will>,
}

impl SessionConfig {
    /// Create a new session config.
    pub fn new(addr: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            client_id: client_id.into(),
            username: None,
            password: None,
            keep_alive: 60,
            clean_session: true,
            max_packet_size: MAX_PACKET_SIZE,
            connect_timeout: Duration::from_secs(10),
            auto_keepalive: true,
            inbound_high_water: 256,
            will: None,
        }
    }

    /// Set credentials.
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<Vec<u8>>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set keep alive interval.
    pub fn with_keep_alive(mut self, seconds: u16) -> Self {
        self.keep_alive = seconds;
        self
    }

    /// Set clean session flag.
    pub fn with_clean_session(mut self, clean: bool) -> Self {
        self.clean_session = clean;
        self
    }

    /// Set maximum inbound packet size.
    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size;
        self
    }

    /// Set connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Enable or disable automatic keep-alive.
    pub fn with_auto_keepalive(mut self, enabled: bool) -> Self {
        self.auto_keepalive = enabled;
        self
    }

    /// Set the inbound backlog warning threshold.
    pub fn with_inbound_high_water(mut self, items: usize) -> Self {
        self.inbound_high_water = items;
        self
    }

    /// Set the Last Will and Testament.
    pub fn with_will(mut self, topic: impl Into<String>, payload: impl Into<Bytes>, qos: QoS, retain: bool) -> Self {
        self.will = Some(Will {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
        });
        self
    }

    fn validate(&self) -> Result<()> {
        if self.client_id.is_empty() && !self.clean_session {
            return Err(Error::InvalidConfig(
                "empty client id requires a clean session".to_string(),
            ));
        }
        if self.inbound_high_water == 0 {
            return Err(Error::InvalidConfig("inbound high water must be positive".to_string()));
        }
        if let Some(will) = &self.will {
            if will.topic.is_empty() || will.topic.contains(['+', '#']) {
                return Err(Error::InvalidConfig(format!("invalid will topic {:?}", will.topic)));
            }
        }
        if self.max_packet_size < 2 {
            return Err(Error::InvalidConfig(format!(
                "max packet size {} is below the 2-byte minimum",
                self.max_packet_size
            )));
        }
        Ok(())
    }
}

fn flow_kind(qos: QoS) -> Option<FlowKind> {
    match qos {
        QoS::AtMostOnce => None,
        QoS::AtLeastOnce => Some(FlowKind::AtLeastOnce),
        QoS::ExactlyOnce => Some(FlowKind::ExactlyOnce),
    }
}

fn mismatched(expected: &str, got: FlowResult) -> Error {
    Error::UnexpectedPacket {
        expected: expected.to_string(),
        got: format!("{:?}", got),
    }
}

/// Shared state for keepalive task.
struct KeepaliveState {
    writer: SharedWriter,
    running: Arc<AtomicBool>,
    interval: Duration,
}

/// Shared state for the inbound reader task.
struct ReaderState {
    writer: SharedWriter,
    tracker: SharedTracker,
    inbound: mpsc::UnboundedSender<Result<Message>>,
    backlog: Arc<AtomicUsize>,
    high_water: usize,
    running: Arc<AtomicBool>,
    _teardown: SharedScopeGuard,
}

/// MQTT 3.1.1 client session with QoS 0/1/2 delivery.
pub struct Session {
    writer: SharedWriter,
    tracker: SharedTracker,
    inbound: Mutex<mpsc::UnboundedReceiver<Result<Message>>>,
    backlog: Arc<AtomicUsize>,
    connack: ConnAck,
    client_id: String,
    /// Flag to stop background tasks.
    running: Arc<AtomicBool>,
    reader_task: JoinHandle<()>,
    keepalive_task: Option<JoinHandle<()>>,
    _teardown: SharedScopeGuard,
}

impl Session {
    /// Dial the broker at `config.addr` and connect.
    pub async fn connect(config: SessionConfig) -> Result<Self> {
        debug!("Connecting to {} as {}", config.addr, config.client_id);

        let deadline = Instant::now() + config.connect_timeout;
        let stream = tokio::time::timeout_at(deadline, transport::dial(&config.addr))
            .await
            .map_err(|_| Error::Timeout(format!("dialing {}", config.addr)))??;
        Self::establish(stream, config, deadline).await
    }

    /// Connect over an already established stream.
    ///
    /// Sends CONNECT and waits up to `config.connect_timeout` for CONNACK.
    pub async fn connect_with<S>(stream: S, config: SessionConfig) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let deadline = Instant::now() + config.connect_timeout;
        Self::establish(stream, config, deadline).await
    }

    async fn establish<S>(stream: S, config: SessionConfig, deadline: Instant) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        config.validate()?;

        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut framer = Framer::new(config.max_packet_size);

        let connect = v4::create_connect(
            &config.client_id,
            config.username.as_deref(),
            config.password.as_deref(),
            config.keep_alive,
            config.clean_session,
            config.will.clone(),
        );
        let handshake = async {
            protocol::write_packet(&mut writer, &connect).await?;
            protocol::read_packet(&mut reader, &mut framer).await
        };
        let packet = match tokio::time::timeout_at(deadline, handshake).await {
            Ok(result) => result?,
            Err(_) => return Err(Error::Timeout("waiting for CONNACK".to_string())),
        };

        let connack = match packet {
            Packet::ConnAck(connack) => connack,
            other => {
                return Err(Error::UnexpectedPacket {
                    expected: "CONNACK".to_string(),
                    got: other.name().to_string(),
                });
            }
        };
        if connack.code != ConnectReturnCode::Success {
            return Err(Error::ConnectionRefused(format!("{:?}", connack.code)));
        }
        debug!("Connected successfully, session_present={}", connack.session_present);

        let boxed: Box<dyn AsyncWrite + Send + Unpin> = Box::new(writer);
        let writer: SharedWriter = Arc::new(Mutex::new(boxed));
        let tracker: SharedTracker = Arc::new(parking_lot::Mutex::new(AckTracker::new()));
        let running = Arc::new(AtomicBool::new(true));

        // Whoever lets go of the connection last fails what is still pending.
        let teardown = {
            let tracker = Arc::clone(&tracker);
            let running = Arc::clone(&running);
            SharedScopeGuard::new(move || {
                running.store(false, Ordering::SeqCst);
                let failed = tracker.lock().fail_all();
                if failed > 0 {
                    debug!(failed, "Session torn down with pending flows");
                }
            })
        };

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let backlog = Arc::new(AtomicUsize::new(0));
        let reader_state = ReaderState {
            writer: Arc::clone(&writer),
            tracker: Arc::clone(&tracker),
            inbound: inbound_tx,
            backlog: Arc::clone(&backlog),
            high_water: config.inbound_high_water,
            running: Arc::clone(&running),
            _teardown: teardown.clone(),
        };
        let reader_task = tokio::spawn(run_reader(reader, framer, reader_state));

        // Start keepalive task if enabled
        let keepalive_task = if config.auto_keepalive && config.keep_alive > 0 {
            let keepalive_state = KeepaliveState {
                writer: Arc::clone(&writer),
                running: Arc::clone(&running),
                interval: Duration::from_secs((config.keep_alive / 2).max(1) as u64),
            };
            debug!("Started auto keepalive task (interval={}s)", config.keep_alive / 2);
            Some(tokio::spawn(keepalive_task(keepalive_state)))
        } else {
            None
        };

        Ok(Self {
            writer,
            tracker,
            inbound: Mutex::new(inbound_rx),
            backlog,
            connack,
            client_id: config.client_id,
            running,
            reader_task,
            keepalive_task,
            _teardown: teardown,
        })
    }

    /// Get the client ID.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// CONNACK returned by the broker.
    pub fn connack(&self) -> ConnAck {
        self.connack
    }

    /// Check if the connection is still up.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of publishes, subscribes and unsubscribes awaiting
    /// acknowledgment.
    pub fn in_flight(&self) -> usize {
        self.tracker.lock().in_flight()
    }

    /// Number of packet identifiers currently held.
    pub fn packet_ids_in_use(&self) -> usize {
        self.tracker.lock().ids_in_use()
    }

    /// Reserve a packet identifier for [`Session::publish_with_id`].
    pub fn acquire_packet_id(&self) -> Result<PacketId> {
        self.tracker.lock().acquire()
    }

    /// Give back an identifier obtained from [`Session::acquire_packet_id`]
    /// that was never used.
    pub fn release_packet_id(&self, id: PacketId) -> Result<()> {
        self.tracker.lock().release(id)
    }

    /// Publish a message.
    ///
    /// QoS 0 resolves once written. QoS 1 resolves on PUBACK, QoS 2 on
    /// PUBCOMP. Dropping the returned future cancels the flow.
    pub async fn publish(&self, topic: &str, payload: impl Into<Bytes>, qos: QoS) -> Result<PublishResult> {
        self.publish_message(Message::new(topic, payload).with_qos(qos)).await
    }

    /// Publish a message, honoring its QoS and retain flag.
    pub async fn publish_message(&self, message: Message) -> Result<PublishResult> {
        let Some(kind) = flow_kind(message.qos) else {
            return self.publish_qos0(message).await;
        };
        let (ticket, rx) = self.begin_flow(None, kind)?;
        self.run_publish(ticket, rx, message).await
    }

    /// Publish with an identifier obtained from
    /// [`Session::acquire_packet_id`].
    ///
    /// The identifier is released when the flow ends. At QoS 0 no identifier
    /// is used and it is released before sending.
    pub async fn publish_with_id(
        &self,
        id: PacketId,
        topic: &str,
        payload: impl Into<Bytes>,
        qos: QoS,
    ) -> Result<PublishResult> {
        let message = Message::new(topic, payload).with_qos(qos);
        let Some(kind) = flow_kind(qos) else {
            self.release_packet_id(id)?;
            return self.publish_qos0(message).await;
        };
        let (ticket, rx) = self.begin_flow(Some(id), kind)?;
        self.run_publish(ticket, rx, message).await
    }

    /// Subscribe to topic filters.
    ///
    /// The SUBACK is returned as is; a filter the broker refused shows up as
    /// [`v4::SubscribeReasonCode::Failure`] at its position.
    pub async fn subscribe(&self, filters: &[(&str, QoS)]) -> Result<SubAck> {
        if filters.is_empty() {
            return Err(Error::Protocol("SUBSCRIBE needs at least one topic filter".to_string()));
        }

        let (ticket, rx) = self.begin_flow(None, FlowKind::Subscribe)?;
        debug!("Subscribing to {:?} with pkid={}", filters, ticket.id());

        let packet = v4::create_subscribe(ticket.id().get(), filters);
        match self.run_flow(ticket, rx, packet).await? {
            FlowResult::Subscribe(suback) => {
                debug!("Received SubAck for pkid={}: {:?}", suback.pkid, suback.return_codes);
                Ok(suback)
            }
            other => Err(mismatched("SUBACK", other)),
        }
    }

    /// Unsubscribe from topics.
    pub async fn unsubscribe(&self, topics: &[&str]) -> Result<()> {
        if topics.is_empty() {
            return Err(Error::Protocol("UNSUBSCRIBE needs at least one topic".to_string()));
        }

        let (ticket, rx) = self.begin_flow(None, FlowKind::Unsubscribe)?;
        debug!("Unsubscribing from {:?} with pkid={}", topics, ticket.id());

        let packet = v4::create_unsubscribe(ticket.id().get(), topics);
        match self.run_flow(ticket, rx, packet).await? {
            FlowResult::Unsubscribe(_) => Ok(()),
            other => Err(mismatched("UNSUBACK", other)),
        }
    }

    /// Receive the next inbound message.
    ///
    /// Protocol violations seen on the connection (unexpected
    /// acknowledgments, undecodable packets) are returned as errors without
    /// closing it. Fails with [`Error::ConnectionClosed`] once the
    /// connection is gone and the queue is drained.
    pub async fn recv(&self) -> Result<Message> {
        let mut inbound = self.inbound.lock().await;
        match inbound.recv().await {
            Some(item) => {
                self.backlog.fetch_sub(1, Ordering::SeqCst);
                item
            }
            None => Err(Error::ConnectionClosed),
        }
    }

    /// Number of inbound messages and error reports not yet taken by [`Session::recv`].
    pub fn inbound_backlog(&self) -> usize {
        self.backlog.load(Ordering::SeqCst)
    }

    /// Receive a message with timeout.
    pub async fn recv_timeout(&self, timeout: Duration) -> Result<Option<Message>> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Send a ping request.
    pub async fn ping(&self) -> Result<()> {
        trace!("Sending PingReq");
        self.send(&Packet::PingReq).await
    }

    /// Disconnect from the broker.
    ///
    /// Pending flows fail with [`Error::ConnectionClosed`].
    pub async fn disconnect(&self) -> Result<()> {
        debug!("Disconnecting");

        // Stop background tasks and refuse new flows
        self.running.store(false, Ordering::SeqCst);

        let sent = {
            let mut writer = self.writer.lock().await;
            let sent = protocol::write_packet(&mut *writer, &Packet::Disconnect).await;
            if let Err(e) = writer.shutdown().await {
                trace!("Writer shutdown failed: {}", e);
            }
            sent
        };

        let failed = self.tracker.lock().fail_all();
        if failed > 0 {
            debug!(failed, "Pending flows failed by disconnect");
        }

        self.reader_task.abort();
        if let Some(task) = &self.keepalive_task {
            task.abort();
        }
        sent
    }

    async fn send(&self, packet: &Packet) -> Result<()> {
        if !self.is_running() {
            return Err(Error::ConnectionClosed);
        }
        let mut writer = self.writer.lock().await;
        protocol::write_packet(&mut *writer, packet).await
    }

    /// Start a flow on `id`, or on a freshly acquired identifier.
    fn begin_flow(&self, id: Option<PacketId>, kind: FlowKind) -> Result<(FlowTicket, FlowReceiver)> {
        let mut tracker = self.tracker.lock();
        // Checked under the tracker lock: a closing reader stores the flag
        // before failing everything under the same lock.
        if !self.is_running() {
            return Err(Error::ConnectionClosed);
        }

        let (id, acquired) = match id {
            Some(id) => (id, false),
            None => (tracker.acquire()?, true),
        };
        let (tx, rx) = oneshot::channel();
        match tracker.begin(id, kind, Completion::from_sender(tx)) {
            Ok(ticket) => Ok((ticket, rx)),
            Err(e) => {
                if acquired {
                    let _ = tracker.release(id);
                }
                Err(e)
            }
        }
    }

    /// Transmit the request of a started flow and wait for its outcome.
    async fn run_flow(&self, ticket: FlowTicket, rx: FlowReceiver, packet: Packet) -> Result<FlowResult> {
        let cancel_on_drop = {
            let tracker = Arc::clone(&self.tracker);
            ScopeGuard::new(move || {
                tracker.lock().cancel(ticket);
            })
        };

        if let Err(e) = self.send(&packet).await {
            debug!(id = %ticket.id(), "Sending {} failed: {}", packet.name(), e);
            return Err(e);
        }

        let result = rx.await.unwrap_or_else(|_| Err(Error::Abandoned));
        cancel_on_drop.dismiss();
        result
    }

    async fn run_publish(&self, ticket: FlowTicket, rx: FlowReceiver, message: Message) -> Result<PublishResult> {
        trace!(
            "Publishing to {} ({} bytes, {:?}, pkid={})",
            message.topic,
            message.payload.len(),
            message.qos,
            ticket.id()
        );

        let packet = v4::create_publish(
            &message.topic,
            message.payload,
            message.qos,
            ticket.id().get(),
            message.retain,
        );
        match self.run_flow(ticket, rx, packet).await? {
            FlowResult::Publish(result) => Ok(result),
            other => Err(mismatched("publish acknowledgment", other)),
        }
    }

    async fn publish_qos0(&self, message: Message) -> Result<PublishResult> {
        trace!("Publishing to {} ({} bytes)", message.topic, message.payload.len());

        let packet = v4::create_publish(&message.topic, message.payload, QoS::AtMostOnce, 0, message.retain);
        self.send(&packet).await?;
        Ok(PublishResult::default())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.reader_task.abort();
        if let Some(task) = &self.keepalive_task {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("client_id", &self.client_id)
            .field("running", &self.is_running())
            .field("tracker", &self.tracker)
            .finish()
    }
}

impl ReaderState {
    async fn dispatch(&self, packet: Packet) -> Result<()> {
        match packet {
            Packet::Publish(publish) => self.handle_publish(publish).await,
            Packet::PingResp => {
                trace!("Received PingResp");
                Ok(())
            }
            packet if packet.ack_id().is_some() => {
                let reply = {
                    let mut tracker = self.tracker.lock();
                    tracker.handle_ack(&packet)
                }?;
                if let Some(reply) = reply {
                    trace!("Answering {} with {}", packet.name(), reply.name());
                    self.send(&reply).await?;
                }
                Ok(())
            }
            other => Err(Error::UnexpectedPacket {
                expected: "PUBLISH or acknowledgment".to_string(),
                got: other.name().to_string(),
            }),
        }
    }

    async fn handle_publish(&self, publish: Publish) -> Result<()> {
        trace!("Received message on {} ({:?})", publish.topic, publish.qos);

        let pkid = publish.pkid;
        let message = Message {
            topic: publish.topic,
            payload: publish.payload,
            qos: publish.qos,
            retain: publish.retain,
        };

        match message.qos {
            QoS::AtMostOnce => {
                self.deliver(message);
                Ok(())
            }
            QoS::AtLeastOnce => {
                self.deliver(message);
                self.send(&Packet::PubAck(PubAck { pkid })).await
            }
            QoS::ExactlyOnce => {
                let id = PacketId::new(pkid)
                    .ok_or_else(|| Error::Protocol("QoS 2 PUBLISH without packet identifier".to_string()))?;
                let first = {
                    let mut tracker = self.tracker.lock();
                    tracker.receive_qos2(id)
                };
                if first {
                    self.deliver(message);
                } else {
                    debug!(%id, "Duplicate QoS 2 PUBLISH, not delivered again");
                }
                self.send(&Packet::PubRec(PubRec { pkid })).await
            }
        }
    }

    fn deliver(&self, message: Message) {
        self.enqueue(Ok(message));
    }

    fn report(&self, err: Error) {
        warn!("Protocol violation: {}", err);
        self.enqueue(Err(err));
    }

    /// Queue an item for `recv` without ever waiting on the application.
    fn enqueue(&self, item: Result<Message>) {
        let backlog = self.backlog.fetch_add(1, Ordering::SeqCst) + 1;
        if self.inbound.send(item).is_err() {
            self.backlog.fetch_sub(1, Ordering::SeqCst);
            trace!("Inbound queue closed, item dropped");
            return;
        }
        if backlog == self.high_water {
            warn!(backlog, "Inbound backlog reached high water, recv() is falling behind");
        }
    }

    async fn send(&self, packet: &Packet) -> Result<()> {
        let mut writer = self.writer.lock().await;
        protocol::write_packet(&mut *writer, packet).await
    }
}

/// Background task reading the connection until it fails.
async fn run_reader<R: AsyncRead + Unpin>(mut reader: R, mut framer: Framer, state: ReaderState) {
    loop {
        let frame = match protocol::read_frame(&mut reader, &mut framer).await {
            Ok(frame) => frame,
            Err(Error::ConnectionClosed) => {
                debug!("Connection closed by peer");
                break;
            }
            Err(e) => {
                warn!("Connection lost: {}", e);
                break;
            }
        };

        let result = match Packet::decode(frame) {
            Ok(packet) => state.dispatch(packet).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {}
            Err(e) if e.is_fatal() => {
                warn!("Connection lost: {}", e);
                break;
            }
            Err(e) => state.report(e),
        }
    }

    state.running.store(false, Ordering::SeqCst);
    let failed = state.tracker.lock().fail_all();
    debug!(failed, "Reader stopped");
}

/// Background task for automatic keep-alive.
async fn keepalive_task(state: KeepaliveState) {
    loop {
        tokio::time::sleep(state.interval).await;

        if !state.running.load(Ordering::SeqCst) {
            trace!("Keepalive task stopping");
            break;
        }

        let result = {
            let mut writer = state.writer.lock().await;
            protocol::write_packet(&mut *writer, &Packet::PingReq).await
        };

        if let Err(e) = result {
            warn!("Keepalive ping failed: {}", e);
            state.running.store(false, Ordering::SeqCst);
            break;
        }

        trace!("Keepalive ping sent");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::new("127.0.0.1:1883", "test-client");

        assert_eq!(config.addr, "127.0.0.1:1883");
        assert_eq!(config.client_id, "test-client");
        assert_eq!(config.keep_alive, 60);
        assert!(config.clean_session);
        assert_eq!(config.max_packet_size, MAX_PACKET_SIZE);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert!(config.auto_keepalive);
        assert_eq!(config.inbound_high_water, 256);
        assert!(config.will.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_session_config_builder() {
        let config = SessionConfig::new("mqtt://broker:1883", "test-client")
            .with_credentials("user", b"pass".to_vec())
            .with_keep_alive(30)
            .with_clean_session(false)
            .with_max_packet_size(4096)
            .with_connect_timeout(Duration::from_millis(500))
            .with_auto_keepalive(false)
            .with_inbound_high_water(8)
            .with_will("status/test-client", "gone", QoS::AtLeastOnce, true);

        assert_eq!(config.username, Some("user".to_string()));
        assert_eq!(config.password, Some(b"pass".to_vec()));
        assert_eq!(config.keep_alive, 30);
        assert!(!config.clean_session);
        assert_eq!(config.max_packet_size, 4096);
        assert_eq!(config.connect_timeout, Duration::from_millis(500));
        assert!(!config.auto_keepalive);
        assert_eq!(config.inbound_high_water, 8);
        let will = config.will.unwrap();
        assert_eq!(will.topic, "status/test-client");
        assert_eq!(will.payload, Bytes::from_static(b"gone"));
        assert_eq!(will.qos, QoS::AtLeastOnce);
        assert!(will.retain);
    }

    #[test]
    fn test_session_config_validate() {
        let config = SessionConfig::new("broker", "").with_clean_session(false);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = SessionConfig::new("broker", "").with_clean_session(true);
        assert!(config.validate().is_ok());

        let config = SessionConfig::new("broker", "c").with_inbound_high_water(0);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = SessionConfig::new("broker", "c").with_will("status/#", "x", QoS::AtMostOnce, false);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = SessionConfig::new("broker", "c").with_will("", "x", QoS::AtMostOnce, false);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = SessionConfig::new("broker", "c").with_max_packet_size(1);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_handshake_uses_given_deadline() {
        // A silent peer: CONNACK never arrives.
        let (client, _server) = tokio::io::duplex(1024);
        let config = SessionConfig::new("in-memory", "c")
            .with_auto_keepalive(false)
            .with_connect_timeout(Duration::from_secs(30));

        let started = Instant::now();
        let result = Session::establish(client, config, started + Duration::from_millis(100)).await;

        assert!(matches!(result, Err(Error::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_flow_kind() {
        assert_eq!(flow_kind(QoS::AtMostOnce), None);
        assert_eq!(flow_kind(QoS::AtLeastOnce), Some(FlowKind::AtLeastOnce));
        assert_eq!(flow_kind(QoS::ExactlyOnce), Some(FlowKind::ExactlyOnce));
    }
}
