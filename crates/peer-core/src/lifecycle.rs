//! Session lifecycle controller
//!
//! The controller is the sole owner of the current [`Connection`] and of the
//! chat channel and media session layered on it. All of that state lives in
//! one event-loop task; the [`LifecycleController`] handle only posts
//! commands to it.
//!
//! ```text
//!  handle ──commands──▶ ┌────────────┐ ◀──inbound dials── rendezvous
//!                       │ event loop │ ◀──link events──── link pump (per connection)
//!  subscribers ◀─events─└────────────┘ ◀──completions──── dial / capture tasks
//! ```
//!
//! Every internal event carries the [`ConnectionId`] it belongs to. Events
//! for anything other than the current, not yet closed connection are
//! dropped, which keeps late callbacks from touching a torn-down session.
//! Local hang-up, remote hang-up, transport failure, replacement and
//! shutdown all go through the same teardown path.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument, Level};

use peerlink_infra_common::logging::LogContext;

use crate::capture::{CaptureDevice, MediaSinks, MediaStream};
use crate::chat::{ChatChannel, ChatMessage};
use crate::config::{BusyPolicy, PeerConfig};
use crate::error::{CaptureResult, DialError, PeerError, PeerResult, SendError, TransportError};
use crate::events::{EventEmitter, EventStream, PeerEvent};
use crate::media::MediaSession;
use crate::negotiation::{self, Connection};
use crate::registration::SessionHandle;
use crate::transport::{LinkEvent, LinkHandle};
use crate::types::{CloseReason, ConnectionId, ConnectionInfo, ConnectionState, Identity, LifecycleState};

type DialReply = oneshot::Sender<Result<ConnectionInfo, DialError>>;

enum Command {
    Dial { remote: String, reply: DialReply },
    Send { body: String, reply: oneshot::Sender<Result<ChatMessage, SendError>> },
    HangUp { reply: oneshot::Sender<bool> },
    Current { reply: oneshot::Sender<Option<ConnectionInfo>> },
    State { reply: oneshot::Sender<LifecycleState> },
    Transcript { reply: oneshot::Sender<Vec<ChatMessage>> },
    Shutdown { reply: oneshot::Sender<()> },
}

enum Internal {
    DialCompleted {
        connection: ConnectionId,
        result: Result<LinkHandle, DialError>,
    },
    Link {
        connection: ConnectionId,
        event: LinkEvent,
    },
    /// The link's event source ended without a close event
    LinkDropped { connection: ConnectionId },
    Capture {
        connection: ConnectionId,
        result: CaptureResult<MediaStream>,
    },
}

/// Handle to a running controller; cheap to clone
#[derive(Debug, Clone)]
pub struct LifecycleController {
    commands: mpsc::Sender<Command>,
    events: EventEmitter,
    identity: Identity,
}

impl LifecycleController {
    /// Start the event loop for a registered session handle
    ///
    /// Publishes `Registered` and `Unnamed -> Idle` before the loop runs.
    pub fn spawn(
        handle: Arc<SessionHandle>,
        capture: Arc<dyn CaptureDevice>,
        sinks: MediaSinks,
        config: PeerConfig,
    ) -> PeerResult<Self> {
        let events = EventEmitter::new(config.event_capacity);
        Self::spawn_with_emitter(handle, capture, sinks, config, events)
    }

    /// Like [`spawn`](Self::spawn) but publishing on an existing emitter
    pub fn spawn_with_emitter(
        handle: Arc<SessionHandle>,
        capture: Arc<dyn CaptureDevice>,
        sinks: MediaSinks,
        config: PeerConfig,
        events: EventEmitter,
    ) -> PeerResult<Self> {
        config.validate()?;
        let inbound = handle.take_inbound().ok_or(PeerError::HandleInUse)?;
        let identity = handle.identity().clone();

        let (commands_tx, commands_rx) = mpsc::channel(config.command_capacity);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let span = LogContext::new("lifecycle")
            .with_field("local", identity.as_str())
            .span(Level::INFO);

        let event_loop = EventLoop {
            handle,
            capture,
            sinks,
            config,
            events: events.clone(),
            internal_tx,
            current: None,
            presented: LifecycleState::Idle,
        };

        // published before the loop can see an inbound dial
        events.emit(PeerEvent::Registered {
            identity: identity.clone(),
        });
        events.emit(PeerEvent::StateChanged {
            previous: LifecycleState::Unnamed,
            current: LifecycleState::Idle,
        });
        tokio::spawn(event_loop.run(commands_rx, internal_rx, inbound).instrument(span));

        info!("Lifecycle controller started for '{}'", identity);
        Ok(Self {
            commands: commands_tx,
            events,
            identity,
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Dial `remote` as `Caller`
    ///
    /// Resolves once the connection is open. A current connection is torn
    /// down first with [`CloseReason::Replaced`].
    pub async fn dial(&self, remote: &str) -> PeerResult<ConnectionInfo> {
        let remote = remote.to_string();
        let result = self.request(|reply| Command::Dial { remote, reply }).await?;
        Ok(result?)
    }

    /// Send a chat message on the open connection
    pub async fn send(&self, body: &str) -> PeerResult<ChatMessage> {
        let body = body.to_string();
        let result = self.request(|reply| Command::Send { body, reply }).await?;
        Ok(result?)
    }

    /// Tear down the current connection; false if there was none
    pub async fn hang_up(&self) -> PeerResult<bool> {
        self.request(|reply| Command::HangUp { reply }).await
    }

    pub async fn current(&self) -> PeerResult<Option<ConnectionInfo>> {
        self.request(|reply| Command::Current { reply }).await
    }

    pub async fn state(&self) -> PeerResult<LifecycleState> {
        self.request(|reply| Command::State { reply }).await
    }

    /// Transcript of the current connection; empty when none is open
    pub async fn transcript(&self) -> PeerResult<Vec<ChatMessage>> {
        self.request(|reply| Command::Transcript { reply }).await
    }

    pub fn subscribe(&self) -> EventStream {
        self.events.subscribe()
    }

    pub fn emitter(&self) -> &EventEmitter {
        &self.events
    }

    /// Hang up through the normal cascade and stop the event loop
    pub async fn shutdown(&self) -> PeerResult<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> PeerResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(command(tx)).await.map_err(|_| PeerError::Shutdown)?;
        rx.await.map_err(|_| PeerError::Shutdown)
    }
}

/// The current connection and everything scoped to it
struct Session {
    connection: Connection,
    pump: Option<JoinHandle<()>>,
    chat: Option<ChatChannel>,
    media: Option<MediaSession>,
    pending_dial: Option<DialReply>,
}

impl Session {
    fn new(connection: Connection) -> Self {
        Self {
            connection,
            pump: None,
            chat: None,
            media: None,
            pending_dial: None,
        }
    }

    fn info(&self) -> ConnectionInfo {
        let media_live = self.media.as_ref().is_some_and(MediaSession::is_live);
        self.connection.info(media_live)
    }
}

struct EventLoop {
    handle: Arc<SessionHandle>,
    capture: Arc<dyn CaptureDevice>,
    sinks: MediaSinks,
    config: PeerConfig,
    events: EventEmitter,
    internal_tx: mpsc::UnboundedSender<Internal>,
    current: Option<Session>,
    presented: LifecycleState,
}

impl EventLoop {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
        mut inbound: mpsc::UnboundedReceiver<LinkHandle>,
    ) {
        let mut inbound_open = true;

        loop {
            tokio::select! {
                Some(event) = internal.recv() => self.on_internal(event),

                dial = inbound.recv(), if inbound_open => match dial {
                    Some(link) => self.on_inbound(link),
                    None => {
                        warn!("Rendezvous stopped delivering inbound dials");
                        inbound_open = false;
                    }
                },

                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.teardown_current(CloseReason::Shutdown);
                        self.refresh_state();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.on_command(command),
                    None => {
                        debug!("All controller handles dropped");
                        self.teardown_current(CloseReason::Shutdown);
                        self.refresh_state();
                        break;
                    }
                },
            }
            self.refresh_state();
        }

        info!("Lifecycle controller for '{}' stopped", self.handle.identity());
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Dial { remote, reply } => self.start_dial(remote, reply),
            Command::Send { body, reply } => {
                let result = match self.current.as_mut().and_then(|s| s.chat.as_mut()) {
                    Some(chat) => chat.send(body),
                    None => Err(SendError::NotOpen),
                };
                if let Err(e) = &result {
                    warn!("Send failed: {}", e);
                }
                let lost = matches!(result, Err(SendError::Transport(TransportError::ChannelClosed)));
                let _ = reply.send(result);
                if lost {
                    self.teardown_current(CloseReason::TransportFailure(TransportError::ChannelClosed.to_string()));
                }
            }
            Command::HangUp { reply } => {
                let closed = self.teardown_current(CloseReason::LocalHangUp);
                let _ = reply.send(closed);
            }
            Command::Current { reply } => {
                let _ = reply.send(self.current.as_ref().map(Session::info));
            }
            Command::State { reply } => {
                let _ = reply.send(self.lifecycle_state());
            }
            Command::Transcript { reply } => {
                let messages = self
                    .current
                    .as_ref()
                    .and_then(|s| s.chat.as_ref())
                    .map(|chat| chat.transcript().messages().to_vec())
                    .unwrap_or_default();
                let _ = reply.send(messages);
            }
            // handled by the loop itself
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn start_dial(&mut self, remote: String, reply: DialReply) {
        let target = match negotiation::dial_target(&self.handle, &remote) {
            Ok(target) => target,
            Err(error) => {
                self.dial_failed(remote, error, reply);
                return;
            }
        };

        if self.current.is_some() {
            info!("Dialing {} replaces the current connection", target);
            self.teardown_current(CloseReason::Replaced);
        }

        let connection = Connection::outgoing(self.handle.identity().clone(), target.clone());
        let id = connection.id();
        let mut session = Session::new(connection);
        session.pending_dial = Some(reply);
        self.current = Some(session);
        info!("Dialing {} on {}", target, id);

        let handle = Arc::clone(&self.handle);
        let internal = self.internal_tx.clone();
        tokio::spawn(
            async move {
                let result = negotiation::dial(&handle, &target).await;
                if let Err(mpsc::error::SendError(Internal::DialCompleted { result: Ok(link), .. })) =
                    internal.send(Internal::DialCompleted { connection: id, result })
                {
                    link.link.close();
                }
            }
            .in_current_span(),
        );
    }

    fn dial_failed(&self, remote: String, error: DialError, reply: DialReply) {
        warn!("Dial to '{}' failed: {}", remote, error);
        self.events.emit(PeerEvent::DialFailed {
            remote,
            error: error.clone(),
        });
        let _ = reply.send(Err(error));
    }

    fn on_inbound(&mut self, dial: LinkHandle) {
        let remote = dial.link.remote().clone();

        if self.current.is_some() {
            let rejected = self.config.busy_policy == BusyPolicy::Reject;
            if rejected {
                dial.link.close();
            }
            info!("Busy; {} inbound dial from {}", if rejected { "rejected" } else { "ignored" }, remote);
            self.events.emit(PeerEvent::InboundDialIgnored { remote, rejected });
            return;
        }

        let LinkHandle { link, events } = dial;
        let connection = Connection::incoming(self.handle.identity().clone(), link);
        let mut session = Session::new(connection);
        session.pump = Some(self.spawn_pump(session.connection.id(), events));

        let info = session.info();
        info!("Accepted inbound dial from {} on {}", remote, info.id);
        self.current = Some(session);
        self.events.emit(PeerEvent::IncomingConnection { connection: info });
    }

    fn on_internal(&mut self, event: Internal) {
        match event {
            Internal::DialCompleted { connection, result } => self.on_dial_completed(connection, result),
            Internal::Link { connection, event } => {
                if self.is_current(connection) {
                    self.on_link_event(event);
                } else {
                    debug!("Dropping stale link event for {}", connection);
                }
            }
            Internal::LinkDropped { connection } => {
                if self.is_current(connection) {
                    self.teardown_current(CloseReason::TransportFailure("link dropped".to_string()));
                }
            }
            Internal::Capture { connection, result } => {
                match self.current.as_mut().filter(|s| s.connection.id() == connection) {
                    Some(Session { media: Some(media), .. }) => {
                        media.on_capture_result(result);
                        self.check_media_link();
                    }
                    _ => {
                        if let Ok(stream) = result {
                            debug!("Releasing capture for stale connection {}", connection);
                            self.capture.release(&stream);
                        }
                    }
                }
            }
        }
    }

    fn on_dial_completed(&mut self, connection: ConnectionId, result: Result<LinkHandle, DialError>) {
        if !self.is_current(connection) {
            debug!("Dial for stale connection {} completed", connection);
            if let Ok(dial) = result {
                dial.link.close();
            }
            return;
        }

        match result {
            Ok(LinkHandle { link, events }) => {
                let pump = self.spawn_pump(connection, events);
                if let Some(session) = self.current.as_mut() {
                    session.connection.attach_link(link);
                    session.pump = Some(pump);
                }
            }
            Err(error) => {
                let reason = CloseReason::TransportFailure(error.to_string());
                self.close_current(reason, Some(error));
            }
        }
    }

    fn on_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Opened => self.on_opened(),
            LinkEvent::Data(payload) => {
                match self.current.as_mut().and_then(|s| s.chat.as_mut()) {
                    Some(chat) => {
                        chat.on_data(payload);
                    }
                    None => warn!("Data before the connection opened; dropped"),
                }
            }
            LinkEvent::MediaOffer { call } => {
                if let Some(media) = self.current_media() {
                    media.on_media_offer(call);
                }
            }
            LinkEvent::MediaDeclined { call } => {
                if let Some(media) = self.current_media() {
                    media.on_media_declined(call);
                }
            }
            LinkEvent::RemoteStream { call, stream } => match self.current_media() {
                Some(media) => media.on_remote_stream(call, stream),
                None => warn!("Remote stream before the connection opened; dropped"),
            },
            LinkEvent::Closed => {
                self.teardown_current(CloseReason::RemoteHangUp);
            }
            LinkEvent::Failed(reason) => {
                self.teardown_current(CloseReason::TransportFailure(reason));
            }
        }
        self.check_media_link();
    }

    /// A link that refuses media operations as closed is a failed link
    fn check_media_link(&mut self) {
        if self.current_media().is_some_and(MediaSession::take_link_lost) {
            self.teardown_current(CloseReason::TransportFailure(TransportError::ChannelClosed.to_string()));
        }
    }

    fn on_opened(&mut self) {
        let Some(session) = self.current.as_mut() else {
            return;
        };
        if !session.connection.mark_open() {
            return;
        }
        let Some(link) = session.connection.link().cloned() else {
            return;
        };

        let id = session.connection.id();
        session.chat = Some(ChatChannel::new(
            id,
            session.connection.local().clone(),
            Arc::clone(&link),
            self.events.clone(),
        ));
        session.media = Some(MediaSession::new(
            id,
            session.connection.role(),
            link,
            Arc::clone(&self.capture),
            self.sinks.clone(),
            self.events.clone(),
        ));

        let info = session.info();
        if let Some(reply) = session.pending_dial.take() {
            let _ = reply.send(Ok(info.clone()));
        }
        self.events.emit(PeerEvent::ConnectionOpened { connection: info });

        // acquired at most once per connection
        let capture = Arc::clone(&self.capture);
        let constraints = self.config.media;
        let internal = self.internal_tx.clone();
        tokio::spawn(
            async move {
                let result = capture.acquire(constraints).await;
                if let Err(mpsc::error::SendError(Internal::Capture { result: Ok(stream), .. })) =
                    internal.send(Internal::Capture { connection: id, result })
                {
                    capture.release(&stream);
                }
            }
            .in_current_span(),
        );
    }

    fn teardown_current(&mut self, reason: CloseReason) -> bool {
        self.close_current(reason, None)
    }

    /// Cascade shared by every way a connection can end
    ///
    /// `dial_error` is what a still pending dial resolves with; without one
    /// it is derived from `reason`.
    fn close_current(&mut self, reason: CloseReason, dial_error: Option<DialError>) -> bool {
        let Some(mut session) = self.current.take() else {
            return false;
        };
        let id = session.connection.id();
        let remote = session.connection.remote().clone();
        let was_open = session.connection.state() == ConnectionState::Open;

        if let Some(pump) = session.pump.take() {
            pump.abort();
        }
        if let Some(mut media) = session.media.take() {
            media.teardown();
        }
        session.chat = None;
        session.connection.close();

        match (session.pending_dial.take(), dial_error) {
            (Some(reply), Some(error)) => self.dial_failed(remote.to_string(), error, reply),
            (Some(reply), None) => {
                let error = match &reason {
                    CloseReason::RemoteHangUp | CloseReason::TransportFailure(_) => DialError::NegotiationFailed {
                        remote: remote.to_string(),
                        reason: format!("{:?} before open", reason),
                    },
                    _ => DialError::cancelled(remote.as_str()),
                };
                let _ = reply.send(Err(error));
            }
            (None, Some(error)) => warn!("Dial to '{}' failed: {}", remote, error),
            (None, None) => {}
        }

        info!("Connection {} with {} torn down ({:?}, was open: {})", id, remote, reason, was_open);
        self.events.emit(PeerEvent::ConnectionClosed {
            connection: id,
            remote,
            reason,
        });
        true
    }

    fn spawn_pump(&self, connection: ConnectionId, mut events: mpsc::UnboundedReceiver<LinkEvent>) -> JoinHandle<()> {
        let internal = self.internal_tx.clone();
        tokio::spawn(
            async move {
                while let Some(event) = events.recv().await {
                    if internal.send(Internal::Link { connection, event }).is_err() {
                        return;
                    }
                }
                let _ = internal.send(Internal::LinkDropped { connection });
            }
            .in_current_span(),
        )
    }

    fn current_media(&mut self) -> Option<&mut MediaSession> {
        self.current.as_mut().and_then(|s| s.media.as_mut())
    }

    fn is_current(&self, connection: ConnectionId) -> bool {
        self.current
            .as_ref()
            .is_some_and(|s| s.connection.id() == connection && !s.connection.is_closed())
    }

    fn lifecycle_state(&self) -> LifecycleState {
        match &self.current {
            None => LifecycleState::Idle,
            Some(session) if session.connection.state() == ConnectionState::Open => LifecycleState::Active,
            Some(_) => LifecycleState::Pending,
        }
    }

    fn refresh_state(&mut self) {
        let state = self.lifecycle_state();
        if state != self.presented {
            debug!("Lifecycle state {} -> {}", self.presented, state);
            self.events.emit(PeerEvent::StateChanged {
                previous: self.presented,
                current: state,
            });
            self.presented = state;
        }
    }
}
