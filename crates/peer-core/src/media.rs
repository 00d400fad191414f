//! Media session for one open connection
//!
//! Created when a connection reaches `Open` and torn down with it. The
//! session renders the local capture muted as a self-preview, then follows
//! the role rule: the `Caller` originates exactly one offer, the `Callee`
//! only ever answers (or declines when it has no stream). A remote stream is
//! rendered unmuted and full size as soon as it arrives.
//!
//! Capture is acquired outside the session (it suspends); the result is fed
//! back through [`MediaSession::on_capture_result`]. A result that arrives
//! after [`MediaSession::teardown`] is released on the spot.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::capture::{CaptureDevice, MediaSinks, MediaStream, RenderOptions};
use crate::error::{CaptureError, CaptureResult, TransportError};
use crate::events::{EventEmitter, PeerEvent};
use crate::transport::{MediaCallId, PeerLink};
use crate::types::{ConnectionId, Role};

#[derive(Debug)]
enum LocalCapture {
    Acquiring,
    Live(MediaStream),
    Failed(CaptureError),
    Released,
}

/// The media leg of one connection
#[derive(Debug)]
pub struct MediaSession {
    connection: ConnectionId,
    role: Role,
    link: Arc<dyn PeerLink>,
    capture: Arc<dyn CaptureDevice>,
    sinks: MediaSinks,
    events: EventEmitter,
    local: LocalCapture,
    /// Offer received before capture finished
    pending_offer: Option<MediaCallId>,
    /// The offer/answer exchange this leg uses
    media_call: Option<MediaCallId>,
    remote_stream: Option<MediaStream>,
    offers_sent: usize,
    /// The link refused an operation because it is closed
    link_lost: bool,
    torn_down: bool,
}

impl MediaSession {
    pub fn new(
        connection: ConnectionId,
        role: Role,
        link: Arc<dyn PeerLink>,
        capture: Arc<dyn CaptureDevice>,
        sinks: MediaSinks,
        events: EventEmitter,
    ) -> Self {
        Self {
            connection,
            role,
            link,
            capture,
            sinks,
            events,
            local: LocalCapture::Acquiring,
            pending_offer: None,
            media_call: None,
            remote_stream: None,
            offers_sent: 0,
            link_lost: false,
            torn_down: false,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Offers originated by this side; at most one, and only as `Caller`
    pub fn offers_sent(&self) -> usize {
        self.offers_sent
    }

    /// A local or remote stream is currently rendered
    pub fn is_live(&self) -> bool {
        !self.torn_down && (matches!(self.local, LocalCapture::Live(_)) || self.remote_stream.is_some())
    }

    pub fn has_remote_stream(&self) -> bool {
        self.remote_stream.is_some()
    }

    /// Why local capture failed, if it did
    pub fn capture_error(&self) -> Option<&CaptureError> {
        match &self.local {
            LocalCapture::Failed(error) => Some(error),
            _ => None,
        }
    }

    /// True once, after the link refused an offer, answer or decline as closed
    ///
    /// The owner treats this like a transport failure of the connection.
    pub fn take_link_lost(&mut self) -> bool {
        std::mem::take(&mut self.link_lost)
    }

    /// Completion of the capture acquisition started for this connection
    pub fn on_capture_result(&mut self, result: CaptureResult<MediaStream>) {
        if self.torn_down {
            if let Ok(stream) = result {
                debug!("Releasing capture that completed after teardown of {}", self.connection);
                self.capture.release(&stream);
            }
            return;
        }
        if !matches!(self.local, LocalCapture::Acquiring) {
            warn!("Unexpected second capture result on {}", self.connection);
            if let Ok(stream) = result {
                self.capture.release(&stream);
            }
            return;
        }

        match result {
            Ok(stream) => {
                self.sinks.local.render(&stream, RenderOptions::PREVIEW);
                self.events.emit(PeerEvent::LocalPreviewStarted { connection: self.connection });
                info!("Local capture '{}' live on {}", stream.label, self.connection);

                match self.role {
                    Role::Caller => self.originate_offer(&stream),
                    Role::Callee => {
                        if let Some(call) = self.pending_offer.take() {
                            self.answer(call, &stream);
                        }
                    }
                }
                self.local = LocalCapture::Live(stream);
            }
            Err(error) => {
                warn!("Capture failed on {}: {}; continuing chat-only", self.connection, error);
                self.events.emit(PeerEvent::CaptureFailed {
                    connection: self.connection,
                    error: error.clone(),
                });
                if let Some(call) = self.pending_offer.take() {
                    self.decline(call);
                }
                self.local = LocalCapture::Failed(error);
            }
        }
    }

    /// The remote side offered media
    pub fn on_media_offer(&mut self, call: MediaCallId) {
        if self.torn_down {
            return;
        }
        if self.role == Role::Caller {
            warn!("Caller received a media offer on {}; declining", self.connection);
            self.decline(call);
            return;
        }
        if self.media_call.is_some() || self.pending_offer.is_some() {
            warn!("Duplicate media offer on {}; declining", self.connection);
            self.decline(call);
            return;
        }

        match &self.local {
            LocalCapture::Acquiring => {
                debug!("Holding media offer until capture completes on {}", self.connection);
                self.pending_offer = Some(call);
            }
            LocalCapture::Live(stream) => {
                let stream = stream.clone();
                self.answer(call, &stream);
            }
            LocalCapture::Failed(_) | LocalCapture::Released => self.decline(call),
        }
    }

    /// A remote stream became available
    pub fn on_remote_stream(&mut self, call: MediaCallId, stream: MediaStream) {
        if self.torn_down {
            return;
        }
        if self.media_call != Some(call) {
            warn!("Remote stream for unknown media call {} on {}", call, self.connection);
            return;
        }
        self.sinks.remote.render(&stream, RenderOptions::REMOTE);
        info!("Rendering remote stream '{}' on {}", stream.label, self.connection);
        self.remote_stream = Some(stream);
        self.events.emit(PeerEvent::RemoteStreamReceived { connection: self.connection });
    }

    /// The remote side declined our offer
    pub fn on_media_declined(&mut self, call: MediaCallId) {
        if self.torn_down || self.media_call != Some(call) {
            return;
        }
        self.media_call = None;
        info!("Remote declined media on {}", self.connection);
        self.events.emit(PeerEvent::MediaDeclined {
            connection: self.connection,
            by: match self.role {
                Role::Caller => Role::Callee,
                Role::Callee => Role::Caller,
            },
        });
    }

    /// Stop capture and detach both sinks; returns false if already done
    ///
    /// Safe whether or not capture ever succeeded.
    pub fn teardown(&mut self) -> bool {
        if self.torn_down {
            return false;
        }
        self.torn_down = true;

        if let LocalCapture::Live(stream) = std::mem::replace(&mut self.local, LocalCapture::Released) {
            self.capture.release(&stream);
        }
        self.sinks.local.detach();
        self.sinks.remote.detach();
        self.remote_stream = None;
        self.pending_offer = None;
        self.media_call = None;
        debug!("Media torn down on {}", self.connection);
        true
    }

    fn originate_offer(&mut self, stream: &MediaStream) {
        if self.offers_sent > 0 {
            return;
        }
        match self.link.offer_media(stream) {
            Ok(call) => {
                self.offers_sent += 1;
                self.media_call = Some(call);
                info!("Sent media offer {} on {}", call, self.connection);
                self.events.emit(PeerEvent::MediaOfferSent { connection: self.connection });
            }
            Err(e) => {
                warn!("Media offer failed on {}: {}", self.connection, e);
                self.note_link_error(&e);
            }
        }
    }

    fn answer(&mut self, call: MediaCallId, stream: &MediaStream) {
        // set before answering: the remote stream may be queued right behind
        self.media_call = Some(call);
        match self.link.answer_media(call, stream) {
            Ok(()) => {
                info!("Answered media offer {} on {}", call, self.connection);
                self.events.emit(PeerEvent::MediaAnswered { connection: self.connection });
            }
            Err(e) => {
                self.media_call = None;
                warn!("Answering media offer failed on {}: {}", self.connection, e);
                self.note_link_error(&e);
            }
        }
    }

    fn decline(&mut self, call: MediaCallId) {
        match self.link.decline_media(call) {
            Ok(()) => {
                info!("Declined media offer {} on {}", call, self.connection);
                self.events.emit(PeerEvent::MediaDeclined {
                    connection: self.connection,
                    by: self.role,
                });
            }
            Err(e) => {
                warn!("Declining media offer failed on {}: {}", self.connection, e);
                self.note_link_error(&e);
            }
        }
    }

    fn note_link_error(&mut self, error: &TransportError) {
        if *error == TransportError::ChannelClosed {
            self.link_lost = true;
        }
    }
}

impl Drop for MediaSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::mock::{MockCaptureDevice, RecordingSink, SinkCall};
    use crate::capture::MediaConstraints;
    use crate::transport::memory::MemoryRendezvous;
    use crate::transport::{LinkEvent, LinkHandle, Rendezvous};
    use crate::types::Identity;

    struct Side {
        handle: LinkHandle,
        device: Arc<MockCaptureDevice>,
        preview: Arc<RecordingSink>,
        remote: Arc<RecordingSink>,
    }

    impl Side {
        fn new(mut handle: LinkHandle) -> Self {
            // drain Opened
            let _ = handle.events.try_recv();
            Self {
                handle,
                device: Arc::new(MockCaptureDevice::new("cam")),
                preview: Arc::new(RecordingSink::new()),
                remote: Arc::new(RecordingSink::new()),
            }
        }

        fn session(&self, role: Role) -> MediaSession {
            MediaSession::new(
                ConnectionId::new(),
                role,
                Arc::clone(&self.handle.link),
                self.device.clone(),
                MediaSinks::new(self.preview.clone(), self.remote.clone()),
                EventEmitter::new(32),
            )
        }

        async fn acquire(&self) -> CaptureResult<MediaStream> {
            self.device.acquire(MediaConstraints::default()).await
        }

        fn next_event(&mut self) -> LinkEvent {
            self.handle.events.try_recv().unwrap()
        }
    }

    async fn pair() -> (Side, Side) {
        let rendezvous = MemoryRendezvous::new();
        let alice = Identity::new("alice").unwrap();
        let bob = Identity::new("bob").unwrap();
        let caller = rendezvous.register(&alice).await.unwrap();
        let mut callee = rendezvous.register(&bob).await.unwrap();

        let caller_handle = caller.dialer.dial(&bob).await.unwrap();
        let callee_handle = callee.inbound.recv().await.unwrap();
        (Side::new(caller_handle), Side::new(callee_handle))
    }

    #[tokio::test]
    async fn test_caller_previews_muted_and_offers_once() {
        let (caller, mut callee) = pair().await;
        let mut session = caller.session(Role::Caller);

        session.on_capture_result(caller.acquire().await);

        assert_eq!(caller.preview.attached().map(|(_, o)| o), Some(RenderOptions::PREVIEW));
        assert_eq!(session.offers_sent(), 1);
        assert!(matches!(callee.next_event(), LinkEvent::MediaOffer { .. }));
    }

    #[tokio::test]
    async fn test_callee_holds_offer_until_capture_then_answers() {
        let (mut caller, mut callee) = pair().await;
        let mut caller_session = caller.session(Role::Caller);
        let mut callee_session = callee.session(Role::Callee);

        caller_session.on_capture_result(caller.acquire().await);
        let call = match callee.next_event() {
            LinkEvent::MediaOffer { call } => call,
            other => panic!("unexpected event: {other:?}"),
        };

        callee_session.on_media_offer(call);
        assert!(callee.handle.events.try_recv().is_err());

        callee_session.on_capture_result(callee.acquire().await);
        assert_eq!(callee_session.offers_sent(), 0);

        // each side receives the other's stream
        match caller.next_event() {
            LinkEvent::RemoteStream { call, stream } => caller_session.on_remote_stream(call, stream),
            other => panic!("unexpected event: {other:?}"),
        }
        match callee.next_event() {
            LinkEvent::RemoteStream { call, stream } => callee_session.on_remote_stream(call, stream),
            other => panic!("unexpected event: {other:?}"),
        }

        assert_eq!(caller.remote.attached().map(|(_, o)| o), Some(RenderOptions::REMOTE));
        assert_eq!(callee.remote.attached().map(|(_, o)| o), Some(RenderOptions::REMOTE));
        assert!(caller_session.has_remote_stream() && callee_session.has_remote_stream());
    }

    #[tokio::test]
    async fn test_callee_without_capture_declines() {
        let (mut caller, mut callee) = pair().await;
        let mut caller_session = caller.session(Role::Caller);
        let mut callee_session = callee.session(Role::Callee);

        caller_session.on_capture_result(caller.acquire().await);
        let call = match callee.next_event() {
            LinkEvent::MediaOffer { call } => call,
            other => panic!("unexpected event: {other:?}"),
        };

        callee_session.on_capture_result(Err(CaptureError::PermissionDenied));
        callee_session.on_media_offer(call);

        match caller.next_event() {
            LinkEvent::MediaDeclined { call } => caller_session.on_media_declined(call),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(!callee_session.is_live());
        assert_eq!(callee_session.capture_error(), Some(&CaptureError::PermissionDenied));
        assert_eq!(callee.preview.render_count(), 0);
    }

    #[tokio::test]
    async fn test_caller_never_answers() {
        let (caller, mut callee) = pair().await;
        let mut session = caller.session(Role::Caller);
        let bogus = callee.handle.link.offer_media(&MediaStream::new("x", MediaConstraints::default())).unwrap();

        session.on_media_offer(bogus);
        assert!(matches!(callee.next_event(), LinkEvent::MediaDeclined { .. }));
        assert_eq!(session.offers_sent(), 0);
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent_and_releases_once() {
        let (caller, _callee) = pair().await;
        let mut session = caller.session(Role::Caller);
        session.on_capture_result(caller.acquire().await);
        assert!(session.is_live());

        assert!(session.teardown());
        assert!(!session.teardown());
        drop(session);

        assert_eq!(caller.device.releases(), 1);
        assert_eq!(caller.device.double_releases(), 0);
        assert_eq!(caller.preview.attached(), None);
        assert_eq!(caller.remote.calls().last(), Some(&SinkCall::Detach));
    }

    #[tokio::test]
    async fn test_offer_on_closed_link_reports_link_lost() {
        let (caller, _callee) = pair().await;
        let mut session = caller.session(Role::Caller);
        assert!(!session.take_link_lost());

        caller.handle.link.close();
        session.on_capture_result(caller.acquire().await);

        assert_eq!(session.offers_sent(), 0);
        assert!(session.take_link_lost());
        assert!(!session.take_link_lost());
    }

    #[tokio::test]
    async fn test_late_capture_is_released_not_rendered() {
        let (caller, mut callee) = pair().await;
        let mut session = caller.session(Role::Caller);

        session.teardown();
        session.on_capture_result(caller.acquire().await);

        assert_eq!(caller.device.live_streams(), 0);
        assert_eq!(caller.preview.render_count(), 0);
        assert_eq!(session.offers_sent(), 0);
        assert!(callee.handle.events.try_recv().is_err());
    }
}
