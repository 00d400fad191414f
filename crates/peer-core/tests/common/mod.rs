//! Shared helpers for the two-agent integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use peerlink_peer_core::transport::{Binding, TransportResult};
use peerlink_peer_core::{
    Dialer, EventIterator, Identity, LifecycleState, LinkHandle, MediaCallId, MediaSinks, MediaStream,
    MemoryRendezvous, MockCaptureDevice, PeerAgent, PeerConfig, PeerEvent, PeerLink, RecordingSink, Rendezvous,
    TransportError,
};

pub const WAIT: Duration = Duration::from_secs(2);

/// An agent wired to a mock camera and two recording sinks
pub struct TestPeer {
    pub agent: PeerAgent,
    pub device: Arc<MockCaptureDevice>,
    pub preview: Arc<RecordingSink>,
    pub remote: Arc<RecordingSink>,
    pub events: EventIterator,
}

impl TestPeer {
    pub async fn registered(rendezvous: &MemoryRendezvous, name: &str) -> Self {
        Self::with_config(rendezvous, name, PeerConfig::default()).await
    }

    pub async fn with_config(rendezvous: &MemoryRendezvous, name: &str, config: PeerConfig) -> Self {
        let peer = Self::unregistered(rendezvous, config);
        peer.agent.register(name).await.expect("registration");
        peer
    }

    pub fn unregistered(rendezvous: &MemoryRendezvous, config: PeerConfig) -> Self {
        Self::on(Arc::new(rendezvous.clone()), config)
    }

    /// Registered through any rendezvous implementation
    pub async fn registered_on(rendezvous: Arc<dyn Rendezvous>, name: &str) -> Self {
        let peer = Self::on(rendezvous, PeerConfig::default());
        peer.agent.register(name).await.expect("registration");
        peer
    }

    fn on(rendezvous: Arc<dyn Rendezvous>, config: PeerConfig) -> Self {
        let device = Arc::new(MockCaptureDevice::new("camera"));
        let preview = Arc::new(RecordingSink::new());
        let remote = Arc::new(RecordingSink::new());
        let agent = PeerAgent::new(
            rendezvous,
            device.clone(),
            MediaSinks::new(preview.clone(), remote.clone()),
            config,
        )
        .expect("valid config");
        let events = agent.events().subscribe_simple();

        Self {
            agent,
            device,
            preview,
            remote,
            events,
        }
    }

    /// Wait for the first event matching `pred`, returning everything seen up to it
    pub async fn until(&mut self, mut pred: impl FnMut(&PeerEvent) -> bool) -> Vec<PeerEvent> {
        let mut seen = Vec::new();
        let waited = tokio::time::timeout(WAIT, async {
            while let Some(event) = self.events.next().await {
                let done = pred(&event);
                seen.push(event);
                if done {
                    return;
                }
            }
            panic!("event stream ended");
        })
        .await;
        if waited.is_err() {
            panic!("timed out; events so far: {seen:#?}");
        }
        seen
    }

    /// Collect whatever arrives within a short quiet period
    pub async fn drain(&mut self) -> Vec<PeerEvent> {
        let mut seen = Vec::new();
        while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(100), self.events.next()).await {
            seen.push(event);
        }
        seen
    }

    pub async fn wait_state(&self, state: LifecycleState) {
        tokio::time::timeout(WAIT, async {
            while self.agent.state().await.expect("state") != state {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("never reached {state}"));
    }
}

/// `caller` dials `callee`; returns once both sides are open
pub async fn connect(caller: &mut TestPeer, callee: &mut TestPeer, callee_name: &str) {
    tokio::time::timeout(WAIT, caller.agent.dial(callee_name))
        .await
        .expect("dial timed out")
        .expect("dial failed");
    callee
        .until(|e| matches!(e, PeerEvent::ConnectionOpened { .. }))
        .await;
}

/// `connect`, then wait until both sides render the other's stream
pub async fn connect_with_media(caller: &mut TestPeer, callee: &mut TestPeer, callee_name: &str) {
    connect(caller, callee, callee_name).await;
    caller
        .until(|e| matches!(e, PeerEvent::RemoteStreamReceived { .. }))
        .await;
    callee
        .until(|e| matches!(e, PeerEvent::RemoteStreamReceived { .. }))
        .await;
}

pub fn count(events: &[PeerEvent], pred: impl Fn(&PeerEvent) -> bool) -> usize {
    events.iter().filter(|e| pred(e)).count()
}

/// A memory rendezvous whose dials sit in negotiation for `delay`
///
/// Keeps the dialing side `Pending` long enough to interleave other dials.
#[derive(Clone)]
pub struct SlowRendezvous {
    inner: MemoryRendezvous,
    delay: Duration,
}

impl SlowRendezvous {
    pub fn new(inner: &MemoryRendezvous, delay: Duration) -> Self {
        Self {
            inner: inner.clone(),
            delay,
        }
    }
}

struct SlowDialer {
    inner: Arc<dyn Dialer>,
    delay: Duration,
}

#[async_trait]
impl Dialer for SlowDialer {
    async fn dial(&self, remote: &Identity) -> TransportResult<LinkHandle> {
        tokio::time::sleep(self.delay).await;
        self.inner.dial(remote).await
    }
}

#[async_trait]
impl Rendezvous for SlowRendezvous {
    async fn register(&self, identity: &Identity) -> TransportResult<Binding> {
        let binding = self.inner.register(identity).await?;
        Ok(Binding {
            dialer: Arc::new(SlowDialer {
                inner: binding.dialer,
                delay: self.delay,
            }),
            inbound: binding.inbound,
        })
    }
}

/// A memory rendezvous whose outgoing links can be cut silently
///
/// After [`cut`](Self::cut) every outgoing operation on a dialed link fails
/// with `ChannelClosed`, but no `Closed` or `Failed` event is delivered.
#[derive(Clone)]
pub struct FlakyRendezvous {
    inner: MemoryRendezvous,
    cut: Arc<AtomicBool>,
}

impl FlakyRendezvous {
    pub fn new(inner: &MemoryRendezvous) -> Self {
        Self {
            inner: inner.clone(),
            cut: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cut(&self) {
        self.cut.store(true, Ordering::SeqCst);
    }
}

struct FlakyDialer {
    inner: Arc<dyn Dialer>,
    cut: Arc<AtomicBool>,
}

#[derive(Debug)]
struct FlakyLink {
    inner: Arc<dyn PeerLink>,
    cut: Arc<AtomicBool>,
}

impl FlakyLink {
    fn check(&self) -> TransportResult<()> {
        if self.cut.load(Ordering::SeqCst) {
            Err(TransportError::ChannelClosed)
        } else {
            Ok(())
        }
    }
}

impl PeerLink for FlakyLink {
    fn remote(&self) -> &Identity {
        self.inner.remote()
    }

    fn send(&self, payload: Bytes) -> TransportResult<()> {
        self.check()?;
        self.inner.send(payload)
    }

    fn offer_media(&self, stream: &MediaStream) -> TransportResult<MediaCallId> {
        self.check()?;
        self.inner.offer_media(stream)
    }

    fn answer_media(&self, call: MediaCallId, stream: &MediaStream) -> TransportResult<()> {
        self.check()?;
        self.inner.answer_media(call, stream)
    }

    fn decline_media(&self, call: MediaCallId) -> TransportResult<()> {
        self.check()?;
        self.inner.decline_media(call)
    }

    fn close(&self) {
        self.inner.close();
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

#[async_trait]
impl Dialer for FlakyDialer {
    async fn dial(&self, remote: &Identity) -> TransportResult<LinkHandle> {
        let LinkHandle { link, events } = self.inner.dial(remote).await?;
        Ok(LinkHandle {
            link: Arc::new(FlakyLink {
                inner: link,
                cut: Arc::clone(&self.cut),
            }),
            events,
        })
    }
}

#[async_trait]
impl Rendezvous for FlakyRendezvous {
    async fn register(&self, identity: &Identity) -> TransportResult<Binding> {
        let binding = self.inner.register(identity).await?;
        Ok(Binding {
            dialer: Arc::new(FlakyDialer {
                inner: binding.dialer,
                cut: Arc::clone(&self.cut),
            }),
            inbound: binding.inbound,
        })
    }
}
