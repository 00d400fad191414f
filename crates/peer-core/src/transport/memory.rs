//! In-process rendezvous service
//!
//! Reliable and instantaneous: a dial either fails right away or produces a
//! pair of linked ends that both see `Opened`. Useful for tests, demos and
//! embedding two agents in one process.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{Binding, Dialer, LinkEvent, LinkHandle, MediaCallId, PeerLink, Rendezvous, TransportResult};
use crate::capture::MediaStream;
use crate::error::TransportError;
use crate::types::Identity;

/// Process-local rendezvous service
#[derive(Clone, Default)]
pub struct MemoryRendezvous {
    inner: Arc<Inner>,
}

struct Inner {
    agents: DashMap<Identity, mpsc::UnboundedSender<LinkHandle>>,
    links: Mutex<Vec<Weak<LinkShared>>>,
    reachable: AtomicBool,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            agents: DashMap::new(),
            links: Mutex::new(Vec::new()),
            reachable: AtomicBool::new(true),
        }
    }
}

impl MemoryRendezvous {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the service going offline (or coming back)
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn is_registered(&self, identity: &Identity) -> bool {
        self.inner.agents.contains_key(identity)
    }

    /// Break every open link involving `identity`
    ///
    /// Both ends receive `LinkEvent::Failed`. Returns the number of links
    /// affected.
    pub fn fail_links(&self, identity: &Identity, reason: &str) -> usize {
        let links: Vec<Arc<LinkShared>> = self.inner.links.lock().iter().filter_map(Weak::upgrade).collect();

        let mut failed = 0;
        for shared in links {
            let involved = shared.ends.iter().any(|end| &end.identity == identity);
            if involved && !shared.closed.swap(true, Ordering::SeqCst) {
                for end in &shared.ends {
                    let _ = end.events.send(LinkEvent::Failed(reason.to_string()));
                }
                failed += 1;
            }
        }
        info!("Failed {} link(s) of {}: {}", failed, identity, reason);
        failed
    }

    fn ensure_reachable(&self) -> TransportResult<()> {
        if self.inner.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::Unreachable("memory rendezvous is offline".to_string()))
        }
    }

    fn track(&self, shared: &Arc<LinkShared>) {
        let mut links = self.inner.links.lock();
        links.retain(|weak| weak.strong_count() > 0);
        links.push(Arc::downgrade(shared));
    }
}

#[async_trait]
impl Rendezvous for MemoryRendezvous {
    async fn register(&self, identity: &Identity) -> TransportResult<Binding> {
        self.ensure_reachable()?;

        let (tx, rx) = mpsc::unbounded_channel();
        match self.inner.agents.entry(identity.clone()) {
            Entry::Occupied(_) => return Err(TransportError::NameTaken(identity.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(tx);
            }
        }
        info!("Registered {} with memory rendezvous", identity);

        Ok(Binding {
            dialer: Arc::new(MemoryDialer {
                local: identity.clone(),
                rendezvous: self.clone(),
            }),
            inbound: rx,
        })
    }
}

struct MemoryDialer {
    local: Identity,
    rendezvous: MemoryRendezvous,
}

#[async_trait]
impl Dialer for MemoryDialer {
    async fn dial(&self, remote: &Identity) -> TransportResult<LinkHandle> {
        self.rendezvous.ensure_reachable()?;
        if remote == &self.local {
            return Err(TransportError::NegotiationFailed("cannot dial self".to_string()));
        }

        // clone the sender so no map guard is held while linking
        let inbound = self
            .rendezvous
            .inner
            .agents
            .get(remote)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TransportError::PeerNotFound(remote.to_string()))?;

        let (caller, callee) = link_pair(self.local.clone(), remote.clone());
        self.rendezvous.track(&caller.shared);

        let caller_link = Arc::clone(&caller.link);
        let callee_link = Arc::clone(&callee.link);
        inbound
            .send(callee.into_handle())
            .map_err(|_| TransportError::NegotiationFailed(format!("{} stopped accepting dials", remote)))?;

        caller_link.announce_open();
        callee_link.announce_open();
        debug!("Linked {} -> {}", self.local, remote);

        Ok(caller.into_handle())
    }
}

struct End {
    identity: Identity,
    events: mpsc::UnboundedSender<LinkEvent>,
}

struct LinkShared {
    ends: [End; 2],
    closed: AtomicBool,
    offers: Mutex<HashMap<MediaCallId, MediaStream>>,
}

/// One end of an in-memory link
pub struct MemoryLink {
    shared: Arc<LinkShared>,
    side: usize,
}

impl std::fmt::Debug for MemoryLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryLink")
            .field("local", &self.own().identity)
            .field("remote", &self.peer().identity)
            .field("closed", &self.is_closed())
            .finish()
    }
}

struct PendingEnd {
    shared: Arc<LinkShared>,
    link: Arc<MemoryLink>,
    events: mpsc::UnboundedReceiver<LinkEvent>,
}

impl PendingEnd {
    fn into_handle(self) -> LinkHandle {
        LinkHandle {
            link: self.link,
            events: self.events,
        }
    }
}

fn link_pair(caller: Identity, callee: Identity) -> (PendingEnd, PendingEnd) {
    let (caller_tx, caller_rx) = mpsc::unbounded_channel();
    let (callee_tx, callee_rx) = mpsc::unbounded_channel();

    let shared = Arc::new(LinkShared {
        ends: [
            End { identity: caller, events: caller_tx },
            End { identity: callee, events: callee_tx },
        ],
        closed: AtomicBool::new(false),
        offers: Mutex::new(HashMap::new()),
    });

    let caller_end = PendingEnd {
        shared: Arc::clone(&shared),
        link: Arc::new(MemoryLink { shared: Arc::clone(&shared), side: 0 }),
        events: caller_rx,
    };
    let callee_end = PendingEnd {
        shared: Arc::clone(&shared),
        link: Arc::new(MemoryLink { shared, side: 1 }),
        events: callee_rx,
    };
    (caller_end, callee_end)
}

impl MemoryLink {
    fn own(&self) -> &End {
        &self.shared.ends[self.side]
    }

    fn peer(&self) -> &End {
        &self.shared.ends[1 - self.side]
    }

    fn announce_open(&self) {
        let _ = self.own().events.send(LinkEvent::Opened);
    }

    fn ensure_open(&self) -> TransportResult<()> {
        if self.is_closed() {
            Err(TransportError::ChannelClosed)
        } else {
            Ok(())
        }
    }

    fn to_peer(&self, event: LinkEvent) -> TransportResult<()> {
        self.peer().events.send(event).map_err(|_| TransportError::ChannelClosed)
    }
}

impl PeerLink for MemoryLink {
    fn remote(&self) -> &Identity {
        &self.peer().identity
    }

    fn send(&self, payload: Bytes) -> TransportResult<()> {
        self.ensure_open()?;
        self.to_peer(LinkEvent::Data(payload))
    }

    fn offer_media(&self, stream: &MediaStream) -> TransportResult<MediaCallId> {
        self.ensure_open()?;
        let call = MediaCallId::new();
        self.shared.offers.lock().insert(call, stream.clone());
        self.to_peer(LinkEvent::MediaOffer { call })?;
        Ok(call)
    }

    fn answer_media(&self, call: MediaCallId, stream: &MediaStream) -> TransportResult<()> {
        self.ensure_open()?;
        let offered = self
            .shared
            .offers
            .lock()
            .remove(&call)
            .ok_or_else(|| TransportError::UnknownMediaCall(call.to_string()))?;

        self.to_peer(LinkEvent::RemoteStream { call, stream: stream.clone() })?;
        let _ = self.own().events.send(LinkEvent::RemoteStream { call, stream: offered });
        Ok(())
    }

    fn decline_media(&self, call: MediaCallId) -> TransportResult<()> {
        self.ensure_open()?;
        self.shared
            .offers
            .lock()
            .remove(&call)
            .ok_or_else(|| TransportError::UnknownMediaCall(call.to_string()))?;
        self.to_peer(LinkEvent::MediaDeclined { call })
    }

    fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.offers.lock().clear();
        // the peer may already be gone; nothing left to tell it then
        let _ = self.to_peer(LinkEvent::Closed);
    }

    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

/// An end nobody holds any more can never answer; the peer sees `Closed`
impl Drop for MemoryLink {
    fn drop(&mut self) {
        if !self.is_closed() {
            debug!("{} dropped its end of the link to {}", self.own().identity, self.peer().identity);
            self.close();
        }
    }
}
