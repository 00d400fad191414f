//! # peerlink-peer-core
//!
//! Peer session core: two end-user agents find each other by a self-chosen
//! name, open a direct connection, exchange live audio/video and chat over
//! it, and tear it all down again when either side hangs up.
//!
//! ## Components
//!
//! - [`registration`]: binds a display name to a [`SessionHandle`]
//! - [`negotiation`]: dials or accepts a [`Connection`] and fixes its role
//! - [`media`]: self-preview, role-based offer/answer, remote rendering
//! - [`chat`]: text messages and the per-connection [`Transcript`]
//! - [`lifecycle`]: the event loop owning the single current connection
//! - [`agent`]: the intent surface for the rendering layer
//!
//! The rendezvous service, the capture device and the render sinks are
//! external collaborators behind the traits in [`transport`] and
//! [`capture`]. In-process implementations ([`MemoryRendezvous`],
//! [`MockCaptureDevice`], [`RecordingSink`]) ship with the crate.
//!
//! ## States
//!
//! ```text
//! Unnamed ──register──▶ Idle ──dial / inbound──▶ Pending ──open──▶ Active
//!                        ▲                          │                 │
//!                        └────hang up / remote close / failure────────┘
//! ```

pub mod agent;
pub mod capture;
pub mod chat;
pub mod config;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod media;
pub mod negotiation;
pub mod registration;
pub mod transport;
pub mod types;

pub use agent::PeerAgent;
pub use capture::mock::{MockBehavior, MockCaptureDevice, RecordingSink, SinkCall};
pub use capture::{CaptureDevice, MediaConstraints, MediaSinks, MediaStream, RenderOptions, RenderSink, StreamId, TrackKind};
pub use chat::{ChatChannel, ChatMessage, MessageDirection, MessageId, Transcript, TranscriptEntry};
pub use config::{BusyPolicy, PeerConfig};
pub use error::{
    CaptureError, CaptureResult, DialError, InvalidIdentity, PeerError, PeerResult, RegistrationError, SendError,
    TransportError,
};
pub use events::{EventEmitter, EventIterator, EventStream, PeerEvent};
pub use lifecycle::LifecycleController;
pub use media::MediaSession;
pub use negotiation::Connection;
pub use registration::{register, SessionHandle};
pub use transport::memory::MemoryRendezvous;
pub use transport::{Dialer, LinkEvent, LinkHandle, MediaCallId, PeerLink, Rendezvous};
pub use types::{
    CloseReason, ConnectionId, ConnectionInfo, ConnectionState, Identity, LifecycleState, Role, MAX_IDENTITY_LEN,
};
