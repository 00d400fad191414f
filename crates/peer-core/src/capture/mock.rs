//! In-process capture device and render sinks for tests and demos

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{CaptureDevice, MediaConstraints, MediaStream, RenderOptions, RenderSink, StreamId};
use crate::error::{CaptureError, CaptureResult};

/// What the mock device does on `acquire`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBehavior {
    Grant,
    Deny,
    NoDevice,
}

/// Capture device that hands out synthetic streams and counts usage
#[derive(Debug)]
pub struct MockCaptureDevice {
    label: String,
    behavior: Mutex<MockBehavior>,
    delay: Mutex<Option<Duration>>,
    acquisitions: AtomicUsize,
    releases: AtomicUsize,
    double_releases: AtomicUsize,
    live: Mutex<HashSet<StreamId>>,
}

impl MockCaptureDevice {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            behavior: Mutex::new(MockBehavior::Grant),
            delay: Mutex::new(None),
            acquisitions: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            double_releases: AtomicUsize::new(0),
            live: Mutex::new(HashSet::new()),
        }
    }

    /// Device whose `acquire` always fails with `PermissionDenied`
    pub fn denying(label: impl Into<String>) -> Self {
        let device = Self::new(label);
        device.set_behavior(MockBehavior::Deny);
        device
    }

    pub fn set_behavior(&self, behavior: MockBehavior) {
        *self.behavior.lock() = behavior;
    }

    /// Make `acquire` take this long before completing
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// Number of `acquire` calls, successful or not
    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    /// Number of streams released
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Releases of a stream that was not live
    pub fn double_releases(&self) -> usize {
        self.double_releases.load(Ordering::SeqCst)
    }

    /// Streams acquired and not yet released
    pub fn live_streams(&self) -> usize {
        self.live.lock().len()
    }
}

#[async_trait]
impl CaptureDevice for MockCaptureDevice {
    async fn acquire(&self, constraints: MediaConstraints) -> CaptureResult<MediaStream> {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let behavior = *self.behavior.lock();
        match behavior {
            MockBehavior::Deny => Err(CaptureError::PermissionDenied),
            MockBehavior::NoDevice => Err(CaptureError::NoDevice),
            MockBehavior::Grant => {
                let stream = MediaStream::new(self.label.clone(), constraints);
                self.live.lock().insert(stream.id);
                Ok(stream)
            }
        }
    }

    fn release(&self, stream: &MediaStream) {
        if self.live.lock().remove(&stream.id) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        } else {
            self.double_releases.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// A call made on a [`RecordingSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    Render { stream: StreamId, options: RenderOptions },
    Detach,
}

/// Render sink that records every call
#[derive(Debug, Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<SinkCall>>,
    attached: Mutex<Option<(StreamId, RenderOptions)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().clone()
    }

    /// Stream currently attached, if any
    pub fn attached(&self) -> Option<(StreamId, RenderOptions)> {
        *self.attached.lock()
    }

    pub fn render_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, SinkCall::Render { .. }))
            .count()
    }
}

impl RenderSink for RecordingSink {
    fn render(&self, stream: &MediaStream, options: RenderOptions) {
        self.calls.lock().push(SinkCall::Render { stream: stream.id, options });
        *self.attached.lock() = Some((stream.id, options));
    }

    fn detach(&self) {
        self.calls.lock().push(SinkCall::Detach);
        *self.attached.lock() = None;
    }
}
