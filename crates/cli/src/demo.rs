//! Scripted two-agent call over the in-memory rendezvous

use anyhow::{bail, Context, Result};
use clap::Args;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use peerlink_peer_core::{
    BusyPolicy, ChatMessage, LifecycleState, MediaSinks, MemoryRendezvous, MessageDirection, MockCaptureDevice,
    PeerAgent, PeerConfig, PeerEvent, RecordingSink,
};

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Args, Debug)]
pub struct DemoArgs {
    /// Name the dialing agent registers under
    #[arg(long, default_value = "alice")]
    pub caller: String,

    /// Name the answering agent registers under
    #[arg(long, default_value = "bob")]
    pub callee: String,

    /// Chat lines, sent alternately by callee and caller
    #[arg(long)]
    pub message: Vec<String>,

    /// Make the caller's camera refuse access
    #[arg(long)]
    pub deny_camera: bool,

    /// Override the busy policy from the config file
    #[arg(long)]
    pub busy_policy: Option<BusyPolicy>,
}

struct DemoPeer {
    name: String,
    agent: Arc<PeerAgent>,
    printer: tokio::task::JoinHandle<()>,
}

impl DemoPeer {
    fn new(rendezvous: &MemoryRendezvous, name: &str, config: PeerConfig, camera: MockCaptureDevice) -> Result<Self> {
        let sinks = MediaSinks::new(Arc::new(RecordingSink::new()), Arc::new(RecordingSink::new()));
        let agent = Arc::new(PeerAgent::new(Arc::new(rendezvous.clone()), Arc::new(camera), sinks, config)?);

        let mut events = agent.events().subscribe_simple();
        let label = name.to_string();
        let printer = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                println!("[{label:>8}] {}", describe(&event));
            }
        });

        Ok(Self {
            name: name.to_string(),
            agent,
            printer,
        })
    }

    async fn wait_for(&self, state: LifecycleState) -> Result<()> {
        tokio::time::timeout(STEP_TIMEOUT, async {
            loop {
                if self.agent.state().await? == state {
                    return Ok::<_, anyhow::Error>(());
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .with_context(|| format!("{} never became {}", self.name, state))?
    }

    async fn wait_for_messages(&self, count: usize) -> Result<Vec<ChatMessage>> {
        tokio::time::timeout(STEP_TIMEOUT, async {
            loop {
                let transcript = self.agent.transcript().await?;
                if transcript.len() >= count {
                    return Ok::<_, anyhow::Error>(transcript);
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .with_context(|| format!("{} did not receive {} messages", self.name, count))?
    }
}

/// Run the demo end to end
pub async fn run(args: DemoArgs, mut config: PeerConfig) -> Result<()> {
    if args.caller == args.callee {
        bail!("caller and callee need different names");
    }
    if let Some(policy) = args.busy_policy {
        config = config.with_busy_policy(policy);
    }
    let messages = if args.message.is_empty() {
        vec!["hello".to_string(), "hi".to_string()]
    } else {
        args.message
    };

    let rendezvous = MemoryRendezvous::new();
    let caller_camera = if args.deny_camera {
        MockCaptureDevice::denying(format!("{}-camera", args.caller))
    } else {
        MockCaptureDevice::new(format!("{}-camera", args.caller))
    };
    let caller = DemoPeer::new(&rendezvous, &args.caller, config.clone(), caller_camera)?;
    let callee = DemoPeer::new(
        &rendezvous,
        &args.callee,
        config,
        MockCaptureDevice::new(format!("{}-camera", args.callee)),
    )?;

    caller.agent.register(&args.caller).await?;
    callee.agent.register(&args.callee).await?;

    let connection = caller.agent.dial(&args.callee).await?;
    info!("{} connected to {} as {}", caller.name, connection.remote, connection.role);
    callee.wait_for(LifecycleState::Active).await?;

    for (index, body) in messages.iter().enumerate() {
        let (speaker, listener) = if index % 2 == 0 { (&callee, &caller) } else { (&caller, &callee) };
        speaker.agent.send(body).await?;
        listener.wait_for_messages(index + 1).await?;
    }

    for peer in [&caller, &callee] {
        print_transcript(&peer.name, &peer.agent.transcript().await?);
    }

    caller.agent.hang_up().await?;
    caller.wait_for(LifecycleState::Idle).await?;
    callee.wait_for(LifecycleState::Idle).await?;

    for peer in [caller, callee] {
        if let Err(e) = peer.agent.shutdown().await {
            warn!("Shutting down {} failed: {}", peer.name, e);
        }
        // let the printer flush what is queued
        tokio::time::sleep(Duration::from_millis(20)).await;
        peer.printer.abort();
    }
    Ok(())
}

fn print_transcript(owner: &str, transcript: &[ChatMessage]) {
    println!("--- transcript of {owner} ---");
    for message in transcript {
        let arrow = match message.direction {
            MessageDirection::Sent => "->",
            MessageDirection::Received => "<-",
        };
        println!(
            "{} {} {}: {}",
            message.sent_at.format("%H:%M:%S%.3f"),
            arrow,
            message.author,
            message.body
        );
    }
}

fn describe(event: &PeerEvent) -> String {
    match event {
        PeerEvent::StateChanged { previous, current } => format!("state {previous} -> {current}"),
        PeerEvent::Registered { identity } => format!("registered as {identity}"),
        PeerEvent::IncomingConnection { connection } => format!("incoming dial from {}", connection.remote),
        PeerEvent::ConnectionOpened { connection } => {
            format!("connection open with {} ({})", connection.remote, connection.role)
        }
        PeerEvent::ConnectionClosed { remote, reason, .. } => format!("connection with {remote} closed: {reason:?}"),
        PeerEvent::InboundDialIgnored { remote, rejected } => {
            format!("busy, {} dial from {remote}", if *rejected { "rejected" } else { "ignored" })
        }
        PeerEvent::DialFailed { remote, error } => format!("dial to {remote} failed: {error}"),
        PeerEvent::CaptureFailed { error, .. } => format!("camera unavailable ({error}), chat only"),
        PeerEvent::LocalPreviewStarted { .. } => "self-preview started (muted)".to_string(),
        PeerEvent::MediaOfferSent { .. } => "media offer sent".to_string(),
        PeerEvent::MediaAnswered { .. } => "media offer answered".to_string(),
        PeerEvent::MediaDeclined { by, .. } => format!("media declined by {by}"),
        PeerEvent::RemoteStreamReceived { .. } => "remote stream playing".to_string(),
        PeerEvent::MessageSent { message, .. } => format!("sent \"{}\"", message.body),
        PeerEvent::MessageReceived { message, .. } => format!("{} says \"{}\"", message.author, message.body),
    }
}
