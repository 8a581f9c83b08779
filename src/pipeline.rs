//! Forwarding pipeline
//!
//! One thread per stage, connected only through bounded queues:
//!
//! ```text
//! capture (per port) -> router -> gui queue     -> gui sink
//!                              -> tunnel queue  -> tunnel receive -> process queue
//!                              -> process queue -> processor -> tunnel transmit -> sender
//! ```
//!
//! The role table is shared read-only. Shutdown is cooperative: capture
//! threads watch a stop flag between bounded receives, then a [`Message::Stop`]
//! sentinel travels down the queues behind the remaining frames so every
//! stage drains before it exits.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::{RouterConfig, SenderConfig, Settings};
use crate::error::{Error, Result};
use crate::iface::{Role, RoleTable};
use crate::platform::{rt, RawTransport};
use crate::queue::BoundedQueue;
use crate::router::{Classifier, Router, RouterOutputs, RouterSnapshot, RouterStats, TunnelPeer};
use crate::sender::{Sender, SenderSnapshot, SenderStats};
use crate::tunnel::{self, TunnelFraming};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_FRAME: usize = 65_536;

/// Item carried between stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message<T = Vec<u8>> {
    Frame(T),
    /// Drain sentinel; the receiving stage forwards it and exits
    Stop,
}

/// A payload the processor wants sent to the interface holding `role`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub role: Role,
    pub payload: Vec<u8>,
}

impl Outbound {
    pub fn new(role: Role, payload: Vec<u8>) -> Self {
        Outbound { role, payload }
    }
}

/// Application logic between the process queue and tunnel transmit.
pub trait Processor: Send {
    fn process(&mut self, frame: Vec<u8>) -> Option<Outbound>;
}

impl<F> Processor for F
where
    F: FnMut(Vec<u8>) -> Option<Outbound> + Send,
{
    fn process(&mut self, frame: Vec<u8>) -> Option<Outbound> {
        self(frame)
    }
}

/// Consumer of GUI-tagged frames.
pub trait GuiSink: Send {
    fn deliver(&mut self, frame: Vec<u8>);
}

impl<F> GuiSink for F
where
    F: FnMut(Vec<u8>) + Send,
{
    fn deliver(&mut self, frame: Vec<u8>) {
        self(frame)
    }
}

/// Accepts and drops everything.
pub struct Discard;

impl Processor for Discard {
    fn process(&mut self, frame: Vec<u8>) -> Option<Outbound> {
        debug!(len = frame.len(), "frame processed");
        None
    }
}

impl GuiSink for Discard {
    fn deliver(&mut self, frame: Vec<u8>) {
        debug!(len = frame.len(), "gui frame received");
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub queue_capacity: usize,
    pub tunnel_header_size: usize,
    pub router: RouterConfig,
    pub sender: SenderConfig,
    /// Request real-time priority for capture, router and sender threads
    pub realtime: bool,
    /// Longest a capture thread blocks before re-checking the stop flag
    pub poll_interval: Duration,
    pub max_frame_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            queue_capacity: 100,
            tunnel_header_size: 8,
            router: RouterConfig::default(),
            sender: SenderConfig::default(),
            realtime: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_frame_size: DEFAULT_MAX_FRAME,
        }
    }
}

impl PipelineConfig {
    pub fn new(settings: &Settings, router: RouterConfig, sender: SenderConfig) -> Self {
        PipelineConfig {
            queue_capacity: settings.queue_capacity,
            tunnel_header_size: settings.tunnel_header_size,
            router,
            sender,
            realtime: true,
            ..PipelineConfig::default()
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    captured: AtomicU64,
    gui: AtomicU64,
    processed: AtomicU64,
    tunnel_dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub captured: u64,
    pub router: RouterSnapshot,
    pub gui: u64,
    pub processed: u64,
    pub tunnel_dropped: u64,
    pub sender: SenderSnapshot,
}

struct Stage {
    name: String,
    handle: JoinHandle<()>,
}

impl Stage {
    fn spawn<F>(name: String, realtime: bool, body: F) -> Result<Stage>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            if realtime {
                rt::promote_current_thread();
            }
            body();
        })?;
        Ok(Stage { name, handle })
    }

    fn join(self) -> Result<()> {
        self.handle.join().map_err(|_| {
            error!(stage = %self.name, "stage panicked");
            Error::StageFailed(self.name)
        })
    }
}

pub struct Pipeline {
    stop: Arc<AtomicBool>,
    captures: Vec<Stage>,
    stages: Vec<Stage>,
    capture_queue: Arc<BoundedQueue<Message>>,
    counters: Arc<Counters>,
    router: Arc<RouterStats>,
    sender: Arc<SenderStats>,
}

fn queue<T>(capacity: usize) -> Arc<BoundedQueue<T>> {
    Arc::new(BoundedQueue::new(capacity))
}

impl Pipeline {
    /// Spawn every stage, plus one capture thread per port with a transport.
    pub fn start(
        table: Arc<RoleTable>,
        config: PipelineConfig,
        mut processor: Box<dyn Processor>,
        mut gui: Box<dyn GuiSink>,
    ) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(Counters::default());
        let capacity = config.queue_capacity;

        let capture_queue = queue(capacity);
        let outputs = RouterOutputs {
            gui: queue(capacity),
            tunnel_receive: queue(capacity),
            process: queue(capacity),
        };
        let transmit_queue: Arc<BoundedQueue<Message<Outbound>>> = queue(capacity);
        let send_queue = queue(capacity);

        let tunnel_peer = TunnelPeer::from_table(&table);
        if tunnel_peer.is_none() {
            warn!("no addressed tunnel interface, all traffic goes to the process queue");
        }
        let router = Router::new(Classifier::new(config.router.clone(), tunnel_peer));
        let router_stats = router.stats();
        let mut sender = Sender::new(config.sender.clone(), Arc::clone(&table));
        let sender_stats = sender.stats();
        let framing = TunnelFraming::new(config.tunnel_header_size);
        let selector = config.sender.role_selector();

        let mut stages = Vec::new();
        {
            let input = Arc::clone(&capture_queue);
            let outputs = outputs.clone();
            stages.push(Stage::spawn("router".into(), config.realtime, move || {
                router.run(&input, &outputs)
            })?);
        }
        {
            let input = Arc::clone(&outputs.gui);
            let counters = Arc::clone(&counters);
            stages.push(Stage::spawn("gui".into(), false, move || {
                while let Message::Frame(frame) = input.dequeue() {
                    counters.gui.fetch_add(1, Ordering::Relaxed);
                    gui.deliver(frame);
                }
            })?);
        }
        {
            let input = Arc::clone(&outputs.tunnel_receive);
            let output = Arc::clone(&outputs.process);
            let counters = Arc::clone(&counters);
            stages.push(Stage::spawn("tunnel-rx".into(), false, move || {
                tunnel::run_receive(framing, &input, &output, &counters.tunnel_dropped)
            })?);
        }
        {
            let input = Arc::clone(&outputs.process);
            let output = Arc::clone(&transmit_queue);
            let counters = Arc::clone(&counters);
            stages.push(Stage::spawn("process".into(), false, move || loop {
                match input.dequeue() {
                    Message::Frame(frame) => {
                        counters.processed.fetch_add(1, Ordering::Relaxed);
                        if let Some(outbound) = processor.process(frame) {
                            output.enqueue(Message::Frame(outbound));
                        }
                    }
                    Message::Stop => {
                        output.enqueue(Message::Stop);
                        return;
                    }
                }
            })?);
        }
        {
            let input = Arc::clone(&transmit_queue);
            let output = Arc::clone(&send_queue);
            let counters = Arc::clone(&counters);
            stages.push(Stage::spawn("tunnel-tx".into(), false, move || {
                tunnel::run_transmit(framing, selector, &input, &output, &counters.tunnel_dropped)
            })?);
        }
        {
            let input = Arc::clone(&send_queue);
            stages.push(Stage::spawn("sender".into(), config.realtime, move || sender.run(&input))?);
        }

        let mut captures = Vec::new();
        for endpoint in table.endpoints() {
            let Some(transport) = endpoint.transport() else {
                warn!(iface = %endpoint.iface.name, "no transport, not capturing");
                continue;
            };
            let name = endpoint.iface.name.clone();
            let transport = Arc::clone(transport);
            let output = Arc::clone(&capture_queue);
            let stop = Arc::clone(&stop);
            let counters = Arc::clone(&counters);
            let poll = config.poll_interval;
            let max_frame = config.max_frame_size;
            captures.push(Stage::spawn(format!("capture-{name}"), config.realtime, move || {
                capture(&name, transport.as_ref(), &output, &stop, &counters, poll, max_frame)
            })?);
        }

        info!(stages = stages.len(), captures = captures.len(), "pipeline started");
        Ok(Pipeline {
            stop,
            captures,
            stages,
            capture_queue,
            counters,
            router: router_stats,
            sender: sender_stats,
        })
    }

    /// Flag watched by the capture threads. Setting it begins shutdown.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Name of a stage that exited on its own, if any.
    pub fn failed_stage(&self) -> Option<&str> {
        let stopping = self.is_stopping();
        self.stages
            .iter()
            .chain(self.captures.iter().filter(|_| !stopping))
            .find(|stage| stage.handle.is_finished())
            .map(|stage| stage.name.as_str())
    }

    pub fn stats(&self) -> PipelineStats {
        snapshot(&self.counters, &self.router, &self.sender)
    }

    /// Block until the stop flag is set or a stage dies, then join.
    pub fn run_until_stopped(self, check: Duration) -> Result<PipelineStats> {
        while !self.is_stopping() {
            if let Some(stage) = self.failed_stage() {
                error!(stage, "stage exited unexpectedly, stopping pipeline");
                break;
            }
            thread::sleep(check);
        }
        self.join()
    }

    /// Stop capturing, drain every queue and wait for all stages.
    pub fn join(self) -> Result<PipelineStats> {
        self.shutdown();
        // A dead stage would leave its neighbours blocked on a queue forever.
        if let Some(stage) = self.failed_stage() {
            return Err(Error::StageFailed(stage.to_string()));
        }

        for stage in self.captures {
            stage.join()?;
        }
        self.capture_queue.enqueue(Message::Stop);
        for stage in self.stages {
            stage.join()?;
        }

        let stats = snapshot(&self.counters, &self.router, &self.sender);
        info!(
            captured = stats.captured,
            routed_gui = stats.router.gui,
            routed_tunnel = stats.router.tunnel,
            routed_process = stats.router.process,
            router_dropped = stats.router.dropped,
            tunnel_dropped = stats.tunnel_dropped,
            sent = stats.sender.sent,
            send_dropped = stats.sender.dropped,
            "pipeline stopped"
        );
        Ok(stats)
    }
}

fn snapshot(counters: &Counters, router: &RouterStats, sender: &SenderStats) -> PipelineStats {
    PipelineStats {
        captured: counters.captured.load(Ordering::Relaxed),
        router: router.snapshot(),
        gui: counters.gui.load(Ordering::Relaxed),
        processed: counters.processed.load(Ordering::Relaxed),
        tunnel_dropped: counters.tunnel_dropped.load(Ordering::Relaxed),
        sender: sender.snapshot(),
    }
}

fn capture(
    iface: &str,
    transport: &dyn RawTransport,
    output: &BoundedQueue<Message>,
    stop: &AtomicBool,
    counters: &Counters,
    poll: Duration,
    max_frame: usize,
) {
    let mut buf = vec![0u8; max_frame];
    debug!(iface, "capture started");
    while !stop.load(Ordering::Relaxed) {
        match transport.recv(&mut buf, poll) {
            Ok(Some(len)) => {
                counters.captured.fetch_add(1, Ordering::Relaxed);
                output.enqueue(Message::Frame(buf[..len].to_vec()));
            }
            Ok(None) => {}
            Err(e) => {
                warn!(iface, error = %e, "capture receive failed");
                thread::sleep(poll);
            }
        }
    }
    debug!(iface, "capture stopped");
}
