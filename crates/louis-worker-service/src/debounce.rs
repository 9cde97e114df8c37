//! Caller-side quiescence timer.
//!
//! The worker translates whatever it is sent. Editors that translate as the
//! user types push every edit into a [`Debouncer`], which forwards a value
//! only once no newer value has arrived for the whole window. Each
//! forwarded value carries the generation it was pushed with, and a
//! [`GenerationGate`] tells the caller whether a translation that comes
//! back is still for the latest edit.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

/// Default quiescence window in milliseconds.
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Capacity of the debounced output channel.
const OUTPUT_CAPACITY: usize = 16;

/// A value that survived the quiescence window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Debounced<T> {
    /// Generation the value was pushed with.
    pub generation: u64,
    /// The value.
    pub value: T,
}

/// Issues generations and recognizes stale ones.
#[derive(Debug, Clone, Default)]
pub struct GenerationGate {
    latest: Arc<AtomicU64>,
}

impl GenerationGate {
    /// Create a gate with no generations issued.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next generation. It becomes the current one.
    pub fn issue(&self) -> u64 {
        self.latest.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// The most recently issued generation, `0` if none.
    pub fn latest(&self) -> u64 {
        self.latest.load(Ordering::Acquire)
    }

    /// Whether `generation` is still the latest.
    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.latest()
    }
}

/// Collapses bursts of values into the last one.
///
/// Dropping the debouncer flushes a pending value, then closes the output
/// channel.
#[derive(Debug)]
pub struct Debouncer<T> {
    input: mpsc::UnboundedSender<(u64, T)>,
    gate: GenerationGate,
    task: JoinHandle<()>,
}

impl<T: Send + 'static> Debouncer<T> {
    /// Spawn a debouncer with the given window on the current runtime.
    ///
    /// Returns the debouncer and the channel its output arrives on.
    pub fn new(window: Duration) -> (Self, mpsc::Receiver<Debounced<T>>) {
        let (input, inbox) = mpsc::unbounded_channel();
        let (output, receiver) = mpsc::channel(OUTPUT_CAPACITY);
        let task = tokio::spawn(run(window, inbox, output));

        let debouncer = Self {
            input,
            gate: GenerationGate::new(),
            task,
        };
        (debouncer, receiver)
    }

    /// Push a value, restarting the window.
    ///
    /// Returns the value's generation, or `None` if the output side is gone.
    pub fn push(&self, value: T) -> Option<u64> {
        let generation = self.gate.issue();
        self.input.send((generation, value)).ok()?;
        Some(generation)
    }

    /// Gate sharing this debouncer's generations.
    pub fn gate(&self) -> GenerationGate {
        self.gate.clone()
    }

    /// Whether the timer task has finished.
    pub fn is_closed(&self) -> bool {
        self.task.is_finished()
    }
}

async fn run<T>(
    window: Duration,
    mut inbox: mpsc::UnboundedReceiver<(u64, T)>,
    output: mpsc::Sender<Debounced<T>>,
) {
    let mut pending: Option<(u64, T)> = None;

    loop {
        let Some((generation, value)) = pending.take() else {
            match inbox.recv().await {
                Some(next) => pending = Some(next),
                None => return,
            }
            continue;
        };

        tokio::select! {
            next = inbox.recv() => match next {
                Some(next) => {
                    trace!(superseded = generation, "Debounce window restarted");
                    pending = Some(next);
                }
                None => {
                    let _ = output.send(Debounced { generation, value }).await;
                    return;
                }
            },
            () = tokio::time::sleep(window) => {
                if output.send(Debounced { generation, value }).await.is_err() {
                    return;
                }
            }
        }
    }
}
