//! Round progression monitor.
//!
//! A background thread samples the `"<current>/<total>"` round counter
//! through a [`TextReader`], filters out implausible readings and notifies
//! listeners of every accepted round change.
//!
//! Listeners run synchronously on the polling thread. While a listener is
//! running (e.g. a milestone's instructions are being executed) no further
//! samples are taken, so milestone input never overlaps with polling and
//! two milestone firings never overlap with each other.
//!
//! `RoundState` has a single writer: the polling thread while it runs, or
//! the owner while the monitor is stopped.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::automation::config::{MonitorConfig, RelativeRect};
use crate::ocr::{ROUND_WHITELIST, TextReader};

/// Round counter and failure streak shared between the poller and the
/// run controller.
#[derive(Debug)]
pub struct RoundState {
    current_round: AtomicU32,
    consecutive_failures: AtomicU32,
}

impl RoundState {
    pub fn new(baseline: u32) -> Self {
        Self {
            current_round: AtomicU32::new(baseline),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    pub fn current_round(&self) -> u32 {
        self.current_round.load(Ordering::SeqCst)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    /// Clears the failure streak. Only call while the monitor is stopped.
    pub fn reset_failures(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }

    fn accept(&self, round: u32) {
        self.current_round.store(round, Ordering::SeqCst);
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }

    fn record_failure(&self) -> u32 {
        self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Why a reading was not accepted.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("no text recognized")]
    NoText,
    #[error("'{0}' is not <current>/<total>")]
    Malformed(String),
    #[error("'{0}' contains non-digits")]
    NotNumeric(String),
    #[error("total {found} is not {expected}")]
    WrongTotal { found: u32, expected: u32 },
    #[error("round {0} exceeds the total")]
    OutOfRange(u32),
    #[error("round {value} does not advance past {current}")]
    NotAdvanced { value: u32, current: u32 },
    #[error("round {value} is a known misread (+{jump})")]
    ExcludedJump { value: u32, jump: u32 },
    #[error("round {value} jumps too far from {current}")]
    JumpTooLarge { value: u32, current: u32 },
}

/// Plausibility model for readings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AcceptancePolicy {
    pub total_rounds: u32,
    /// Accepted values are below `current + max_jump`
    pub max_jump: u32,
    /// Forward jumps that are never accepted
    pub excluded_jumps: Vec<u32>,
}

impl From<&MonitorConfig> for AcceptancePolicy {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            total_rounds: config.total_rounds,
            max_jump: config.max_round_jump,
            excluded_jumps: config.excluded_jumps.clone(),
        }
    }
}

fn parse_digits(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Decides whether an OCR reading is a plausible next round.
pub fn evaluate_reading(
    text: Option<&str>,
    current: u32,
    policy: &AcceptancePolicy,
) -> Result<u32, RejectReason> {
    let text = text.map(str::trim).unwrap_or_default();
    if text.is_empty() {
        return Err(RejectReason::NoText);
    }

    let mut parts = text.split('/');
    let (left, right) = match (parts.next(), parts.next(), parts.next()) {
        (Some(left), Some(right), None) if !left.trim().is_empty() && !right.trim().is_empty() => {
            (left.trim(), right.trim())
        }
        _ => return Err(RejectReason::Malformed(text.to_string())),
    };

    let (Some(value), Some(total)) = (parse_digits(left), parse_digits(right)) else {
        return Err(RejectReason::NotNumeric(text.to_string()));
    };

    if total != policy.total_rounds {
        return Err(RejectReason::WrongTotal {
            found: total,
            expected: policy.total_rounds,
        });
    }
    if value > policy.total_rounds {
        return Err(RejectReason::OutOfRange(value));
    }
    if value <= current {
        return Err(RejectReason::NotAdvanced { value, current });
    }

    let jump = value - current;
    if policy.excluded_jumps.contains(&jump) {
        return Err(RejectReason::ExcludedJump { value, jump });
    }
    if value >= current.saturating_add(policy.max_jump) {
        return Err(RejectReason::JumpTooLarge { value, current });
    }

    Ok(value)
}

type Listener = Box<dyn FnMut(u32) + Send>;

struct Shared {
    reader: Arc<dyn TextReader>,
    region: RelativeRect,
    policy: AcceptancePolicy,
    state: Arc<RoundState>,
    /// Listeners being notified. Only locked while notifying.
    listeners: Mutex<Vec<Listener>>,
    /// Registrations not yet picked up by a notification
    registered: Mutex<Vec<Listener>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking listener must not take the monitor down with it
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Shared {
    fn notify(&self, round: u32) {
        let mut listeners = lock(&self.listeners);
        listeners.append(&mut lock(&self.registered));
        for listener in listeners.iter_mut() {
            listener(round);
        }
    }

    fn poll_once(&self) -> Option<u32> {
        let text = self.reader.read(&self.region, ROUND_WHITELIST);
        let current = self.state.current_round();

        match evaluate_reading(text.as_deref(), current, &self.policy) {
            Ok(round) => {
                self.state.accept(round);
                info!("Round {} (was {})", round, current);
                self.notify(round);
                Some(round)
            }
            Err(reason) => {
                let failures = self.state.record_failure();
                debug!("Reading rejected: {} (failures: {})", reason, failures);
                None
            }
        }
    }
}

struct Worker {
    handle: JoinHandle<()>,
    stop_tx: Sender<()>,
}

/// Polls the round counter on a background thread.
pub struct RoundMonitor {
    shared: Arc<Shared>,
    poll_interval: Duration,
    worker: Mutex<Option<Worker>>,
    /// Poller stopped from its own thread, still finishing its listeners
    exiting: Mutex<Option<JoinHandle<()>>>,
}

impl RoundMonitor {
    pub fn new(
        reader: Arc<dyn TextReader>,
        config: &MonitorConfig,
        state: Arc<RoundState>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                reader,
                region: config.round_region,
                policy: AcceptancePolicy::from(config),
                state,
                listeners: Mutex::new(Vec::new()),
                registered: Mutex::new(Vec::new()),
            }),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            worker: Mutex::new(None),
            exiting: Mutex::new(None),
        }
    }

    pub fn state(&self) -> &Arc<RoundState> {
        &self.shared.state
    }

    /// Registers a listener for every round accepted from now on.
    ///
    /// Safe to call from a listener; the new listener is first notified of
    /// the next accepted round.
    pub fn add_listener(&self, listener: impl FnMut(u32) + Send + 'static) {
        lock(&self.shared.registered).push(Box::new(listener));
    }

    fn worker(&self) -> MutexGuard<'_, Option<Worker>> {
        lock(&self.worker)
    }

    /// Waits for a poller that was stopped from one of its own listeners.
    fn join_exiting(&self) {
        let Some(handle) = lock(&self.exiting).take() else {
            return;
        };
        // Called from that very listener: it exits once the listener returns
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            error!("Round monitor thread panicked");
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker().is_some()
    }

    /// Starts polling. No-op if already running.
    ///
    /// A poller stopped from a listener is joined first, so two pollers
    /// never sample at the same time.
    pub fn start(&self) {
        self.join_exiting();
        let mut worker = self.worker();
        if worker.is_some() {
            return;
        }

        let (stop_tx, stop_rx) = mpsc::channel();
        let shared = Arc::clone(&self.shared);
        let interval = self.poll_interval;
        let handle = thread::spawn(move || {
            loop {
                shared.poll_once();
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            debug!("Round monitor stopped");
        });

        *worker = Some(Worker { handle, stop_tx });
        info!("Round monitor started");
    }

    /// Stops polling and waits for the polling thread to exit. No-op if not
    /// running. When called from a listener only signals the thread; the
    /// next `start` or `stop` waits for it.
    pub fn stop(&self) {
        let worker = self.worker().take();
        let Some(worker) = worker else {
            self.join_exiting();
            return;
        };

        let _ = worker.stop_tx.send(());
        if worker.handle.thread().id() == thread::current().id() {
            *lock(&self.exiting) = Some(worker.handle);
            return;
        }
        if worker.handle.join().is_err() {
            error!("Round monitor thread panicked");
        }
    }

    /// Takes a single sample on the calling thread. Returns the accepted
    /// round, if any.
    pub fn poll_once(&self) -> Option<u32> {
        self.shared.poll_once()
    }
}

impl Drop for RoundMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
