//! Bounded FIFO Pool: admission control over a fixed range of container
//! host ports. Generalizes this repo's mining-pool shape (`PoolConfig`
//! with `Default`, state behind a single async mutex, one `tokio::spawn`
//! per unit of work) from "mining job" to "code execution lease".

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify};

use crate::container::ContainerRuntime;
use crate::core::model::{OutcomeKind, Source, Submission};
use crate::session::{self, SessionOutcome};

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub image: String,
    pub start_port: u16,
    pub end_port: u16,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            image: String::from("codescord"),
            start_port: 6090,
            end_port: 6096,
        }
    }
}

impl PoolConfig {
    pub fn pool_size(&self) -> usize {
        (self.end_port - self.start_port + 1) as usize
    }
}

struct PoolState {
    queue: VecDeque<Submission>,
    used_ports: BTreeSet<u16>,
    used_ids: HashSet<String>,
    in_flight: usize,
}

impl PoolState {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            used_ports: BTreeSet::new(),
            used_ids: HashSet::new(),
            in_flight: 0,
        }
    }
}

/// Owns the admission queue and drives the scheduler task. Cheap to
/// clone via `Arc`; `Broker` holds the only long-lived reference.
pub struct Pool {
    config: PoolConfig,
    state: Mutex<PoolState>,
    notify: Notify,
    runtime: Arc<dyn ContainerRuntime>,
}

impl Pool {
    pub fn new(config: PoolConfig, runtime: Arc<dyn ContainerRuntime>) -> Arc<Self> {
        let pool = Arc::new(Self {
            config,
            state: Mutex::new(PoolState::new()),
            notify: Notify::new(),
            runtime,
        });
        let scheduler = pool.clone();
        tokio::spawn(async move {
            scheduler.run_scheduler().await;
        });
        pool
    }

    /// Public async entry point: builds a `Submission`, pushes it behind
    /// the mutex, notifies the scheduler, awaits the result. Never
    /// returns an `Err` — every failure path is already folded into a
    /// canned message by the lease task.
    pub async fn submit(&self, source: Source) -> String {
        let (tx, rx) = tokio::sync::oneshot::channel();
        {
            let mut state = self.state.lock().await;
            state.queue.push_back(Submission {
                source,
                completion: tx,
            });
        }
        self.notify.notify_one();

        match rx.await {
            Ok(result) => result,
            // Scheduler dropped the sender without completing — treat as
            // an internal failure rather than panicking the caller.
            Err(_) => OutcomeKind::WorkerInternal.into_message(),
        }
    }

    /// Never returns; woken on every `submit()` push and every lease
    /// completion, sleeps otherwise instead of polling for a free port.
    async fn run_scheduler(self: Arc<Self>) {
        loop {
            let admitted = self.try_admit_one().await;
            if !admitted {
                self.notify.notified().await;
            }
        }
    }

    async fn try_admit_one(self: &Arc<Self>) -> bool {
        let (submission, port, id) = {
            let mut state = self.state.lock().await;
            if state.queue.is_empty() {
                return false;
            }
            let Some(port) = lowest_free_port(&state.used_ports, self.config.start_port, self.config.end_port) else {
                return false;
            };
            let submission = state.queue.pop_front().expect("queue checked non-empty above");
            let id = fresh_container_id(&state.used_ids);
            state.used_ports.insert(port);
            state.used_ids.insert(id.clone());
            state.in_flight += 1;
            (submission, port, id)
        };

        let pool = self.clone();
        tokio::spawn(async move {
            pool.run_lease(submission, port, id).await;
        });
        true
    }

    async fn run_lease(self: Arc<Self>, submission: Submission, port: u16, id: String) {
        let _guard = LeaseGuard {
            pool: self.clone(),
            port,
            id: id.clone(),
        };

        let outcome = self.drive_lease(&submission.source, port, &id).await;
        let message = outcome_to_message(outcome);
        // A disconnected receiver means the submitter already gave up;
        // the result has nowhere to go, which is fine.
        let _ = submission.completion.send(message);
    }

    async fn drive_lease(&self, source: &Source, port: u16, id: &str) -> SessionOutcome {
        if let Err(e) = self.runtime.start(&self.config.image, id, port).await {
            tracing::warn!("failed to start container {id}: {e}");
            return SessionOutcome::LinkFailure(e.to_string());
        }

        match connect_with_retry(port).await {
            Some(mut stream) => session::run_broker_session(&mut stream, source).await,
            None => SessionOutcome::LinkFailure(format!("no connection to container {id}")),
        }
    }

    async fn release(&self, port: u16, id: &str) {
        if let Err(e) = self.runtime.stop(id).await {
            tracing::warn!("failed to stop container {id}: {e}");
        }
        let mut state = self.state.lock().await;
        state.used_ports.remove(&port);
        state.used_ids.remove(id);
        state.in_flight = state.in_flight.saturating_sub(1);
        drop(state);
        self.notify.notify_one();
    }

    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.in_flight
    }
}

fn outcome_to_message(outcome: SessionOutcome) -> String {
    let kind = match outcome {
        SessionOutcome::Success(text) => OutcomeKind::Success(text),
        SessionOutcome::ProtocolMismatch => OutcomeKind::ProtocolMismatch,
        SessionOutcome::LanguageUnsupported(lang) => OutcomeKind::LanguageUnsupported(lang),
        SessionOutcome::WorkerInternal => OutcomeKind::WorkerInternal,
        SessionOutcome::JobTimeout => OutcomeKind::JobTimeout,
        SessionOutcome::LinkFailure(_) => OutcomeKind::LinkRefused,
    };
    kind.into_message()
}

fn lowest_free_port(used: &BTreeSet<u16>, start: u16, end: u16) -> Option<u16> {
    (start..=end).find(|p| !used.contains(p))
}

fn fresh_container_id(used: &HashSet<String>) -> String {
    loop {
        let candidate = format!("codescord-{}", uuid::Uuid::new_v4());
        if !used.contains(&candidate) {
            return candidate;
        }
    }
}

/// First retry immediately after the container just started, then up to
/// four more after a fixed backoff — five attempts total before giving
/// up on a container that should have come up by now.
async fn connect_with_retry(port: u16) -> Option<TcpStream> {
    tokio::time::sleep(Duration::from_millis(450)).await;

    for attempt in 0..5 {
        match TcpStream::connect(("127.0.0.1", port)).await {
            Ok(stream) => return Some(stream),
            Err(e) => {
                tracing::debug!("connect attempt {attempt} to port {port} failed: {e}");
                if attempt < 4 {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            }
        }
    }
    None
}

/// Guarantees `Pool::release` runs exactly once per admitted lease, even
/// if `drive_lease` returns early or the lease task panics — the one
/// invariant that must survive a panic inside a spawned task.
struct LeaseGuard {
    pool: Arc<Pool>,
    port: u16,
    id: String,
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        let pool = self.pool.clone();
        let port = self.port;
        let id = std::mem::take(&mut self.id);
        tokio::spawn(async move {
            pool.release(port, &id).await;
        });
    }
}
