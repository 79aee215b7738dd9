//! Full broker<->worker round trips over loopback TCP, using a
//! `FakeContainerRuntime` that binds an in-process `worker::serve` task
//! instead of shelling out to `docker` — exercises the pool's admission,
//! lease, and cleanup machinery without requiring a container runtime or
//! language interpreters on the test host.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

use codescord::broker::Broker;
use codescord::container::{ContainerError, ContainerRuntime};
use codescord::pool::PoolConfig;
use codescord::runner::{LanguageRunner, RunOutcome};

/// Deterministic stand-in for a language interpreter: echoes back a
/// fixed result, or simulates an unsupported language / timeout,
/// without touching the filesystem or spawning a subprocess.
struct ScriptedRunner;

#[async_trait::async_trait]
impl LanguageRunner for ScriptedRunner {
    fn supports(&self, language: &str) -> bool {
        matches!(language, "python" | "sleepy")
    }

    async fn run(&self, language: &str, code: &[u8], _args: &str) -> RunOutcome {
        match language {
            "python" => {
                let text = String::from_utf8_lossy(code).into_owned();
                RunOutcome::Ran(format!("ran: {text}").into_bytes())
            }
            "sleepy" => RunOutcome::Timeout,
            _ => RunOutcome::Unsupported,
        }
    }
}

/// Binds a loopback `worker::serve` task per "container" instead of
/// shelling out to `docker`; `stop` fires that task's shutdown notify.
struct FakeContainerRuntime {
    shutdowns: Mutex<HashMap<String, Arc<Notify>>>,
}

impl FakeContainerRuntime {
    fn new() -> Self {
        Self {
            shutdowns: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait::async_trait]
impl ContainerRuntime for FakeContainerRuntime {
    async fn start(&self, _image: &str, id: &str, host_port: u16) -> Result<(), ContainerError> {
        let shutdown = Arc::new(Notify::new());
        self.shutdowns
            .lock()
            .await
            .insert(id.to_string(), shutdown.clone());

        let runner: Arc<dyn LanguageRunner> = Arc::new(ScriptedRunner);
        tokio::spawn(async move {
            let _ = codescord::worker::serve_with_runner(host_port, shutdown, runner).await;
        });

        // Give the accept loop a moment to bind before the pool's own
        // connect-retry kicks in.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        Ok(())
    }

    async fn stop(&self, id: &str) -> Result<(), ContainerError> {
        if let Some(shutdown) = self.shutdowns.lock().await.remove(id) {
            shutdown.notify_one();
        }
        Ok(())
    }

    async fn sweep(&self, _image: &str) -> Result<usize, ContainerError> {
        Ok(0)
    }
}

fn test_config(start: u16, end: u16) -> PoolConfig {
    PoolConfig {
        image: "codescord-test".to_string(),
        start_port: start,
        end_port: end,
    }
}

#[tokio::test]
async fn happy_path_submission_round_trips() {
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(FakeContainerRuntime::new());
    let broker = Broker::new(test_config(21100, 21103), runtime);

    let result = broker.submit("python", b"print(1)".to_vec(), "").await;

    assert_eq!(result, "ran: print(1)");

    broker.shutdown().await;
}

#[tokio::test]
async fn unsupported_language_reports_canned_message() {
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(FakeContainerRuntime::new());
    let broker = Broker::new(test_config(21110, 21113), runtime);

    let result = broker.submit("cobol", b"IDENTIFICATION DIVISION.".to_vec(), "").await;

    assert!(result.contains("cobol"));
    assert!(result.contains("not implemented"));

    broker.shutdown().await;
}

#[tokio::test]
async fn fifo_admission_serves_more_submissions_than_ports() {
    // Only two ports available, but four submissions: the third and
    // fourth must wait for a port to free up before being admitted.
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(FakeContainerRuntime::new());
    let broker = Arc::new(Broker::new(test_config(21120, 21121), runtime));

    let mut handles = Vec::new();
    for i in 0..4 {
        let broker = broker.clone();
        handles.push(tokio::spawn(async move {
            broker
                .submit("python", format!("job-{i}").into_bytes(), "")
                .await
        }));
    }

    let mut results = Vec::new();
    for h in handles {
        results.push(h.await.unwrap());
    }
    results.sort();

    let mut expected: Vec<String> = (0..4).map(|i| format!("ran: job-{i}")).collect();
    expected.sort();
    assert_eq!(results, expected);
}

#[tokio::test]
async fn job_timeout_is_reported() {
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(FakeContainerRuntime::new());
    let broker = Broker::new(test_config(21130, 21131), runtime);

    let result = broker.submit("sleepy", b"while true {}".to_vec(), "").await;

    assert!(result.contains("30s"));

    broker.shutdown().await;
}
