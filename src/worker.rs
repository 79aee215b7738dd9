//! Worker Server: the TCP accept loop that runs inside every container,
//! mirroring `pool::start_pool_server`'s bind + accept-loop shape in
//! this repo, generalized from "mining job" framing to one
//! `run_worker_session` per connection.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Notify;

use crate::runner::LanguageRunner;
use crate::session;

/// Binds `0.0.0.0:<port>` and loops `accept()` + `tokio::spawn` per
/// connection until an unrecoverable accept error or `shutdown` fires.
/// In-flight sessions finish or hit their own 30s deadline — the accept
/// loop stopping never force-kills one mid-session.
pub async fn serve(port: u16, shutdown: Arc<Notify>) -> std::io::Result<()> {
    let runner: Arc<dyn LanguageRunner> = Arc::new(crate::runner::ProcessRunner::new());
    serve_with_runner(port, shutdown, runner).await
}

pub async fn serve_with_runner(
    port: u16,
    shutdown: Arc<Notify>,
    runner: Arc<dyn LanguageRunner>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!("worker listening on port {port}");

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                tracing::info!("worker on port {port} shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((mut stream, peer)) => {
                        let runner = runner.clone();
                        tokio::spawn(async move {
                            tracing::debug!("accepted connection from {peer}");
                            session::run_worker_session(&mut stream, runner.as_ref()).await;
                        });
                    }
                    Err(e) => {
                        tracing::error!("worker accept error: {e}");
                    }
                }
            }
        }
    }
}
