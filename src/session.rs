//! Session engine: drives one broker<->worker TCP conversation through the
//! fixed protocol sequence on top of `codec`. Broker and worker invert who
//! sends/receives but share every frame shape, so each gets its own
//! top-level function rather than a shared trait with two impls.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::codec::{self, CodecError};
use crate::core::model::Source;
use crate::core::protocol::{canonical_handshake_string, StatusCode};
use crate::runner::{LanguageRunner, RunOutcome};

/// Every way a broker-side session can end. Never escapes as a raw
/// `CodecError` past `run_broker_session` — the lease task that calls this
/// does one `match` on the outcome to pick a canned message (§7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Success(String),
    ProtocolMismatch,
    LanguageUnsupported(String),
    WorkerInternal,
    JobTimeout,
    LinkFailure(String),
}

/// Drive the broker side of one session: AUTHENTICATE, send the source as
/// three blobs, await the result, CLOSE.
pub async fn run_broker_session<S>(stream: &mut S, source: &Source) -> SessionOutcome
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match run_broker_session_inner(stream, source).await {
        Ok(outcome) => outcome,
        Err(e) => SessionOutcome::LinkFailure(e.to_string()),
    }
}

async fn run_broker_session_inner<S>(
    stream: &mut S,
    source: &Source,
) -> Result<SessionOutcome, CodecError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // --- AUTHENTICATE ---
    codec::write_status(stream, StatusCode::Authenticate).await?;
    match codec::read_status(stream).await? {
        StatusCode::Success => {}
        _ => return Ok(SessionOutcome::ProtocolMismatch),
    }
    codec::write_blob(stream, canonical_handshake_string().as_bytes()).await?;
    match codec::read_status(stream).await? {
        StatusCode::Success => {}
        StatusCode::NotImplemented => return Ok(SessionOutcome::ProtocolMismatch),
        other => {
            return Err(CodecError::Protocol(format!(
                "unexpected AUTHENTICATE ack {other:?}"
            )))
        }
    }

    // --- FILE ---
    // FILE is always a recognized instruction to a compliant worker; this
    // first ack only confirms that, it says nothing about the language
    // yet (the worker hasn't seen it).
    codec::write_status(stream, StatusCode::File).await?;
    match codec::read_status(stream).await? {
        StatusCode::Success => {}
        other => {
            return Err(CodecError::Protocol(format!(
                "unexpected FILE ack {other:?}"
            )))
        }
    }
    codec::write_blob(stream, source.language.as_bytes()).await?;

    // The worker replies here with whether it recognizes the language,
    // before the (possibly large) code blob is sent.
    match codec::read_status(stream).await? {
        StatusCode::Success => {}
        StatusCode::LangNotImplemented => {
            // The worker never saw code/args, so there's nothing to
            // unwind on its side beyond the ordinary CLOSE handshake.
            codec::write_status(stream, StatusCode::Close).await?;
            let _ = codec::read_status(stream).await?;
            return Ok(SessionOutcome::LanguageUnsupported(source.language.clone()));
        }
        other => {
            return Err(CodecError::Protocol(format!(
                "unexpected language ack {other:?}"
            )))
        }
    }
    codec::write_blob(stream, &source.code).await?;
    codec::write_blob(stream, source.args.as_bytes()).await?;
    codec::write_status(stream, StatusCode::Awaiting).await?;

    // --- await result ---
    let outcome = match codec::read_status(stream).await? {
        StatusCode::Text => {
            codec::write_status(stream, StatusCode::Success).await?;
            let blob = codec::read_blob(stream).await?;
            let text = String::from_utf8_lossy(&blob).into_owned();
            SessionOutcome::Success(text)
        }
        StatusCode::LangNotImplemented => {
            SessionOutcome::LanguageUnsupported(source.language.clone())
        }
        StatusCode::ProcessTimeout => SessionOutcome::JobTimeout,
        StatusCode::InternalError => SessionOutcome::WorkerInternal,
        other => {
            return Err(CodecError::Protocol(format!(
                "unexpected result status {other:?}"
            )))
        }
    };

    if matches!(outcome, SessionOutcome::Success(_)) {
        match codec::read_status(stream).await? {
            StatusCode::Awaiting => {}
            other => {
                return Err(CodecError::Protocol(format!(
                    "expected AWAITING end-of-result, got {other:?}"
                )))
            }
        }
    }

    // --- CLOSE ---
    codec::write_status(stream, StatusCode::Close).await?;
    let _ = codec::read_status(stream).await?;

    Ok(outcome)
}

/// Drive the worker side of one session: loop on instructions until
/// CLOSE, dispatching AUTHENTICATE and FILE. Any status byte not in the
/// expected set at a given step is a protocol error — the worker drops
/// the connection without replying further.
pub async fn run_worker_session<S>(stream: &mut S, runner: &dyn LanguageRunner)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if let Err(e) = run_worker_session_inner(stream, runner).await {
        tracing::debug!("worker session ended: {e}");
    }
}

async fn run_worker_session_inner<S>(
    stream: &mut S,
    runner: &dyn LanguageRunner,
) -> Result<(), CodecError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        match codec::read_status(stream).await? {
            StatusCode::Authenticate => {
                codec::write_status(stream, StatusCode::Success).await?;
                let theirs = codec::read_blob(stream).await?;
                if theirs == canonical_handshake_string().as_bytes() {
                    codec::write_status(stream, StatusCode::Success).await?;
                } else {
                    codec::write_status(stream, StatusCode::NotImplemented).await?;
                    return Err(CodecError::Protocol(
                        "protocol mismatch on AUTHENTICATE".to_string(),
                    ));
                }
            }
            StatusCode::File => {
                codec::write_status(stream, StatusCode::Success).await?;
                handle_file(stream, runner).await?;
            }
            StatusCode::Close => {
                codec::write_status(stream, StatusCode::Success).await?;
                return Ok(());
            }
            other => {
                return Err(CodecError::Protocol(format!(
                    "unexpected instruction {other:?}"
                )))
            }
        }
    }
}

async fn handle_file<S>(stream: &mut S, runner: &dyn LanguageRunner) -> Result<(), CodecError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let language = String::from_utf8_lossy(&codec::read_blob(stream).await?).into_owned();

    if !runner.supports(&language) {
        codec::write_status(stream, StatusCode::LangNotImplemented).await?;
        return Ok(());
    }
    codec::write_status(stream, StatusCode::Success).await?;

    let code = codec::read_blob(stream).await?;
    let args = String::from_utf8_lossy(&codec::read_blob(stream).await?).into_owned();

    match codec::read_status(stream).await? {
        StatusCode::Awaiting => {}
        other => {
            return Err(CodecError::Protocol(format!(
                "expected AWAITING before running job, got {other:?}"
            )))
        }
    }

    match runner.run(&language, &code, &args).await {
        RunOutcome::Ran(output) => {
            codec::write_status(stream, StatusCode::Text).await?;
            match codec::read_status(stream).await? {
                StatusCode::Success => {}
                other => {
                    return Err(CodecError::Protocol(format!(
                        "expected SUCCESS before TEXT upload, got {other:?}"
                    )))
                }
            }
            codec::write_blob(stream, &output).await?;
            codec::write_status(stream, StatusCode::Awaiting).await?;
        }
        RunOutcome::Unsupported => {
            codec::write_status(stream, StatusCode::LangNotImplemented).await?;
        }
        RunOutcome::Timeout => {
            codec::write_status(stream, StatusCode::ProcessTimeout).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::FakeRunner;
    use tokio::io::duplex;

    #[tokio::test]
    async fn happy_path_round_trip() {
        let (mut broker_end, mut worker_end) = duplex(1 << 16);
        let runner = FakeRunner::always_ok(b"Hello World!\n".to_vec());

        let source = Source {
            language: "python".to_string(),
            code: b"print('Hello World!')".to_vec(),
            args: String::new(),
        };

        let worker = tokio::spawn(async move {
            run_worker_session(&mut worker_end, &runner).await;
        });

        let outcome = run_broker_session(&mut broker_end, &source).await;
        worker.await.unwrap();

        assert_eq!(outcome, SessionOutcome::Success("Hello World!\n".to_string()));
    }

    #[tokio::test]
    async fn unsupported_language_is_reported() {
        let (mut broker_end, mut worker_end) = duplex(1 << 16);
        let runner = FakeRunner::unsupported();

        let source = Source {
            language: "brainfuck".to_string(),
            code: b"+++".to_vec(),
            args: String::new(),
        };

        let worker = tokio::spawn(async move {
            run_worker_session(&mut worker_end, &runner).await;
        });

        let outcome = run_broker_session(&mut broker_end, &source).await;
        worker.await.unwrap();

        assert_eq!(
            outcome,
            SessionOutcome::LanguageUnsupported("brainfuck".to_string())
        );
    }

    #[tokio::test]
    async fn timeout_is_reported() {
        let (mut broker_end, mut worker_end) = duplex(1 << 16);
        let runner = FakeRunner::always_timeout();

        let source = Source {
            language: "python".to_string(),
            code: b"import time\ntime.sleep(60)".to_vec(),
            args: String::new(),
        };

        let worker = tokio::spawn(async move {
            run_worker_session(&mut worker_end, &runner).await;
        });

        let outcome = run_broker_session(&mut broker_end, &source).await;
        worker.await.unwrap();

        assert_eq!(outcome, SessionOutcome::JobTimeout);
    }

    #[tokio::test]
    async fn protocol_mismatch_closes_connection() {
        // Simulate a stale worker that disagrees on the handshake string
        // by reading the AUTHENTICATE byte and replying NOT_IMPLEMENTED
        // to the blob it would otherwise accept.
        let (mut broker_end, mut worker_end) = duplex(1 << 16);

        let faker = tokio::spawn(async move {
            let status = codec::read_status(&mut worker_end).await.unwrap();
            assert_eq!(status, StatusCode::Authenticate);
            codec::write_status(&mut worker_end, StatusCode::Success)
                .await
                .unwrap();
            let _ = codec::read_blob(&mut worker_end).await.unwrap();
            codec::write_status(&mut worker_end, StatusCode::NotImplemented)
                .await
                .unwrap();
        });

        let source = Source {
            language: "python".to_string(),
            code: b"print(1)".to_vec(),
            args: String::new(),
        };
        let outcome = run_broker_session(&mut broker_end, &source).await;
        faker.await.unwrap();

        assert_eq!(outcome, SessionOutcome::ProtocolMismatch);
    }
}
