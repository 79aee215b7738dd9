//! Domain types independent of the wire format: what gets submitted, what
//! a lease looks like, and the taxonomy of outcomes a submission can end
//! in.

use tokio::sync::oneshot;

/// A single `(language, code, args)` triple as submitted by the (out of
/// scope) chat front-end. Immutable; discarded once its result has been
/// returned.
#[derive(Debug, Clone)]
pub struct Source {
    pub language: String,
    pub code: Vec<u8>,
    pub args: String,
}

/// A `Source` plus its single-assignment completion handle. The oneshot
/// channel is what makes "fulfilled exactly once" a type-level guarantee
/// rather than a runtime invariant to maintain by hand.
pub struct Submission {
    pub source: Source,
    pub completion: oneshot::Sender<String>,
}

/// The tuple identifying one admitted job from pool admission until
/// cleanup. Unique among live leases for the lifetime of the container.
#[derive(Debug, Clone)]
pub struct Lease {
    pub container_id: String,
    pub host_port: u16,
}

/// Every way a submission's journey through the broker can end, mapped at
/// the end of §7 of the design to one canned, user-visible string. None of
/// these are ever surfaced as an `Err` from the public `submit()` façade —
/// by design, a submission always resolves to a result string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeKind {
    /// Success, subprocess stdout or stderr-on-nonzero-exit.
    Success(String),
    /// Initial TCP connect failed beyond the retry budget.
    LinkRefused,
    /// AUTHENTICATE blob differed from ours.
    ProtocolMismatch,
    /// Worker has no launcher for this language tag.
    LanguageUnsupported(String),
    /// Worker replied INTERNAL_ERROR at some step.
    WorkerInternal,
    /// The 30s job deadline fired.
    JobTimeout,
}

impl OutcomeKind {
    /// The canned, user-visible message for this outcome (§7).
    pub fn into_message(self) -> String {
        match self {
            OutcomeKind::Success(text) => text,
            OutcomeKind::LinkRefused => {
                "Processing server down. Please try again later.".to_string()
            }
            OutcomeKind::ProtocolMismatch => {
                "client protocol out of sync with server, please contact developer for update."
                    .to_string()
            }
            OutcomeKind::LanguageUnsupported(lang) => {
                format!("language {lang} is not implemented on the server.")
            }
            OutcomeKind::WorkerInternal => {
                "something went wrong internally on the processing server.".to_string()
            }
            OutcomeKind::JobTimeout => {
                format!("process took longer than {}s.", crate::core::protocol::JOB_TIMEOUT_SECS)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_unsupported_message_names_the_language() {
        let msg = OutcomeKind::LanguageUnsupported("brainfuck".to_string()).into_message();
        assert!(msg.contains("brainfuck"));
    }

    #[test]
    fn success_passes_text_through_unchanged() {
        let msg = OutcomeKind::Success("Hello World!\n".to_string()).into_message();
        assert_eq!(msg, "Hello World!\n");
    }
}
