//! Wire protocol constants shared by the broker and the worker.
//!
//! Every value here is compile-time fixed. Broker and worker exchange a
//! serialization of this whole table during the AUTHENTICATE step
//! (`canonical_handshake_string`); any mismatch — a renamed status code, a
//! changed timeout — fails the handshake instead of silently desyncing.

/// One-byte status/instruction code. Any byte read off the wire that does
/// not map to one of these is a protocol error, not a new enum variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StatusCode {
    Success = 0,
    Awaiting = 1,
    Close = 2,

    InternalError = 10,
    LangNotImplemented = 11,
    NotImplemented = 12,
    ProcessTimeout = 13,

    File = 20,
    Authenticate = 21,
    Text = 22,
}

impl StatusCode {
    pub const ALL: [StatusCode; 10] = [
        StatusCode::Success,
        StatusCode::Awaiting,
        StatusCode::Close,
        StatusCode::InternalError,
        StatusCode::LangNotImplemented,
        StatusCode::NotImplemented,
        StatusCode::ProcessTimeout,
        StatusCode::File,
        StatusCode::Authenticate,
        StatusCode::Text,
    ];

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for StatusCode {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, u8> {
        for code in StatusCode::ALL {
            if code.as_u8() == byte {
                return Ok(code);
            }
        }
        Err(byte)
    }
}

/// Buffer size of a status frame, in bytes.
pub const BUFFER_SIZE: u8 = 1;
/// Largest chunk a blob payload is transmitted in.
pub const MAX_CHUNK: usize = 128;
/// Per-job wall-clock deadline enforced by the worker's Language Runner.
pub const JOB_TIMEOUT_SECS: u64 = 30;

/// The canonical, sorted `k=v:k=v:...` serialization of every protocol
/// constant, compared byte-for-byte during AUTHENTICATE.
///
/// Reimplements the source's introspective "enumerate my own class
/// attributes" handshake as an explicit, ordered list — trivially stable
/// and testable, and it can't drift silently if a constant is renamed.
pub fn canonical_handshake_string() -> String {
    let mut pairs: Vec<(&'static str, u64)> = vec![
        ("buffer_size", BUFFER_SIZE as u64),
        ("max_chunk", MAX_CHUNK as u64),
        ("job_timeout_secs", JOB_TIMEOUT_SECS),
        ("success", StatusCode::Success.as_u8() as u64),
        ("awaiting", StatusCode::Awaiting.as_u8() as u64),
        ("close", StatusCode::Close.as_u8() as u64),
        ("internal_error", StatusCode::InternalError.as_u8() as u64),
        (
            "lang_not_implemented",
            StatusCode::LangNotImplemented.as_u8() as u64,
        ),
        ("not_implemented", StatusCode::NotImplemented.as_u8() as u64),
        ("process_timeout", StatusCode::ProcessTimeout.as_u8() as u64),
        ("file", StatusCode::File.as_u8() as u64),
        ("authenticate", StatusCode::Authenticate.as_u8() as u64),
        ("text", StatusCode::Text.as_u8() as u64),
    ];
    pairs.sort_by_key(|(k, _)| *k);
    pairs
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_round_trips() {
        for code in StatusCode::ALL {
            assert_eq!(StatusCode::try_from(code.as_u8()), Ok(code));
        }
    }

    #[test]
    fn unknown_byte_is_rejected() {
        assert!(StatusCode::try_from(99).is_err());
    }

    #[test]
    fn handshake_string_is_deterministic_and_sorted() {
        let a = canonical_handshake_string();
        let b = canonical_handshake_string();
        assert_eq!(a, b);

        let keys: Vec<&str> = a.split(':').map(|kv| kv.split('=').next().unwrap()).collect();
        let mut sorted_keys = keys.clone();
        sorted_keys.sort_unstable();
        assert_eq!(keys, sorted_keys);
    }

    #[test]
    fn handshake_string_changes_with_constants() {
        // Sanity check that the string actually encodes the timeout value,
        // so a future constant change is guaranteed to change the string.
        assert!(canonical_handshake_string().contains(&format!("job_timeout_secs={JOB_TIMEOUT_SECS}")));
    }
}
