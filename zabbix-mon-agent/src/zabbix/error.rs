//! Error taxonomy shared by the control plane and the data plane
//!
//! Each failure is tagged with an [`ErrorKind`] where it is detected, so the
//! scheduler branches on the tag instead of inspecting error text.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network blip, timeout, malformed frame: retry as-is
    Transient,
    /// Server says the session is gone: refresh the session, then retry
    AuthExpired,
    /// Retrying cannot help
    Fatal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::Transient => "transient",
            ErrorKind::AuthExpired => "auth_expired",
            ErrorKind::Fatal => "fatal",
        })
    }
}

/// Server phrases meaning the auth token is no longer accepted
const SESSION_FAILURE_PHRASES: &[&str] = &[
    "session terminated",
    "re-login",
    "not authorised",
    "not authorized",
    "invalid auth token",
];

/// Tag a server-reported message: session failures become `AuthExpired`,
/// anything else stays `Transient`.
pub fn classify_server_message<'a>(parts: impl IntoIterator<Item = &'a str>) -> ErrorKind {
    let hit = parts.into_iter().any(|part| {
        let lower = part.to_ascii_lowercase();
        SESSION_FAILURE_PHRASES.iter().any(|phrase| lower.contains(phrase))
    });
    if hit {
        ErrorKind::AuthExpired
    } else {
        ErrorKind::Transient
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_phrases_are_auth_expired() {
        for msg in [
            "Session terminated, re-login, please.",
            "Not authorised.",
            "Not authorized",
            "Invalid auth token",
        ] {
            assert_eq!(classify_server_message([msg]), ErrorKind::AuthExpired, "{msg}");
        }
        assert_eq!(
            classify_server_message(["Invalid params.", "Session terminated, re-login, please."]),
            ErrorKind::AuthExpired
        );
    }

    #[test]
    fn test_other_messages_are_transient() {
        assert_eq!(
            classify_server_message(["Invalid params.", "Incorrect arguments passed to function."]),
            ErrorKind::Transient
        );
        assert_eq!(classify_server_message(std::iter::empty()), ErrorKind::Transient);
    }
}
