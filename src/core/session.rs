//! Session identifiers.
//!
//! A session is the durable identity of one browser: every tab opened with the
//! same cookie shares it, and it survives reconnects.

use std::fmt;
use std::sync::Arc;

use rand::Rng;

use crate::error::SessionError;

/// Longest identifier accepted from a client cookie.
const MAX_SESSION_LEN: usize = 128;

/// Opaque per-client identifier, issued from a cryptographically secure source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Arc<str>);

impl SessionId {
    /// Mint a fresh 128-bit identifier.
    pub fn generate() -> Self {
        let nonce: u128 = rand::rng().random();
        Self(format!("{nonce:032x}").into())
    }

    /// Validate an identifier presented by a client.
    pub fn parse(raw: &str) -> Result<Self, SessionError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(SessionError::Missing);
        }
        if raw.len() > MAX_SESSION_LEN || !raw.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(SessionError::Malformed);
        }
        Ok(Self(raw.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pull the value of cookie `name` out of a `Cookie` request header.
pub fn cookie_value<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header.split(';').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key.trim() == name).then(|| value.trim().trim_matches('"'))
    })
}

/// Resolve the session from a `Cookie` header, if one was sent.
pub fn session_from_cookies(header: Option<&str>, name: &str) -> Result<SessionId, SessionError> {
    let raw = header
        .and_then(|h| cookie_value(h, name))
        .ok_or(SessionError::Missing)?;
    SessionId::parse(raw)
}

/// `Set-Cookie` value handed back on the upgrade response for a minted session.
pub fn set_cookie_header(name: &str, session: &SessionId) -> String {
    format!("{name}={session}; Path=/; HttpOnly; SameSite=Lax")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_ids_are_distinct_hex() {
        let ids: HashSet<_> = (0..256).map(|_| SessionId::generate()).collect();
        assert_eq!(ids.len(), 256);
        for id in &ids {
            assert_eq!(id.as_str().len(), 32);
            assert!(id.as_str().bytes().all(|b| b.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn generated_ids_round_trip_through_parse() {
        let id = SessionId::generate();
        assert_eq!(SessionId::parse(id.as_str()), Ok(id));
    }

    #[test]
    fn parse_rejects_junk() {
        assert_eq!(SessionId::parse(""), Err(SessionError::Missing));
        assert_eq!(SessionId::parse("   "), Err(SessionError::Missing));
        assert_eq!(SessionId::parse("abc;def"), Err(SessionError::Malformed));
        assert_eq!(SessionId::parse(&"a".repeat(200)), Err(SessionError::Malformed));
    }

    #[test]
    fn cookie_lookup_finds_named_pair() {
        let header = "theme=dark; SESSION=abc123; other=1";
        assert_eq!(cookie_value(header, "SESSION"), Some("abc123"));
        assert_eq!(cookie_value(header, "missing"), None);
        assert_eq!(cookie_value("SESSION=\"quoted\"", "SESSION"), Some("quoted"));
    }

    #[test]
    fn session_from_cookies_reports_missing_and_malformed() {
        assert_eq!(session_from_cookies(None, "SESSION"), Err(SessionError::Missing));
        assert_eq!(
            session_from_cookies(Some("theme=dark"), "SESSION"),
            Err(SessionError::Missing)
        );
        assert_eq!(
            session_from_cookies(Some("SESSION=a-b"), "SESSION"),
            Err(SessionError::Malformed)
        );
        assert_eq!(
            session_from_cookies(Some("SESSION=ok42"), "SESSION").map(|s| s.to_string()),
            Ok("ok42".to_string())
        );
    }
}
