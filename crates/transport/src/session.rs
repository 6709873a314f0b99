/// Opaque token identifying one attempt to play.
///
/// A new token is minted for every transport-initiating operation. Anything
/// that completes asynchronously carries the token it was started under and is
/// ignored when that token is no longer current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionToken(u64);

impl SessionToken {
    /// Token that never matches a minted session.
    pub const NONE: SessionToken = SessionToken(0);

    /// Raw value, for lock-free publication through an atomic.
    pub fn to_raw(self) -> u64 {
        self.0
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// Mints tokens. Tokens are never reused for the lifetime of the source.
#[derive(Debug)]
pub struct SessionSource {
    next: u64,
}

impl SessionSource {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn mint(&mut self) -> SessionToken {
        let token = SessionToken(self.next);
        self.next += 1;
        token
    }
}

impl Default for SessionSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minted_tokens_are_unique() {
        let mut source = SessionSource::new();
        let first = source.mint();
        let second = source.mint();
        assert_ne!(first, second);
        assert_ne!(first, SessionToken::NONE);
        assert!(second > first);
    }

    #[test]
    fn test_raw_round_trip() {
        let mut source = SessionSource::new();
        let token = source.mint();
        assert_eq!(SessionToken::from_raw(token.to_raw()), token);
    }
}
