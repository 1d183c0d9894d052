//! Memcached ASCII protocol command types

use std::borrow::Cow;

/// Maximum key length (memcached spec)
pub const MAX_KEY_LENGTH: usize = 250;

/// Storage-family verbs; they share the
/// `<verb> <key> <flags> <exptime> <bytes> [cas] [noreply]` shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageVerb {
    Set,
    Add,
    Replace,
    Append,
    Prepend,
    Cas,
}

impl StorageVerb {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::Add => "add",
            Self::Replace => "replace",
            Self::Append => "append",
            Self::Prepend => "prepend",
            Self::Cas => "cas",
        }
    }
}

/// Parsed memcached command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    /// set/add/replace/append/prepend/cas with payload
    Storage {
        verb: StorageVerb,
        key: Cow<'a, [u8]>,
        flags: u32,
        exptime: i64,
        /// Only meaningful for `cas`
        cas_unique: u64,
        data: Cow<'a, [u8]>,
        noreply: bool,
    },

    /// get <key>+
    Get { keys: Vec<Cow<'a, [u8]>> },

    /// gets <key>+ (CAS-aware retrieval)
    Gets { keys: Vec<Cow<'a, [u8]>> },

    /// delete <key> [noreply]
    Delete { key: Cow<'a, [u8]>, noreply: bool },

    /// touch <key> <exptime> [noreply]
    Touch {
        key: Cow<'a, [u8]>,
        exptime: i64,
        noreply: bool,
    },

    /// incr <key> <delta> [noreply]; delta stays raw so the handler can
    /// answer NOT_FOUND before rejecting a malformed delta
    Incr {
        key: Cow<'a, [u8]>,
        delta: Cow<'a, [u8]>,
        noreply: bool,
    },

    /// decr <key> <delta> [noreply]
    Decr {
        key: Cow<'a, [u8]>,
        delta: Cow<'a, [u8]>,
        noreply: bool,
    },

    /// flush_all [exptime] [noreply]
    FlushAll { exptime: i64, noreply: bool },

    /// stats [args...]
    Stats { args: Vec<Cow<'a, [u8]>> },

    /// lru_crawler <enable|disable|tocrawl N|sleep N>
    LruCrawler { args: Vec<Cow<'a, [u8]>> },

    /// version
    Version,

    /// quit
    Quit,
}

impl<'a> Command<'a> {
    /// Returns true if this command should not send a response
    pub fn is_noreply(&self) -> bool {
        match self {
            Command::Storage { noreply, .. }
            | Command::Delete { noreply, .. }
            | Command::Touch { noreply, .. }
            | Command::Incr { noreply, .. }
            | Command::Decr { noreply, .. }
            | Command::FlushAll { noreply, .. } => *noreply,
            _ => false,
        }
    }

    /// Verb name for metrics accounting
    pub fn verb(&self) -> &'static str {
        match self {
            Command::Storage { verb, .. } => verb.as_str(),
            Command::Get { .. } => "get",
            Command::Gets { .. } => "gets",
            Command::Delete { .. } => "delete",
            Command::Touch { .. } => "touch",
            Command::Incr { .. } => "incr",
            Command::Decr { .. } => "decr",
            Command::FlushAll { .. } => "flush_all",
            Command::Stats { .. } => "stats",
            Command::LruCrawler { .. } => "lru_crawler",
            Command::Version => "version",
            Command::Quit => "quit",
        }
    }
}

/// Check if a key is valid
pub fn is_valid_key(key: &[u8]) -> bool {
    if key.is_empty() || key.len() > MAX_KEY_LENGTH {
        return false;
    }
    // Keys cannot contain control characters or whitespace
    key.iter().all(|&b| b > 32 && b < 127)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_key() {
        assert!(is_valid_key(b"valid_key"));
        assert!(is_valid_key(b"key-with-dashes"));
        assert!(is_valid_key(b"key:with:colons"));
        assert!(!is_valid_key(b""));
        assert!(!is_valid_key(b"key with space"));
        assert!(!is_valid_key(b"key\twith\ttab"));
        assert!(!is_valid_key(&[b'a'; 251])); // Too long
    }

    #[test]
    fn test_is_noreply() {
        let cmd = Command::Storage {
            verb: StorageVerb::Set,
            key: Cow::Borrowed(b"key"),
            flags: 0,
            exptime: 0,
            cas_unique: 0,
            data: Cow::Borrowed(b"data"),
            noreply: true,
        };
        assert!(cmd.is_noreply());

        let cmd = Command::Get {
            keys: vec![Cow::Borrowed(b"key" as &[u8])],
        };
        assert!(!cmd.is_noreply());
    }

    #[test]
    fn test_verb_names() {
        assert_eq!(Command::Version.verb(), "version");
        assert_eq!(
            Command::Gets {
                keys: vec![Cow::Borrowed(b"k" as &[u8])]
            }
            .verb(),
            "gets"
        );
        assert_eq!(StorageVerb::Prepend.as_str(), "prepend");
    }
}
