//! Hand-written memcached ASCII protocol parser
//!
//! Two-phase parsing:
//! 1. Parse command line (up to \r\n)
//! 2. For storage commands, read data block
//!
//! Framing failures (`HeaderTooLong`, `BadDataChunk`) are connection
//! fatal; everything else is answered on the open connection.

use crate::ProtocolError;
use crate::protocol::command::{Command, MAX_KEY_LENGTH, StorageVerb, is_valid_key};
use std::borrow::Cow;

/// Largest accepted data block (memcached's default item size limit).
/// Bounding the declared length up front keeps `data_start + bytes`
/// arithmetic safe and stops a client from growing the read buffer
/// arbitrarily with a huge header.
pub const MAX_DATA_LENGTH: usize = 1024 * 1024;

/// Case-insensitive command comparison (avoids allocation from to_ascii_lowercase)
#[inline]
fn cmd_eq(cmd: &[u8], expected: &[u8]) -> bool {
    cmd.len() == expected.len()
        && cmd
            .iter()
            .zip(expected.iter())
            .all(|(a, b)| a.to_ascii_lowercase() == *b)
}

/// Result of parsing
#[derive(Debug)]
pub enum ParseResult<'a> {
    /// Command fully parsed
    Complete(Command<'a>, usize),
    /// Need more data to complete parsing
    NeedMoreData,
    /// Parse error; check `ProtocolError::is_fatal` for framing failures
    Error(ProtocolError),
}

/// Parser state for storage commands whose data block has not arrived yet
#[derive(Debug, Clone)]
pub struct PendingStorageCommand {
    pub verb: StorageVerb,
    pub key: Vec<u8>,
    pub flags: u32,
    pub exptime: i64,
    pub cas_unique: u64,
    pub bytes: usize,
    pub noreply: bool,
    pub command_line_end: usize,
}

/// Header-line fields of a storage command, borrowed from the buffer
struct StorageHeader<'a> {
    verb: StorageVerb,
    key: &'a [u8],
    flags: u32,
    exptime: i64,
    cas_unique: u64,
    bytes: usize,
    noreply: bool,
}

/// Find \r\n in buffer
fn find_crlf(buf: &[u8]) -> Option<usize> {
    memchr::memchr_iter(b'\r', buf).find(|&i| buf.get(i + 1) == Some(&b'\n'))
}

/// Whether the buffer holds a run of non-space bytes longer than the
/// header bound, before any terminator has arrived
fn header_overrun(buf: &[u8]) -> bool {
    let mut run = 0usize;
    for &b in buf {
        if b == b' ' {
            run = 0;
        } else {
            run += 1;
            if run > MAX_KEY_LENGTH {
                return true;
            }
        }
    }
    false
}

/// Parse a memcached command from a buffer
pub fn parse(buf: &[u8]) -> ParseResult<'_> {
    // Find the end of the command line
    let line_end = match find_crlf(buf) {
        Some(pos) => pos,
        None => {
            // Bound unterminated headers; an overlong token can never
            // become a valid line, so give up on the connection
            if header_overrun(buf) {
                return ParseResult::Error(ProtocolError::HeaderTooLong);
            }
            return ParseResult::NeedMoreData;
        }
    };

    let line = &buf[..line_end];
    let tokens: Vec<&[u8]> = line.split(|&b| b == b' ').collect();

    let cmd_name = tokens[0];
    if cmd_name.is_empty() {
        return ParseResult::Error(ProtocolError::InvalidCommand("empty command".to_string()));
    }
    // Split on single spaces: a doubled space yields an empty token
    if tokens[1..].iter().any(|t| t.is_empty()) {
        return ParseResult::Error(ProtocolError::EmptyArgument);
    }

    let consumed = line_end + 2;

    if let Some(verb) = storage_verb(cmd_name) {
        parse_storage(verb, &tokens, buf, line_end)
    } else if cmd_eq(cmd_name, b"get") {
        parse_retrieval(&tokens, consumed, false)
    } else if cmd_eq(cmd_name, b"gets") {
        parse_retrieval(&tokens, consumed, true)
    } else if cmd_eq(cmd_name, b"delete") {
        parse_delete(&tokens, consumed)
    } else if cmd_eq(cmd_name, b"touch") {
        parse_touch(&tokens, consumed)
    } else if cmd_eq(cmd_name, b"incr") {
        parse_counter(&tokens, consumed, true)
    } else if cmd_eq(cmd_name, b"decr") {
        parse_counter(&tokens, consumed, false)
    } else if cmd_eq(cmd_name, b"flush_all") {
        parse_flush_all(&tokens, consumed)
    } else if cmd_eq(cmd_name, b"stats") {
        let args = tokens[1..].iter().map(|t| Cow::Borrowed(*t)).collect();
        ParseResult::Complete(Command::Stats { args }, consumed)
    } else if cmd_eq(cmd_name, b"lru_crawler") {
        let args = tokens[1..].iter().map(|t| Cow::Borrowed(*t)).collect();
        ParseResult::Complete(Command::LruCrawler { args }, consumed)
    } else if cmd_eq(cmd_name, b"version") {
        ParseResult::Complete(Command::Version, consumed)
    } else if cmd_eq(cmd_name, b"quit") {
        ParseResult::Complete(Command::Quit, consumed)
    } else {
        ParseResult::Error(ProtocolError::InvalidCommand(
            String::from_utf8_lossy(cmd_name).to_string(),
        ))
    }
}

fn storage_verb(cmd_name: &[u8]) -> Option<StorageVerb> {
    if cmd_eq(cmd_name, b"set") {
        Some(StorageVerb::Set)
    } else if cmd_eq(cmd_name, b"add") {
        Some(StorageVerb::Add)
    } else if cmd_eq(cmd_name, b"replace") {
        Some(StorageVerb::Replace)
    } else if cmd_eq(cmd_name, b"append") {
        Some(StorageVerb::Append)
    } else if cmd_eq(cmd_name, b"prepend") {
        Some(StorageVerb::Prepend)
    } else if cmd_eq(cmd_name, b"cas") {
        Some(StorageVerb::Cas)
    } else {
        None
    }
}

/// Validate a key token, preserving the distinction the replies make
fn check_key(key: &[u8]) -> Result<(), ProtocolError> {
    if is_valid_key(key) {
        return Ok(());
    }
    if key.len() > MAX_KEY_LENGTH {
        Err(ProtocolError::KeyTooLong)
    } else {
        Err(ProtocolError::InvalidKey(
            String::from_utf8_lossy(key).to_string(),
        ))
    }
}

/// Parse the header tokens of a storage command:
/// `<verb> <key> <flags> <exptime> <bytes> [cas_unique] [noreply]`
fn parse_storage_tokens<'a>(
    verb: StorageVerb,
    tokens: &[&'a [u8]],
) -> Result<StorageHeader<'a>, ProtocolError> {
    if tokens.len() < 5 {
        return Err(ProtocolError::InvalidCommand(format!(
            "{} requires key, flags, exptime and bytes",
            verb.as_str()
        )));
    }

    let key = tokens[1];
    check_key(key)?;

    let flags = parse_u32(tokens[2]).ok_or(ProtocolError::InvalidFlags)?;
    let exptime = parse_i64(tokens[3]).ok_or(ProtocolError::InvalidExptime)?;
    let bytes = parse_usize(tokens[4]).ok_or(ProtocolError::InvalidBytesLength)?;
    if bytes > MAX_DATA_LENGTH {
        return Err(ProtocolError::DataTooLarge);
    }

    let (cas_unique, noreply_at) = if verb == StorageVerb::Cas {
        let token = tokens
            .get(5)
            .ok_or_else(|| ProtocolError::InvalidCommand("cas requires cas_unique".to_string()))?;
        (parse_u64(token).ok_or(ProtocolError::InvalidCasUnique)?, 6)
    } else {
        (0, 5)
    };

    // noreply is recognized only at its exact expected position
    let noreply = match tokens.get(noreply_at) {
        None => false,
        Some(&t) if t == b"noreply" => true,
        Some(_) => return Err(ProtocolError::UnexpectedArgument),
    };
    if tokens.len() > noreply_at + 1 {
        return Err(ProtocolError::UnexpectedArgument);
    }

    Ok(StorageHeader {
        verb,
        key,
        flags,
        exptime,
        cas_unique,
        bytes,
        noreply,
    })
}

/// Parse a storage command whose data block may already be buffered
fn parse_storage<'a>(
    verb: StorageVerb,
    tokens: &[&'a [u8]],
    buf: &'a [u8],
    line_end: usize,
) -> ParseResult<'a> {
    let header = match parse_storage_tokens(verb, tokens) {
        Ok(h) => h,
        Err(e) => return ParseResult::Error(e),
    };

    let data_start = line_end + 2;

    // A declared-zero payload completes with the header itself
    if header.bytes == 0 {
        return ParseResult::Complete(storage_command(&header, Cow::Borrowed(b"")), data_start);
    }

    let (data_end, total_needed) = match data_block_bounds(data_start, header.bytes) {
        Some(bounds) => bounds,
        None => return ParseResult::Error(ProtocolError::DataTooLarge),
    };

    if buf.len() < total_needed {
        return ParseResult::NeedMoreData;
    }

    // The declared length was satisfied; anything but CRLF here means
    // client and server disagree about framing
    if buf[data_end] != b'\r' || buf[data_end + 1] != b'\n' {
        return ParseResult::Error(ProtocolError::BadDataChunk);
    }

    let data = Cow::Borrowed(&buf[data_start..data_end]);
    ParseResult::Complete(storage_command(&header, data), total_needed)
}

fn storage_command<'a>(header: &StorageHeader<'a>, data: Cow<'a, [u8]>) -> Command<'a> {
    Command::Storage {
        verb: header.verb,
        key: Cow::Borrowed(header.key),
        flags: header.flags,
        exptime: header.exptime,
        cas_unique: header.cas_unique,
        data,
        noreply: header.noreply,
    }
}

/// `(data_end, total_needed)` for a data block, refusing lengths past
/// the item size limit before any arithmetic can wrap
fn data_block_bounds(data_start: usize, bytes: usize) -> Option<(usize, usize)> {
    if bytes > MAX_DATA_LENGTH {
        return None;
    }
    let data_end = data_start.checked_add(bytes)?;
    Some((data_end, data_end.checked_add(2)?))
}

/// Continue parsing a storage command after its data block arrives
pub fn parse_storage_data<'a>(buf: &'a [u8], pending: &PendingStorageCommand) -> ParseResult<'a> {
    let data_start = pending.command_line_end + 2;
    let (data_end, total_needed) = match data_block_bounds(data_start, pending.bytes) {
        Some(bounds) => bounds,
        None => return ParseResult::Error(ProtocolError::DataTooLarge),
    };

    if buf.len() < total_needed {
        return ParseResult::NeedMoreData;
    }

    if buf[data_end] != b'\r' || buf[data_end + 1] != b'\n' {
        return ParseResult::Error(ProtocolError::BadDataChunk);
    }

    let cmd = Command::Storage {
        verb: pending.verb,
        key: Cow::Owned(pending.key.clone()),
        flags: pending.flags,
        exptime: pending.exptime,
        cas_unique: pending.cas_unique,
        data: Cow::Borrowed(&buf[data_start..data_end]),
        noreply: pending.noreply,
    };

    ParseResult::Complete(cmd, total_needed)
}

/// Parse a pending storage command line (for partial reads).
///
/// `Ok(None)` means the line is incomplete or not a storage command.
pub fn parse_storage_command_line(
    buf: &[u8],
) -> Result<Option<PendingStorageCommand>, ProtocolError> {
    let line_end = match find_crlf(buf) {
        Some(pos) => pos,
        None => return Ok(None),
    };

    let line = &buf[..line_end];
    let tokens: Vec<&[u8]> = line.split(|&b| b == b' ').collect();

    let verb = match storage_verb(tokens[0]) {
        Some(verb) => verb,
        None => return Ok(None),
    };
    if tokens[1..].iter().any(|t| t.is_empty()) {
        return Err(ProtocolError::EmptyArgument);
    }

    let header = parse_storage_tokens(verb, &tokens)?;

    Ok(Some(PendingStorageCommand {
        verb: header.verb,
        key: header.key.to_vec(),
        flags: header.flags,
        exptime: header.exptime,
        cas_unique: header.cas_unique,
        bytes: header.bytes,
        noreply: header.noreply,
        command_line_end: line_end,
    }))
}

/// Parse a retrieval command: `get|gets <key>+`
fn parse_retrieval<'a>(tokens: &[&'a [u8]], consumed: usize, with_cas: bool) -> ParseResult<'a> {
    if tokens.len() < 2 {
        return ParseResult::Error(ProtocolError::InvalidCommand(
            "retrieval requires at least one key".to_string(),
        ));
    }

    let mut keys = Vec::with_capacity(tokens.len() - 1);
    for key in &tokens[1..] {
        if let Err(e) = check_key(key) {
            return ParseResult::Error(e);
        }
        keys.push(Cow::Borrowed(*key));
    }

    let cmd = if with_cas {
        Command::Gets { keys }
    } else {
        Command::Get { keys }
    };
    ParseResult::Complete(cmd, consumed)
}

/// Parse `delete <key> [noreply]`
fn parse_delete<'a>(tokens: &[&'a [u8]], consumed: usize) -> ParseResult<'a> {
    if tokens.len() < 2 {
        return ParseResult::Error(ProtocolError::InvalidCommand(
            "delete requires a key".to_string(),
        ));
    }
    if let Err(e) = check_key(tokens[1]) {
        return ParseResult::Error(e);
    }
    let noreply = match tail_noreply(&tokens[2..]) {
        Ok(noreply) => noreply,
        Err(e) => return ParseResult::Error(e),
    };

    ParseResult::Complete(
        Command::Delete {
            key: Cow::Borrowed(tokens[1]),
            noreply,
        },
        consumed,
    )
}

/// Parse `touch <key> <exptime> [noreply]`
fn parse_touch<'a>(tokens: &[&'a [u8]], consumed: usize) -> ParseResult<'a> {
    if tokens.len() < 3 {
        return ParseResult::Error(ProtocolError::InvalidCommand(
            "touch requires a key and exptime".to_string(),
        ));
    }
    if let Err(e) = check_key(tokens[1]) {
        return ParseResult::Error(e);
    }
    let exptime = match parse_i64(tokens[2]) {
        Some(exptime) => exptime,
        None => return ParseResult::Error(ProtocolError::InvalidExptime),
    };
    let noreply = match tail_noreply(&tokens[3..]) {
        Ok(noreply) => noreply,
        Err(e) => return ParseResult::Error(e),
    };

    ParseResult::Complete(
        Command::Touch {
            key: Cow::Borrowed(tokens[1]),
            exptime,
            noreply,
        },
        consumed,
    )
}

/// Parse `incr|decr <key> <delta> [noreply]`; the delta token is kept
/// raw and validated during execution
fn parse_counter<'a>(tokens: &[&'a [u8]], consumed: usize, incr: bool) -> ParseResult<'a> {
    if tokens.len() < 3 {
        return ParseResult::Error(ProtocolError::InvalidCommand(
            "incr/decr require a key and delta".to_string(),
        ));
    }
    if let Err(e) = check_key(tokens[1]) {
        return ParseResult::Error(e);
    }
    let noreply = match tail_noreply(&tokens[3..]) {
        Ok(noreply) => noreply,
        Err(e) => return ParseResult::Error(e),
    };

    let key = Cow::Borrowed(tokens[1]);
    let delta = Cow::Borrowed(tokens[2]);
    let cmd = if incr {
        Command::Incr { key, delta, noreply }
    } else {
        Command::Decr { key, delta, noreply }
    };
    ParseResult::Complete(cmd, consumed)
}

/// Parse `flush_all [exptime] [noreply]`
fn parse_flush_all<'a>(tokens: &[&'a [u8]], consumed: usize) -> ParseResult<'a> {
    let mut exptime = 0;
    let mut rest = &tokens[1..];

    if let Some(&first) = rest.first()
        && first != b"noreply"
    {
        exptime = match parse_i64(first) {
            Some(exptime) => exptime,
            None => return ParseResult::Error(ProtocolError::InvalidExptime),
        };
        rest = &rest[1..];
    }
    let noreply = match tail_noreply(rest) {
        Ok(noreply) => noreply,
        Err(e) => return ParseResult::Error(e),
    };

    ParseResult::Complete(Command::FlushAll { exptime, noreply }, consumed)
}

/// Accept an optional trailing `noreply`, rejecting anything else
fn tail_noreply(rest: &[&[u8]]) -> Result<bool, ProtocolError> {
    match rest {
        [] => Ok(false),
        [t] if *t == b"noreply" => Ok(true),
        _ => Err(ProtocolError::UnexpectedArgument),
    }
}

/// Parse bytes as u32
fn parse_u32(bytes: &[u8]) -> Option<u32> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

/// Parse bytes as u64
fn parse_u64(bytes: &[u8]) -> Option<u64> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

/// Parse bytes as i64
fn parse_i64(bytes: &[u8]) -> Option<i64> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

/// Parse bytes as usize
fn parse_usize(bytes: &[u8]) -> Option<usize> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete(buf: &[u8]) -> (Command<'_>, usize) {
        match parse(buf) {
            ParseResult::Complete(cmd, consumed) => (cmd, consumed),
            other => panic!("unexpected: {other:?}"),
        }
    }

    fn error(buf: &[u8]) -> ProtocolError {
        match parse(buf) {
            ParseResult::Error(e) => e,
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_get() {
        let buf = b"get foo bar baz\r\n";
        let (cmd, consumed) = complete(buf);
        match cmd {
            Command::Get { keys } => {
                assert_eq!(keys.len(), 3);
                assert_eq!(keys[0].as_ref(), b"foo");
                assert_eq!(keys[1].as_ref(), b"bar");
                assert_eq!(keys[2].as_ref(), b"baz");
                assert_eq!(consumed, buf.len());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_gets() {
        let buf = b"gets foo\r\n";
        match complete(buf).0 {
            Command::Gets { keys } => assert_eq!(keys[0].as_ref(), b"foo"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_set() {
        let buf = b"set mykey 42 3600 5\r\nhello\r\n";
        let (cmd, consumed) = complete(buf);
        match cmd {
            Command::Storage {
                verb,
                key,
                flags,
                exptime,
                cas_unique,
                data,
                noreply,
            } => {
                assert_eq!(verb, StorageVerb::Set);
                assert_eq!(key.as_ref(), b"mykey");
                assert_eq!(flags, 42);
                assert_eq!(exptime, 3600);
                assert_eq!(cas_unique, 0);
                assert_eq!(data.as_ref(), b"hello");
                assert!(!noreply);
                assert_eq!(consumed, buf.len());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_set_noreply() {
        let buf = b"set mykey 0 0 3 noreply\r\nfoo\r\n";
        match complete(buf).0 {
            Command::Storage { noreply, .. } => assert!(noreply),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_storage_family() {
        for (line, verb) in [
            (&b"add k 0 0 1\r\nx\r\n"[..], StorageVerb::Add),
            (b"replace k 0 0 1\r\nx\r\n", StorageVerb::Replace),
            (b"append k 0 0 1\r\nx\r\n", StorageVerb::Append),
            (b"prepend k 0 0 1\r\nx\r\n", StorageVerb::Prepend),
        ] {
            match complete(line).0 {
                Command::Storage { verb: parsed, .. } => assert_eq!(parsed, verb),
                other => panic!("unexpected: {other:?}"),
            }
        }
    }

    #[test]
    fn test_parse_cas() {
        let buf = b"cas mykey 1 0 5 99 noreply\r\nhello\r\n";
        match complete(buf).0 {
            Command::Storage {
                verb,
                cas_unique,
                noreply,
                ..
            } => {
                assert_eq!(verb, StorageVerb::Cas);
                assert_eq!(cas_unique, 99);
                assert!(noreply);
            }
            other => panic!("unexpected: {other:?}"),
        }

        // cas without the token is an arity error
        assert!(matches!(
            error(b"cas mykey 1 0 5\r\nhello\r\n"),
            ProtocolError::InvalidCommand(_)
        ));
    }

    #[test]
    fn test_parse_zero_length_payload() {
        // A declared-zero payload completes on the header alone
        let buf = b"set empty 0 0 0\r\n";
        let (cmd, consumed) = complete(buf);
        match cmd {
            Command::Storage { data, .. } => assert!(data.is_empty()),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn test_parse_delete() {
        let buf = b"delete mykey\r\n";
        match complete(buf).0 {
            Command::Delete { key, noreply } => {
                assert_eq!(key.as_ref(), b"mykey");
                assert!(!noreply);
            }
            other => panic!("unexpected: {other:?}"),
        }

        let buf = b"delete mykey noreply\r\n";
        match complete(buf).0 {
            Command::Delete { noreply, .. } => assert!(noreply),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_touch() {
        let buf = b"touch mykey 300\r\n";
        match complete(buf).0 {
            Command::Touch { key, exptime, noreply } => {
                assert_eq!(key.as_ref(), b"mykey");
                assert_eq!(exptime, 300);
                assert!(!noreply);
            }
            other => panic!("unexpected: {other:?}"),
        }

        assert!(matches!(
            error(b"touch mykey\r\n"),
            ProtocolError::InvalidCommand(_)
        ));
        assert_eq!(error(b"touch mykey abc\r\n"), ProtocolError::InvalidExptime);
    }

    #[test]
    fn test_parse_incr_decr() {
        let buf = b"incr counter 5\r\n";
        match complete(buf).0 {
            Command::Incr { key, delta, noreply } => {
                assert_eq!(key.as_ref(), b"counter");
                assert_eq!(delta.as_ref(), b"5");
                assert!(!noreply);
            }
            other => panic!("unexpected: {other:?}"),
        }

        let buf = b"decr counter 3 noreply\r\n";
        match complete(buf).0 {
            Command::Decr { delta, noreply, .. } => {
                assert_eq!(delta.as_ref(), b"3");
                assert!(noreply);
            }
            other => panic!("unexpected: {other:?}"),
        }

        // Malformed delta still parses; the handler rejects it so it can
        // answer NOT_FOUND for an absent key first
        let buf = b"incr counter abc\r\n";
        assert!(matches!(complete(buf).0, Command::Incr { .. }));
    }

    #[test]
    fn test_parse_flush_all() {
        match complete(b"flush_all\r\n").0 {
            Command::FlushAll { exptime, noreply } => {
                assert_eq!(exptime, 0);
                assert!(!noreply);
            }
            other => panic!("unexpected: {other:?}"),
        }

        match complete(b"flush_all 100 noreply\r\n").0 {
            Command::FlushAll { exptime, noreply } => {
                assert_eq!(exptime, 100);
                assert!(noreply);
            }
            other => panic!("unexpected: {other:?}"),
        }

        assert_eq!(error(b"flush_all abc\r\n"), ProtocolError::InvalidExptime);
    }

    #[test]
    fn test_parse_stats_and_lru_crawler() {
        match complete(b"stats settings\r\n").0 {
            Command::Stats { args } => assert_eq!(args[0].as_ref(), b"settings"),
            other => panic!("unexpected: {other:?}"),
        }

        match complete(b"lru_crawler tocrawl 100\r\n").0 {
            Command::LruCrawler { args } => {
                assert_eq!(args.len(), 2);
                assert_eq!(args[0].as_ref(), b"tocrawl");
                assert_eq!(args[1].as_ref(), b"100");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_quit_and_version() {
        assert!(matches!(complete(b"quit\r\n").0, Command::Quit));
        let (cmd, consumed) = complete(b"version\r\n");
        assert!(matches!(cmd, Command::Version));
        assert_eq!(consumed, b"version\r\n".len());
        // Case insensitive
        assert!(matches!(complete(b"VERSION\r\n").0, Command::Version));
    }

    #[test]
    fn test_parse_need_more_data() {
        assert!(matches!(parse(b"get foo"), ParseResult::NeedMoreData));
        assert!(matches!(
            parse(b"set mykey 0 0 5\r\nhel"),
            ParseResult::NeedMoreData
        ));
    }

    #[test]
    fn test_parse_invalid_command() {
        assert!(matches!(
            error(b"invalid\r\n"),
            ProtocolError::InvalidCommand(_)
        ));
    }

    #[test]
    fn test_parse_empty_token() {
        // Double space produces an empty token
        assert_eq!(error(b"get  foo\r\n"), ProtocolError::EmptyArgument);
        assert_eq!(error(b"delete foo \r\n"), ProtocolError::EmptyArgument);
    }

    #[test]
    fn test_parse_noreply_position() {
        // Something other than noreply at the noreply position
        assert_eq!(
            error(b"set k 0 0 3 what\r\nfoo\r\n"),
            ProtocolError::UnexpectedArgument
        );
        assert_eq!(
            error(b"delete k soon noreply extra\r\n"),
            ProtocolError::UnexpectedArgument
        );
    }

    #[test]
    fn test_parse_key_too_long() {
        let long_key = vec![b'a'; 251];
        let mut buf = b"get ".to_vec();
        buf.extend_from_slice(&long_key);
        buf.extend_from_slice(b"\r\n");
        assert_eq!(error(&buf), ProtocolError::KeyTooLong);
        assert!(!error(&buf).is_fatal());
    }

    #[test]
    fn test_header_overrun_is_fatal() {
        // No terminator in sight and a run longer than the header bound
        let buf = vec![b'a'; 300];
        let e = error(&buf);
        assert_eq!(e, ProtocolError::HeaderTooLong);
        assert!(e.is_fatal());

        // Spaces reset the run; still waiting for the terminator
        let buf = vec![b' '; 300];
        assert!(matches!(parse(&buf), ParseResult::NeedMoreData));
    }

    #[test]
    fn test_declared_length_over_limit_is_fatal() {
        // usize::MAX would wrap the data-block offset arithmetic
        let buf = b"set k 0 0 18446744073709551615\r\nxxx\r\n";
        let e = error(buf);
        assert_eq!(e, ProtocolError::DataTooLarge);
        assert!(e.is_fatal());

        // Just past the limit, fatal before any data arrives
        let buf = format!("set k 0 0 {}\r\n", MAX_DATA_LENGTH + 1);
        assert_eq!(error(buf.as_bytes()), ProtocolError::DataTooLarge);

        // At the limit the header is fine and the block is awaited
        let buf = format!("set k 0 0 {MAX_DATA_LENGTH}\r\n");
        assert!(matches!(parse(buf.as_bytes()), ParseResult::NeedMoreData));
        assert!(
            parse_storage_command_line(buf.as_bytes())
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn test_pending_with_oversized_bytes_is_rejected() {
        let pending = PendingStorageCommand {
            verb: StorageVerb::Set,
            key: b"k".to_vec(),
            flags: 0,
            exptime: 0,
            cas_unique: 0,
            bytes: usize::MAX,
            noreply: false,
            command_line_end: 0,
        };
        match parse_storage_data(b"\r\n", &pending) {
            ParseResult::Error(e) => assert_eq!(e, ProtocolError::DataTooLarge),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_bad_data_terminator_is_fatal() {
        let buf = b"set mykey 0 0 3\r\nfooXX";
        let e = error(buf);
        assert_eq!(e, ProtocolError::BadDataChunk);
        assert!(e.is_fatal());
    }

    #[test]
    fn test_pending_storage_flow() {
        // Header arrives first
        let buf = b"cas mykey 7 0 5 31\r\n";
        assert!(matches!(parse(buf), ParseResult::NeedMoreData));
        let pending = parse_storage_command_line(buf).unwrap().unwrap();
        assert_eq!(pending.verb, StorageVerb::Cas);
        assert_eq!(pending.key, b"mykey");
        assert_eq!(pending.flags, 7);
        assert_eq!(pending.cas_unique, 31);
        assert_eq!(pending.bytes, 5);

        // Then the data block
        let buf = b"cas mykey 7 0 5 31\r\nhello\r\n";
        match parse_storage_data(buf, &pending) {
            ParseResult::Complete(
                Command::Storage {
                    verb, data, cas_unique, ..
                },
                consumed,
            ) => {
                assert_eq!(verb, StorageVerb::Cas);
                assert_eq!(data.as_ref(), b"hello");
                assert_eq!(cas_unique, 31);
                assert_eq!(consumed, buf.len());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_pending_ignores_non_storage() {
        assert!(parse_storage_command_line(b"get foo\r\n").unwrap().is_none());
        assert!(parse_storage_command_line(b"set foo 0 0 5").unwrap().is_none());
    }

    #[test]
    fn test_case_insensitive_commands() {
        assert!(matches!(complete(b"GET foo\r\n").0, Command::Get { .. }));
        assert!(matches!(
            complete(b"SET mykey 0 0 3\r\nbar\r\n").0,
            Command::Storage { .. }
        ));
    }
}
