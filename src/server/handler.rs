//! Command handlers for memcached protocol commands
//!
//! One parsed command in, one CRLF-terminated reply out. Logical misses
//! (absent key, stale CAS token) are normal replies; only capacity
//! failures surface as SERVER_ERROR.

use super::Server;
use crate::cache::expire_at_from;
use crate::protocol::{Command, ResponseWriter, StorageVerb};
use std::borrow::Cow;

/// Version string for the memcached VERSION command
const VERSION: &str = concat!("lethecache ", env!("CARGO_PKG_VERSION"));

const OUT_OF_MEMORY: &str = "out of memory storing object";

/// Execute a parsed command
pub fn execute(server: &Server, cmd: Command<'_>, response: &mut ResponseWriter) {
    server.metrics.record_command(cmd.verb());

    match cmd {
        Command::Storage {
            verb,
            key,
            flags,
            exptime,
            cas_unique,
            data,
            ..
        } => {
            handle_storage(server, verb, &key, flags, exptime, cas_unique, &data, response);
        }
        Command::Get { keys } => handle_get(server, &keys, response, false),
        Command::Gets { keys } => handle_get(server, &keys, response, true),
        Command::Delete { key, .. } => handle_delete(server, &key, response),
        Command::Touch { key, exptime, .. } => handle_touch(server, &key, exptime, response),
        Command::Incr { key, delta, .. } => handle_counter(server, &key, &delta, true, response),
        Command::Decr { key, delta, .. } => handle_counter(server, &key, &delta, false, response),
        Command::FlushAll { .. } => {
            server.cache.lock().flush_all();
            response.ok();
        }
        Command::Stats { .. } => handle_stats(server, response),
        Command::LruCrawler { args } => handle_lru_crawler(server, &args, response),
        Command::Version => response.version(VERSION),
        Command::Quit => {
            // Handled in connection loop
        }
    }
}

/// Handle the storage family: set/add/replace/append/prepend/cas
#[allow(clippy::too_many_arguments)]
fn handle_storage(
    server: &Server,
    verb: StorageVerb,
    key: &[u8],
    flags: u32,
    exptime: i64,
    cas_unique: u64,
    data: &[u8],
    response: &mut ResponseWriter,
) {
    let expire_at = expire_at_from(exptime, server.clock.now());
    let mut cache = server.cache.lock();

    match verb {
        StorageVerb::Set => {
            if cache.set(key, data.to_vec(), flags, expire_at, 0) {
                response.stored();
            } else {
                response.server_error(OUT_OF_MEMORY);
            }
        }
        StorageVerb::Add => {
            // Presence goes through get so an expired entry counts as
            // absent, consistent with passive expiration
            if cache.get(key).is_some() {
                response.not_stored();
            } else if cache.set(key, data.to_vec(), flags, expire_at, 0) {
                response.stored();
            } else {
                response.server_error(OUT_OF_MEMORY);
            }
        }
        StorageVerb::Replace => {
            if cache.get(key).is_none() {
                response.not_stored();
            } else if cache.set(key, data.to_vec(), flags, expire_at, 0) {
                response.stored();
            } else {
                response.server_error(OUT_OF_MEMORY);
            }
        }
        StorageVerb::Append | StorageVerb::Prepend => {
            let existing = match cache.get(key) {
                Some(item) => {
                    (item.data.clone(), item.flags, item.expire_at, item.cas_unique)
                }
                None => {
                    response.not_stored();
                    return;
                }
            };
            let (old, old_flags, old_expire, old_cas) = existing;
            let mut combined = Vec::with_capacity(old.len() + data.len());
            if verb == StorageVerb::Append {
                combined.extend_from_slice(&old);
                combined.extend_from_slice(data);
            } else {
                combined.extend_from_slice(data);
                combined.extend_from_slice(&old);
            }
            // Concatenation keeps the existing flags, exptime and token
            if cache.set(key, combined, old_flags, old_expire, old_cas) {
                response.stored();
            } else {
                response.server_error(OUT_OF_MEMORY);
            }
        }
        StorageVerb::Cas => {
            let stored_token = match cache.get(key) {
                Some(item) => item.cas_unique,
                None => {
                    server.metrics.record_miss("cas");
                    response.not_found();
                    return;
                }
            };
            // A zero stored token means nobody holds a valid handle
            if stored_token == 0 || stored_token != cas_unique {
                server.metrics.record_cas_badval();
                server.metrics.record_miss("cas");
                response.not_found();
                return;
            }
            if cache.set(key, data.to_vec(), flags, expire_at, cas_unique) {
                server.metrics.record_hit("cas");
                response.stored();
            } else {
                response.server_error(OUT_OF_MEMORY);
            }
        }
    }
}

/// Handle GET/GETS; gets mints and stamps a fresh CAS token per value
fn handle_get(
    server: &Server,
    keys: &[Cow<'_, [u8]>],
    response: &mut ResponseWriter,
    with_cas: bool,
) {
    let verb = if with_cas { "gets" } else { "get" };
    let mut cache = server.cache.lock();

    for key in keys {
        if with_cas {
            let found = cache.get(key).map(|item| (item.flags, item.data.clone()));
            match found {
                Some((flags, data)) => {
                    let token = cache.mint_cas();
                    cache.set_cas(key, token);
                    server.metrics.record_hit(verb);
                    response.value_with_cas(key, flags, &data, token);
                }
                None => server.metrics.record_miss(verb),
            }
        } else {
            match cache.get(key) {
                Some(item) => {
                    server.metrics.record_hit(verb);
                    response.value(key, item.flags, &item.data);
                }
                None => server.metrics.record_miss(verb),
            }
        }
    }
    response.end();
}

/// Handle DELETE
fn handle_delete(server: &Server, key: &[u8], response: &mut ResponseWriter) {
    if server.cache.lock().delete(key) {
        server.metrics.record_hit("delete");
        response.deleted();
    } else {
        server.metrics.record_miss("delete");
        response.not_found();
    }
}

/// Handle TOUCH: re-store the same value under a new exptime
fn handle_touch(server: &Server, key: &[u8], exptime: i64, response: &mut ResponseWriter) {
    let expire_at = expire_at_from(exptime, server.clock.now());
    let mut cache = server.cache.lock();

    let existing = match cache.get(key) {
        Some(item) => (item.data.clone(), item.flags, item.cas_unique),
        None => {
            server.metrics.record_miss("touch");
            response.not_found();
            return;
        }
    };
    let (data, flags, cas) = existing;
    if cache.set(key, data, flags, expire_at, cas) {
        server.metrics.record_hit("touch");
        response.touched();
    } else {
        response.server_error(OUT_OF_MEMORY);
    }
}

/// Handle INCR/DECR.
///
/// incr wraps modulo 2^64; decr clamps at zero (memcached behavior).
fn handle_counter(
    server: &Server,
    key: &[u8],
    delta: &[u8],
    incr: bool,
    response: &mut ResponseWriter,
) {
    let verb = if incr { "incr" } else { "decr" };
    let mut cache = server.cache.lock();

    let existing = match cache.get(key) {
        Some(item) => (item.as_u64(), item.flags, item.expire_at, item.cas_unique),
        None => {
            server.metrics.record_miss(verb);
            response.not_found();
            return;
        }
    };
    let (current, flags, expire_at, cas) = existing;

    let current = match current {
        Some(n) => n,
        None => {
            server.metrics.record_miss(verb);
            response.error();
            return;
        }
    };
    let delta: u64 = match std::str::from_utf8(delta).ok().and_then(|s| s.parse().ok()) {
        Some(n) => n,
        None => {
            server.metrics.record_miss(verb);
            response.error();
            return;
        }
    };

    let updated = if incr {
        current.wrapping_add(delta)
    } else {
        current.saturating_sub(delta)
    };

    if cache.set(key, updated.to_string().into_bytes(), flags, expire_at, cas) {
        server.metrics.record_hit(verb);
        response.number(updated);
    } else {
        response.server_error(OUT_OF_MEMORY);
    }
}

/// Handle STATS: engine counters plus the metrics-sink snapshot
fn handle_stats(server: &Server, response: &mut ResponseWriter) {
    response.stat("version", VERSION);
    {
        let cache = server.cache.lock();
        let stats = cache.stats();
        response.stat("curr_items", &cache.len().to_string());
        response.stat("total_items", &stats.total_items.to_string());
        response.stat("bytes", &(cache.capacity() - cache.remaining()).to_string());
        response.stat("limit_maxbytes", &cache.capacity().to_string());
        response.stat("evictions", &stats.evictions.to_string());
        response.stat("expired", &stats.expired.to_string());
        response.stat("crawler_reclaimed", &stats.crawler_reclaimed.to_string());
    }
    for (name, value) in server.metrics.snapshot() {
        response.stat(&name, &value);
    }
    response.end();
}

/// Handle LRU_CRAWLER subcommands: enable/disable/tocrawl N/sleep N
fn handle_lru_crawler(server: &Server, args: &[Cow<'_, [u8]>], response: &mut ResponseWriter) {
    let sub = match args.first() {
        Some(sub) => sub.as_ref(),
        None => {
            response.client_error("lru_crawler requires a subcommand");
            return;
        }
    };

    match sub {
        b"enable" => match server.crawler.enable() {
            Ok(()) => response.ok(),
            Err(e) => response.client_error(&e.to_string()),
        },
        b"disable" => {
            server.crawler.disable();
            response.ok();
        }
        b"tocrawl" => {
            match args.get(1).and_then(|a| parse_num::<u32>(a)) {
                Some(n) => {
                    server.crawler.set_items_per_run(n);
                    response.ok();
                }
                None => response.client_error("tocrawl requires an item count"),
            }
        }
        b"sleep" => {
            match args.get(1).and_then(|a| parse_num::<u64>(a)) {
                Some(us) => match server.crawler.set_sleep(us) {
                    Ok(()) => response.ok(),
                    Err(e) => response.client_error(&e.to_string()),
                },
                None => response.client_error("sleep requires a microsecond value"),
            }
        }
        other => {
            let reason = crate::error::CrawlerError::UnknownSubcommand(
                String::from_utf8_lossy(other).to_string(),
            );
            response.client_error(&reason.to_string());
        }
    }
}

fn parse_num<T: std::str::FromStr>(bytes: &[u8]) -> Option<T> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}
