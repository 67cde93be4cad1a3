//! Test fixtures: a minimal RESP primary served from a `StorageEngine`.
//!
//! Covers exactly the commands `RemoteBackend` sends, so backend and
//! supervisor tests run against real sockets without an external server.

use crate::error::StoreError;
use crate::protocol::{decode_frame, RespValue};
use crate::storage::{RankOrder, ScanCursor, StorageEngine, TtlStatus};
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// An address nothing is listening on.
pub(crate) fn refused_addr() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr.to_string()
}

/// Starts a primary on an ephemeral port and returns its address.
pub(crate) async fn spawn_primary(engine: Arc<StorageEngine>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve(stream, Arc::clone(&engine)));
        }
    });

    addr
}

async fn serve(mut stream: TcpStream, engine: Arc<StorageEngine>) {
    let mut buffer = BytesMut::with_capacity(4096);
    let mut session = Session {
        engine,
        cursors: HashMap::new(),
        next_cursor: 1,
    };

    loop {
        match decode_frame(&mut buffer) {
            Ok(Some(frame)) => {
                let reply = match frame.into_array() {
                    Some(args) => session.execute(args),
                    None => RespValue::Error("ERR expected array".into()),
                };
                if stream.write_all(&reply.to_bytes()).await.is_err() {
                    return;
                }
                continue;
            }
            Ok(None) => {}
            Err(_) => return,
        }

        match stream.read_buf(&mut buffer).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

struct Session {
    engine: Arc<StorageEngine>,
    cursors: HashMap<u64, ScanCursor>,
    next_cursor: u64,
}

fn error_reply(e: StoreError) -> RespValue {
    match e {
        StoreError::TypeConflict => RespValue::Error(
            "WRONGTYPE Operation against a key holding the wrong kind of value".into(),
        ),
        other => RespValue::Error(format!("ERR {}", other)),
    }
}

fn int(n: i64) -> RespValue {
    RespValue::Integer(n)
}

fn text(raw: &Bytes) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

fn number<T: std::str::FromStr>(raw: &Bytes) -> Option<T> {
    text(raw).parse().ok()
}

fn score_reply(score: f64) -> RespValue {
    RespValue::bulk(score.to_string())
}

impl Session {
    fn execute(&mut self, args: Vec<RespValue>) -> RespValue {
        let args = match args
            .into_iter()
            .map(RespValue::into_bytes)
            .collect::<Option<Vec<Bytes>>>()
        {
            Some(args) => args,
            None => return RespValue::Error("ERR arguments must be strings".into()),
        };
        let Some(name) = args.first() else {
            return RespValue::Error("ERR empty command".into());
        };

        match (text(name).to_ascii_uppercase().as_str(), &args[1..]) {
            ("PING", _) => RespValue::SimpleString("PONG".into()),
            ("SELECT", [_]) => RespValue::ok(),
            ("GET", [key]) => match self.engine.get(key) {
                Ok(Some(value)) => RespValue::BulkString(value),
                Ok(None) => RespValue::Null,
                Err(e) => error_reply(e),
            },
            ("SET", [key, value, rest @ ..]) => {
                let ttl = match rest {
                    [] => None,
                    [px, ms] if text(px).eq_ignore_ascii_case("PX") => {
                        number::<u64>(ms).map(Duration::from_millis)
                    }
                    _ => return RespValue::Error("ERR syntax error".into()),
                };
                match self.engine.set(key.clone(), value.clone(), ttl) {
                    Ok(()) => RespValue::ok(),
                    Err(e) => error_reply(e),
                }
            }
            ("DEL", [key]) => int(self.engine.delete(key) as i64),
            ("EXISTS", [key]) => int(self.engine.exists(key) as i64),
            ("PEXPIRE", [key, ms]) => {
                let ttl = Duration::from_millis(number::<u64>(ms).unwrap_or(0));
                match self.engine.expire(key, ttl) {
                    Ok(set) => int(set as i64),
                    Err(e) => error_reply(e),
                }
            }
            ("PERSIST", [key]) => int(self.engine.persist(key) as i64),
            ("PTTL", [key]) => match self.engine.ttl(key) {
                TtlStatus::Missing => int(-2),
                TtlStatus::NoExpiry => int(-1),
                TtlStatus::ExpiresIn(left) => int(left.as_millis() as i64),
            },
            ("HSET", [key, pairs @ ..]) if !pairs.is_empty() && pairs.len() % 2 == 0 => {
                let fields = pairs
                    .chunks(2)
                    .map(|pair| (pair[0].clone(), pair[1].clone()));
                match self.engine.hash_set(key.clone(), fields) {
                    Ok(added) => int(added as i64),
                    Err(e) => error_reply(e),
                }
            }
            ("HGETALL", [key]) => match self.engine.hash_get_all(key) {
                Ok(map) => RespValue::Array(
                    map.into_iter()
                        .flat_map(|(f, v)| [RespValue::BulkString(f), RespValue::BulkString(v)])
                        .collect(),
                ),
                Err(e) => error_reply(e),
            },
            ("ZADD", [key, score, member]) => match number::<f64>(score) {
                Some(score) => match self.engine.ranked_upsert(key.clone(), member.clone(), score) {
                    Ok(added) => int(added as i64),
                    Err(e) => error_reply(e),
                },
                None => RespValue::Error("ERR value is not a valid float".into()),
            },
            ("ZREM", [key, member]) => match self.engine.ranked_remove(key, member) {
                Ok(removed) => int(removed as i64),
                Err(e) => error_reply(e),
            },
            (cmd @ ("ZRANGE" | "ZREVRANGE"), [key, start, end, _withscores]) => {
                let order = if cmd == "ZREVRANGE" {
                    RankOrder::Descending
                } else {
                    RankOrder::Ascending
                };
                let (Some(start), Some(end)) = (number::<i64>(start), number::<i64>(end)) else {
                    return RespValue::Error("ERR value is not an integer".into());
                };
                match self.engine.ranked_range(key, start, end, order) {
                    Ok(range) => RespValue::Array(
                        range
                            .into_iter()
                            .flat_map(|(m, s)| [RespValue::BulkString(m), score_reply(s)])
                            .collect(),
                    ),
                    Err(e) => error_reply(e),
                }
            }
            (cmd @ ("ZRANK" | "ZREVRANK"), [key, member]) => {
                let order = if cmd == "ZREVRANK" {
                    RankOrder::Descending
                } else {
                    RankOrder::Ascending
                };
                match self.engine.rank_of(key, member, order) {
                    Ok(Some(rank)) => int(rank as i64),
                    Ok(None) => RespValue::Null,
                    Err(e) => error_reply(e),
                }
            }
            ("ZSCORE", [key, member]) => match self.engine.score_of(key, member) {
                Ok(Some(score)) => score_reply(score),
                Ok(None) => RespValue::Null,
                Err(e) => error_reply(e),
            },
            ("ZCARD", [key]) => match self.engine.cardinality(key) {
                Ok(n) => int(n as i64),
                Err(e) => error_reply(e),
            },
            ("SCAN", [cursor, _match, pattern, _count, _n]) => self.scan(cursor, pattern),
            (other, _) => RespValue::Error(format!("ERR unknown command '{}'", other)),
        }
    }

    fn scan(&mut self, cursor: &Bytes, pattern: &Bytes) -> RespValue {
        let position = match number::<u64>(cursor) {
            Some(0) => ScanCursor::start(),
            Some(id) => match self.cursors.remove(&id) {
                Some(position) => position,
                None => return RespValue::Error("ERR invalid cursor".into()),
            },
            None => return RespValue::Error("ERR invalid cursor".into()),
        };

        let page = match self.engine.scan_keys(&text(pattern), &position) {
            Ok(page) => page,
            Err(e) => return error_reply(e),
        };

        let next = if page.cursor.is_done() {
            0
        } else {
            let id = self.next_cursor;
            self.next_cursor += 1;
            self.cursors.insert(id, page.cursor);
            id
        };

        RespValue::Array(vec![
            RespValue::bulk(next.to_string()),
            RespValue::Array(page.keys.into_iter().map(RespValue::BulkString).collect()),
        ])
    }
}
