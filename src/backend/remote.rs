//! Primary Backend Client
//!
//! `RemoteBackend` forwards every store operation to a networked RESP
//! server over one TCP connection. Requests are strictly one-at-a-time:
//! the connection sits behind an async mutex and each call writes one
//! command and reads exactly one reply frame.
//!
//! TTLs travel as milliseconds (`SET .. PX`, `PEXPIRE`, `PTTL`) so the
//! primary and the embedded engine agree on sub-second durations.

use crate::error::{StoreError, StoreResult};
use crate::protocol::{decode_frame, Command, RespValue};
use crate::storage::{GlobPattern, RankOrder, ScanCursor, ScanPage, TtlStatus};
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Initial read buffer size (4 KB)
const BUFFER_SIZE: usize = 4096;

/// Where and how to reach the primary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    /// `redis://host:port[/db]` or bare `host:port`
    pub url: String,
    pub connect_timeout: Duration,
    /// `COUNT` hint sent with each `SCAN`
    pub scan_batch: usize,
}

/// Parsed form of a primary address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAddress {
    pub host: String,
    pub port: u16,
    pub db: u32,
}

impl RemoteAddress {
    pub fn parse(url: &str) -> StoreResult<Self> {
        let rest = url.strip_prefix("redis://").unwrap_or(url);
        let (authority, path) = match rest.split_once('/') {
            Some((authority, path)) => (authority, path),
            None => (rest, ""),
        };

        if authority.contains('@') {
            return Err(StoreError::invalid(
                "credentials in the backend address are not supported",
            ));
        }
        if authority.is_empty() {
            return Err(StoreError::invalid(format!("missing host in {:?}", url)));
        }

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse()
                    .map_err(|_| StoreError::invalid(format!("invalid port in {:?}", url)))?;
                (host, port)
            }
            None => (authority, 6379),
        };

        let db = if path.is_empty() {
            0
        } else {
            path.parse()
                .map_err(|_| StoreError::invalid(format!("invalid database in {:?}", url)))?
        };

        Ok(Self {
            host: host.to_string(),
            port,
            db,
        })
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

struct Connection {
    stream: TcpStream,
    buffer: BytesMut,
    /// Set while a request is in flight; a call cancelled mid-way leaves it
    /// set and the stream can no longer be trusted.
    in_flight: bool,
}

impl Connection {
    async fn round_trip(&mut self, command: &Command) -> StoreResult<RespValue> {
        if self.in_flight {
            return Err(StoreError::Remote(
                "connection was interrupted mid-request".to_string(),
            ));
        }
        self.in_flight = true;

        trace!(command = command.name(), "Sending request to primary");
        self.stream
            .write_all(&command.encode())
            .await
            .map_err(io_error)?;

        loop {
            if let Some(frame) = decode_frame(&mut self.buffer)
                .map_err(|e| StoreError::Remote(format!("protocol error: {}", e)))?
            {
                self.in_flight = false;
                return Ok(frame);
            }

            let n = self.stream.read_buf(&mut self.buffer).await.map_err(io_error)?;
            if n == 0 {
                return Err(StoreError::Remote(
                    "primary closed the connection".to_string(),
                ));
            }
        }
    }
}

fn io_error(e: std::io::Error) -> StoreError {
    StoreError::Remote(e.to_string())
}

/// Maps an error reply; everything else passes through.
fn check(reply: RespValue) -> StoreResult<RespValue> {
    match reply {
        RespValue::Error(msg) if msg.starts_with("WRONGTYPE") => Err(StoreError::TypeConflict),
        RespValue::Error(msg) => Err(StoreError::Remote(msg)),
        other => Ok(other),
    }
}

fn unexpected(command: &str, reply: &RespValue) -> StoreError {
    StoreError::Remote(format!("unexpected reply to {}: {}", command, reply))
}

fn parse_score(raw: &[u8]) -> StoreResult<f64> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| StoreError::Remote(format!("invalid score {:?}", String::from_utf8_lossy(raw))))
}

/// TTL as whole milliseconds, rounding sub-millisecond values up.
fn ttl_millis(ttl: Duration) -> StoreResult<i64> {
    if ttl.is_zero() {
        return Err(StoreError::invalid("ttl must be positive"));
    }
    Ok(ttl.as_millis().clamp(1, i64::MAX as u128) as i64)
}

/// TCP connect, optional `SELECT`, then `PING`.
async fn open(address: &RemoteAddress, target: &str) -> StoreResult<Connection> {
    let stream = TcpStream::connect(target)
        .await
        .map_err(|e| StoreError::BackendUnavailable(format!("{}: {}", target, e)))?;
    stream.set_nodelay(true).ok();

    let mut conn = Connection {
        stream,
        buffer: BytesMut::with_capacity(BUFFER_SIZE),
        in_flight: false,
    };
    if address.db != 0 {
        check(conn.round_trip(&Command::new("SELECT").arg_int(address.db as i64)).await?)?;
    }
    match check(conn.round_trip(&Command::new("PING")).await?)? {
        RespValue::SimpleString(pong) if pong == "PONG" => Ok(conn),
        other => Err(unexpected("PING", &other)),
    }
}

/// Client for the primary (networked) backend.
///
/// There is no reconnect. Once a request fails on the wire (I/O error,
/// closed socket, undecodable reply, or a call cancelled mid-request) the
/// stream is no longer in a known state, and every later call returns
/// `StoreError::Remote` until the backend is rebuilt.
pub struct RemoteBackend {
    address: RemoteAddress,
    scan_batch: usize,
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for RemoteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteBackend")
            .field("address", &self.address)
            .finish()
    }
}

impl RemoteBackend {
    /// Opens a connection and verifies it with `PING`.
    ///
    /// Any failure, including the timeout, is `BackendUnavailable`.
    pub async fn connect(config: &RemoteConfig) -> StoreResult<Self> {
        let address = RemoteAddress::parse(&config.url)?;
        let target = address.socket_addr();

        let handshake = open(&address, &target);

        let conn = tokio::time::timeout(config.connect_timeout, handshake)
            .await
            .map_err(|_| {
                StoreError::BackendUnavailable(format!(
                    "{}: timed out after {:?}",
                    target, config.connect_timeout
                ))
            })?
            .map_err(|e| match e {
                StoreError::BackendUnavailable(_) => e,
                other => StoreError::BackendUnavailable(format!("{}: {}", target, other)),
            })?;

        debug!(address = %target, db = address.db, "Connected to primary store");
        Ok(Self {
            address,
            scan_batch: config.scan_batch.max(1),
            conn: Mutex::new(conn),
        })
    }

    pub fn address(&self) -> &RemoteAddress {
        &self.address
    }

    async fn call(&self, command: Command) -> StoreResult<RespValue> {
        let mut conn = self.conn.lock().await;
        check(conn.round_trip(&command).await?)
    }

    async fn call_int(&self, command: Command) -> StoreResult<i64> {
        let name = command.name();
        let reply = self.call(command).await?;
        reply.as_integer().ok_or_else(|| unexpected(name, &reply))
    }

    pub async fn ping(&self) -> StoreResult<()> {
        self.call(Command::new("PING")).await.map(|_| ())
    }

    pub async fn get(&self, key: &[u8]) -> StoreResult<Option<Bytes>> {
        match self.call(Command::new("GET").arg_slice(key)).await? {
            RespValue::Null => Ok(None),
            RespValue::BulkString(value) => Ok(Some(value)),
            other => Err(unexpected("GET", &other)),
        }
    }

    pub async fn set(&self, key: Bytes, value: Bytes, ttl: Option<Duration>) -> StoreResult<()> {
        let mut command = Command::new("SET").arg(key).arg(value);
        if let Some(ttl) = ttl {
            command = command.arg("PX").arg_int(ttl_millis(ttl)?);
        }
        self.call(command).await.map(|_| ())
    }

    pub async fn delete(&self, key: &[u8]) -> StoreResult<bool> {
        Ok(self.call_int(Command::new("DEL").arg_slice(key)).await? > 0)
    }

    pub async fn exists(&self, key: &[u8]) -> StoreResult<bool> {
        Ok(self.call_int(Command::new("EXISTS").arg_slice(key)).await? > 0)
    }

    pub async fn expire(&self, key: &[u8], ttl: Duration) -> StoreResult<bool> {
        let ms = ttl_millis(ttl)?;
        Ok(self
            .call_int(Command::new("PEXPIRE").arg_slice(key).arg_int(ms))
            .await?
            == 1)
    }

    pub async fn persist(&self, key: &[u8]) -> StoreResult<bool> {
        Ok(self.call_int(Command::new("PERSIST").arg_slice(key)).await? == 1)
    }

    pub async fn ttl(&self, key: &[u8]) -> StoreResult<TtlStatus> {
        match self.call_int(Command::new("PTTL").arg_slice(key)).await? {
            -2 => Ok(TtlStatus::Missing),
            -1 => Ok(TtlStatus::NoExpiry),
            ms if ms >= 0 => Ok(TtlStatus::ExpiresIn(Duration::from_millis(ms as u64))),
            ms => Err(StoreError::Remote(format!("unexpected PTTL reply {}", ms))),
        }
    }

    pub async fn hash_set(&self, key: Bytes, fields: Vec<(Bytes, Bytes)>) -> StoreResult<usize> {
        if fields.is_empty() {
            return Err(StoreError::invalid("hash_set needs at least one field"));
        }
        let mut command = Command::new("HSET").arg(key);
        for (field, value) in fields {
            command = command.arg(field).arg(value);
        }
        Ok(self.call_int(command).await?.max(0) as usize)
    }

    pub async fn hash_get_all(&self, key: &[u8]) -> StoreResult<HashMap<Bytes, Bytes>> {
        let reply = self.call(Command::new("HGETALL").arg_slice(key)).await?;
        let items = match reply {
            RespValue::Array(items) if items.len() % 2 == 0 => items,
            other => return Err(unexpected("HGETALL", &other)),
        };

        let mut map = HashMap::with_capacity(items.len() / 2);
        let mut items = items.into_iter();
        while let (Some(field), Some(value)) = (items.next(), items.next()) {
            match (field.into_bytes(), value.into_bytes()) {
                (Some(field), Some(value)) => {
                    map.insert(field, value);
                }
                _ => return Err(StoreError::Remote("malformed HGETALL reply".to_string())),
            }
        }
        Ok(map)
    }

    pub async fn ranked_upsert(&self, key: Bytes, member: Bytes, score: f64) -> StoreResult<bool> {
        if score.is_nan() {
            return Err(StoreError::invalid("score is not a number"));
        }
        let command = Command::new("ZADD").arg(key).arg_score(score).arg(member);
        Ok(self.call_int(command).await? == 1)
    }

    pub async fn ranked_remove(&self, key: &[u8], member: &[u8]) -> StoreResult<bool> {
        let command = Command::new("ZREM").arg_slice(key).arg_slice(member);
        Ok(self.call_int(command).await? == 1)
    }

    pub async fn ranked_range(
        &self,
        key: &[u8],
        start: i64,
        end: i64,
        order: RankOrder,
    ) -> StoreResult<Vec<(Bytes, f64)>> {
        let name = match order {
            RankOrder::Descending => "ZREVRANGE",
            RankOrder::Ascending => "ZRANGE",
        };
        let command = Command::new(name)
            .arg_slice(key)
            .arg_int(start)
            .arg_int(end)
            .arg("WITHSCORES");

        let items = match self.call(command).await? {
            RespValue::Array(items) if items.len() % 2 == 0 => items,
            other => return Err(unexpected(name, &other)),
        };

        let mut out = Vec::with_capacity(items.len() / 2);
        let mut items = items.into_iter();
        while let (Some(member), Some(score)) = (items.next(), items.next()) {
            match (member.into_bytes(), score.into_bytes()) {
                (Some(member), Some(score)) => out.push((member, parse_score(&score)?)),
                _ => return Err(StoreError::Remote(format!("malformed {} reply", name))),
            }
        }
        Ok(out)
    }

    pub async fn rank_of(&self, key: &[u8], member: &[u8], order: RankOrder) -> StoreResult<Option<usize>> {
        let name = match order {
            RankOrder::Descending => "ZREVRANK",
            RankOrder::Ascending => "ZRANK",
        };
        match self.call(Command::new(name).arg_slice(key).arg_slice(member)).await? {
            RespValue::Null => Ok(None),
            RespValue::Integer(rank) if rank >= 0 => Ok(Some(rank as usize)),
            other => Err(unexpected(name, &other)),
        }
    }

    pub async fn score_of(&self, key: &[u8], member: &[u8]) -> StoreResult<Option<f64>> {
        match self
            .call(Command::new("ZSCORE").arg_slice(key).arg_slice(member))
            .await?
        {
            RespValue::Null => Ok(None),
            RespValue::BulkString(raw) => parse_score(&raw).map(Some),
            other => Err(unexpected("ZSCORE", &other)),
        }
    }

    pub async fn cardinality(&self, key: &[u8]) -> StoreResult<usize> {
        Ok(self.call_int(Command::new("ZCARD").arg_slice(key)).await?.max(0) as usize)
    }

    pub async fn scan_keys(&self, pattern: &str, cursor: &ScanCursor) -> StoreResult<ScanPage> {
        let pattern = GlobPattern::parse(pattern)?;
        if cursor.is_done() {
            return Ok(ScanPage {
                keys: Vec::new(),
                cursor: ScanCursor::done(),
            });
        }
        let position = cursor.to_remote()?;

        let command = Command::new("SCAN")
            .arg(position.to_string())
            .arg("MATCH")
            .arg(pattern.as_str().to_string())
            .arg("COUNT")
            .arg_int(self.scan_batch as i64);

        let reply = self.call(command).await?;
        let mut parts = match reply {
            RespValue::Array(parts) if parts.len() == 2 => parts.into_iter(),
            other => return Err(unexpected("SCAN", &other)),
        };

        let next = parts
            .next()
            .and_then(RespValue::into_bytes)
            .and_then(|raw| std::str::from_utf8(&raw).ok()?.parse::<u64>().ok())
            .ok_or_else(|| StoreError::Remote("malformed SCAN cursor".to_string()))?;
        let keys = parts
            .next()
            .and_then(RespValue::into_array)
            .ok_or_else(|| StoreError::Remote("malformed SCAN keys".to_string()))?
            .into_iter()
            .map(|key| {
                key.into_bytes()
                    .ok_or_else(|| StoreError::Remote("malformed SCAN key".to_string()))
            })
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(ScanPage {
            keys,
            cursor: ScanCursor::from_remote(next),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{refused_addr, spawn_primary};
    use crate::storage::{EngineConfig, StorageEngine};
    use std::collections::HashSet;
    use std::sync::Arc;

    fn b(s: &str) -> Bytes {
        Bytes::from(s.to_string())
    }

    async fn connected() -> (RemoteBackend, Arc<StorageEngine>) {
        let engine = Arc::new(
            StorageEngine::with_config(EngineConfig {
                shards: 4,
                scan_batch: 3,
            })
            .unwrap(),
        );
        let addr = spawn_primary(Arc::clone(&engine)).await;
        let backend = RemoteBackend::connect(&RemoteConfig {
            url: format!("redis://{}", addr),
            connect_timeout: Duration::from_secs(1),
            scan_batch: 3,
        })
        .await
        .unwrap();
        (backend, engine)
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(
            RemoteAddress::parse("redis://127.0.0.1:6380/2").unwrap(),
            RemoteAddress {
                host: "127.0.0.1".into(),
                port: 6380,
                db: 2
            }
        );
        assert_eq!(
            RemoteAddress::parse("cache.internal").unwrap().socket_addr(),
            "cache.internal:6379"
        );
        assert!(RemoteAddress::parse("redis://:abc").is_err());
        assert!(RemoteAddress::parse("redis://user:pw@host:6379").is_err());
        assert!(RemoteAddress::parse("redis://host:6379/x").is_err());
        assert!(RemoteAddress::parse("redis://").is_err());
    }

    #[test]
    fn test_ttl_millis() {
        assert_eq!(ttl_millis(Duration::from_secs(300)), Ok(300_000));
        assert_eq!(ttl_millis(Duration::from_micros(10)), Ok(1));
        assert!(ttl_millis(Duration::ZERO).is_err());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let result = RemoteBackend::connect(&RemoteConfig {
            url: format!("redis://{}", refused_addr()),
            connect_timeout: Duration::from_millis(500),
            scan_batch: 10,
        })
        .await;
        assert!(matches!(result, Err(StoreError::BackendUnavailable(_))));
    }

    #[tokio::test]
    async fn test_connect_times_out_on_silent_peer() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _accepting = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let result = RemoteBackend::connect(&RemoteConfig {
            url: addr.to_string(),
            connect_timeout: Duration::from_millis(100),
            scan_batch: 10,
        })
        .await;
        assert!(matches!(result, Err(StoreError::BackendUnavailable(_))));
    }

    #[tokio::test]
    async fn test_broken_stream_stays_broken() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = BytesMut::new();
            while decode_frame(&mut buf).unwrap().is_none() {
                stream.read_buf(&mut buf).await.unwrap();
            }
            stream.write_all(b"+PONG\r\n").await.unwrap();
            // Hang up after the handshake.
        });

        let remote = RemoteBackend::connect(&RemoteConfig {
            url: addr.to_string(),
            connect_timeout: Duration::from_secs(1),
            scan_batch: 10,
        })
        .await
        .unwrap();

        assert!(matches!(remote.get(b"k").await, Err(StoreError::Remote(_))));
        assert!(matches!(remote.ping().await, Err(StoreError::Remote(_))));
    }

    #[tokio::test]
    async fn test_strings_and_ttl() {
        let (remote, _engine) = connected().await;

        assert_eq!(remote.get(b"name").await, Ok(None));
        remote.set(b("name"), b("Ariz"), None).await.unwrap();
        assert_eq!(remote.get(b"name").await, Ok(Some(b("Ariz"))));
        assert_eq!(remote.exists(b"name").await, Ok(true));
        assert_eq!(remote.ttl(b"name").await, Ok(TtlStatus::NoExpiry));

        assert_eq!(remote.expire(b"name", Duration::from_secs(60)).await, Ok(true));
        assert!(matches!(
            remote.ttl(b"name").await,
            Ok(TtlStatus::ExpiresIn(_))
        ));
        assert_eq!(remote.persist(b"name").await, Ok(true));

        remote
            .set(b("short"), b("v"), Some(Duration::from_millis(30)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(remote.get(b"short").await, Ok(None));

        assert_eq!(remote.delete(b"name").await, Ok(true));
        assert_eq!(remote.delete(b"name").await, Ok(false));
        assert_eq!(remote.ttl(b"name").await, Ok(TtlStatus::Missing));
    }

    #[tokio::test]
    async fn test_hashes_and_type_conflict() {
        let (remote, _engine) = connected().await;

        assert_eq!(
            remote.hash_set(b("h"), vec![(b("a"), b("1"))]).await,
            Ok(1)
        );
        assert_eq!(
            remote
                .hash_set(b("h"), vec![(b("a"), b("2")), (b("b"), b("3"))])
                .await,
            Ok(1)
        );
        let all = remote.hash_get_all(b"h").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all.get(&b("a")), Some(&b("2")));

        assert_eq!(remote.get(b"h").await, Err(StoreError::TypeConflict));
        assert!(remote.hash_get_all(b"missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sorted_sets() {
        let (remote, engine) = connected().await;

        assert_eq!(remote.ranked_upsert(b("board"), b("alice"), 90.0).await, Ok(true));
        assert_eq!(remote.ranked_upsert(b("board"), b("bob"), 75.0).await, Ok(true));
        assert_eq!(remote.ranked_upsert(b("board"), b("bob"), 80.5).await, Ok(false));

        assert_eq!(
            remote
                .ranked_range(b"board", 0, -1, RankOrder::Descending)
                .await
                .unwrap(),
            vec![(b("alice"), 90.0), (b("bob"), 80.5)]
        );
        assert_eq!(
            remote.rank_of(b"board", b"bob", RankOrder::Descending).await,
            Ok(Some(1))
        );
        assert_eq!(
            remote.rank_of(b"board", b"bob", RankOrder::Ascending).await,
            Ok(Some(0))
        );
        assert_eq!(remote.score_of(b"board", b"bob").await, Ok(Some(80.5)));
        assert_eq!(remote.score_of(b"board", b"zed").await, Ok(None));
        assert_eq!(remote.cardinality(b"board").await, Ok(2));
        assert_eq!(remote.ranked_remove(b"board", b"bob").await, Ok(true));

        // The request reached the server-side engine, not a local copy.
        assert_eq!(engine.cardinality(b"board"), Ok(1));
    }

    #[tokio::test]
    async fn test_scan_pages_through_remote_cursor() {
        let (remote, _engine) = connected().await;

        for i in 0..10 {
            remote
                .set(b(&format!("session:{}", i)), b("v"), None)
                .await
                .unwrap();
        }
        remote.set(b("other"), b("v"), None).await.unwrap();

        let mut cursor = ScanCursor::start();
        let mut keys = HashSet::new();
        let mut pages = 0;
        loop {
            let page = remote.scan_keys("session:*", &cursor).await.unwrap();
            keys.extend(page.keys);
            pages += 1;
            if page.cursor.is_done() {
                break;
            }
            cursor = page.cursor;
        }

        assert_eq!(keys.len(), 10);
        assert!(pages > 1);
    }

    #[tokio::test]
    async fn test_argument_errors_stay_local() {
        let (remote, _engine) = connected().await;

        assert!(matches!(
            remote.ranked_upsert(b("board"), b("m"), f64::NAN).await,
            Err(StoreError::InvalidArgument(_))
        ));
        assert!(matches!(
            remote.scan_keys("[bad", &ScanCursor::start()).await,
            Err(StoreError::InvalidArgument(_))
        ));
        assert!(matches!(
            remote.expire(b"k", Duration::ZERO).await,
            Err(StoreError::InvalidArgument(_))
        ));
        remote.ping().await.unwrap();
    }
}
