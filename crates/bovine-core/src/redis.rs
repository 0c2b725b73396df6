//! Redis-backed cache with a bounded connection pool and in-memory fallback.
//!
//! The pool is a lock-free queue of idle connections plus an admission
//! semaphore capping *total* live connections (idle + in-use). A pooled
//! connection owns its semaphore permit; dropping the connection anywhere
//! returns the slot. Callers that cannot reach Redis degrade to the
//! embedded [`MemoryCache`] instead of failing the request.

use crate::cache::{Cache, KeyScan, MemoryCache};
use crate::config::RedisConfig;
use crate::error::{Error, Result};
use crate::resp::{self, Value};
use async_trait::async_trait;
use bytes::Bytes;
use crossbeam_queue::ArrayQueue;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;

/// Per-operation read/write deadline.
const OP_TIMEOUT: Duration = Duration::from_secs(5);

/// One authenticated TCP connection speaking RESP.
#[derive(Debug)]
pub struct RedisConn {
    stream: BufStream<TcpStream>,
}

impl RedisConn {
    async fn connect(addr: &str, password: Option<&str>) -> Result<Self> {
        let stream = timeout(OP_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::CacheUnavailable(format!("dial {} timed out", addr)))?
            .map_err(|e| Error::CacheUnavailable(format!("dial {} failed: {}", addr, e)))?;
        let mut conn = Self {
            stream: BufStream::new(stream),
        };
        if let Some(password) = password {
            match conn.command(&[b"AUTH", password.as_bytes()]).await? {
                v if v.is_ok() => {}
                Value::Error(e) => {
                    return Err(Error::CacheUnavailable(format!("AUTH failed: {}", e)));
                }
                other => {
                    return Err(Error::CacheUnavailable(format!(
                        "unexpected AUTH reply: {:?}",
                        other
                    )));
                }
            }
        }
        Ok(conn)
    }

    /// Send one command and read its reply, each half bounded by the
    /// 5-second operation deadline.
    pub async fn command(&mut self, args: &[&[u8]]) -> Result<Value> {
        let frame = resp::encode_command(args);
        timeout(OP_TIMEOUT, async {
            self.stream.write_all(&frame).await?;
            self.stream.flush().await?;
            resp::read_value(&mut self.stream).await
        })
        .await
        .map_err(|_| Error::CacheUnavailable("redis operation timed out".to_string()))?
        .map_err(|e| Error::CacheUnavailable(format!("redis I/O error: {}", e)))
    }

    /// Liveness probe used when a connection leaves the idle queue.
    pub async fn ping(&mut self) -> bool {
        matches!(self.command(&[b"PING"]).await, Ok(Value::Simple(s)) if s == "PONG")
    }
}

/// A live connection together with the admission permit it occupies.
/// Dropping this anywhere closes the socket and frees the slot.
#[derive(Debug)]
pub struct PooledConn {
    pub conn: RedisConn,
    _permit: OwnedSemaphorePermit,
}

/// Bounded connection pool: an idle queue of up to `pool_size` warm
/// connections and a semaphore of `max_connections` admission slots.
pub struct RedisPool {
    addr: String,
    password: Option<String>,
    idle: ArrayQueue<PooledConn>,
    permits: Arc<Semaphore>,
    conn_wait: Duration,
}

impl RedisPool {
    pub fn new(
        addr: String,
        password: Option<String>,
        pool_size: usize,
        max_connections: usize,
        conn_wait: Duration,
    ) -> Self {
        Self {
            addr,
            password,
            idle: ArrayQueue::new(pool_size.max(1)),
            permits: Arc::new(Semaphore::new(max_connections.max(1))),
            conn_wait,
        }
    }

    /// Take a connection: idle-queue poll with PING validation first, then
    /// a timed admission slot and a fresh dial. A dead idle connection is
    /// dropped (its slot frees) and the caller proceeds to the dial path.
    pub async fn acquire(&self) -> Result<PooledConn> {
        if let Some(mut pooled) = self.idle.pop() {
            if pooled.conn.ping().await {
                return Ok(pooled);
            }
            tracing::debug!("dropping dead pooled connection to {}", self.addr);
        }

        let permit = match timeout(self.conn_wait, self.permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(Error::CacheUnavailable("connection pool closed".to_string()));
            }
            Err(_) => {
                return Err(Error::CacheUnavailable(format!(
                    "connection pool exhausted after {:?}",
                    self.conn_wait
                )));
            }
        };

        // Dial failure drops the permit, returning the slot.
        let conn = RedisConn::connect(&self.addr, self.password.as_deref()).await?;
        Ok(PooledConn {
            conn,
            _permit: permit,
        })
    }

    /// Return a connection to the idle queue. When the queue is full the
    /// connection is closed and its admission slot freed.
    pub fn release(&self, pooled: PooledConn) {
        if self.idle.push(pooled).is_err() {
            tracing::debug!("idle queue full, closing surplus connection to {}", self.addr);
        }
    }

    /// Number of admission slots currently free, for tests and diagnostics.
    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }
}

/// Cache backed by Redis with transparent in-memory degradation.
pub struct RedisCache {
    pool: RedisPool,
    fallback: MemoryCache,
    default_ttl: u64,
}

impl RedisCache {
    /// Build from operator config. `default_ttl` applies to plain `set`.
    pub fn from_config(config: &RedisConfig, default_ttl: u64) -> Result<Self> {
        let password = match &config.password {
            Some(value) => {
                let resolved = value.resolve()?;
                (!resolved.is_empty()).then_some(resolved)
            }
            None => None,
        };
        Ok(Self {
            pool: RedisPool::new(
                format!("{}:{}", config.host, config.port),
                password,
                config.pool_size,
                config.max_connections,
                Duration::from_secs(config.conn_wait_timeout),
            ),
            fallback: MemoryCache::new(default_ttl),
            default_ttl,
        })
    }

    /// Pool constructor for tests and embedding.
    pub fn with_pool(pool: RedisPool, default_ttl: u64) -> Self {
        Self {
            pool,
            fallback: MemoryCache::new(default_ttl),
            default_ttl,
        }
    }

    /// Stop the fallback cache's janitor.
    pub fn close(&self) {
        self.fallback.close();
    }

    async fn command(&self, args: &[&[u8]]) -> Result<Value> {
        let mut pooled = self.pool.acquire().await?;
        match pooled.conn.command(args).await {
            Ok(Value::Error(e)) => {
                // Command-level error on a healthy connection; keep it.
                self.pool.release(pooled);
                Err(Error::CacheUnavailable(format!("redis error: {}", e)))
            }
            Ok(value) => {
                self.pool.release(pooled);
                Ok(value)
            }
            // I/O failure: the connection may hold a half-read reply, so it
            // is dropped rather than returned.
            Err(e) => Err(e),
        }
    }

    async fn write_redis(&self, key: &str, value: &Bytes, ttl_secs: u64) -> Result<()> {
        let reply = if ttl_secs > 0 {
            let ttl = ttl_secs.to_string();
            self.command(&[b"SETEX", key.as_bytes(), ttl.as_bytes(), value])
                .await?
        } else {
            self.command(&[b"SET", key.as_bytes(), value]).await?
        };
        if reply.is_ok() {
            Ok(())
        } else {
            Err(Error::CacheUnavailable(format!(
                "unexpected SET reply: {:?}",
                reply
            )))
        }
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        match self.command(&[b"GET", key.as_bytes()]).await {
            Ok(Value::Bulk(data)) => Ok(Some(data)),
            Ok(Value::Null) => Ok(None),
            Ok(other) => {
                tracing::warn!("unexpected GET reply: {:?}", other);
                Ok(None)
            }
            Err(e) => {
                tracing::debug!("redis get failed, using fallback: {}", e);
                self.fallback.get(key).await
            }
        }
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<()> {
        if let Err(e) = self.write_redis(key, &value, self.default_ttl).await {
            tracing::debug!("redis set failed, using fallback: {}", e);
            return self.fallback.set(key, value).await;
        }
        Ok(())
    }

    /// On Redis failure the fallback is written *and* the error is
    /// returned: callers needing durability (routing writes) surface it,
    /// the content path ignores it.
    async fn set_with_ttl(&self, key: &str, value: Bytes, ttl_secs: u64) -> Result<()> {
        if let Err(e) = self.write_redis(key, &value, ttl_secs).await {
            tracing::debug!("redis set_with_ttl failed, writing fallback: {}", e);
            self.fallback.set_with_ttl(key, value, ttl_secs).await?;
            return Err(e);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        // Delete both sides so entries written during a degraded window
        // cannot resurface.
        self.fallback.delete(key).await?;
        match self.command(&[b"DEL", key.as_bytes()]).await {
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::debug!("redis delete failed: {}", e);
                Ok(())
            }
        }
    }

    async fn clear(&self) -> Result<()> {
        self.fallback.clear().await?;
        match self.command(&[b"FLUSHDB"]).await {
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::debug!("redis clear failed: {}", e);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl KeyScan for RedisCache {
    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        match self.command(&[b"KEYS", pattern.as_bytes()]).await {
            Ok(Value::Array(items)) => {
                let mut keys: Vec<String> = items
                    .into_iter()
                    .filter_map(|v| v.into_bytes())
                    .filter_map(|b| String::from_utf8(b.to_vec()).ok())
                    .collect();
                keys.sort();
                Ok(keys)
            }
            Ok(other) => Err(Error::CacheUnavailable(format!(
                "unexpected KEYS reply: {:?}",
                other
            ))),
            Err(e) => {
                tracing::debug!("redis keys failed, using fallback: {}", e);
                self.fallback.keys(pattern).await
            }
        }
    }
}
