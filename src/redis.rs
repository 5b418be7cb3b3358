//! # Redis Backends
//!
//! Distributed queue and cache implementations over Redis, behind the
//! `redis` cargo feature.
//!
//! ## Overview
//!
//! [`RedisQueue`] maps the priority queue onto a sorted set: requests are
//! serialized to their JSON wire form and inserted with the priority as
//! score; dequeue is a blocking pop-max with a short poll window so a close
//! takes effect within bounded time. [`RedisCache`] maps the visited cache
//! onto a hash keyed by URL, where nil replies mean "not visited".
//!
//! Sharing a key namespace between processes shares the crawl frontier;
//! all store errors surface as [`Error::Store`], either directly or through
//! the dequeue result stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use kanal::AsyncReceiver;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::trace;

use crate::cache::VisitedCache;
use crate::error::Error;
use crate::queue::{QueueResult, RequestQueue};
use crate::request::Request;

/// Poll window for the blocking pop; also bounds how long a close can take
/// to be observed.
const POP_TIMEOUT_SECS: f64 = 1.0;

fn store_err(err: redis::RedisError) -> Error {
    Error::Store(err.to_string())
}

/// Priority queue in a Redis sorted set.
pub struct RedisQueue {
    client: redis::Client,
    conn: MultiplexedConnection,
    key: String,
    closed: Arc<AtomicBool>,
}

impl RedisQueue {
    /// Connects and verifies the server is reachable. `key` namespaces the
    /// sorted set, letting several queues share one server.
    pub async fn new(client: redis::Client, key: impl Into<String>) -> Result<RedisQueue, Error> {
        let mut conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(store_err)?;
        let _: () = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;

        Ok(RedisQueue {
            client,
            conn,
            key: key.into(),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }
}

#[async_trait]
impl RequestQueue for RedisQueue {
    async fn enqueue(&self, request: Request, priority: i32) -> Result<(), Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::QueueClosed);
        }
        let member = serde_json::to_string(&request)
            .map_err(|e| Error::Store(format!("failed to serialize request: {e}")))?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .zadd(&self.key, member, priority)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    fn dequeue(&self) -> AsyncReceiver<QueueResult> {
        let (tx, rx) = kanal::bounded_async::<QueueResult>(1);
        let client = self.client.clone();
        let key = self.key.clone();
        let closed = Arc::clone(&self.closed);

        tokio::spawn(async move {
            // A dedicated connection: the blocking pop would stall every
            // other command multiplexed onto a shared one.
            let mut conn = match client.get_multiplexed_tokio_connection().await {
                Ok(conn) => conn,
                Err(e) => {
                    let _ = tx.send(Err(store_err(e))).await;
                    return;
                }
            };

            while !closed.load(Ordering::Acquire) {
                let reply: Result<Option<(String, String, f64)>, redis::RedisError> =
                    redis::cmd("BZPOPMAX")
                        .arg(&key)
                        .arg(POP_TIMEOUT_SECS)
                        .query_async(&mut conn)
                        .await;

                match reply {
                    // Poll window elapsed with nothing queued; retry.
                    Ok(None) => continue,
                    Ok(Some((_key, member, _score))) => {
                        let result = serde_json::from_str::<Request>(&member).map_err(|e| {
                            Error::Store(format!("undecodable queue entry: {e}"))
                        });
                        let _ = tx.send(result).await;
                        return;
                    }
                    Err(e) => {
                        let _ = tx.send(Err(store_err(e))).await;
                        return;
                    }
                }
            }
            trace!("queue closed, redis dequeue waiter exiting without delivery");
        });

        rx
    }

    async fn count(&self) -> Result<usize, Error> {
        let mut conn = self.conn.clone();
        conn.zcard(&self.key).await.map_err(store_err)
    }

    async fn clear(&self) -> Result<(), Error> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(&self.key).await.map_err(store_err)?;
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn reopen(&self) {
        self.closed.store(false, Ordering::Release);
    }
}

/// Visited cache in a Redis hash.
pub struct RedisCache {
    conn: MultiplexedConnection,
    key: String,
}

impl RedisCache {
    /// Connects and verifies the server is reachable. `key` namespaces the
    /// hash holding visited URLs.
    pub async fn new(client: redis::Client, key: impl Into<String>) -> Result<RedisCache, Error> {
        let mut conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(store_err)?;
        let _: () = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;

        Ok(RedisCache {
            conn,
            key: key.into(),
        })
    }
}

#[async_trait]
impl VisitedCache for RedisCache {
    async fn add_request(&self, request: &Request) -> Result<(), Error> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .hset(&self.key, request.url().as_str(), "t")
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn visited_url(&self, request: &Request) -> Result<bool, Error> {
        let mut conn = self.conn.clone();
        // A nil reply means the URL was never recorded, not an error.
        let value: Option<String> = conn
            .hget(&self.key, request.url().as_str())
            .await
            .map_err(store_err)?;
        Ok(value.as_deref() == Some("t"))
    }

    async fn clear(&self) -> Result<(), Error> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(&self.key).await.map_err(store_err)?;
        Ok(())
    }
}
