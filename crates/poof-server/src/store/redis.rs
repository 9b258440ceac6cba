//! Redis-backed [`SecretStore`].
//!
//! Entries are stored under their raw id with a native Redis expiry, so the
//! server never has to sweep. Counters live next to them as plain integers.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::{AsyncCommands, Script};
use tracing::{debug, info};

use super::SecretStore;

// Compare-and-delete: only the caller that still sees its own value removes it.
const REMOVE_IF_EQUAL: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
";

#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
    remove_if: Script,
}

impl RedisStore {
    /// Build a connection pool for `url` (e.g. `redis://127.0.0.1:6379`).
    /// No connection is opened until the first command; call `ping` to verify.
    pub fn connect(url: &str) -> Result<Self> {
        let cfg = Config::from_url(url);
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .context("create redis pool")?;

        info!("redis pool initialized");
        Ok(Self {
            pool,
            remove_if: Script::new(REMOVE_IF_EQUAL),
        })
    }

    async fn conn(&self) -> Result<Connection> {
        self.pool.get().await.context("get redis connection")
    }
}

fn set_cmd(key: &str, value: &str, ttl: Option<Duration>) -> Result<redis::Cmd> {
    let mut cmd = redis::cmd("SET");
    cmd.arg(key).arg(value);
    if let Some(ttl) = ttl {
        // PX rejects zero; a sub-millisecond ttl still expires almost at once.
        let millis = i64::try_from(ttl.as_millis().max(1)).context("ttl out of range")?;
        cmd.arg("PX").arg(millis);
    }
    Ok(cmd)
}

#[async_trait]
impl SecretStore for RedisStore {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: () = set_cmd(key, value, ttl)?
            .query_async(&mut *conn)
            .await
            .context("redis SET")?;
        debug!(key = %key, ttl = ?ttl, "stored entry");
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        let mut conn = self.conn().await?;
        let mut cmd = set_cmd(key, value, ttl)?;
        cmd.arg("NX");
        // SET .. NX replies OK when written and nil when the key already exists.
        let reply: Option<String> = cmd
            .query_async(&mut *conn)
            .await
            .context("redis SET NX")?;
        Ok(reply.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn().await?;
        let value: Option<String> = conn.get(key).await.context("redis GET")?;
        Ok(value)
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.del(key).await.context("redis DEL")?;
        Ok(())
    }

    async fn remove_if(&self, key: &str, expected: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        let removed: i64 = self
            .remove_if
            .key(key)
            .arg(expected)
            .invoke_async(&mut *conn)
            .await
            .context("redis compare-and-delete")?;
        Ok(removed == 1)
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn().await?;
        let n: i64 = conn.incr(key, 1).await.context("redis INCR")?;
        Ok(n)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .context("redis PING")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_url_is_rejected() {
        assert!(RedisStore::connect("definitely not a url").is_err());
    }

    #[test]
    fn set_uses_millisecond_expiry() {
        let cmd = set_cmd("Ab3kP9qT2xLz", "blob", Some(Duration::from_secs(2))).unwrap();
        let packed = String::from_utf8(cmd.get_packed_command()).unwrap();
        assert!(packed.contains("PX"));
        assert!(packed.contains("2000"));

        let cmd = set_cmd("Ab3kP9qT2xLz", "blob", None).unwrap();
        let packed = String::from_utf8(cmd.get_packed_command()).unwrap();
        assert!(!packed.contains("PX"));
    }

    #[test]
    fn unrepresentable_ttl_is_an_error() {
        let forever = Some(Duration::from_secs(u64::MAX));
        assert!(set_cmd("Ab3kP9qT2xLz", "blob", forever).is_err());
    }
}
