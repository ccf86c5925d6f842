use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

/// Shared key/value side of the system: replay-protection nonces, the
/// idempotent-create window and the cross-process streaming counters.
/// Everything in here is time-boxed; Postgres stays the source of truth.
#[derive(Clone)]
pub struct KvManager {
    connection: ConnectionManager,
}

impl KvManager {
    pub async fn try_new(url: String) -> Result<Self, std::io::Error> {
        let client = redis::Client::open(url).map_err(|err| {
            tracing::error!("invalid redis url {:?}", err);
            std::io::Error::new(std::io::ErrorKind::Other, "invalid redis url")
        })?;

        let connection = ConnectionManager::new(client).await.map_err(|err| {
            tracing::error!("connecting to redis {:?}", err);
            std::io::Error::new(std::io::ErrorKind::Other, "redis connection error")
        })?;

        Ok(Self { connection })
    }

    /// SET NX EX. Returns true when the key was absent and is now claimed.
    pub async fn claim(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, String> {
        let mut conn = self.connection.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async::<Option<String>>(&mut conn)
            .await
            .map(|reply| reply.is_some())
            .map_err(|err| {
                tracing::error!("redis SET NX failed: {:?}", err);
                format!("redis SET NX failed: {}", err)
            })
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, String> {
        let mut conn = self.connection.clone();
        conn.get(key).await.map_err(|err| {
            tracing::error!("redis GET failed: {:?}", err);
            format!("redis GET failed: {}", err)
        })
    }

    /// INCR with a TTL refresh, used for the per-key streaming ceiling.
    pub async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64, String> {
        let mut conn = self.connection.clone();
        let count: i64 = conn.incr(key, 1).await.map_err(|err| {
            tracing::error!("redis INCR failed: {:?}", err);
            format!("redis INCR failed: {}", err)
        })?;
        let _: bool = conn.expire(key, ttl.as_secs() as i64).await.map_err(|err| {
            tracing::error!("redis EXPIRE failed: {:?}", err);
            format!("redis EXPIRE failed: {}", err)
        })?;
        Ok(count)
    }

    pub async fn decr_floor_zero(&self, key: &str) -> Result<i64, String> {
        let mut conn = self.connection.clone();
        let count: i64 = conn.decr(key, 1).await.map_err(|err| {
            tracing::error!("redis DECR failed: {:?}", err);
            format!("redis DECR failed: {}", err)
        })?;
        if count < 0 {
            let _: () = conn.set(key, 0).await.map_err(|err| {
                tracing::error!("redis SET failed: {:?}", err);
                format!("redis SET failed: {}", err)
            })?;
            return Ok(0);
        }
        Ok(count)
    }
}
