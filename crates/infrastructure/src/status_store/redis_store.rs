use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use botfleet_core::config::StatusStoreConfig;
use botfleet_core::models::{StatsMap, StatusRecord};
use botfleet_core::traits::{state_key, status_key};
use botfleet_core::{FleetError, FleetResult, StatusStore};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info, instrument, warn};

/// 基于Redis的共享状态存储
#[derive(Clone)]
pub struct RedisStatusStore {
    conn: ConnectionManager,
    endpoint: String,
}

impl std::fmt::Debug for RedisStatusStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStatusStore")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

fn store_error(e: redis::RedisError) -> FleetError {
    FleetError::StatusStore(e.to_string())
}

/// 去掉URL中的密码，用于日志
pub fn redact_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            parsed.to_string()
        }
        Err(_) => "<invalid url>".to_string(),
    }
}

impl RedisStatusStore {
    /// 按配置连接，失败时按 `max_retry_attempts` / `retry_delay_ms` 重试
    pub async fn connect(config: &StatusStoreConfig) -> FleetResult<Self> {
        let endpoint = redact_url(&config.url);
        let attempts = config.max_retry_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match Self::open(&config.url).await {
                Ok(conn) => {
                    info!("Connected to status store at {}", endpoint);
                    return Ok(Self { conn, endpoint });
                }
                Err(e) => {
                    warn!(
                        "Status store connection attempt {}/{} to {} failed: {}",
                        attempt, attempts, endpoint, e
                    );
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(Duration::from_millis(config.retry_delay_ms)).await;
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| FleetError::StatusStore(format!("无法连接状态存储: {endpoint}"))))
    }

    /// 运行单元一侧只有URL
    pub async fn connect_url(url: &str) -> FleetResult<Self> {
        let config = StatusStoreConfig {
            url: url.to_string(),
            ..StatusStoreConfig::default()
        };
        Self::connect(&config).await
    }

    async fn open(url: &str) -> FleetResult<ConnectionManager> {
        let client = redis::Client::open(url)
            .map_err(|e| FleetError::Configuration(format!("无效的状态存储URL: {e}")))?;
        let mut conn = client
            .get_connection_manager()
            .await
            .map_err(store_error)?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(conn)
    }
}

#[async_trait]
impl StatusStore for RedisStatusStore {
    #[instrument(skip(self, identity))]
    async fn get_status(&self, identity: &str) -> FleetResult<Option<StatusRecord>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> =
            conn.hgetall(status_key(identity)).await.map_err(store_error)?;
        if fields.is_empty() {
            return Ok(None);
        }
        StatusRecord::from_fields(&fields).map(Some)
    }

    #[instrument(skip(self, identity, record), fields(status = %record.status))]
    async fn put_status(&self, identity: &str, record: &StatusRecord) -> FleetResult<()> {
        let key = status_key(identity);
        let fields = record.to_fields();
        let mut conn = self.conn.clone();

        // 整体替换，避免残留上一个状态的字段
        let _: () = redis::pipe()
            .atomic()
            .del(&key)
            .ignore()
            .hset_multiple(&key, &fields[..])
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        debug!("Status record written: {}", record.status);
        Ok(())
    }

    async fn delete_status(&self, identity: &str) -> FleetResult<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .del(status_key(identity))
            .ignore()
            .del(state_key(identity))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn get_state(&self, identity: &str) -> FleetResult<Option<StatsMap>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(state_key(identity)).await.map_err(store_error)?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn put_state(&self, identity: &str, state: &StatsMap) -> FleetResult<()> {
        let json = serde_json::to_string(state)?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .set(state_key(identity), json)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn ping(&self) -> FleetResult<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(())
    }
}
