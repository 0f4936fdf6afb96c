use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::debug;
use uuid::Uuid;

use crate::error::EngineError;
use crate::runtime::instance::ProcessInstance;
use crate::runtime::store::RuntimeStore;
use crate::runtime::token::TokenId;

/// Redis-backed runtime store.
///
/// The instance snapshot lives in a hash (`revision` + `body` fields) so the
/// compare-and-set can run server-side; a companion hash indexes the live
/// tokens individually for external inspection.
pub struct RedisRuntimeStore {
    client: redis::Client,
}

impl RedisRuntimeStore {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    pub fn connect(url: &str) -> Result<Self, EngineError> {
        let client = redis::Client::open(url).map_err(|e| EngineError::Store(e.into()))?;
        Ok(Self::new(client))
    }

    fn instance_key(&self, instance_id: Uuid) -> String {
        format!("procflow:inst:{}", instance_id)
    }

    fn token_key(&self, instance_id: Uuid) -> String {
        format!("procflow:inst:{}:tokens", instance_id)
    }
}

#[async_trait]
impl RuntimeStore for RedisRuntimeStore {
    async fn load(&self, instance_id: Uuid) -> Result<ProcessInstance, EngineError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| EngineError::Store(e.into()))?;

        let body: Option<String> = conn
            .hget(self.instance_key(instance_id), "body")
            .await
            .map_err(|e| EngineError::Store(e.into()))?;

        let body = body.ok_or(EngineError::UnknownInstance(instance_id))?;
        serde_json::from_str(&body).map_err(|e| EngineError::Store(e.into()))
    }

    async fn save(&self, instance: &mut ProcessInstance) -> Result<(), EngineError> {
        // CAS on the revision field: a concurrent writer has already bumped
        // it past the caller's copy, and the write must not be applied.
        let script = redis::Script::new(
            r#"
            local current = redis.call("HGET", KEYS[1], "revision")
            local expected = tonumber(ARGV[1])
            if current ~= false and tonumber(current) ~= expected then
                return -1
            end
            redis.call("HSET", KEYS[1], "revision", expected + 1, "body", ARGV[2])
            return expected + 1
        "#,
        );

        let expected = instance.revision;
        // Serialize with the post-save revision so a reload round-trips.
        instance.revision = expected + 1;
        let body = serde_json::to_string(instance).map_err(|e| EngineError::Store(e.into()))?;

        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| EngineError::Store(e.into()))?;

        let outcome: i64 = script
            .key(self.instance_key(instance.id()))
            .arg(expected)
            .arg(&body)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| EngineError::Store(e.into()))?;

        if outcome < 0 {
            instance.revision = expected;
            return Err(EngineError::ConcurrencyConflict(instance.id()));
        }

        let token_key = self.token_key(instance.id());
        let mut items = Vec::new();
        for id in instance.tree().live_tokens() {
            let token = instance.tree().token(id)?;
            let body = serde_json::to_string(token).map_err(|e| EngineError::Store(e.into()))?;
            items.push((id.to_string(), body));
        }
        if !items.is_empty() {
            let _: () = conn
                .hset_multiple(token_key, &items)
                .await
                .map_err(|e| EngineError::Store(e.into()))?;
        }
        Ok(())
    }

    async fn remove_tokens(
        &self,
        instance_id: Uuid,
        tokens: &[TokenId],
    ) -> Result<(), EngineError> {
        if tokens.is_empty() {
            return Ok(());
        }
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| EngineError::Store(e.into()))?;

        let fields: Vec<String> = tokens.iter().map(TokenId::to_string).collect();
        let _: () = conn
            .hdel(self.token_key(instance_id), fields)
            .await
            .map_err(|e| EngineError::Store(e.into()))?;
        debug!(instance_id = %instance_id, count = tokens.len(), "tokens removed from redis");
        Ok(())
    }

    async fn flush(&self) -> Result<(), EngineError> {
        // Every write already went to the server.
        Ok(())
    }
}
