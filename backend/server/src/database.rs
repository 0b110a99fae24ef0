//! # Redis
//!
//! Backing document store for rosters.
//!
//! ## Implementation
//!
//! - One hash per document at `{collection}:{uid}`
//! - Each hash field holds the JSON encoding of the document field
//! - Hash fields that are not roster fields make the document malformed
//! - `set`: `DEL` + `HSET` in one `MULTI`, the old document never leaks through
//! - `update`: Lua script, refuses to create a hash that does not exist yet
//! - A roster hash is 60 small fields, so a single `HSET` covers the batched reset
use std::{collections::HashMap, sync::LazyLock, time::Duration};

use async_trait::async_trait;
use redis::{
    AsyncCommands, Client, RedisError, Script,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use roster::{DocRef, DocumentStore, Field, Record, StoreError};
use serde_json::Value;

static UPDATE_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        if redis.call('EXISTS', KEYS[1]) == 0 then
            return 0
        end
        redis.call('HSET', KEYS[1], unpack(ARGV))
        return 1
        ",
    )
});

pub async fn init_redis(redis_url: &str) -> Result<ConnectionManager, RedisError> {
    let config = ConnectionManagerConfig::new()
        .set_number_of_retries(1)
        .set_connection_timeout(Duration::from_millis(100));

    let client = Client::open(redis_url)?;

    client.get_connection_manager_with_config(config).await
}

pub struct RedisStore {
    connection: ConnectionManager,
}

impl RedisStore {
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }
}

fn key(doc: &DocRef) -> String {
    format!("{}:{}", doc.collection, doc.id)
}

fn backend(e: RedisError) -> StoreError {
    StoreError::Backend(Box::new(e))
}

fn encode(record: &Record) -> Vec<(String, String)> {
    record
        .iter()
        .map(|(field, value)| (field.clone(), value.to_string()))
        .collect()
}

fn decode(fields: HashMap<String, String>) -> Result<Record, StoreError> {
    fields
        .into_iter()
        .map(|(field, raw)| -> Result<(String, Value), StoreError> {
            let malformed = |reason: String| StoreError::Malformed {
                field: field.clone(),
                reason,
            };

            field.parse::<Field>().map_err(|e| malformed(e.to_string()))?;
            let value =
                serde_json::from_str::<Value>(&raw).map_err(|e| malformed(e.to_string()))?;

            Ok((field, value))
        })
        .collect()
}

#[async_trait]
impl DocumentStore for RedisStore {
    async fn get(&self, doc: &DocRef) -> Result<Option<Record>, StoreError> {
        let mut connection = self.connection.clone();

        let fields: HashMap<String, String> =
            connection.hgetall(key(doc)).await.map_err(backend)?;

        // Redis has no empty hashes, a missing key reads back as no fields.
        if fields.is_empty() {
            return Ok(None);
        }

        decode(fields).map(Some)
    }

    async fn set(&self, doc: &DocRef, record: Record) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        let key = key(doc);
        let fields = encode(&record);

        let mut pipe = redis::pipe();
        pipe.atomic().del(&key).ignore();
        if !fields.is_empty() {
            pipe.hset_multiple(&key, &fields).ignore();
        }

        let (): () = pipe.query_async(&mut connection).await.map_err(backend)?;
        Ok(())
    }

    async fn update(&self, doc: &DocRef, patch: Record) -> Result<(), StoreError> {
        if patch.is_empty() {
            return Ok(());
        }

        let mut connection = self.connection.clone();

        let mut invocation = UPDATE_SCRIPT.key(key(doc));
        for (field, value) in encode(&patch) {
            invocation.arg(field).arg(value);
        }

        let updated: i64 = invocation
            .invoke_async(&mut connection)
            .await
            .map_err(backend)?;

        if updated == 0 {
            return Err(StoreError::NotFound(doc.clone()));
        }

        Ok(())
    }
}
