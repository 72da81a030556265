//! # Redis Worker Registry
//!
//! Durable registry backend. Layout under the configured key prefix:
//!
//! - `{prefix}worker:{id}`: hash holding every field of the worker record
//! - `{prefix}service:{type}`: sorted set of worker ids, scored by registration sequence
//! - `{prefix}workers`: sorted set of all worker ids, scored the same way
//! - `{prefix}seq`: registration sequence counter
//!
//! The hash also carries `last_heartbeat_ms` (epoch milliseconds) so scripts can
//! compare heartbeat ages numerically.
//!
//! Counter updates and conditional writes run as Lua scripts, so each one is atomic
//! on the server no matter how many gateway processes share the store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::WorkerRegistry;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{HeartbeatRequest, NewWorker, ServiceType, WorkerRecord, WorkerStatus};

const UPDATE_CONNECTIONS_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then return -1 end
local current = tonumber(redis.call('HGET', KEYS[1], 'current_connections') or '0') + tonumber(ARGV[1])
if current < 0 then current = 0 end
redis.call('HSET', KEYS[1], 'current_connections', current)
return current
"#;

const RECORD_OUTCOME_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then return 0 end
local total = redis.call('HINCRBY', KEYS[1], 'total_requests', 1)
if ARGV[2] == '0' then redis.call('HINCRBY', KEYS[1], 'failed_requests', 1) end
local avg = tonumber(redis.call('HGET', KEYS[1], 'avg_response_time_ms') or '0')
avg = avg + (tonumber(ARGV[1]) - avg) / total
redis.call('HSET', KEYS[1], 'avg_response_time_ms', tostring(avg))
return 1
"#;

const HEARTBEAT_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then return 0 end
if ARGV[1] == '1' and redis.call('HGET', KEYS[1], 'status') == 'offline' then
  redis.call('HSET', KEYS[1], 'status', 'online')
end
if #ARGV > 1 then redis.call('HSET', KEYS[1], unpack(ARGV, 2)) end
return 1
"#;

const MARK_OFFLINE_IF_STALE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then return -1 end
if redis.call('HGET', KEYS[1], 'status') == 'offline' then return 0 end
local seen = tonumber(redis.call('HGET', KEYS[1], 'last_heartbeat_ms') or '')
if seen and seen >= tonumber(ARGV[1]) then return 0 end
redis.call('HSET', KEYS[1], 'status', 'offline')
return 1
"#;

/// Redis registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisRegistryConfig {
    /// Redis connection URL
    pub url: String,

    /// Key prefix for every registry key
    pub key_prefix: String,

    /// Connection timeout
    #[serde(with = "humantime_serde")]
    pub connection_timeout: Duration,
}

impl Default for RedisRegistryConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            key_prefix: "gateway:registry:".to_string(),
            connection_timeout: Duration::from_secs(5),
        }
    }
}

pub struct RedisWorkerRegistry {
    config: RedisRegistryConfig,
    connection: ConnectionManager,
    update_connections: Script,
    record_outcome: Script,
    heartbeat: Script,
    mark_offline_if_stale: Script,
}

impl RedisWorkerRegistry {
    /// Connect to Redis and prepare the registry scripts
    pub async fn new(config: RedisRegistryConfig) -> GatewayResult<Self> {
        let client = Client::open(config.url.as_str())?;

        let connection = tokio::time::timeout(config.connection_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                GatewayError::registry(format!(
                    "Timed out connecting to Redis at {} after {:?}",
                    config.url, config.connection_timeout
                ))
            })??;

        info!(url = %config.url, prefix = %config.key_prefix, "Redis worker registry connected");

        Ok(Self {
            config,
            connection,
            update_connections: Script::new(UPDATE_CONNECTIONS_SCRIPT),
            record_outcome: Script::new(RECORD_OUTCOME_SCRIPT),
            heartbeat: Script::new(HEARTBEAT_SCRIPT),
            mark_offline_if_stale: Script::new(MARK_OFFLINE_IF_STALE_SCRIPT),
        })
    }

    fn worker_key(&self, worker_id: &str) -> String {
        format!("{}worker:{}", self.config.key_prefix, worker_id)
    }

    fn service_key(&self, service_type: ServiceType) -> String {
        format!("{}service:{}", self.config.key_prefix, service_type)
    }

    fn all_key(&self) -> String {
        format!("{}workers", self.config.key_prefix)
    }

    fn sequence_key(&self) -> String {
        format!("{}seq", self.config.key_prefix)
    }

    /// Fetch the records for the given ids, skipping ids removed in the meantime
    async fn load_many(&self, ids: Vec<String>) -> GatewayResult<Vec<WorkerRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.connection.clone();
        let mut pipe = redis::pipe();
        for id in &ids {
            pipe.hgetall(self.worker_key(id));
        }
        let hashes: Vec<HashMap<String, String>> = pipe.query_async(&mut conn).await?;

        let mut records = Vec::with_capacity(hashes.len());
        for (id, fields) in ids.iter().zip(hashes) {
            if fields.is_empty() {
                continue;
            }
            match decode_worker(&fields) {
                Ok(record) => records.push(record),
                Err(e) => warn!(worker_id = %id, error = %e, "Skipping undecodable worker record"),
            }
        }
        Ok(records)
    }
}

/// Flatten a worker record into hash fields
pub fn encode_worker(record: &WorkerRecord) -> Vec<(&'static str, String)> {
    vec![
        ("id", record.id.clone()),
        ("name", record.name.clone()),
        ("host", record.host.clone()),
        ("port", record.port.to_string()),
        ("service_type", record.service_type.to_string()),
        ("weight", record.weight.to_string()),
        ("status", record.status.to_string()),
        ("current_connections", record.current_connections.to_string()),
        ("total_requests", record.total_requests.to_string()),
        ("failed_requests", record.failed_requests.to_string()),
        ("avg_response_time_ms", record.avg_response_time_ms.to_string()),
        ("cpu_usage", record.cpu_usage.map(|v| v.to_string()).unwrap_or_default()),
        ("memory_usage", record.memory_usage.map(|v| v.to_string()).unwrap_or_default()),
        ("last_heartbeat", record.last_heartbeat.to_rfc3339()),
        ("last_heartbeat_ms", record.last_heartbeat.timestamp_millis().to_string()),
        ("registered_at", record.registered_at.to_rfc3339()),
    ]
}

/// Rebuild a worker record from its hash fields
pub fn decode_worker(fields: &HashMap<String, String>) -> GatewayResult<WorkerRecord> {
    fn field<'a>(fields: &'a HashMap<String, String>, name: &str) -> GatewayResult<&'a str> {
        fields
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| GatewayError::registry(format!("worker hash is missing field '{}'", name)))
    }

    fn parsed<T: std::str::FromStr>(fields: &HashMap<String, String>, name: &str) -> GatewayResult<T> {
        field(fields, name)?
            .parse()
            .map_err(|_| GatewayError::registry(format!("worker hash has malformed field '{}'", name)))
    }

    fn optional(fields: &HashMap<String, String>, name: &str) -> GatewayResult<Option<f64>> {
        match fields.get(name).map(String::as_str) {
            None | Some("") => Ok(None),
            Some(_) => parsed(fields, name).map(Some),
        }
    }

    fn timestamp(fields: &HashMap<String, String>, name: &str) -> GatewayResult<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(field(fields, name)?)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|e| GatewayError::registry(format!("worker hash has malformed '{}': {}", name, e)))
    }

    Ok(WorkerRecord {
        id: field(fields, "id")?.to_string(),
        name: field(fields, "name")?.to_string(),
        host: field(fields, "host")?.to_string(),
        port: parsed(fields, "port")?,
        service_type: field(fields, "service_type")?.parse()?,
        weight: parsed(fields, "weight")?,
        status: field(fields, "status")?.parse()?,
        current_connections: parsed(fields, "current_connections")?,
        total_requests: parsed(fields, "total_requests")?,
        failed_requests: parsed(fields, "failed_requests")?,
        avg_response_time_ms: parsed(fields, "avg_response_time_ms")?,
        cpu_usage: optional(fields, "cpu_usage")?,
        memory_usage: optional(fields, "memory_usage")?,
        last_heartbeat: timestamp(fields, "last_heartbeat")?,
        registered_at: timestamp(fields, "registered_at")?,
    })
}

/// Hash fields written by a heartbeat, in field/value order
fn heartbeat_fields(heartbeat: &HeartbeatRequest, now: DateTime<Utc>) -> Vec<(&'static str, String)> {
    let mut fields = vec![
        ("last_heartbeat", now.to_rfc3339()),
        ("last_heartbeat_ms", now.timestamp_millis().to_string()),
    ];
    if let Some(status) = heartbeat.status {
        fields.push(("status", status.to_string()));
    }
    if let Some(connections) = heartbeat.current_connections {
        fields.push(("current_connections", connections.to_string()));
    }
    if let Some(cpu) = heartbeat.cpu_usage {
        fields.push(("cpu_usage", cpu.to_string()));
    }
    if let Some(memory) = heartbeat.memory_usage {
        fields.push(("memory_usage", memory.to_string()));
    }
    fields
}

#[async_trait]
impl WorkerRegistry for RedisWorkerRegistry {
    async fn register(&self, worker: NewWorker) -> GatewayResult<WorkerRecord> {
        worker.validate()?;

        let mut conn = self.connection.clone();
        let id = Uuid::new_v4().to_string();
        let record = WorkerRecord::new(id.clone(), worker, Utc::now());
        let seq: u64 = conn.incr(self.sequence_key(), 1u64).await?;

        redis::pipe()
            .atomic()
            .hset_multiple(self.worker_key(&id), &encode_worker(&record))
            .ignore()
            .zadd(self.service_key(record.service_type), &id, seq)
            .ignore()
            .zadd(self.all_key(), &id, seq)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;

        info!(
            worker_id = %id,
            name = %record.name,
            address = %record.address(),
            service_type = %record.service_type,
            weight = record.weight,
            "Worker registered"
        );
        Ok(record)
    }

    async fn heartbeat(&self, heartbeat: HeartbeatRequest) -> GatewayResult<WorkerRecord> {
        let mut conn = self.connection.clone();
        let revive = if heartbeat.status.is_none() { "1" } else { "0" };

        let mut invocation = self.heartbeat.prepare_invoke();
        invocation.key(self.worker_key(&heartbeat.worker_id)).arg(revive);
        for (field, value) in heartbeat_fields(&heartbeat, Utc::now()) {
            invocation.arg(field).arg(value);
        }

        let applied: i64 = invocation.invoke_async(&mut conn).await?;
        if applied == 0 {
            return Err(GatewayError::worker_not_found(&heartbeat.worker_id));
        }

        debug!(worker_id = %heartbeat.worker_id, "Heartbeat applied");
        self.get(&heartbeat.worker_id).await
    }

    async fn get(&self, worker_id: &str) -> GatewayResult<WorkerRecord> {
        let mut conn = self.connection.clone();
        let fields: HashMap<String, String> = conn.hgetall(self.worker_key(worker_id)).await?;
        if fields.is_empty() {
            return Err(GatewayError::worker_not_found(worker_id));
        }
        decode_worker(&fields)
    }

    async fn list_all(&self) -> GatewayResult<Vec<WorkerRecord>> {
        let mut conn = self.connection.clone();
        let ids: Vec<String> = conn.zrange(self.all_key(), 0, -1).await?;
        self.load_many(ids).await
    }

    async fn list_by_service_type(&self, service_type: ServiceType) -> GatewayResult<Vec<WorkerRecord>> {
        let mut conn = self.connection.clone();
        let ids: Vec<String> = conn.zrange(self.service_key(service_type), 0, -1).await?;
        self.load_many(ids).await
    }

    async fn update_connections(&self, worker_id: &str, delta: i32) -> GatewayResult<u32> {
        let mut conn = self.connection.clone();
        let count: i64 = self
            .update_connections
            .key(self.worker_key(worker_id))
            .arg(delta)
            .invoke_async(&mut conn)
            .await?;

        if count < 0 {
            return Err(GatewayError::worker_not_found(worker_id));
        }
        Ok(count as u32)
    }

    async fn record_outcome(&self, worker_id: &str, duration_ms: f64, success: bool) -> GatewayResult<()> {
        let mut conn = self.connection.clone();
        let applied: i64 = self
            .record_outcome
            .key(self.worker_key(worker_id))
            .arg(duration_ms)
            .arg(if success { "1" } else { "0" })
            .invoke_async(&mut conn)
            .await?;

        if applied == 0 {
            return Err(GatewayError::worker_not_found(worker_id));
        }
        Ok(())
    }

    async fn mark_offline(&self, worker_id: &str) -> GatewayResult<()> {
        let mut conn = self.connection.clone();
        let offline = WorkerStatus::Offline.to_string();
        let applied: i64 = self
            .heartbeat
            .key(self.worker_key(worker_id))
            .arg("0")
            .arg("status")
            .arg(offline)
            .invoke_async(&mut conn)
            .await?;

        if applied == 0 {
            return Err(GatewayError::worker_not_found(worker_id));
        }
        info!(worker_id = %worker_id, "Worker marked offline");
        Ok(())
    }

    async fn mark_offline_if_stale(&self, worker_id: &str, cutoff: DateTime<Utc>) -> GatewayResult<bool> {
        let mut conn = self.connection.clone();
        let applied: i64 = self
            .mark_offline_if_stale
            .key(self.worker_key(worker_id))
            .arg(cutoff.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;

        match applied {
            -1 => Err(GatewayError::worker_not_found(worker_id)),
            0 => Ok(false),
            _ => Ok(true),
        }
    }

    async fn remove(&self, worker_id: &str) -> GatewayResult<WorkerRecord> {
        let record = self.get(worker_id).await?;
        let mut conn = self.connection.clone();

        redis::pipe()
            .atomic()
            .del(self.worker_key(worker_id))
            .ignore()
            .zrem(self.service_key(record.service_type), worker_id)
            .ignore()
            .zrem(self.all_key(), worker_id)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;

        info!(worker_id = %worker_id, "Worker removed from registry");
        Ok(record)
    }
}
