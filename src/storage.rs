//! Repository traits for facilitator state
//!
//! The facilitator never assumes a storage engine. It needs atomic per-key
//! read-modify-write and nothing else, which [`PaymentRepository`] expresses as
//! a compare-and-swap on the record's `version`.

use crate::types::{DeliveryStatus, PaymentRequest, PaymentStatus, WebhookDeliveryRecord};
use crate::{Result, X402Error};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// Storage for payment requests
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Store a new request; fails if the id is taken
    async fn insert(&self, request: PaymentRequest) -> Result<()>;

    /// Load a request by facilitator id
    async fn get(&self, id: &str) -> Result<Option<PaymentRequest>>;

    /// Replace the stored request if its version is still `expected_version`
    ///
    /// The stored copy is written with `version = expected_version + 1`.
    /// Returns `false` when another writer got there first.
    async fn compare_and_swap(&self, request: PaymentRequest, expected_version: u64)
        -> Result<bool>;

    /// All requests currently in `status`
    async fn list_by_status(&self, status: PaymentStatus) -> Result<Vec<PaymentRequest>>;
}

/// Storage for webhook delivery records
#[async_trait]
pub trait WebhookRepository: Send + Sync {
    async fn insert(&self, record: WebhookDeliveryRecord) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<WebhookDeliveryRecord>>;

    /// Store `record` if the stored copy is still at `expected_version`
    ///
    /// Returns `false` when another writer got there first. On success the
    /// stored copy carries `expected_version + 1`.
    async fn compare_and_swap(
        &self,
        record: WebhookDeliveryRecord,
        expected_version: u64,
    ) -> Result<bool>;

    async fn list_by_status(&self, status: DeliveryStatus) -> Result<Vec<WebhookDeliveryRecord>>;
}

/// In-memory payment storage
///
/// Data is lost on restart. Each request lives in its own `DashMap` slot, so
/// a compare-and-swap locks one shard and never the whole table.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentRepository {
    requests: Arc<DashMap<String, PaymentRequest>>,
}

impl InMemoryPaymentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentRepository for InMemoryPaymentRepository {
    async fn insert(&self, request: PaymentRequest) -> Result<()> {
        use dashmap::mapref::entry::Entry;

        match self.requests.entry(request.id.clone()) {
            Entry::Occupied(_) => Err(X402Error::validation(format!(
                "Payment request {} already exists",
                request.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(request);
                Ok(())
            }
        }
    }

    async fn get(&self, id: &str) -> Result<Option<PaymentRequest>> {
        Ok(self.requests.get(id).map(|r| r.value().clone()))
    }

    async fn compare_and_swap(
        &self,
        mut request: PaymentRequest,
        expected_version: u64,
    ) -> Result<bool> {
        let mut stored = self
            .requests
            .get_mut(&request.id)
            .ok_or_else(|| X402Error::not_found(format!("Payment request {}", request.id)))?;

        if stored.version != expected_version {
            return Ok(false);
        }

        request.version = expected_version + 1;
        *stored = request;
        Ok(true)
    }

    async fn list_by_status(&self, status: PaymentStatus) -> Result<Vec<PaymentRequest>> {
        let mut matching: Vec<_> = self
            .requests
            .iter()
            .filter(|r| r.status == status)
            .map(|r| r.value().clone())
            .collect();
        matching.sort_by_key(|r| r.created_at);
        Ok(matching)
    }
}

/// In-memory webhook record storage
#[derive(Debug, Clone, Default)]
pub struct InMemoryWebhookRepository {
    records: Arc<DashMap<String, WebhookDeliveryRecord>>,
}

impl InMemoryWebhookRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WebhookRepository for InMemoryWebhookRepository {
    async fn insert(&self, record: WebhookDeliveryRecord) -> Result<()> {
        self.records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<WebhookDeliveryRecord>> {
        Ok(self.records.get(id).map(|r| r.value().clone()))
    }

    async fn compare_and_swap(
        &self,
        mut record: WebhookDeliveryRecord,
        expected_version: u64,
    ) -> Result<bool> {
        let mut stored = self
            .records
            .get_mut(&record.id)
            .ok_or_else(|| X402Error::not_found(format!("Webhook delivery {}", record.id)))?;

        if stored.version != expected_version {
            return Ok(false);
        }

        record.version = expected_version + 1;
        *stored = record;
        Ok(true)
    }

    async fn list_by_status(&self, status: DeliveryStatus) -> Result<Vec<WebhookDeliveryRecord>> {
        let mut matching: Vec<_> = self
            .records
            .iter()
            .filter(|r| r.status == status)
            .map(|r| r.value().clone())
            .collect();
        matching.sort_by_key(|r| r.created_at);
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PaymentStatus, Scheme};
    use chrono::Utc;
    use rust_decimal::Decimal;
    use std::collections::HashMap;

    fn pending_request(id: &str) -> PaymentRequest {
        let now = Utc::now();
        PaymentRequest {
            id: id.to_string(),
            payment_id: format!("order-{}", id),
            amount: Decimal::new(5000, 2),
            currency: "USDC".to_string(),
            network: "polygon".to_string(),
            from_address: "0xpayer".to_string(),
            to_address: "0xpayee".to_string(),
            scheme: Scheme::Exact,
            status: PaymentStatus::Pending,
            version: 0,
            created_at: now,
            expires_at: now + chrono::Duration::minutes(15),
            verified_at: None,
            settled_at: None,
            cancelled_at: None,
            failed_at: None,
            signature: None,
            transaction_hash: None,
            settlement: None,
            cancel_reason: None,
            failure_reason: None,
            failure_code: None,
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_id() {
        let repo = InMemoryPaymentRepository::new();
        repo.insert(pending_request("a")).await.unwrap();

        let result = repo.insert(pending_request("a")).await;
        assert!(matches!(result, Err(X402Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_compare_and_swap_bumps_version() {
        let repo = InMemoryPaymentRepository::new();
        repo.insert(pending_request("a")).await.unwrap();

        let mut verified = repo.get("a").await.unwrap().unwrap();
        verified.status = PaymentStatus::Verified;
        assert!(repo.compare_and_swap(verified, 0).await.unwrap());

        let stored = repo.get("a").await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Verified);
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_compare_and_swap_loses_on_stale_version() {
        let repo = InMemoryPaymentRepository::new();
        repo.insert(pending_request("a")).await.unwrap();

        let snapshot = repo.get("a").await.unwrap().unwrap();

        let mut first = snapshot.clone();
        first.status = PaymentStatus::Settling;
        let mut second = snapshot.clone();
        second.status = PaymentStatus::Cancelled;

        assert!(repo.compare_and_swap(first, snapshot.version).await.unwrap());
        assert!(!repo.compare_and_swap(second, snapshot.version).await.unwrap());

        let stored = repo.get("a").await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Settling);
    }

    #[tokio::test]
    async fn test_compare_and_swap_unknown_id() {
        let repo = InMemoryPaymentRepository::new();
        let result = repo.compare_and_swap(pending_request("ghost"), 0).await;
        assert!(matches!(result, Err(X402Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_by_status() {
        let repo = InMemoryPaymentRepository::new();
        repo.insert(pending_request("a")).await.unwrap();
        repo.insert(pending_request("b")).await.unwrap();

        let mut cancelled = repo.get("b").await.unwrap().unwrap();
        cancelled.status = PaymentStatus::Cancelled;
        repo.compare_and_swap(cancelled, 0).await.unwrap();

        let pending = repo.list_by_status(PaymentStatus::Pending).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "a");
    }

    #[tokio::test]
    async fn test_webhook_repository_update_and_list() {
        let repo = InMemoryWebhookRepository::new();
        let mut record = WebhookDeliveryRecord::new(
            "https://agent.example/hooks",
            "payment.settled",
            serde_json::json!({"id": "a"}),
            5,
        );
        repo.insert(record.clone()).await.unwrap();

        record.status = DeliveryStatus::Delivered;
        record.attempts = 1;
        assert!(repo.compare_and_swap(record.clone(), 0).await.unwrap());

        // A writer still holding version 0 loses
        record.status = DeliveryStatus::Failed;
        assert!(!repo.compare_and_swap(record.clone(), 0).await.unwrap());

        assert!(repo
            .list_by_status(DeliveryStatus::Pending)
            .await
            .unwrap()
            .is_empty());
        let delivered = repo.list_by_status(DeliveryStatus::Delivered).await.unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].attempts, 1);
        assert_eq!(delivered[0].version, 1);
    }

    #[tokio::test]
    async fn test_webhook_update_unknown_record() {
        let repo = InMemoryWebhookRepository::new();
        let record = WebhookDeliveryRecord::new("https://x", "payment.created", serde_json::json!({}), 5);
        assert!(matches!(
            repo.compare_and_swap(record, 0).await,
            Err(X402Error::NotFound(_))
        ));
    }
}

#[cfg(feature = "redis")]
pub mod redis_storage {
    use super::{PaymentRepository, Result};
    use crate::types::{PaymentRequest, PaymentStatus};
    use crate::X402Error;
    use redis::aio::ConnectionManager;
    use redis::{AsyncCommands, Client, Script};

    // KEYS[1] record, KEYS[2] old status index, KEYS[3] new status index
    // ARGV[1] expected version, ARGV[2] new record JSON, ARGV[3] id
    const CAS_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
  return -1
end
local stored = cjson.decode(current)
if tonumber(stored['version']) ~= tonumber(ARGV[1]) then
  return 0
end
redis.call('SET', KEYS[1], ARGV[2])
redis.call('SREM', KEYS[2], ARGV[3])
redis.call('SADD', KEYS[3], ARGV[3])
return 1
"#;

    /// Redis-backed payment storage
    ///
    /// Records are JSON strings under `{prefix}req:{id}`, with one set per
    /// status under `{prefix}status:{status}`. The compare-and-swap runs as a
    /// Lua script, so it is atomic across facilitator processes.
    #[derive(Clone)]
    pub struct RedisPaymentRepository {
        conn: ConnectionManager,
        key_prefix: String,
        cas: Script,
    }

    impl std::fmt::Debug for RedisPaymentRepository {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("RedisPaymentRepository")
                .field("key_prefix", &self.key_prefix)
                .finish()
        }
    }

    impl RedisPaymentRepository {
        /// Connect to Redis
        ///
        /// `key_prefix` defaults to `x402:payment:`.
        pub async fn new(redis_url: &str, key_prefix: Option<&str>) -> Result<Self> {
            let client = Client::open(redis_url)
                .map_err(|e| X402Error::config(format!("Invalid Redis URL: {}", e)))?;
            let conn = ConnectionManager::new(client).await?;

            Ok(Self {
                conn,
                key_prefix: key_prefix.unwrap_or("x402:payment:").to_string(),
                cas: Script::new(CAS_SCRIPT),
            })
        }

        fn record_key(&self, id: &str) -> String {
            format!("{}req:{}", self.key_prefix, id)
        }

        fn status_key(&self, status: PaymentStatus) -> String {
            format!("{}status:{}", self.key_prefix, status)
        }
    }

    #[async_trait::async_trait]
    impl PaymentRepository for RedisPaymentRepository {
        async fn insert(&self, request: PaymentRequest) -> Result<()> {
            let mut conn = self.conn.clone();
            let body = serde_json::to_string(&request)?;

            let created: bool = conn.set_nx(self.record_key(&request.id), body).await?;
            if !created {
                return Err(X402Error::validation(format!(
                    "Payment request {} already exists",
                    request.id
                )));
            }
            conn.sadd::<_, _, ()>(self.status_key(request.status), &request.id)
                .await?;
            Ok(())
        }

        async fn get(&self, id: &str) -> Result<Option<PaymentRequest>> {
            let mut conn = self.conn.clone();
            let body: Option<String> = conn.get(self.record_key(id)).await?;
            body.map(|b| serde_json::from_str(&b).map_err(X402Error::from))
                .transpose()
        }

        async fn compare_and_swap(
            &self,
            mut request: PaymentRequest,
            expected_version: u64,
        ) -> Result<bool> {
            let mut conn = self.conn.clone();

            // The old status is needed to maintain the index
            let current = self
                .get(&request.id)
                .await?
                .ok_or_else(|| X402Error::not_found(format!("Payment request {}", request.id)))?;

            request.version = expected_version + 1;
            let body = serde_json::to_string(&request)?;

            let outcome: i64 = self
                .cas
                .key(self.record_key(&request.id))
                .key(self.status_key(current.status))
                .key(self.status_key(request.status))
                .arg(expected_version)
                .arg(body)
                .arg(&request.id)
                .invoke_async(&mut conn)
                .await?;

            match outcome {
                1 => Ok(true),
                0 => Ok(false),
                _ => Err(X402Error::not_found(format!("Payment request {}", request.id))),
            }
        }

        async fn list_by_status(&self, status: PaymentStatus) -> Result<Vec<PaymentRequest>> {
            let mut conn = self.conn.clone();
            let ids: Vec<String> = conn.smembers(self.status_key(status)).await?;

            let mut requests = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(request) = self.get(&id).await? {
                    // Index entries can lag a concurrent swap by one script call
                    if request.status == status {
                        requests.push(request);
                    }
                }
            }
            requests.sort_by_key(|r| r.created_at);
            Ok(requests)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::types::Scheme;
        use chrono::Utc;
        use rust_decimal::Decimal;
        use std::collections::HashMap;
        use std::env;

        async fn connect() -> Option<RedisPaymentRepository> {
            let redis_url =
                env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
            let prefix = format!("test:{}:", uuid::Uuid::new_v4());
            // ConnectionManager::new fails fast when nothing is listening
            match RedisPaymentRepository::new(&redis_url, Some(&prefix)).await {
                Ok(repo) => Some(repo),
                Err(_) => {
                    println!("Skipping Redis test: Redis not available at {}", redis_url);
                    None
                }
            }
        }

        fn request(id: &str) -> PaymentRequest {
            let now = Utc::now();
            PaymentRequest {
                id: id.to_string(),
                payment_id: "order-1".to_string(),
                amount: Decimal::new(100, 0),
                currency: "USDC".to_string(),
                network: "polygon".to_string(),
                from_address: "0xpayer".to_string(),
                to_address: "0xpayee".to_string(),
                scheme: Scheme::Exact,
                status: PaymentStatus::Pending,
                version: 0,
                created_at: now,
                expires_at: now + chrono::Duration::minutes(15),
                verified_at: None,
                settled_at: None,
                cancelled_at: None,
                failed_at: None,
                signature: None,
                transaction_hash: None,
                settlement: None,
                cancel_reason: None,
                failure_reason: None,
                failure_code: None,
                metadata: HashMap::new(),
            }
        }

        #[tokio::test]
        async fn test_redis_compare_and_swap() {
            let Some(repo) = connect().await else { return };

            repo.insert(request("r1")).await.unwrap();
            let snapshot = repo.get("r1").await.unwrap().unwrap();

            let mut settling = snapshot.clone();
            settling.status = PaymentStatus::Settling;
            assert!(repo.compare_and_swap(settling, 0).await.unwrap());

            let mut cancelled = snapshot;
            cancelled.status = PaymentStatus::Cancelled;
            assert!(!repo.compare_and_swap(cancelled, 0).await.unwrap());

            let stored = repo.get("r1").await.unwrap().unwrap();
            assert_eq!(stored.status, PaymentStatus::Settling);
            assert_eq!(stored.version, 1);

            assert!(repo
                .list_by_status(PaymentStatus::Pending)
                .await
                .unwrap()
                .is_empty());
            assert_eq!(
                repo.list_by_status(PaymentStatus::Settling)
                    .await
                    .unwrap()
                    .len(),
                1
            );
        }
    }
}
