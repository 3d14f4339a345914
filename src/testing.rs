// ============================================================================
// Test Doubles
// ============================================================================
//
// In-memory implementations of the capability traits, shared by the unit
// tests of the service, ingestion and instrumentation modules.
//
// ============================================================================

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use crate::domain::order::Order;
use crate::messaging::{DeadLetterError, DeadLetterSink, InboundRecord, RecordSource, SourceError};
use crate::metrics::Reporter;
use crate::store::{OrderStore, StoreError, StoreResult};

type ErrorFactory = Box<dyn Fn() -> StoreError + Send + Sync>;

/// HashMap-backed store that counts calls and can be told to fail creates
/// or the loads of chosen orders.
pub struct FakeStore {
    orders: Mutex<HashMap<Uuid, Order>>,
    broken_loads: Mutex<HashSet<Uuid>>,
    create_calls: AtomicUsize,
    get_calls: AtomicUsize,
    create_failures_left: AtomicUsize,
    create_error: Mutex<Option<ErrorFactory>>,
    ping_ok: AtomicBool,
}

impl Default for FakeStore {
    fn default() -> Self {
        Self {
            orders: Mutex::new(HashMap::new()),
            broken_loads: Mutex::new(HashSet::new()),
            create_calls: AtomicUsize::new(0),
            get_calls: AtomicUsize::new(0),
            create_failures_left: AtomicUsize::new(0),
            create_error: Mutex::new(None),
            ping_ok: AtomicBool::new(true),
        }
    }
}

impl FakeStore {
    pub fn insert(&self, order: Order) {
        self.orders.lock().unwrap().insert(order.id, order);
    }

    pub fn len(&self) -> usize {
        self.orders.lock().unwrap().len()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.orders.lock().unwrap().contains_key(&id)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    /// Every create fails with the error `make` builds.
    pub fn fail_creates_with(&self, make: impl Fn() -> StoreError + Send + Sync + 'static) {
        self.fail_next_creates(usize::MAX, make);
    }

    /// The next `count` creates fail, later ones succeed.
    pub fn fail_next_creates(&self, count: usize, make: impl Fn() -> StoreError + Send + Sync + 'static) {
        *self.create_error.lock().unwrap() = Some(Box::new(make));
        self.create_failures_left.store(count, Ordering::SeqCst);
    }

    /// Loading `id` fails with a database error, by id or in the recent scan.
    pub fn fail_loads_of(&self, id: Uuid) {
        self.broken_loads.lock().unwrap().insert(id);
    }

    pub fn set_ping_ok(&self, ok: bool) {
        self.ping_ok.store(ok, Ordering::SeqCst);
    }

    fn take_create_failure(&self) -> Option<StoreError> {
        let left = self.create_failures_left.load(Ordering::SeqCst);
        if left == 0 {
            return None;
        }
        if left != usize::MAX {
            self.create_failures_left.store(left - 1, Ordering::SeqCst);
        }
        self.create_error.lock().unwrap().as_ref().map(|make| make())
    }

    fn load(&self, id: Uuid) -> StoreResult<Order> {
        if self.broken_loads.lock().unwrap().contains(&id) {
            return Err(StoreError::database("query order")(sqlx::Error::PoolTimedOut));
        }
        self.orders
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }
}

#[async_trait]
impl OrderStore for FakeStore {
    async fn create(&self, order: &Order) -> StoreResult<()> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.take_create_failure() {
            return Err(err);
        }
        self.orders.lock().unwrap().entry(order.id).or_insert_with(|| order.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Order> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.load(id)
    }

    async fn get_all_last_24_hours(&self) -> StoreResult<Vec<Order>> {
        let ids: Vec<Uuid> = self.orders.lock().unwrap().keys().copied().collect();
        Ok(ids.into_iter().filter_map(|id| self.load(id).ok()).collect())
    }

    async fn ping(&self) -> StoreResult<()> {
        if self.ping_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::database("ping")(sqlx::Error::PoolClosed))
        }
    }
}

/// Reporter that keeps every call in memory.
#[derive(Default)]
pub struct RecordingReporter {
    results: Mutex<HashMap<String, u64>>,
    storage_ops: Mutex<HashMap<(String, String, String), u64>>,
    dlq_failures: AtomicUsize,
    up: Mutex<Option<bool>>,
    observations: AtomicUsize,
}

impl RecordingReporter {
    pub fn results(&self, kind: &str) -> u64 {
        self.results.lock().unwrap().get(kind).copied().unwrap_or(0)
    }

    pub fn storage_ops(&self, store: &str, op: &str, result: &str) -> u64 {
        let key = (store.to_string(), op.to_string(), result.to_string());
        self.storage_ops.lock().unwrap().get(&key).copied().unwrap_or(0)
    }

    pub fn dlq_failures(&self) -> usize {
        self.dlq_failures.load(Ordering::SeqCst)
    }

    pub fn up(&self) -> Option<bool> {
        *self.up.lock().unwrap()
    }

    pub fn observations(&self) -> usize {
        self.observations.load(Ordering::SeqCst)
    }
}

impl Reporter for RecordingReporter {
    fn inc_result(&self, kind: &str) {
        *self.results.lock().unwrap().entry(kind.to_string()).or_default() += 1;
    }

    fn inc_dlq_publish_failure(&self) {
        self.dlq_failures.fetch_add(1, Ordering::SeqCst);
    }

    fn inc_storage_op(&self, store: &str, op: &str, result: &str) {
        let key = (store.to_string(), op.to_string(), result.to_string());
        *self.storage_ops.lock().unwrap().entry(key).or_default() += 1;
    }

    fn set_up(&self, up: bool) {
        *self.up.lock().unwrap() = Some(up);
    }

    fn observe_processing(&self, _seconds: f64) {
        self.observations.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out queued batches, then waits forever like an idle topic.
#[derive(Default)]
pub struct FakeSource {
    batches: Mutex<VecDeque<Result<Vec<InboundRecord>, SourceError>>>,
    committed: Mutex<Vec<(i32, i64)>>,
    fetches: AtomicUsize,
}

impl FakeSource {
    pub fn with_batches(batches: Vec<Vec<InboundRecord>>) -> Self {
        let source = Self::default();
        source.batches.lock().unwrap().extend(batches.into_iter().map(Ok));
        source
    }

    pub fn push_error(&self, err: SourceError) {
        self.batches.lock().unwrap().push_back(Err(err));
    }

    pub fn push_batch(&self, batch: Vec<InboundRecord>) {
        self.batches.lock().unwrap().push_back(Ok(batch));
    }

    /// (partition, offset) of every committed record, in commit order.
    pub fn committed(&self) -> Vec<(i32, i64)> {
        self.committed.lock().unwrap().clone()
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordSource for FakeSource {
    async fn fetch(&self, max: usize) -> Result<Vec<InboundRecord>, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let next = self.batches.lock().unwrap().pop_front();
        match next {
            Some(Ok(mut batch)) => {
                batch.truncate(max);
                Ok(batch)
            }
            Some(Err(e)) => Err(e),
            None => std::future::pending().await,
        }
    }

    fn commit(&self, record: &InboundRecord) -> Result<(), SourceError> {
        self.committed.lock().unwrap().push((record.partition, record.offset));
        Ok(())
    }
}

/// Dead-letter sink that keeps what it was given.
#[derive(Default)]
pub struct RecordingDeadLetters {
    published: Mutex<Vec<(InboundRecord, String)>>,
    failing: AtomicBool,
}

impl RecordingDeadLetters {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<(InboundRecord, String)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeadLetterSink for RecordingDeadLetters {
    async fn publish(&self, record: &InboundRecord, cause: &str) -> Result<(), DeadLetterError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeadLetterError::Publish {
                topic: "orders-dlq".to_string(),
                source: rdkafka::error::KafkaError::Canceled,
            });
        }
        self.published.lock().unwrap().push((record.clone(), cause.to_string()));
        Ok(())
    }
}
