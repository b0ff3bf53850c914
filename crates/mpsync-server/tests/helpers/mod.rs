//! Test helpers for import integration tests
//!
//! In-memory stand-ins for the marketplace and the database:
//! - [`FakePager`]: serves a fixed list of orders, with scripted failures
//! - [`FakeFetcher`]: echoes records back, can fail or block on chosen ids
//! - [`FakeResolver`]: hands out scripted credentials
//! - [`FakeProvider`]: bundles the fakes into worker resources

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use mpsync_server::ingest::{
    AccountResolver, DetailedRecord, FetchError, ImportConfig, ImportOrchestrator, InMemorySink,
    InMemoryStore, ItemFetcher, JobId, JobRegistry, JobSnapshot, OwnerKey, Pacing, Pager,
    PersistOutcome, RawRecord, RecordSink, ResourceProvider, SourceAccount, WorkerResources,
};
use reqwest::StatusCode;
use serde_json::json;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

pub fn account(token: &str) -> SourceAccount {
    SourceAccount::new("123456", token)
}

pub fn owner() -> OwnerKey {
    OwnerKey::new(1, 10)
}

/// Config with no pacing so tests run at full speed
pub fn fast_config() -> ImportConfig {
    ImportConfig {
        batch_size: 50,
        pacing: Pacing::none(),
        ..ImportConfig::default()
    }
}

/// Orders with ids `1..=count`
pub fn orders(count: usize) -> Vec<RawRecord> {
    (1..=count as i64)
        .map(|id| RawRecord(json!({"id": id, "status": "paid", "total_amount": 10.0 * id as f64})))
        .collect()
}

/// One recorded page request
#[derive(Debug, Clone, PartialEq)]
pub struct PageCall {
    pub offset: u64,
    pub limit: u64,
    pub token: String,
}

#[derive(Default)]
struct PagerState {
    calls: Vec<PageCall>,
    failing: HashSet<u64>,
    unauthorized_once: HashSet<u64>,
    unauthorized_always: HashSet<u64>,
}

/// Pager over an in-memory order list
#[derive(Clone)]
pub struct FakePager {
    records: Arc<Vec<RawRecord>>,
    state: Arc<Mutex<PagerState>>,
    gate: Option<(u64, Gate)>,
}

impl FakePager {
    pub fn new(records: Vec<RawRecord>) -> Self {
        Self {
            records: Arc::new(records),
            state: Arc::default(),
            gate: None,
        }
    }

    /// Block the request at `offset` until `gate.release` is notified
    pub fn gated_at(mut self, offset: u64, gate: Gate) -> Self {
        self.gate = Some((offset, gate));
        self
    }

    /// Pages starting at `offset` fail with HTTP 503
    pub fn fail_at(self, offset: u64) -> Self {
        self.state.lock().unwrap().failing.insert(offset);
        self
    }

    /// The first request at `offset` is rejected as unauthorized
    pub fn unauthorized_once_at(self, offset: u64) -> Self {
        self.state.lock().unwrap().unauthorized_once.insert(offset);
        self
    }

    /// Every request at `offset` is rejected as unauthorized
    pub fn unauthorized_at(self, offset: u64) -> Self {
        self.state.lock().unwrap().unauthorized_always.insert(offset);
        self
    }

    pub fn calls(&self) -> Vec<PageCall> {
        self.state.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl Pager for FakePager {
    async fn fetch_page(
        &self,
        account: &SourceAccount,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<RawRecord>, FetchError> {
        {
            let mut state = self.state.lock().unwrap();
            state.calls.push(PageCall {
                offset,
                limit,
                token: account.access_token.clone(),
            });
            if state.unauthorized_always.contains(&offset) || state.unauthorized_once.remove(&offset)
            {
                return Err(FetchError::Unauthorized(StatusCode::UNAUTHORIZED));
            }
            if state.failing.contains(&offset) {
                return Err(FetchError::Status(StatusCode::SERVICE_UNAVAILABLE));
            }
        }

        if let Some((gated_offset, gate)) = &self.gate {
            if *gated_offset == offset {
                gate.reached.notify_one();
                gate.release.notified().await;
            }
        }

        let start = (offset as usize).min(self.records.len());
        let end = (start + limit as usize).min(self.records.len());
        Ok(self.records[start..end].to_vec())
    }
}

/// Gate that holds the fetcher on one order until released
#[derive(Clone, Default)]
pub struct Gate {
    pub reached: Arc<Notify>,
    pub release: Arc<Notify>,
}

/// Fetcher that passes records through unchanged
#[derive(Clone, Default)]
pub struct FakeFetcher {
    failing: Arc<HashSet<i64>>,
    gate: Option<(i64, Gate)>,
    fetched: Arc<AtomicUsize>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.failing = Arc::new(ids.into_iter().collect());
        self
    }

    /// Block when order `id` is fetched until `gate.release` is notified
    pub fn gated(mut self, id: i64, gate: Gate) -> Self {
        self.gate = Some((id, gate));
        self
    }

    pub fn fetched(&self) -> usize {
        self.fetched.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ItemFetcher for FakeFetcher {
    async fn fetch(&self, _account: &SourceAccount, raw: &RawRecord) -> Result<DetailedRecord> {
        self.fetched.fetch_add(1, Ordering::SeqCst);
        let id = raw.external_id().ok_or_else(|| anyhow!("record without id"))?;

        if let Some((gated_id, gate)) = &self.gate {
            if *gated_id == id {
                gate.reached.notify_one();
                gate.release.notified().await;
            }
        }

        if self.failing.contains(&id) {
            return Err(anyhow!("order {id} returned HTTP 500"));
        }
        Ok(DetailedRecord::new(id, raw.0.clone()))
    }
}

/// Resolver that replays scripted answers, repeating the last one
#[derive(Clone)]
pub struct FakeResolver {
    answers: Arc<Mutex<VecDeque<Option<SourceAccount>>>>,
    calls: Arc<AtomicUsize>,
}

impl FakeResolver {
    pub fn new(answers: Vec<Option<SourceAccount>>) -> Self {
        Self {
            answers: Arc::new(Mutex::new(answers.into())),
            calls: Arc::default(),
        }
    }

    pub fn valid() -> Self {
        Self::new(vec![Some(account("token-1"))])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AccountResolver for FakeResolver {
    async fn resolve(&self, _owner: &OwnerKey) -> Result<Option<SourceAccount>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut answers = self.answers.lock().unwrap();
        if answers.len() > 1 {
            Ok(answers.pop_front().flatten())
        } else {
            Ok(answers.front().cloned().flatten())
        }
    }
}

/// In-memory sink whose commits fail for the chosen batch numbers (1-based)
///
/// A failed commit drops the staged batch, like a rolled back transaction.
pub struct FlakySink {
    inner: InMemorySink,
    store: InMemoryStore,
    failing_commits: HashSet<usize>,
    commits: usize,
}

#[async_trait]
impl RecordSink for FlakySink {
    async fn persist(&mut self, record: &DetailedRecord, owner: &OwnerKey) -> Result<PersistOutcome> {
        self.inner.persist(record, owner).await
    }

    async fn commit_batch(&mut self) -> Result<()> {
        self.commits += 1;
        if self.failing_commits.contains(&self.commits) {
            self.inner = InMemorySink::new(self.store.clone());
            return Err(anyhow!("connection reset during commit"));
        }
        self.inner.commit_batch().await
    }
}

/// Provider building worker resources from the fakes
#[derive(Clone)]
pub struct FakeProvider {
    pub pager: FakePager,
    pub fetcher: FakeFetcher,
    pub resolver: FakeResolver,
    pub store: InMemoryStore,
    pub failing_commits: HashSet<usize>,
    pub fail_open: bool,
}

impl FakeProvider {
    pub fn new(pager: FakePager) -> Self {
        Self {
            pager,
            fetcher: FakeFetcher::new(),
            resolver: FakeResolver::valid(),
            store: InMemoryStore::new(),
            failing_commits: HashSet::new(),
            fail_open: false,
        }
    }

    pub fn with_fetcher(mut self, fetcher: FakeFetcher) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_resolver(mut self, resolver: FakeResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_failing_commits(mut self, batches: impl IntoIterator<Item = usize>) -> Self {
        self.failing_commits = batches.into_iter().collect();
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }
}

#[async_trait]
impl ResourceProvider for FakeProvider {
    async fn open(&self, _owner: &OwnerKey) -> Result<WorkerResources> {
        if self.fail_open {
            return Err(anyhow!("database unreachable"));
        }
        Ok(WorkerResources {
            accounts: Box::new(self.resolver.clone()),
            pager: Box::new(self.pager.clone()),
            fetcher: Box::new(self.fetcher.clone()),
            sink: Box::new(FlakySink {
                inner: InMemorySink::new(self.store.clone()),
                store: self.store.clone(),
                failing_commits: self.failing_commits.clone(),
                commits: 0,
            }),
        })
    }
}

pub fn orchestrator(provider: &FakeProvider, config: ImportConfig) -> ImportOrchestrator {
    ImportOrchestrator::new(Arc::new(JobRegistry::new()), Arc::new(provider.clone()), config)
}

/// Poll until the job leaves `running`
pub async fn wait_for_terminal(orchestrator: &ImportOrchestrator, id: JobId) -> JobSnapshot {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(job) = orchestrator.get_status(id) {
                if job.status.is_terminal() {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("job did not finish in time")
}
