// src/worker.rs
//! Lifecycle-managed ingestion loop: tick → STH → range compute → fetch →
//! parse → match → persist → advance state.

use std::cmp::{max, min};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::ct_log::{LogClient, RawEntry};
use crate::database::StateStore;
use crate::leaf_parser;
use crate::matcher::match_certificate;
use crate::types::{MatchedCertificate, MonitorProgress};

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle conflicts and persistence failures reported by `start`/`stop`.
#[derive(Debug)]
pub enum WorkerError {
    AlreadyRunning,
    NotRunning,
    /// A `StateStore` write needed to complete the lifecycle transition
    /// failed. Distinct from `AlreadyRunning`/`NotRunning`: the caller must
    /// not assume the worker ended up in the requested state.
    Persistence(anyhow::Error),
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerError::AlreadyRunning => write!(f, "worker is already running"),
            WorkerError::NotRunning => write!(f, "worker is not running"),
            WorkerError::Persistence(e) => write!(f, "persistence failure: {e:#}"),
        }
    }
}

impl std::error::Error for WorkerError {}

/// Tunables from `ct_log.*` config section (see `config` module).
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub poll_interval_secs: u64,
    pub batch_size: u64,
    pub reprocess_on_idle: bool,
}

/// The most recent fetched-but-not-yet-advanced batch, kept only for the
/// process's own lifetime so re-match mode can recompute matches against it
/// without re-fetching. Not behind a `Mutex`: only the worker's own spawned
/// task ever touches it.
type RecentBatch = (u64, Vec<RawEntry>);

/// Composes `LogClient`, `StateStore`, `LeafParser` and `Matcher` into the
/// single-worker polling loop described by the ingestion engine design.
pub struct IngestionWorker {
    log_client: Arc<dyn LogClient>,
    store: Arc<dyn StateStore>,
    config: WorkerConfig,
    handle: Mutex<Option<watch::Sender<bool>>>,
    running: Arc<AtomicBool>,
}

impl IngestionWorker {
    pub fn new(log_client: Arc<dyn LogClient>, store: Arc<dyn StateStore>, config: WorkerConfig) -> Self {
        Self {
            log_client,
            store,
            config,
            handle: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cheap, synchronous: reads the `AtomicBool` mirror rather than the DB.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Starts the background loop. The cancellation channel created here is
    /// independent of whatever task calls `start()`; dropping that caller's
    /// future must not stop the worker (see supervisor task below).
    pub async fn start(self: &Arc<Self>) -> Result<(), WorkerError> {
        let mut guard = self.handle.lock().await;
        if guard.is_some() {
            return Err(WorkerError::AlreadyRunning);
        }

        let (tx, rx) = watch::channel(false);

        if let Err(e) = self.store.set_running(true).await {
            error!("failed to persist is_running=true: {e:#}");
            return Err(WorkerError::Persistence(e));
        }

        *guard = Some(tx);
        self.running.store(true, Ordering::SeqCst);
        drop(guard);

        let worker = Arc::clone(self);
        let loop_handle = tokio::spawn(async move {
            worker.run_loop(rx).await;
        });

        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            supervisor.supervise(loop_handle).await;
        });

        info!("ingestion worker started");
        Ok(())
    }

    /// Runs exactly one tick without touching the lifecycle state (no
    /// `is_running` flip, no spawned loop/supervisor). For the CLI's
    /// `--once` debug mode.
    pub async fn run_once(&self) -> Result<()> {
        let mut cache = None;
        self.process_batch(&mut cache).await
    }

    /// Awaits the loop's `JoinHandle`; on panic, recovers state instead of
    /// letting the panic propagate further (tokio already isolated it to
    /// this one task — the process itself never aborts).
    async fn supervise(self: Arc<Self>, loop_handle: tokio::task::JoinHandle<()>) {
        if let Err(join_err) = loop_handle.await {
            if join_err.is_panic() {
                let payload = join_err.into_panic();
                let message = panic_message(&payload);
                error!("ingestion worker panicked: {message}");

                self.running.store(false, Ordering::SeqCst);
                *self.handle.lock().await = None;

                let _ = tokio::time::timeout(STOP_TIMEOUT, self.store.set_running(false)).await;
                let _ = tokio::time::timeout(
                    STOP_TIMEOUT,
                    self.store.set_last_error(&format!("panic: {message}")),
                )
                .await;
            } else {
                warn!("ingestion worker task was cancelled without panicking");
            }
        }
    }

    /// Stops the worker, tolerating cancellation of the caller itself: the
    /// persistence write runs under its own bounded timeout.
    pub async fn stop(&self) -> Result<(), WorkerError> {
        let mut guard = self.handle.lock().await;
        let Some(tx) = guard.take() else {
            return Err(WorkerError::NotRunning);
        };

        let _ = tx.send(true);
        self.running.store(false, Ordering::SeqCst);
        drop(guard);

        match tokio::time::timeout(STOP_TIMEOUT, self.store.set_running(false)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("failed to persist is_running=false on stop: {e:#}");
                return Err(WorkerError::Persistence(e));
            }
            Err(_) => {
                warn!("timed out persisting is_running=false on stop");
                return Err(WorkerError::Persistence(anyhow::anyhow!(
                    "timed out persisting is_running=false within {STOP_TIMEOUT:?}"
                )));
            }
        }

        info!("ingestion worker stopped");
        Ok(())
    }

    async fn run_loop(self: Arc<Self>, mut cancel_rx: watch::Receiver<bool>) {
        let mut recent_batch: Option<RecentBatch> = None;
        let period = Duration::from_secs(self.config.poll_interval_secs);

        loop {
            if *cancel_rx.borrow() {
                break;
            }

            // Race the tick itself against cancellation, not just the
            // inter-tick sleep: cancellation must cause a call already in
            // flight (get_sth/get_entries/store write) to return promptly,
            // so dropping the `process_batch` branch here drops whatever
            // future it was polling underneath.
            tokio::select! {
                result = self.process_batch(&mut recent_batch) => {
                    if let Err(e) = result {
                        error!("process_batch failed: {e:#}");
                    }
                }
                _ = cancel_rx.changed() => {
                    if *cancel_rx.borrow() {
                        debug!("cancellation received mid-tick, aborting in-flight batch");
                        break;
                    }
                }
            }

            if *cancel_rx.borrow() {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(period) => {},
                _ = cancel_rx.changed() => {
                    if *cancel_rx.borrow() {
                        break;
                    }
                }
            }
        }

        debug!("ingestion worker loop exiting");
    }

    /// One tick of the algorithm described in the ingestion design: fetch
    /// STH, compute the range of unseen entries, fetch/parse/match/persist,
    /// and advance (or, in the caught-up case, refresh) progress.
    async fn process_batch(&self, recent_batch: &mut Option<RecentBatch>) -> Result<()> {
        let sth = match self.log_client.get_sth().await {
            Ok(sth) => sth,
            Err(e) => {
                self.fail(&format!("get_sth: {e:#}")).await;
                return Ok(());
            }
        };

        let prog = match self.store.get_progress().await {
            Ok(p) => p,
            Err(e) => {
                self.fail(&format!("get_progress: {e:#}")).await;
                return Ok(());
            }
        };

        let batch_size = self.config.batch_size;
        let mut start = prog.last_processed_index;
        if start == 0 {
            start = max(0, sth.tree_size as i64 - batch_size as i64) as u64;
        }

        let end = if sth.tree_size == 0 {
            0
        } else {
            min(start.saturating_add(batch_size).saturating_sub(1), sth.tree_size - 1)
        };

        let has_new = sth.tree_size > 0 && start <= end;

        if has_new {
            let entries = match self.log_client.get_entries(start, end).await {
                Ok(entries) => entries,
                Err(e) => {
                    self.fail(&format!("get_entries: {e:#}")).await;
                    return Ok(());
                }
            };

            *recent_batch = Some((start, entries.clone()));

            let keywords = match self.store.list_keywords().await {
                Ok(kws) => kws,
                Err(e) => {
                    self.fail(&format!("list_keywords: {e:#}")).await;
                    return Ok(());
                }
            };

            let (matches, parse_errors) = self.match_and_persist(&entries, start, &keywords).await;

            let advanced_to = start + entries.len() as u64;
            let updated = MonitorProgress {
                last_processed_index: advanced_to,
                last_tree_size: sth.tree_size,
                last_run_at: prog.last_run_at,
                total_processed: prog.total_processed + entries.len() as u64,
                certs_in_last_cycle: entries.len() as u64,
                matches_in_last_cycle: matches,
                parse_errors_in_last_cycle: parse_errors,
                is_running: true,
                last_error: String::new(),
                updated_at: prog.updated_at,
            };

            if let Err(e) = self.store.update_progress(&updated).await {
                self.fail(&format!("update_progress: {e:#}")).await;
                return Ok(());
            }
        } else if self.config.reprocess_on_idle {
            self.rematch_recent(recent_batch, &prog, start, batch_size)
                .await?;
        } else {
            // Skip mode: refresh tree size/timestamps only, leave
            // certs_in_last_cycle and matches_in_last_cycle as they were.
            let updated = MonitorProgress {
                last_tree_size: sth.tree_size,
                ..prog
            };
            if let Err(e) = self.store.update_progress(&updated).await {
                self.fail(&format!("update_progress: {e:#}")).await;
                return Ok(());
            }
        }

        let _ = self.store.set_last_error("").await;
        Ok(())
    }

    /// Re-match mode: recompute matches against the cached (or re-fetched)
    /// previous window without advancing `last_processed_index`.
    async fn rematch_recent(
        &self,
        recent_batch: &mut Option<RecentBatch>,
        prog: &MonitorProgress,
        start: u64,
        batch_size: u64,
    ) -> Result<()> {
        let (batch_start, entries) = match recent_batch.clone() {
            Some(cached) => cached,
            None => {
                let window_start = max(0, start as i64 - batch_size as i64) as u64;
                let window_end = start.saturating_sub(1);
                if window_start > window_end {
                    (window_start, Vec::new())
                } else {
                    match self.log_client.get_entries(window_start, window_end).await {
                        Ok(entries) => (window_start, entries),
                        Err(e) => {
                            self.fail(&format!("get_entries: {e:#}")).await;
                            return Ok(());
                        }
                    }
                }
            }
        };

        let keywords = match self.store.list_keywords().await {
            Ok(kws) => kws,
            Err(e) => {
                self.fail(&format!("list_keywords: {e:#}")).await;
                return Ok(());
            }
        };

        let (matches, parse_errors) = self.match_and_persist(&entries, batch_start, &keywords).await;

        let updated = MonitorProgress {
            certs_in_last_cycle: entries.len() as u64,
            matches_in_last_cycle: matches,
            parse_errors_in_last_cycle: parse_errors,
            ..prog.clone()
        };

        if let Err(e) = self.store.update_progress(&updated).await {
            self.fail(&format!("update_progress: {e:#}")).await;
        }

        Ok(())
    }

    /// Parses and matches each entry in order, persisting matches as they
    /// are found. Parse failures are counted, not fatal to the batch.
    async fn match_and_persist(
        &self,
        entries: &[RawEntry],
        batch_start: u64,
        keywords: &[crate::types::Keyword],
    ) -> (u64, u64) {
        let mut matches = 0u64;
        let mut parse_errors = 0u64;

        for (i, entry) in entries.iter().enumerate() {
            let parsed = match leaf_parser::parse(&entry.leaf_input, &entry.extra_data) {
                Ok(p) => p,
                Err(e) => {
                    debug!("leaf parse error at index {}: {e}", batch_start + i as u64);
                    parse_errors += 1;
                    continue;
                }
            };

            if keywords.is_empty() {
                continue;
            }

            for (keyword_id, matched_domain) in match_certificate(&parsed, keywords) {
                let ct_log_index = batch_start + i as u64;
                let record =
                    MatchedCertificate::from_parsed(&parsed, keyword_id, matched_domain, ct_log_index);

                match self.store.insert_match(&record).await {
                    Ok(()) => matches += 1,
                    Err(e) => warn!("failed to persist match: {e:#}"),
                }
            }
        }

        (matches, parse_errors)
    }

    async fn fail(&self, message: &str) {
        error!("{message}");
        if let Err(e) = self.store.set_last_error(message).await {
            warn!("failed to persist last_error: {e:#}");
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Mutex as AsyncMutex;

    use crate::ct_log::SignedTreeHead;
    use crate::types::{Keyword, MatchQuery, MatchRecord};

    struct FakeLogClient {
        sth: StdMutex<SignedTreeHead>,
        entries: StdMutex<Vec<RawEntry>>,
    }

    #[async_trait]
    impl LogClient for FakeLogClient {
        async fn get_sth(&self) -> Result<SignedTreeHead> {
            Ok(self.sth.lock().unwrap().clone())
        }

        /// Pretends its stored entries span exactly `[start, start + len)`
        /// for whatever `start` the test scenario requests, rather than
        /// modelling a fixed absolute log range.
        async fn get_entries(&self, start: u64, end: u64) -> Result<Vec<RawEntry>> {
            let all = self.entries.lock().unwrap();
            if start > end {
                return Ok(Vec::new());
            }
            let count = ((end - start + 1) as usize).min(all.len());
            Ok(all[..count].to_vec())
        }
    }

    struct FakeStateStore {
        keywords: AsyncMutex<Vec<Keyword>>,
        matches: AsyncMutex<Vec<MatchRecord>>,
        progress: AsyncMutex<MonitorProgress>,
    }

    impl FakeStateStore {
        fn new() -> Self {
            Self {
                keywords: AsyncMutex::new(Vec::new()),
                matches: AsyncMutex::new(Vec::new()),
                progress: AsyncMutex::new(MonitorProgress::fresh()),
            }
        }
    }

    #[async_trait]
    impl StateStore for FakeStateStore {
        async fn list_keywords(&self) -> Result<Vec<Keyword>> {
            Ok(self.keywords.lock().await.clone())
        }

        async fn insert_match(&self, cert: &MatchedCertificate) -> Result<()> {
            let mut matches = self.matches.lock().await;
            if matches
                .iter()
                .any(|m| m.cert.serial == cert.serial && m.cert.keyword_id == cert.keyword_id)
            {
                return Ok(());
            }
            matches.push(MatchRecord {
                id: matches.len() as i64 + 1,
                cert: cert.clone(),
                discovered_at: Utc::now(),
            });
            Ok(())
        }

        async fn get_progress(&self) -> Result<MonitorProgress> {
            Ok(self.progress.lock().await.clone())
        }

        async fn update_progress(&self, progress: &MonitorProgress) -> Result<()> {
            *self.progress.lock().await = progress.clone();
            Ok(())
        }

        async fn set_running(&self, running: bool) -> Result<()> {
            self.progress.lock().await.is_running = running;
            Ok(())
        }

        async fn set_last_error(&self, message: &str) -> Result<()> {
            self.progress.lock().await.last_error = message.to_string();
            Ok(())
        }

        async fn reset_running_flag(&self) -> Result<()> {
            self.progress.lock().await.is_running = false;
            Ok(())
        }

        async fn insert_keyword(&self, value: &str) -> Result<Keyword> {
            let mut keywords = self.keywords.lock().await;
            let kw = Keyword {
                id: keywords.len() as i64 + 1,
                value: value.to_string(),
                created_at: Utc::now(),
            };
            keywords.push(kw.clone());
            Ok(kw)
        }

        async fn delete_keyword(&self, id: i64) -> Result<()> {
            self.keywords.lock().await.retain(|k| k.id != id);
            Ok(())
        }

        async fn list_matches(&self, _query: &MatchQuery) -> Result<Vec<MatchRecord>> {
            Ok(self.matches.lock().await.clone())
        }
    }

    /// A syntactically invalid leaf: exercises range/progress bookkeeping
    /// without needing a real signed certificate fixture. CN/SAN matching
    /// itself is covered by `leaf_parser`'s and `matcher`'s own tests.
    fn unparseable_entry() -> RawEntry {
        RawEntry {
            leaf_input: Vec::new(),
            extra_data: Vec::new(),
        }
    }

    fn config(batch_size: u64, reprocess_on_idle: bool) -> WorkerConfig {
        WorkerConfig {
            poll_interval_secs: 60,
            batch_size,
            reprocess_on_idle,
        }
    }

    /// DER bytes of a real self-signed certificate with CN=example.com and
    /// no SANs, used to exercise re-match mode against an entry that
    /// actually parses (plain byte fixtures can't: leaf_parser needs valid
    /// DER to extract a CN to match against).
    const EXAMPLE_COM_CERT_DER_HEX: &str = "3082030d308201f5a00302010202141f3634a333c966aae92af5b9bcfbbed4aee78ada300d06092a864886f70d01010b050030163114301206035504030c0b6578616d706c652e636f6d301e170d3236303732373132303434345a170d3336303732343132303434345a30163114301206035504030c0b6578616d706c652e636f6d30820122300d06092a864886f70d01010105000382010f003082010a0282010100b5ff0d6ecfaf8877946177b553ff7d42f02842e5f1d83290c9e8cc07af2549727ae79c2fc6caef1d0e1ff7902073b61643718c951c2ccd6352c3049b6847100ae3812afea5df3b9a1f05da7a418b546cd842aa0b805800da0328c705f92c4d91e3ac3887ca5b64e4f7269fed25b4159496a04e7c072801f48a8849ef1b404c3b9fdd38dfcc522319cad33316620337f0a4538d14ca9ed155230211a3b2b96b55be98d9c52195db7d3038c403ec7cfc7d884d237f504d04e343dd76bd3460e1b4bfd7bb59b45a09e17a32e856996ea43dbc0d082d56c0d1c9189e5782c5a8289ee0f8813d258866e02dc1edef4e452611b56c5416f1e19ff3c6f453a297f500010203010001a3533051301d0603551d0e0416041497f0153c6a39d907ef0969bcf161644e592a7b6e301f0603551d2304183016801497f0153c6a39d907ef0969bcf161644e592a7b6e300f0603551d130101ff040530030101ff300d06092a864886f70d01010b050003820101001f6dd61aad09c0197e6ba7e53b7a5622b95f45596a8e936a20bf6b5fa636c8590c3c81006d3d2c309aadee283d31d00abcdac5b9312370fe836d48a2a94bd97e1e28ae473016878a9e51797ce2e74a8ef47e9848a6ec6c79480555d61131a204a7ced33b4c60e388fd9f9fc6231949f1936b906d286a692ccd17fbb57a29257301a7ea3e68e3e588f42eed671771f7d887715033e113528434bcb001eb8f6f1de99ca0a413b7ed91fbbeb3c1d95b500d4e75f5872388563dc320cec8b564b2e8d7d6066afc04c7831c24864b4bcce58404c5a2a49280e168a8f3766db5ce5b389b0886561f4762606c860c7d850adb78eaf43569fecda1570da2e94e0f929771";

    /// Wraps `der` in a minimal RFC 6962 x509_entry `leaf_input`: version=0,
    /// leaf_type=0, an arbitrary timestamp, entry_type=0, a 24-bit length,
    /// then the DER bytes. `extra_data` is unused for x509_entry.
    fn x509_leaf_entry(der: &[u8]) -> RawEntry {
        let mut leaf_input = vec![0u8; 15];
        leaf_input[1] = 0; // leaf_type: timestamped_entry
        leaf_input[2..10].copy_from_slice(&1_700_000_000_000u64.to_be_bytes());
        leaf_input[10..12].copy_from_slice(&0u16.to_be_bytes()); // entry_type: x509_entry
        let len = der.len();
        leaf_input[12] = (len >> 16) as u8;
        leaf_input[13] = (len >> 8) as u8;
        leaf_input[14] = len as u8;
        leaf_input.extend_from_slice(der);

        RawEntry {
            leaf_input,
            extra_data: Vec::new(),
        }
    }

    fn example_com_entry() -> RawEntry {
        let der = hex::decode(EXAMPLE_COM_CERT_DER_HEX).expect("valid fixture hex");
        x509_leaf_entry(&der)
    }

    #[tokio::test]
    async fn first_run_starts_near_tree_head() {
        let log = FakeLogClient {
            sth: StdMutex::new(SignedTreeHead {
                tree_size: 1000,
                timestamp: 0,
                sha256_root_hash: String::new(),
            }),
            entries: StdMutex::new(vec![unparseable_entry(); 50]),
        };
        let store = FakeStateStore::new();

        let worker = IngestionWorker {
            log_client: Arc::new(log),
            store: Arc::new(store),
            config: config(50, false),
            handle: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
        };

        let mut cache = None;
        worker.process_batch(&mut cache).await.unwrap();

        let prog = worker.store.get_progress().await.unwrap();
        assert_eq!(prog.last_processed_index, 1000);
        assert_eq!(prog.certs_in_last_cycle, 50);
        assert_eq!(prog.parse_errors_in_last_cycle, 50);
    }

    #[tokio::test]
    async fn skip_mode_leaves_progress_untouched_when_caught_up() {
        let log = FakeLogClient {
            sth: StdMutex::new(SignedTreeHead {
                tree_size: 10,
                timestamp: 0,
                sha256_root_hash: String::new(),
            }),
            entries: StdMutex::new(Vec::new()),
        };
        let store = FakeStateStore::new();
        store.progress.lock().await.last_processed_index = 10;
        store.progress.lock().await.matches_in_last_cycle = 3;

        let worker = IngestionWorker {
            log_client: Arc::new(log),
            store: Arc::new(store),
            config: config(50, false),
            handle: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
        };

        let mut cache = None;
        worker.process_batch(&mut cache).await.unwrap();

        let prog = worker.store.get_progress().await.unwrap();
        assert_eq!(prog.last_processed_index, 10);
        assert_eq!(prog.matches_in_last_cycle, 3, "skip mode must not zero out prior matches");
    }

    #[tokio::test]
    async fn start_refuses_when_already_running() {
        let log = FakeLogClient {
            sth: StdMutex::new(SignedTreeHead {
                tree_size: 0,
                timestamp: 0,
                sha256_root_hash: String::new(),
            }),
            entries: StdMutex::new(Vec::new()),
        };
        let worker = Arc::new(IngestionWorker::new(
            Arc::new(log),
            Arc::new(FakeStateStore::new()),
            config(50, false),
        ));

        worker.start().await.unwrap();
        let err = worker.start().await.unwrap_err();
        assert!(matches!(err, WorkerError::AlreadyRunning));
        worker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_without_start_reports_not_running() {
        let log = FakeLogClient {
            sth: StdMutex::new(SignedTreeHead {
                tree_size: 0,
                timestamp: 0,
                sha256_root_hash: String::new(),
            }),
            entries: StdMutex::new(Vec::new()),
        };
        let worker = IngestionWorker::new(
            Arc::new(log),
            Arc::new(FakeStateStore::new()),
            config(50, false),
        );

        let err = worker.stop().await.unwrap_err();
        assert!(matches!(err, WorkerError::NotRunning));
    }

    #[tokio::test]
    async fn start_then_stop_reports_running_in_between() {
        let log = FakeLogClient {
            sth: StdMutex::new(SignedTreeHead {
                tree_size: 0,
                timestamp: 0,
                sha256_root_hash: String::new(),
            }),
            entries: StdMutex::new(Vec::new()),
        };
        let worker = Arc::new(IngestionWorker::new(
            Arc::new(log),
            Arc::new(FakeStateStore::new()),
            config(50, false),
        ));

        assert!(!worker.is_running());
        worker.start().await.unwrap();
        assert!(worker.is_running());
        worker.stop().await.unwrap();
        assert!(!worker.is_running());
    }

    /// Scenario 6: a keyword added after a cert was already ingested must
    /// produce a match on the next idle tick, via the in-memory cache of
    /// the most recently fetched batch, without advancing
    /// `last_processed_index`.
    #[tokio::test]
    async fn rematch_mode_cache_hit_matches_keyword_added_after_first_tick() {
        let log = FakeLogClient {
            sth: StdMutex::new(SignedTreeHead {
                tree_size: 1,
                timestamp: 0,
                sha256_root_hash: String::new(),
            }),
            entries: StdMutex::new(vec![example_com_entry()]),
        };
        let store = FakeStateStore::new();

        let worker = IngestionWorker {
            log_client: Arc::new(log),
            store: Arc::new(store),
            config: config(10, true),
            handle: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
        };

        let mut cache = None;
        worker.process_batch(&mut cache).await.unwrap();

        let prog = worker.store.get_progress().await.unwrap();
        assert_eq!(prog.last_processed_index, 1);
        assert!(worker
            .store
            .list_matches(&MatchQuery::first_page())
            .await
            .unwrap()
            .is_empty());
        assert!(cache.is_some(), "the fetched batch must be cached for re-match mode");

        worker.store.insert_keyword("example").await.unwrap();

        worker.process_batch(&mut cache).await.unwrap();

        let prog = worker.store.get_progress().await.unwrap();
        assert_eq!(
            prog.last_processed_index, 1,
            "re-match mode must not advance last_processed_index"
        );
        assert_eq!(prog.matches_in_last_cycle, 1);

        let matches = worker
            .store
            .list_matches(&MatchQuery::first_page())
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].cert.matched_domain, "example.com");
    }

    /// Same scenario, but after a simulated restart: no in-memory cache
    /// survives, so re-match mode must fall back to re-fetching the
    /// previous window `[last_processed_index - batch_size, last_processed_index - 1]`
    /// from the log instead.
    #[tokio::test]
    async fn rematch_mode_cache_miss_refetches_previous_window() {
        let log = FakeLogClient {
            sth: StdMutex::new(SignedTreeHead {
                tree_size: 5,
                timestamp: 0,
                sha256_root_hash: String::new(),
            }),
            entries: StdMutex::new(vec![example_com_entry()]),
        };
        let store = FakeStateStore::new();
        store.progress.lock().await.last_processed_index = 5;
        store.insert_keyword("example").await.unwrap();

        let worker = IngestionWorker {
            log_client: Arc::new(log),
            store: Arc::new(store),
            config: config(10, true),
            handle: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
        };

        // No prior batch cached: this tick must re-fetch from the log.
        let mut cache = None;
        worker.process_batch(&mut cache).await.unwrap();

        let prog = worker.store.get_progress().await.unwrap();
        assert_eq!(
            prog.last_processed_index, 5,
            "re-match mode must not advance last_processed_index on a cache-miss refetch"
        );
        assert_eq!(prog.matches_in_last_cycle, 1);

        let matches = worker
            .store
            .list_matches(&MatchQuery::first_page())
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].cert.matched_domain, "example.com");
    }
}
