//! StateStore — redb-backed history and policy persistence.
//!
//! Provides typed operations over reports, per-target detail rows, repair
//! actions and policies. All values are JSON-serialized into redb's
//! `&[u8]` value columns. The store supports both on-disk and in-memory
//! backends (the latter for testing).
//!
//! redb admits a single writer at a time and serves readers from MVCC
//! snapshots, so concurrent trend queries never block the cycle writer and
//! two writers never interleave on the same row.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use redb::{
    Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, StorageBackend,
    WriteTransaction,
};
use tracing::debug;

use sentinel_core::epoch_millis;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Rows removed by a retention sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupStats {
    pub reports: u64,
    pub details: u64,
    pub repairs: u64,
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let store = Self::open_with_backend(redb::backends::InMemoryBackend::new())?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Open a store over a caller-supplied redb storage backend.
    pub fn open_with_backend(backend: impl StorageBackend) -> StateResult<Self> {
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(REPORTS).map_err(map_err!(Table))?;
        txn.open_table(DETAILS).map_err(map_err!(Table))?;
        txn.open_table(REPAIRS).map_err(map_err!(Table))?;
        txn.open_table(POLICIES).map_err(map_err!(Table))?;
        txn.open_table(META).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Reports ────────────────────────────────────────────────────

    /// Persist a report and its per-target detail rows. Returns the new id.
    pub fn store_report(&self, report: &Report) -> StateResult<ReportId> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let id;
        let mut rows = 0usize;
        {
            let mut reports = txn.open_table(REPORTS).map_err(map_err!(Table))?;
            let floor = {
                let last = reports.last().map_err(map_err!(Read))?;
                last.map(|(k, _)| k.value() + 1).unwrap_or(1)
            };
            id = allocate_id(&txn, NEXT_REPORT_ID, floor)?;
            let stored = StoredReport {
                id,
                report: report.clone(),
            };
            let value = serde_json::to_vec(&stored).map_err(map_err!(Serialize))?;
            reports
                .insert(id, value.as_slice())
                .map_err(map_err!(Write))?;

            let mut details = txn.open_table(DETAILS).map_err(map_err!(Table))?;
            for result in &report.results {
                for observation in &result.targets {
                    let row = DetailRow {
                        report_id: id,
                        timestamp_ms: report.timestamp_ms,
                        check: result.name.clone(),
                        target: observation.target.clone(),
                        status: observation.status,
                        response_time_ms: observation.response_time_ms,
                    };
                    let key = detail_key(&observation.target, id, rows);
                    let value = serde_json::to_vec(&row).map_err(map_err!(Serialize))?;
                    details
                        .insert(key.as_str(), value.as_slice())
                        .map_err(map_err!(Write))?;
                    rows += 1;
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id, rows, status = %report.overall_status, "report stored");
        Ok(id)
    }

    /// Get a report by id.
    pub fn get_report(&self, id: ReportId) -> StateResult<Option<StoredReport>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(REPORTS).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let stored: StoredReport =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(stored))
            }
            None => Ok(None),
        }
    }

    /// The most recently stored report.
    pub fn latest_report(&self) -> StateResult<Option<StoredReport>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(REPORTS).map_err(map_err!(Table))?;
        match table.last().map_err(map_err!(Read))? {
            Some((_, value)) => {
                let stored: StoredReport =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(stored))
            }
            None => Ok(None),
        }
    }

    /// Summaries of the `limit` most recent reports, newest first.
    pub fn recent(&self, limit: usize) -> StateResult<Vec<ReportSummary>> {
        let mut results = Vec::new();
        if limit == 0 {
            return Ok(results);
        }
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(REPORTS).map_err(map_err!(Table))?;
        for entry in table.iter().map_err(map_err!(Read))?.rev() {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let stored: StoredReport =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(ReportSummary::from(&stored));
            if results.len() >= limit {
                break;
            }
        }
        Ok(results)
    }

    /// Summaries of every report within `window` of now, newest first.
    pub fn reports_since(&self, window: Duration) -> StateResult<Vec<ReportSummary>> {
        let since_ms = epoch_millis().saturating_sub(window.as_millis() as u64);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(REPORTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))?.rev() {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let stored: StoredReport =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if stored.report.timestamp_ms >= since_ms {
                results.push(ReportSummary::from(&stored));
            }
        }
        Ok(results)
    }

    /// Number of stored reports.
    pub fn report_count(&self) -> StateResult<u64> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(REPORTS).map_err(map_err!(Table))?;
        table.len().map_err(map_err!(Read))
    }

    // ── Trends ─────────────────────────────────────────────────────

    /// Trend for a target over the last `window`.
    pub fn trend(&self, target: &str, window: Duration) -> StateResult<Trend> {
        let since_ms = epoch_millis().saturating_sub(window.as_millis() as u64);
        self.trend_since(target, since_ms)
    }

    /// Trend for a target over detail rows at or after `since_ms`.
    ///
    /// Aggregated at query time from raw detail rows.
    pub fn trend_since(&self, target: &str, since_ms: u64) -> StateResult<Trend> {
        let prefix = detail_prefix(target);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DETAILS).map_err(map_err!(Table))?;

        let mut samples = 0usize;
        let mut response_times = Vec::new();
        // report_id → (timestamp, worst status for the target in that report)
        let mut points: BTreeMap<ReportId, (u64, CheckStatus)> = BTreeMap::new();

        for entry in table.range(prefix.as_str()..).map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(&prefix) {
                break;
            }
            let row: DetailRow =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if row.timestamp_ms < since_ms {
                continue;
            }
            samples += 1;
            if let Some(ms) = row.response_time_ms {
                response_times.push(ms);
            }
            points
                .entry(row.report_id)
                .and_modify(|(_, status)| *status = (*status).max(row.status))
                .or_insert((row.timestamp_ms, row.status));
        }

        let avg_response_time_ms = if response_times.is_empty() {
            None
        } else {
            Some(response_times.iter().sum::<u64>() as f64 / response_times.len() as f64)
        };
        let peak_response_time_ms = response_times.iter().copied().max();

        let status_over_time: Vec<TrendPoint> = points
            .into_iter()
            .map(|(report_id, (timestamp_ms, status))| TrendPoint {
                report_id,
                timestamp_ms,
                status,
                score: status.score(),
            })
            .collect();
        let failure_rate = if status_over_time.is_empty() {
            0.0
        } else {
            let failed = status_over_time
                .iter()
                .filter(|p| p.status == CheckStatus::Fail)
                .count();
            failed as f64 / status_over_time.len() as f64
        };

        Ok(Trend {
            target: target.to_string(),
            since_ms,
            samples,
            avg_response_time_ms,
            peak_response_time_ms,
            failure_rate,
            status_over_time,
        })
    }

    // ── Repair actions ─────────────────────────────────────────────

    /// Persist a repair action. Returns the new id.
    ///
    /// A triggering report id must reference a stored report.
    pub fn store_repair_action(&self, action: &RepairAction) -> StateResult<RepairId> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let id;
        {
            if let Some(report_id) = action.triggering_report_id {
                let reports = txn.open_table(REPORTS).map_err(map_err!(Table))?;
                let exists = reports.get(report_id).map_err(map_err!(Read))?.is_some();
                if !exists {
                    return Err(StateError::NotFound(format!("report {report_id}")));
                }
            }

            let mut repairs = txn.open_table(REPAIRS).map_err(map_err!(Table))?;
            let floor = {
                let last = repairs.last().map_err(map_err!(Read))?;
                last.map(|(k, _)| k.value() + 1).unwrap_or(1)
            };
            id = allocate_id(&txn, NEXT_REPAIR_ID, floor)?;
            let mut stored = action.clone();
            stored.id = id;
            let value = serde_json::to_vec(&stored).map_err(map_err!(Serialize))?;
            repairs
                .insert(id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id, target = %action.target, status = ?action.status, "repair action stored");
        Ok(id)
    }

    /// The `limit` most recent repair actions, newest first.
    pub fn repair_history(&self, limit: usize) -> StateResult<Vec<RepairAction>> {
        self.scan_repairs(limit, |_| true)
    }

    /// The `limit` most recent repair actions for one target, newest first.
    pub fn repairs_for_target(&self, target: &str, limit: usize) -> StateResult<Vec<RepairAction>> {
        self.scan_repairs(limit, |a| a.target == target)
    }

    fn scan_repairs(
        &self,
        limit: usize,
        keep: impl Fn(&RepairAction) -> bool,
    ) -> StateResult<Vec<RepairAction>> {
        let mut results = Vec::new();
        if limit == 0 {
            return Ok(results);
        }
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(REPAIRS).map_err(map_err!(Table))?;
        for entry in table.iter().map_err(map_err!(Read))?.rev() {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let action: RepairAction =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if keep(&action) {
                results.push(action);
                if results.len() >= limit {
                    break;
                }
            }
        }
        Ok(results)
    }

    // ── Retention ──────────────────────────────────────────────────

    /// Delete everything older than `window`, measured from now.
    pub fn cleanup(&self, window: Duration) -> StateResult<CleanupStats> {
        let cutoff_ms = epoch_millis().saturating_sub(window.as_millis() as u64);
        self.cleanup_before(cutoff_ms)
    }

    /// Delete reports, detail rows and repair actions strictly older than
    /// `cutoff_ms`. Rows stamped exactly at the cutoff are kept. Repair
    /// actions referencing a deleted report are deleted with it.
    pub fn cleanup_before(&self, cutoff_ms: u64) -> StateResult<CleanupStats> {
        let mut stats = CleanupStats::default();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut reports = txn.open_table(REPORTS).map_err(map_err!(Table))?;
            let expired: BTreeSet<ReportId> = {
                let mut ids = BTreeSet::new();
                for entry in reports.iter().map_err(map_err!(Read))? {
                    let (key, value) = entry.map_err(map_err!(Read))?;
                    let stored: StoredReport =
                        serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                    if stored.report.timestamp_ms < cutoff_ms {
                        ids.insert(key.value());
                    }
                }
                ids
            };
            for id in &expired {
                reports.remove(*id).map_err(map_err!(Write))?;
            }
            stats.reports = expired.len() as u64;

            let mut details = txn.open_table(DETAILS).map_err(map_err!(Table))?;
            let detail_keys: Vec<String> = {
                let mut keys = Vec::new();
                for entry in details.iter().map_err(map_err!(Read))? {
                    let (key, value) = entry.map_err(map_err!(Read))?;
                    let row: DetailRow =
                        serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                    if row.timestamp_ms < cutoff_ms || expired.contains(&row.report_id) {
                        keys.push(key.value().to_string());
                    }
                }
                keys
            };
            for key in &detail_keys {
                details.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            stats.details = detail_keys.len() as u64;

            let mut repairs = txn.open_table(REPAIRS).map_err(map_err!(Table))?;
            let repair_ids: Vec<RepairId> = {
                let mut ids = Vec::new();
                for entry in repairs.iter().map_err(map_err!(Read))? {
                    let (key, value) = entry.map_err(map_err!(Read))?;
                    let action: RepairAction =
                        serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                    let orphaned = action
                        .triggering_report_id
                        .is_some_and(|id| expired.contains(&id));
                    if action.started_at_ms < cutoff_ms || orphaned {
                        ids.push(key.value());
                    }
                }
                ids
            };
            for id in &repair_ids {
                repairs.remove(*id).map_err(map_err!(Write))?;
            }
            stats.repairs = repair_ids.len() as u64;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            cutoff_ms,
            reports = stats.reports,
            details = stats.details,
            repairs = stats.repairs,
            "retention sweep complete"
        );
        Ok(stats)
    }

    // ── Policies ───────────────────────────────────────────────────

    /// Insert or update a policy.
    pub fn put_policy(&self, policy: &Policy) -> StateResult<()> {
        let value = serde_json::to_vec(policy).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(POLICIES).map_err(map_err!(Table))?;
            table
                .insert(policy.target.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(target = %policy.target, "policy stored");
        Ok(())
    }

    /// Insert a policy only if the target has none. Returns true if inserted.
    pub fn insert_policy_if_absent(&self, policy: &Policy) -> StateResult<bool> {
        let value = serde_json::to_vec(policy).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let inserted;
        {
            let mut table = txn.open_table(POLICIES).map_err(map_err!(Table))?;
            let exists = table
                .get(policy.target.as_str())
                .map_err(map_err!(Read))?
                .is_some();
            if !exists {
                table
                    .insert(policy.target.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
            inserted = !exists;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(inserted)
    }

    /// Get the stored policy for a target.
    pub fn get_policy(&self, target: &str) -> StateResult<Option<Policy>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(POLICIES).map_err(map_err!(Table))?;
        match table.get(target).map_err(map_err!(Read))? {
            Some(guard) => {
                let policy: Policy =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(policy))
            }
            None => Ok(None),
        }
    }

    /// List all stored policies, ordered by target.
    pub fn list_policies(&self) -> StateResult<Vec<Policy>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(POLICIES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let policy: Policy =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(policy);
        }
        Ok(results)
    }
}

/// Take the next id from a `META` counter. `floor` is one past the highest
/// key in use, which seeds the counter for stores written before it existed.
fn allocate_id(txn: &WriteTransaction, counter: &str, floor: u64) -> StateResult<u64> {
    let mut meta = txn.open_table(META).map_err(map_err!(Table))?;
    let next = meta.get(counter).map_err(map_err!(Read))?.map(|v| v.value());
    let id = next.unwrap_or(1).max(floor);
    meta.insert(counter, id + 1).map_err(map_err!(Write))?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation(
        target: &str,
        status: CheckStatus,
        response_time_ms: Option<u64>,
    ) -> TargetObservation {
        TargetObservation {
            target: target.to_string(),
            status,
            response_time_ms,
            failure: (status != CheckStatus::Pass).then_some(FailureKind::Timeout),
        }
    }

    fn test_report(timestamp_ms: u64, observations: Vec<TargetObservation>) -> Report {
        let status = CheckStatus::worst(observations.iter().map(|o| o.status));
        let result = CheckResult::new("http", CheckKind::Http, status, "checked")
            .with_targets(observations);
        Report::new(
            vec![result],
            TriggerSource::Scheduled,
            timestamp_ms,
            Duration::from_millis(25),
        )
    }

    fn test_action(
        target: &str,
        report_id: Option<ReportId>,
        started_at_ms: u64,
    ) -> RepairAction {
        RepairAction {
            id: 0,
            target: target.to_string(),
            issue_type: IssueType::Timeout,
            strategy: RepairStrategy::Restart,
            status: RepairStatus::Succeeded,
            started_at_ms,
            duration: Duration::from_millis(10),
            triggering_report_id: report_id,
            manual: false,
            message: None,
        }
    }

    // ── Reports ────────────────────────────────────────────────────

    #[test]
    fn report_store_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let report = test_report(1000, vec![observation("api", CheckStatus::Pass, Some(12))]);

        let id = store.store_report(&report).unwrap();
        let stored = store.get_report(id).unwrap().unwrap();

        assert_eq!(stored.id, id);
        assert_eq!(stored.report, report);
    }

    #[test]
    fn report_ids_increase() {
        let store = StateStore::open_in_memory().unwrap();
        let a = store.store_report(&test_report(1000, vec![])).unwrap();
        let b = store.store_report(&test_report(2000, vec![])).unwrap();
        assert!(b > a);
        assert_eq!(store.latest_report().unwrap().unwrap().id, b);
        assert_eq!(store.report_count().unwrap(), 2);
    }

    #[test]
    fn ids_are_not_reused_after_cleanup() {
        let store = StateStore::open_in_memory().unwrap();
        let old = store.store_report(&test_report(500, vec![])).unwrap();
        let newest = store.store_report(&test_report(600, vec![])).unwrap();
        let repair = store
            .store_repair_action(&test_action("api", Some(newest), 700))
            .unwrap();

        let stats = store.cleanup_before(1000).unwrap();
        assert_eq!(stats.reports, 2);
        assert_eq!(stats.repairs, 1);
        assert!(store.latest_report().unwrap().is_none());

        let next = store.store_report(&test_report(2000, vec![])).unwrap();
        assert!(next > newest && next > old);
        let next_repair = store.store_repair_action(&test_action("api", None, 2000)).unwrap();
        assert!(next_repair > repair);
    }

    #[test]
    fn recent_is_newest_first_and_limited() {
        let store = StateStore::open_in_memory().unwrap();
        for ts in [1000u64, 2000, 3000] {
            store.store_report(&test_report(ts, vec![])).unwrap();
        }

        let recent = store.recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].timestamp_ms, 3000);
        assert_eq!(recent[1].timestamp_ms, 2000);
        assert!(store.recent(0).unwrap().is_empty());
    }

    #[test]
    fn recent_summary_counts() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .store_report(&test_report(1000, vec![observation("api", CheckStatus::Warn, None)]))
            .unwrap();
        let recent = store.recent(1).unwrap();
        assert_eq!(recent[0].overall_status, CheckStatus::Warn);
        assert_eq!(recent[0].summary.warned, 1);
        assert_eq!(recent[0].cycle_duration_ms, 25);
    }

    #[test]
    fn reports_since_filters_by_window() {
        let store = StateStore::open_in_memory().unwrap();
        let now = epoch_millis();
        store.store_report(&test_report(now - 10_000, vec![])).unwrap();
        store.store_report(&test_report(now - 3_600_000, vec![])).unwrap();

        let within = store.reports_since(Duration::from_secs(60)).unwrap();
        assert_eq!(within.len(), 1);
    }

    // ── Trends ─────────────────────────────────────────────────────

    #[test]
    fn trend_aggregates_response_times_and_status() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .store_report(&test_report(
                1000,
                vec![observation("api", CheckStatus::Pass, Some(100))],
            ))
            .unwrap();
        store
            .store_report(&test_report(
                2000,
                vec![observation("api", CheckStatus::Warn, Some(300))],
            ))
            .unwrap();
        store
            .store_report(&test_report(3000, vec![observation("api", CheckStatus::Fail, None)]))
            .unwrap();
        // Another target must not leak into the aggregate.
        store
            .store_report(&test_report(
                3000,
                vec![observation("api-v2", CheckStatus::Pass, Some(9000))],
            ))
            .unwrap();

        let trend = store.trend_since("api", 0).unwrap();
        assert_eq!(trend.samples, 3);
        assert_eq!(trend.avg_response_time_ms, Some(200.0));
        assert_eq!(trend.peak_response_time_ms, Some(300));
        assert_eq!(trend.status_over_time.len(), 3);
        assert_eq!(trend.status_over_time[0].score, 100);
        assert_eq!(trend.status_over_time[1].score, 50);
        assert_eq!(trend.status_over_time[2].status, CheckStatus::Fail);
        assert!((trend.failure_rate - 1.0 / 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn trend_ignores_targets_nested_under_the_name() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .store_report(&test_report(1000, vec![observation("api", CheckStatus::Pass, Some(40))]))
            .unwrap();
        store
            .store_report(&test_report(
                2000,
                vec![observation("api/v2", CheckStatus::Fail, Some(4000))],
            ))
            .unwrap();

        let api = store.trend_since("api", 0).unwrap();
        assert_eq!(api.samples, 1);
        assert_eq!(api.peak_response_time_ms, Some(40));
        assert_eq!(api.failure_rate, 0.0);

        let nested = store.trend_since("api/v2", 0).unwrap();
        assert_eq!(nested.samples, 1);
        assert_eq!(nested.status_over_time[0].status, CheckStatus::Fail);
    }

    #[test]
    fn trend_respects_window() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .store_report(&test_report(1000, vec![observation("api", CheckStatus::Pass, Some(50))]))
            .unwrap();
        store
            .store_report(&test_report(5000, vec![observation("api", CheckStatus::Pass, Some(70))]))
            .unwrap();

        let trend = store.trend_since("api", 5000).unwrap();
        assert_eq!(trend.samples, 1);
        assert_eq!(trend.peak_response_time_ms, Some(70));
    }

    #[test]
    fn trend_uses_worst_status_per_report() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .store_report(&test_report(
                1000,
                vec![
                    observation("api", CheckStatus::Pass, Some(10)),
                    observation("api", CheckStatus::Fail, None),
                ],
            ))
            .unwrap();
        let trend = store.trend_since("api", 0).unwrap();
        assert_eq!(trend.status_over_time.len(), 1);
        assert_eq!(trend.status_over_time[0].status, CheckStatus::Fail);
    }

    #[test]
    fn trend_for_unknown_target_is_empty() {
        let store = StateStore::open_in_memory().unwrap();
        let trend = store.trend("ghost", Duration::from_secs(3600)).unwrap();
        assert_eq!(trend.samples, 0);
        assert_eq!(trend.avg_response_time_ms, None);
        assert_eq!(trend.failure_rate, 0.0);
    }

    // ── Repair actions ─────────────────────────────────────────────

    #[test]
    fn repair_action_requires_existing_report() {
        let store = StateStore::open_in_memory().unwrap();
        let result = store.store_repair_action(&test_action("api", Some(99), 1000));
        assert!(matches!(result, Err(StateError::NotFound(_))));

        let report_id = store.store_report(&test_report(1000, vec![])).unwrap();
        let id = store
            .store_repair_action(&test_action("api", Some(report_id), 1000))
            .unwrap();
        let history = store.repair_history(10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, id);
        assert_eq!(history[0].triggering_report_id, Some(report_id));
    }

    #[test]
    fn manual_repair_without_report_is_accepted() {
        let store = StateStore::open_in_memory().unwrap();
        let mut action = test_action("api", None, 1000);
        action.manual = true;
        store.store_repair_action(&action).unwrap();
        assert!(store.repair_history(1).unwrap()[0].manual);
    }

    #[test]
    fn repairs_for_target_filters() {
        let store = StateStore::open_in_memory().unwrap();
        store.store_repair_action(&test_action("api", None, 1000)).unwrap();
        store.store_repair_action(&test_action("web", None, 2000)).unwrap();
        store.store_repair_action(&test_action("api", None, 3000)).unwrap();

        let api = store.repairs_for_target("api", 10).unwrap();
        assert_eq!(api.len(), 2);
        assert_eq!(api[0].started_at_ms, 3000);
    }

    // ── Retention ──────────────────────────────────────────────────

    #[test]
    fn cleanup_boundary_keeps_reports_at_cutoff() {
        let store = StateStore::open_in_memory().unwrap();
        let old = store
            .store_report(&test_report(999, vec![observation("api", CheckStatus::Pass, Some(5))]))
            .unwrap();
        let at_cutoff = store
            .store_report(&test_report(1000, vec![observation("api", CheckStatus::Pass, Some(6))]))
            .unwrap();
        let newer = store.store_report(&test_report(1001, vec![])).unwrap();

        let stats = store.cleanup_before(1000).unwrap();

        assert_eq!(stats.reports, 1);
        assert_eq!(stats.details, 1);
        assert!(store.get_report(old).unwrap().is_none());
        assert!(store.get_report(at_cutoff).unwrap().is_some());
        assert!(store.get_report(newer).unwrap().is_some());
        assert_eq!(store.trend_since("api", 0).unwrap().samples, 1);
    }

    #[test]
    fn cleanup_removes_repairs_of_deleted_reports() {
        let store = StateStore::open_in_memory().unwrap();
        let old = store.store_report(&test_report(500, vec![])).unwrap();
        let kept = store.store_report(&test_report(5000, vec![])).unwrap();
        // Repair started after the cutoff but references an expired report.
        store.store_repair_action(&test_action("api", Some(old), 6000)).unwrap();
        store.store_repair_action(&test_action("api", Some(kept), 6000)).unwrap();
        store.store_repair_action(&test_action("api", None, 100)).unwrap();

        let stats = store.cleanup_before(1000).unwrap();
        assert_eq!(stats.reports, 1);
        assert_eq!(stats.repairs, 2);

        let remaining = store.repair_history(10).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].triggering_report_id, Some(kept));
    }

    #[test]
    fn cleanup_with_window_keeps_fresh_reports() {
        let store = StateStore::open_in_memory().unwrap();
        let now = epoch_millis();
        store.store_report(&test_report(now, vec![])).unwrap();
        store
            .store_report(&test_report(now - 40 * 86_400_000, vec![]))
            .unwrap();

        let stats = store.cleanup(Duration::from_secs(30 * 86_400)).unwrap();
        assert_eq!(stats.reports, 1);
        assert_eq!(store.report_count().unwrap(), 1);
    }

    // ── Policies ───────────────────────────────────────────────────

    #[test]
    fn policy_put_get_list() {
        let store = StateStore::open_in_memory().unwrap();
        let policy = Policy::new("api", 500, true, RepairStrategy::Restart);
        store.put_policy(&policy).unwrap();

        assert_eq!(store.get_policy("api").unwrap(), Some(policy));
        assert!(store.get_policy("web").unwrap().is_none());
        assert_eq!(store.list_policies().unwrap().len(), 1);
    }

    #[test]
    fn insert_if_absent_does_not_overwrite() {
        let store = StateStore::open_in_memory().unwrap();
        let custom = Policy::new("api", 250, false, RepairStrategy::None);
        store.put_policy(&custom).unwrap();

        let inserted = store
            .insert_policy_if_absent(&Policy::new("api", 500, true, RepairStrategy::Restart))
            .unwrap();
        assert!(!inserted);
        assert_eq!(store.get_policy("api").unwrap(), Some(custom));
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.store_report(&test_report(1000, vec![])).unwrap();
            store
                .put_policy(&Policy::new("api", 500, true, RepairStrategy::Restart))
                .unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        assert_eq!(store.report_count().unwrap(), 1);
        assert!(store.get_policy("api").unwrap().is_some());
        // Ids continue after reopen.
        let id = store.store_report(&test_report(2000, vec![])).unwrap();
        assert_eq!(id, 2);
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.latest_report().unwrap().is_none());
        assert!(store.recent(10).unwrap().is_empty());
        assert!(store.repair_history(10).unwrap().is_empty());
        assert!(store.list_policies().unwrap().is_empty());
        assert_eq!(store.cleanup_before(u64::MAX).unwrap(), CleanupStats::default());
    }
}
