//! Execution telemetry: per-call spans, `metrics` instruments, a bounded
//! execution-record ring, on-demand aggregation, and export payloads
//! (JSON/CSV/Prometheus/OTel-ish).
//!
//! Keyed on `correlation_id` throughout, never on a span id that could be
//! empty if tracing isn't subscribed to -- two concurrent executions must
//! never collide on the same key.

use crate::model::ResourceUsageSnapshot;
use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::Span;

const DEFAULT_RING_CAPACITY: usize = 10_000;

/// One completed execution, retained for aggregation/export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub correlation_id: String,
    pub tool_id: String,
    pub user_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: i64,
    pub was_successful: bool,
    pub was_cancelled: bool,
    pub error_category: Option<String>,
    pub resource_usage: ResourceUsageSnapshot,
    pub security_violation_count: usize,
}

impl ExecutionRecord {
    fn cpu_percent(&self) -> f64 {
        if self.duration_ms <= 0 {
            return 0.0;
        }
        (self.resource_usage.cpu_time_ms as f64 / self.duration_ms as f64) * 100.0
    }
}

/// Classifies a tool failure message into a closed error-category bucket
/// (spec.md 4.7 "error distribution by category").
pub fn classify_error(message: &str) -> &'static str {
    let lower = message.to_ascii_lowercase();
    if lower.contains("timeout") || lower.contains("cancelled") {
        "timeout"
    } else if lower.contains("permission") || lower.contains("security validation") {
        "permission"
    } else if lower.contains("not found") {
        "not_found"
    } else if lower.contains("validation") {
        "validation"
    } else {
        "other"
    }
}

fn percentile(sorted: &[i64], p: f64) -> i64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((sorted.len() - 1) as f64 * p).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DurationStats {
    pub min_ms: i64,
    pub avg_ms: i64,
    pub max_ms: i64,
    pub p50_ms: i64,
    pub p90_ms: i64,
    pub p99_ms: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Statistics {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub success_rate: f64,
    pub duration: DurationStats,
    pub average_peak_memory_bytes: u64,
    pub average_cpu_percent: f64,
    pub error_distribution: HashMap<String, u64>,
}

fn aggregate(records: &[ExecutionRecord]) -> Statistics {
    if records.is_empty() {
        return Statistics::default();
    }

    let total = records.len() as u64;
    let successful = records.iter().filter(|r| r.was_successful).count() as u64;
    let failed = total - successful;

    let mut durations: Vec<i64> = records.iter().map(|r| r.duration_ms).collect();
    durations.sort_unstable();
    let sum: i64 = durations.iter().sum();
    let duration = DurationStats {
        min_ms: *durations.first().unwrap_or(&0),
        avg_ms: sum / durations.len() as i64,
        max_ms: *durations.last().unwrap_or(&0),
        p50_ms: percentile(&durations, 0.50),
        p90_ms: percentile(&durations, 0.90),
        p99_ms: percentile(&durations, 0.99),
    };

    let peak_sum: u64 = records.iter().map(|r| r.resource_usage.peak_memory_bytes).sum();
    let cpu_sum: f64 = records.iter().map(|r| r.cpu_percent()).sum();

    let mut error_distribution: HashMap<String, u64> = HashMap::new();
    for record in records.iter().filter(|r| !r.was_successful) {
        let category = record.error_category.as_deref().unwrap_or("other");
        *error_distribution.entry(category.to_string()).or_insert(0) += 1;
    }

    Statistics {
        total,
        successful,
        failed,
        success_rate: successful as f64 / total as f64,
        duration,
        average_peak_memory_bytes: peak_sum / total,
        average_cpu_percent: cpu_sum / total as f64,
        error_distribution,
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Analytics {
    pub usage_by_tool: HashMap<String, u64>,
    pub unique_user_count: usize,
    pub hourly_peak_concurrency: HashMap<String, u64>,
    pub frequent_co_occurrences: Vec<(String, String, usize)>,
}

/// Sweepline over start/end instants to find, per hour bucket, the maximum
/// number of overlapping executions.
fn hourly_peaks(records: &[ExecutionRecord]) -> HashMap<String, u64> {
    let mut by_hour: HashMap<String, Vec<(DateTime<Utc>, DateTime<Utc>)>> = HashMap::new();
    for record in records {
        let hour_key = record.start_time.format("%Y-%m-%dT%H:00Z").to_string();
        by_hour
            .entry(hour_key)
            .or_default()
            .push((record.start_time, record.end_time));
    }

    let mut peaks = HashMap::new();
    for (hour, spans) in by_hour {
        let mut events: Vec<(DateTime<Utc>, i32)> = Vec::with_capacity(spans.len() * 2);
        for (start, end) in spans {
            events.push((start, 1));
            events.push((end, -1));
        }
        events.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

        let mut current = 0i32;
        let mut peak = 0i32;
        for (_, delta) in events {
            current += delta;
            peak = peak.max(current);
        }
        peaks.insert(hour, peak.max(0) as u64);
    }
    peaks
}

/// Tools co-occurring within the same 5-minute window, with support >= 3
/// (spec.md 4.7 "frequent co-occurrence combinations").
fn co_occurrences(records: &[ExecutionRecord]) -> Vec<(String, String, usize)> {
    const MIN_SUPPORT: usize = 3;
    let mut by_user: HashMap<String, Vec<&ExecutionRecord>> = HashMap::new();
    for record in records {
        let user = record.user_id.clone().unwrap_or_default();
        by_user.entry(user).or_default().push(record);
    }

    let mut counts: HashMap<(String, String), usize> = HashMap::new();
    for records in by_user.values() {
        let mut sorted = records.clone();
        sorted.sort_by_key(|r| r.start_time);
        for i in 0..sorted.len() {
            for j in (i + 1)..sorted.len() {
                let gap = (sorted[j].start_time - sorted[i].start_time).num_seconds();
                if gap > 300 {
                    break;
                }
                if sorted[i].tool_id == sorted[j].tool_id {
                    continue;
                }
                let mut pair = [sorted[i].tool_id.clone(), sorted[j].tool_id.clone()];
                pair.sort();
                *counts.entry((pair[0].clone(), pair[1].clone())).or_insert(0) += 1;
            }
        }
    }

    let mut out: Vec<(String, String, usize)> = counts
        .into_iter()
        .filter(|(_, count)| *count >= MIN_SUPPORT)
        .map(|((a, b), count)| (a, b, count))
        .collect();
    out.sort_by(|a, b| b.2.cmp(&a.2));
    out
}

fn analyze(records: &[ExecutionRecord]) -> Analytics {
    let mut usage_by_tool: HashMap<String, u64> = HashMap::new();
    let mut users = std::collections::HashSet::new();
    for record in records {
        *usage_by_tool.entry(record.tool_id.clone()).or_insert(0) += 1;
        if let Some(user) = &record.user_id {
            users.insert(user.clone());
        }
    }

    Analytics {
        usage_by_tool,
        unique_user_count: users.len(),
        hourly_peak_concurrency: hourly_peaks(records),
        frequent_co_occurrences: co_occurrences(records),
    }
}

/// Opens a span for one execution, named the way the teacher names its
/// request-handling spans, entered for the duration of the call.
pub fn start_execution_span(tool_id: &str, correlation_id: &str) -> Span {
    tracing::info_span!("tool_execution", tool_id = %tool_id, correlation_id = %correlation_id)
}

/// Records metrics instruments for one completed execution (spec.md 4.7
/// "Metrics instruments").
pub fn record_metrics(record: &ExecutionRecord) {
    let tool_id = record.tool_id.clone();
    counter!("toolwarden_executions_total", "tool_id" => tool_id.clone(), "success" => record.was_successful.to_string()).increment(1);
    histogram!("toolwarden_execution_duration_ms", "tool_id" => tool_id.clone()).record(record.duration_ms as f64);
    if !record.was_successful {
        let category = record.error_category.clone().unwrap_or_else(|| "other".to_string());
        counter!("toolwarden_execution_errors_total", "tool_id" => tool_id.clone(), "error_type" => category).increment(1);
    }
    histogram!("toolwarden_execution_memory_bytes", "tool_id" => tool_id.clone())
        .record(record.resource_usage.peak_memory_bytes as f64);
    histogram!("toolwarden_execution_cpu_percent", "tool_id" => tool_id)
        .record(record.cpu_percent());
}

/// Bounded ring buffer of completed execution records plus the process-wide
/// active-execution gauge, fed by [`crate::executor::Executor`].
pub struct Observability {
    records: Mutex<VecDeque<ExecutionRecord>>,
    capacity: usize,
    active_executions: AtomicI64,
}

impl Observability {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_RING_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            active_executions: AtomicI64::new(0),
        }
    }

    pub fn execution_started(&self) {
        let active = self.active_executions.fetch_add(1, Ordering::Relaxed) + 1;
        gauge!("toolwarden_active_executions").set(active as f64);
    }

    /// Appends `record`, emits its metrics instruments, and decrements the
    /// active-execution gauge.
    pub fn execution_completed(&self, record: ExecutionRecord) {
        let active = (self.active_executions.fetch_sub(1, Ordering::Relaxed) - 1).max(0);
        gauge!("toolwarden_active_executions").set(active as f64);

        record_metrics(&record);

        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        if records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    pub fn active_execution_count(&self) -> i64 {
        self.active_executions.load(Ordering::Relaxed)
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn snapshot(&self, tool_id: Option<&str>) -> Vec<ExecutionRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| tool_id.map(|t| r.tool_id == t).unwrap_or(true))
            .cloned()
            .collect()
    }

    pub fn statistics(&self, tool_id: Option<&str>) -> Statistics {
        aggregate(&self.snapshot(tool_id))
    }

    pub fn analytics(&self) -> Analytics {
        analyze(&self.snapshot(None))
    }

    /// Averages `resource_usage` across every retained record for `tool_id`,
    /// `None` if the tool has no execution history yet (spec.md 6
    /// `Executor.estimateResourceUsage`).
    pub fn average_resource_usage(&self, tool_id: &str) -> Option<ResourceUsageSnapshot> {
        let records = self.snapshot(Some(tool_id));
        if records.is_empty() {
            return None;
        }
        let n = records.len() as u64;
        let mut sum = ResourceUsageSnapshot::default();
        for r in &records {
            let u = r.resource_usage;
            sum.peak_memory_bytes += u.peak_memory_bytes;
            sum.average_memory_bytes += u.average_memory_bytes;
            sum.cpu_time_ms += u.cpu_time_ms;
            sum.files_accessed += u.files_accessed;
            sum.bytes_read += u.bytes_read;
            sum.bytes_written += u.bytes_written;
            sum.network_requests += u.network_requests;
            sum.network_bytes_sent += u.network_bytes_sent;
            sum.network_bytes_received += u.network_bytes_received;
            sum.processes_started += u.processes_started;
        }
        Some(ResourceUsageSnapshot {
            peak_memory_bytes: sum.peak_memory_bytes / n,
            average_memory_bytes: sum.average_memory_bytes / n,
            cpu_time_ms: sum.cpu_time_ms / n,
            files_accessed: sum.files_accessed / n,
            bytes_read: sum.bytes_read / n,
            bytes_written: sum.bytes_written / n,
            network_requests: sum.network_requests / n,
            network_bytes_sent: sum.network_bytes_sent / n,
            network_bytes_received: sum.network_bytes_received / n,
            processes_started: sum.processes_started / n,
        })
    }

    /// Drops records older than `cutoff`; returns how many were purged.
    pub fn purge_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let before = records.len();
        records.retain(|r| r.end_time >= cutoff);
        before - records.len()
    }

    pub fn export_json(&self) -> Value {
        let records = self.snapshot(None);
        json!({
            "statistics": aggregate(&records),
            "records": records,
        })
    }

    pub fn export_csv(&self) -> String {
        let mut out = String::from(
            "correlation_id,tool_id,user_id,start_time,end_time,duration_ms,was_successful,was_cancelled,error_category\n",
        );
        for record in self.snapshot(None).iter() {
            out.push_str(&format!(
                "{},{},{},{},{},{},{},{},{}\n",
                record.correlation_id,
                record.tool_id,
                record.user_id.clone().unwrap_or_default(),
                record.start_time.to_rfc3339(),
                record.end_time.to_rfc3339(),
                record.duration_ms,
                record.was_successful,
                record.was_cancelled,
                record.error_category.clone().unwrap_or_default(),
            ));
        }
        out
    }

    pub fn export_prometheus(&self, handle: &metrics_exporter_prometheus::PrometheusHandle) -> String {
        handle.render()
    }

    /// An OTel-*shaped* envelope, not a live OTLP export (the facade this
    /// crate carries has no OTLP exporter).
    pub fn export_otel_like(&self) -> Value {
        let stats = self.statistics(None);
        json!({
            "resourceMetrics": [{
                "resource": { "attributes": { "service.name": "toolwarden" } },
                "scopeMetrics": [{
                    "scope": { "name": "toolwarden" },
                    "metrics": [
                        { "name": "executions.total", "value": stats.total },
                        { "name": "executions.successful", "value": stats.successful },
                        { "name": "executions.failed", "value": stats.failed },
                        { "name": "execution.duration.avg_ms", "value": stats.duration.avg_ms },
                    ],
                }],
            }],
        })
    }
}

impl Default for Observability {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(tool_id: &str, duration_ms: i64, successful: bool) -> ExecutionRecord {
        let start = Utc::now();
        ExecutionRecord {
            correlation_id: format!("c-{tool_id}-{duration_ms}"),
            tool_id: tool_id.to_string(),
            user_id: Some("u1".to_string()),
            start_time: start,
            end_time: start + chrono::Duration::milliseconds(duration_ms),
            duration_ms,
            was_successful: successful,
            was_cancelled: false,
            error_category: if successful { None } else { Some("timeout".to_string()) },
            resource_usage: ResourceUsageSnapshot::default(),
            security_violation_count: 0,
        }
    }

    #[test]
    fn classify_error_buckets_known_phrases() {
        assert_eq!(classify_error("Tool execution was cancelled"), "timeout");
        assert_eq!(classify_error("Security validation failed"), "permission");
        assert_eq!(classify_error("Tool 'x' not found"), "not_found");
        assert_eq!(classify_error("Validation failed: bad input"), "validation");
        assert_eq!(classify_error("disk on fire"), "other");
    }

    #[test]
    fn statistics_conservation_holds() {
        let obs = Observability::new();
        obs.execution_completed(record("add", 10, true));
        obs.execution_completed(record("add", 20, false));
        obs.execution_completed(record("add", 30, true));

        let stats = obs.statistics(None);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.successful + stats.failed, stats.total);
    }

    #[test]
    fn statistics_can_be_scoped_per_tool() {
        let obs = Observability::new();
        obs.execution_completed(record("add", 10, true));
        obs.execution_completed(record("subtract", 20, true));

        assert_eq!(obs.statistics(Some("add")).total, 1);
        assert_eq!(obs.statistics(None).total, 2);
    }

    #[test]
    fn duration_percentiles_are_monotonic() {
        let obs = Observability::new();
        for ms in [10, 50, 100, 200, 500] {
            obs.execution_completed(record("add", ms, true));
        }
        let stats = obs.statistics(None);
        assert!(stats.duration.min_ms <= stats.duration.p50_ms);
        assert!(stats.duration.p50_ms <= stats.duration.p90_ms);
        assert!(stats.duration.p90_ms <= stats.duration.p99_ms);
        assert!(stats.duration.p99_ms <= stats.duration.max_ms);
    }

    #[test]
    fn ring_buffer_is_bounded() {
        let obs = Observability::with_capacity(2);
        obs.execution_completed(record("add", 1, true));
        obs.execution_completed(record("add", 2, true));
        obs.execution_completed(record("add", 3, true));
        assert_eq!(obs.record_count(), 2);
    }

    #[test]
    fn purge_drops_only_old_records() {
        let obs = Observability::new();
        obs.execution_completed(record("add", 1, true));
        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        std::thread::sleep(std::time::Duration::from_millis(5));
        let purged = obs.purge_older_than(cutoff);
        assert_eq!(purged, 1);
        assert_eq!(obs.record_count(), 0);
    }

    #[test]
    fn active_execution_count_tracks_start_and_completion() {
        let obs = Observability::new();
        obs.execution_started();
        obs.execution_started();
        assert_eq!(obs.active_execution_count(), 2);
        obs.execution_completed(record("add", 1, true));
        assert_eq!(obs.active_execution_count(), 1);
    }

    #[test]
    fn average_resource_usage_is_none_for_unknown_tool() {
        let obs = Observability::new();
        assert!(obs.average_resource_usage("add").is_none());
    }

    #[test]
    fn average_resource_usage_averages_peak_memory() {
        let obs = Observability::new();
        let mut r1 = record("add", 10, true);
        r1.resource_usage.peak_memory_bytes = 100;
        let mut r2 = record("add", 10, true);
        r2.resource_usage.peak_memory_bytes = 300;
        obs.execution_completed(r1);
        obs.execution_completed(r2);

        let usage = obs.average_resource_usage("add").unwrap();
        assert_eq!(usage.peak_memory_bytes, 200);
    }

    #[test]
    fn export_json_contains_statistics_and_records() {
        let obs = Observability::new();
        obs.execution_completed(record("add", 10, true));
        let json = obs.export_json();
        assert_eq!(json["statistics"]["total"], 1);
        assert_eq!(json["records"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn export_csv_has_header_and_one_row_per_record() {
        let obs = Observability::new();
        obs.execution_completed(record("add", 10, true));
        obs.execution_completed(record("add", 20, false));
        let csv = obs.export_csv();
        assert_eq!(csv.lines().count(), 3);
    }
}
