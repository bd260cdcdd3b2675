//! Per-execution resource accounting (spec.md 4.3, C3).
//!
//! A single background ticker samples the host process's working set and
//! fans it out to every live [`MonitorSession`]; sessions themselves track
//! per-execution cumulative counters under one lock each.

use crate::model::{ResourceUsageSnapshot, ToolResourceLimits};
use crate::security_manager::AccessType;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use sysinfo::{Pid, System};
use tokio::sync::mpsc;
use tracing::debug;

/// Named resource ceiling that was crossed. Matches the `limitType`
/// strings spec.md 4.3/4.8 expect to see in `exceeded_limits` metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitKind {
    Memory,
    FileCount,
    FileSize,
}

impl LimitKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LimitKind::Memory => "memory",
            LimitKind::FileCount => "file_count",
            LimitKind::FileSize => "file_size",
        }
    }
}

/// One-shot notification that a session crossed a limit for the first
/// time (spec.md 4.3 "Limit-exceeded semantics").
#[derive(Debug, Clone)]
pub struct LimitExceededEvent {
    pub correlation_id: String,
    pub limit_type: LimitKind,
    pub current_value: u64,
    pub limit_value: u64,
}

struct SessionState {
    limits: ToolResourceLimits,
    usage: ResourceUsageSnapshot,
    unique_files: HashSet<String>,
    exceeded: HashSet<LimitKind>,
    started_at: std::time::Instant,
    sample_count: u64,
}

impl SessionState {
    fn new(limits: ToolResourceLimits) -> Self {
        Self {
            limits,
            usage: ResourceUsageSnapshot::default(),
            unique_files: HashSet::new(),
            exceeded: HashSet::new(),
            started_at: std::time::Instant::now(),
            sample_count: 0,
        }
    }
}

/// A per-execution resource-accounting envelope. Cloning shares the
/// underlying state; the monitor keeps its own clone for ticker fan-out
/// and disposes it in `stop`.
#[derive(Clone)]
pub struct MonitorSession {
    correlation_id: String,
    state: Arc<Mutex<SessionState>>,
    events: mpsc::UnboundedSender<LimitExceededEvent>,
}

impl MonitorSession {
    fn emit_if_new(&self, state: &mut SessionState, kind: LimitKind, current: u64, limit: u64) {
        if state.exceeded.insert(kind) {
            debug!(
                correlation_id = %self.correlation_id,
                limit = kind.as_str(),
                current,
                limit_value = limit,
                "resource limit exceeded"
            );
            let _ = self.events.send(LimitExceededEvent {
                correlation_id: self.correlation_id.clone(),
                limit_type: kind,
                current_value: current,
                limit_value: limit,
            });
        }
    }

    pub fn record_file_access(
        &self,
        path: &str,
        _access: AccessType,
        bytes_read: u64,
        bytes_written: u64,
    ) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.unique_files.insert(path.to_string());
        state.usage.bytes_read += bytes_read;
        state.usage.bytes_written += bytes_written;
        state.usage.files_accessed = state.unique_files.len() as u64;

        let file_count = state.usage.files_accessed;
        let max_count = state.limits.max_file_count;
        if file_count > max_count {
            self.emit_if_new(&mut state, LimitKind::FileCount, file_count, max_count);
        }

        let max_size = state.limits.max_file_size_bytes;
        if bytes_read > max_size || bytes_written > max_size {
            let current = bytes_read.max(bytes_written);
            self.emit_if_new(&mut state, LimitKind::FileSize, current, max_size);
        }
    }

    pub fn record_network_access(&self, _host: &str, bytes_sent: u64, bytes_received: u64) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.usage.network_requests += 1;
        state.usage.network_bytes_sent += bytes_sent;
        state.usage.network_bytes_received += bytes_received;
    }

    pub fn record_process_execution(&self, _name: &str) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.usage.processes_started += 1;
    }

    /// Running-average update (spec.md 9: simple EWMA with alpha = 1/k,
    /// the source's biased closed form is *not* implemented -- see
    /// DESIGN.md). `bytes` is the host-sampled current memory usage.
    pub fn update_memory_usage(&self, bytes: u64) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.sample_count += 1;
        let k = state.sample_count as f64;
        let avg = state.usage.average_memory_bytes as f64;
        let sample = bytes as f64;
        state.usage.average_memory_bytes = (avg + (sample - avg) / k).round() as u64;
        state.usage.peak_memory_bytes = state.usage.peak_memory_bytes.max(bytes);
        state.usage.cpu_time_ms = state.started_at.elapsed().as_millis() as u64;

        let peak = state.usage.peak_memory_bytes;
        let max_memory = state.limits.max_memory_bytes;
        if peak > max_memory {
            self.emit_if_new(&mut state, LimitKind::Memory, peak, max_memory);
        }
    }

    pub fn snapshot(&self) -> ResourceUsageSnapshot {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).usage
    }

    pub fn exceeded_limits(&self) -> Vec<&'static str> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .exceeded
            .iter()
            .map(|k| k.as_str())
            .collect()
    }

    pub fn hit_any_limit(&self) -> bool {
        !self.state.lock().unwrap_or_else(|e| e.into_inner()).exceeded.is_empty()
    }
}

/// Owns the background ticker and the table of live sessions. One
/// instance is shared by every [`crate::executor::Executor`] call.
pub struct ResourceMonitor {
    sessions: RwLock<HashMap<String, MonitorSession>>,
    events_tx: mpsc::UnboundedSender<LimitExceededEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<LimitExceededEvent>>>,
    tick_interval: Duration,
}

impl ResourceMonitor {
    pub fn new() -> Arc<Self> {
        Self::with_tick_interval(Duration::from_secs(1))
    }

    pub fn with_tick_interval(tick_interval: Duration) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            events_tx: tx,
            events_rx: Mutex::new(Some(rx)),
            tick_interval,
        })
    }

    /// Takes ownership of the limit-exceeded event stream. Only the first
    /// caller (the executor, at construction) gets it.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<LimitExceededEvent>> {
        self.events_rx.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    /// Creates a session for `correlation_id` and registers it for ticker
    /// fan-out.
    pub fn start_session(&self, correlation_id: &str, limits: ToolResourceLimits) -> MonitorSession {
        let session = MonitorSession {
            correlation_id: correlation_id.to_string(),
            state: Arc::new(Mutex::new(SessionState::new(limits))),
            events: self.events_tx.clone(),
        };
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(correlation_id.to_string(), session.clone());
        session
    }

    /// Disposes the session, returning its final usage snapshot. Safe to
    /// call even if the ticker is mid-fan-out: the session `Arc` keeps the
    /// state alive until every clone is dropped, and updates to a removed
    /// session are simply no-ops from the caller's point of view (there is
    /// no caller left holding a reference once this returns).
    pub fn stop_session(&self, correlation_id: &str) -> Option<ResourceUsageSnapshot> {
        let session = self
            .sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(correlation_id)?;
        Some(session.snapshot())
    }

    /// Spawns the ticker task that samples this process's working set
    /// every `tick_interval` and feeds it to every live session. Returns a
    /// handle the lifecycle manager can abort on shutdown.
    pub fn spawn_ticker(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut system = System::new_all();
            let pid = Pid::from_u32(std::process::id());
            let mut interval = tokio::time::interval(monitor.tick_interval);
            loop {
                interval.tick().await;
                system.refresh_all();
                let memory_bytes = system.process(pid).map(|p| p.memory()).unwrap_or(0);

                let sessions: Vec<MonitorSession> = monitor
                    .sessions
                    .read()
                    .unwrap_or_else(|e| e.into_inner())
                    .values()
                    .cloned()
                    .collect();
                for session in sessions {
                    session.update_memory_usage(memory_bytes);
                }
            }
        })
    }

    pub fn active_session_ids(&self) -> Vec<String> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits_with_memory(max_memory_bytes: u64) -> ToolResourceLimits {
        ToolResourceLimits {
            max_memory_bytes,
            ..ToolResourceLimits::default()
        }
    }

    #[test]
    fn peak_memory_is_monotonic() {
        let monitor = ResourceMonitor::new();
        let session = monitor.start_session("c1", ToolResourceLimits::default());
        session.update_memory_usage(100);
        session.update_memory_usage(50);
        session.update_memory_usage(200);
        assert_eq!(session.snapshot().peak_memory_bytes, 200);
    }

    #[test]
    fn cumulative_counters_never_decrease() {
        let monitor = ResourceMonitor::new();
        let session = monitor.start_session("c1", ToolResourceLimits::default());
        session.record_file_access("/a", AccessType::Read, 10, 0);
        session.record_file_access("/b", AccessType::Read, 5, 0);
        let snap = session.snapshot();
        assert_eq!(snap.bytes_read, 15);
        assert_eq!(snap.files_accessed, 2);
    }

    #[test]
    fn memory_limit_exceeded_fires_once() {
        let monitor = ResourceMonitor::new();
        let mut rx = monitor.take_events().unwrap();
        let session = monitor.start_session("c1", limits_with_memory(100));

        session.update_memory_usage(200);
        session.update_memory_usage(300);

        let first = rx.try_recv().expect("expected one event");
        assert!(matches!(first.limit_type, LimitKind::Memory));
        assert!(rx.try_recv().is_err(), "second crossing must be silent");
        assert!(session.hit_any_limit());
    }

    #[test]
    fn file_count_limit_is_tracked() {
        let monitor = ResourceMonitor::new();
        let limits = ToolResourceLimits {
            max_file_count: 1,
            ..ToolResourceLimits::default()
        };
        let session = monitor.start_session("c1", limits);
        session.record_file_access("/a", AccessType::Read, 1, 0);
        session.record_file_access("/b", AccessType::Read, 1, 0);
        assert!(session.exceeded_limits().contains(&"file_count"));
    }

    #[tokio::test]
    async fn stop_session_returns_final_snapshot() {
        let monitor = ResourceMonitor::new();
        let session = monitor.start_session("c1", ToolResourceLimits::default());
        session.update_memory_usage(42);
        let snap = monitor.stop_session("c1").unwrap();
        assert_eq!(snap.peak_memory_bytes, 42);
        assert!(monitor.stop_session("c1").is_none());
    }
}
