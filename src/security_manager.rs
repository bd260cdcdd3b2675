//! Path, host, and process access policy (spec.md 4.2, C2).
//!
//! The security manager never mutates a [`ToolPermissions`] profile; it
//! only reads one and appends to its own violation log.

use crate::model::{Severity, SecurityViolation, ToolMetadata, ToolPermissions};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::warn;

/// What kind of filesystem access is being attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    Read,
    Write,
    Delete,
    Execute,
}

/// Directories treated as sensitive: writable only with an explicit
/// `allow_system_write` flag. Compiled-in, the same way
/// `oxicrab::utils::sandbox::SandboxRules::for_shell` hard-codes its
/// default read-only system paths.
const SENSITIVE_SYSTEM_DIRS: &[&str] = &[
    "/etc", "/usr", "/lib", "/lib64", "/bin", "/sbin", "/boot", "/sys", "/proc",
];

/// Extensions treated as directly executable; `Execute` access to any of
/// these requires an explicit `allow_executable` flag.
const EXECUTABLE_EXTENSIONS: &[&str] = &[
    "exe", "bat", "cmd", "ps1", "sh", "py", "js", "vbs",
];

/// Process names treated as dangerous; running one requires an explicit
/// `allow_dangerous_processes` flag.
const DANGEROUS_PROCESSES: &[&str] = &[
    "cmd.exe",
    "powershell.exe",
    "bash",
    "sh",
    "python.exe",
    "node.exe",
    "ruby.exe",
];

/// Characters the security manager treats as invalid in a path regardless
/// of what the host OS would otherwise accept. `<`/`>` are kept as a
/// Windows-reserved-character guard documented in DESIGN.md -- not
/// inherited blindly from ambiguous source behavior, but retained as a
/// deliberate policy choice (spec.md 9).
const INVALID_PATH_CHARS: &[char] = &['<', '>', '\0', '|', '"', '*', '?'];

fn normalize_path(path: &str) -> Option<PathBuf> {
    if path.is_empty() || path.chars().any(|c| INVALID_PATH_CHARS.contains(&c)) {
        return None;
    }
    let p = Path::new(path);
    if !p.is_absolute() {
        return None;
    }
    // We don't require the path to exist (a tool may be about to create
    // it); `components()` normalization strips `.`/`..` without touching
    // the filesystem, unlike `canonicalize()`.
    let mut normalized = PathBuf::new();
    for component in p.components() {
        use std::path::Component;
        match component {
            Component::ParentDir => {
                normalized.pop();
            }
            Component::CurDir => {}
            other => normalized.push(other.as_os_str()),
        }
    }
    Some(normalized)
}

fn path_prefix_matches(candidate: &Path, prefix: &str) -> bool {
    let Some(prefix_path) = normalize_path(prefix) else {
        return false;
    };
    let candidate_lower = candidate.to_string_lossy().to_ascii_lowercase();
    let prefix_lower = prefix_path.to_string_lossy().to_ascii_lowercase();
    candidate_lower == prefix_lower || candidate_lower.starts_with(&format!("{prefix_lower}/"))
}

fn host_matches(host: &str, pattern: &str) -> bool {
    let host = host.to_ascii_lowercase();
    let pattern = pattern.to_ascii_lowercase();
    if let Some(suffix) = pattern.strip_prefix("*.") {
        host.ends_with(suffix) && host.len() > suffix.len()
    } else {
        host == pattern
    }
}

fn is_private_ipv4(ip: std::net::Ipv4Addr) -> bool {
    ip.is_private()
}

/// Append-only violation store, indexed by `correlationId`. Concurrent
/// appends are safe (single `RwLock`, short critical sections); purge
/// copies the surviving entries into a fresh `Vec` rather than mutating in
/// place under readers.
pub struct SecurityManager {
    violations: RwLock<Vec<SecurityViolation>>,
}

impl Default for SecurityManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SecurityManager {
    pub fn new() -> Self {
        Self {
            violations: RwLock::new(Vec::new()),
        }
    }

    fn record(&self, violation: SecurityViolation) {
        warn!(
            tool_id = %violation.tool_id,
            correlation_id = %violation.correlation_id,
            severity = ?violation.severity,
            "security violation: {}",
            violation.description
        );
        self.violations
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(violation);
    }

    /// Records a violation and returns it, for callers (the executor) that
    /// need to both log it internally and surface it on the result.
    pub fn record_violation(
        &self,
        tool_id: &str,
        correlation_id: &str,
        description: impl Into<String>,
        severity: Severity,
    ) -> SecurityViolation {
        let violation = SecurityViolation::new(tool_id, correlation_id, description, severity);
        self.record(violation.clone());
        violation
    }

    /// High-level capability + explicit-override gate (spec.md 4.2
    /// `validateExecution`). Returns human-readable denial reasons; empty
    /// means authorized.
    pub fn validate_execution(
        &self,
        metadata: &ToolMetadata,
        permissions: &ToolPermissions,
    ) -> Vec<String> {
        if let Some(false) = permissions.tool_override(&metadata.id) {
            return vec![format!(
                "Tool '{}' is explicitly disabled for this permission profile",
                metadata.id
            )];
        }

        let validation = crate::validator::validate_permissions(metadata, permissions);
        validation.errors.into_iter().map(|e| e.message).collect()
    }

    /// Path access gate (spec.md 4.2 `isFileAccessAllowed`).
    pub fn is_file_access_allowed(
        &self,
        path: &str,
        permissions: &ToolPermissions,
        access: AccessType,
    ) -> Result<(), String> {
        if !permissions.file_system_access {
            return Err("File system access is not granted".to_string());
        }

        let normalized = normalize_path(path)
            .ok_or_else(|| format!("Path '{path}' is not a resolvable absolute path"))?;

        for blocked in &permissions.blocked_paths {
            if path_prefix_matches(&normalized, blocked) {
                return Err(format!("Path '{path}' is under blocked path '{blocked}'"));
            }
        }

        if !permissions.allowed_paths.is_empty() {
            let allowed = permissions
                .allowed_paths
                .iter()
                .any(|prefix| path_prefix_matches(&normalized, prefix));
            if !allowed {
                return Err(format!("Path '{path}' is not under any allowed path"));
            }
        }

        let is_sensitive = SENSITIVE_SYSTEM_DIRS
            .iter()
            .any(|dir| path_prefix_matches(&normalized, dir));
        if is_sensitive
            && matches!(access, AccessType::Write | AccessType::Delete)
            && !permissions.custom_flag("allow_system_write")
        {
            return Err(format!(
                "Path '{path}' is under a sensitive system directory; only Read is allowed"
            ));
        }

        if access == AccessType::Execute {
            let is_executable = normalized
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| {
                    EXECUTABLE_EXTENSIONS
                        .iter()
                        .any(|known| known.eq_ignore_ascii_case(ext))
                })
                .unwrap_or(false);
            if is_executable && !permissions.custom_flag("allow_executable") {
                return Err(format!(
                    "Path '{path}' has an executable extension and allow_executable is not set"
                ));
            }
        }

        Ok(())
    }

    /// Network access gate (spec.md 4.2 `isNetworkAccessAllowed`).
    pub fn is_network_access_allowed(
        &self,
        host: &str,
        permissions: &ToolPermissions,
    ) -> Result<(), String> {
        if !permissions.network_access {
            return Err("Network access is not granted".to_string());
        }

        for blocked in &permissions.blocked_hosts {
            if host_matches(host, blocked) {
                return Err(format!("Host '{host}' matches blocked host '{blocked}'"));
            }
        }

        let is_loopback = host.eq_ignore_ascii_case("localhost")
            || host == "127.0.0.1"
            || host == "::1"
            || host
                .parse::<IpAddr>()
                .map(|ip| ip.is_loopback())
                .unwrap_or(false);
        if is_loopback && !permissions.custom_flag("allow_localhost") {
            return Err(format!("Host '{host}' is a loopback address"));
        }

        if !permissions.allowed_hosts.is_empty() {
            let allowed = permissions
                .allowed_hosts
                .iter()
                .any(|pattern| host_matches(host, pattern));
            if !allowed {
                return Err(format!("Host '{host}' is not in the allowed host list"));
            }
        }

        if let Ok(IpAddr::V4(v4)) = host.parse::<IpAddr>() {
            if is_private_ipv4(v4) && !permissions.custom_flag("allow_private_networks") {
                return Err(format!("Host '{host}' is a private IPv4 address"));
            }
        }

        Ok(())
    }

    /// Process execution gate (spec.md 4.2 `isProcessExecutionAllowed`).
    pub fn is_process_execution_allowed(
        &self,
        process_name: &str,
        permissions: &ToolPermissions,
    ) -> Result<(), String> {
        if !permissions.process_execution {
            return Err("Process execution is not granted".to_string());
        }

        let is_dangerous = DANGEROUS_PROCESSES
            .iter()
            .any(|name| name.eq_ignore_ascii_case(process_name));
        if is_dangerous && !permissions.custom_flag("allow_dangerous_processes") {
            return Err(format!(
                "Process '{process_name}' is on the dangerous-process list"
            ));
        }

        Ok(())
    }

    /// Returns a snapshot of all recorded violations.
    pub fn all_violations(&self) -> Vec<SecurityViolation> {
        self.violations.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn violations_for(&self, correlation_id: &str) -> Vec<SecurityViolation> {
        self.violations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|v| v.correlation_id == correlation_id)
            .cloned()
            .collect()
    }

    /// Purges violations older than `max_age`, returning the count removed
    /// (spec.md 4.2 `clearOldViolations`).
    pub fn clear_old_violations(&self, max_age: chrono::Duration) -> usize {
        let cutoff = chrono::Utc::now() - max_age;
        let mut guard = self.violations.write().unwrap_or_else(|e| e.into_inner());
        let before = guard.len();
        guard.retain(|v| v.timestamp >= cutoff);
        before - guard.len()
    }
}

/// Per-tool custom permission keys this module reads, documented here so
/// callers building a [`ToolPermissions`] profile know the vocabulary.
pub const CUSTOM_FLAG_KEYS: &[&str] = &[
    "allow_destructive",
    "allow_elevated",
    "allow_system_write",
    "allow_executable",
    "allow_localhost",
    "allow_private_networks",
    "allow_dangerous_processes",
];

#[cfg(test)]
mod tests {
    use super::*;

    fn perms() -> ToolPermissions {
        ToolPermissions {
            file_system_access: true,
            network_access: true,
            process_execution: true,
            ..ToolPermissions::default()
        }
    }

    #[test]
    fn blocked_path_overrides_allowed_path() {
        let mgr = SecurityManager::new();
        let mut p = perms();
        p.allowed_paths = vec!["/data".to_string()];
        p.blocked_paths = vec!["/data/secrets".to_string()];

        assert!(mgr
            .is_file_access_allowed("/data/secrets/keys.txt", &p, AccessType::Read)
            .is_err());
        assert!(mgr
            .is_file_access_allowed("/data/public.txt", &p, AccessType::Read)
            .is_ok());
    }

    #[test]
    fn unresolvable_path_is_denied() {
        let mgr = SecurityManager::new();
        assert!(mgr
            .is_file_access_allowed("relative/path.txt", &perms(), AccessType::Read)
            .is_err());
        assert!(mgr
            .is_file_access_allowed("/bad<path>.txt", &perms(), AccessType::Read)
            .is_err());
    }

    #[test]
    fn sensitive_dir_write_requires_flag() {
        let mgr = SecurityManager::new();
        let p = perms();
        assert!(mgr
            .is_file_access_allowed("/etc/passwd", &p, AccessType::Read)
            .is_ok());
        assert!(mgr
            .is_file_access_allowed("/etc/passwd", &p, AccessType::Write)
            .is_err());

        let p2 = p.with_custom_flag("allow_system_write");
        assert!(mgr
            .is_file_access_allowed("/etc/passwd", &p2, AccessType::Write)
            .is_ok());
    }

    #[test]
    fn executable_extension_requires_flag() {
        let mgr = SecurityManager::new();
        let mut p = perms();
        p.allowed_paths = vec!["/scripts".to_string()];
        assert!(mgr
            .is_file_access_allowed("/scripts/run.sh", &p, AccessType::Execute)
            .is_err());

        let p2 = p.with_custom_flag("allow_executable");
        assert!(mgr
            .is_file_access_allowed("/scripts/run.sh", &p2, AccessType::Execute)
            .is_ok());
    }

    #[test]
    fn loopback_host_denied_without_flag() {
        let mgr = SecurityManager::new();
        let p = perms();
        assert!(mgr.is_network_access_allowed("localhost", &p).is_err());
        assert!(mgr.is_network_access_allowed("127.0.0.1", &p).is_err());

        let p2 = p.with_custom_flag("allow_localhost");
        assert!(mgr.is_network_access_allowed("localhost", &p2).is_ok());
    }

    #[test]
    fn blocked_host_wildcard_overrides_allowed() {
        let mgr = SecurityManager::new();
        let mut p = perms();
        p.allowed_hosts = vec!["*.example.com".to_string()];
        p.blocked_hosts = vec!["internal.example.com".to_string()];

        assert!(mgr
            .is_network_access_allowed("internal.example.com", &p)
            .is_err());
        assert!(mgr.is_network_access_allowed("api.example.com", &p).is_ok());
    }

    #[test]
    fn private_ipv4_denied_without_flag() {
        let mgr = SecurityManager::new();
        let p = perms();
        assert!(mgr.is_network_access_allowed("10.0.0.5", &p).is_err());

        let p2 = p.with_custom_flag("allow_private_networks");
        assert!(mgr.is_network_access_allowed("10.0.0.5", &p2).is_ok());
    }

    #[test]
    fn dangerous_process_denied_without_flag() {
        let mgr = SecurityManager::new();
        let p = perms();
        assert!(mgr.is_process_execution_allowed("bash", &p).is_err());

        let p2 = p.with_custom_flag("allow_dangerous_processes");
        assert!(mgr.is_process_execution_allowed("bash", &p2).is_ok());
    }

    #[test]
    fn tool_specific_override_short_circuits() {
        let mgr = SecurityManager::new();
        let metadata = ToolMetadata {
            id: "shell".to_string(),
            name: "Shell".to_string(),
            description: "runs shell commands".to_string(),
            version: "1.0.0".to_string(),
            category: crate::model::ToolCategory::System,
            required_capabilities: Default::default(),
            parameters: vec![],
            examples: vec![],
            deprecated: false,
            experimental: false,
            tags: vec![],
        };
        let mut p = ToolPermissions::permissive();
        p.tool_specific_permissions.insert("shell".to_string(), false);

        let reasons = mgr.validate_execution(&metadata, &p);
        assert_eq!(reasons.len(), 1);
        assert!(reasons[0].contains("explicitly disabled"));
    }

    #[test]
    fn violation_purge_respects_max_age() {
        let mgr = SecurityManager::new();
        mgr.record_violation("t", "c1", "old", Severity::Low);
        assert_eq!(mgr.all_violations().len(), 1);

        let purged = mgr.clear_old_violations(chrono::Duration::seconds(-1));
        assert_eq!(purged, 1);
        assert!(mgr.all_violations().is_empty());
    }
}
