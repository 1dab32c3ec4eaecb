//! Resource sizing advisor
//!
//! Recommends how many automation sessions can run side by side:
//!
//! ```text
//! recommended = max(1, min(available / per_session_memory, cpus / cores_per_session, roster))
//! ```
//!
//! What counts as "available" memory is a policy. Linux reports a usable
//! `MemAvailable` figure; other platforms count cache as used and
//! undercount free memory, so a fixed fraction of total memory is used
//! there instead.

use crate::error::SizingError;
use serde::{Deserialize, Serialize};

/// Bytes per GiB
pub const GIB: u64 = 1024 * 1024 * 1024;

/// Point-in-time view of host resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    /// Logical CPUs
    pub cpu_count: usize,
    /// Installed memory
    pub total_memory_bytes: u64,
    /// Memory the OS reports as available, when it reports it reliably
    pub free_memory_bytes: Option<u64>,
}

/// Estimates memory available for new sessions
pub trait MemoryEstimator: Send + Sync + std::fmt::Debug {
    /// Bytes considered available
    fn available_bytes(&self, snapshot: &SystemSnapshot) -> u64;

    /// Policy name for display
    fn name(&self) -> &'static str;
}

/// Raw free memory as reported by the OS
#[derive(Debug, Clone, Copy, Default)]
pub struct FreeMemory;

impl MemoryEstimator for FreeMemory {
    fn available_bytes(&self, snapshot: &SystemSnapshot) -> u64 {
        snapshot.free_memory_bytes.unwrap_or(0)
    }

    fn name(&self) -> &'static str {
        "free"
    }
}

/// Fixed fraction of total memory
#[derive(Debug, Clone, Copy)]
pub struct FractionOfTotal {
    fraction: f64,
}

impl FractionOfTotal {
    /// Create estimator; fraction is clamped to `0.0..=1.0`
    #[inline]
    #[must_use]
    pub fn new(fraction: f64) -> Self {
        Self {
            fraction: fraction.clamp(0.0, 1.0),
        }
    }
}

impl MemoryEstimator for FractionOfTotal {
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn available_bytes(&self, snapshot: &SystemSnapshot) -> u64 {
        (snapshot.total_memory_bytes as f64 * self.fraction) as u64
    }

    fn name(&self) -> &'static str {
        "fraction-of-total"
    }
}

/// Memory policy selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryPolicy {
    /// Free memory when the platform reports it, fraction of total otherwise
    #[default]
    Auto,
    /// Always raw free memory
    Free,
    /// Always a fraction of total
    Fraction,
}

impl MemoryPolicy {
    /// Build the estimator for this policy on the given host
    #[must_use]
    pub fn estimator(self, fraction: f64, snapshot: &SystemSnapshot) -> Box<dyn MemoryEstimator> {
        match self {
            Self::Free => Box::new(FreeMemory),
            Self::Fraction => Box::new(FractionOfTotal::new(fraction)),
            Self::Auto if snapshot.free_memory_bytes.is_some() => Box::new(FreeMemory),
            Self::Auto => Box::new(FractionOfTotal::new(fraction)),
        }
    }
}

/// Sizing parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SizingConfig {
    /// Memory budget per session in GiB
    pub per_session_memory_gb: f64,
    /// CPU cores per session
    pub cores_per_session: usize,
    /// How available memory is estimated
    pub memory_policy: MemoryPolicy,
    /// Fraction of total memory for the fraction policy
    pub memory_fraction: f64,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            per_session_memory_gb: 0.75,
            cores_per_session: 2,
            memory_policy: MemoryPolicy::Auto,
            memory_fraction: 0.5,
        }
    }
}

impl SizingConfig {
    /// Per-session memory budget in bytes
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    #[must_use]
    pub fn per_session_bytes(&self) -> u64 {
        (self.per_session_memory_gb * GIB as f64) as u64
    }
}

/// Advisor output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sizing {
    /// Logical CPUs
    pub cpu_count: usize,
    /// Installed memory in GiB
    pub total_memory_gb: f64,
    /// Memory counted as available in GiB
    pub available_memory_gb: f64,
    /// Policy used for available memory
    pub policy: &'static str,
    /// Bound from memory
    pub by_memory: usize,
    /// Bound from CPUs
    pub by_cpu: usize,
    /// Recommended worker count
    pub recommended: usize,
}

/// Pure worker-count formula
///
/// Always at least 1. For a non-empty roster never more than the roster size.
#[must_use]
pub fn recommended_workers(by_memory: usize, by_cpu: usize, roster_size: usize) -> usize {
    by_memory.min(by_cpu).min(roster_size).max(1)
}

/// Computes a safe concurrency bound
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceAdvisor {
    config: SizingConfig,
}

impl ResourceAdvisor {
    /// Create advisor
    #[inline]
    #[must_use]
    pub fn new(config: SizingConfig) -> Self {
        Self { config }
    }

    /// Recommend a worker count for `roster_size` people on this host
    ///
    /// # Errors
    /// - `SizingError::InvalidBudget` if a per-session budget is not positive
    #[allow(clippy::cast_precision_loss)]
    pub fn advise(
        &self,
        snapshot: &SystemSnapshot,
        roster_size: usize,
    ) -> Result<Sizing, SizingError> {
        let per_session = self.config.per_session_bytes();
        if per_session == 0 {
            return Err(SizingError::InvalidBudget(format!(
                "memory {} GiB",
                self.config.per_session_memory_gb
            )));
        }
        if self.config.cores_per_session == 0 {
            return Err(SizingError::InvalidBudget("0 cores".to_string()));
        }

        let estimator = self
            .config
            .memory_policy
            .estimator(self.config.memory_fraction, snapshot);
        let available = estimator.available_bytes(snapshot);

        let by_memory = usize::try_from(available / per_session).unwrap_or(usize::MAX);
        let by_cpu = snapshot.cpu_count / self.config.cores_per_session;
        let recommended = recommended_workers(by_memory, by_cpu, roster_size);

        tracing::debug!(
            "sizing: policy={} by_memory={} by_cpu={} roster={} -> {}",
            estimator.name(),
            by_memory,
            by_cpu,
            roster_size,
            recommended
        );

        Ok(Sizing {
            cpu_count: snapshot.cpu_count,
            total_memory_gb: snapshot.total_memory_bytes as f64 / GIB as f64,
            available_memory_gb: available as f64 / GIB as f64,
            policy: estimator.name(),
            by_memory,
            by_cpu,
            recommended,
        })
    }
}

/// Read CPU and memory figures for the current host
///
/// # Errors
/// - `SizingError::Probe` if memory information is unavailable
pub fn probe_system() -> Result<SystemSnapshot, SizingError> {
    let cpu_count = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);

    if let Ok(text) = std::fs::read_to_string("/proc/meminfo") {
        if let Some((total, available)) = parse_meminfo(&text) {
            return Ok(SystemSnapshot {
                cpu_count,
                total_memory_bytes: total,
                free_memory_bytes: available,
            });
        }
    }

    if cfg!(target_os = "macos") {
        let output = std::process::Command::new("sysctl")
            .args(["-n", "hw.memsize"])
            .output()
            .map_err(|e| SizingError::Probe(format!("sysctl: {e}")))?;
        let total = String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse::<u64>()
            .map_err(|e| SizingError::Probe(format!("hw.memsize: {e}")))?;
        // Free pages exclude the file cache here, so no free figure is reported
        return Ok(SystemSnapshot {
            cpu_count,
            total_memory_bytes: total,
            free_memory_bytes: None,
        });
    }

    Err(SizingError::Probe(
        "no memory information source on this platform".to_string(),
    ))
}

/// Parse `MemTotal` and `MemAvailable` (in bytes) from `/proc/meminfo`
#[must_use]
pub fn parse_meminfo(text: &str) -> Option<(u64, Option<u64>)> {
    let field = |key: &str| -> Option<u64> {
        text.lines().find_map(|line| {
            let rest = line.strip_prefix(key)?.strip_prefix(':')?;
            let kb = rest.trim().trim_end_matches("kB").trim().parse::<u64>().ok()?;
            Some(kb * 1024)
        })
    };
    Some((field("MemTotal")?, field("MemAvailable")))
}
