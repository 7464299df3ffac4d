//! Per-instance runtime context
//!
//! One `InstanceContext` is built at process start and shared (via `Arc`)
//! with the reporter, the command bus and the API. It owns everything the
//! instance mutates locally:
//!
//! - the memory ballast allocated by `leak` instructions
//! - the active task registry counting running compute jobs
//! - the change notification asking the reporter for an out-of-band write
//!
//! Ballast is only touched from the command bus task; the registry is an
//! atomic counter because compute jobs finish on the blocking pool.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{Notify, oneshot};
use tracing::{debug, trace};

use crate::InstanceSnapshot;
use crate::config::InstanceConfig;

/// Source of the process' current memory usage
pub trait MemoryProbe: Send + Sync {
    /// Resident memory of this process in bytes
    fn used_bytes(&self) -> u64;
}

/// Reads the resident set size of the current process through `sysinfo`
pub struct SysinfoProbe {
    pid: Option<sysinfo::Pid>,
    system: Mutex<sysinfo::System>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            pid: sysinfo::get_current_pid().ok(),
            system: Mutex::new(sysinfo::System::new()),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SysinfoProbe {
    fn used_bytes(&self) -> u64 {
        let Some(pid) = self.pid else {
            return 0;
        };
        let Ok(mut system) = self.system.lock() else {
            return 0;
        };

        system.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[pid]), true);
        system.process(pid).map(|process| process.memory()).unwrap_or(0)
    }
}

/// Probe reporting a fixed usage, for tests and simulations
#[derive(Debug, Clone, Copy)]
pub struct FixedProbe(pub u64);

impl MemoryProbe for FixedProbe {
    fn used_bytes(&self) -> u64 {
        self.0
    }
}

/// CPU-bound job run by `compute` instructions
pub type ComputeJob = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Naive recursive fibonacci, the default compute job
pub fn fibonacci(n: u32) -> u64 {
    if n < 2 {
        n as u64
    } else {
        fibonacci(n - 1) + fibonacci(n - 2)
    }
}

/// Decrements the active task registry exactly once when dropped
struct ActiveTaskGuard {
    registry: Arc<AtomicUsize>,
}

impl ActiveTaskGuard {
    fn register(registry: &Arc<AtomicUsize>) -> Self {
        registry.fetch_add(1, Ordering::SeqCst);
        Self {
            registry: Arc::clone(registry),
        }
    }
}

impl Drop for ActiveTaskGuard {
    fn drop(&mut self) {
        self.registry.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Explicit runtime state of one instance
pub struct InstanceContext {
    instance_id: String,
    memory_limit_bytes: u64,
    leak_fraction: f64,
    probe: Box<dyn MemoryProbe>,
    compute_job: ComputeJob,
    ballast: Mutex<Vec<Vec<u8>>>,
    active_tasks: Arc<AtomicUsize>,
    changed: Notify,
}

impl fmt::Debug for InstanceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceContext")
            .field("instance_id", &self.instance_id)
            .field("memory_limit_bytes", &self.memory_limit_bytes)
            .field("active_tasks", &self.active_tasks())
            .field("ballast_bytes", &self.ballast_bytes())
            .finish()
    }
}

impl InstanceContext {
    pub fn new(
        instance_id: impl Into<String>,
        memory_limit_bytes: u64,
        probe: Box<dyn MemoryProbe>,
        compute_job: ComputeJob,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            memory_limit_bytes,
            leak_fraction: 0.5,
            probe,
            compute_job,
            ballast: Mutex::new(Vec::new()),
            active_tasks: Arc::new(AtomicUsize::new(0)),
            changed: Notify::new(),
        }
    }

    /// Build the production context: sysinfo probe and fibonacci job
    pub fn from_config(config: &InstanceConfig) -> Self {
        let n = config.compute_parameter;
        let job: ComputeJob = Arc::new(move || fibonacci(n));

        Self::new(
            config.instance_id.clone(),
            config.memory_limit_bytes(),
            Box::new(SysinfoProbe::new()),
            job,
        )
        .with_leak_fraction(config.leak_fraction)
    }

    pub fn with_leak_fraction(mut self, fraction: f64) -> Self {
        self.leak_fraction = fraction.clamp(0.0, 1.0);
        self
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn memory_limit_bytes(&self) -> u64 {
        self.memory_limit_bytes
    }

    pub fn leak_fraction(&self) -> f64 {
        self.leak_fraction
    }

    pub fn memory_used_bytes(&self) -> u64 {
        self.probe.used_bytes()
    }

    pub fn memory_free_bytes(&self) -> u64 {
        self.memory_limit_bytes.saturating_sub(self.memory_used_bytes())
    }

    /// Number of compute jobs currently running
    pub fn active_tasks(&self) -> usize {
        self.active_tasks.load(Ordering::SeqCst)
    }

    /// Current resource snapshot stamped with `now_ms`
    pub fn snapshot(&self, now_ms: i64) -> InstanceSnapshot {
        InstanceSnapshot::from_bytes(
            self.active_tasks() as u64,
            self.memory_used_bytes(),
            self.memory_limit_bytes,
            now_ms,
        )
    }

    /// Allocate and touch a ballast block of `bytes`
    ///
    /// Uses a fallible reservation so an oversized request is reported
    /// instead of aborting the process.
    pub fn allocate_ballast(&self, bytes: usize) -> anyhow::Result<()> {
        if bytes == 0 {
            return Ok(());
        }

        let mut block = Vec::new();
        block
            .try_reserve_exact(bytes)
            .map_err(|e| anyhow::anyhow!("failed to reserve {bytes} bytes of ballast: {e}"))?;
        block.resize(bytes, b'x');

        self.lock_ballast().push(block);
        debug!("allocated {bytes} bytes of ballast");

        Ok(())
    }

    /// Release every ballast block, returning the number of bytes freed
    pub fn clear_ballast(&self) -> usize {
        let blocks = std::mem::take(&mut *self.lock_ballast());
        let freed = blocks.iter().map(Vec::len).sum();
        debug!("released {} ballast blocks ({freed} bytes)", blocks.len());
        freed
    }

    /// Total bytes currently held as ballast
    pub fn ballast_bytes(&self) -> usize {
        self.lock_ballast().iter().map(Vec::len).sum()
    }

    fn lock_ballast(&self) -> std::sync::MutexGuard<'_, Vec<Vec<u8>>> {
        // a panic while holding the lock cannot leave the Vec half-updated
        self.ballast
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run the compute job on the blocking pool
    ///
    /// The registry is incremented before this returns and decremented once
    /// the job finishes, panics included. The job's result is delivered on
    /// the returned channel; it is closed without a value if the job panicked.
    pub fn start_compute(&self) -> oneshot::Receiver<u64> {
        let (tx, rx) = oneshot::channel();
        let guard = ActiveTaskGuard::register(&self.active_tasks);
        let job = Arc::clone(&self.compute_job);

        trace!("starting compute job ({} active)", self.active_tasks());

        tokio::task::spawn_blocking(move || {
            let result = job();
            drop(guard);
            let _ = tx.send(result);
        });

        rx
    }

    /// Ask the reporter for an immediate snapshot write
    pub fn notify_changed(&self) {
        self.changed.notify_one();
    }

    /// Wait until `notify_changed` is called
    ///
    /// A notification sent while nobody waits is kept for the next call.
    pub async fn changed(&self) {
        self.changed.notified().await;
    }
}
