// src/resources.rs
//
// Resource Ledger: tracks abstract cpu/memory capacity and grants it to
// jobs atomically. `try_acquire` is a total function — it never blocks
// and never waits on another acquire — so the guard is a plain
// synchronous mutex rather than an async one.

use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceSnapshot {
    pub cpu_total: u32,
    pub cpu_free: u32,
    pub mem_total: u32,
    pub mem_free: u32,
}

struct Inner {
    cpu_total: u32,
    cpu_free: u32,
    mem_total: u32,
    mem_free: u32,
}

pub struct ResourceLedger {
    inner: Mutex<Inner>,
}

impl ResourceLedger {
    pub fn new(cpu_total: u32, mem_total: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                cpu_total,
                cpu_free: cpu_total,
                mem_total,
                mem_free: mem_total,
            }),
        }
    }

    /// Non-blocking grant attempt. Returns `true` and debits the ledger
    /// iff both requested quantities are currently available.
    pub fn try_acquire(&self, cpu_units: u32, memory_mb: u32) -> bool {
        let mut g = self.inner.lock().expect("resource ledger poisoned");
        if g.cpu_free >= cpu_units && g.mem_free >= memory_mb {
            g.cpu_free -= cpu_units;
            g.mem_free -= memory_mb;
            true
        } else {
            false
        }
    }

    /// Returns resources previously granted by `try_acquire`. Panics if a
    /// counter would exceed its total capacity — that can only happen on
    /// a double-release, and masking it with a clamp would hide the bug
    /// instead of surfacing it.
    pub fn release(&self, cpu_units: u32, memory_mb: u32) {
        let mut g = self.inner.lock().expect("resource ledger poisoned");
        g.cpu_free += cpu_units;
        g.mem_free += memory_mb;
        assert!(g.cpu_free <= g.cpu_total, "cpu_free exceeded cpu_total on release: double-release?");
        assert!(g.mem_free <= g.mem_total, "mem_free exceeded mem_total on release: double-release?");
    }

    /// Whether a request could ever be satisfied, even with the ledger
    /// fully drained back to capacity. Used at submission time to reject
    /// jobs that can never run (UNSATISFIABLE_RESOURCES).
    pub fn is_satisfiable(&self, cpu_units: u32, memory_mb: u32) -> bool {
        let g = self.inner.lock().expect("resource ledger poisoned");
        cpu_units <= g.cpu_total && memory_mb <= g.mem_total
    }

    pub fn snapshot(&self) -> ResourceSnapshot {
        let g = self.inner.lock().expect("resource ledger poisoned");
        ResourceSnapshot {
            cpu_total: g.cpu_total,
            cpu_free: g.cpu_free,
            mem_total: g.mem_total,
            mem_free: g.mem_free,
        }
    }
}
