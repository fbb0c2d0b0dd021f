//! Watches free memory so the sort engine knows when to spill.
//!
//! A background thread samples the available memory once per interval. Memory counts as low
//! when the free amount, extrapolated one interval ahead from the last change, falls below the
//! safety margin.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use sysinfo::System;
use tracing::debug;

use crate::error::Result;

/// The signal consumed by spilling code.
pub trait MemoryPressure: Send + Sync {
    /// True if the process should give memory back before buffering more.
    fn low_memory(&self) -> bool;
    /// Called after memory was released, so the signal is refreshed early.
    fn reclaim(&self);
}

/// True if `cur` free bytes, continuing the trend from `prev`, drop below `margin`.
pub fn projected_low(prev: u64, cur: u64, margin: u64) -> bool {
    let (prev, cur) = (prev as i128, cur as i128);
    cur - (prev - cur) < margin as i128
}

#[derive(Default)]
struct Shared {
    low: AtomicBool,
    stop: AtomicBool,
}

pub struct MemoryMonitor {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl MemoryMonitor {
    pub fn start(margin: u64, interval: Duration) -> Result<MemoryMonitor> {
        let shared = Arc::new(Shared::default());
        let s = shared.clone();
        let thread = thread::Builder::new()
            .name(String::from("memory-monitor"))
            .spawn(move || watch(s, margin, interval))?;
        Ok(MemoryMonitor {
            shared: shared,
            thread: Some(thread),
        })
    }
}

fn watch(shared: Arc<Shared>, margin: u64, interval: Duration) {
    let mut sys = System::new();
    sys.refresh_memory();
    let mut cur = sys.available_memory();

    while !shared.stop.load(Ordering::Acquire) {
        let prev = cur;
        // Woken early by reclaim() or on shutdown.
        thread::park_timeout(interval);
        if shared.stop.load(Ordering::Acquire) {
            break;
        }
        sys.refresh_memory();
        cur = sys.available_memory();

        let low = projected_low(prev, cur, margin);
        if low != shared.low.swap(low, Ordering::AcqRel) {
            debug!(free = cur, low = low, "memory state changed");
        }
    }
}

impl MemoryPressure for MemoryMonitor {
    fn low_memory(&self) -> bool {
        self.shared.low.load(Ordering::Acquire)
    }

    fn reclaim(&self) {
        if let Some(ref t) = self.thread {
            t.thread().unpark();
        }
    }
}

impl Drop for MemoryMonitor {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        if let Some(t) = self.thread.take() {
            t.thread().unpark();
            let _ = t.join();
        }
    }
}
