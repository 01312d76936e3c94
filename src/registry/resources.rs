//! Resource vectors and lock-free capacity counters

use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};

/// One of the three accounted resource dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    /// CPU cores
    Cpu,
    /// Memory in MB
    Memory,
    /// Disk in GB
    Disk,
}

impl Dimension {
    pub const ALL: [Dimension; 3] = [Dimension::Cpu, Dimension::Memory, Dimension::Disk];
}

/// A cpu/memory/disk triple
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    /// CPU cores
    #[serde(default)]
    pub cpu: i64,

    /// Memory in MB
    #[serde(default)]
    pub memory: i64,

    /// Disk in GB
    #[serde(default)]
    pub disk: i64,
}

impl Resources {
    pub fn new(cpu: i64, memory: i64, disk: i64) -> Self {
        Self { cpu, memory, disk }
    }

    pub fn get(&self, dim: Dimension) -> i64 {
        match dim {
            Dimension::Cpu => self.cpu,
            Dimension::Memory => self.memory,
            Dimension::Disk => self.disk,
        }
    }

    /// Multiply every dimension by `n`
    pub fn times(&self, n: i64) -> Self {
        Self {
            cpu: self.cpu * n,
            memory: self.memory * n,
            disk: self.disk * n,
        }
    }
}

/// Atomic per-dimension counters
///
/// Adjusted without any other lock held, so the scheduler, the delete
/// pipeline and the supervisor can all touch them concurrently.
#[derive(Debug, Default)]
pub struct ResourceCounters {
    cpu: AtomicI64,
    memory: AtomicI64,
    disk: AtomicI64,
}

impl ResourceCounters {
    pub fn from_resources(resources: Resources) -> Self {
        let counters = Self::default();
        counters.set(resources);
        counters
    }

    fn slot(&self, dim: Dimension) -> &AtomicI64 {
        match dim {
            Dimension::Cpu => &self.cpu,
            Dimension::Memory => &self.memory,
            Dimension::Disk => &self.disk,
        }
    }

    /// Add `delta` to one dimension, returning the new value
    pub fn change(&self, dim: Dimension, delta: i64) -> i64 {
        self.slot(dim).fetch_add(delta, Ordering::SeqCst) + delta
    }

    pub fn get(&self, dim: Dimension) -> i64 {
        self.slot(dim).load(Ordering::SeqCst)
    }

    pub fn add(&self, resources: &Resources) {
        for dim in Dimension::ALL {
            self.change(dim, resources.get(dim));
        }
    }

    pub fn subtract(&self, resources: &Resources) {
        for dim in Dimension::ALL {
            self.change(dim, -resources.get(dim));
        }
    }

    pub fn set(&self, resources: Resources) {
        for dim in Dimension::ALL {
            self.slot(dim).store(resources.get(dim), Ordering::SeqCst);
        }
    }

    pub fn snapshot(&self) -> Resources {
        Resources {
            cpu: self.get(Dimension::Cpu),
            memory: self.get(Dimension::Memory),
            disk: self.get(Dimension::Disk),
        }
    }
}
