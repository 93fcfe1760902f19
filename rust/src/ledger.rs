//! Thread ledger: worker memory converted into thread capacity.
//!
//! Rebuilt from a fresh snapshot every pass; nothing here survives between
//! passes.

use rustc_hash::FxHashMap;

use crate::config::LedgerConfig;
use crate::models::{DispatchTag, RunningOperation, WorkerNode};

/// Thread capacity of one worker node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeThreads {
    pub node_id: String,
    pub max_threads: u32,
    pub free_threads: u32,
    /// Threads tagged `batch` currently running on this node
    pub batch_threads: u32,
    /// Threads tagged `remedial` currently running on this node
    pub remedial_threads: u32,
}

impl NodeThreads {
    pub fn used_threads(&self) -> u32 {
        self.max_threads.saturating_sub(self.free_threads)
    }
}

/// Per-pass view of thread capacity across all usable worker nodes.
#[derive(Clone, Debug, Default)]
pub struct ThreadLedger {
    nodes: Vec<NodeThreads>,
    /// Threads running against each target, from tagged operations
    target_threads: FxHashMap<String, u32>,
}

impl ThreadLedger {
    /// Build the ledger from worker and process snapshots.
    ///
    /// Nodes without admin access or capacity are skipped. The reserved node
    /// loses `reserved_memory` before conversion.
    pub fn from_snapshot(
        workers: &[WorkerNode],
        operations: &[RunningOperation],
        config: &LedgerConfig,
    ) -> Self {
        let mut nodes: Vec<NodeThreads> = workers
            .iter()
            .filter(|w| w.has_admin && w.max_memory > 0.0)
            .map(|w| {
                let mut max_memory = w.max_memory;
                if w.id == config.reserved_node {
                    max_memory -= config.reserved_memory;
                }
                let free_memory = max_memory - w.used_memory;
                NodeThreads {
                    node_id: w.id.clone(),
                    max_threads: memory_to_threads(max_memory, config.thread_memory_cost),
                    free_threads: memory_to_threads(free_memory, config.thread_memory_cost),
                    batch_threads: 0,
                    remedial_threads: 0,
                }
            })
            .collect();

        let mut target_threads: FxHashMap<String, u32> = FxHashMap::default();
        for op in operations {
            let Some(tag) = op.tag else {
                continue;
            };
            *target_threads.entry(op.target_id.clone()).or_default() += op.threads;
            if let Some(node) = nodes.iter_mut().find(|n| n.node_id == op.worker_id) {
                match tag {
                    DispatchTag::Batch => node.batch_threads += op.threads,
                    DispatchTag::Remedial => node.remedial_threads += op.threads,
                    DispatchTag::Cycle => {}
                }
            }
        }

        Self {
            nodes,
            target_threads,
        }
    }

    pub fn nodes(&self) -> &[NodeThreads] {
        &self.nodes
    }

    pub fn max_threads(&self) -> u32 {
        self.nodes.iter().map(|n| n.max_threads).sum()
    }

    pub fn free_threads(&self) -> u32 {
        self.nodes.iter().map(|n| n.free_threads).sum()
    }

    pub fn remedial_threads(&self) -> u32 {
        self.nodes.iter().map(|n| n.remedial_threads).sum()
    }

    pub fn batch_threads(&self) -> u32 {
        self.nodes.iter().map(|n| n.batch_threads).sum()
    }

    /// Threads this scheduler has running against `target_id`.
    pub fn threads_against(&self, target_id: &str) -> u32 {
        self.target_threads.get(target_id).copied().unwrap_or(0)
    }

    /// Take up to `threads` free threads, filling nodes in snapshot order.
    ///
    /// Returns the placements. A request larger than what is free is
    /// satisfied partially.
    pub fn allocate(&mut self, threads: u32) -> Vec<(String, u32)> {
        let mut placements = Vec::new();
        let mut remaining = threads;
        for node in &mut self.nodes {
            if remaining == 0 {
                break;
            }
            if node.free_threads == 0 {
                continue;
            }
            let take = node.free_threads.min(remaining);
            node.free_threads -= take;
            remaining -= take;
            placements.push((node.node_id.clone(), take));
        }
        placements
    }

    /// Hand back threads from a placement whose dispatch failed.
    pub fn release(&mut self, node_id: &str, threads: u32) {
        if let Some(node) = self.nodes.iter_mut().find(|n| n.node_id == node_id) {
            node.free_threads = (node.free_threads + threads).min(node.max_threads);
        }
    }
}

fn memory_to_threads(memory: f64, cost: f64) -> u32 {
    if memory <= 0.0 || cost <= 0.0 {
        return 0;
    }
    (memory / cost).floor() as u32
}
