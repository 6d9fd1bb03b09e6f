//! Per-opcode execution counters.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::bytecode::OpCode;

/// Count and cumulative wall time of one opcode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpStats {
    pub count: u64,
    pub total: Duration,
}

/// Cumulative execution statistics, keyed by opcode.
#[derive(Debug, Clone, Default)]
pub struct OpProfile {
    stats: HashMap<OpCode, OpStats>,
}

impl OpProfile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, op: OpCode, elapsed: Duration) {
        let entry = self.stats.entry(op).or_default();
        entry.count += 1;
        entry.total += elapsed;
    }

    pub fn get(&self, op: OpCode) -> Option<OpStats> {
        self.stats.get(&op).copied()
    }

    /// Total number of instructions executed.
    pub fn instructions(&self) -> u64 {
        self.stats.values().map(|s| s.count).sum()
    }

    /// Entries ordered by total time, slowest first.
    pub fn sorted(&self) -> Vec<(OpCode, OpStats)> {
        let mut entries: Vec<_> = self.stats.iter().map(|(op, s)| (*op, *s)).collect();
        entries.sort_by(|a, b| b.1.total.cmp(&a.1.total).then(b.1.count.cmp(&a.1.count)));
        entries
    }

    pub fn clear(&mut self) {
        self.stats.clear();
    }
}

impl fmt::Display for OpProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<16} {:>10} {:>14}", "opcode", "count", "total")?;
        for (op, stats) in self.sorted() {
            writeln!(
                f,
                "{:<16} {:>10} {:>14}",
                op.name(),
                stats.count,
                format!("{:?}", stats.total)
            )?;
        }
        Ok(())
    }
}
