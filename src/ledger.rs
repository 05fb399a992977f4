//! Bounded in-memory cache of recent run states.
//!
//! The persisted audit trail lives in the store (`scrape_runs`, `scrape_logs`);
//! this cache only answers "what is happening / what happened lately" without a
//! database round trip. Once `capacity` runs are held, the oldest is evicted.

use crate::models::ScrapeRun;
use std::collections::VecDeque;

#[derive(Debug)]
pub struct RunLedger {
    capacity: usize,
    runs: VecDeque<ScrapeRun>,
}

impl RunLedger {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            runs: VecDeque::with_capacity(capacity),
        }
    }

    /// Track a newly started run, evicting the oldest entry when full.
    pub fn insert(&mut self, run: ScrapeRun) {
        while self.runs.len() >= self.capacity {
            self.runs.pop_front();
        }
        self.runs.push_back(run);
    }

    /// Replace the entry with the same id. Evicted runs are not resurrected.
    pub fn update(&mut self, run: &ScrapeRun) {
        if let Some(slot) = self.runs.iter_mut().rev().find(|r| r.id == run.id) {
            *slot = run.clone();
        }
    }

    pub fn get(&self, id: &str) -> Option<&ScrapeRun> {
        self.runs.iter().find(|r| r.id == id)
    }

    /// Newest first.
    pub fn recent(&self) -> Vec<ScrapeRun> {
        self.runs.iter().rev().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RunStatus;

    fn run(id: &str) -> ScrapeRun {
        ScrapeRun::start(id.to_string(), 1)
    }

    #[test]
    fn test_oldest_run_is_evicted() {
        let mut ledger = RunLedger::new(2);
        ledger.insert(run("a"));
        ledger.insert(run("b"));
        ledger.insert(run("c"));

        assert_eq!(ledger.recent().len(), 2);
        assert!(ledger.get("a").is_none());
        let ids: Vec<_> = ledger.recent().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }

    #[test]
    fn test_update_replaces_in_place() {
        let mut ledger = RunLedger::new(5);
        let mut a = run("a");
        ledger.insert(a.clone());
        a.finish(RunStatus::Completed, false);
        ledger.update(&a);
        assert_eq!(ledger.get("a").unwrap().status, RunStatus::Completed);
    }

    #[test]
    fn test_update_of_evicted_run_is_ignored() {
        let mut ledger = RunLedger::new(1);
        let a = run("a");
        ledger.insert(a.clone());
        ledger.insert(run("b"));
        ledger.update(&a);
        assert_eq!(ledger.recent().len(), 1);
        assert!(ledger.get("a").is_none());
    }

    #[test]
    fn test_zero_capacity_still_keeps_latest() {
        let mut ledger = RunLedger::new(0);
        ledger.insert(run("a"));
        assert_eq!(ledger.recent().len(), 1);
    }
}
