//! Bounded working-set buffer of recent raw events (spec.md §4.5), grounded
//! in the teacher's triage-queue shape (`ConsolidationScheduler`) but
//! restricted to a plain raw-event ring buffer: no FSRS, no dream phases.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct WorkingSetEntry {
    pub event_id: String,
    pub session_id: String,
    pub topics: Vec<String>,
    pub relevance: f64,
    pub timestamp: DateTime<Utc>,
}

pub struct WorkingSet {
    entries: VecDeque<WorkingSetEntry>,
    max_events: usize,
    time_window_hours: i64,
}

impl WorkingSet {
    pub fn new(max_events: usize, time_window_hours: i64) -> Self {
        Self { entries: VecDeque::new(), max_events, time_window_hours }
    }

    /// Push a new entry then evict: first by timestamp outside the window,
    /// then by lowest relevance until back under `max_events`.
    pub fn push(&mut self, entry: WorkingSetEntry) {
        self.entries.push_back(entry);
        self.evict();
    }

    fn evict(&mut self) {
        let cutoff = Utc::now() - chrono::Duration::hours(self.time_window_hours);
        self.entries.retain(|e| e.timestamp >= cutoff);

        while self.entries.len() > self.max_events {
            let min_idx = self
                .entries
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| a.relevance.partial_cmp(&b.relevance).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(i, _)| i);
            match min_idx {
                Some(i) => {
                    self.entries.remove(i);
                }
                None => break,
            }
        }
    }

    pub fn snapshot(&self) -> Vec<WorkingSetEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove entries by `event_id`, used after a cluster is consolidated.
    pub fn remove_ids(&mut self, ids: &std::collections::HashSet<String>) {
        self.entries.retain(|e| !ids.contains(&e.event_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, relevance: f64) -> WorkingSetEntry {
        WorkingSetEntry {
            event_id: id.to_string(),
            session_id: "s1".to_string(),
            topics: vec!["topic".to_string()],
            relevance,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn evicts_lowest_relevance_over_cap() {
        let mut ws = WorkingSet::new(2, 24);
        ws.push(entry("a", 0.9));
        ws.push(entry("b", 0.1));
        ws.push(entry("c", 0.5));

        let ids: Vec<_> = ws.snapshot().into_iter().map(|e| e.event_id).collect();
        assert_eq!(ids.len(), 2);
        assert!(!ids.contains(&"b".to_string()));
    }

    #[test]
    fn remove_ids_prunes_consolidated_sources() {
        let mut ws = WorkingSet::new(10, 24);
        ws.push(entry("a", 0.5));
        ws.push(entry("b", 0.5));
        let mut ids = std::collections::HashSet::new();
        ids.insert("a".to_string());
        ws.remove_ids(&ids);
        assert_eq!(ws.len(), 1);
    }
}
