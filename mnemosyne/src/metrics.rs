use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Success,
    Failure,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
        };
        f.write_str(s)
    }
}

impl<T, E> From<&std::result::Result<T, E>> for Outcome {
    fn from(res: &std::result::Result<T, E>) -> Self {
        if res.is_ok() {
            Outcome::Success
        } else {
            Outcome::Failure
        }
    }
}

/// Receives one record per executed statement, keyed by the statement text.
pub trait QueryRecorder: Send + Sync {
    fn record(&self, query: &str, outcome: Outcome);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRecorder;

impl QueryRecorder for NoopRecorder {
    fn record(&self, _query: &str, _outcome: Outcome) {}
}

/// In-process counters per `(query, outcome)`.
#[derive(Debug, Default)]
pub struct QueryCounters {
    counts: Mutex<HashMap<(String, Outcome), u64>>,
}

impl QueryCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, query: &str, outcome: Outcome) -> u64 {
        self.counts
            .lock()
            .get(&(query.to_owned(), outcome))
            .copied()
            .unwrap_or(0)
    }

    /// Sum over every query for one outcome.
    pub fn total(&self, outcome: Outcome) -> u64 {
        self.counts
            .lock()
            .iter()
            .filter(|((_, o), _)| *o == outcome)
            .map(|(_, n)| *n)
            .sum()
    }

    /// Distinct queries that recorded at least one `outcome`.
    pub fn queries(&self, outcome: Outcome) -> Vec<String> {
        let mut out: Vec<String> = self
            .counts
            .lock()
            .keys()
            .filter(|(_, o)| *o == outcome)
            .map(|(q, _)| q.clone())
            .collect();
        out.sort();
        out
    }

    pub fn snapshot(&self) -> Vec<(String, Outcome, u64)> {
        let mut out: Vec<_> = self
            .counts
            .lock()
            .iter()
            .map(|((q, o), n)| (q.clone(), *o, *n))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

impl QueryRecorder for QueryCounters {
    fn record(&self, query: &str, outcome: Outcome) {
        *self
            .counts
            .lock()
            .entry((query.to_owned(), outcome))
            .or_insert(0) += 1;
    }
}
