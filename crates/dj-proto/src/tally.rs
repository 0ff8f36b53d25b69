//! Vote counts keyed by candidate uri, and winner resolution.

use rand::seq::SliceRandom;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mapping from candidate `uri` to its vote count.  Only ever grows by +1.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoteTally {
    counts: BTreeMap<String, u32>,
}

/// Result of closing a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Winner(String),
    NoVotes,
}

impl VoteTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, uri: &str) -> u32 {
        let count = self.counts.entry(uri.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn get(&self, uri: &str) -> u32 {
        self.counts.get(uri).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn total(&self) -> u32 {
        self.counts.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.counts.iter().map(|(uri, count)| (uri.as_str(), *count))
    }

    /// Every uri holding the maximum count, in key order.
    pub fn leaders(&self) -> Vec<&str> {
        let Some(max) = self.counts.values().copied().max() else {
            return Vec::new();
        };
        self.counts
            .iter()
            .filter(|(_, count)| **count == max)
            .map(|(uri, _)| uri.as_str())
            .collect()
    }

    /// Pick the winner: the maximum count, ties broken uniformly at random.
    pub fn resolve(&self, rng: &mut dyn RngCore) -> Resolution {
        match self.leaders().choose(rng) {
            Some(uri) => Resolution::Winner((*uri).to_string()),
            None => Resolution::NoVotes,
        }
    }
}

impl FromIterator<(String, u32)> for VoteTally {
    fn from_iter<I: IntoIterator<Item = (String, u32)>>(iter: I) -> Self {
        Self {
            counts: iter.into_iter().collect(),
        }
    }
}
