//! Per-tag token accounting
//!
//! One ledger per gateway, tagged per call site (l1, l2, curate,
//! reconcile), read by the reporting path at end of run and reset on
//! caller demand. It is not shared across pipeline runs unless the caller
//! keeps the same gateway and opts out of resetting.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use super::Usage;

/// Accumulated usage for one tag
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagUsage {
    pub calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TagUsage {
    fn add(&mut self, usage: Option<&Usage>) {
        self.calls += 1;
        if let Some(u) = usage {
            self.prompt_tokens += u.prompt_tokens;
            self.completion_tokens += u.completion_tokens;
        }
    }
}

/// End-of-run snapshot of the ledger
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
    pub per_tag: BTreeMap<String, TagUsage>,
    pub total: TagUsage,
}

/// Thread-safe per-tag accumulator
#[derive(Debug, Default)]
pub struct UsageLedger {
    inner: Mutex<BTreeMap<String, TagUsage>>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one call under a tag
    pub fn record(&self, tag: &str, usage: Option<&Usage>) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.entry(tag.to_string()).or_default().add(usage);
        }
    }

    /// Snapshot the ledger
    pub fn report(&self) -> UsageReport {
        let per_tag = self
            .inner
            .lock()
            .map(|inner| inner.clone())
            .unwrap_or_default();
        let mut total = TagUsage::default();
        for usage in per_tag.values() {
            total.calls += usage.calls;
            total.prompt_tokens += usage.prompt_tokens;
            total.completion_tokens += usage.completion_tokens;
        }
        UsageReport { per_tag, total }
    }

    /// Clear all counters
    pub fn reset(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.clear();
        }
    }
}
