//! Findings over recorded history: fields that started undefined, fields whose value
//! flip-flopped back to an earlier one, and fields matching a query.
use enumset::{EnumSet, EnumSetType};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::{
    history::HistoryEntry,
    tree::{ConfigTree, NodeId},
    value::Value,
};

#[derive(Debug, Serialize, Deserialize, PartialOrd, Ord, Hash, EnumSetType)]
#[enumset(repr = "u8")]
pub enum Finding {
    /// The field was declared without a value.
    Undefined,
    /// A value was set, replaced, then set again.
    Confusing,
    /// The field path contains the requested query string.
    Queried,
}

impl Display for Finding {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Finding::Queried => write!(f, "Diagnose"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// True if the field had no value at initialization.
pub fn ever_undefined(trace: &[HistoryEntry]) -> bool {
    trace.first().is_some_and(|entry| !entry.defined)
}

/// True if a value reappears after being replaced by a different one (`0, 1, 0`).
///
/// Only traces made entirely of defined scalars are judged. An undefined entry or
/// any other value kind makes the comparison meaningless and yields `false`.
pub fn flip_flops(trace: &[HistoryEntry]) -> bool {
    let mut last_seen: Vec<(&Value, usize)> = Vec::new();
    for (idx, entry) in trace.iter().enumerate() {
        let Some(value) = entry.value.as_ref().filter(|value| value.is_scalar()) else {
            return false;
        };
        match last_seen.iter_mut().find(|(seen, _)| *seen == value) {
            Some((_, at)) if *at + 1 != idx => return true,
            Some((_, at)) => *at = idx,
            None => last_seen.push((value, idx)),
        }
    }
    false
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldReport {
    /// Dotted field path relative to the diagnosed node.
    pub path: String,
    pub findings: EnumSet<Finding>,
    pub trace: Vec<HistoryEntry>,
}

impl Display for FieldReport {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        for finding in self.findings.iter() {
            writeln!(f, "[{finding}] {}", self.path)?;
        }
        for (idx, entry) in self.trace.iter().enumerate() {
            let label = if idx == 0 { "INIT" } else { "SET " };
            writeln!(
                f,
                ">>> {label} @ {}    = {}",
                entry.call_site,
                entry.rendered_value()
            )?;
        }
        Ok(())
    }
}

impl ConfigTree {
    /// Reports for every field of the tree with at least one finding.
    pub fn diagnose(&self, query: Option<&str>) -> Vec<FieldReport> {
        self.diagnose_node(self.root(), query)
    }

    pub fn diagnose_node(&self, node: NodeId, query: Option<&str>) -> Vec<FieldReport> {
        let query = query.filter(|q| !q.is_empty());
        let reports = self
            .all_history_of(node)
            .into_iter()
            .filter_map(|(path, trace)| {
                let mut findings = EnumSet::new();
                if ever_undefined(&trace) {
                    findings |= Finding::Undefined;
                }
                if flip_flops(&trace) {
                    findings |= Finding::Confusing;
                }
                if query.is_some_and(|q| path.contains(q)) {
                    findings |= Finding::Queried;
                }
                (!findings.is_empty()).then_some(FieldReport {
                    path,
                    findings,
                    trace,
                })
            })
            .collect::<Vec<_>>();
        tracing::debug!(
            "[ConfigTree::diagnose] {} field(s) flagged under {}",
            reports.len(),
            self.qualified_name(node)
        );
        reports
    }
}
