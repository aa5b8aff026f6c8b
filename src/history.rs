//! Per-field assignment history.
//!
//! Every write to a slot, including the construction-time initialization, appends one
//! [HistoryEntry]. Entries are never pruned, so the full sequence of defaults,
//! constructor writes, merges and direct mutations stays available for diagnosis.
use serde::Serialize;
use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter},
    panic::Location,
};

use crate::{
    tree::{ConfigTree, NodeId},
    value::Value,
};

/// Who performed a write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "schema")]
pub enum Origin {
    /// Declared default of the named schema.
    Default(String),
    /// Written by a constructor hook of the named schema while the tree was built.
    Constructor(String),
    Merge,
    Direct,
}

impl Display for Origin {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Origin::Default(schema) => write!(f, "default of {schema}"),
            Origin::Constructor(schema) => write!(f, "constructor of {schema}"),
            Origin::Merge => write!(f, "merge"),
            Origin::Direct => write!(f, "set"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallSite {
    pub origin: Origin,
    /// `file:line:column` of the write, or a descriptor for non-Rust sources.
    pub location: String,
}

impl CallSite {
    pub fn new(origin: Origin, location: impl Into<String>) -> CallSite {
        CallSite {
            origin,
            location: location.into(),
        }
    }

    /// Capture the caller's source location.
    #[track_caller]
    pub fn here(origin: Origin) -> CallSite {
        CallSite::at(origin, Location::caller())
    }

    pub fn at(origin: Origin, location: &Location<'_>) -> CallSite {
        CallSite::new(
            origin,
            format!(
                "{}:{}:{}",
                location.file(),
                location.line(),
                location.column()
            ),
        )
    }
}

impl Display for CallSite {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.location, self.origin)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    /// `None` when the field was declared without a value.
    pub value: Option<Value>,
    pub call_site: CallSite,
    pub defined: bool,
}

impl HistoryEntry {
    pub fn rendered_value(&self) -> String {
        match &self.value {
            Some(value) => value.to_string(),
            None => "<undefined>".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct History {
    records: BTreeMap<(NodeId, String), Vec<HistoryEntry>>,
}

impl History {
    pub fn record(&mut self, node: NodeId, field: &str, value: Option<Value>, call_site: CallSite) {
        tracing::trace!(
            "[History::record] node {} field {} <- {:?} @ {}",
            node.index(),
            field,
            value,
            call_site
        );
        let defined = value.is_some();
        self.records
            .entry((node, field.to_string()))
            .or_default()
            .push(HistoryEntry {
                value,
                call_site,
                defined,
            });
    }

    pub fn of(&self, node: NodeId, field: &str) -> &[HistoryEntry] {
        self.records
            .get(&(node, field.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Total number of recorded entries across all fields.
    pub fn len(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl ConfigTree {
    pub fn history(&self) -> &History {
        &self.history
    }

    /// History of every field in the tree, keyed by dotted path from the root.
    pub fn all_history(&self) -> BTreeMap<String, Vec<HistoryEntry>> {
        self.all_history_of(self.root())
    }

    /// History of every field under `node`, keyed by dotted path relative to `node`.
    pub fn all_history_of(&self, node: NodeId) -> BTreeMap<String, Vec<HistoryEntry>> {
        let mut out = BTreeMap::new();
        self.collect_history(node, "", &mut out);
        out
    }

    fn collect_history(
        &self,
        node: NodeId,
        prefix: &str,
        out: &mut BTreeMap<String, Vec<HistoryEntry>>,
    ) {
        let Some(config_node) = self.node(node) else {
            return;
        };
        for (field, slot) in config_node.slots() {
            let path = if prefix.is_empty() {
                field.to_string()
            } else {
                format!("{prefix}.{field}")
            };
            out.insert(path.clone(), self.history.of(node, field).to_vec());
            if let Some(Value::Node(child)) = slot {
                self.collect_history(*child, &path, out);
            }
        }
    }
}
