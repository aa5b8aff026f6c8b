//! Applying nested override mappings to a built tree.
//!
//! A merge is validated in full before anything is written: an unknown key or a
//! scalar aimed at a nested node anywhere in the mapping rejects the whole merge
//! and leaves the tree untouched.
use std::collections::BTreeMap;

use crate::{
    error::LatticeError,
    history::{CallSite, Origin},
    tree::{ConfigTree, NodeId},
    value::Value,
};

/// Field name to override. A [Value::Table] aimed at a nested node merges into it.
pub type Overrides = BTreeMap<String, Value>;

impl ConfigTree {
    /// Merge `overrides` into the root node.
    #[track_caller]
    pub fn merge(&mut self, overrides: &Overrides) -> Result<(), LatticeError> {
        let site = CallSite::here(Origin::Merge);
        self.merge_at(self.root(), overrides, site)
    }

    /// Merge `overrides` into `node`. Keys are field names of `node`.
    #[track_caller]
    pub fn merge_into(&mut self, node: NodeId, overrides: &Overrides) -> Result<(), LatticeError> {
        let site = CallSite::here(Origin::Merge);
        self.merge_at(node, overrides, site)
    }

    pub(crate) fn merge_at(
        &mut self,
        node: NodeId,
        overrides: &Overrides,
        site: CallSite,
    ) -> Result<(), LatticeError> {
        self.validate_merge(node, overrides)?;
        let applied = self.apply_merge(node, overrides, &site);
        tracing::debug!(
            "[ConfigTree::merge] {} field(s) written under {} from {}",
            applied,
            self.qualified_name(node),
            site.location
        );
        Ok(())
    }

    fn validate_merge(&self, node: NodeId, overrides: &Overrides) -> Result<(), LatticeError> {
        for (field, value) in overrides {
            let current = self.raw_slot(node, field)?;
            match (current, value) {
                (Some(Value::Node(child)), Value::Table(table)) => {
                    self.validate_merge(*child, table)?
                }
                (Some(Value::Node(_)), other) => {
                    return Err(LatticeError::InvalidOverride {
                        node: self.qualified_name(node),
                        field: field.clone(),
                        reason: format!(
                            "field holds a nested node, expected a table but got {}",
                            other.kind_name()
                        ),
                    })
                }
                (_, Value::Node(_)) => {
                    return Err(LatticeError::InvalidOverride {
                        node: self.qualified_name(node),
                        field: field.clone(),
                        reason: "node handles cannot be merged; use replace_child".to_string(),
                    })
                }
                _ => {}
            }
        }
        Ok(())
    }

    // Only called on a validated mapping.
    fn apply_merge(&mut self, node: NodeId, overrides: &Overrides, site: &CallSite) -> usize {
        let mut applied = 0;
        for (field, value) in overrides {
            let child = match self.raw_slot(node, field) {
                Ok(Some(Value::Node(child))) => Some(*child),
                _ => None,
            };
            match (child, value) {
                (Some(child), Value::Table(table)) => {
                    applied += self.apply_merge(child, table, site);
                }
                _ => {
                    self.write_slot(node, field, value.clone(), site.clone());
                    applied += 1;
                }
            }
        }
        applied
    }
}
