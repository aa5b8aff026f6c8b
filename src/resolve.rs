//! Reference resolution against the live tree.
//!
//! Resolution is re-run on every read and never memoized, so a write upstream of a
//! reference is visible through it on the next read. A [Resolver] carries the chain
//! of (node, path) visits of one read so that a reference chain which loops back on
//! itself fails with [LatticeError::CyclicReference] instead of recursing forever.
use std::cell::RefCell;

use crate::{
    error::LatticeError,
    paths::{RefPath, Step},
    reference::Reference,
    tree::{ConfigTree, NodeId},
    value::Value,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Visit {
    Ref(NodeId, String),
    Computed(NodeId, String),
}

/// Failure of one walk: `Miss` is a problem with this reference's own path and may
/// be replaced by its default, `Inner` comes from a value it reached and may not.
enum WalkError {
    Miss(LatticeError),
    Inner(LatticeError),
}

pub struct Resolver<'t> {
    tree: &'t ConfigTree,
    chain: RefCell<Vec<(Visit, String)>>,
}

impl<'t> Resolver<'t> {
    pub fn new(tree: &'t ConfigTree) -> Resolver<'t> {
        Resolver {
            tree,
            chain: RefCell::new(Vec::new()),
        }
    }

    pub fn tree(&self) -> &'t ConfigTree {
        self.tree
    }

    /// Read `field` of `node`, evaluating it if it is lazy.
    pub fn read(&self, node: NodeId, field: &str) -> Result<Value, LatticeError> {
        match self.tree.raw_slot(node, field)? {
            Some(value) => self.evaluate(node, field, value, None),
            None => Err(LatticeError::UndefinedField {
                node: self.tree.qualified_name(node),
                field: field.to_string(),
            }),
        }
    }

    /// Resolve `reference` as if it were held by `owner`.
    pub fn resolve(&self, owner: NodeId, reference: &Reference) -> Result<Value, LatticeError> {
        let path = reference.path();
        self.enter(
            Visit::Ref(owner, path.as_str().to_string()),
            format!("{}:{}", self.tree.qualified_name(owner), path),
            path.as_str(),
        )?;
        let walked = self.walk(owner, path);
        self.leave();

        let result = match walked {
            Ok(value) => Ok(value),
            Err(WalkError::Miss(err)) => match reference.default_value() {
                Some(default) => {
                    tracing::debug!(
                        "[Resolver::resolve] {} falls back to its default: {}",
                        path,
                        err
                    );
                    Ok(default.clone())
                }
                None => Err(err),
            },
            Err(WalkError::Inner(err)) => Err(err),
        };
        if let Ok(value) = &result {
            reference.remember(value);
        }
        result
    }

    fn walk(&self, owner: NodeId, path: &RefPath) -> Result<Value, WalkError> {
        let miss = |depth: usize, reason: String| {
            WalkError::Miss(LatticeError::UnresolvedReference {
                path: path.to_string(),
                depth,
                reason,
            })
        };

        let mut current = owner;
        let steps = path.steps();
        for (depth, step) in steps.iter().enumerate() {
            let last = depth + 1 == steps.len();
            match step {
                Step::Ascend => {
                    current = self.tree.parent(current).ok_or_else(|| {
                        miss(
                            depth,
                            format!(
                                "{} has no parent to ascend to",
                                self.tree.qualified_name(current)
                            ),
                        )
                    })?;
                }
                Step::Descend(name) => {
                    let node = self.tree.node_or_err(current).map_err(WalkError::Inner)?;
                    let value = match node.slot(name) {
                        None => {
                            return Err(miss(
                                depth,
                                format!(
                                    "{} has no field '{}'",
                                    self.tree.qualified_name(current),
                                    name
                                ),
                            ))
                        }
                        Some(None) => {
                            return Err(miss(
                                depth,
                                format!(
                                    "{}.{} is declared but undefined",
                                    self.tree.qualified_name(current),
                                    name
                                ),
                            ))
                        }
                        Some(Some(value)) => self
                            .evaluate(current, name, value, Some(path))
                            .map_err(WalkError::Inner)?,
                    };
                    if last {
                        return Ok(value);
                    }
                    current = value.as_node().ok_or_else(|| {
                        miss(
                            depth,
                            format!(
                                "{}.{} is a {}, not a nested node",
                                self.tree.qualified_name(current),
                                name,
                                value.kind_name()
                            ),
                        )
                    })?;
                }
            }
            tracing::trace!(
                "[Resolver::walk] {} step {} -> {}",
                path,
                step,
                self.tree.qualified_name(current)
            );
        }
        Ok(Value::Node(current))
    }

    fn evaluate(
        &self,
        node: NodeId,
        field: &str,
        value: &Value,
        via: Option<&RefPath>,
    ) -> Result<Value, LatticeError> {
        match value {
            Value::Ref(reference) => self.resolve(node, reference),
            Value::Computed(computed) => {
                let label = format!("{}.{}", self.tree.qualified_name(node), field);
                self.enter(Visit::Computed(node, field.to_string()), label, field)?;
                let result = computed.evaluate(&NodeView { resolver: self, node });
                self.leave();
                match (result, via) {
                    (Err(err), Some(path)) if !err.is_resolution_error() => {
                        Err(LatticeError::DerefFailure {
                            path: path.to_string(),
                            source: Box::new(err),
                        })
                    }
                    (result, _) => result,
                }
            }
            other => Ok(other.clone()),
        }
    }

    fn enter(&self, visit: Visit, label: String, path: &str) -> Result<(), LatticeError> {
        let mut chain = self.chain.borrow_mut();
        if chain.iter().any(|(known, _)| known == &visit) {
            let mut labels = chain.iter().map(|(_, l)| l.clone()).collect::<Vec<_>>();
            labels.push(label);
            return Err(LatticeError::CyclicReference {
                path: path.to_string(),
                chain: labels,
            });
        }
        chain.push((visit, label));
        Ok(())
    }

    fn leave(&self) {
        self.chain.borrow_mut().pop();
    }
}

/// Read access to one node from inside a computed field. Reads go through the same
/// resolver as the read that triggered the computation, so cycles through computed
/// fields are caught too.
pub struct NodeView<'a> {
    resolver: &'a Resolver<'a>,
    node: NodeId,
}

impl<'a> NodeView<'a> {
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn tree(&self) -> &'a ConfigTree {
        self.resolver.tree()
    }

    pub fn qualified_name(&self) -> String {
        self.tree().qualified_name(self.node)
    }

    pub fn get(&self, field: &str) -> Result<Value, LatticeError> {
        self.resolver.read(self.node, field)
    }

    /// Resolve a relative path (`..lr`, `.model.width`) from this node.
    pub fn resolve(&self, path: &str) -> Result<Value, LatticeError> {
        self.resolver
            .resolve(self.node, &Reference::from_path(RefPath::parse(path)?))
    }

    pub fn int(&self, field: &str) -> Result<i64, LatticeError> {
        let value = self.get(field)?;
        value.as_int().ok_or_else(|| self.mismatch(field, "int", &value))
    }

    pub fn float(&self, field: &str) -> Result<f64, LatticeError> {
        let value = self.get(field)?;
        value.as_float().ok_or_else(|| self.mismatch(field, "float", &value))
    }

    pub fn string(&self, field: &str) -> Result<String, LatticeError> {
        let value = self.get(field)?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| self.mismatch(field, "string", &value))
    }

    fn mismatch(&self, field: &str, expected: &str, found: &Value) -> LatticeError {
        LatticeError::Custom(format!(
            "{}.{}: expected {}, found {}",
            self.qualified_name(),
            field,
            expected,
            found.kind_name()
        ))
    }
}
