//! The configuration tree: an arena of [ConfigNode]s built from a [Schema].
//!
//! Nodes live in a petgraph [Graph]. Each non-root node has exactly one incoming
//! edge, from its parent, weighted with the field name it hangs under. That edge
//! is the only parent link: it is used to walk upward during resolution and never
//! for ownership, which flows from the arena alone. Nodes detached by
//! [ConfigTree::replace_child] stay in the arena so their recorded history keeps
//! its identity.
use petgraph::{
    graph::{Graph, NodeIndex},
    visit::Dfs,
    Direction,
};
use std::{
    collections::BTreeMap,
    fmt::{self, Display, Formatter, Write as _},
    rc::Rc,
};

use crate::{
    error::LatticeError,
    history::{CallSite, History, Origin},
    resolve::Resolver,
    schema::{FieldDecl, FieldSpec, Schema},
    value::Value,
};

pub type NodeId = NodeIndex;

/// One level of the configuration tree.
#[derive(Debug, Clone)]
pub struct ConfigNode {
    name: String,
    schema: Rc<Schema>,
    // `None` marks a declared field that has not been assigned yet.
    fields: BTreeMap<String, Option<Value>>,
}

impl ConfigNode {
    /// Field name under the parent, or the schema name for the root.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Rc<Schema> {
        &self.schema
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// `None` if the field is not declared, `Some(None)` if it is declared but unset.
    pub fn slot(&self, field: &str) -> Option<Option<&Value>> {
        self.fields.get(field).map(Option::as_ref)
    }

    pub fn slots(&self) -> impl Iterator<Item = (&String, Option<&Value>)> {
        self.fields.iter().map(|(k, v)| (k, v.as_ref()))
    }
}

pub struct ConfigTree {
    graph: Graph<ConfigNode, String>,
    root: NodeId,
    pub(crate) history: History,
    // Schemas whose constructor hooks are currently running, innermost last.
    constructing: Vec<String>,
}

impl ConfigTree {
    /// Instantiate `schema` with its defaults.
    #[track_caller]
    pub fn build(schema: &Rc<Schema>) -> Result<ConfigTree, LatticeError> {
        let site = CallSite::here(Origin::Merge);
        ConfigTree::build_at(schema, &BTreeMap::new(), site)
    }

    /// Instantiate `schema`, then merge `overrides` into the new tree.
    #[track_caller]
    pub fn build_with(
        schema: &Rc<Schema>,
        overrides: &BTreeMap<String, Value>,
    ) -> Result<ConfigTree, LatticeError> {
        let site = CallSite::here(Origin::Merge);
        ConfigTree::build_at(schema, overrides, site)
    }

    fn build_at(
        schema: &Rc<Schema>,
        overrides: &BTreeMap<String, Value>,
        site: CallSite,
    ) -> Result<ConfigTree, LatticeError> {
        let mut tree = ConfigTree {
            graph: Graph::new(),
            root: NodeIndex::end(),
            history: History::default(),
            constructing: Vec::new(),
        };
        tree.root = tree.instantiate(schema, schema.name().to_string(), None)?;
        if !overrides.is_empty() {
            tree.merge_at(tree.root, overrides, site)?;
        }
        tracing::debug!(
            "[ConfigTree::build] {} built with {} nodes",
            schema.name(),
            tree.graph.node_count()
        );
        Ok(tree)
    }

    fn instantiate(
        &mut self,
        schema: &Rc<Schema>,
        name: String,
        parent: Option<NodeId>,
    ) -> Result<NodeId, LatticeError> {
        let id = self.attach(schema, name, parent);
        self.populate(schema, id)?;
        Ok(id)
    }

    fn attach(&mut self, schema: &Rc<Schema>, name: String, parent: Option<NodeId>) -> NodeId {
        let id = self.graph.add_node(ConfigNode {
            name: name.clone(),
            schema: schema.clone(),
            fields: BTreeMap::new(),
        });
        if let Some(parent) = parent {
            self.graph.add_edge(parent, id, name);
        }
        id
    }

    // Every declared slot exists before any child is built, so child hooks see the
    // full key set of their ancestors. Nested slots stay unset until their child is.
    fn populate(&mut self, schema: &Rc<Schema>, id: NodeId) -> Result<(), LatticeError> {
        for (field, spec) in schema.fields() {
            let value = match &spec.decl {
                FieldDecl::Default(value) => Some(value.clone()),
                FieldDecl::Required => None,
                FieldDecl::Nested(_) => {
                    self.graph[id].fields.insert(field.clone(), None);
                    continue;
                }
            };
            self.history
                .record(id, field, value.clone(), declaration_site(spec));
            self.graph[id].fields.insert(field.clone(), value);
        }

        for (field, spec) in schema.fields() {
            let FieldDecl::Nested(child_schema) = &spec.decl else {
                continue;
            };
            let child = Value::Node(self.instantiate(child_schema, field.clone(), Some(id))?);
            self.history
                .record(id, field, Some(child.clone()), declaration_site(spec));
            self.graph[id].fields.insert(field.clone(), Some(child));
        }

        self.run_hooks(schema, id)
    }

    fn run_hooks(&mut self, schema: &Rc<Schema>, id: NodeId) -> Result<(), LatticeError> {
        if schema.hooks().is_empty() {
            return Ok(());
        }
        self.constructing.push(schema.name().to_string());
        let result = schema.hooks().iter().try_for_each(|hook| (**hook)(self, id));
        self.constructing.pop();
        result.inspect_err(|e| {
            tracing::warn!(
                "[ConfigTree::run_hooks] constructor of {} failed at {}: {}",
                schema.name(),
                self.qualified_name(id),
                e
            )
        })
    }

    fn current_origin(&self) -> Origin {
        match self.constructing.last() {
            Some(schema) => Origin::Constructor(schema.clone()),
            None => Origin::Direct,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&ConfigNode> {
        self.graph.node_weight(id)
    }

    pub(crate) fn node_or_err(&self, id: NodeId) -> Result<&ConfigNode, LatticeError> {
        self.node(id)
            .ok_or_else(|| LatticeError::Custom(format!("node {} is not in this tree", id.index())))
    }

    /// The enclosing node, following the single incoming arena edge.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.graph.neighbors_directed(id, Direction::Incoming).next()
    }

    /// Number of ascents from `id` to the root.
    pub fn depth(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            depth += 1;
            current = parent;
        }
        depth
    }

    /// Child nodes of `id` in field order.
    pub fn children(&self, id: NodeId) -> Vec<(String, NodeId)> {
        self.node(id)
            .map(|node| {
                node.slots()
                    .filter_map(|(field, slot)| match slot {
                        Some(Value::Node(child)) => Some((field.clone(), *child)),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Follow `field` of `id` to a node, resolving a reference if the field holds one.
    pub fn child(&self, id: NodeId, field: &str) -> Result<NodeId, LatticeError> {
        let value = self.get(id, field)?;
        value.as_node().ok_or_else(|| {
            LatticeError::Custom(format!(
                "{}.{} is a {}, not a nested node",
                self.qualified_name(id),
                field,
                value.kind_name()
            ))
        })
    }

    /// Stable, unique dotted identifier of a node: the root's schema name followed by
    /// the field names leading down to `id`.
    pub fn qualified_name(&self, id: NodeId) -> String {
        let mut names = Vec::new();
        let mut current = Some(id);
        while let Some(node) = current {
            match self.node(node) {
                Some(n) => names.push(n.name.as_str()),
                None => names.push("<detached>"),
            }
            current = self.parent(node);
        }
        names.reverse();
        names.join(".")
    }

    /// Every node reachable from the root, sorted by qualified name.
    pub fn nodes(&self) -> Vec<NodeId> {
        let mut dfs = Dfs::new(&self.graph, self.root);
        let mut out = Vec::new();
        while let Some(id) = dfs.next(&self.graph) {
            out.push(id);
        }
        out.sort_by_cached_key(|id| self.qualified_name(*id));
        out
    }

    /// Read a field, resolving references and computed values against the live tree.
    pub fn get(&self, id: NodeId, field: &str) -> Result<Value, LatticeError> {
        Resolver::new(self).read(id, field)
    }

    /// Read a dotted path (`sub.value`) from the root.
    pub fn lookup(&self, path: &str) -> Result<Value, LatticeError> {
        self.lookup_from(self.root, path)
    }

    pub fn lookup_from(&self, id: NodeId, path: &str) -> Result<Value, LatticeError> {
        let mut current = id;
        let mut names = path.split('.').peekable();
        while let Some(name) = names.next() {
            if names.peek().is_none() {
                return self.get(current, name);
            }
            current = self.child(current, name)?;
        }
        Ok(Value::Node(current))
    }

    pub(crate) fn raw_slot(&self, id: NodeId, field: &str) -> Result<Option<&Value>, LatticeError> {
        self.node_or_err(id)?
            .slot(field)
            .ok_or_else(|| LatticeError::UnknownField {
                node: self.qualified_name(id),
                field: field.to_string(),
            })
    }

    /// Assign a value to a declared field. Recorded with the caller's location.
    #[track_caller]
    pub fn set(
        &mut self,
        id: NodeId,
        field: &str,
        value: impl Into<Value>,
    ) -> Result<(), LatticeError> {
        let site = CallSite::here(self.current_origin());
        let value = value.into();
        let holds_node = matches!(self.raw_slot(id, field)?, Some(Value::Node(_)));
        if holds_node {
            return Err(LatticeError::InvalidOverride {
                node: self.qualified_name(id),
                field: field.to_string(),
                reason: "field holds a nested node; merge a table into it or use replace_child"
                    .to_string(),
            });
        }
        if let Value::Node(_) = value {
            return Err(LatticeError::InvalidOverride {
                node: self.qualified_name(id),
                field: field.to_string(),
                reason: "node handles cannot be assigned; use replace_child".to_string(),
            });
        }
        self.write_slot(id, field, value, site);
        Ok(())
    }

    /// Build `schema` as a fresh child under `field`, detaching any previous child.
    /// On failure the previous child stays in place and the partial child is
    /// detached.
    #[track_caller]
    pub fn replace_child(
        &mut self,
        id: NodeId,
        field: &str,
        schema: &Rc<Schema>,
    ) -> Result<NodeId, LatticeError> {
        let site = CallSite::here(self.current_origin());
        let old = self.raw_slot(id, field)?.and_then(Value::as_node);
        let child = self.attach(schema, field.to_string(), Some(id));
        if let Err(err) = self.populate(schema, child) {
            self.detach(id, child);
            return Err(err);
        }
        if let Some(old) = old {
            self.detach(id, old);
        }
        self.write_slot(id, field, Value::Node(child), site);
        Ok(child)
    }

    fn detach(&mut self, parent: NodeId, child: NodeId) {
        if let Some(edge) = self.graph.find_edge(parent, child) {
            self.graph.remove_edge(edge);
        }
    }

    /// Unchecked write shared by `set`, `replace_child` and merges. The field must be
    /// declared.
    pub(crate) fn write_slot(&mut self, id: NodeId, field: &str, value: Value, site: CallSite) {
        tracing::debug!(
            "[ConfigTree::write_slot] {}.{} = {} ({})",
            self.qualified_name(id),
            field,
            value,
            site.origin
        );
        self.history.record(id, field, Some(value.clone()), site);
        if let Some(slot) = self.graph[id].fields.get_mut(field) {
            *slot = Some(value);
        }
    }

    /// Force every reference and computed field in the tree, returning the first
    /// failure. Reads only: no field or history changes.
    pub fn sanity_check(&self) -> Result<(), LatticeError> {
        match self.sanity_report().into_iter().next() {
            Some((path, err)) => {
                tracing::warn!("[ConfigTree::sanity_check] {path}: {err}");
                Err(err)
            }
            None => Ok(()),
        }
    }

    /// Every reference or computed field that fails to resolve, keyed by qualified
    /// field path.
    pub fn sanity_report(&self) -> Vec<(String, LatticeError)> {
        let mut failures = Vec::new();
        for id in self.nodes() {
            let Some(node) = self.node(id) else {
                continue;
            };
            for (field, slot) in node.slots() {
                if !slot.is_some_and(Value::is_lazy) {
                    continue;
                }
                if let Err(err) = self.get(id, field) {
                    failures.push((format!("{}.{}", self.qualified_name(id), field), err));
                }
            }
        }
        failures
    }

    fn render_node(&self, id: NodeId, indent: usize, out: &mut String) -> fmt::Result {
        let Some(node) = self.node(id) else {
            return Ok(());
        };
        writeln!(out, "{} {{", self.qualified_name(id))?;
        for (field, slot) in node.slots() {
            write!(out, "{:width$}{field} = ", "", width = indent + 2)?;
            match slot {
                Some(Value::Node(child)) => self.render_node(*child, indent + 2, out)?,
                Some(value) => writeln!(out, "{value}")?,
                None => writeln!(out, "<undefined>")?,
            }
        }
        writeln!(out, "{:width$}}}", "", width = indent)
    }

    /// Plain-text rendering of the subtree under `id`. References show their most
    /// recently resolved value, or `PendingRef` if they were never read.
    pub fn render(&self, id: NodeId) -> String {
        let mut out = String::new();
        // Writing to a String cannot fail.
        let _ = self.render_node(id, 0, &mut out);
        out
    }
}

fn declaration_site(spec: &FieldSpec) -> CallSite {
    CallSite::new(
        Origin::Default(spec.declared_in.clone()),
        spec.location.clone(),
    )
}

impl Display for ConfigTree {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render(self.root))
    }
}
