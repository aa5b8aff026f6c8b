//! Schema descriptions: the declared field set of a node and how fragments compose.
//!
//! A [Schema] is plain data built with a [SchemaBuilder]. Each field is a default
//! value, a required (initially undefined) slot, or a nested schema that becomes a
//! child node. References and computed fields are defaults whose value is lazy.
//!
//! Composition follows the resolution order of the bases. Each schema keeps a
//! linearization of its ancestors (C3, as in method resolution order): a base
//! comes before its own bases, and bases keep the order they were passed to
//! [SchemaBuilder::extends]. An inherited field takes the declaration of the first
//! schema in that order that declares it, a builder's own declarations replace
//! anything inherited, and a later declaration of the same name in one builder
//! replaces the earlier one. Bases whose orders cannot be reconciled are a
//! [LatticeError::SchemaConflict]. All of this is settled by
//! [SchemaBuilder::build], before any tree exists.
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{self, Debug, Formatter},
    panic::Location,
    rc::Rc,
};

use crate::{
    error::LatticeError,
    reference::{Computed, Reference},
    resolve::NodeView,
    tree::{ConfigTree, NodeId},
    value::Value,
};

pub type InitHook = dyn Fn(&mut ConfigTree, NodeId) -> Result<(), LatticeError>;

#[derive(Clone)]
pub enum FieldDecl {
    Default(Value),
    Required,
    Nested(Rc<Schema>),
}

impl PartialEq for FieldDecl {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FieldDecl::Default(a), FieldDecl::Default(b)) => a == b,
            (FieldDecl::Required, FieldDecl::Required) => true,
            (FieldDecl::Nested(a), FieldDecl::Nested(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Debug for FieldDecl {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            FieldDecl::Default(value) => write!(f, "Default({value:?})"),
            FieldDecl::Required => write!(f, "Required"),
            FieldDecl::Nested(schema) => write!(f, "Nested({})", schema.name()),
        }
    }
}

/// An effective field declaration and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub decl: FieldDecl,
    /// Name of the schema whose builder made this declaration.
    pub declared_in: String,
    pub location: String,
}

pub struct Schema {
    name: String,
    fields: BTreeMap<String, FieldSpec>,
    hooks: Vec<Rc<InitHook>>,
    bases: Vec<Rc<Schema>>,
    // Ancestors in resolution order, excluding the schema itself.
    mro: Vec<Rc<Schema>>,
}

impl Schema {
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            name: name.into(),
            bases: Vec::new(),
            own: Vec::new(),
            hooks: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldSpec> {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    pub fn bases(&self) -> &[Rc<Schema>] {
        &self.bases
    }

    /// Every ancestor, most specific first.
    pub fn resolution_order(&self) -> impl Iterator<Item = &str> {
        self.mro.iter().map(|schema| schema.name())
    }

    /// True if `name` is a (transitive) base of this schema.
    pub fn descends_from(&self, name: &str) -> bool {
        self.mro.iter().any(|base| base.name == name)
    }

    pub(crate) fn hooks(&self) -> &[Rc<InitHook>] {
        &self.hooks
    }
}

impl Debug for Schema {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .field("hooks", &self.hooks.len())
            .field(
                "bases",
                &self.bases.iter().map(|b| b.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[derive(Debug, Clone)]
pub(crate) enum PendingDecl {
    Ready(FieldDecl),
    Reference {
        path: String,
        default: Option<Value>,
    },
}

pub struct SchemaBuilder {
    name: String,
    bases: Vec<Rc<Schema>>,
    own: Vec<(String, PendingDecl, String)>,
    hooks: Vec<Rc<InitHook>>,
}

impl SchemaBuilder {
    pub fn extends(mut self, base: &Rc<Schema>) -> Self {
        self.bases.push(base.clone());
        self
    }

    #[track_caller]
    pub fn field(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let location = here();
        self.declare(
            name,
            PendingDecl::Ready(FieldDecl::Default(value.into())),
            location,
        )
    }

    /// Declare a field with no value. It reads as undefined until written.
    #[track_caller]
    pub fn required(self, name: impl Into<String>) -> Self {
        let location = here();
        self.declare(name, PendingDecl::Ready(FieldDecl::Required), location)
    }

    #[track_caller]
    pub fn nested(self, name: impl Into<String>, schema: &Rc<Schema>) -> Self {
        let location = here();
        self.declare(
            name,
            PendingDecl::Ready(FieldDecl::Nested(schema.clone())),
            location,
        )
    }

    /// Declare a reference field. The path is validated by [SchemaBuilder::build].
    #[track_caller]
    pub fn reference(self, name: impl Into<String>, path: &str) -> Self {
        let location = here();
        self.declare(
            name,
            PendingDecl::Reference {
                path: path.to_string(),
                default: None,
            },
            location,
        )
    }

    /// Declare a reference field that yields `default` when its target is missing.
    #[track_caller]
    pub fn reference_or(
        self,
        name: impl Into<String>,
        path: &str,
        default: impl Into<Value>,
    ) -> Self {
        let location = here();
        self.declare(
            name,
            PendingDecl::Reference {
                path: path.to_string(),
                default: Some(default.into()),
            },
            location,
        )
    }

    #[track_caller]
    pub fn computed<F>(self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&NodeView<'_>) -> Result<Value, LatticeError> + 'static,
    {
        let location = here();
        let name = name.into();
        let computed = Computed::new(name.clone(), func);
        self.declare(
            name,
            PendingDecl::Ready(FieldDecl::Default(Value::Computed(computed))),
            location,
        )
    }

    /// Run `hook` on every node built from this schema, after its children exist.
    pub fn on_build<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut ConfigTree, NodeId) -> Result<(), LatticeError> + 'static,
    {
        self.hooks.push(Rc::new(hook));
        self
    }

    pub(crate) fn declare(
        mut self,
        name: impl Into<String>,
        decl: PendingDecl,
        location: String,
    ) -> Self {
        self.own.push((name.into(), decl, location));
        self
    }

    pub fn build(self) -> Result<Rc<Schema>, LatticeError> {
        let mro = linearize(&self.bases).ok_or_else(|| LatticeError::SchemaConflict {
            schema: self.name.clone(),
            field: "extends".to_string(),
            reason: format!(
                "bases {} have no consistent resolution order",
                self.bases
                    .iter()
                    .map(|base| base.name())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        })?;

        let mut fields: BTreeMap<String, FieldSpec> = BTreeMap::new();
        for ancestor in mro.iter() {
            for (name, spec) in ancestor.fields() {
                if spec.declared_in == ancestor.name() && !fields.contains_key(name) {
                    fields.insert(name.clone(), spec.clone());
                }
            }
        }

        let mut own_names = BTreeSet::new();
        for (name, pending, location) in self.own {
            let decl = match pending {
                PendingDecl::Ready(decl) => decl,
                PendingDecl::Reference { path, default } => {
                    let reference = match default {
                        Some(default) => Reference::with_default(&path, default)?,
                        None => Reference::new(&path)?,
                    };
                    FieldDecl::Default(Value::Ref(reference))
                }
            };
            if !own_names.insert(name.clone()) {
                tracing::debug!(
                    "[SchemaBuilder::build] {}.{} declared more than once, last declaration wins",
                    self.name,
                    name
                );
            } else if let Some(prev) = fields.get(&name) {
                tracing::debug!(
                    "[SchemaBuilder::build] {}.{} overrides declaration from {}",
                    self.name,
                    name,
                    prev.declared_in
                );
            }
            fields.insert(
                name,
                FieldSpec {
                    decl,
                    declared_in: self.name.clone(),
                    location,
                },
            );
        }

        let mut hooks: Vec<Rc<InitHook>> = Vec::new();
        for hook in self
            .bases
            .iter()
            .flat_map(|base| base.hooks().iter())
            .chain(self.hooks.iter())
        {
            if !hooks.iter().any(|known| Rc::ptr_eq(known, hook)) {
                hooks.push(hook.clone());
            }
        }

        tracing::debug!(
            "[SchemaBuilder::build] {} with {} fields, {} hooks",
            self.name,
            fields.len(),
            hooks.len()
        );
        Ok(Rc::new(Schema {
            name: self.name,
            fields,
            hooks,
            bases: self.bases,
            mro,
        }))
    }
}

#[track_caller]
fn here() -> String {
    let location = Location::caller();
    format!(
        "{}:{}:{}",
        location.file(),
        location.line(),
        location.column()
    )
}

/// C3 linearization of `bases`. `None` when no order keeps every base ahead of
/// its own ancestors while respecting the listed order.
fn linearize(bases: &[Rc<Schema>]) -> Option<Vec<Rc<Schema>>> {
    let mut pending: Vec<Vec<Rc<Schema>>> = bases
        .iter()
        .map(|base| std::iter::once(base.clone()).chain(base.mro.iter().cloned()).collect())
        .collect();
    pending.push(bases.to_vec());

    let mut out = Vec::new();
    loop {
        pending.retain(|seq| !seq.is_empty());
        if pending.is_empty() {
            return Some(out);
        }
        let next = pending.iter().map(|seq| &seq[0]).find(|head| {
            !pending
                .iter()
                .any(|seq| seq[1..].iter().any(|s| Rc::ptr_eq(s, head)))
        })?;
        let next = next.clone();
        for seq in pending.iter_mut() {
            if Rc::ptr_eq(&seq[0], &next) {
                seq.remove(0);
            }
        }
        out.push(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Rc<Schema> {
        Schema::builder("Base")
            .field("lr", 0.1)
            .field("iters", 10)
            .build()
            .unwrap()
    }

    #[test]
    fn test_own_declaration_overrides_base() {
        let derived = Schema::builder("Derived")
            .extends(&base())
            .field("lr", 0.01)
            .build()
            .unwrap();
        let lr = derived.field("lr").unwrap();
        assert_eq!(lr.decl, FieldDecl::Default(Value::Float(0.01)));
        assert_eq!(lr.declared_in, "Derived");
        assert_eq!(derived.field("iters").unwrap().declared_in, "Base");
        assert!(lr.location.contains("schema.rs"));
    }

    #[test]
    fn test_last_declaration_in_one_builder_wins() {
        let schema = Schema::builder("S")
            .field("x", 1)
            .field("x", 2)
            .build()
            .unwrap();
        assert_eq!(
            schema.field("x").unwrap().decl,
            FieldDecl::Default(Value::Int(2))
        );
    }

    #[test]
    fn test_first_listed_base_wins_between_unrelated_bases() {
        let a = Schema::builder("A").field("x", 1).build().unwrap();
        let b = Schema::builder("B").field("x", 2).field("y", 2).build().unwrap();
        let ab = Schema::builder("AB").extends(&a).extends(&b).build().unwrap();
        assert_eq!(ab.field("x").unwrap().decl, FieldDecl::Default(Value::Int(1)));
        assert_eq!(ab.field("x").unwrap().declared_in, "A");
        assert_eq!(ab.field("y").unwrap().declared_in, "B");

        let ba = Schema::builder("BA").extends(&b).extends(&a).build().unwrap();
        assert_eq!(ba.field("x").unwrap().decl, FieldDecl::Default(Value::Int(2)));

        let own = Schema::builder("AB")
            .extends(&a)
            .extends(&b)
            .field("x", 3)
            .build()
            .unwrap();
        assert_eq!(own.field("x").unwrap().decl, FieldDecl::Default(Value::Int(3)));
    }

    #[test]
    fn test_inconsistent_lineage_is_a_conflict() {
        let a = Schema::builder("A").field("x", 1).build().unwrap();
        let b = Schema::builder("B").extends(&a).build().unwrap();
        let err = Schema::builder("C")
            .extends(&a)
            .extends(&b)
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            LatticeError::SchemaConflict { ref schema, ref field, .. }
                if schema == "C" && field == "extends"
        ));

        let c = Schema::builder("C").extends(&b).extends(&a).build().unwrap();
        assert_eq!(c.resolution_order().collect::<Vec<_>>(), vec!["B", "A"]);
    }

    #[test]
    fn test_resolution_order_of_a_diamond() {
        let root = base();
        let left = Schema::builder("Left").extends(&root).build().unwrap();
        let right = Schema::builder("Right").extends(&root).build().unwrap();
        let both = Schema::builder("Both")
            .extends(&left)
            .extends(&right)
            .build()
            .unwrap();
        assert_eq!(
            both.resolution_order().collect::<Vec<_>>(),
            vec!["Left", "Right", "Base"]
        );
    }

    #[test]
    fn test_diamond_prefers_the_more_specific_base() {
        let root = base();
        let tuned = Schema::builder("Tuned")
            .extends(&root)
            .field("lr", 0.5)
            .build()
            .unwrap();
        let plain = Schema::builder("Plain").extends(&root).build().unwrap();

        for (first, second) in [(&tuned, &plain), (&plain, &tuned)] {
            let both = Schema::builder("Both")
                .extends(first)
                .extends(second)
                .build()
                .unwrap();
            assert_eq!(
                both.field("lr").unwrap().decl,
                FieldDecl::Default(Value::Float(0.5))
            );
        }
    }

    #[test]
    fn test_identical_inherited_declarations_do_not_conflict() {
        let shared = base();
        let a = Schema::builder("A").nested("opt", &shared).build().unwrap();
        let b = Schema::builder("B").nested("opt", &shared).build().unwrap();
        assert!(Schema::builder("AB").extends(&a).extends(&b).build().is_ok());
    }

    #[test]
    fn test_invalid_reference_fails_at_definition_time() {
        let err = Schema::builder("S")
            .reference("r", "no_leading_dot")
            .build()
            .unwrap_err();
        assert!(matches!(err, LatticeError::InvalidReference { .. }));
    }

    #[test]
    fn test_hooks_run_once_base_first() {
        let root = Schema::builder("Root")
            .on_build(|_, _| Ok(()))
            .build()
            .unwrap();
        let a = Schema::builder("A").extends(&root).build().unwrap();
        let b = Schema::builder("B").extends(&root).build().unwrap();
        let ab = Schema::builder("AB")
            .extends(&a)
            .extends(&b)
            .on_build(|_, _| Ok(()))
            .build()
            .unwrap();
        assert_eq!(ab.hooks().len(), 2);
        assert!(Rc::ptr_eq(&ab.hooks()[0], &root.hooks()[0]));
        assert!(ab.descends_from("Root"));
        assert!(!root.descends_from("AB"));
    }
}
