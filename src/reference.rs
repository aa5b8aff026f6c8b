//! Lazy field values: [Reference]s to other fields by relative path, and
//! [Computed] fields derived from their node on every read.
use std::{
    cell::RefCell,
    fmt::{self, Debug, Display, Formatter},
    rc::Rc,
};

use crate::{error::LatticeError, paths::RefPath, resolve::NodeView, value::Value};

/// A pointer-by-path from the slot that holds it to another field of the tree.
///
/// The owner is always the node whose slot holds the reference, so a reference
/// moved into another node by a merge resolves relative to its new home.
#[derive(Clone)]
pub struct Reference {
    path: RefPath,
    default: Option<Box<Value>>,
    // Display only. Resolution never reads this back.
    last: RefCell<Option<Box<Value>>>,
}

impl Reference {
    pub fn new(path: &str) -> Result<Reference, LatticeError> {
        Ok(Reference::from_path(RefPath::parse(path)?))
    }

    /// A reference that falls back to `default` when its target cannot be found.
    pub fn with_default(path: &str, default: impl Into<Value>) -> Result<Reference, LatticeError> {
        let mut reference = Reference::new(path)?;
        reference.default = Some(Box::new(default.into()));
        Ok(reference)
    }

    pub fn from_path(path: RefPath) -> Reference {
        Reference {
            path,
            default: None,
            last: RefCell::new(None),
        }
    }

    pub fn path(&self) -> &RefPath {
        &self.path
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_deref()
    }

    /// The value produced by the most recent successful resolution, if any.
    pub fn last_resolved(&self) -> Option<Value> {
        self.last.borrow().as_deref().cloned()
    }

    pub(crate) fn remember(&self, value: &Value) {
        *self.last.borrow_mut() = Some(Box::new(value.clone()));
    }
}

impl PartialEq for Reference {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.default == other.default
    }
}

impl Debug for Reference {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reference")
            .field("path", &self.path.as_str())
            .field("default", &self.default)
            .finish()
    }
}

impl Display for Reference {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.last.borrow().as_deref() {
            Some(value) => write!(f, "{value} <- Ref({})", self.path),
            None => write!(f, "PendingRef({})", self.path),
        }
    }
}

pub type ComputeFn = dyn Fn(&NodeView<'_>) -> Result<Value, LatticeError>;

/// A field whose value is derived from its node each time it is read.
#[derive(Clone)]
pub struct Computed {
    label: String,
    func: Rc<ComputeFn>,
}

impl Computed {
    pub fn new<F>(label: impl Into<String>, func: F) -> Computed
    where
        F: Fn(&NodeView<'_>) -> Result<Value, LatticeError> + 'static,
    {
        Computed {
            label: label.into(),
            func: Rc::new(func),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn evaluate(&self, view: &NodeView<'_>) -> Result<Value, LatticeError> {
        (*self.func)(view)
    }
}

impl PartialEq for Computed {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.func, &other.func)
    }
}

impl Debug for Computed {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Computed({})", self.label)
    }
}

impl Display for Computed {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "<computed {}>", self.label)
    }
}
