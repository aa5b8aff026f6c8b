//! TOML surfaces: override files, `key=value` assignments, declarative schema files
//! and export of a resolved tree.
//!
//! Inside any TOML value a small set of `$`-prefixed keys marks the lazy and
//! structural declarations that plain TOML cannot express:
//!
//! ```toml
//! root = "Experiment"
//!
//! [schemas.Sub]
//! value = 100
//! self_ref = { "$ref" = ".value" }
//! parent_ref = { "$ref" = "..base_value", "$default" = 0 }
//!
//! [schemas.Experiment]
//! "$extends" = ["Defaults"]
//! base_value = 42
//! optional = { "$required" = true }
//! sub = { "$schema" = "Sub" }
//! tags = { "$value" = { "$ref" = "kept literally" } }
//! ```
use std::{
    collections::BTreeMap,
    fs::read_to_string,
    path::Path,
    rc::Rc,
};

use crate::{
    error::LatticeError,
    merge::Overrides,
    paths::PATH_SEP,
    reference::Reference,
    schema::{FieldDecl, PendingDecl, Schema},
    tree::{ConfigTree, NodeId},
    value::Value,
};

pub const REF_KEY: &str = "$ref";
pub const DEFAULT_KEY: &str = "$default";
pub const SCHEMA_KEY: &str = "$schema";
pub const REQUIRED_KEY: &str = "$required";
pub const VALUE_KEY: &str = "$value";
pub const EXTENDS_KEY: &str = "$extends";

pub fn get_content<P: AsRef<Path>>(path: P) -> Result<String, LatticeError> {
    tracing::debug!("Reading {:?}", path.as_ref());
    Ok(read_to_string(path)?)
}

/// Convert a TOML value, turning `{ "$ref" = .. }` tables into [Reference]s at any
/// depth and unwrapping `{ "$value" = .. }` literally.
pub fn value_from_toml(value: toml::Value) -> Result<Value, LatticeError> {
    let mut table = match value {
        toml::Value::Table(table) => table,
        toml::Value::Array(items) => {
            return Ok(Value::List(
                items
                    .into_iter()
                    .map(value_from_toml)
                    .collect::<Result<Vec<_>, _>>()?,
            ))
        }
        other => return Ok(Value::from(other)),
    };

    if let Some(literal) = table.remove(VALUE_KEY) {
        expect_only(&table, VALUE_KEY, &[])?;
        return Ok(Value::from(literal));
    }
    if let Some(path) = table.remove(REF_KEY) {
        expect_only(&table, REF_KEY, &[DEFAULT_KEY])?;
        let path = path.as_str().ok_or_else(|| {
            LatticeError::InvalidSchema(format!("'{REF_KEY}' must be a string, got {path}"))
        })?;
        let reference = match table.remove(DEFAULT_KEY) {
            Some(default) => Reference::with_default(path, value_from_toml(default)?)?,
            None => Reference::new(path)?,
        };
        return Ok(Value::Ref(reference));
    }
    if let Some(key) = table.keys().find(|k| k.starts_with('$')) {
        return Err(LatticeError::InvalidSchema(format!(
            "reserved key '{key}' is not valid inside a value"
        )));
    }
    Ok(Value::Table(
        table
            .into_iter()
            .map(|(k, v)| Ok((k, value_from_toml(v)?)))
            .collect::<Result<BTreeMap<_, _>, LatticeError>>()?,
    ))
}

fn expect_only(table: &toml::Table, key: &str, allowed: &[&str]) -> Result<(), LatticeError> {
    match table.keys().find(|k| !allowed.contains(&k.as_str())) {
        Some(extra) => Err(LatticeError::InvalidSchema(format!(
            "unexpected key '{extra}' beside '{key}'"
        ))),
        None => Ok(()),
    }
}

/// Parse an override document. Top-level keys are root field names.
pub fn overrides_from_str(text: &str) -> Result<Overrides, LatticeError> {
    let table: toml::Table = toml::from_str(text)?;
    table
        .into_iter()
        .map(|(k, v)| Ok((k, value_from_toml(v)?)))
        .collect()
}

pub fn load_overrides<P: AsRef<Path>>(path: P) -> Result<Overrides, LatticeError> {
    overrides_from_str(&get_content(path)?)
}

/// Parse one `dotted.key=value` assignment into a nested override mapping.
///
/// The right-hand side is read as a TOML value when it parses as one. A value
/// starting with `.` is a reference path, anything else is taken as a string.
pub fn parse_assignment(assignment: &str) -> Result<Overrides, LatticeError> {
    let Some((key, raw)) = assignment.split_once('=') else {
        return Err(LatticeError::Custom(format!(
            "expected key=value, got '{assignment}'"
        )));
    };
    let key = key.trim();
    let raw = raw.trim();
    let names = key.split(PATH_SEP).collect::<Vec<_>>();
    if names.iter().any(|name| name.is_empty()) {
        return Err(LatticeError::Custom(format!(
            "malformed key '{key}' in assignment '{assignment}'"
        )));
    }

    let mut value = if raw.starts_with(PATH_SEP) {
        Value::Ref(Reference::new(raw)?)
    } else {
        match toml::from_str::<toml::Table>(&format!("v = {raw}")) {
            Ok(mut parsed) => match parsed.remove("v") {
                Some(v) => value_from_toml(v)?,
                None => Value::Str(raw.to_string()),
            },
            Err(_) => Value::Str(raw.to_string()),
        }
    };
    for name in names.iter().skip(1).rev() {
        value = Value::Table(BTreeMap::from([(name.to_string(), value)]));
    }
    Ok(BTreeMap::from([(names[0].to_string(), value)]))
}

/// Fold assignments into one mapping, later assignments winning.
pub fn merge_assignments<'a, I>(assignments: I) -> Result<Overrides, LatticeError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut out = Overrides::new();
    for assignment in assignments {
        deep_merge(&mut out, parse_assignment(assignment)?);
    }
    Ok(out)
}

/// Merge `overlay` into `base`. Tables merge key by key; anything else replaces.
pub fn deep_merge(base: &mut Overrides, overlay: Overrides) {
    for (key, overlay_value) in overlay {
        match (base.get_mut(&key), overlay_value) {
            (Some(Value::Table(base_table)), Value::Table(overlay_table)) => {
                deep_merge(base_table, overlay_table)
            }
            (_, overlay_value) => {
                base.insert(key, overlay_value);
            }
        }
    }
}

/// A set of named schemas declared in TOML.
#[derive(Debug, Default)]
pub struct SchemaFile {
    schemas: BTreeMap<String, Rc<Schema>>,
    root: Option<String>,
}

impl SchemaFile {
    /// Parse `text`. `source` names the file in recorded declaration locations.
    pub fn from_str(text: &str, source: &str) -> Result<SchemaFile, LatticeError> {
        let mut doc: toml::Table = toml::from_str(text)?;
        let root = match doc.remove("root") {
            Some(toml::Value::String(name)) => Some(name),
            Some(other) => {
                return Err(LatticeError::InvalidSchema(format!(
                    "'root' must name a schema, got {other}"
                )))
            }
            None => None,
        };
        let raw = match doc.remove("schemas") {
            Some(toml::Value::Table(schemas)) => schemas,
            Some(_) => {
                return Err(LatticeError::InvalidSchema(
                    "'schemas' must be a table of schema tables".to_string(),
                ))
            }
            None => toml::Table::new(),
        };
        if let Some(key) = doc.keys().next() {
            return Err(LatticeError::InvalidSchema(format!(
                "unexpected top-level key '{key}'"
            )));
        }

        let mut raw_schemas = BTreeMap::new();
        for (name, body) in raw {
            let toml::Value::Table(body) = body else {
                return Err(LatticeError::InvalidSchema(format!(
                    "schema '{name}' must be a table"
                )));
            };
            raw_schemas.insert(name, body);
        }

        let mut loader = Loader {
            source,
            raw: &raw_schemas,
            built: BTreeMap::new(),
            building: Vec::new(),
        };
        for name in raw_schemas.keys() {
            loader.schema(name)?;
        }
        let file = SchemaFile {
            schemas: loader.built,
            root,
        };
        if let Some(root) = &file.root {
            file.get(root)?;
        }
        tracing::debug!(
            "[SchemaFile::from_str] {} schema(s) loaded from {}",
            file.schemas.len(),
            source
        );
        Ok(file)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<SchemaFile, LatticeError> {
        let source = path.as_ref().display().to_string();
        SchemaFile::from_str(&get_content(path)?, &source)
    }

    pub fn get(&self, name: &str) -> Result<&Rc<Schema>, LatticeError> {
        self.schemas
            .get(name)
            .ok_or_else(|| LatticeError::InvalidSchema(format!("unknown schema '{name}'")))
    }

    /// The schema named by the top-level `root` key.
    pub fn root_schema(&self) -> Result<&Rc<Schema>, LatticeError> {
        match &self.root {
            Some(root) => self.get(root),
            None => Err(LatticeError::InvalidSchema(
                "no 'root' schema declared".to_string(),
            )),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }
}

struct Loader<'a> {
    source: &'a str,
    raw: &'a BTreeMap<String, toml::Table>,
    built: BTreeMap<String, Rc<Schema>>,
    // Schemas being built, for dependency cycle detection.
    building: Vec<String>,
}

impl Loader<'_> {
    fn schema(&mut self, name: &str) -> Result<Rc<Schema>, LatticeError> {
        if let Some(schema) = self.built.get(name) {
            return Ok(schema.clone());
        }
        if self.building.iter().any(|n| n == name) {
            return Err(LatticeError::InvalidSchema(format!(
                "schema dependency cycle: {} -> {}",
                self.building.join(" -> "),
                name
            )));
        }
        let raw = self.raw;
        let body = raw
            .get(name)
            .ok_or_else(|| LatticeError::InvalidSchema(format!("unknown schema '{name}'")))?;

        self.building.push(name.to_string());
        let result = self.build_schema(name, body);
        self.building.pop();

        let schema = result?;
        self.built.insert(name.to_string(), schema.clone());
        Ok(schema)
    }

    fn build_schema(&mut self, name: &str, body: &toml::Table) -> Result<Rc<Schema>, LatticeError> {
        let mut builder = Schema::builder(name);
        for (field, value) in body {
            if field == EXTENDS_KEY {
                for base in string_list(value, name)? {
                    builder = builder.extends(&self.schema(&base)?);
                }
                continue;
            }
            let decl = self.declaration(name, field, value.clone())?;
            let location = format!("{}:[schemas.{}].{}", self.source, name, field);
            builder = builder.declare(field.clone(), decl, location);
        }
        builder.build()
    }

    fn declaration(
        &mut self,
        schema: &str,
        field: &str,
        value: toml::Value,
    ) -> Result<PendingDecl, LatticeError> {
        if let toml::Value::Table(table) = &value {
            if let Some(nested) = table.get(SCHEMA_KEY) {
                expect_only(table, SCHEMA_KEY, &[SCHEMA_KEY])?;
                let nested = nested.as_str().ok_or_else(|| {
                    LatticeError::InvalidSchema(format!(
                        "{schema}.{field}: '{SCHEMA_KEY}' must name a schema"
                    ))
                })?;
                return Ok(PendingDecl::Ready(FieldDecl::Nested(self.schema(nested)?)));
            }
            if let Some(required) = table.get(REQUIRED_KEY) {
                expect_only(table, REQUIRED_KEY, &[REQUIRED_KEY])?;
                if required.as_bool() != Some(true) {
                    return Err(LatticeError::InvalidSchema(format!(
                        "{schema}.{field}: '{REQUIRED_KEY}' only accepts true"
                    )));
                }
                return Ok(PendingDecl::Ready(FieldDecl::Required));
            }
        }
        Ok(PendingDecl::Ready(FieldDecl::Default(value_from_toml(
            value,
        )?)))
    }
}

fn string_list(value: &toml::Value, schema: &str) -> Result<Vec<String>, LatticeError> {
    let invalid = || {
        LatticeError::InvalidSchema(format!(
            "{schema}: '{EXTENDS_KEY}' must be a schema name or a list of names"
        ))
    };
    match value {
        toml::Value::String(name) => Ok(vec![name.clone()]),
        toml::Value::Array(items) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string).ok_or_else(invalid))
            .collect(),
        _ => Err(invalid()),
    }
}

impl ConfigTree {
    /// Resolved plain-data view of the subtree under `node`. Unset fields are left
    /// out, as are references that resolve to a node.
    pub fn to_toml(&self, node: NodeId) -> Result<toml::Table, LatticeError> {
        let mut table = toml::Table::new();
        let config_node = self.node_or_err(node)?;
        for (field, slot) in config_node.slots() {
            let exported = match slot {
                None => None,
                Some(Value::Node(child)) => Some(toml::Value::Table(self.to_toml(*child)?)),
                Some(_) => self.get(node, field)?.to_plain_toml(),
            };
            if let Some(exported) = exported {
                table.insert(field.clone(), exported);
            }
        }
        Ok(table)
    }
}
