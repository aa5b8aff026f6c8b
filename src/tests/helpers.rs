//! Shared schemas and utilities for crate tests

use crate::schema::Schema;
use std::rc::Rc;

/// Initialize logging for tests
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// Leaf schema used under [parent_schema]: a plain value, a sibling reference and a
/// parent reference.
pub fn sub_schema() -> Rc<Schema> {
    Schema::builder("SubConfig")
        .field("value", 100)
        .reference("self_ref", ".value")
        .reference("parent_ref", "..base_value")
        .build()
        .unwrap()
}

/// Root schema holding two children built from [sub_schema] and one field that is
/// declared without a value.
pub fn parent_schema() -> Rc<Schema> {
    let sub = sub_schema();
    Schema::builder("ParentConfig")
        .field("base_value", 42)
        .required("optional")
        .nested("sub", &sub)
        .nested("sub2", &sub)
        .build()
        .unwrap()
}

/// Three-level tree: `Exp.model.opt`, with references across every level.
pub fn experiment_schema() -> Rc<Schema> {
    let opt = Schema::builder("OptimizerConfig")
        .reference("lr", "...base_lr")
        .reference("width", "..width")
        .reference_or("warmup", "...schedule.warmup", 0)
        .build()
        .unwrap();
    let model = Schema::builder("ModelConfig")
        .field("width", 64)
        .nested("opt", &opt)
        .build()
        .unwrap();
    Schema::builder("Exp")
        .field("base_lr", 0.1)
        .nested("model", &model)
        .build()
        .unwrap()
}
