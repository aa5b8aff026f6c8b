//! Tree construction: defaults, constructor hooks and composed schemas

use super::helpers::*;
use crate::{
    error::LatticeError,
    history::Origin,
    schema::Schema,
    tree::ConfigTree,
    value::Value,
};
use std::{cell::RefCell, rc::Rc};
use test_log::test;

fn logger_schema() -> Rc<Schema> {
    Schema::builder("LoggerConfig")
        .required("log_dir")
        .field("backend", "loguru")
        .on_build(|tree, node| tree.set(node, "log_dir", "./"))
        .build()
        .unwrap()
}

fn model_schema() -> Rc<Schema> {
    Schema::builder("ModelConfig")
        .required("in_channels")
        .required("out_channels")
        .on_build(|tree, node| {
            tree.set(node, "in_channels", 32)?;
            tree.set(node, "out_channels", 64)
        })
        .build()
        .unwrap()
}

fn exp_schema() -> Rc<Schema> {
    Schema::builder("Exp")
        .nested("logger_cfg", &logger_schema())
        .nested("model_cfg", &model_schema())
        .on_build(|tree, node| {
            let logger = tree.child(node, "logger_cfg")?;
            tree.set(logger, "log_dir", "./log_dir/")
        })
        .build()
        .unwrap()
}

#[test]
fn test_parent_hook_runs_after_children_and_overwrites_them() {
    let tree = ConfigTree::build(&exp_schema()).unwrap();
    assert_eq!(
        tree.lookup("logger_cfg.log_dir").unwrap(),
        Value::from("./log_dir/")
    );
    assert_eq!(tree.lookup("model_cfg.in_channels").unwrap(), Value::Int(32));

    let trace = &tree.all_history()["logger_cfg.log_dir"];
    assert_eq!(trace.len(), 3);
    assert!(!trace[0].defined);
    assert_eq!(
        trace[1].call_site.origin,
        Origin::Constructor("LoggerConfig".to_string())
    );
    assert_eq!(
        trace[2].call_site.origin,
        Origin::Constructor("Exp".to_string())
    );
    assert!(trace[2].call_site.location.contains("construction.rs"));
}

#[test]
fn test_hooks_see_children_in_declaration_order() {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let leaf = {
        let seen = seen.clone();
        Schema::builder("Leaf")
            .field("x", 1)
            .on_build(move |tree, node| {
                seen.borrow_mut().push(tree.qualified_name(node));
                Ok(())
            })
            .build()
            .unwrap()
    };
    let top = {
        let seen = seen.clone();
        Schema::builder("Top")
            .nested("a", &leaf)
            .nested("b", &leaf)
            .on_build(move |tree, node| {
                assert_eq!(tree.children(node).len(), 2);
                seen.borrow_mut().push(tree.qualified_name(node));
                Ok(())
            })
            .build()
            .unwrap()
    };
    ConfigTree::build(&top).unwrap();
    assert_eq!(*seen.borrow(), vec!["Top.a", "Top.b", "Top"]);
}

#[test]
fn test_child_hooks_see_every_declared_parent_field() {
    let child = Schema::builder("Child")
        .reference("inherited", "..z_value")
        .required("copied")
        .on_build(|tree, node| {
            let parent = tree.parent(node).ok_or_else(|| {
                LatticeError::Custom("child built without a parent".to_string())
            })?;
            let value = tree.get(parent, "z_value")?;
            assert_eq!(tree.get(node, "inherited")?, value);
            tree.set(node, "copied", value)
        })
        .build()
        .unwrap();
    let top = Schema::builder("Top")
        .nested("a_child", &child)
        .field("z_value", 5)
        .build()
        .unwrap();

    let tree = ConfigTree::build(&top).unwrap();
    assert_eq!(tree.lookup("a_child.copied").unwrap(), Value::Int(5));
    assert_eq!(tree.all_history()["a_child"].len(), 1);
}

#[test]
fn test_failing_hook_fails_construction() {
    let schema = Schema::builder("S")
        .field("x", 1)
        .on_build(|tree, node| tree.set(node, "y", 2))
        .build()
        .unwrap();
    assert!(matches!(
        ConfigTree::build(&schema),
        Err(LatticeError::UnknownField { .. })
    ));
}

#[test]
fn test_writes_after_construction_are_direct() {
    let mut tree = ConfigTree::build(&exp_schema()).unwrap();
    let model = tree.child(tree.root(), "model_cfg").unwrap();
    tree.set(model, "out_channels", 10).unwrap();
    let trace = &tree.all_history()["model_cfg.out_channels"];
    assert_eq!(trace.last().unwrap().call_site.origin, Origin::Direct);
}

#[test]
fn test_derived_schema_keeps_base_hooks_and_overrides_defaults() {
    let tuned_logger = Schema::builder("TunedLogger")
        .extends(&logger_schema())
        .field("backend", "stdout")
        .build()
        .unwrap();
    let tree = ConfigTree::build(&tuned_logger).unwrap();
    assert_eq!(tree.lookup("backend").unwrap(), Value::from("stdout"));
    assert_eq!(tree.lookup("log_dir").unwrap(), Value::from("./"));
    let trace = &tree.all_history()["backend"];
    assert_eq!(
        trace[0].call_site.origin,
        Origin::Default("TunedLogger".to_string())
    );
}

#[test]
fn test_override_merged_at_build_time_wins_over_hooks() {
    let overrides = crate::config::parse_assignment("logger_cfg.log_dir=/tmp/run").unwrap();
    let tree = ConfigTree::build_with(&exp_schema(), &overrides).unwrap();
    assert_eq!(
        tree.lookup("logger_cfg.log_dir").unwrap(),
        Value::from("/tmp/run")
    );
    assert_eq!(
        tree.all_history()["logger_cfg.log_dir"]
            .last()
            .unwrap()
            .call_site
            .origin,
        Origin::Merge
    );
}

#[test]
fn test_parent_schema_shape() {
    init_logging();
    let tree = ConfigTree::build(&parent_schema()).unwrap();
    assert_eq!(tree.nodes().len(), 3);
    let names = tree
        .node(tree.root())
        .unwrap()
        .field_names()
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["base_value", "optional", "sub", "sub2"]);
}
