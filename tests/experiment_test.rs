//! End-to-end use of the builder API on a nested experiment configuration.

mod common;

use common::init_logging;
use lattice_config::{
    diagnose::Finding, history::Origin, ConfigTree, LatticeError, Overrides, Schema, Value,
};
use std::rc::Rc;
use test_log::test;

fn experiment() -> Rc<Schema> {
    let optimizer = Schema::builder("Optimizer")
        .reference("lr", "...base_lr")
        .field("momentum", 0.9)
        .build()
        .unwrap();
    let model = Schema::builder("Model")
        .field("in_channels", 32)
        .reference("out_channels", ".in_channels")
        .nested("optimizer", &optimizer)
        .computed("params", |node| {
            Ok(Value::Int(node.int("in_channels")? * node.int("out_channels")?))
        })
        .build()
        .unwrap();
    let trainer = Schema::builder("Trainer")
        .field("train_iters", 10)
        .reference("lr", "..model.optimizer.lr")
        .build()
        .unwrap();
    Schema::builder("Exp")
        .field("base_lr", 0.1)
        .nested("model", &model)
        .nested("trainer", &trainer)
        .build()
        .unwrap()
}

#[test]
fn test_cross_branch_references_follow_merges() {
    init_logging();
    let mut tree = ConfigTree::build(&experiment()).unwrap();
    assert_eq!(tree.lookup("trainer.lr").unwrap(), Value::Float(0.1));
    assert_eq!(tree.lookup("model.params").unwrap(), Value::Int(1024));

    let overrides: Overrides = [
        ("base_lr".to_string(), Value::Float(0.5)),
        (
            "model".to_string(),
            Value::table([("in_channels", 4)]),
        ),
    ]
    .into_iter()
    .collect();
    tree.merge(&overrides).unwrap();

    assert_eq!(tree.lookup("trainer.lr").unwrap(), Value::Float(0.5));
    assert_eq!(tree.lookup("model.out_channels").unwrap(), Value::Int(4));
    assert_eq!(tree.lookup("model.params").unwrap(), Value::Int(16));
}

#[test]
fn test_rejected_merge_leaves_tree_and_history_untouched() {
    let mut tree = ConfigTree::build(&experiment()).unwrap();
    let before = tree.all_history();
    let overrides: Overrides = [
        ("base_lr".to_string(), Value::Float(0.5)),
        (
            "trainer".to_string(),
            Value::table([("train_iters", 20), ("typo", 1)]),
        ),
    ]
    .into_iter()
    .collect();
    let err = tree.merge(&overrides).unwrap_err();
    assert!(matches!(err, LatticeError::UnknownField { ref node, .. } if node == "Exp.trainer"));
    assert_eq!(tree.lookup("base_lr").unwrap(), Value::Float(0.1));
    assert_eq!(tree.all_history(), before);
}

#[test]
fn test_history_exports_as_json() {
    let mut tree = ConfigTree::build(&experiment()).unwrap();
    let trainer = tree.child(tree.root(), "trainer").unwrap();
    tree.set(trainer, "train_iters", 20).unwrap();

    let json = serde_json::to_value(tree.all_history()).unwrap();
    let trace = json["trainer.train_iters"].as_array().unwrap();
    assert_eq!(trace.len(), 2);
    assert_eq!(trace[0]["value"], 10);
    assert_eq!(trace[0]["call_site"]["origin"]["kind"], "Default");
    assert_eq!(trace[0]["call_site"]["origin"]["schema"], "Trainer");
    assert_eq!(trace[1]["value"], 20);
    assert_eq!(trace[1]["call_site"]["origin"]["kind"], "Direct");
    assert_eq!(
        json["trainer.lr"][0]["value"]["$ref"],
        "..model.optimizer.lr"
    );
}

#[test]
fn test_flip_flopping_value_is_reported() {
    let mut tree = ConfigTree::build(&experiment()).unwrap();
    let trainer = tree.child(tree.root(), "trainer").unwrap();
    tree.set(trainer, "train_iters", 11).unwrap();
    tree.set(trainer, "train_iters", 10).unwrap();

    let reports = tree.diagnose(None);
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].path, "trainer.train_iters");
    assert!(reports[0].findings.contains(Finding::Confusing));
    assert_eq!(reports[0].trace.len(), 3);
    assert_eq!(reports[0].trace[2].call_site.origin, Origin::Direct);
}

#[test]
fn test_display_renders_resolved_and_pending_references() {
    let tree = ConfigTree::build(&experiment()).unwrap();
    tree.lookup("trainer.lr").unwrap();
    let text = tree.to_string();
    assert!(text.starts_with("Exp {"));
    assert!(text.contains("lr = 0.1 <- Ref(..model.optimizer.lr)"));
    assert!(text.contains("out_channels = PendingRef(.in_channels)"));
    assert!(text.contains("params = <computed params>"));
}
