use assert_cmd::Command;
use cloak_ir::{
    load_bundle, save_bundle, ComparePredicate, ProgramBuilder, Signature, Type, Value,
};
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Secret branch in `main` with a table load in one arm.
fn write_diamond(dir: &Path) -> PathBuf {
    let mut b = ProgramBuilder::new("diamond");
    let key = b.global("key", 4);
    b.annotate(key, "secret").unwrap();
    let table = b.global("table", 64);
    let main = b.function("main", Signature::default());
    let blocks: Vec<_> = (0..4).map(|_| b.block(main).unwrap()).collect();

    b.position_at_end(blocks[0]);
    let x = b.load(Value::Global(key), Type::i32()).unwrap();
    let c = b.compare(ComparePredicate::Lt, x, Value::i32(4)).unwrap();
    b.branch(c, blocks[1], blocks[2]).unwrap();
    b.position_at_end(blocks[1]);
    b.load(Value::Global(table), Type::i32()).unwrap();
    b.jump(blocks[3]).unwrap();
    b.position_at_end(blocks[2]);
    b.jump(blocks[3]).unwrap();
    b.position_at_end(blocks[3]);
    b.ret(None).unwrap();

    for &block in &blocks[1..] {
        b.set_idom(block, blocks[0]).unwrap();
    }
    for &block in &blocks[..3] {
        b.set_ipostdom(block, blocks[3]).unwrap();
    }
    b.add_control_dependence(blocks[1], blocks[0]);
    b.add_control_dependence(blocks[2], blocks[0]);

    let path = dir.join("diamond.json");
    save_bundle(&b.finish().unwrap(), &path).unwrap();
    path
}

fn cloak() -> Command {
    Command::cargo_bin("cloak").unwrap()
}

#[test]
fn test_cli_help() {
    cloak()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("instrument"))
        .stdout(predicate::str::contains("slice"));
}

#[test]
fn test_instrument_writes_the_hardened_bundle() {
    let dir = TempDir::new().unwrap();
    let input = write_diamond(dir.path());
    let output = dir.path().join("hardened.json");
    let report = dir.path().join("report.json");

    cloak()
        .arg("instrument")
        .arg(&input)
        .arg("--output")
        .arg(&output)
        .arg("--report")
        .arg(&report)
        .assert()
        .success()
        .stdout(predicate::str::contains("Transactions: 1"))
        .stdout(predicate::str::contains("global table"))
        .stdout(predicate::str::contains("code of main"));

    let hardened = load_bundle(&output).unwrap();
    assert_eq!(hardened.module.calls_to("startTransaction").count(), 1);
    assert_eq!(hardened.module.calls_to("endTransaction").count(), 1);
    assert_eq!(hardened.module.calls_to("iterateGlobal").count(), 1);

    let json = std::fs::read_to_string(&report).unwrap();
    assert!(json.contains("\"kind\": \"branch\""));
}

#[test]
fn test_custom_runtime_names_from_config() {
    let dir = TempDir::new().unwrap();
    let input = write_diamond(dir.path());
    let output = dir.path().join("hardened.json");
    let config = dir.path().join("cloak.json");
    std::fs::write(&config, r#"{ "runtime": { "start_transaction": "xbegin" } }"#).unwrap();

    cloak()
        .arg("instrument")
        .arg(&input)
        .arg("--config")
        .arg(&config)
        .arg("--output")
        .arg(&output)
        .assert()
        .success();

    let hardened = load_bundle(&output).unwrap();
    assert_eq!(hardened.module.calls_to("xbegin").count(), 1);
    assert_eq!(hardened.module.calls_to("startTransaction").count(), 0);
}

#[test]
fn test_slice_from_return_prints_statistics() {
    let dir = TempDir::new().unwrap();
    let input = write_diamond(dir.path());

    cloak()
        .arg("slice")
        .arg(&input)
        .arg("--criterion")
        .arg("ret")
        .assert()
        .success()
        .stdout(predicate::str::contains("Sliced away 8 from 11 nodes"));
}

#[test]
fn test_unmatched_criterion_fails() {
    let dir = TempDir::new().unwrap();
    let input = write_diamond(dir.path());

    cloak()
        .arg("slice")
        .arg(&input)
        .arg("--criterion")
        .arg("call:missing")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no node matches"));
}

#[test]
fn test_missing_bundle_fails() {
    let dir = TempDir::new().unwrap();

    cloak()
        .arg("instrument")
        .arg(dir.path().join("nope.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load bundle"));
}
