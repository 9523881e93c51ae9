mod common;

use serde_json::json;

use common::{FakeFactory, Script, cmds, context, text_of};
use vane::config::{TestSuiteDef, Transport};
use vane::error::VaneError;
use vane::fleet::{init_duts_with, login_duts_with};

#[tokio::test]
async fn device_rejecting_json_keeps_its_text() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ctx = context(dir.path(), &["A", "B"], Vec::new());
    let factory = FakeFactory::default().with("B", Script::rejecting_json(&["show version"]));

    let duts = init_duts_with(&ctx, &cmds(&["show version"]), &factory)
        .await
        .expect("no worker failure");

    assert_eq!(duts.len(), 2);
    let a = &duts[0].output["show version"];
    assert_eq!(a.json, json!({ "device": "A", "command": "show version" }));
    assert_eq!(a.text, text_of("A", "show version"));

    let b = &duts[1].output["show version"];
    assert_eq!(b.json, json!(""));
    assert_eq!(b.text, text_of("B", "show version"));
}

#[tokio::test]
async fn every_command_gets_both_keys() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ctx = context(dir.path(), &["leaf1", "leaf2", "spine1"], Vec::new());
    let list = cmds(&["show version", "show clock", "show lldp neighbors"]);
    let factory = FakeFactory::default()
        .with("leaf1", Script::rejecting_both(&["show clock"]))
        .with("spine1", Script::rejecting_json(&["show lldp neighbors", "show version"]));

    let duts = init_duts_with(&ctx, &list, &factory).await.expect("populated");

    for dut in &duts {
        let keys: Vec<&String> = dut.output.keys().collect();
        assert_eq!(keys, list.iter().collect::<Vec<_>>(), "{}", dut.name());
    }
    let clock = &duts[0].output["show clock"];
    assert!(!clock.has_json());
    assert!(!clock.has_text());
    let lldp = &duts[2].output["show lldp neighbors"];
    assert!(!lldp.has_json());
    assert!(lldp.has_text());
}

#[tokio::test]
async fn records_come_back_in_inventory_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let names = ["d1", "d2", "d3", "d4", "d5", "d6"];
    let ctx = context(dir.path(), &names, Vec::new());
    let duts = init_duts_with(&ctx, &cmds(&["show version"]), &FakeFactory::default())
        .await
        .expect("populated");
    let order: Vec<&str> = duts.iter().map(|d| d.name()).collect();
    assert_eq!(order, names);
}

#[tokio::test]
async fn rerun_yields_identical_key_sets() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ctx = context(dir.path(), &["leaf1", "leaf2"], Vec::new());
    let list = cmds(&["show version", "show clock", "show interfaces status"]);
    let factory = FakeFactory::default().with("leaf2", Script::rejecting_json(&["show clock"]));

    let first = init_duts_with(&ctx, &list, &factory).await.expect("first run");
    let second = init_duts_with(&ctx, &list, &factory).await.expect("second run");

    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.name(), b.name());
        let ka: Vec<_> = a.output.keys().collect();
        let kb: Vec<_> = b.output.keys().collect();
        assert_eq!(ka, kb);
    }
}

#[tokio::test]
async fn worker_panics_are_all_reported() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ctx = context(dir.path(), &["ok", "bad1", "bad2"], Vec::new());
    let panicking = || Script {
        panic_on: Some("show version".to_string()),
        ..Script::default()
    };
    let factory = FakeFactory::default()
        .with("bad1", panicking())
        .with("bad2", panicking());

    let err = init_duts_with(&ctx, &cmds(&["show version"]), &factory)
        .await
        .expect_err("panics surface");
    let failures = match err {
        VaneError::WorkerFailures(failures) => failures,
        other => panic!("unexpected error {other}"),
    };
    let mut devices: Vec<&str> = failures.iter().map(|f| f.device.as_str()).collect();
    devices.sort_unstable();
    assert_eq!(devices, vec!["bad1", "bad2"]);
    assert!(failures.iter().all(|f| f.reason.contains("panicked")));
}

#[tokio::test]
async fn setup_failure_is_fatal() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ctx = context(dir.path(), &["leaf1", "leaf2"], Vec::new());
    let factory = FakeFactory::default().with(
        "leaf2",
        Script {
            fail_setup: true,
            ..Script::default()
        },
    );
    let err = login_duts_with(&ctx, &factory)
        .await
        .expect_err("login fails");
    assert!(matches!(err, VaneError::NotConnected(ref host) if host == "leaf2"));
}

#[tokio::test]
async fn device_transport_overrides_run_default() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut ctx = context(dir.path(), &["leaf1", "leaf2"], Vec::<TestSuiteDef>::new());
    ctx.duts[1].transport = Some(Transport::Ssh);
    let factory = FakeFactory::default();

    let duts = login_duts_with(&ctx, &factory).await.expect("logged in");

    assert_eq!(duts[0].conn.transport(), Transport::Https);
    assert_eq!(duts[1].conn.transport(), Transport::Ssh);
    let built = factory.built.lock().expect("build log").clone();
    assert_eq!(
        built,
        vec![
            ("leaf1".to_string(), Transport::Https),
            ("leaf2".to_string(), Transport::Ssh)
        ]
    );
}
