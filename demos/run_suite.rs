//! Runs a small verification suite against the devices of `duts.yaml`.
//!
//! ```text
//! cargo run --example run_suite -- demos/definitions.yaml demos/duts.yaml demos/test_definition.yaml
//! ```

use std::path::PathBuf;

use anyhow::Context;
use futures::future::BoxFuture;
use vane::VaneContext;
use vane::driver::Encoding;
use vane::fleet::{build_runtime, init_duts};
use vane::report::result_schema_json;
use vane::runner::{Suite, TestCase, run_suite};
use vane::testops::TestOps;

const SUITE: &str = "test_system.py";

/// Verifies the model name of every device.
///
/// TS: Collect `show version` from the DUT
/// TS: Compare the model name with the expected model
fn test_model<'a>(ops: &'a mut TestOps<'_>) -> BoxFuture<'a, ()> {
    Box::pin(async move {
        match ops
            .show_output_json("show version")
            .and_then(|v| v.get("modelName"))
            .cloned()
        {
            Some(model) => {
                ops.actual_output = model;
                ops.compare_outputs();
            }
            None => {
                ops.test_result = false;
                ops.output_msg = format!("{} returned no modelName", ops.dut_name());
            }
        }
    })
}

/// Verifies every declared neighbor shows up in LLDP.
///
/// TS: Collect `show lldp neighbors` from the DUT
/// TS: Check each cabled interface reports the expected neighbor
fn test_lldp<'a>(ops: &'a mut TestOps<'_>) -> BoxFuture<'a, ()> {
    Box::pin(async move {
        let outputs = ops
            .run_show_cmds(&["show lldp neighbors".to_string()], Encoding::Json)
            .await;
        let neighbors = outputs
            .first()
            .and_then(|v| v.get("lldpNeighbors"))
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let links: Vec<_> = ops.interface_list().to_vec();
        for link in &links {
            let seen = neighbors.iter().any(|n| {
                n.get("port").and_then(|p| p.as_str()) == Some(link.interface_name.as_str())
                    && n.get("neighborDevice")
                        .and_then(|d| d.as_str())
                        .is_some_and(|d| d.starts_with(&link.z_hostname))
            });
            ops.expected_results.push(serde_json::json!(true));
            ops.actual_results.push(serde_json::json!(seen));
        }
        ops.compare_results();
    })
}

fn suite() -> Suite {
    let mut suite = Suite::new(SUITE);
    suite.add(TestCase {
        name: "test_model",
        doc: "Verifies the model name of every device.\n\nTS: Collect `show version` from the DUT\nTS: Compare the model name with the expected model",
        run: test_model,
    });
    suite.add(TestCase {
        name: "test_lldp",
        doc: "Verifies every declared neighbor shows up in LLDP.\n\nTS: Collect `show lldp neighbors` from the DUT\nTS: Check each cabled interface reports the expected neighbor",
        run: test_lldp,
    });
    suite
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let definitions = args
        .next()
        .unwrap_or_else(|| "demos/definitions.yaml".to_string());
    let duts = args.next().unwrap_or_else(|| "demos/duts.yaml".to_string());
    let mut test_definitions: Vec<PathBuf> = args.map(PathBuf::from).collect();
    if test_definitions.is_empty() {
        test_definitions.push(PathBuf::from("demos/test_definition.yaml"));
    }

    let ctx = VaneContext::load_or_exit(&definitions, &duts, &test_definitions);

    let schema_path = ctx.parameters.results_dir.join("result.schema.json");
    std::fs::create_dir_all(&ctx.parameters.results_dir)
        .with_context(|| format!("creating {}", ctx.parameters.results_dir.display()))?;
    std::fs::write(&schema_path, result_schema_json()?)
        .with_context(|| format!("writing {}", schema_path.display()))?;

    let runtime = build_runtime(ctx.duts.len()).context("building runtime")?;
    runtime.block_on(async {
        let mut duts = init_duts(&ctx).await.context("capturing show commands")?;
        let summary = run_suite(&ctx, &suite(), &mut duts).await;
        println!(
            "suite={} passed={} failed={} errored={}",
            summary.suite,
            summary.passed,
            summary.failed,
            summary.errored()
        );
        for err in &summary.errors {
            println!("  {} on {}: {}", err.test_case, err.dut, err.reason);
        }
        Ok::<(), anyhow::Error>(())
    })
}
