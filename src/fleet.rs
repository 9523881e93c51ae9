//! Fleet orchestration: connect to every device, then capture in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use log::{error, info};
use tokio::runtime::{Builder, Runtime};
use tokio::task::JoinSet;

use crate::config::VaneContext;
use crate::driver::{ConnectionFactory, DriverFactory};
use crate::error::{DeviceFailure, Result, VaneError};
use crate::worker::{DutRecord, dut_worker};

/// Connects to every inventory device with the default drivers.
pub async fn login_duts(ctx: &VaneContext) -> Result<Vec<DutRecord>> {
    login_duts_with(ctx, &DriverFactory).await
}

/// Connects to every inventory device, one after the other.
///
/// A device that cannot be set up fails the whole call.
pub async fn login_duts_with(
    ctx: &VaneContext,
    factory: &dyn ConnectionFactory,
) -> Result<Vec<DutRecord>> {
    let mut records = Vec::with_capacity(ctx.duts.len());
    for dut in &ctx.duts {
        let transport = ctx.transport_for(dut);
        let mut conn = factory.build(dut, transport, &ctx.parameters)?;
        if let Err(err) = conn.set_up_conn().await {
            error!("{}: connection setup failed: {err}", dut.name);
            return Err(err);
        }
        info!("{}: connected to {} over {:?}", dut.name, dut.mgmt_ip, transport);
        records.push(DutRecord::new(dut.clone(), conn));
    }
    Ok(records)
}

/// Connects to every device and captures the context's command list.
pub async fn init_duts(ctx: &VaneContext) -> Result<Vec<DutRecord>> {
    init_duts_with(ctx, &ctx.show_cmds, &DriverFactory).await
}

/// Connects to every device through `factory` and captures `show_cmds`.
pub async fn init_duts_with(
    ctx: &VaneContext,
    show_cmds: &[String],
    factory: &dyn ConnectionFactory,
) -> Result<Vec<DutRecord>> {
    let duts = login_duts_with(ctx, factory).await?;
    populate_duts(duts, show_cmds).await
}

/// Runs [`dut_worker`] on every record, one task per device.
///
/// Every task is joined. Records come back in input order; if any task
/// panicked or was cancelled the call returns
/// [`VaneError::WorkerFailures`] naming each failed device.
pub async fn populate_duts(duts: Vec<DutRecord>, show_cmds: &[String]) -> Result<Vec<DutRecord>> {
    let count = duts.len();
    let cmds: Arc<[String]> = Arc::from(show_cmds);
    let mut set = JoinSet::new();
    let mut names = HashMap::with_capacity(count);

    for (index, mut dut) in duts.into_iter().enumerate() {
        let cmds = Arc::clone(&cmds);
        let name = dut.name().to_string();
        let handle = set.spawn(async move {
            dut_worker(&mut dut, &cmds).await;
            (index, dut)
        });
        names.insert(handle.id(), name);
    }
    info!("Capturing {} command(s) on {} device(s)", cmds.len(), count);

    let mut slots: Vec<Option<DutRecord>> = (0..count).map(|_| None).collect();
    let mut failures = Vec::new();
    while let Some(joined) = set.join_next_with_id().await {
        match joined {
            Ok((_, (index, dut))) => {
                if let Some(slot) = slots.get_mut(index) {
                    *slot = Some(dut);
                }
            }
            Err(err) => {
                let device = names
                    .get(&err.id())
                    .cloned()
                    .unwrap_or_else(|| format!("task {}", err.id()));
                let reason = if err.is_panic() {
                    "worker panicked".to_string()
                } else {
                    format!("worker did not complete: {err}")
                };
                error!("{device}: {reason}");
                failures.push(DeviceFailure { device, reason });
            }
        }
    }

    if !failures.is_empty() {
        return Err(VaneError::WorkerFailures(failures));
    }
    Ok(slots.into_iter().flatten().collect())
}

/// Multi-thread runtime with one worker thread per device.
pub fn build_runtime(device_count: usize) -> std::io::Result<Runtime> {
    Builder::new_multi_thread()
        .worker_threads(device_count.max(1))
        .thread_name("vane-dut")
        .enable_all()
        .build()
}
