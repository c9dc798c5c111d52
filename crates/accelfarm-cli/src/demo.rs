//! The chained offload demo: derive a series device-side with a one-shot
//! task, then validate inclusive window sums over it with a farm.
//!
//! The series is `raw[j] = j + 1`, and the derive kernel reproduces it
//! device-side, so every window `[i, i + span]` has the closed-form sum
//! `gauss(i + span + 1) - gauss(i)`. Any scheduling or transfer bug shows
//! up as a checksum mismatch.

use std::sync::Arc;

use anyhow::{bail, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use accelfarm_core::{
    InputDescriptor, KernelId, OffloadTask, OutputDescriptor, TaskDescriptor,
};
use accelfarm_device::{scalar_from_slab, vec_from_slab, write_slab, HostDevice};
use accelfarm_pipeline::{Collector, Emitter, FarmConfig, FarmControl, Pipeline, TaskOutcome};

use crate::cli::DemoArgs;

const WINDOW_SUM: KernelId = KernelId(1);
const DERIVE: KernelId = KernelId(2);

#[derive(Serialize)]
struct DemoReport {
    size: u32,
    windows: usize,
    ok: usize,
    mismatched: usize,
    failed: usize,
    oneshot_ms: f32,
    farm_ms: f32,
    total_ms: f32,
}

fn build_device() -> HostDevice {
    let mut device = HostDevice::new();
    device.register_kernel(DERIVE, |inputs, outputs| {
        let len_raw: u32 = scalar_from_slab(&inputs[0])?;
        let raw: Vec<u32> = vec_from_slab(&inputs[1])?;
        let len_derived: u32 = scalar_from_slab(&inputs[2])?;
        let take = (len_raw as usize).min(raw.len());
        let derived: Vec<u32> = (0..len_derived as usize)
            .map(|i| if i < take { raw[i] } else { 1 })
            .collect();
        write_slab(&mut outputs[0], &derived)
    });
    device.register_kernel(WINDOW_SUM, |inputs, outputs| {
        let first: u32 = scalar_from_slab(&inputs[0])?;
        let last: u32 = scalar_from_slab(&inputs[1])?;
        let series: Vec<u32> = vec_from_slab(&inputs[2])?;
        if last as usize >= series.len() {
            return Err(format!(
                "window [{first}, {last}] exceeds {} elements",
                series.len()
            ));
        }
        let sum: u32 = series[first as usize..=last as usize].iter().sum();
        write_slab(&mut outputs[0], &[sum])
    });
    device
}

/// One-shot stage: upload the raw series, keep it resident, and leave the
/// derived series on the device without copying it back.
struct DeriveTask {
    raw: Arc<Vec<u32>>,
    derived: Arc<Vec<u32>>,
    len_raw: u32,
    len_derived: u32,
}

impl OffloadTask for DeriveTask {
    fn bind(&mut self) -> accelfarm_core::Result<TaskDescriptor> {
        Ok(TaskDescriptor::new(DERIVE)
            .input(InputDescriptor::value(&self.len_raw))
            .input(InputDescriptor::slice(self.raw.as_slice()).retain())
            .input(InputDescriptor::value(&self.len_derived))
            .output(OutputDescriptor::device_only(self.derived.as_slice())))
    }
}

/// Farm stage: sum one inclusive window of the device-resident series.
struct WindowSumTask {
    series: Arc<Vec<u32>>,
    first: u32,
    last: u32,
    sum: u32,
}

impl OffloadTask for WindowSumTask {
    fn bind(&mut self) -> accelfarm_core::Result<TaskDescriptor> {
        Ok(TaskDescriptor::new(WINDOW_SUM)
            .input(InputDescriptor::value(&self.first))
            .input(InputDescriptor::value(&self.last))
            .input(InputDescriptor::reuse(self.series.as_slice()))
            .output(OutputDescriptor::value(&mut self.sum)))
    }
}

struct WindowEmitter {
    series: Arc<Vec<u32>>,
    next: u32,
    end: u32,
    span: u32,
}

impl Emitter<WindowSumTask> for WindowEmitter {
    fn next_task(&mut self) -> Option<WindowSumTask> {
        if self.next >= self.end {
            return None;
        }
        let task = WindowSumTask {
            series: Arc::clone(&self.series),
            first: self.next,
            last: self.next + self.span,
            sum: 0,
        };
        self.next += 1;
        Some(task)
    }
}

fn gauss(n: u32) -> u32 {
    (n * n + n) / 2
}

#[derive(Default)]
struct WindowChecker {
    ok: usize,
    mismatched: usize,
    failed: usize,
}

impl Collector<WindowSumTask> for WindowChecker {
    fn collect(&mut self, outcome: TaskOutcome<WindowSumTask>) -> FarmControl {
        let task = outcome.task;
        match outcome.result {
            Ok(()) => {
                let expected = gauss(task.last + 1) - gauss(task.first);
                if task.sum == expected {
                    debug!(first = task.first, sum = task.sum, "window ok");
                    self.ok += 1;
                } else {
                    warn!(
                        first = task.first,
                        got = task.sum,
                        expected,
                        "wrong window sum"
                    );
                    self.mismatched += 1;
                }
            }
            Err(error) => {
                warn!(first = task.first, %error, "window task failed");
                self.failed += 1;
            }
        }
        FarmControl::Continue
    }
}

pub fn run(mut config: FarmConfig, args: DemoArgs) -> Result<()> {
    if args.end > args.start {
        let last_index = args.end - 1 + args.span;
        if last_index >= args.size {
            bail!(
                "window [{}, {last_index}] runs past the series ({} elements)",
                args.end - 1,
                args.size
            );
        }
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }

    let device = Arc::new(build_device());
    let raw: Arc<Vec<u32>> = Arc::new((1..=args.size).collect());
    let derived: Arc<Vec<u32>> = Arc::new(vec![0u32; args.size as usize]);

    info!(
        size = args.size,
        windows = args.end.saturating_sub(args.start),
        workers = config.workers,
        "starting chained demo"
    );

    let pipeline = Pipeline::new(Arc::clone(&device), config);
    let first = DeriveTask {
        raw: Arc::clone(&raw),
        derived: Arc::clone(&derived),
        len_raw: args.size,
        len_derived: args.size,
    };
    let emitter = WindowEmitter {
        series: Arc::clone(&derived),
        next: args.start,
        end: args.end,
        span: args.span,
    };
    let mut checker = WindowChecker::default();

    let (_first, report) = pipeline.run_and_wait_end(first, emitter, &mut checker)?;

    let demo = DemoReport {
        size: args.size,
        windows: report.farm.collected,
        ok: checker.ok,
        mismatched: checker.mismatched,
        failed: checker.failed,
        oneshot_ms: report.oneshot_ms,
        farm_ms: report.farm.elapsed_ms,
        total_ms: report.total_ms,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&demo)?);
    } else {
        println!(
            "validated {}/{} windows over a {}-element series in {:.2} ms (one-shot {:.2} ms, farm {:.2} ms)",
            demo.ok, demo.windows, demo.size, demo.total_ms, demo.oneshot_ms, demo.farm_ms
        );
    }

    if checker.mismatched > 0 || checker.failed > 0 {
        bail!(
            "{} wrong sums, {} failed tasks",
            checker.mismatched,
            checker.failed
        );
    }
    Ok(())
}
