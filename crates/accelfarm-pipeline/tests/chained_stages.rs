//! End-to-end pipeline runs: a one-shot derivation leaving its result
//! device-resident, then a farm of window-sum tasks reusing it.

use std::sync::Arc;

use accelfarm_core::{
    BufferId, DeviceBackend, FarmError, InputDescriptor, KernelId, OffloadTask, OutputDescriptor,
    Result, TaskDescriptor,
};
use accelfarm_device::{scalar_from_slab, vec_from_slab, write_slab, DeviceAllocator, HostDevice};
use accelfarm_pipeline::{
    Collector, Emitter, FarmConfig, FarmControl, OneShot, Pipeline, TaskOutcome,
};

const WINDOW_SUM: KernelId = KernelId(1);
const DERIVE: KernelId = KernelId(2);
const FETCH: KernelId = KernelId(3);
const FILL: KernelId = KernelId(4);

/// Derive: `out[i] = raw[i]` while `i < len_raw`, else `1`.
/// Window-sum: inclusive sum of `series[first..=last]`.
/// Fetch and fill are plumbing for readback-style assertions.
fn paired_device() -> Arc<HostDevice> {
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
    device.register_kernel(FETCH, |inputs, outputs| {
        let series: Vec<u32> = vec_from_slab(&inputs[0])?;
        write_slab(&mut outputs[0], &series)
    });
    device.register_kernel(FILL, |inputs, outputs| {
        let value: u32 = scalar_from_slab(&inputs[0])?;
        let len = outputs[0].len() / std::mem::size_of::<u32>();
        write_slab(&mut outputs[0], &vec![value; len])
    });
    Arc::new(device)
}

/// First stage: upload raw, keep it resident, and leave the derived
/// series on the device without copying it back.
struct DeriveTask {
    raw: Arc<Vec<u32>>,
    derived: Arc<Vec<u32>>,
    len_raw: u32,
    len_derived: u32,
}

impl OffloadTask for DeriveTask {
    fn bind(&mut self) -> Result<TaskDescriptor> {
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
    fn bind(&mut self) -> Result<TaskDescriptor> {
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
        if self.next == self.end {
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
    mismatches: Vec<(u32, u32, u32)>,
    failures: Vec<FarmError>,
}

impl Collector<WindowSumTask> for WindowChecker {
    fn collect(&mut self, outcome: TaskOutcome<WindowSumTask>) -> FarmControl {
        let task = outcome.task;
        match outcome.result {
            Ok(()) => {
                // With series[j] = j + 1 the inclusive window sum has the
                // closed form gauss(last + 1) - gauss(first).
                let expected = gauss(task.last + 1) - gauss(task.first);
                if task.sum == expected {
                    self.ok += 1;
                } else {
                    self.mismatches.push((task.first, task.sum, expected));
                }
            }
            Err(error) => self.failures.push(error),
        }
        FarmControl::Continue
    }
}

#[test]
fn two_stage_pipeline_validates_every_window_sum() {
    const SIZE: usize = 256;
    let device = paired_device();
    let raw: Arc<Vec<u32>> = Arc::new((1..=SIZE as u32).collect());
    let derived: Arc<Vec<u32>> = Arc::new(vec![0u32; SIZE]);

    let pipeline = Pipeline::new(Arc::clone(&device), FarmConfig::default());
    let first = DeriveTask {
        raw: Arc::clone(&raw),
        derived: Arc::clone(&derived),
        len_raw: SIZE as u32,
        len_derived: SIZE as u32,
    };
    let emitter = WindowEmitter {
        series: Arc::clone(&derived),
        next: 10,
        end: 120,
        span: 50,
    };
    let mut checker = WindowChecker::default();

    let (_first, report) = pipeline
        .run_and_wait_end(first, emitter, &mut checker)
        .unwrap();

    assert_eq!(checker.ok, 110);
    assert!(
        checker.mismatches.is_empty(),
        "wrong sums: {:?}",
        checker.mismatches
    );
    assert!(checker.failures.is_empty());
    assert_eq!(report.farm.emitted, 110);
    assert_eq!(report.farm.collected, 110);
    assert_eq!(report.farm.failed, 0);
    assert!(report.total_ms >= report.oneshot_ms);

    // Teardown freed everything the stages retained.
    assert_eq!(pipeline.allocator().live(), 0);
    assert_eq!(device.live_allocations(), 0);
    assert_eq!(device.allocated_bytes(), 0);

    // The derived series lived only on the device.
    assert!(derived.iter().all(|v| *v == 0));
}

/// Readback helper: fetch a device-resident series into a host copy,
/// optionally marking this as the series' last use.
#[derive(Debug)]
struct ReadbackTask {
    source: Arc<Vec<u32>>,
    copy: Vec<u32>,
    last_use: bool,
}

impl OffloadTask for ReadbackTask {
    fn bind(&mut self) -> Result<TaskDescriptor> {
        let source = if self.last_use {
            InputDescriptor::reuse(self.source.as_slice()).release()
        } else {
            InputDescriptor::reuse(self.source.as_slice())
        };
        Ok(TaskDescriptor::new(FETCH)
            .input(source)
            .output(OutputDescriptor::slice(&mut self.copy)))
    }
}

#[test]
fn device_resident_intermediate_chains_into_a_readback() {
    let device = paired_device();
    let allocator = Arc::new(DeviceAllocator::new());
    let oneshot = OneShot::new(Arc::clone(&device), Arc::clone(&allocator));

    let raw: Arc<Vec<u32>> = Arc::new(vec![10, 20, 30, 40, 50, 60, 70, 80]);
    let derived: Arc<Vec<u32>> = Arc::new(vec![0u32; 16]);

    let derive = DeriveTask {
        raw: Arc::clone(&raw),
        derived: Arc::clone(&derived),
        len_raw: 8,
        len_derived: 16,
    };
    oneshot.run_and_wait_end(derive).unwrap();
    assert_eq!(allocator.live(), 2);

    let fetch = ReadbackTask {
        source: Arc::clone(&derived),
        copy: vec![0u32; 16],
        last_use: true,
    };
    let fetch = oneshot.run_and_wait_end(fetch).unwrap();

    // First eight derived from raw, the tail filled with ones.
    let mut expected = raw.to_vec();
    expected.extend(std::iter::repeat(1u32).take(8));
    assert_eq!(fetch.copy, expected);
    assert_eq!(allocator.live(), 1);

    // The release on the last use freed the derived series, so another
    // reuse of the same region no longer resolves.
    let stale = ReadbackTask {
        source: Arc::clone(&derived),
        copy: vec![0u32; 16],
        last_use: false,
    };
    let err = oneshot.run_and_wait_end(stale).unwrap_err();
    match err {
        FarmError::UnresolvedBuffer { addr } => assert_eq!(addr, derived.as_ptr() as usize),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn upload_into_refreshes_a_retained_allocation_in_place() {
    let device = paired_device();
    let allocator = Arc::new(DeviceAllocator::new());
    let oneshot = OneShot::new(Arc::clone(&device), Arc::clone(&allocator));

    struct SeriesTask {
        data: Vec<u32>,
        copy: Vec<u32>,
        refresh: bool,
    }
    impl OffloadTask for SeriesTask {
        fn bind(&mut self) -> Result<TaskDescriptor> {
            let input = if self.refresh {
                InputDescriptor::upload_into(self.data.as_slice())
            } else {
                InputDescriptor::slice(self.data.as_slice()).retain()
            };
            Ok(TaskDescriptor::new(FETCH)
                .input(input)
                .output(OutputDescriptor::slice(&mut self.copy)))
        }
    }

    let task = SeriesTask {
        data: vec![1, 2, 3, 4],
        copy: vec![0; 4],
        refresh: false,
    };
    let mut task = oneshot.run_and_wait_end(task).unwrap();
    assert_eq!(task.copy, vec![1, 2, 3, 4]);
    assert_eq!(allocator.live(), 1);

    // A Vec keeps its heap address when the struct moves, so the
    // refreshed upload resolves to the same device allocation.
    task.data[2] = 99;
    task.refresh = true;
    let task = oneshot.run_and_wait_end(task).unwrap();
    assert_eq!(task.copy, vec![1, 2, 99, 4]);
    assert_eq!(allocator.live(), 1);
}

#[test]
fn reused_output_writes_into_the_retained_allocation() {
    let device = paired_device();
    let allocator = Arc::new(DeviceAllocator::new());
    let oneshot = OneShot::new(Arc::clone(&device), Arc::clone(&allocator));

    struct FillTask {
        value: u32,
        buffer: Vec<u32>,
    }
    impl OffloadTask for FillTask {
        fn bind(&mut self) -> Result<TaskDescriptor> {
            Ok(TaskDescriptor::new(FILL)
                .input(InputDescriptor::value(&self.value))
                .output(OutputDescriptor::reuse(&mut self.buffer)))
        }
    }

    // Stage the buffer the way an earlier task would have left it.
    let buffer = vec![7u32; 6];
    let bytes: &[u8] = bytemuck::cast_slice(&buffer);
    let handle = device.alloc(bytes.len()).unwrap();
    device.copy_in(handle, bytes).unwrap();
    allocator.register(BufferId(buffer.as_ptr() as usize), handle);

    let task = oneshot
        .run_and_wait_end(FillTask { value: 3, buffer })
        .unwrap();
    assert_eq!(task.buffer, vec![3u32; 6]);

    // An output reuse keeps the allocation retained by default.
    assert_eq!(allocator.live(), 1);
}

#[test]
fn pipeline_aborts_before_the_farm_when_the_first_stage_fails() {
    #[derive(Debug)]
    struct NoOutputTask;
    impl OffloadTask for NoOutputTask {
        fn bind(&mut self) -> Result<TaskDescriptor> {
            Ok(TaskDescriptor::new(DERIVE))
        }
    }

    let device = paired_device();
    let pipeline = Pipeline::new(Arc::clone(&device), FarmConfig::default());
    let emitter = WindowEmitter {
        series: Arc::new(vec![0u32; 4]),
        next: 0,
        end: 4,
        span: 1,
    };
    let mut checker = WindowChecker::default();

    let err = pipeline
        .run_and_wait_end(NoOutputTask, emitter, &mut checker)
        .unwrap_err();
    assert!(matches!(err, FarmError::InvalidTaskBinding(_)));
    assert_eq!(checker.ok, 0);
    assert!(checker.failures.is_empty());
}
