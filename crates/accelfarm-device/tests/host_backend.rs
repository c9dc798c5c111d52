//! Exercises the reference backend through the `DeviceBackend` trait, the
//! same way the pipeline's nodes drive it.

use accelfarm_core::{DeviceBackend, FarmError, KernelId, TransferStage};
use accelfarm_device::{scalar_from_slab, vec_from_slab, write_slab, HostDevice};

const DOUBLE: KernelId = KernelId(1);
const SCALE: KernelId = KernelId(2);

fn device_with_kernels() -> HostDevice {
    let mut device = HostDevice::new();
    device.register_kernel(DOUBLE, |inputs, outputs| {
        let src: Vec<u32> = vec_from_slab(&inputs[0])?;
        let doubled: Vec<u32> = src.iter().map(|v| v * 2).collect();
        write_slab(&mut outputs[0], &doubled)
    });
    device.register_kernel(SCALE, |inputs, outputs| {
        let factor: u32 = scalar_from_slab(&inputs[0])?;
        let src: Vec<u32> = vec_from_slab(&inputs[1])?;
        let scaled: Vec<u32> = src.iter().map(|v| v * factor).collect();
        write_slab(&mut outputs[0], &scaled)
    });
    device
}

fn stage(device: &HostDevice, values: &[u32]) -> accelfarm_core::DeviceHandle {
    let bytes: &[u8] = bytemuck::cast_slice(values);
    let handle = device.alloc(bytes.len()).unwrap();
    device.copy_in(handle, bytes).unwrap();
    handle
}

#[test]
fn copy_in_then_out_round_trips() {
    let device = HostDevice::new();
    let handle = stage(&device, &[10, 20, 30]);

    let mut back = [0u8; 12];
    device.copy_out(handle, &mut back).unwrap();
    assert_eq!(vec_from_slab::<u32>(&back).unwrap(), vec![10, 20, 30]);

    device.free(handle).unwrap();
    assert_eq!(device.live_allocations(), 0);
    assert_eq!(device.allocated_bytes(), 0);
}

#[test]
fn freed_handle_is_rejected_at_the_right_stage() {
    let device = HostDevice::new();
    let handle = stage(&device, &[1, 2]);
    device.free(handle).unwrap();

    let err = device.copy_in(handle, &[0u8; 8]).unwrap_err();
    assert!(matches!(
        err,
        FarmError::DeviceTransferFailed {
            stage: TransferStage::CopyIn,
            ..
        }
    ));

    let mut back = [0u8; 8];
    let err = device.copy_out(handle, &mut back).unwrap_err();
    assert!(matches!(
        err,
        FarmError::DeviceTransferFailed {
            stage: TransferStage::CopyBack,
            ..
        }
    ));

    let err = device.free(handle).unwrap_err();
    assert!(matches!(
        err,
        FarmError::DeviceTransferFailed {
            stage: TransferStage::Release,
            ..
        }
    ));
}

#[test]
fn size_mismatch_is_a_copy_error() {
    let device = HostDevice::new();
    let handle = device.alloc(8).unwrap();
    let err = device.copy_in(handle, &[0u8; 4]).unwrap_err();
    assert!(matches!(
        err,
        FarmError::DeviceTransferFailed {
            stage: TransferStage::CopyIn,
            ..
        }
    ));
}

#[test]
fn zero_length_allocation_is_rejected() {
    let device = HostDevice::new();
    let err = device.alloc(0).unwrap_err();
    assert!(matches!(
        err,
        FarmError::DeviceTransferFailed {
            stage: TransferStage::Allocate,
            ..
        }
    ));
}

#[test]
fn registered_kernel_runs_over_staged_buffers() {
    let device = device_with_kernels();
    let input = stage(&device, &[1, 2, 3, 4]);
    let output = device.alloc(16).unwrap();

    device.invoke(DOUBLE, &[input], &[output]).unwrap();

    let mut back = [0u8; 16];
    device.copy_out(output, &mut back).unwrap();
    assert_eq!(vec_from_slab::<u32>(&back).unwrap(), vec![2, 4, 6, 8]);
}

#[test]
fn kernel_arguments_arrive_in_binding_order() {
    let device = device_with_kernels();
    let factor = stage(&device, &[3]);
    let values = stage(&device, &[5, 6]);
    let output = device.alloc(8).unwrap();

    device.invoke(SCALE, &[factor, values], &[output]).unwrap();

    let mut back = [0u8; 8];
    device.copy_out(output, &mut back).unwrap();
    assert_eq!(vec_from_slab::<u32>(&back).unwrap(), vec![15, 18]);
}

#[test]
fn kernel_may_alias_an_input_and_an_output() {
    let device = device_with_kernels();
    let buffer = stage(&device, &[7, 8, 9, 10]);

    // Same handle on both sides: the kernel reads the pre-invoke contents.
    device.invoke(DOUBLE, &[buffer], &[buffer]).unwrap();

    let mut back = [0u8; 16];
    device.copy_out(buffer, &mut back).unwrap();
    assert_eq!(vec_from_slab::<u32>(&back).unwrap(), vec![14, 16, 18, 20]);
}

#[test]
fn unknown_kernel_and_kernel_failure_are_kernel_stage_errors() {
    let mut device = HostDevice::new();
    device.register_kernel(KernelId(77), |_, _| Err("saturated".to_owned()));

    let input = stage(&device, &[1]);
    let output = device.alloc(4).unwrap();

    let err = device.invoke(KernelId(99), &[input], &[output]).unwrap_err();
    assert!(matches!(
        err,
        FarmError::DeviceTransferFailed {
            stage: TransferStage::Kernel,
            ..
        }
    ));

    let err = device
        .invoke(KernelId(77), &[input], &[output])
        .unwrap_err();
    match err {
        FarmError::DeviceTransferFailed { stage, reason } => {
            assert_eq!(stage, TransferStage::Kernel);
            assert_eq!(reason, "saturated");
        }
        other => panic!("unexpected error: {other}"),
    }

    // A failed invoke must not lose the output slab.
    assert_eq!(device.live_allocations(), 2);
}
