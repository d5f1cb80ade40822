//! End-to-end tests of the pipeline stages on a real device.

mod common;

use common::{gpu_context, SCALE_WGSL};
use tessera_runtime::{
    AccessMode, BufferManager, BuildStatus, Dispatcher, KernelArg, ProgramLoader,
    ReferenceVerifier, RuntimeError, Verdict,
};

#[pollster::test]
#[ignore] // Requires GPU
async fn test_scale_not_multiple_of_tile() {
    let context = gpu_context().await;
    let queue = context.create_queue(false).expect("queue");
    let buffers = BufferManager::new(&context);

    let n = 1000u32; // not a multiple of 256
    let input: Vec<f32> = (0..n).map(|i| i as f32 * 0.5).collect();
    let src = buffers
        .allocate("in", u64::from(n) * 4, AccessMode::ReadOnly)
        .expect("alloc in");
    let dst = buffers
        .allocate("out", u64::from(n) * 4, AccessMode::ReadWrite)
        .expect("alloc out");
    buffers.upload(&queue, &src, &input).expect("upload");

    let loader = ProgramLoader::new(&context);
    let program = loader.build("scale", SCALE_WGSL).expect("build");
    assert_eq!(
        loader.fetch_diagnostics().map(|d| d.status),
        Some(BuildStatus::Success)
    );

    let mut kernel = program.create_kernel("scale").expect("kernel");
    kernel.set_arg(0, &dst).expect("arg 0");
    kernel.set_arg(1, &src).expect("arg 1");
    kernel.set_scalar(2, 3.0f32).expect("arg 2");
    kernel.set_scalar(3, n).expect("arg 3");

    let event = Dispatcher::new(&queue)
        .dispatch(&kernel, &[n], &[256])
        .expect("dispatch");
    assert!(event.is_none(), "non-profiling queue must not time kernels");

    let mut output = vec![0.0f32; n as usize];
    buffers.download(&queue, &dst, &mut output).expect("download");

    let reference: Vec<f32> = input.iter().map(|x| x * 3.0).collect();
    assert_eq!(ReferenceVerifier::new().verify(&output, &reference), Verdict::Passed);
    assert_eq!(buffers.buffer_count(), 2);

    println!("✓ scale over a padded domain passed!");
}

#[pollster::test]
#[ignore] // Requires GPU
async fn test_rebinding_between_dispatches() {
    let context = gpu_context().await;
    let queue = context.create_queue(false).expect("queue");
    let buffers = BufferManager::new(&context);

    let input = vec![1.0f32; 64];
    let src = buffers.allocate("in", 256, AccessMode::ReadOnly).unwrap();
    let first = buffers.allocate("first", 256, AccessMode::ReadWrite).unwrap();
    let second = buffers.allocate("second", 256, AccessMode::ReadWrite).unwrap();
    buffers.upload(&queue, &src, &input).unwrap();

    let program = ProgramLoader::new(&context).build("scale", SCALE_WGSL).unwrap();
    let mut kernel = program.create_kernel("scale").unwrap();
    kernel.set_arg(1, &src).unwrap();
    kernel.set_scalar(3, 64u32).unwrap();

    let dispatcher = Dispatcher::new(&queue);
    kernel.set_arg(0, &first).unwrap();
    kernel.set_scalar(2, 2.0f32).unwrap();
    dispatcher.dispatch(&kernel, &[64], &[256]).unwrap();

    kernel.set_arg(0, &second).unwrap();
    kernel.set_scalar(2, 5.0f32).unwrap();
    dispatcher.dispatch(&kernel, &[64], &[256]).unwrap();

    let mut a = vec![0.0f32; 64];
    let mut b = vec![0.0f32; 64];
    buffers.download(&queue, &first, &mut a).unwrap();
    buffers.download(&queue, &second, &mut b).unwrap();
    assert!(a.iter().all(|&x| x == 2.0));
    assert!(b.iter().all(|&x| x == 5.0));
}

#[pollster::test]
#[ignore] // Requires GPU
async fn test_non_blocking_transfers() {
    let context = gpu_context().await;
    let queue = context.create_queue(false).unwrap();
    let buffers = BufferManager::new(&context);

    let data: Vec<u32> = (0..4096).collect();
    let buffer = buffers.allocate("data", 4096 * 4, AccessMode::ReadWrite).unwrap();
    buffers.enqueue_upload(&queue, &buffer, &data).unwrap();

    let mut host = vec![0u32; 4096];
    let pending = buffers.enqueue_download(&queue, &buffer, &mut host).unwrap();
    pending.wait().unwrap();
    assert_eq!(host, data);
}

#[pollster::test]
#[ignore] // Requires GPU
async fn test_upload_at_offset_and_odd_sizes() {
    let context = gpu_context().await;
    let queue = context.create_queue(false).unwrap();
    let buffers = BufferManager::new(&context);

    let buffer = buffers.allocate("history", 8 * 4, AccessMode::ReadWrite).unwrap();
    buffers.upload(&queue, &buffer, &[0.0f32; 3]).unwrap();
    buffers.upload_at(&queue, &buffer, 12, &[1.0f32, 2.0, 3.0, 4.0, 5.0]).unwrap();

    let mut host = [0.0f32; 8];
    buffers.download(&queue, &buffer, &mut host).unwrap();
    assert_eq!(host, [0.0, 0.0, 0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);

    let bytes = buffers.allocate("bytes", 5, AccessMode::ReadWrite).unwrap();
    buffers.upload(&queue, &bytes, &[1u8, 2, 3, 4, 5]).unwrap();
    let mut back = [0u8; 5];
    buffers.download(&queue, &bytes, &mut back).unwrap();
    assert_eq!(back, [1, 2, 3, 4, 5]);
}

#[pollster::test]
#[ignore] // Requires GPU
async fn test_partial_word_upload_keeps_neighbouring_bytes() {
    let context = gpu_context().await;
    let queue = context.create_queue(false).unwrap();
    let buffers = BufferManager::new(&context);

    let bytes = buffers.allocate("bytes", 5, AccessMode::ReadWrite).unwrap();
    buffers.upload(&queue, &bytes, &[1u8, 2, 3, 4, 5]).unwrap();
    buffers.upload(&queue, &bytes, &[9u8]).unwrap();

    let mut back = [0u8; 5];
    buffers.download(&queue, &bytes, &mut back).unwrap();
    assert_eq!(back, [9, 2, 3, 4, 5]);

    // Tail word straddling the middle of the buffer.
    let wide = buffers.allocate("wide", 12, AccessMode::ReadWrite).unwrap();
    buffers.upload(&queue, &wide, &[0xAAu8; 12]).unwrap();
    buffers.upload_at(&queue, &wide, 4, &[1u8, 2, 3, 4, 5, 6]).unwrap();
    let mut back = [0u8; 12];
    buffers.download(&queue, &wide, &mut back).unwrap();
    assert_eq!(back, [0xAA, 0xAA, 0xAA, 0xAA, 1, 2, 3, 4, 5, 6, 0xAA, 0xAA]);
}

#[pollster::test]
#[ignore] // Requires GPU
async fn test_transfer_bounds() {
    let context = gpu_context().await;
    let queue = context.create_queue(false).unwrap();
    let buffers = BufferManager::new(&context);

    let buffer = buffers.allocate("small", 16, AccessMode::ReadWrite).unwrap();
    assert!(matches!(
        buffers.upload(&queue, &buffer, &[0.0f32; 5]),
        Err(RuntimeError::TransferFailed(_))
    ));
    assert!(matches!(
        buffers.upload_at(&queue, &buffer, 2, &[0u8; 2]),
        Err(RuntimeError::TransferFailed(_))
    ));
    assert!(matches!(
        buffers.upload_at(&queue, &buffer, u64::MAX - 3, &[0u8; 8]),
        Err(RuntimeError::TransferFailed(_))
    ));
    let mut too_big = [0.0f32; 8];
    assert!(buffers.download(&queue, &buffer, &mut too_big).is_err());

    let huge = context.device_info().max_buffer_size + 4;
    assert!(matches!(
        buffers.allocate("huge", huge, AccessMode::ReadWrite),
        Err(RuntimeError::AllocationFailed(_))
    ));

    let empty = buffers.allocate("empty", 0, AccessMode::ReadWrite).unwrap();
    assert_eq!(empty.size(), 0);
    let mut nothing: [f32; 0] = [];
    buffers.download(&queue, &empty, &mut nothing).unwrap();
}

#[pollster::test]
#[ignore] // Requires GPU
async fn test_host_backed_coherence() {
    let context = gpu_context().await;
    let queue = context.create_queue(false).unwrap();
    let buffers = BufferManager::new(&context);

    let mut data = buffers
        .allocate_host_backed("data", vec![1.0f32; 300], AccessMode::ReadWrite, &queue)
        .unwrap();
    let src = buffers
        .allocate_host_backed("src", vec![4.0f32; 300], AccessMode::ReadOnly, &queue)
        .unwrap();
    assert_eq!(data.host().unwrap()[0], 1.0);

    let program = ProgramLoader::new(&context).build("scale", SCALE_WGSL).unwrap();
    let mut kernel = program.create_kernel("scale").unwrap();
    kernel.set_arg(0, data.device()).unwrap();
    kernel.set_arg(1, src.device()).unwrap();
    kernel.set_scalar(2, 0.5f32).unwrap();
    kernel.set_scalar(3, 300u32).unwrap();

    let dispatcher = Dispatcher::new(&queue);
    dispatcher.dispatch(&kernel, &[300], &[256]).unwrap();

    // The device wrote `data`; its host side is stale until synced.
    assert!(matches!(data.host(), Err(RuntimeError::StaleHostData(_))));
    data.sync_from_device(&queue).unwrap();
    assert!(data.host().unwrap().iter().all(|&x| x == 2.0));

    // Unflushed host edits block the next dispatch.
    data.host_mut().unwrap()[0] = 42.0;
    assert!(matches!(
        dispatcher.dispatch(&kernel, &[300], &[256]),
        Err(RuntimeError::DispatchFailed(_))
    ));
    data.flush(&queue).unwrap();
    dispatcher.dispatch(&kernel, &[300], &[256]).unwrap();
    data.sync_from_device(&queue).unwrap();
    assert_eq!(data.into_host().unwrap()[0], 2.0);

    // The read-only input was never written by the device.
    assert!(src.host().is_ok());
}

#[pollster::test]
#[ignore] // Requires GPU
async fn test_argument_binding_errors() {
    let context = gpu_context().await;
    let buffers = BufferManager::new(&context);
    let program = ProgramLoader::new(&context).build("scale", SCALE_WGSL).unwrap();

    assert!(matches!(
        program.create_kernel("missing"),
        Err(RuntimeError::EntryPointNotFound(_))
    ));

    let mut kernel = program.create_kernel("scale").unwrap();
    assert_eq!(kernel.unbound_args(), vec![0, 1, 2, 3]);

    let read_only = buffers.allocate("ro", 64, AccessMode::ReadOnly).unwrap();
    assert!(matches!(
        kernel.set_arg(0, &read_only),
        Err(RuntimeError::ArgumentBinding(_))
    ));
    assert!(kernel.set_arg(0, KernelArg::scalar(1u32)).is_err());
    assert!(kernel.set_arg(2, &read_only).is_err());
    assert!(kernel.set_scalar(2, 1.0f64).is_err());
    assert!(kernel.set_arg(9, &read_only).is_err());

    kernel.set_arg(1, &read_only).unwrap();
    assert_eq!(kernel.unbound_args(), vec![0, 2, 3]);
}

#[pollster::test]
#[ignore] // Requires GPU
#[should_panic(expected = "unbound arguments")]
async fn test_unbound_argument_panics() {
    let context = gpu_context().await;
    let queue = context.create_queue(false).unwrap();
    let program = ProgramLoader::new(&context).build("scale", SCALE_WGSL).unwrap();
    let kernel = program.create_kernel("scale").unwrap();
    let _ = Dispatcher::new(&queue).dispatch(&kernel, &[16], &[256]);
}

#[pollster::test]
#[ignore] // Requires GPU
async fn test_tile_must_match_workgroup_size() {
    let context = gpu_context().await;
    let queue = context.create_queue(false).unwrap();
    let buffers = BufferManager::new(&context);
    let program = ProgramLoader::new(&context).build("scale", SCALE_WGSL).unwrap();

    let a = buffers.allocate("a", 64, AccessMode::ReadWrite).unwrap();
    let b = buffers.allocate("b", 64, AccessMode::ReadOnly).unwrap();
    let mut kernel = program.create_kernel("scale").unwrap();
    kernel.set_arg(0, &a).unwrap();
    kernel.set_arg(1, &b).unwrap();
    kernel.set_scalar(2, 1.0f32).unwrap();
    kernel.set_scalar(3, 16u32).unwrap();

    let result = Dispatcher::new(&queue).dispatch(&kernel, &[16], &[64]);
    assert!(matches!(result, Err(RuntimeError::DispatchFailed(_))));
}

#[pollster::test]
#[ignore] // Requires GPU
async fn test_oversized_workgroup_is_rejected_not_fatal() {
    let context = gpu_context().await;
    let oversized = SCALE_WGSL.replace("@workgroup_size(256)", "@workgroup_size(4096, 4096)");
    let program = ProgramLoader::new(&context).build("scale_huge", &oversized).unwrap();

    match program.create_kernel("scale") {
        Err(RuntimeError::DispatchFailed(message)) => {
            assert!(message.contains("4096"), "message: {message}");
        }
        other => panic!("expected DispatchFailed, got {other:?}"),
    }

    // The context stays usable after the rejection.
    let program = ProgramLoader::new(&context).build("scale", SCALE_WGSL).unwrap();
    assert!(program.create_kernel("scale").is_ok());
}

#[pollster::test]
#[ignore] // Requires GPU
async fn test_build_failure_is_reported() {
    let context = gpu_context().await;
    let loader = ProgramLoader::new(&context);

    let broken = SCALE_WGSL.replace("in_data[i] * factor", "in_data[i] * undefined_name");
    match loader.build("scale", &broken) {
        Err(RuntimeError::BuildFailed { log }) => {
            assert!(log.contains("undefined_name"), "log: {log}");
        }
        Err(e) => panic!("expected BuildFailed, got {e}"),
        Ok(_) => panic!("broken source must not build"),
    }

    let diagnostics = loader.fetch_diagnostics().expect("diagnostics recorded");
    assert_eq!(diagnostics.status, BuildStatus::Failed);
    assert!(!diagnostics.log.is_empty());
}

#[pollster::test]
#[ignore] // Requires GPU with timestamp queries
async fn test_profiling_reports_kernel_time() {
    let context = gpu_context().await;
    if !context.supports_profiling() {
        println!("device has no timestamp queries, skipping");
        return;
    }
    let queue = context.create_queue(true).unwrap();
    let buffers = BufferManager::new(&context);

    let n = 1 << 20;
    let src = buffers.allocate("in", n * 4, AccessMode::ReadOnly).unwrap();
    let dst = buffers.allocate("out", n * 4, AccessMode::ReadWrite).unwrap();
    let program = ProgramLoader::new(&context).build("scale", SCALE_WGSL).unwrap();
    let mut kernel = program.create_kernel("scale").unwrap();
    kernel.set_arg(0, &dst).unwrap();
    kernel.set_arg(1, &src).unwrap();
    kernel.set_scalar(2, 2.0f32).unwrap();
    kernel.set_scalar(3, n as u32).unwrap();

    let event = Dispatcher::new(&queue)
        .dispatch(&kernel, &[n as u32], &[256])
        .unwrap()
        .expect("profiling queue must time kernels");
    assert!(event.end >= event.start);
    println!("kernel took {:.2} µs", event.elapsed_micros());
}
