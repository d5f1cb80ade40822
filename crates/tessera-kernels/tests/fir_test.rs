//! FIR filter against the host sliding-window convolution.

mod common;

use common::{f32_bytes, gpu_context};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tessera_kernels::{entry_points, programs, reference, EmbeddedSources};
use tessera_runtime::{AccessMode, BufferManager, Dispatcher, ProgramLoader, ReferenceVerifier, Verdict};

async fn run_fir(taps: usize, samples: usize, seed: u64) -> (Vec<f32>, Vec<f32>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let input: Vec<f32> = (0..samples).map(|_| rng.random_range(-1.0f32..1.0)).collect();
    let coeff: Vec<f32> = (0..taps).map(|_| rng.random_range(0.0f32..1.0) / taps as f32).collect();

    let context = gpu_context().await;
    let queue = context.create_queue(false).unwrap();
    let buffers = BufferManager::new(&context);

    let history_len = samples + taps - 1;
    let out_buf = buffers.allocate("output", f32_bytes(samples), AccessMode::ReadWrite).unwrap();
    let coeff_buf = buffers.allocate("coeff", f32_bytes(taps), AccessMode::ReadOnly).unwrap();
    let history_buf = buffers.allocate("history", f32_bytes(history_len), AccessMode::ReadOnly).unwrap();

    buffers.upload(&queue, &coeff_buf, &coeff).unwrap();
    buffers.upload(&queue, &history_buf, &vec![0.0f32; taps - 1]).unwrap();
    buffers
        .upload_at(&queue, &history_buf, f32_bytes(taps - 1), &input)
        .unwrap();

    let program = ProgramLoader::new(&context)
        .build_from(&EmbeddedSources, programs::FIR)
        .unwrap();
    let mut kernel = program.create_kernel(entry_points::FIR).unwrap();
    kernel.set_arg(0, &out_buf).unwrap();
    kernel.set_arg(1, &coeff_buf).unwrap();
    kernel.set_arg(2, &history_buf).unwrap();
    kernel.set_scalar(3, taps as u32).unwrap();
    Dispatcher::new(&queue)
        .dispatch(&kernel, &[samples as u32], &[256])
        .unwrap();

    let mut output = vec![0.0f32; samples];
    buffers.download(&queue, &out_buf, &mut output).unwrap();
    (output, reference::fir(&coeff, &input))
}

#[pollster::test]
#[ignore] // Requires GPU
async fn test_fir_matches_host() {
    let (device, host) = run_fir(16, 10_000, 7).await;
    assert_eq!(ReferenceVerifier::new().verify(&device, &host), Verdict::Passed);
    println!("✓ FIR 16 taps x 10000 samples passed!");
}

#[pollster::test]
#[ignore] // Requires GPU
async fn test_fir_single_tap_is_scaling() {
    let (device, host) = run_fir(1, 300, 1).await;
    assert_eq!(ReferenceVerifier::new().verify(&device, &host), Verdict::Passed);
}
