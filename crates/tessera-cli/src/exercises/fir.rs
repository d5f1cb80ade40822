//! Finite impulse response filter over one block of samples.

use super::{extent, f32_bytes, ExerciseReport, Harness, RunOutcome};
use anyhow::{bail, Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tessera_kernels::{entry_points, programs, reference, TILE_1D};
use tessera_runtime::{AccessMode, BufferManager, Dispatcher, ProgramLoader};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirConfig {
    pub taps: usize,
    pub samples: usize,
    pub seed: u64,
}

impl FirConfig {
    pub fn validate(&self) -> Result<()> {
        if self.taps == 0 {
            bail!("NUM_TAPS must be at least 1");
        }
        if self.samples == 0 {
            bail!("NUM_DATA must be at least 1");
        }
        let Some(history) = self.samples.checked_add(self.taps - 1) else {
            bail!("NUM_TAPS + NUM_DATA - 1 overflows");
        };
        extent(history, "NUM_TAPS + NUM_DATA - 1")?;
        Ok(())
    }

    /// Samples in [-1, 1) and coefficients in [0, 1/taps), from the seed.
    pub fn inputs(&self) -> (Vec<f32>, Vec<f32>) {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let input = (0..self.samples)
            .map(|_| rng.random_range(-1.0f32..1.0))
            .collect();
        let coeff = (0..self.taps)
            .map(|_| rng.random_range(0.0f32..1.0) / self.taps as f32)
            .collect();
        (input, coeff)
    }

    pub fn history_len(&self) -> usize {
        self.samples + self.taps - 1
    }
}

pub fn run(harness: &Harness, config: &FirConfig) -> Result<ExerciseReport> {
    config.validate()?;
    let FirConfig { taps, samples, .. } = *config;

    let context = harness.open_default()?;
    let device = context.device_info().name.clone();
    let queue = context.create_queue(harness.config().profiling)?;
    let buffers = BufferManager::new(&context);

    let (input, coeff) = config.inputs();
    tracing::info!(taps, samples, %device, "Running FIR filter");

    let output_buf = buffers.allocate("output", f32_bytes(samples), AccessMode::ReadWrite)?;
    let coeff_buf = buffers.allocate("coeff", f32_bytes(taps), AccessMode::ReadOnly)?;
    let history_buf = buffers.allocate("history", f32_bytes(config.history_len()), AccessMode::ReadOnly)?;

    // Zeroed prefix for the first block, then the samples behind it.
    buffers.upload(&queue, &coeff_buf, &coeff)?;
    buffers.upload(&queue, &history_buf, &vec![0.0f32; taps - 1])?;
    buffers.upload_at(&queue, &history_buf, f32_bytes(taps - 1), &input)?;

    let program = ProgramLoader::new(&context)
        .build_from(harness.sources(), programs::FIR)
        .context("Failed to build the fir program")?;
    let mut kernel = program.create_kernel(entry_points::FIR)?;
    kernel.set_arg(0, &output_buf)?;
    kernel.set_arg(1, &coeff_buf)?;
    kernel.set_arg(2, &history_buf)?;
    kernel.set_scalar(3, extent(taps, "NUM_TAPS")?)?;

    let event = Dispatcher::new(&queue).dispatch(
        &kernel,
        &[extent(samples, "NUM_DATA")?],
        &[TILE_1D],
    )?;

    let mut output = vec![0.0f32; samples];
    buffers.download(&queue, &output_buf, &mut output)?;
    queue.finish()?;

    let verdict = harness.verifier().verify(&output, &reference::fir(&coeff, &input));
    let mut report = ExerciseReport::new("fir");
    report
        .runs
        .push(RunOutcome::new(&device, entry_points::FIR, verdict, event));
    Ok(report)
}
