//! Vector addition with explicit transfers.

use super::{extent, f32_bytes, ExerciseReport, Harness, RunOutcome};
use anyhow::{bail, Context, Result};
use tessera_kernels::{entry_points, programs, reference, TILE_1D};
use tessera_runtime::{AccessMode, BufferManager, Dispatcher, ExecutionContext, ProgramLoader};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorAddConfig {
    pub num_elements: usize,
}

impl VectorAddConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_elements == 0 {
            bail!("NUM_ELEMENTS must be at least 1");
        }
        extent(self.num_elements, "NUM_ELEMENTS")?;
        Ok(())
    }

    /// `a[i] = 0.9 i`, `b[i] = 1.1 i`.
    pub fn inputs(&self) -> (Vec<f32>, Vec<f32>) {
        let a = (0..self.num_elements).map(|i| i as f32 * 0.9).collect();
        let b = (0..self.num_elements).map(|i| i as f32 * 1.1).collect();
        (a, b)
    }
}

pub fn run(harness: &Harness, config: &VectorAddConfig) -> Result<ExerciseReport> {
    config.validate()?;
    let context = harness.open_default()?;

    let mut report = ExerciseReport::new("vadd");
    report.runs.push(add_on(harness, &context, config)?);
    Ok(report)
}

/// One blocking pipeline on an already-open context.
pub fn add_on(harness: &Harness, context: &ExecutionContext, config: &VectorAddConfig) -> Result<RunOutcome> {
    let n = config.num_elements;
    let device = context.device_info().name.clone();
    let queue = context.create_queue(harness.config().profiling)?;
    let buffers = BufferManager::new(context);

    let (a, b) = config.inputs();
    tracing::info!(num_elements = n, %device, "Running vector add");

    let a_buf = buffers.allocate("a", f32_bytes(n), AccessMode::ReadOnly)?;
    let b_buf = buffers.allocate("b", f32_bytes(n), AccessMode::ReadOnly)?;
    let c_buf = buffers.allocate("c", f32_bytes(n), AccessMode::ReadWrite)?;
    buffers.upload(&queue, &a_buf, &a)?;
    buffers.upload(&queue, &b_buf, &b)?;

    let program = ProgramLoader::new(context)
        .build_from(harness.sources(), programs::VECTOR_ADD)
        .context("Failed to build the vector_add program")?;
    let mut kernel = program.create_kernel(entry_points::VECTOR_ADD)?;
    kernel.set_arg(0, &c_buf)?;
    kernel.set_arg(1, &a_buf)?;
    kernel.set_arg(2, &b_buf)?;
    kernel.set_scalar(3, extent(n, "NUM_ELEMENTS")?)?;

    let event = Dispatcher::new(&queue).dispatch(
        &kernel,
        &[extent(n, "NUM_ELEMENTS")?],
        &[TILE_1D],
    )?;

    let mut c = vec![0.0f32; n];
    buffers.download(&queue, &c_buf, &mut c)?;
    queue.finish()?;

    let verdict = harness.verifier().verify(&c, &reference::vector_add(&a, &b));
    Ok(RunOutcome::new(&device, entry_points::VECTOR_ADD, verdict, event))
}
