//! Vector addition on a GPU and then a CPU device, back to back, profiled,
//! with host-backed buffers.
//!
//! The two pipelines share nothing: each has its own context, queue,
//! buffers and program, and the first is torn down before the second starts.

use super::vector_add::VectorAddConfig;
use super::{extent, ExerciseReport, Harness, RunOutcome};
use anyhow::{Context, Result};
use tessera_kernels::{entry_points, programs, reference, TILE_1D};
use tessera_runtime::{
    AccessMode, BufferManager, DeviceKind, Dispatcher, ExecutionContext, ProgramLoader,
    SelectionPolicy,
};

/// Policies for the two runs: the configured policy restricted to GPUs, then
/// the first CPU-type device.
pub fn device_policies(harness: &Harness) -> [(&'static str, SelectionPolicy); 2] {
    let mut gpu = harness.config().selection.clone().kind(DeviceKind::Gpu);
    gpu.require_profiling = true;
    let cpu = SelectionPolicy::any().kind(DeviceKind::Cpu).require_profiling();
    [("GPU", gpu), ("CPU", cpu)]
}

pub fn run(harness: &Harness, config: &VectorAddConfig) -> Result<ExerciseReport> {
    config.validate()?;

    let mut report = ExerciseReport::new("vadd-prof");
    for (role, policy) in device_policies(harness) {
        tracing::info!(role, "Starting pipeline");
        let context = harness
            .open(&policy)
            .with_context(|| format!("No {role} device for the profiling run"))?;
        report.runs.push(profile_on(harness, &context, config)?);
    }
    Ok(report)
}

fn profile_on(harness: &Harness, context: &ExecutionContext, config: &VectorAddConfig) -> Result<RunOutcome> {
    let n = config.num_elements;
    let device = context.device_info().name.clone();
    let queue = context.create_queue(true)?;
    let buffers = BufferManager::new(context);

    let (a, b) = config.inputs();
    let expected = reference::vector_add(&a, &b);

    let a_buf = buffers.allocate_host_backed("a", a, AccessMode::ReadOnly, &queue)?;
    let b_buf = buffers.allocate_host_backed("b", b, AccessMode::ReadOnly, &queue)?;
    let mut c_buf = buffers.allocate_host_backed("c", vec![0.0f32; n], AccessMode::ReadWrite, &queue)?;

    let program = ProgramLoader::new(context)
        .build_from(harness.sources(), programs::VECTOR_ADD)
        .context("Failed to build the vector_add program")?;
    let mut kernel = program.create_kernel(entry_points::VECTOR_ADD)?;
    kernel.set_arg(0, c_buf.device())?;
    kernel.set_arg(1, a_buf.device())?;
    kernel.set_arg(2, b_buf.device())?;
    kernel.set_scalar(3, extent(n, "NUM_ELEMENTS")?)?;

    let event = Dispatcher::new(&queue).dispatch(
        &kernel,
        &[extent(n, "NUM_ELEMENTS")?],
        &[TILE_1D],
    )?;
    queue.finish()?;

    c_buf.sync_from_device(&queue)?;
    let verdict = harness.verifier().verify(c_buf.host()?, &expected);
    Ok(RunOutcome::new(&device, entry_points::VECTOR_ADD, verdict, event))
}
