//! Matrix transpose, verified element-wise and by transposing back.

use super::{extent, f32_bytes, ExerciseReport, Harness, RunOutcome};
use anyhow::{bail, Context, Result};
use tessera_kernels::{entry_points, programs, reference, TILE_2D};
use tessera_runtime::{AccessMode, BufferManager, Dispatcher, ProgramLoader};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransposeConfig {
    pub height: usize,
    pub width: usize,
}

impl Default for TransposeConfig {
    fn default() -> Self {
        Self {
            height: 320,
            width: 640,
        }
    }
}

impl TransposeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.height == 0 || self.width == 0 {
            bail!("matrix dimensions must be at least 1, got {self:?}");
        }
        let Some(count) = self.height.checked_mul(self.width) else {
            bail!("matrix elements overflow: {} x {}", self.height, self.width);
        };
        extent(count, "matrix elements")?;
        Ok(())
    }

    /// `a[i] = i`, so every element is distinct.
    pub fn input(&self) -> Vec<f32> {
        (0..self.height * self.width).map(|i| i as f32).collect()
    }
}

pub fn run(harness: &Harness, config: &TransposeConfig) -> Result<ExerciseReport> {
    config.validate()?;
    let TransposeConfig { height, width } = *config;
    let n = height * width;

    let context = harness.open_default()?;
    let device = context.device_info().name.clone();
    let queue = context.create_queue(harness.config().profiling)?;
    let buffers = BufferManager::new(&context);

    let a = config.input();
    tracing::info!(height, width, %device, "Running matrix transpose");

    let a_buf = buffers.allocate("A", f32_bytes(n), AccessMode::ReadOnly)?;
    let t_buf = buffers.allocate("A^T", f32_bytes(n), AccessMode::ReadWrite)?;
    let back_buf = buffers.allocate("A^T^T", f32_bytes(n), AccessMode::ReadWrite)?;
    buffers.upload(&queue, &a_buf, &a)?;

    let program = ProgramLoader::new(&context)
        .build_from(harness.sources(), programs::TRANSPOSE)
        .context("Failed to build the transpose program")?;
    let mut kernel = program.create_kernel(entry_points::TRANSPOSE)?;
    let dispatcher = Dispatcher::new(&queue);
    let tile = TILE_2D;
    let (h, w) = (extent(height, "height")?, extent(width, "width")?);
    let mut report = ExerciseReport::new("transpose");

    // x walks the rows of the input, y its columns.
    kernel.set_arg(0, &a_buf)?;
    kernel.set_arg(1, &t_buf)?;
    kernel.set_scalar(2, h)?;
    kernel.set_scalar(3, w)?;
    let event = dispatcher.dispatch(&kernel, &[h, w], &tile)?;

    let mut t = vec![0.0f32; n];
    buffers.download(&queue, &t_buf, &mut t)?;
    let verdict = harness
        .verifier()
        .verify(&t, &reference::transpose(&a, height, width));
    report
        .runs
        .push(RunOutcome::new(&device, entry_points::TRANSPOSE, verdict, event));

    kernel.set_arg(0, &t_buf)?;
    kernel.set_arg(1, &back_buf)?;
    kernel.set_scalar(2, w)?;
    kernel.set_scalar(3, h)?;
    let event = dispatcher.dispatch(&kernel, &[w, h], &tile)?;

    let mut back = vec![0.0f32; n];
    buffers.download(&queue, &back_buf, &mut back)?;
    queue.finish()?;
    let verdict = harness.verifier().verify(&back, &a);
    report.runs.push(RunOutcome::new(
        &device,
        "matrix_transpose (inverse)",
        verdict,
        event,
    ));
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_is_distinct() {
        let config = TransposeConfig {
            height: 3,
            width: 4,
        };
        let a = config.input();
        assert_eq!(a.len(), 12);
        assert_eq!(a[11], 11.0);
        assert!(TransposeConfig { height: 0, width: 4 }.validate().is_err());
        assert!(TransposeConfig {
            height: usize::MAX,
            width: 2
        }
        .validate()
        .is_err());
    }
}
