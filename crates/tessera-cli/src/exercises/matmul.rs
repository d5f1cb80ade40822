//! Matrix multiplication: naive kernel, then the tiled kernel.

use super::{extent, f32_bytes, ExerciseReport, Harness, RunOutcome};
use anyhow::{bail, Context, Result};
use tessera_kernels::{entry_points, programs, reference, TILE_2D};
use tessera_runtime::{AccessMode, BufferManager, Dispatcher, ProgramLoader};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatMulConfig {
    pub height_a: usize,
    pub width_a: usize,
    pub width_b: usize,
}

impl Default for MatMulConfig {
    fn default() -> Self {
        Self {
            height_a: 320,
            width_a: 320,
            width_b: 640,
        }
    }
}

impl MatMulConfig {
    pub fn validate(&self) -> Result<()> {
        if self.height_a == 0 || self.width_a == 0 || self.width_b == 0 {
            bail!("matrix dimensions must be at least 1, got {self:?}");
        }
        for (rows, cols, what) in [
            (self.height_a, self.width_a, "elements of A"),
            (self.width_a, self.width_b, "elements of B"),
            (self.height_a, self.width_b, "elements of C"),
        ] {
            let Some(count) = rows.checked_mul(cols) else {
                bail!("{what} overflow: {rows} x {cols}");
            };
            extent(count, what)?;
        }
        Ok(())
    }

    /// A filled with 0.1, B filled with 1.0.
    pub fn inputs(&self) -> (Vec<f32>, Vec<f32>) {
        (
            vec![0.1f32; self.height_a * self.width_a],
            vec![1.0f32; self.width_a * self.width_b],
        )
    }
}

pub fn run(harness: &Harness, config: &MatMulConfig) -> Result<ExerciseReport> {
    config.validate()?;
    let MatMulConfig {
        height_a,
        width_a,
        width_b,
    } = *config;

    let context = harness.open_default()?;
    let device = context.device_info().name.clone();
    let queue = context.create_queue(harness.config().profiling)?;
    let buffers = BufferManager::new(&context);

    let (a, b) = config.inputs();
    let expected = reference::matrix_mul(&a, &b, height_a, width_a, width_b);
    tracing::info!(height_a, width_a, width_b, %device, "Running matrix multiply");

    let c_len = height_a * width_b;
    let a_buf = buffers.allocate("A", f32_bytes(a.len()), AccessMode::ReadOnly)?;
    let b_buf = buffers.allocate("B", f32_bytes(b.len()), AccessMode::ReadOnly)?;
    buffers.upload(&queue, &a_buf, &a)?;
    buffers.upload(&queue, &b_buf, &b)?;

    let program = ProgramLoader::new(&context)
        .build_from(harness.sources(), programs::MATRIX_MUL)
        .context("Failed to build the matrix_mul program")?;
    let dispatcher = Dispatcher::new(&queue);

    // x walks the columns of C, y its rows.
    let problem = [extent(width_b, "width_b")?, extent(height_a, "height_a")?];
    let tile = TILE_2D;

    let mut report = ExerciseReport::new("matmul");
    for entry in [entry_points::MATRIX_MUL_NAIVE, entry_points::MATRIX_MUL_TILED] {
        // Each kernel writes a fresh, zero-initialised C so its verdict
        // cannot be inherited from the previous run.
        let c_buf = buffers.allocate(&format!("C ({entry})"), f32_bytes(c_len), AccessMode::ReadWrite)?;
        let mut kernel = program.create_kernel(entry)?;
        kernel.set_arg(0, &a_buf)?;
        kernel.set_arg(1, &b_buf)?;
        kernel.set_arg(2, &c_buf)?;
        kernel.set_scalar(3, extent(width_a, "width_a")?)?;
        kernel.set_scalar(4, problem[0])?;
        kernel.set_scalar(5, problem[1])?;

        let event = dispatcher.dispatch(&kernel, &problem, &tile)?;

        let mut c = vec![0.0f32; c_len];
        buffers.download(&queue, &c_buf, &mut c)?;
        let verdict = harness.verifier().verify(&c, &expected);
        report.runs.push(RunOutcome::new(&device, entry, verdict, event));
    }
    queue.finish()?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MatMulConfig::default();
        assert!(config.validate().is_ok());
        let (a, b) = config.inputs();
        assert_eq!(a.len(), 320 * 320);
        assert_eq!(b.len(), 320 * 640);
    }

    #[test]
    fn test_overflowing_dimensions_rejected() {
        let config = MatMulConfig {
            height_a: usize::MAX / 2,
            width_a: 4,
            width_b: 1,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_dimension_rejected() {
        let config = MatMulConfig {
            width_a: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
