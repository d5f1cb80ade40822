//! Exercise orchestration.
//!
//! Every exercise owns its configuration struct and walks the pipeline
//! explicitly: resolve, context, queue, buffers, build, bind, dispatch,
//! download, verify. The [`Harness`] carries what they share.

pub mod devices;
pub mod fir;
pub mod matmul;
pub mod profiling;
pub mod transpose;
pub mod vector_add;

use crate::cli::GlobalArgs;
use anyhow::{Context, Result};
use std::fmt;
use tessera_kernels::{DirectorySources, EmbeddedSources};
use tessera_runtime::{
    parse_backends, ExecutionContext, PipelineConfig, PlatformDeviceResolver, ProfilingEvent,
    ReferenceVerifier, SelectionPolicy, SourceProvider, Verdict,
};

/// Configuration and kernel sources shared by all exercises.
pub struct Harness {
    config: PipelineConfig,
    sources: Box<dyn SourceProvider>,
}

impl Harness {
    pub fn new(config: PipelineConfig, sources: Box<dyn SourceProvider>) -> Self {
        Self { config, sources }
    }

    /// Defaults, then `TESSERA_*` environment, then command-line flags.
    pub fn from_args(args: &GlobalArgs) -> Result<Self> {
        let mut config = PipelineConfig::default()
            .apply_env()
            .context("Invalid TESSERA_* environment")?;

        if let Some(list) = &args.backends {
            config.backends = parse_backends(list)?;
        }
        if let Some(vendor) = &args.vendor {
            config.selection.vendor = Some(vendor.clone());
        }
        if let Some(device_type) = args.device_type {
            config.selection.kind = Some(device_type.into());
        }
        if args.profile {
            config.profiling = true;
        }
        if let Some(tolerance) = args.tolerance {
            config.tolerance = tolerance;
        }
        config.validate()?;

        let sources: Box<dyn SourceProvider> = match &args.kernel_dir {
            Some(dir) => Box::new(DirectorySources::new(dir)),
            None => Box::new(EmbeddedSources),
        };
        Ok(Self::new(config, sources))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn sources(&self) -> &dyn SourceProvider {
        self.sources.as_ref()
    }

    pub fn resolver(&self) -> PlatformDeviceResolver {
        PlatformDeviceResolver::new(self.config.backends)
    }

    /// Resolve a device by `policy` and create its execution context.
    pub fn open(&self, policy: &SelectionPolicy) -> Result<ExecutionContext> {
        let resolver = self.resolver();
        pollster::block_on(async {
            let selected = resolver.resolve(policy).await?;
            ExecutionContext::new(selected).await
        })
        .with_context(|| format!("Failed to open a device matching {policy}"))
    }

    /// Open the device selected by the configured policy.
    pub fn open_default(&self) -> Result<ExecutionContext> {
        self.open(&self.config.selection)
    }

    pub fn verifier(&self) -> ReferenceVerifier {
        ReferenceVerifier::with_tolerance(self.config.tolerance)
    }
}

/// Result of running one kernel on one device.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub device: String,
    pub kernel: String,
    pub verdict: Verdict,
    pub kernel_micros: Option<f64>,
}

impl RunOutcome {
    pub fn new(device: &str, kernel: &str, verdict: Verdict, event: Option<ProfilingEvent>) -> Self {
        if let Verdict::Failed(mismatch) = verdict {
            tracing::warn!(device, kernel, %mismatch, "Verification failed");
        }
        Self {
            device: device.to_string(),
            kernel: kernel.to_string(),
            verdict,
            kernel_micros: event.map(|e| e.elapsed_micros()),
        }
    }
}

/// Outcomes of an exercise, printed as the final console output.
#[derive(Debug, Clone)]
pub struct ExerciseReport {
    pub exercise: &'static str,
    pub runs: Vec<RunOutcome>,
}

impl ExerciseReport {
    pub fn new(exercise: &'static str) -> Self {
        Self {
            exercise,
            runs: Vec::new(),
        }
    }

    pub fn passed(&self) -> bool {
        self.runs.iter().all(|run| run.verdict.passed())
    }
}

impl fmt::Display for ExerciseReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for run in &self.runs {
            write!(f, "{} [{}] on {}", self.exercise, run.kernel, run.device)?;
            if let Some(micros) = run.kernel_micros {
                write!(f, "\n\tKernel exec time: {micros:8.2} us")?;
            }
            writeln!(f, "\n{}!", run.verdict)?;
        }
        Ok(())
    }
}

/// Convert a host extent to the `u32` the device index space uses.
pub(crate) fn extent(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value).with_context(|| format!("{what} = {value} does not fit a device index"))
}

/// Byte size of `n` f32 elements.
pub(crate) fn f32_bytes(n: usize) -> u64 {
    n as u64 * std::mem::size_of::<f32>() as u64
}
