//! Command-line interface definition.

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tessera_runtime::DeviceKind;

#[derive(Parser, Debug)]
#[command(name = "tessera")]
#[command(about = "Tiled compute offload exercises on wgpu", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every exercise.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Select the first device whose vendor, name or driver contains TEXT
    #[arg(long, global = true, value_name = "TEXT")]
    pub vendor: Option<String>,

    /// Select the first device of this type
    #[arg(long = "device-type", global = true, value_enum)]
    pub device_type: Option<DeviceTypeArg>,

    /// Comma-separated backends to enumerate (vulkan, metal, dx12, gl)
    #[arg(long, global = true, value_name = "LIST")]
    pub backends: Option<String>,

    /// Time kernels with device timestamps
    #[arg(long, global = true)]
    pub profile: bool,

    /// Load kernels from DIR/<program>.wgsl instead of the embedded sources
    #[arg(long, global = true, value_name = "DIR")]
    pub kernel_dir: Option<PathBuf>,

    /// Absolute tolerance for result verification
    #[arg(long, global = true)]
    pub tolerance: Option<f32>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DeviceTypeArg {
    Gpu,
    Cpu,
    Other,
}

impl From<DeviceTypeArg> for DeviceKind {
    fn from(arg: DeviceTypeArg) -> Self {
        match arg {
            DeviceTypeArg::Gpu => DeviceKind::Gpu,
            DeviceTypeArg::Cpu => DeviceKind::Cpu,
            DeviceTypeArg::Other => DeviceKind::Other,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List compute platforms and their devices
    Devices,
    /// Add two vectors on the selected device
    Vadd {
        /// Number of vector elements
        #[arg(value_name = "NUM_ELEMENTS")]
        num_elements: usize,
    },
    /// Add two vectors on the first GPU and then the first CPU device, timing both
    VaddProf {
        /// Number of vector elements
        #[arg(value_name = "NUM_ELEMENTS")]
        num_elements: usize,
    },
    /// Multiply matrices with the naive and the tiled kernel
    Matmul {
        /// Rows of A (and C)
        #[arg(long, default_value_t = 320)]
        height_a: usize,
        /// Columns of A, rows of B
        #[arg(long, default_value_t = 320)]
        width_a: usize,
        /// Columns of B (and C)
        #[arg(long, default_value_t = 640)]
        width_b: usize,
    },
    /// Run a finite impulse response filter
    Fir {
        /// Number of filter taps
        #[arg(value_name = "NUM_TAPS")]
        taps: usize,
        /// Number of input samples
        #[arg(value_name = "NUM_DATA")]
        samples: usize,
        /// Seed for the random samples and coefficients
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
    /// Transpose a matrix and check that transposing back restores it
    Transpose {
        /// Rows of the input matrix
        #[arg(long, default_value_t = 320)]
        height: usize,
        /// Columns of the input matrix
        #[arg(long, default_value_t = 640)]
        width: usize,
    },
}
