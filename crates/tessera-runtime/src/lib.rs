//! Tiled compute offload pipeline on `wgpu`.
//!
//! This crate takes a computation from the host to a compute device and
//! back: it selects a device, creates an execution context and command
//! queue, moves data through device buffers, builds WGSL kernel programs,
//! binds positional arguments, dispatches a tiled index space and checks the
//! result against a host reference.
//!
//! # Architecture
//!
//! Each stage is one component:
//! 1. **[`PlatformDeviceResolver`]** - enumerate platforms/devices, first match wins
//! 2. **[`ExecutionContext`] / [`CommandQueue`]** - logical device and in-order queue
//! 3. **[`BufferManager`]** - allocation, blocking and non-blocking transfers
//! 4. **[`ProgramLoader`]** - WGSL build with complete diagnostics
//! 5. **[`Kernel`]** - entry point reflection and positional argument binding
//! 6. **[`Dispatcher`]** - tiled work domain, submission, completion, profiling
//! 7. **[`ReferenceVerifier`]** - tolerance-based comparison
//!
//! Everything created from a context borrows it, so resources are released
//! in dependency order and the context goes last.
//!
//! # Example
//!
//! ```no_run
//! use tessera_runtime::{
//!     AccessMode, BufferManager, Dispatcher, ExecutionContext, PlatformDeviceResolver,
//!     ProgramLoader, ReferenceVerifier, SelectionPolicy,
//! };
//!
//! const DOUBLE: &str = r#"
//! @group(0) @binding(0) var<storage, read_write> data: array<f32>;
//!
//! @compute @workgroup_size(256)
//! fn double(@builtin(global_invocation_id) gid: vec3<u32>) {
//!     if (gid.x < arrayLength(&data)) {
//!         data[gid.x] = data[gid.x] * 2.0;
//!     }
//! }
//! "#;
//!
//! #[pollster::main]
//! async fn main() -> anyhow::Result<()> {
//!     let resolver = PlatformDeviceResolver::new(wgpu::Backends::all());
//!     let context = ExecutionContext::new(resolver.resolve(&SelectionPolicy::any()).await?).await?;
//!     let queue = context.create_queue(false)?;
//!     let buffers = BufferManager::new(&context);
//!
//!     let input: Vec<f32> = (0..1000).map(|i| i as f32).collect();
//!     let data = buffers.allocate("data", 4000, AccessMode::ReadWrite)?;
//!     buffers.upload(&queue, &data, &input)?;
//!
//!     let program = ProgramLoader::new(&context).build("double", DOUBLE)?;
//!     let mut kernel = program.create_kernel("double")?;
//!     kernel.set_arg(0, &data)?;
//!     Dispatcher::new(&queue).dispatch(&kernel, &[1000], &[256])?;
//!
//!     let mut output = vec![0.0f32; 1000];
//!     buffers.download(&queue, &data, &mut output)?;
//!     let reference: Vec<f32> = input.iter().map(|x| x * 2.0).collect();
//!     println!("{}", ReferenceVerifier::new().verify(&output, &reference));
//!     Ok(())
//! }
//! ```

mod buffer;
mod config;
mod context;
mod dispatch;
mod error;
mod kernel;
mod platform;
mod program;
mod verify;

// Public exports
pub use buffer::{AccessMode, BufferManager, DeviceBuffer, HostBackedBuffer, PendingDownload};
pub use config::{parse_backends, PipelineConfig, PipelineConfigBuilder};
pub use context::{CommandQueue, ExecutionContext};
pub use dispatch::{tile_extent, Dispatcher, ProfilingEvent, WorkDomain};
pub use error::{Result, RuntimeError, Stage};
pub use kernel::{Kernel, KernelArg};
pub use platform::{
    select_device, vendor_name, DeviceInfo, DeviceKind, DevicePosition, Platform,
    PlatformDeviceResolver, SelectedDevice, SelectionPolicy,
};
pub use program::{
    BuildDiagnostics, BuildStatus, KernelSignature, ParamKind, Program, ProgramLoader,
    ProgramSource, SourceProvider,
};
pub use verify::{Mismatch, ReferenceVerifier, Verdict, DEFAULT_TOLERANCE};

// Kernels and callers name wgpu types (backends) through this re-export.
pub use wgpu;
