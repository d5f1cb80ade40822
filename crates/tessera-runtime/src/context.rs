//! Execution context and command queue.
//!
//! The context owns the logical device. Everything created from it (queues,
//! buffers, programs, kernels) borrows it, so the context is necessarily the
//! last thing released.

use crate::error::{Result, RuntimeError};
use crate::platform::{DeviceInfo, SelectedDevice};
use std::sync::{Arc, Mutex};

/// A logical device bound to exactly one selected adapter.
///
/// # Example
/// ```no_run
/// # use tessera_runtime::{ExecutionContext, PlatformDeviceResolver, SelectionPolicy};
/// #[pollster::main]
/// async fn main() -> tessera_runtime::Result<()> {
///     let resolver = PlatformDeviceResolver::new(wgpu::Backends::all());
///     let selected = resolver.resolve(&SelectionPolicy::any()).await?;
///     let context = ExecutionContext::new(selected).await?;
///     let queue = context.create_queue(false)?;
///     queue.finish()?;
///     Ok(())
/// }
/// ```
///
/// Dependents borrow the context, so it cannot be released before them:
///
/// ```compile_fail,E0505
/// # use tessera_runtime::{AccessMode, BufferManager, ExecutionContext};
/// fn release_early(context: ExecutionContext) -> tessera_runtime::Result<()> {
///     let buffers = BufferManager::new(&context);
///     let buffer = buffers.allocate("a", 16, AccessMode::ReadWrite)?;
///     drop(context);
///     println!("{}", buffer.size());
///     Ok(())
/// }
/// ```
///
/// ```compile_fail,E0505
/// # use tessera_runtime::ExecutionContext;
/// fn release_early(context: ExecutionContext) -> tessera_runtime::Result<()> {
///     let queue = context.create_queue(false)?;
///     drop(context);
///     queue.finish()
/// }
/// ```
pub struct ExecutionContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    info: DeviceInfo,
    limits: wgpu::Limits,
    timestamps: bool,
    /// First validation error wgpu raised outside any operation that checked it.
    device_error: Arc<Mutex<Option<String>>>,
}

impl ExecutionContext {
    /// Create the logical device and its queue.
    ///
    /// Timestamp queries are enabled whenever the adapter supports them, so
    /// any queue on this context may later be created with profiling on.
    ///
    /// # Errors
    /// Returns `ContextCreation` if the driver refuses the device.
    pub async fn new(selected: SelectedDevice) -> Result<Self> {
        let SelectedDevice { adapter, info, .. } = selected;

        let mut required_features = wgpu::Features::empty();
        if info.timestamp_queries {
            required_features |= wgpu::Features::TIMESTAMP_QUERY;
        }
        let limits = adapter.limits();
        let label = format!("tessera: {}", info.name);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some(&label),
                required_features,
                required_limits: limits.clone(),
                ..Default::default()
            })
            .await
            .map_err(|e| {
                RuntimeError::ContextCreation(format!("Failed to create device on {}: {e}", info))
            })?;

        tracing::info!(device = %info, timestamps = info.timestamp_queries, "Created execution context");
        let device_error = install_error_handlers(&device);

        Ok(Self {
            device,
            queue,
            timestamps: info.timestamp_queries,
            info,
            limits,
            device_error,
        })
    }

    /// Create a command queue on this context.
    ///
    /// # Errors
    /// Returns `ProfilingUnavailable` when `profiling` is requested on a
    /// device without timestamp query support.
    pub fn create_queue(&self, profiling: bool) -> Result<CommandQueue<'_>> {
        if profiling && !self.timestamps {
            return Err(RuntimeError::ProfilingUnavailable(format!(
                "{} does not support timestamp queries",
                self.info
            )));
        }

        let timestamp_period = if profiling {
            self.queue.get_timestamp_period()
        } else {
            0.0
        };

        tracing::debug!(profiling, "Created command queue");
        Ok(CommandQueue {
            context: self,
            profiling,
            timestamp_period,
        })
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn limits(&self) -> &wgpu::Limits {
        &self.limits
    }

    /// Whether queues on this context may profile.
    pub fn supports_profiling(&self) -> bool {
        self.timestamps
    }

    /// Identity used to check that resources belong to this context.
    pub(crate) fn id(&self) -> usize {
        self as *const Self as usize
    }

    pub(crate) fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub(crate) fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Take the validation error recorded since the last call, if any.
    pub(crate) fn take_device_error(&self) -> Option<String> {
        self.device_error.lock().ok().and_then(|mut slot| slot.take())
    }

    /// Block until the device has finished `submission`, or all work if `None`.
    pub(crate) fn wait(&self, submission: Option<wgpu::SubmissionIndex>) -> Result<()> {
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: submission,
                timeout: None,
            })
            .map_err(|e| RuntimeError::DispatchFailed(format!("GPU poll failed: {e:?}")))?;
        Ok(())
    }
}

/// Route wgpu validation errors into a slot instead of the default panic.
fn install_error_handlers(device: &wgpu::Device) -> Arc<Mutex<Option<String>>> {
    let device_error = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&device_error);
    device.on_uncaptured_error(Arc::new(move |error: wgpu::Error| {
        tracing::error!(%error, "Uncaptured device error");
        if let Ok(mut slot) = slot.lock() {
            slot.get_or_insert_with(|| error.to_string());
        }
    }));
    device.set_device_lost_callback(|reason, message| {
        tracing::error!(?reason, %message, "Device lost");
    });
    device_error
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        tracing::debug!(device = %self.info.name, "Releasing execution context");
    }
}

/// An in-order submission channel onto a context's device.
///
/// All operations issued through one queue complete in submission order.
/// Queues never express dependencies on other queues.
pub struct CommandQueue<'ctx> {
    context: &'ctx ExecutionContext,
    profiling: bool,
    timestamp_period: f32,
}

impl<'ctx> CommandQueue<'ctx> {
    pub fn context(&self) -> &'ctx ExecutionContext {
        self.context
    }

    pub fn is_profiling(&self) -> bool {
        self.profiling
    }

    /// Nanoseconds per timestamp tick (0.0 on non-profiling queues).
    pub fn timestamp_period(&self) -> f32 {
        self.timestamp_period
    }

    /// Block until every command submitted so far has completed.
    pub fn finish(&self) -> Result<()> {
        self.context.queue().submit(None::<wgpu::CommandBuffer>);
        self.context.wait(None)
    }

    pub(crate) fn submit(&self, commands: wgpu::CommandBuffer) -> wgpu::SubmissionIndex {
        self.context.queue().submit(Some(commands))
    }

    pub(crate) fn encoder(&self, label: &str) -> wgpu::CommandEncoder {
        self.context
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{PlatformDeviceResolver, SelectionPolicy};

    #[pollster::test]
    #[ignore] // Requires GPU
    async fn test_context_init() {
        let resolver = PlatformDeviceResolver::new(wgpu::Backends::all());
        let selected = resolver
            .resolve(&SelectionPolicy::any())
            .await
            .expect("No compute device");
        let context = ExecutionContext::new(selected)
            .await
            .expect("Failed to create context");

        println!("Device: {}", context.device_info());
        let queue = context.create_queue(false).expect("Failed to create queue");
        assert!(!queue.is_profiling());
        queue.finish().expect("finish failed");
    }

    #[pollster::test]
    #[ignore] // Requires GPU
    async fn test_profiling_queue_matches_support() {
        let resolver = PlatformDeviceResolver::new(wgpu::Backends::all());
        let selected = resolver
            .resolve(&SelectionPolicy::any())
            .await
            .expect("No compute device");
        let context = ExecutionContext::new(selected)
            .await
            .expect("Failed to create context");

        match context.create_queue(true) {
            Ok(queue) => {
                assert!(context.supports_profiling());
                assert!(queue.timestamp_period() > 0.0);
            }
            Err(e) => {
                assert!(!context.supports_profiling());
                assert!(matches!(e, RuntimeError::ProfilingUnavailable(_)));
            }
        }
    }
}
