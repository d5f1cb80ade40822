//! Tiled dispatch of kernels over an N-dimensional index space.
//!
//! The problem extent is rounded up per dimension to the next multiple of
//! the tile, so the launched index space always covers the problem with less
//! than one tile of padding. Kernels are responsible for ignoring indices in
//! the padding region.

use crate::context::CommandQueue;
use crate::error::{Result, RuntimeError};
use crate::kernel::Kernel;
use crate::platform::DeviceInfo;
use std::time::Duration;

/// Smallest multiple of `tile` that is `>= problem`, or `None` if `tile` is
/// zero or the result overflows.
pub fn tile_extent(problem: u32, tile: u32) -> Option<u32> {
    if tile == 0 {
        return None;
    }
    problem.div_ceil(tile).checked_mul(tile)
}

/// Global and local extents of one dispatch (1 to 3 dimensions).
///
/// Unused trailing dimensions are reported as extent 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkDomain {
    dims: usize,
    problem: [u32; 3],
    global: [u32; 3],
    local: [u32; 3],
}

impl WorkDomain {
    /// Cover `problem` with tiles of shape `local`.
    ///
    /// # Errors
    /// `DispatchFailed` for mismatched or unsupported ranks, zero-sized
    /// tiles, or a global extent that does not fit in `u32`.
    pub fn cover(problem: &[u32], local: &[u32]) -> Result<Self> {
        if problem.is_empty() || problem.len() > 3 {
            return Err(RuntimeError::DispatchFailed(format!(
                "work domain must have 1 to 3 dimensions, got {}",
                problem.len()
            )));
        }
        if problem.len() != local.len() {
            return Err(RuntimeError::DispatchFailed(format!(
                "problem extent {problem:?} and tile {local:?} differ in rank"
            )));
        }

        let mut domain = Self {
            dims: problem.len(),
            problem: [1; 3],
            global: [1; 3],
            local: [1; 3],
        };
        for (i, (&p, &l)) in problem.iter().zip(local).enumerate() {
            let global = tile_extent(p, l).ok_or_else(|| {
                RuntimeError::DispatchFailed(format!(
                    "cannot tile extent {p} with tile {l} in dimension {i}"
                ))
            })?;
            domain.problem[i] = p;
            domain.global[i] = global;
            domain.local[i] = l;
        }
        Ok(domain)
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn problem(&self) -> &[u32] {
        &self.problem[..self.dims]
    }

    pub fn global(&self) -> &[u32] {
        &self.global[..self.dims]
    }

    pub fn local(&self) -> &[u32] {
        &self.local[..self.dims]
    }

    /// Tile shape padded to three dimensions.
    pub fn local3(&self) -> [u32; 3] {
        self.local
    }

    /// Number of tiles per dimension (always three entries).
    pub fn workgroups(&self) -> [u32; 3] {
        [
            self.global[0] / self.local[0],
            self.global[1] / self.local[1],
            self.global[2] / self.local[2],
        ]
    }

    /// Total work-items launched, padding included.
    pub fn invocations(&self) -> u64 {
        self.global.iter().map(|&g| u64::from(g)).product()
    }
}

/// Device timestamps bracketing one dispatch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfilingEvent {
    pub start: u64,
    pub end: u64,
    /// Nanoseconds per tick.
    pub period: f32,
}

impl ProfilingEvent {
    pub fn elapsed_nanos(&self) -> f64 {
        self.end.saturating_sub(self.start) as f64 * f64::from(self.period)
    }

    pub fn elapsed_micros(&self) -> f64 {
        self.elapsed_nanos() / 1e3
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_nanos() as u64)
    }
}

/// Submits kernels to one queue and waits for them.
pub struct Dispatcher<'q, 'ctx> {
    queue: &'q CommandQueue<'ctx>,
}

impl<'q, 'ctx> Dispatcher<'q, 'ctx> {
    pub fn new(queue: &'q CommandQueue<'ctx>) -> Self {
        Self { queue }
    }

    /// Run `kernel` over `problem` in tiles of `local` and wait for completion.
    ///
    /// Returns the kernel's device timestamps when the queue is profiling.
    ///
    /// # Errors
    /// `DispatchFailed` if the tile does not match the kernel's workgroup
    /// size, exceeds device limits, needs more workgroups than the device
    /// allows, a bound host-backed buffer has unflushed host writes, or the
    /// device does not complete the work.
    ///
    /// # Panics
    /// If any kernel argument is unbound.
    #[tracing::instrument(skip_all, fields(kernel = kernel.name()))]
    pub fn dispatch(
        &self,
        kernel: &Kernel<'ctx>,
        problem: &[u32],
        local: &[u32],
    ) -> Result<Option<ProfilingEvent>> {
        let context = self.queue.context();
        if kernel.context().id() != context.id() {
            return Err(RuntimeError::DispatchFailed(format!(
                "kernel '{}' was created on a different context",
                kernel.name()
            )));
        }

        let bind_group = kernel.bind_group();
        let domain = WorkDomain::cover(problem, local)?;
        self.check_domain(kernel, &domain)?;

        for (handle, _) in kernel.bound_buffers() {
            if handle.state.has_unflushed_host_writes() {
                return Err(RuntimeError::DispatchFailed(format!(
                    "buffer '{}' has host writes that were not flushed to the device",
                    handle.label
                )));
            }
        }

        let device = context.device();
        let timestamps = self.queue.is_profiling().then(|| {
            let query_set = device.create_query_set(&wgpu::QuerySetDescriptor {
                label: Some("dispatch_timestamps"),
                ty: wgpu::QueryType::Timestamp,
                count: 2,
            });
            let resolve = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("timestamp_resolve"),
                size: 16,
                usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            });
            let readback = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("timestamp_readback"),
                size: 16,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            (query_set, resolve, readback)
        });

        let [x, y, z] = domain.workgroups();
        let mut encoder = self.queue.encoder(kernel.name());
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(kernel.name()),
                timestamp_writes: timestamps.as_ref().map(|(query_set, _, _)| {
                    wgpu::ComputePassTimestampWrites {
                        query_set,
                        beginning_of_pass_write_index: Some(0),
                        end_of_pass_write_index: Some(1),
                    }
                }),
            });
            pass.set_pipeline(kernel.pipeline());
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(x, y, z);
        }
        if let Some((query_set, resolve, readback)) = &timestamps {
            encoder.resolve_query_set(query_set, 0..2, resolve, 0);
            encoder.copy_buffer_to_buffer(resolve, 0, readback, 0, 16);
        }

        tracing::debug!(
            global = ?domain.global(),
            local = ?domain.local(),
            workgroups = ?[x, y, z],
            "Dispatching"
        );
        let submission = self.queue.submit(encoder.finish());
        context.wait(Some(submission))?;
        if let Some(message) = context.take_device_error() {
            return Err(RuntimeError::DispatchFailed(format!(
                "device rejected '{}': {message}",
                kernel.name()
            )));
        }

        for (handle, writable) in kernel.bound_buffers() {
            if writable {
                handle.state.mark_device_write();
            }
        }

        match timestamps {
            Some((_, _, readback)) => {
                let (start, end) = read_timestamps(self.queue, &readback)?;
                let event = ProfilingEvent {
                    start,
                    end,
                    period: self.queue.timestamp_period(),
                };
                tracing::debug!(micros = event.elapsed_micros(), "Kernel timed");
                Ok(Some(event))
            }
            None => Ok(None),
        }
    }

    fn check_domain(&self, kernel: &Kernel<'ctx>, domain: &WorkDomain) -> Result<()> {
        let expected = kernel.workgroup_size();
        if domain.local3() != expected {
            return Err(RuntimeError::DispatchFailed(format!(
                "tile {:?} does not match workgroup size {:?} of kernel '{}'",
                domain.local(),
                expected,
                kernel.name()
            )));
        }

        let info = self.queue.context().device_info();
        check_workgroup(info, domain.local3())?;
        for (axis, count) in domain.workgroups().into_iter().enumerate() {
            if count > info.max_workgroups_per_dimension {
                return Err(RuntimeError::DispatchFailed(format!(
                    "{count} workgroups in dimension {axis} exceeds device limit {}",
                    info.max_workgroups_per_dimension
                )));
            }
        }
        Ok(())
    }
}

/// Reject a workgroup shape the device cannot run.
pub(crate) fn check_workgroup(info: &DeviceInfo, local: [u32; 3]) -> Result<()> {
    for axis in 0..3 {
        if local[axis] > info.max_workgroup_size[axis] {
            return Err(RuntimeError::DispatchFailed(format!(
                "tile extent {} in dimension {axis} exceeds device limit {}",
                local[axis], info.max_workgroup_size[axis]
            )));
        }
    }
    let invocations: u64 = local.iter().map(|&l| u64::from(l)).product();
    if invocations > u64::from(info.max_invocations_per_workgroup) {
        return Err(RuntimeError::DispatchFailed(format!(
            "tile of {invocations} work-items exceeds device limit {}",
            info.max_invocations_per_workgroup
        )));
    }
    Ok(())
}

fn read_timestamps(queue: &CommandQueue<'_>, readback: &wgpu::Buffer) -> Result<(u64, u64)> {
    let slice = readback.slice(..);
    let (sender, receiver) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    queue.context().wait(None)?;

    receiver
        .recv()
        .map_err(|e| RuntimeError::DispatchFailed(format!("Timestamp map recv failed: {e}")))??;

    let (start, end) = {
        let data = slice.get_mapped_range();
        (
            bytemuck::pod_read_unaligned::<u64>(&data[0..8]),
            bytemuck::pod_read_unaligned::<u64>(&data[8..16]),
        )
    };
    readback.unmap();
    Ok((start, end))
}
