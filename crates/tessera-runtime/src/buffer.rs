//! Device buffer allocation and host/device transfer.
//!
//! Buffers are fixed-size for their whole life. Every transfer goes through
//! an explicit upload or download; the host never aliases device memory.

use crate::context::{CommandQueue, ExecutionContext};
use crate::error::{Result, RuntimeError};
use bytemuck::Pod;
use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// How kernels may use a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

/// Device-write bookkeeping shared between a buffer and the kernels it is bound to.
#[derive(Debug, Default)]
pub(crate) struct BufferState {
    /// Bumped after every completed device-side write (upload or dispatch).
    write_epoch: AtomicU64,
    /// Host edits on a host-backed buffer not yet flushed to the device.
    host_dirty: AtomicBool,
}

impl BufferState {
    pub(crate) fn epoch(&self) -> u64 {
        self.write_epoch.load(Ordering::Acquire)
    }

    pub(crate) fn mark_device_write(&self) {
        self.write_epoch.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn has_unflushed_host_writes(&self) -> bool {
        self.host_dirty.load(Ordering::Acquire)
    }

    fn set_host_dirty(&self, dirty: bool) {
        self.host_dirty.store(dirty, Ordering::Release);
    }
}

/// Handle a kernel keeps to the buffers bound to it.
#[derive(Debug, Clone)]
pub(crate) struct BufferHandle {
    pub(crate) buffer: Arc<wgpu::Buffer>,
    pub(crate) state: Arc<BufferState>,
    pub(crate) access: AccessMode,
    pub(crate) label: Arc<str>,
    /// Address of the owning context, to reject cross-context binding.
    pub(crate) owner: usize,
}

/// A fixed-size device allocation.
///
/// Borrows the [`ExecutionContext`] it was allocated on. Device memory is
/// released when the buffer and every kernel it was bound to are dropped.
#[derive(Debug)]
pub struct DeviceBuffer<'ctx> {
    handle: BufferHandle,
    size: u64,
    _context: PhantomData<&'ctx ExecutionContext>,
}

impl<'ctx> DeviceBuffer<'ctx> {
    /// Logical size in bytes, as requested at allocation.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn access(&self) -> AccessMode {
        self.handle.access
    }

    pub fn label(&self) -> &str {
        &self.handle.label
    }

    pub(crate) fn handle(&self) -> &BufferHandle {
        &self.handle
    }

    pub(crate) fn state(&self) -> &BufferState {
        &self.handle.state
    }

    fn raw(&self) -> &wgpu::Buffer {
        &self.handle.buffer
    }
}

impl Drop for DeviceBuffer<'_> {
    fn drop(&mut self) {
        tracing::trace!(label = %self.handle.label, size = self.size, "Releasing buffer");
    }
}

/// wgpu requires copy sizes and offsets to be multiples of 4 bytes.
fn align4(size: u64) -> u64 {
    (size + 3) & !3
}

/// Allocates buffers on one context and moves data in and out of them.
pub struct BufferManager<'ctx> {
    context: &'ctx ExecutionContext,
    allocations: Cell<usize>,
    allocated_bytes: Cell<u64>,
}

impl<'ctx> BufferManager<'ctx> {
    pub fn new(context: &'ctx ExecutionContext) -> Self {
        Self {
            context,
            allocations: Cell::new(0),
            allocated_bytes: Cell::new(0),
        }
    }

    /// Allocate `size` bytes of device memory.
    ///
    /// A zero-byte request still creates a minimal device allocation; the
    /// buffer reports its logical size of 0.
    ///
    /// # Errors
    /// `AllocationFailed` if the size exceeds the device's buffer or
    /// storage-binding limits.
    pub fn allocate(&self, label: &str, size: u64, access: AccessMode) -> Result<DeviceBuffer<'ctx>> {
        let info = self.context.device_info();
        if size > info.max_buffer_size {
            return Err(RuntimeError::AllocationFailed(format!(
                "'{label}': {size} bytes exceeds the device buffer limit of {} bytes",
                info.max_buffer_size
            )));
        }
        if size > info.max_storage_binding_size {
            return Err(RuntimeError::AllocationFailed(format!(
                "'{label}': {size} bytes exceeds the storage binding limit of {} bytes",
                info.max_storage_binding_size
            )));
        }

        let physical = align4(size).max(4);
        let buffer = self.context.device().create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: physical,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        if let Some(message) = self.context.take_device_error() {
            return Err(RuntimeError::AllocationFailed(format!("'{label}': {message}")));
        }

        self.allocations.set(self.allocations.get() + 1);
        self.allocated_bytes.set(self.allocated_bytes.get() + physical);
        tracing::debug!(label, size, ?access, "Allocated buffer");

        Ok(DeviceBuffer {
            handle: BufferHandle {
                buffer: Arc::new(buffer),
                state: Arc::new(BufferState::default()),
                access,
                label: Arc::from(label),
                owner: self.context.id(),
            },
            size,
            _context: PhantomData,
        })
    }

    /// Allocate a buffer paired with the host vector `host`, whose contents
    /// are uploaded before this returns.
    pub fn allocate_host_backed<T: Pod>(
        &self,
        label: &str,
        host: Vec<T>,
        access: AccessMode,
        queue: &CommandQueue<'ctx>,
    ) -> Result<HostBackedBuffer<'ctx, T>> {
        let size = std::mem::size_of_val(host.as_slice()) as u64;
        let device = self.allocate(label, size, access)?;
        upload_at(queue, &device, 0, &host)?;
        let synced_epoch = device.state().epoch();
        Ok(HostBackedBuffer {
            host,
            device,
            synced_epoch,
        })
    }

    /// Blocking host → device copy of `data` to the start of `buffer`.
    pub fn upload<T: Pod>(&self, queue: &CommandQueue<'ctx>, buffer: &DeviceBuffer<'ctx>, data: &[T]) -> Result<()> {
        upload_at(queue, buffer, 0, data)
    }

    /// Blocking host → device copy of `data` to byte `offset` of `buffer`.
    pub fn upload_at<T: Pod>(
        &self,
        queue: &CommandQueue<'ctx>,
        buffer: &DeviceBuffer<'ctx>,
        offset: u64,
        data: &[T],
    ) -> Result<()> {
        upload_at(queue, buffer, offset, data)
    }

    /// Non-blocking host → device copy.
    ///
    /// The data is staged immediately, so `data` may be reused as soon as
    /// this returns; the copy lands before anything submitted later on `queue`.
    pub fn enqueue_upload<T: Pod>(
        &self,
        queue: &CommandQueue<'ctx>,
        buffer: &DeviceBuffer<'ctx>,
        data: &[T],
    ) -> Result<()> {
        stage_write(queue, buffer, 0, bytemuck::cast_slice(data))?;
        buffer.state().mark_device_write();
        Ok(())
    }

    /// Blocking device → host copy into `host`.
    ///
    /// Every kernel write submitted before this call is visible in `host`
    /// once it returns.
    pub fn download<T: Pod>(&self, queue: &CommandQueue<'ctx>, buffer: &DeviceBuffer<'ctx>, host: &mut [T]) -> Result<()> {
        enqueue_download(queue, buffer, host)?.wait()
    }

    /// Non-blocking device → host copy.
    ///
    /// `host` stays borrowed by the returned [`PendingDownload`] until it is
    /// waited on, so it cannot be read while the copy may still be running.
    pub fn enqueue_download<'h, T: Pod>(
        &self,
        queue: &CommandQueue<'ctx>,
        buffer: &DeviceBuffer<'ctx>,
        host: &'h mut [T],
    ) -> Result<PendingDownload<'h, T>>
    where
        'ctx: 'h,
    {
        enqueue_download(queue, buffer, host)
    }

    /// Number of buffers allocated through this manager.
    pub fn buffer_count(&self) -> usize {
        self.allocations.get()
    }

    /// Device bytes allocated through this manager (after alignment).
    pub fn allocated_bytes(&self) -> u64 {
        self.allocated_bytes.get()
    }
}

/// Queue a write of `bytes` at `offset`.
///
/// wgpu only writes whole 4-byte words. A partial last word is merged with
/// the device's current contents, so bytes outside `offset..offset + len`
/// keep their value; that read-back blocks on work already queued.
fn stage_write(queue: &CommandQueue<'_>, buffer: &DeviceBuffer<'_>, offset: u64, bytes: &[u8]) -> Result<()> {
    if offset % 4 != 0 {
        return Err(RuntimeError::TransferFailed(format!(
            "'{}': offset {offset} is not a multiple of 4 bytes",
            buffer.label()
        )));
    }
    let end = offset
        .checked_add(bytes.len() as u64)
        .filter(|&end| end <= buffer.size())
        .ok_or_else(|| {
            RuntimeError::TransferFailed(format!(
                "'{}': writing {} bytes at offset {offset} exceeds buffer size {}",
                buffer.label(),
                bytes.len(),
                buffer.size()
            ))
        })?;
    if bytes.is_empty() {
        return Ok(());
    }

    let queue_handle = queue.context().queue();
    let (whole, tail) = bytes.split_at(bytes.len() - bytes.len() % 4);
    if !whole.is_empty() {
        queue_handle.write_buffer(buffer.raw(), offset, whole);
    }
    if !tail.is_empty() {
        let tail_offset = offset + whole.len() as u64;
        // Past the logical end the word is allocation padding nobody reads.
        let mut word = if end < buffer.size() {
            read_word(queue, buffer, tail_offset)?
        } else {
            [0u8; 4]
        };
        word[..tail.len()].copy_from_slice(tail);
        queue_handle.write_buffer(buffer.raw(), tail_offset, &word);
    }
    Ok(())
}

/// Blocking read of the device word at `word_offset`.
fn read_word(queue: &CommandQueue<'_>, buffer: &DeviceBuffer<'_>, word_offset: u64) -> Result<[u8; 4]> {
    let staging = queue.context().device().create_buffer(&wgpu::BufferDescriptor {
        label: Some("tail_word_staging"),
        size: 4,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let mut encoder = queue.encoder("tail_word_copy");
    encoder.copy_buffer_to_buffer(buffer.raw(), word_offset, &staging, 0, 4);
    let submission = queue.submit(encoder.finish());

    let (sender, receiver) = futures::channel::oneshot::channel();
    staging.slice(..).map_async(wgpu::MapMode::Read, move |result| {
        sender.send(result).ok();
    });
    queue.context().wait(Some(submission)).map_err(|e| {
        RuntimeError::TransferFailed(format!("'{}': tail read did not complete: {e}", buffer.label()))
    })?;
    pollster::block_on(receiver)
        .map_err(|_| RuntimeError::TransferFailed("Failed to receive map result".to_string()))??;

    let mut word = [0u8; 4];
    word.copy_from_slice(&staging.slice(..).get_mapped_range()[..4]);
    staging.unmap();
    Ok(word)
}

pub(crate) fn upload_at<T: Pod>(
    queue: &CommandQueue<'_>,
    buffer: &DeviceBuffer<'_>,
    offset: u64,
    data: &[T],
) -> Result<()> {
    let bytes: &[u8] = bytemuck::cast_slice(data);
    stage_write(queue, buffer, offset, bytes)?;

    // An empty submission flushes the staged write; waiting on it makes the
    // upload blocking.
    let submission = queue.context().queue().submit(None::<wgpu::CommandBuffer>);
    queue
        .context()
        .wait(Some(submission))
        .map_err(|e| RuntimeError::TransferFailed(format!("'{}': upload did not complete: {e}", buffer.label())))?;

    buffer.state().mark_device_write();
    tracing::debug!(label = buffer.label(), offset, bytes = bytes.len(), "Uploaded");
    Ok(())
}

pub(crate) fn enqueue_download<'ctx: 'h, 'h, T: Pod>(
    queue: &CommandQueue<'ctx>,
    buffer: &DeviceBuffer<'_>,
    host: &'h mut [T],
) -> Result<PendingDownload<'h, T>> {
    let len = std::mem::size_of_val(host) as u64;
    if len > buffer.size() {
        return Err(RuntimeError::TransferFailed(format!(
            "'{}': reading {len} bytes exceeds buffer size {}",
            buffer.label(),
            buffer.size()
        )));
    }
    if len == 0 {
        return Ok(PendingDownload {
            in_flight: None,
            host,
        });
    }

    let device = queue.context().device();
    let copy_size = align4(len);
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("download_staging"),
        size: copy_size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = queue.encoder("download_copy");
    encoder.copy_buffer_to_buffer(buffer.raw(), 0, &staging, 0, copy_size);
    let submission = queue.submit(encoder.finish());

    let (sender, receiver) = futures::channel::oneshot::channel();
    staging.slice(..).map_async(wgpu::MapMode::Read, move |result| {
        sender.send(result).ok();
    });

    tracing::debug!(label = buffer.label(), bytes = len, "Enqueued download");
    Ok(PendingDownload {
        in_flight: Some(InFlight {
            context: queue.context(),
            staging,
            submission,
            receiver,
        }),
        host,
    })
}

struct InFlight<'ctx> {
    context: &'ctx ExecutionContext,
    staging: wgpu::Buffer,
    submission: wgpu::SubmissionIndex,
    receiver: futures::channel::oneshot::Receiver<std::result::Result<(), wgpu::BufferAsyncError>>,
}

/// A device → host copy that has been submitted but not yet observed.
#[must_use = "the host slice is only written once the download is waited on"]
pub struct PendingDownload<'h, T: Pod> {
    in_flight: Option<InFlight<'h>>,
    host: &'h mut [T],
}

impl<'h, T: Pod> PendingDownload<'h, T> {
    /// Block until the copy completes and the host slice holds the data.
    pub fn wait(self) -> Result<()> {
        let Some(in_flight) = self.in_flight else {
            return Ok(());
        };

        in_flight.context.wait(Some(in_flight.submission)).map_err(|e| {
            RuntimeError::TransferFailed(format!("download did not complete: {e}"))
        })?;

        pollster::block_on(in_flight.receiver)
            .map_err(|_| RuntimeError::TransferFailed("Failed to receive map result".to_string()))??;

        let bytes: &mut [u8] = bytemuck::cast_slice_mut(self.host);
        {
            let mapped = in_flight.staging.slice(..).get_mapped_range();
            bytes.copy_from_slice(&mapped[..bytes.len()]);
        }
        in_flight.staging.unmap();
        Ok(())
    }
}

/// A host vector paired with a device buffer.
///
/// The two copies are only reconciled explicitly: [`flush`](Self::flush)
/// pushes host edits to the device and
/// [`sync_from_device`](Self::sync_from_device) pulls device writes back.
/// Reading the host side after a device write without syncing fails with
/// `StaleHostData`; dispatching with unflushed host edits fails at dispatch.
#[derive(Debug)]
pub struct HostBackedBuffer<'ctx, T: Pod> {
    host: Vec<T>,
    device: DeviceBuffer<'ctx>,
    synced_epoch: u64,
}

impl<'ctx, T: Pod> HostBackedBuffer<'ctx, T> {
    /// The device side, for binding to kernels.
    pub fn device(&self) -> &DeviceBuffer<'ctx> {
        &self.device
    }

    fn check_fresh(&self) -> Result<()> {
        if self.device.state().epoch() != self.synced_epoch {
            return Err(RuntimeError::StaleHostData(format!(
                "'{}' was written on the device since the last sync",
                self.device.label()
            )));
        }
        Ok(())
    }

    /// Host contents, valid only while no device write happened since the last sync.
    pub fn host(&self) -> Result<&[T]> {
        self.check_fresh()?;
        Ok(&self.host)
    }

    /// Mutable host contents. Edits must be flushed before the next dispatch.
    pub fn host_mut(&mut self) -> Result<&mut [T]> {
        self.check_fresh()?;
        self.device.state().set_host_dirty(true);
        Ok(&mut self.host)
    }

    /// Push host edits to the device (blocking).
    pub fn flush(&mut self, queue: &CommandQueue<'ctx>) -> Result<()> {
        upload_at(queue, &self.device, 0, &self.host)?;
        self.synced_epoch = self.device.state().epoch();
        self.device.state().set_host_dirty(false);
        Ok(())
    }

    /// Pull device writes into the host vector (blocking).
    pub fn sync_from_device(&mut self, queue: &CommandQueue<'ctx>) -> Result<()> {
        enqueue_download(queue, &self.device, &mut self.host)?.wait()?;
        self.synced_epoch = self.device.state().epoch();
        self.device.state().set_host_dirty(false);
        Ok(())
    }

    /// Take the host vector, provided it is current.
    pub fn into_host(self) -> Result<Vec<T>> {
        self.check_fresh()?;
        Ok(self.host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align4() {
        assert_eq!(align4(0), 0);
        assert_eq!(align4(1), 4);
        assert_eq!(align4(4), 4);
        assert_eq!(align4(13), 16);
    }

    #[test]
    fn test_buffer_state_epochs() {
        let state = BufferState::default();
        assert_eq!(state.epoch(), 0);
        state.mark_device_write();
        state.mark_device_write();
        assert_eq!(state.epoch(), 2);

        assert!(!state.has_unflushed_host_writes());
        state.set_host_dirty(true);
        assert!(state.has_unflushed_host_writes());
    }
}
