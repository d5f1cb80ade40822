//! Kernel creation and positional argument binding.

use crate::buffer::{AccessMode, BufferHandle, DeviceBuffer};
use crate::context::ExecutionContext;
use crate::dispatch::check_workgroup;
use crate::error::{Result, RuntimeError};
use crate::program::{KernelSignature, ParamKind, Program};
use bytemuck::Pod;

/// One positional kernel argument.
#[derive(Debug)]
pub enum KernelArg<'a> {
    /// A device buffer, for a storage parameter.
    Buffer(&'a DeviceBuffer<'a>),
    /// Raw bytes of a plain value, for a uniform parameter.
    Scalar(Vec<u8>),
}

impl KernelArg<'_> {
    pub fn scalar<T: Pod>(value: T) -> Self {
        KernelArg::Scalar(bytemuck::bytes_of(&value).to_vec())
    }
}

impl<'a, 'ctx: 'a> From<&'a DeviceBuffer<'ctx>> for KernelArg<'a> {
    fn from(buffer: &'a DeviceBuffer<'ctx>) -> Self {
        KernelArg::Buffer(buffer)
    }
}

#[derive(Debug)]
enum BoundArg {
    Buffer(BufferHandle),
    Scalar(wgpu::Buffer),
}

/// A compute entry point with its argument slots.
///
/// Arguments stay bound across dispatches and may be re-bound at any time
/// before the next dispatch.
pub struct Kernel<'ctx> {
    context: &'ctx ExecutionContext,
    program_label: String,
    signature: KernelSignature,
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
    args: Vec<Option<BoundArg>>,
}

impl<'ctx> Program<'ctx> {
    /// Create the kernel for compute entry point `entry_point`.
    ///
    /// # Errors
    /// `EntryPointNotFound` if the program has no such compute entry point.
    pub fn create_kernel(&self, entry_point: &str) -> Result<Kernel<'ctx>> {
        Kernel::new(self, entry_point)
    }
}

impl<'ctx> Kernel<'ctx> {
    fn new(program: &Program<'ctx>, entry_point: &str) -> Result<Self> {
        let signature = program.source().signature(entry_point)?;
        let context = program.context();
        let device = context.device();
        check_workgroup(context.device_info(), signature.workgroup_size).map_err(|e| match e {
            RuntimeError::DispatchFailed(reason) => RuntimeError::DispatchFailed(format!(
                "kernel '{entry_point}' has @workgroup_size{:?}: {reason}",
                signature.workgroup_size
            )),
            other => other,
        })?;

        let entries: Vec<wgpu::BindGroupLayoutEntry> = signature
            .params
            .iter()
            .enumerate()
            .filter_map(|(binding, param)| param.map(|kind| (binding as u32, kind)))
            .map(|(binding, kind)| wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: match kind {
                        ParamKind::Storage { read_only } => {
                            wgpu::BufferBindingType::Storage { read_only }
                        }
                        ParamKind::Uniform { .. } => wgpu::BufferBindingType::Uniform,
                    },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect();

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&format!("Bind Group Layout: {entry_point}")),
            entries: &entries,
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&format!("Pipeline Layout: {entry_point}")),
            bind_group_layouts: &[&layout],
            immediate_size: 0,
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(&format!("Pipeline: {entry_point}")),
            layout: Some(&pipeline_layout),
            module: program.module(),
            entry_point: Some(entry_point),
            compilation_options: Default::default(),
            cache: None,
        });

        if let Some(message) = context.take_device_error() {
            return Err(RuntimeError::BuildFailed {
                log: format!("pipeline for '{entry_point}' rejected by the device: {message}"),
            });
        }

        tracing::debug!(
            program = program.label(),
            kernel = entry_point,
            arity = signature.arity(),
            workgroup_size = ?signature.workgroup_size,
            "Created kernel"
        );

        let args = (0..signature.arity()).map(|_| None).collect();
        Ok(Self {
            context,
            program_label: program.label().to_string(),
            signature,
            pipeline,
            layout,
            args,
        })
    }

    pub fn name(&self) -> &str {
        &self.signature.name
    }

    pub fn signature(&self) -> &KernelSignature {
        &self.signature
    }

    /// The tile (`@workgroup_size`) the kernel was compiled for.
    pub fn workgroup_size(&self) -> [u32; 3] {
        self.signature.workgroup_size
    }

    /// Bind argument `index`.
    ///
    /// # Errors
    /// `ArgumentBinding` if there is no parameter at `index`, the argument's
    /// kind does not fit the parameter, a read-only buffer is bound to a
    /// writable parameter, or the buffer belongs to another context.
    pub fn set_arg<'a>(&mut self, index: u32, arg: impl Into<KernelArg<'a>>) -> Result<()> {
        let arg = arg.into();
        let slot = index as usize;
        let kind = self
            .signature
            .params
            .get(slot)
            .copied()
            .flatten()
            .ok_or_else(|| {
                RuntimeError::ArgumentBinding(format!(
                    "kernel '{}' has no parameter at index {index}",
                    self.name()
                ))
            })?;

        let bound = match (kind, arg) {
            (ParamKind::Storage { read_only }, KernelArg::Buffer(buffer)) => {
                if buffer.handle().owner != self.context.id() {
                    return Err(RuntimeError::ArgumentBinding(format!(
                        "buffer '{}' belongs to a different context than kernel '{}'",
                        buffer.label(),
                        self.name()
                    )));
                }
                if !read_only && buffer.access() == AccessMode::ReadOnly {
                    return Err(RuntimeError::ArgumentBinding(format!(
                        "kernel '{}' writes argument {index}, but buffer '{}' is read-only",
                        self.name(),
                        buffer.label()
                    )));
                }
                tracing::trace!(kernel = self.name(), index, buffer = buffer.label(), "Bound buffer");
                BoundArg::Buffer(buffer.handle().clone())
            }
            (ParamKind::Uniform { size }, KernelArg::Scalar(bytes)) => {
                if bytes.len() != size as usize {
                    return Err(RuntimeError::ArgumentBinding(format!(
                        "kernel '{}' argument {index} is {size} bytes, got {}",
                        self.name(),
                        bytes.len()
                    )));
                }
                BoundArg::Scalar(self.uniform_buffer(index, &bytes))
            }
            (ParamKind::Storage { .. }, KernelArg::Scalar(_)) => {
                return Err(RuntimeError::ArgumentBinding(format!(
                    "kernel '{}' argument {index} expects a buffer, got a scalar",
                    self.name()
                )));
            }
            (ParamKind::Uniform { .. }, KernelArg::Buffer(buffer)) => {
                return Err(RuntimeError::ArgumentBinding(format!(
                    "kernel '{}' argument {index} expects a scalar, got buffer '{}'",
                    self.name(),
                    buffer.label()
                )));
            }
        };

        self.args[slot] = Some(bound);
        Ok(())
    }

    /// Shorthand for binding a plain value.
    pub fn set_scalar<T: Pod>(&mut self, index: u32, value: T) -> Result<()> {
        self.set_arg(index, KernelArg::scalar(value))
    }

    fn uniform_buffer(&self, index: u32, bytes: &[u8]) -> wgpu::Buffer {
        // Uniform bindings are padded to 16 bytes for the strictest backends.
        let size = ((bytes.len() as u64 + 15) & !15).max(16);
        let buffer = self.context.device().create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("{}: arg {index}", self.name())),
            size,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut padded = bytes.to_vec();
        padded.resize(size as usize, 0);
        self.context.queue().write_buffer(&buffer, 0, &padded);
        buffer
    }

    /// Declared parameters that have no argument yet.
    pub fn unbound_args(&self) -> Vec<u32> {
        self.signature
            .params
            .iter()
            .enumerate()
            .filter(|(slot, param)| param.is_some() && self.args[*slot].is_none())
            .map(|(slot, _)| slot as u32)
            .collect()
    }

    pub(crate) fn context(&self) -> &'ctx ExecutionContext {
        self.context
    }

    pub(crate) fn pipeline(&self) -> &wgpu::ComputePipeline {
        &self.pipeline
    }

    /// Buffers bound to this kernel, with whether the kernel may write them.
    pub(crate) fn bound_buffers(&self) -> impl Iterator<Item = (&BufferHandle, bool)> + '_ {
        self.signature
            .params
            .iter()
            .zip(&self.args)
            .filter_map(|(param, arg)| match (param, arg) {
                (Some(ParamKind::Storage { read_only }), Some(BoundArg::Buffer(handle))) => {
                    Some((handle, !read_only))
                }
                _ => None,
            })
    }

    /// Bind group over the current arguments.
    ///
    /// # Panics
    /// If any declared parameter is unbound; dispatching such a kernel is a
    /// programming error.
    pub(crate) fn bind_group(&self) -> wgpu::BindGroup {
        let unbound = self.unbound_args();
        if !unbound.is_empty() {
            panic!(
                "kernel '{}' from program '{}' dispatched with unbound arguments {:?}",
                self.name(),
                self.program_label,
                unbound
            );
        }

        let entries: Vec<wgpu::BindGroupEntry> = self
            .args
            .iter()
            .enumerate()
            .filter_map(|(slot, arg)| {
                let resource = match arg.as_ref()? {
                    BoundArg::Buffer(handle) => handle.buffer.as_entire_binding(),
                    BoundArg::Scalar(buffer) => buffer.as_entire_binding(),
                };
                Some(wgpu::BindGroupEntry {
                    binding: slot as u32,
                    resource,
                })
            })
            .collect();

        self.context
            .device()
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&format!("Bind Group: {}", self.name())),
                layout: &self.layout,
                entries: &entries,
            })
    }
}

impl Drop for Kernel<'_> {
    fn drop(&mut self) {
        tracing::trace!(kernel = self.name(), "Releasing kernel");
    }
}

impl std::fmt::Debug for Kernel<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("program", &self.program_label)
            .field("signature", &self.signature)
            .field("unbound", &self.unbound_args())
            .finish()
    }
}
