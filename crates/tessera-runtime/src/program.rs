//! Kernel source compilation.
//!
//! WGSL text goes through three stages: the `naga` front end (parse), the
//! `naga` validator (type, uniformity and layout checks), and the device's
//! own shader compiler. Diagnostics from whichever stage fails are kept
//! verbatim, annotated with the source lines they refer to.

use crate::context::ExecutionContext;
use crate::error::{Result, RuntimeError};
use std::borrow::Cow;
use std::cell::RefCell;
use std::fmt::{self, Write as _};

/// Supplies kernel source text by name.
pub trait SourceProvider {
    /// Source for the kernel program called `name`.
    ///
    /// # Errors
    /// `SourceUnavailable` if there is no such program.
    fn kernel_source(&self, name: &str) -> Result<Cow<'_, str>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    Success,
    Failed,
}

/// Outcome of the most recent build, ready for printing.
#[derive(Debug, Clone)]
pub struct BuildDiagnostics {
    pub label: String,
    pub status: BuildStatus,
    /// Complete compiler output; empty for a clean successful build.
    pub log: String,
}

impl fmt::Display for BuildDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            BuildStatus::Success => write!(f, "build of '{}' succeeded", self.label)?,
            BuildStatus::Failed => write!(f, "build of '{}' failed", self.label)?,
        }
        if !self.log.is_empty() {
            write!(f, "\n{}", self.log)?;
        }
        Ok(())
    }
}

/// Kind of one positional kernel parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// A `var<storage>` array; `read_only` unless declared `read_write`.
    Storage { read_only: bool },
    /// A `var<uniform>` scalar or struct of `size` bytes.
    Uniform { size: u32 },
}

/// Reflected interface of one compute entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSignature {
    pub name: String,
    pub workgroup_size: [u32; 3],
    /// Indexed by binding number; `None` for unused binding slots.
    pub params: Vec<Option<ParamKind>>,
}

impl KernelSignature {
    /// Number of positional argument slots (highest binding + 1).
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

/// Parsed and validated kernel source. Needs no device.
#[derive(Debug)]
pub struct ProgramSource {
    label: String,
    text: String,
    module: naga::Module,
}

impl ProgramSource {
    /// Parse and validate WGSL `text`.
    ///
    /// # Errors
    /// `BuildFailed` carrying the annotated compiler log.
    pub fn parse(label: &str, text: &str) -> Result<Self> {
        Self::compile(label, text).map_err(|log| RuntimeError::BuildFailed { log })
    }

    fn compile(label: &str, text: &str) -> std::result::Result<Self, String> {
        let module = naga::front::wgsl::parse_str(text)
            .map_err(|e| e.emit_to_string_with_path(text, label))?;

        naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::default(),
        )
        .validate(&module)
        .map_err(|e| e.emit_to_string_with_path(text, label))?;

        Ok(Self {
            label: label.to_string(),
            text: text.to_string(),
            module,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Names of all `@compute` entry points.
    pub fn entry_points(&self) -> Vec<&str> {
        self.module
            .entry_points
            .iter()
            .filter(|ep| ep.stage == naga::ShaderStage::Compute)
            .map(|ep| ep.name.as_str())
            .collect()
    }

    /// Reflect the positional parameters of compute entry point `name`.
    ///
    /// Parameters are the `@group(0)` bindings referenced by the entry point
    /// or by any helper function in the module.
    pub fn signature(&self, name: &str) -> Result<KernelSignature> {
        let entry_point = self
            .module
            .entry_points
            .iter()
            .find(|ep| ep.name == name && ep.stage == naga::ShaderStage::Compute)
            .ok_or_else(|| {
                RuntimeError::EntryPointNotFound(format!(
                    "'{}' not found in program '{}' (available: {})",
                    name,
                    self.label,
                    self.entry_points().join(", ")
                ))
            })?;

        let mut params: Vec<Option<ParamKind>> = Vec::new();
        for (handle, var) in self.module.global_variables.iter() {
            let Some(binding) = var.binding.as_ref() else {
                continue;
            };

            let references = |function: &naga::Function| {
                function.expressions.iter().any(
                    |(_, expr)| matches!(expr, naga::Expression::GlobalVariable(h) if *h == handle),
                )
            };
            let is_used = references(&entry_point.function)
                || self.module.functions.iter().any(|(_, f)| references(f));
            if !is_used {
                continue;
            }

            if binding.group != 0 {
                return Err(RuntimeError::ArgumentBinding(format!(
                    "'{}' uses @group({}) @binding({}); kernel arguments must live in group 0",
                    name, binding.group, binding.binding
                )));
            }

            let kind = match var.space {
                naga::AddressSpace::Storage { access } => ParamKind::Storage {
                    read_only: !access.contains(naga::StorageAccess::STORE),
                },
                naga::AddressSpace::Uniform => ParamKind::Uniform {
                    size: self.module.types[var.ty].inner.size(self.module.to_ctx()),
                },
                other => {
                    return Err(RuntimeError::ArgumentBinding(format!(
                        "'{}' binding {} is in unsupported address space {:?}",
                        name, binding.binding, other
                    )));
                }
            };

            let slot = binding.binding as usize;
            if params.len() <= slot {
                params.resize(slot + 1, None);
            }
            params[slot] = Some(kind);
        }

        Ok(KernelSignature {
            name: name.to_string(),
            workgroup_size: entry_point.workgroup_size,
            params,
        })
    }
}

/// A program compiled for one context's device.
pub struct Program<'ctx> {
    context: &'ctx ExecutionContext,
    source: ProgramSource,
    module: wgpu::ShaderModule,
}

impl<'ctx> Program<'ctx> {
    pub fn label(&self) -> &str {
        self.source.label()
    }

    pub fn source(&self) -> &ProgramSource {
        &self.source
    }

    pub fn entry_points(&self) -> Vec<&str> {
        self.source.entry_points()
    }

    pub(crate) fn context(&self) -> &'ctx ExecutionContext {
        self.context
    }

    pub(crate) fn module(&self) -> &wgpu::ShaderModule {
        &self.module
    }
}

impl Drop for Program<'_> {
    fn drop(&mut self) {
        tracing::trace!(label = self.source.label(), "Releasing program");
    }
}

/// Builds programs for one context and remembers the last build's diagnostics.
pub struct ProgramLoader<'ctx> {
    context: &'ctx ExecutionContext,
    last_build: RefCell<Option<BuildDiagnostics>>,
}

impl<'ctx> ProgramLoader<'ctx> {
    pub fn new(context: &'ctx ExecutionContext) -> Self {
        Self {
            context,
            last_build: RefCell::new(None),
        }
    }

    /// Compile `text` for this context's device.
    ///
    /// # Errors
    /// `BuildFailed` with the full diagnostic log; the failure is fatal for
    /// this device.
    #[tracing::instrument(skip_all, fields(label = label))]
    pub fn build(&self, label: &str, text: &str) -> Result<Program<'ctx>> {
        let source = match ProgramSource::compile(label, text) {
            Ok(source) => source,
            Err(log) => return Err(self.record_failure(label, log)),
        };

        let module = self
            .context
            .device()
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(text.into()),
            });

        // The device compiler may still reject what naga accepted, or warn.
        let info = pollster::block_on(module.get_compilation_info());
        let mut log = String::new();
        let mut failed = false;
        for message in &info.messages {
            let severity = match message.message_type {
                wgpu::CompilationMessageType::Error => {
                    failed = true;
                    "error"
                }
                wgpu::CompilationMessageType::Warning => "warning",
                wgpu::CompilationMessageType::Info => "info",
            };
            match &message.location {
                Some(loc) => {
                    let _ = writeln!(
                        log,
                        "{severity}: {label}:{}:{}: {}",
                        loc.line_number, loc.line_position, message.message
                    );
                }
                None => {
                    let _ = writeln!(log, "{severity}: {label}: {}", message.message);
                }
            }
        }
        if let Some(message) = self.context.take_device_error() {
            failed = true;
            let _ = writeln!(log, "error: {label}: {message}");
        }
        if failed {
            return Err(self.record_failure(label, log));
        }

        tracing::info!(entry_points = ?source.entry_points(), "Built program");
        *self.last_build.borrow_mut() = Some(BuildDiagnostics {
            label: label.to_string(),
            status: BuildStatus::Success,
            log,
        });

        Ok(Program {
            context: self.context,
            source,
            module,
        })
    }

    /// Fetch the source named `name` from `provider` and build it.
    pub fn build_from(&self, provider: &dyn SourceProvider, name: &str) -> Result<Program<'ctx>> {
        let text = provider.kernel_source(name)?;
        self.build(name, &text)
    }

    /// Status and complete log of the most recent build on this loader.
    pub fn fetch_diagnostics(&self) -> Option<BuildDiagnostics> {
        self.last_build.borrow().clone()
    }

    fn record_failure(&self, label: &str, log: String) -> RuntimeError {
        tracing::warn!(label, "Program build failed");
        *self.last_build.borrow_mut() = Some(BuildDiagnostics {
            label: label.to_string(),
            status: BuildStatus::Failed,
            log,
        });
        match self.fetch_diagnostics() {
            Some(diagnostics) => RuntimeError::BuildFailed {
                log: diagnostics.log,
            },
            None => RuntimeError::BuildFailed {
                log: format!("{label}: build failed"),
            },
        }
    }
}
