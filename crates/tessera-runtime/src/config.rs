//! Pipeline configuration.
//!
//! Precedence is explicit setters (CLI flags) over `TESSERA_*` environment
//! variables over [`PipelineConfig::default`].

use crate::error::{Result, RuntimeError};
use crate::platform::{DeviceKind, SelectionPolicy};
use crate::verify::DEFAULT_TOLERANCE;

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub backends: wgpu::Backends,
    pub selection: SelectionPolicy,
    pub profiling: bool,
    pub tolerance: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            backends: wgpu::Backends::all(),
            selection: SelectionPolicy::any(),
            profiling: false,
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<()> {
        if self.backends.is_empty() {
            return Err(RuntimeError::InvalidConfig("no backends enabled".to_string()));
        }
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            return Err(RuntimeError::InvalidConfig(format!(
                "tolerance must be a positive finite number, got {}",
                self.tolerance
            )));
        }
        Ok(())
    }

    /// Overlay `TESSERA_BACKENDS`, `TESSERA_VENDOR`, `TESSERA_DEVICE_TYPE`
    /// and `TESSERA_PROFILE` from the process environment.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    /// Overlay settings from an arbitrary variable lookup.
    pub fn apply_vars<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(list) = lookup("TESSERA_BACKENDS") {
            self.backends = parse_backends(&list)?;
        }
        if let Some(vendor) = lookup("TESSERA_VENDOR").filter(|v| !v.is_empty()) {
            self.selection.vendor = Some(vendor);
        }
        if let Some(kind) = lookup("TESSERA_DEVICE_TYPE") {
            self.selection.kind = Some(kind.parse::<DeviceKind>()?);
        }
        if let Some(flag) = lookup("TESSERA_PROFILE") {
            self.profiling = matches!(flag.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        Ok(self)
    }
}

/// Parse a comma-separated backend list such as `vulkan,dx12`.
pub fn parse_backends(list: &str) -> Result<wgpu::Backends> {
    let mut backends = wgpu::Backends::empty();
    for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        backends |= match name.to_ascii_lowercase().as_str() {
            "vulkan" | "vk" => wgpu::Backends::VULKAN,
            "metal" | "mtl" => wgpu::Backends::METAL,
            "dx12" | "d3d12" => wgpu::Backends::DX12,
            "gl" | "gles" | "opengl" => wgpu::Backends::GL,
            "primary" => wgpu::Backends::PRIMARY,
            "all" => wgpu::Backends::all(),
            other => {
                return Err(RuntimeError::InvalidConfig(format!("unknown backend '{other}'")));
            }
        };
    }
    if backends.is_empty() {
        return Err(RuntimeError::InvalidConfig(format!("no backends in '{list}'")));
    }
    Ok(backends)
}

#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
        }
    }

    pub fn backends(mut self, backends: wgpu::Backends) -> Self {
        self.config.backends = backends;
        self
    }

    pub fn selection(mut self, policy: SelectionPolicy) -> Self {
        self.config.selection = policy;
        self
    }

    pub fn vendor<S: Into<String>>(mut self, vendor: S) -> Self {
        self.config.selection.vendor = Some(vendor.into());
        self
    }

    pub fn device_kind(mut self, kind: DeviceKind) -> Self {
        self.config.selection.kind = Some(kind);
        self
    }

    pub fn profiling(mut self, enable: bool) -> Self {
        self.config.profiling = enable;
        self
    }

    pub fn tolerance(mut self, tolerance: f32) -> Self {
        self.config.tolerance = tolerance;
        self
    }

    pub fn build(self) -> Result<PipelineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
