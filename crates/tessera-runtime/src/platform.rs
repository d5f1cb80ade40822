//! Platform and device discovery.
//!
//! A platform is one wgpu backend (Vulkan, Metal, DX12, GL) that enumerates
//! at least one adapter; its devices are those adapters in enumeration order.
//! Selection is a first-match linear scan, platforms outer, devices inner.

use crate::error::{Result, RuntimeError};
use std::fmt;

/// Broad device category used by selection policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// Discrete, integrated or virtual GPU.
    Gpu,
    /// CPU implementation (software rasterizers such as llvmpipe or WARP).
    Cpu,
    Other,
}

impl From<wgpu::DeviceType> for DeviceKind {
    fn from(ty: wgpu::DeviceType) -> Self {
        match ty {
            wgpu::DeviceType::DiscreteGpu
            | wgpu::DeviceType::IntegratedGpu
            | wgpu::DeviceType::VirtualGpu => DeviceKind::Gpu,
            wgpu::DeviceType::Cpu => DeviceKind::Cpu,
            wgpu::DeviceType::Other => DeviceKind::Other,
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Gpu => f.write_str("gpu"),
            DeviceKind::Cpu => f.write_str("cpu"),
            DeviceKind::Other => f.write_str("other"),
        }
    }
}

impl std::str::FromStr for DeviceKind {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "gpu" => Ok(DeviceKind::Gpu),
            "cpu" => Ok(DeviceKind::Cpu),
            "other" => Ok(DeviceKind::Other),
            other => Err(RuntimeError::InvalidConfig(format!(
                "unknown device type '{other}' (expected gpu, cpu or other)"
            ))),
        }
    }
}

/// Capabilities and identity of one device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Position within the owning platform.
    pub index: usize,
    pub name: String,
    /// Human-readable vendor, derived from the PCI vendor id.
    pub vendor: String,
    pub vendor_id: u32,
    pub driver: String,
    pub kind: DeviceKind,
    pub device_type: wgpu::DeviceType,
    pub backend: wgpu::Backend,
    /// Whether timestamp queries (and therefore profiling queues) are supported.
    pub timestamp_queries: bool,
    pub max_invocations_per_workgroup: u32,
    pub max_workgroup_size: [u32; 3],
    pub max_workgroups_per_dimension: u32,
    pub max_buffer_size: u64,
    pub max_storage_binding_size: u64,
}

impl DeviceInfo {
    pub(crate) fn from_adapter(index: usize, adapter: &wgpu::Adapter) -> Self {
        let info = adapter.get_info();
        let limits = adapter.limits();
        let vendor = vendor_name(info.vendor)
            .map(str::to_string)
            .unwrap_or_else(|| {
                if info.driver.is_empty() {
                    format!("0x{:04x}", info.vendor)
                } else {
                    info.driver.clone()
                }
            });

        Self {
            index,
            name: info.name,
            vendor,
            vendor_id: info.vendor,
            driver: info.driver,
            kind: DeviceKind::from(info.device_type),
            device_type: info.device_type,
            backend: info.backend,
            timestamp_queries: adapter.features().contains(wgpu::Features::TIMESTAMP_QUERY),
            max_invocations_per_workgroup: limits.max_compute_invocations_per_workgroup,
            max_workgroup_size: [
                limits.max_compute_workgroup_size_x,
                limits.max_compute_workgroup_size_y,
                limits.max_compute_workgroup_size_z,
            ],
            max_workgroups_per_dimension: limits.max_compute_workgroups_per_dimension,
            max_buffer_size: limits.max_buffer_size,
            max_storage_binding_size: u64::from(limits.max_storage_buffer_binding_size),
        }
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {}, {:?})",
            self.name, self.vendor, self.kind, self.backend
        )
    }
}

/// Map well-known PCI vendor ids to the vendor strings drivers report.
pub fn vendor_name(vendor_id: u32) -> Option<&'static str> {
    match vendor_id {
        0x1002 | 0x1022 => Some("Advanced Micro Devices, Inc."),
        0x10de => Some("NVIDIA Corporation"),
        0x8086 => Some("Intel Corporation"),
        0x106b => Some("Apple Inc."),
        0x13b5 => Some("ARM"),
        0x5143 => Some("Qualcomm"),
        0x1010 => Some("Imagination Technologies"),
        0x10005 => Some("Mesa"),
        0x1414 => Some("Microsoft"),
        _ => None,
    }
}

/// One backend and the devices it exposes.
#[derive(Debug, Clone)]
pub struct Platform {
    pub id: usize,
    pub backend: wgpu::Backend,
    pub devices: Vec<DeviceInfo>,
}

impl Platform {
    pub fn name(&self) -> String {
        format!("{:?}", self.backend)
    }
}

/// Criteria a device must satisfy. All set criteria must hold.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionPolicy {
    pub vendor: Option<String>,
    pub kind: Option<DeviceKind>,
    pub backend: Option<wgpu::Backend>,
    pub require_profiling: bool,
}

impl SelectionPolicy {
    /// Matches the first device enumerated.
    pub fn any() -> Self {
        Self::default()
    }

    /// Vendor, adapter name or driver must contain `text` (case-insensitive).
    pub fn vendor_contains(mut self, text: impl Into<String>) -> Self {
        self.vendor = Some(text.into());
        self
    }

    pub fn kind(mut self, kind: DeviceKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn backend(mut self, backend: wgpu::Backend) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Only devices that can host a profiling queue.
    pub fn require_profiling(mut self) -> Self {
        self.require_profiling = true;
        self
    }

    /// Whether `device` on `platform` satisfies this policy.
    pub fn matches(&self, platform: &Platform, device: &DeviceInfo) -> bool {
        if let Some(backend) = self.backend {
            if platform.backend != backend {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if device.kind != kind {
                return false;
            }
        }
        if self.require_profiling && !device.timestamp_queries {
            return false;
        }
        if let Some(vendor) = &self.vendor {
            let needle = vendor.to_lowercase();
            let hit = [&device.vendor, &device.name, &device.driver]
                .iter()
                .any(|field| field.to_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }
        true
    }
}

impl fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(vendor) = &self.vendor {
            parts.push(format!("vendor containing {vendor:?}"));
        }
        if let Some(kind) = self.kind {
            parts.push(format!("device type {kind}"));
        }
        if let Some(backend) = self.backend {
            parts.push(format!("backend {backend:?}"));
        }
        if self.require_profiling {
            parts.push("timestamp query support".to_string());
        }
        if parts.is_empty() {
            f.write_str("any device")
        } else {
            write!(f, "{}", parts.join(", "))
        }
    }
}

/// Position of a selected device: `(platform index, device index)`.
pub type DevicePosition = (usize, usize);

/// First-match selection over already-enumerated platforms.
pub fn select_device(platforms: &[Platform], policy: &SelectionPolicy) -> Result<DevicePosition> {
    if platforms.is_empty() {
        return Err(RuntimeError::NoPlatformFound);
    }

    for (p, platform) in platforms.iter().enumerate() {
        for (d, device) in platform.devices.iter().enumerate() {
            if policy.matches(platform, device) {
                return Ok((p, d));
            }
        }
    }

    Err(RuntimeError::NoMatchingDevice {
        policy: policy.to_string(),
    })
}

/// A device chosen by the resolver, ready to become an execution context.
pub struct SelectedDevice {
    pub(crate) adapter: wgpu::Adapter,
    pub platform_id: usize,
    pub info: DeviceInfo,
}

impl fmt::Debug for SelectedDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectedDevice")
            .field("platform_id", &self.platform_id)
            .field("info", &self.info)
            .finish()
    }
}

/// Enumerates platforms and picks a device per [`SelectionPolicy`].
pub struct PlatformDeviceResolver {
    instance: wgpu::Instance,
    backends: wgpu::Backends,
}

impl PlatformDeviceResolver {
    pub fn new(backends: wgpu::Backends) -> Self {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });
        Self { instance, backends }
    }

    /// Enumerate adapters grouped into platforms, keeping the adapters alongside.
    async fn discover(&self) -> Vec<(Platform, Vec<wgpu::Adapter>)> {
        let adapters = self.instance.enumerate_adapters(self.backends).await;

        let mut grouped: Vec<(Platform, Vec<wgpu::Adapter>)> = Vec::new();
        for adapter in adapters {
            let backend = adapter.get_info().backend;
            let slot = match grouped.iter().position(|(p, _)| p.backend == backend) {
                Some(slot) => slot,
                None => {
                    grouped.push((
                        Platform {
                            id: grouped.len(),
                            backend,
                            devices: Vec::new(),
                        },
                        Vec::new(),
                    ));
                    grouped.len() - 1
                }
            };
            let (platform, members) = &mut grouped[slot];
            platform
                .devices
                .push(DeviceInfo::from_adapter(members.len(), &adapter));
            members.push(adapter);
        }
        grouped
    }

    /// List all platforms and their devices.
    pub async fn enumerate(&self) -> Vec<Platform> {
        self.discover()
            .await
            .into_iter()
            .map(|(platform, _)| platform)
            .collect()
    }

    /// Pick the first device satisfying `policy`.
    ///
    /// # Errors
    /// `NoPlatformFound` when nothing enumerates, `NoMatchingDevice` when
    /// nothing matches.
    pub async fn resolve(&self, policy: &SelectionPolicy) -> Result<SelectedDevice> {
        let mut discovered = self.discover().await;
        let platforms: Vec<Platform> = discovered.iter().map(|(p, _)| p.clone()).collect();
        let (p, d) = select_device(&platforms, policy)?;

        let (platform, mut adapters) = discovered.swap_remove(p);
        let adapter = adapters.swap_remove(d);
        let info = platform.devices[d].clone();

        tracing::info!(
            platform = %platform.name(),
            device = %info,
            %policy,
            "Selected compute device"
        );

        Ok(SelectedDevice {
            adapter,
            platform_id: platform.id,
            info,
        })
    }
}
