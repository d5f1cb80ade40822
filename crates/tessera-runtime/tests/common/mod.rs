//! Common test utilities for GPU pipeline tests.

use tessera_runtime::{ExecutionContext, PlatformDeviceResolver, SelectionPolicy};

/// Install a tracing subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Context on the first available device.
pub async fn gpu_context() -> ExecutionContext {
    init_tracing();
    let resolver = PlatformDeviceResolver::new(wgpu::Backends::all());
    let selected = resolver
        .resolve(&SelectionPolicy::any())
        .await
        .expect("No compute device available");
    ExecutionContext::new(selected)
        .await
        .expect("Failed to create execution context")
}

/// `out[i] = in[i] * factor`, one work-item per element.
pub const SCALE_WGSL: &str = r#"
@group(0) @binding(0) var<storage, read_write> out_data: array<f32>;
@group(0) @binding(1) var<storage, read> in_data: array<f32>;
@group(0) @binding(2) var<uniform> factor: f32;
@group(0) @binding(3) var<uniform> count: u32;

@compute @workgroup_size(256)
fn scale(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if (i >= count) {
        return;
    }
    out_data[i] = in_data[i] * factor;
}
"#;
