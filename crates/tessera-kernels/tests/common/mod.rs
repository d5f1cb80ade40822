//! Common test utilities for kernel tests.

#![allow(dead_code)]

use tessera_runtime::{ExecutionContext, PlatformDeviceResolver, SelectionPolicy};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Context on the first available device.
pub async fn gpu_context() -> ExecutionContext {
    init_tracing();
    let resolver = PlatformDeviceResolver::new(tessera_runtime::wgpu::Backends::all());
    let selected = resolver
        .resolve(&SelectionPolicy::any())
        .await
        .expect("No compute device available");
    ExecutionContext::new(selected)
        .await
        .expect("Failed to create execution context")
}

/// Byte size of `n` f32 elements.
pub fn f32_bytes(n: usize) -> u64 {
    (n * std::mem::size_of::<f32>()) as u64
}
