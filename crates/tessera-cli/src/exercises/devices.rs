//! Platform and device listing.

use super::Harness;
use anyhow::Result;
use tessera_runtime::Platform;

pub fn list(harness: &Harness) -> Result<Vec<Platform>> {
    let platforms = pollster::block_on(harness.resolver().enumerate());
    if platforms.is_empty() {
        println!("No compute platforms found");
        return Ok(platforms);
    }

    for platform in &platforms {
        println!("Platform {}: {}", platform.id, platform.name());
        for device in &platform.devices {
            println!("  Device {}: {}", device.index, device.name);
            println!("    Vendor: {} (0x{:04x})", device.vendor, device.vendor_id);
            println!("    Type: {} ({:?})", device.kind, device.device_type);
            if !device.driver.is_empty() {
                println!("    Driver: {}", device.driver);
            }
            println!("    Timestamp queries: {}", device.timestamp_queries);
            println!(
                "    Max workgroup: {:?}, {} invocations",
                device.max_workgroup_size, device.max_invocations_per_workgroup
            );
            println!("    Max buffer size: {} bytes", device.max_buffer_size);
        }
    }

    let policy = &harness.config().selection;
    match tessera_runtime::select_device(&platforms, policy) {
        Ok((p, d)) => println!("\nSelected by {policy}: platform {p}, device {d}"),
        Err(e) => println!("\n{e}"),
    }
    Ok(platforms)
}
