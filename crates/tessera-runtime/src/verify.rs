//! Comparison of device output against a host reference.

use std::fmt;

/// Default absolute tolerance per element.
pub const DEFAULT_TOLERANCE: f32 = 1e-5;

/// Where two result arrays first disagree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Mismatch {
    Length { device: usize, reference: usize },
    Value { index: usize, device: f32, reference: f32 },
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mismatch::Length { device, reference } => {
                write!(f, "device produced {device} elements, reference has {reference}")
            }
            Mismatch::Value {
                index,
                device,
                reference,
            } => write!(f, "element {index}: device {device}, reference {reference}"),
        }
    }
}

/// Outcome of a verification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    Passed,
    Failed(Mismatch),
}

impl Verdict {
    pub fn passed(&self) -> bool {
        matches!(self, Verdict::Passed)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Passed => f.write_str("Passed"),
            Verdict::Failed(_) => f.write_str("Failed"),
        }
    }
}

/// Element-wise absolute-difference check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceVerifier {
    tolerance: f32,
}

impl Default for ReferenceVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceVerifier {
    pub fn new() -> Self {
        Self::with_tolerance(DEFAULT_TOLERANCE)
    }

    pub fn with_tolerance(tolerance: f32) -> Self {
        Self { tolerance }
    }

    pub fn tolerance(&self) -> f32 {
        self.tolerance
    }

    /// Stops at the first element outside tolerance. NaN never passes.
    pub fn verify(&self, device: &[f32], reference: &[f32]) -> Verdict {
        if device.len() != reference.len() {
            return Verdict::Failed(Mismatch::Length {
                device: device.len(),
                reference: reference.len(),
            });
        }

        let first_bad = device
            .iter()
            .zip(reference)
            .position(|(&d, &r)| !((d - r).abs() <= self.tolerance));

        match first_bad {
            None => Verdict::Passed,
            Some(index) => {
                let mismatch = Mismatch::Value {
                    index,
                    device: device[index],
                    reference: reference[index],
                };
                tracing::debug!(%mismatch, tolerance = self.tolerance, "Verification failed");
                Verdict::Failed(mismatch)
            }
        }
    }
}
