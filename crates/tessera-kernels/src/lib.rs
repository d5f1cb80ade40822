//! Compute kernels for the tessera exercises.
//!
//! Each program is a WGSL module embedded at build time:
//!
//! | Program      | Entry points                              | Arguments                                   |
//! |--------------|-------------------------------------------|---------------------------------------------|
//! | `vector_add` | `vector_add`                              | c, a, b, num_elements                       |
//! | `matrix_mul` | `matrix_mul_naive`, `matrix_mul_tiled`    | a, b, c, width_a, width_b, height_a         |
//! | `transpose`  | `matrix_transpose`                        | a, a_t, height, width                       |
//! | `fir`        | `fir`                                     | output, coeff, history, num_taps            |
//!
//! 1-D kernels use [`TILE_1D`]-wide workgroups, 2-D kernels [`TILE_2D`]. The
//! dispatch tile must match, since WGSL fixes the workgroup size. The [`reference`]
//! module holds the host implementations used for verification.

pub mod reference;
mod sources;

pub use sources::{
    embedded_source, entry_points, programs, DirectorySources, EmbeddedSources, TILE_1D, TILE_2D,
};
