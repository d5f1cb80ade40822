//! Hardware-free checks that every embedded kernel builds and exposes the
//! argument layout the exercises bind.

use tessera_kernels::{entry_points, programs, EmbeddedSources, TILE_1D, TILE_2D};
use tessera_runtime::{ParamKind, ProgramSource, RuntimeError, SourceProvider};

const READ: Option<ParamKind> = Some(ParamKind::Storage { read_only: true });
const WRITE: Option<ParamKind> = Some(ParamKind::Storage { read_only: false });
const U32: Option<ParamKind> = Some(ParamKind::Uniform { size: 4 });

fn parse(name: &str) -> ProgramSource {
    let text = EmbeddedSources.kernel_source(name).expect("embedded source");
    ProgramSource::parse(name, &text)
        .unwrap_or_else(|e| panic!("embedded program '{name}' failed to build: {e}"))
}

#[test]
fn test_vector_add_signature() {
    let sig = parse(programs::VECTOR_ADD)
        .signature(entry_points::VECTOR_ADD)
        .unwrap();
    assert_eq!(sig.workgroup_size, [256, 1, 1]);
    assert_eq!(sig.params, vec![WRITE, READ, READ, U32]);
}

#[test]
fn test_matrix_mul_has_two_kernels_with_same_arguments() {
    let source = parse(programs::MATRIX_MUL);
    assert_eq!(
        source.entry_points(),
        vec![entry_points::MATRIX_MUL_NAIVE, entry_points::MATRIX_MUL_TILED]
    );

    let naive = source.signature(entry_points::MATRIX_MUL_NAIVE).unwrap();
    let tiled = source.signature(entry_points::MATRIX_MUL_TILED).unwrap();
    assert_eq!(naive.workgroup_size, [16, 16, 1]);
    assert_eq!(naive.params, vec![READ, READ, WRITE, U32, U32, U32]);
    assert_eq!(naive.params, tiled.params);
    assert_eq!(naive.workgroup_size, tiled.workgroup_size);
}

#[test]
fn test_transpose_signature() {
    let sig = parse(programs::TRANSPOSE)
        .signature(entry_points::TRANSPOSE)
        .unwrap();
    assert_eq!(sig.workgroup_size, [16, 16, 1]);
    assert_eq!(sig.params, vec![READ, WRITE, U32, U32]);
}

#[test]
fn test_fir_signature() {
    let sig = parse(programs::FIR).signature(entry_points::FIR).unwrap();
    assert_eq!(sig.workgroup_size, [256, 1, 1]);
    assert_eq!(sig.params, vec![WRITE, READ, READ, U32]);
}

#[test]
fn test_tiles_match_every_kernel_workgroup() {
    let kernels = [
        (programs::VECTOR_ADD, entry_points::VECTOR_ADD, [TILE_1D, 1, 1]),
        (programs::FIR, entry_points::FIR, [TILE_1D, 1, 1]),
        (programs::MATRIX_MUL, entry_points::MATRIX_MUL_NAIVE, [TILE_2D[0], TILE_2D[1], 1]),
        (programs::MATRIX_MUL, entry_points::MATRIX_MUL_TILED, [TILE_2D[0], TILE_2D[1], 1]),
        (programs::TRANSPOSE, entry_points::TRANSPOSE, [TILE_2D[0], TILE_2D[1], 1]),
    ];
    for (program, entry, tile) in kernels {
        let sig = parse(program).signature(entry).unwrap();
        assert_eq!(sig.workgroup_size, tile, "{entry}");
    }
}

#[test]
fn test_corrupted_kernel_reports_build_log() {
    let text = EmbeddedSources.kernel_source(programs::FIR).unwrap();
    let corrupted = text.replace("sum = sum + coeff[j] * history[i + j];", "sum = sum + coeff[j] * ;");

    match ProgramSource::parse(programs::FIR, &corrupted) {
        Err(RuntimeError::BuildFailed { log }) => {
            assert!(!log.is_empty());
            assert!(log.contains("fir"));
        }
        other => panic!("expected BuildFailed, got {other:?}"),
    }
}
