//! Exercise orchestrators end to end on a real device.

use tessera_cli::exercises::matmul::{self, MatMulConfig};
use tessera_cli::exercises::Harness;
use tessera_kernels::{embedded_source, programs, DirectorySources, EmbeddedSources};
use tessera_runtime::PipelineConfig;

const RAGGED: MatMulConfig = MatMulConfig {
    height_a: 37,
    width_a: 21,
    width_b: 50,
};

const TILED_STORE: &str = "    if (row < height_a && col < width_b) {\n        c[row * width_b + col] = sum;\n    }";

#[test]
#[ignore] // Requires GPU
fn test_matmul_checks_both_kernels() {
    let harness = Harness::new(PipelineConfig::default(), Box::new(EmbeddedSources));
    let report = matmul::run(&harness, &RAGGED).unwrap();

    assert_eq!(report.runs.len(), 2);
    assert_eq!(report.runs[0].kernel, "matrix_mul_naive");
    assert_eq!(report.runs[1].kernel, "matrix_mul_tiled");
    assert!(report.passed(), "{report}");
}

#[test]
#[ignore] // Requires GPU
fn test_matmul_tiled_verdict_does_not_inherit_naive_output() {
    let text = embedded_source(programs::MATRIX_MUL).unwrap();
    assert!(text.contains(TILED_STORE));
    // The tiled kernel keeps its bindings but never stores the product.
    let silent = text.replace(
        TILED_STORE,
        "    if (row < height_a && col < width_b) {\n        c[row * width_b + col] = c[row * width_b + col];\n    }",
    );

    let dir = std::env::temp_dir().join(format!("tessera-matmul-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("matrix_mul.wgsl"), silent).unwrap();

    let harness = Harness::new(PipelineConfig::default(), Box::new(DirectorySources::new(&dir)));
    let report = matmul::run(&harness, &RAGGED);
    std::fs::remove_dir_all(&dir).unwrap();
    let report = report.unwrap();

    assert!(report.runs[0].verdict.passed());
    assert!(!report.runs[1].verdict.passed());
    assert!(!report.passed());
}
