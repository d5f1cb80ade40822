//! Tessera CLI - run tiled compute exercises on a selected device.

use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use tessera_cli::cli::{Cli, Commands};
use tessera_cli::exercises::{
    devices, fir, matmul, profiling, transpose, vector_add, ExerciseReport, Harness,
};

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    tessera_cli::init_tracing(cli.global.verbose);

    let harness = Harness::from_args(&cli.global)?;

    let report = match cli.command {
        Commands::Devices => {
            devices::list(&harness)?;
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Vadd { num_elements } => {
            vector_add::run(&harness, &vector_add::VectorAddConfig { num_elements })?
        }
        Commands::VaddProf { num_elements } => {
            profiling::run(&harness, &vector_add::VectorAddConfig { num_elements })?
        }
        Commands::Matmul {
            height_a,
            width_a,
            width_b,
        } => matmul::run(
            &harness,
            &matmul::MatMulConfig {
                height_a,
                width_a,
                width_b,
            },
        )?,
        Commands::Fir {
            taps,
            samples,
            seed,
        } => fir::run(
            &harness,
            &fir::FirConfig {
                taps,
                samples,
                seed,
            },
        )?,
        Commands::Transpose { height, width } => {
            transpose::run(&harness, &transpose::TransposeConfig { height, width })?
        }
    };

    Ok(finish(&report))
}

fn finish(report: &ExerciseReport) -> ExitCode {
    print!("{report}");
    if report.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
