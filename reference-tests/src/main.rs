//! Reference test binary entry point
//!
//! Runs every shipped scene with its expectations and exits non-zero if any
//! check fails. Paths are relative to the workspace root.

use anyhow::Result;
use glam::DVec3;
use reference_tests::{
    EnergyCheck, ExpectedResult, PopulationCheck, PositionBoundsCheck, ReferenceTest, SettlingCheck,
    TestResult,
};

/// Column of glass beads settling in an open box.
fn settling_column_test() -> ReferenceTest {
    ReferenceTest {
        name: "Settling Column".to_string(),
        config_path: "configs/settling_column.json".into(),
        expected: ExpectedResult {
            position_bounds: Some(PositionBoundsCheck {
                min: DVec3::splat(-0.001),
                max: DVec3::new(0.061, 0.151, 0.061),
            }),
            settling: Some(SettlingCheck {
                floor_y: 0.0,
                max_height: 0.07,
            }),
            energy: Some(EnergyCheck {
                max_kinetic_per_body: 1e-6,
            }),
            population: Some(PopulationCheck { min: 2000, max: 2000 }),
        },
    }
}

/// Sand draining through a conical hopper onto a floor.
fn hopper_discharge_test() -> ReferenceTest {
    ReferenceTest {
        name: "Hopper Discharge".to_string(),
        config_path: "configs/hopper_discharge.json".into(),
        expected: ExpectedResult {
            position_bounds: Some(PositionBoundsCheck {
                min: DVec3::new(-0.15, -0.05, -0.15),
                max: DVec3::new(0.15, 0.3, 0.15),
            }),
            population: Some(PopulationCheck { min: 700, max: 800 }),
            ..ExpectedResult::default()
        },
    }
}

/// Three-sphere clumps injected into a box.
fn clump_pour_test() -> ReferenceTest {
    ReferenceTest {
        name: "Clump Pour".to_string(),
        config_path: "configs/clump_pour.json".into(),
        expected: ExpectedResult {
            position_bounds: Some(PositionBoundsCheck {
                min: DVec3::splat(-0.001),
                max: DVec3::new(0.101, 0.121, 0.101),
            }),
            settling: Some(SettlingCheck {
                floor_y: 0.0,
                max_height: 0.09,
            }),
            population: Some(PopulationCheck { min: 400, max: 500 }),
            ..ExpectedResult::default()
        },
    }
}

/// Get all reference tests
fn all_tests() -> Vec<ReferenceTest> {
    vec![settling_column_test(), hopper_discharge_test(), clump_pour_test()]
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    tracing::info!("DEM Reference Test Suite");
    tracing::info!("========================");

    let tests = all_tests();
    tracing::info!("Found {} reference tests", tests.len());

    let mut results: Vec<TestResult> = Vec::new();
    let mut passed_count = 0;
    let mut failed_count = 0;

    for test in tests {
        match test.run() {
            Ok(result) => {
                if result.passed {
                    passed_count += 1;
                } else {
                    failed_count += 1;
                }
                result.print_summary();
                results.push(result);
            }
            Err(e) => {
                eprintln!("\nERROR running test {}: {:#}", test.name, e);
                failed_count += 1;
            }
        }
    }

    println!("\n{}", "=".repeat(80));
    println!("OVERALL SUMMARY");
    println!("{}", "=".repeat(80));
    println!("Total tests: {}", results.len());
    println!("Passed: {}", passed_count);
    println!("Failed: {}", failed_count);
    println!("{}", "=".repeat(80));

    if failed_count > 0 {
        anyhow::bail!("{failed_count} reference test(s) failed");
    }
    Ok(())
}
