// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Test that flipping bits on the way to MRAM shows up as checksum
//! mismatches, and only on the DPUs that were hit.

use checksum::{Config, Trace};
use dpu_platform::{
    DpuStatus, FailureProperties, NrDpus, RunReport, SimulatedRuntime, SimulatorConfiguration,
};

pub const NR_DPUS: usize = 64;

/// Runs the checksum once on every DPU with the given MRAM bit flip rate,
/// returning the report.
pub fn simulate_bit_flips(mram_bit_flip_rate: f64) -> RunReport {
    let mut runtime = SimulatedRuntime::with_failures(
        SimulatorConfiguration::default(),
        FailureProperties {
            mram_bit_flip_rate,
            // Note: default RNG behavior is deterministic.
            ..Default::default()
        },
    );
    let config = Config {
        buffer_size: 1 << 14,
        ..Default::default()
    };
    checksum::run(
        &mut runtime,
        &config,
        NrDpus::Count(NR_DPUS),
        16,
        &mut Trace::default(),
    )
    .expect("Failed to run checksum")
}

pub fn count_mismatches(report: &RunReport) -> usize {
    report
        .entries
        .iter()
        .filter(|e| e.status == DpuStatus::Mismatch)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_flips() {
        let _ = env_logger::try_init();

        // Sanity check, without flips every DPU matches.
        let report = simulate_bit_flips(0.0);
        assert!(report.success());

        // Every push is hit: each DPU sums a buffer with exactly one bit
        // flipped, so no checksum can match.
        let report = simulate_bit_flips(1.0);
        assert_eq!(count_mismatches(&report), NR_DPUS);

        // With a coin flip per push, some DPUs are hit and some are not.
        let report = simulate_bit_flips(0.5);
        let mismatches = count_mismatches(&report);
        log::info!("Half corruption: {} mismatches", mismatches);
        assert!(mismatches > 0 && mismatches < NR_DPUS);
        assert_eq!(report.failed().count(), mismatches);
    }
}
