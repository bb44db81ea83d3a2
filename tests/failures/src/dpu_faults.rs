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

//! Test that we can induce DPU faults (bus errors and crashes) and that the
//! orchestrator survives them, reporting every DPU and releasing the set.

use checksum::{Config, RunState, Trace};
use dpu_platform::{
    DpuRuntime, DpuStatus, Error, FailureProperties, NrDpus, RunReport, SimulatedRuntime,
    SimulatorConfiguration, DPU_BUFFER, DPU_INPUT_SIZE,
};
use itertools::Itertools;
use std::collections::{HashMap, HashSet};

const NR_DPUS: usize = 8;

/// Runs the checksum on `NR_DPUS` DPUs. Returns the report and whether the
/// device set was released.
pub fn run_simulate_dpu_faults(failures: FailureProperties) -> (RunReport, bool) {
    let mut runtime = SimulatedRuntime::with_failures(
        SimulatorConfiguration {
            nr_ranks: 1,
            dpus_per_rank: NR_DPUS,
            ..Default::default()
        },
        failures,
    );
    let config = Config {
        buffer_size: 1 << 14,
        pull_strategy: dpu_platform::PullStrategy::Batched,
        ..Default::default()
    };
    let mut trace = Trace::default();
    let report = checksum::run(&mut runtime, &config, NrDpus::All, 16, &mut trace)
        .expect("Failed to run checksum");
    let released =
        trace.last() == Some(RunState::Released) && runtime.available() == NR_DPUS;
    (report, released)
}

/// Short status of every DPU, e.g. `0:ok 1:transfer 2:fault 3:mismatch`.
pub fn summarize(report: &RunReport) -> String {
    report
        .entries
        .iter()
        .map(|e| {
            let status = match &e.status {
                DpuStatus::Match => "ok",
                DpuStatus::Mismatch => "mismatch",
                DpuStatus::Failed(Error::Transfer { .. }) => "transfer",
                DpuStatus::Failed(Error::ExecutionFault { .. }) => "fault",
                DpuStatus::Failed(_) => "error",
            };
            format!("{}:{}", e.index, status)
        })
        .join(" ")
}

pub fn mixed_failures() -> FailureProperties {
    FailureProperties {
        transfer_faults: HashMap::from([
            (1, DPU_BUFFER.to_string()),
            (6, DPU_INPUT_SIZE.to_string()),
        ]),
        induced_faults: HashSet::from([2, 5]),
        corrupted_results: HashMap::from([(3, 0)]),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dpu_faults() {
        let _ = env_logger::try_init();
        let (report, released) = run_simulate_dpu_faults(FailureProperties::default());
        assert!(released);
        assert_eq!(summarize(&report), (0..NR_DPUS).map(|i| format!("{}:ok", i)).join(" "));

        let (report, released) = run_simulate_dpu_faults(mixed_failures());
        log::info!("Mixed failures: {}", summarize(&report));
        assert!(released);
        assert_eq!(
            summarize(&report),
            "0:ok 1:transfer 2:fault 3:mismatch 4:ok 5:fault 6:transfer 7:ok"
        );
        assert_eq!(report.exit_code(), dpu_platform::EX_SOFTWARE);
    }
}
