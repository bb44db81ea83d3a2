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

//! Repeated runs of the checksum pipeline, optionally taking failing DPUs
//! out of the pool between iterations.

use dpu_platform::{
    DpuId, DpuReport, DpuRuntime, DpuStatus, Error, NrDpus, RunReport, EX_SOFTWARE,
};
use itertools::Itertools;
use std::fmt;

use crate::run::{run, Trace};
use crate::Config;

/// Outcome of one iteration.
#[derive(Debug)]
pub struct Iteration {
    pub seed: u64,
    pub trace: Trace,
    pub report: Result<RunReport, Error>,
}

impl Iteration {
    pub fn success(&self) -> bool {
        self.report.as_ref().map_or(false, RunReport::success)
    }
}

#[derive(Debug, Default)]
pub struct StressSummary {
    pub iterations: Vec<Iteration>,
    /// DPUs taken out of the pool, in the order they were disabled.
    pub disabled: Vec<DpuId>,
}

impl StressSummary {
    pub fn passes(&self) -> usize {
        self.iterations.iter().filter(|i| i.success()).count()
    }

    pub fn failures(&self) -> usize {
        self.iterations.len() - self.passes()
    }

    pub fn success(&self) -> bool {
        !self.iterations.is_empty() && self.failures() == 0
    }

    pub fn exit_code(&self) -> i32 {
        if self.success() {
            0
        } else {
            EX_SOFTWARE
        }
    }
}

impl fmt::Display for StressSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} iteration(s): {} passed, {} failed",
            self.iterations.len(),
            self.passes(),
            self.failures()
        )?;
        if !self.disabled.is_empty() {
            write!(f, "; disabled DPU(s): {}", self.disabled.iter().format(", "))?;
        }
        Ok(())
    }
}

/// Whether the DPU itself is to blame for the entry's failure. Protocol and
/// configuration errors come from the host side and leave the DPU in service.
fn dpu_at_fault(entry: &DpuReport) -> bool {
    matches!(
        entry.status,
        DpuStatus::Mismatch
            | DpuStatus::Failed(Error::ExecutionFault { .. })
            | DpuStatus::Failed(Error::Transfer { .. })
    )
}

/// Runs the pipeline `config.iterations` times, iteration `i` with seed
/// `config.seed + i`. A failed iteration does not stop the following ones.
pub fn stress<R: DpuRuntime + ?Sized>(
    runtime: &mut R,
    config: &Config,
    nr_dpus: NrDpus,
    nr_tasklets: usize,
) -> StressSummary {
    let mut summary = StressSummary::default();
    for i in 0..config.iterations {
        let iteration_config = Config {
            seed: config.seed.wrapping_add(i as u64),
            ..config.clone()
        };
        let mut trace = Trace::default();
        let report = run(runtime, &iteration_config, nr_dpus, nr_tasklets, &mut trace);
        match &report {
            Ok(report) if report.success() => {
                log::info!("iteration {}: {} DPU(s) verified", i, report.entries.len())
            }
            Ok(report) => {
                log::warn!("iteration {}: {} DPU(s) failed", i, report.failed().count());
                if config.disable_failing {
                    // the set is released by now, so its DPUs can be disabled
                    for entry in report.failed().filter(|e| dpu_at_fault(e)) {
                        match runtime.disable(entry.dpu) {
                            Ok(()) => summary.disabled.push(entry.dpu),
                            Err(e) => log::error!("cannot disable DPU {}: {}", entry.dpu, e),
                        }
                    }
                }
            }
            Err(e) => log::error!("iteration {}: {}", i, e),
        }
        summary.iterations.push(Iteration {
            seed: iteration_config.seed,
            trace,
            report,
        });
    }
    log::info!("{}", summary);
    summary
}
