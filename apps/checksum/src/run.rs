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

use dpu_platform::{
    fetch_records, reduce, verify, DeviceSet, DpuRuntime, Error, NrDpus, ReducedResult,
    RunReport, Workload, DPU_BUFFER, DPU_INPUT_SIZE,
};
use itertools::Itertools;

use crate::Config;

/// Steps of a run, in order. `Released` is always the last one, whether
/// the run succeeded or not.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Allocated,
    Loaded,
    DataPushed,
    Executing,
    ResultsPulled,
    Reduced,
    Reported,
    Released,
}

/// The states a run went through.
#[derive(Clone, Debug, Default)]
pub struct Trace {
    states: Vec<RunState>,
}

impl Trace {
    fn enter(&mut self, state: RunState) {
        match self.states.last() {
            Some(last) => log::debug!("{:?} -> {:?}", last, state),
            None => log::debug!("-> {:?}", state),
        }
        self.states.push(state);
    }

    pub fn states(&self) -> &[RunState] {
        &self.states
    }

    pub fn last(&self) -> Option<RunState> {
        self.states.last().copied()
    }
}

/// First error seen on each DPU of the set. A DPU with an error takes no
/// further part in the run.
struct Failures(Vec<Option<Error>>);

impl Failures {
    fn new(len: usize) -> Self {
        Self(vec![None; len])
    }

    fn record(&mut self, index: usize, error: Error) {
        log::error!("DPU {}: {}", index, error);
        self.0[index].get_or_insert(error);
    }

    fn record_all(&mut self, status: Vec<Result<(), Error>>) {
        for (index, status) in status.into_iter().enumerate() {
            if let Err(e) = status {
                self.record(index, e);
            }
        }
    }

    fn healthy(&self) -> Vec<usize> {
        self.0.iter().positions(Option::is_none).collect()
    }
}

/// Runs the checksum pipeline once on `nr_dpus` DPUs of `runtime`.
///
/// Allocation and load errors abort the run. Any other error is local to
/// the DPU it happened on, and ends up in that DPU's report entry. The
/// device set is released before returning in every case.
pub fn run<R: DpuRuntime + ?Sized>(
    runtime: &mut R,
    config: &Config,
    nr_dpus: NrDpus,
    nr_tasklets: usize,
    trace: &mut Trace,
) -> Result<RunReport, Error> {
    trace.enter(RunState::Idle);
    let result = check_parameters(config, nr_tasklets).and_then(|()| {
        let workload = Workload::generate(config.seed, config.buffer_size);
        run_workload(runtime, config, nr_dpus, nr_tasklets, &workload, trace)
    });
    trace.enter(RunState::Released);
    result
}

fn check_parameters(config: &Config, nr_tasklets: usize) -> Result<(), Error> {
    config.validate()?;
    if nr_tasklets == 0 {
        return Err(Error::InvalidConfig(
            "nr_tasklets must be at least 1".to_string(),
        ));
    }
    Ok(())
}

fn run_workload<R: DpuRuntime + ?Sized>(
    runtime: &mut R,
    config: &Config,
    nr_dpus: NrDpus,
    nr_tasklets: usize,
    workload: &Workload,
    trace: &mut Trace,
) -> Result<RunReport, Error> {
    let mut set = DeviceSet::acquire(runtime, nr_dpus)?;
    log::info!("Allocated {} DPU(s)", set.len());
    trace.enter(RunState::Allocated);

    set.load(&config.binary_path)?;
    trace.enter(RunState::Loaded);

    log::info!("Load input data");
    let mut failures = Failures::new(set.len());
    let declares_input_size = set
        .image()
        .map_or(false, |image| image.symbol(DPU_INPUT_SIZE).is_some());
    if declares_input_size {
        // validated configs keep the buffer size within 32 bits
        let input_size = workload.len() as u32;
        failures.record_all(set.push(DPU_INPUT_SIZE, 0, &input_size.to_le_bytes()));
    }
    failures.record_all(set.push(DPU_BUFFER, 0, workload.buffer()));
    trace.enter(RunState::DataPushed);

    log::info!("Run program on DPU(s)");
    trace.enter(RunState::Executing);
    failures.record_all(set.run());

    log::info!("Display DPU Logs");
    for index in 0..set.len() {
        match set.read_log(index) {
            Ok(text) => log::info!("DPU#{}:\n{}", index, text.trim_end()),
            Err(e) => log::warn!("cannot read the log of DPU {}: {}", index, e),
        }
    }

    log::info!("Retrieve results");
    let healthy = failures.healthy();
    let pulled = fetch_records(&mut set, &healthy, nr_tasklets, config.pull_strategy);
    let mut reduced: Vec<Option<ReducedResult>> = vec![None; set.len()];
    for (index, records) in healthy.into_iter().zip(pulled) {
        match records.and_then(|records| reduce(&records, nr_tasklets)) {
            Ok(result) => reduced[index] = Some(result),
            Err(e) => failures.record(index, e),
        }
    }
    trace.enter(RunState::ResultsPulled);

    let entries = reduced
        .into_iter()
        .zip(failures.0)
        .zip(set.dpus())
        .enumerate()
        .map(|(index, ((reduced, failure), dpu))| {
            let result = match (reduced, failure) {
                (_, Some(e)) => Err(e),
                (Some(reduced), None) => Ok(reduced),
                (None, None) => Err(Error::Protocol {
                    dpu: Some(*dpu),
                    reason: "no result".to_string(),
                }),
            };
            (index, *dpu, result)
        })
        .collect::<Vec<_>>();
    trace.enter(RunState::Reduced);

    let report = verify(entries, workload.reference(), workload.len());
    if report.success() {
        log::info!("{} DPU(s) verified", report.entries.len());
    } else {
        log::warn!(
            "{} of {} DPU(s) failed",
            report.failed().count(),
            report.entries.len()
        );
    }
    trace.enter(RunState::Reported);
    Ok(report)
}
