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

use env_logger::Target;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::{Path, PathBuf};

use checksum::{Config, RunState, Trace};
use dpu_platform::{
    Checksum, DpuStatus, Error, FailureProperties, Kernel, NrDpus, ProgramImage, PullStrategy,
    ReducedResult, RunReport, SimulatedRuntime, SimulatorConfiguration, Tasklet, Workload,
    DPU_BUFFER, DPU_INPUT_SIZE, DPU_RESULTS, EX_SOFTWARE, RECORD_SIZE,
};

const CYCLES: [u32; 4] = [100, 150, 120, 200];

fn init_logs(name: &str) {
    let logpath = Path::new("/tmp/checksum-logs");
    std::fs::create_dir_all(logpath)
        .unwrap_or_else(|_| panic!("Failed to create logs dir: {}", logpath.display()));
    let logfile = File::create(logpath.join(format!("{}.log", name)))
        .expect("Failed to create log file");
    let _logger = env_logger::builder()
        .target(Target::Pipe(Box::new(logfile)))
        .is_test(true)
        .try_init();
}

fn write_image(name: &str, image: &ProgramImage) -> PathBuf {
    let path = std::env::temp_dir().join(format!("{}-{}.yaml", name, std::process::id()));
    let file = File::create(&path).expect("Failed to create image file");
    serde_yaml::to_writer(file, image).expect("Failed to write image");
    path
}

/// Stands in for the DPU program: every tasklet sums the whole input and
/// reports a quarter of it, the last tasklet taking the remainder.
#[derive(Debug)]
struct QuarterSums {
    corrupt: Option<usize>,
}

impl Kernel for QuarterSums {
    fn run_tasklet(&self, tasklet: &mut Tasklet<'_>) -> Result<(), String> {
        let word = tasklet.read(DPU_INPUT_SIZE, 0, 4)?;
        let size = u32::from_le_bytes([word[0], word[1], word[2], word[3]]) as usize;
        let sum = tasklet
            .read(DPU_BUFFER, 0, size)?
            .iter()
            .map(|b| *b as u32)
            .sum::<u32>();
        let id = tasklet.id();
        let nr = tasklet.nr_tasklets() as u32;
        let mut checksum = sum / nr;
        if id + 1 == tasklet.nr_tasklets() {
            checksum += sum % nr;
        }
        if self.corrupt == Some(id) {
            checksum += 1;
        }
        let mut record = Vec::with_capacity(RECORD_SIZE);
        record.extend_from_slice(&checksum.to_le_bytes());
        record.extend_from_slice(&CYCLES[id % CYCLES.len()].to_le_bytes());
        tasklet.write(DPU_RESULTS, id * RECORD_SIZE, &record)
    }
}

fn quarter_sums_run(name: &str, corrupt: Option<usize>) -> (RunReport, Trace) {
    let mut runtime = SimulatedRuntime::new(SimulatorConfiguration::default());
    runtime.register_kernel("quarter_sums", QuarterSums { corrupt });
    let image = ProgramImage {
        kernel: "quarter_sums".to_string(),
        ..ProgramImage::checksum(4, 8 << 20)
    };
    let config = Config {
        binary_path: write_image(name, &image),
        seed: 0,
        buffer_size: 8 << 20,
        ..Default::default()
    };
    let mut trace = Trace::default();
    let report = checksum::run(&mut runtime, &config, NrDpus::Count(1), 4, &mut trace)
        .expect("Failed to run checksum");
    assert_eq!(runtime.allocated(), 0);
    (report, trace)
}

fn statuses(report: &RunReport) -> Vec<DpuStatus> {
    report.entries.iter().map(|e| e.status.clone()).collect()
}

#[test]
fn end_to_end() {
    init_logs("end_to_end");
    let (report, trace) = quarter_sums_run("end_to_end", None);
    let reference = Workload::generate(0, 8 << 20).reference();
    assert_eq!(report.reference, reference);
    assert_eq!(
        report.entries[0].reduced,
        Some(ReducedResult {
            checksum: reference.to_device_width().unwrap(),
            cycles: 200,
        })
    );
    assert_eq!(statuses(&report), vec![DpuStatus::Match]);
    assert!(report.success());
    assert_eq!(report.exit_code(), 0);
    assert_eq!(trace.last(), Some(RunState::Released));
}

#[test]
fn mismatch() {
    init_logs("mismatch");
    let (report, trace) = quarter_sums_run("mismatch", Some(2));
    let reference = Workload::generate(0, 8 << 20).reference();
    assert_eq!(
        report.entries[0].reduced.map(|r| r.checksum),
        Some(reference.to_device_width().unwrap() + 1)
    );
    assert_eq!(statuses(&report), vec![DpuStatus::Mismatch]);
    assert_eq!(report.exit_code(), EX_SOFTWARE);
    assert!(report.to_string().contains("[ERROR] checksums differ!"));
    assert_eq!(trace.last(), Some(RunState::Released));
}

fn faulty_run(name: &str, failures: FailureProperties, nr_dpus: usize) -> RunReport {
    init_logs(name);
    let mut runtime = SimulatedRuntime::with_failures(SimulatorConfiguration::default(), failures);
    let config = Config {
        buffer_size: 1 << 16,
        ..Default::default()
    };
    let mut trace = Trace::default();
    let report = checksum::run(
        &mut runtime,
        &config,
        NrDpus::Count(nr_dpus),
        16,
        &mut trace,
    )
    .expect("Failed to run checksum");
    // the set is released exactly once, whatever failed
    assert_eq!(runtime.allocated(), 0);
    assert_eq!(runtime.stats().releases, 1);
    assert_eq!(runtime.stats().released_dpus, nr_dpus);
    assert_eq!(trace.last(), Some(RunState::Released));
    report
}

#[test]
fn mismatch_on_one_dpu() {
    let report = faulty_run(
        "mismatch_on_one_dpu",
        FailureProperties {
            corrupted_results: HashMap::from([(1, 5)]),
            ..Default::default()
        },
        3,
    );
    assert_eq!(
        statuses(&report),
        vec![DpuStatus::Match, DpuStatus::Mismatch, DpuStatus::Match]
    );
    assert_eq!(report.exit_code(), EX_SOFTWARE);
}

#[test]
fn transfer_fault_on_one_dpu() {
    let report = faulty_run(
        "transfer_fault_on_one_dpu",
        FailureProperties {
            transfer_faults: HashMap::from([(1, DPU_BUFFER.to_string())]),
            ..Default::default()
        },
        3,
    );
    assert!(report.entries[0].passed());
    assert!(matches!(
        report.entries[1].status,
        DpuStatus::Failed(Error::Transfer { .. })
    ));
    assert_eq!(report.entries[1].reduced, None);
    assert!(report.entries[2].passed());
    assert!(!report.success());
}

#[test]
fn execution_fault_on_one_dpu() {
    let report = faulty_run(
        "execution_fault_on_one_dpu",
        FailureProperties {
            induced_faults: HashSet::from([0]),
            ..Default::default()
        },
        2,
    );
    assert!(matches!(
        report.entries[0].status,
        DpuStatus::Failed(Error::ExecutionFault { .. })
    ));
    assert!(report.entries[1].passed());
}

#[test]
fn result_pull_fault() {
    let report = faulty_run(
        "result_pull_fault",
        FailureProperties {
            transfer_faults: HashMap::from([(0, DPU_RESULTS.to_string())]),
            ..Default::default()
        },
        2,
    );
    assert!(matches!(
        report.entries[0].status,
        DpuStatus::Failed(Error::Transfer { .. })
    ));
    assert!(report.entries[1].passed());
}

#[test]
fn tasklet_count_mismatch() {
    init_logs("tasklet_count_mismatch");
    let mut runtime = SimulatedRuntime::new(SimulatorConfiguration::default());
    let config = Config {
        buffer_size: 1 << 16,
        ..Default::default()
    };
    let mut trace = Trace::default();
    // the default image has 16 tasklets
    let report = checksum::run(&mut runtime, &config, NrDpus::Count(2), 12, &mut trace)
        .expect("Failed to run checksum");
    for entry in &report.entries {
        assert!(matches!(
            entry.status,
            DpuStatus::Failed(Error::Protocol { dpu: Some(_), .. })
        ));
    }
    assert_eq!(report.exit_code(), EX_SOFTWARE);
}

#[test]
fn huge_tasklet_count() {
    init_logs("huge_tasklet_count");
    let mut runtime = SimulatedRuntime::new(SimulatorConfiguration::default());
    let config = Config {
        buffer_size: 1 << 12,
        ..Default::default()
    };
    let mut trace = Trace::default();
    let report = checksum::run(
        &mut runtime,
        &config,
        NrDpus::Count(1),
        usize::MAX / 4,
        &mut trace,
    )
    .expect("Failed to run checksum");
    assert!(matches!(
        report.entries[0].status,
        DpuStatus::Failed(Error::Protocol { dpu: Some(_), .. })
    ));
    assert_eq!(report.exit_code(), EX_SOFTWARE);
    assert_eq!(trace.last(), Some(RunState::Released));
}

#[test]
fn pull_strategies_agree() {
    init_logs("pull_strategies_agree");
    let reduced = [
        PullStrategy::PerTasklet,
        PullStrategy::WholeRegion,
        PullStrategy::Batched,
    ]
    .iter()
    .map(|strategy| {
        let mut runtime = SimulatedRuntime::new(SimulatorConfiguration::default());
        let config = Config {
            buffer_size: 100_000,
            seed: 3,
            pull_strategy: *strategy,
            ..Default::default()
        };
        let report = checksum::run(
            &mut runtime,
            &config,
            NrDpus::Count(4),
            16,
            &mut Trace::default(),
        )
        .expect("Failed to run checksum");
        assert!(report.success());
        report
            .entries
            .iter()
            .map(|e| e.reduced)
            .collect::<Vec<_>>()
    })
    .collect::<Vec<_>>();
    assert_eq!(reduced[0], reduced[1]);
    assert_eq!(reduced[1], reduced[2]);
}

#[test]
fn whole_region_without_input_size() {
    init_logs("whole_region_without_input_size");
    let image = ProgramImage::new("checksum_dpu", "checksum", 8)
        .with_symbol(DPU_BUFFER, dpu_platform::MemoryKind::Mram, 10_000)
        .with_symbol(DPU_RESULTS, dpu_platform::MemoryKind::Wram, 8 * RECORD_SIZE);
    let config = Config {
        binary_path: write_image("whole_region_without_input_size", &image),
        buffer_size: 10_000,
        seed: 11,
        ..Default::default()
    };
    let mut runtime = SimulatedRuntime::new(SimulatorConfiguration::default());
    let report = checksum::run(
        &mut runtime,
        &config,
        NrDpus::Count(1),
        8,
        &mut Trace::default(),
    )
    .expect("Failed to run checksum");
    assert!(report.success());
    assert_eq!(
        report.reference,
        Checksum::of(Workload::generate(11, 10_000).buffer())
    );
}

#[test]
fn allocate_all() {
    init_logs("allocate_all");
    let config = Config {
        buffer_size: 4096,
        ..Default::default()
    };
    let mut runtime = SimulatedRuntime::new(SimulatorConfiguration {
        nr_ranks: 2,
        dpus_per_rank: 8,
        ..Default::default()
    });
    let report = checksum::run(&mut runtime, &config, NrDpus::All, 16, &mut Trace::default())
        .expect("Failed to run checksum");
    assert_eq!(report.entries.len(), 16);
    assert!(report.success());

    let mut runtime = SimulatedRuntime::new(SimulatorConfiguration {
        allocate_all_supported: false,
        ..Default::default()
    });
    let mut trace = Trace::default();
    assert_eq!(
        checksum::run(&mut runtime, &config, NrDpus::All, 16, &mut trace),
        Err(Error::AllocateAllUnsupported)
    );
    assert_eq!(trace.states(), &[RunState::Idle, RunState::Released]);
}

#[test]
fn over_allocation() {
    init_logs("over_allocation");
    let mut runtime = SimulatedRuntime::new(SimulatorConfiguration::default());
    let mut trace = Trace::default();
    let result = checksum::run(
        &mut runtime,
        &Config::default(),
        NrDpus::Count(65),
        16,
        &mut trace,
    );
    assert!(matches!(result, Err(Error::Allocation { .. })));
    assert_eq!(trace.states(), &[RunState::Idle, RunState::Released]);
}
