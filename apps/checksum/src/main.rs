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
use std::path::PathBuf;
use structopt::StructOpt;

use checksum::{Config, StressSummary};
use dpu_platform::{NrDpus, PullStrategy, SimulatedRuntime, SimulatorConfiguration};

#[derive(StructOpt)]
#[structopt(name = "checksum", about = "Checksum verification on a set of DPUs")]
struct Arguments {
    /// number of DPUs, or DPU_ALLOCATE_ALL
    nr_dpus: NrDpus,
    /// tasklets per DPU; must match the program image
    nr_tasklets: usize,
    /// YAML run configuration; options below override it
    #[structopt(short, long, parse(from_os_str))]
    config: Option<PathBuf>,
    /// DPU program image
    #[structopt(short, long, parse(from_os_str))]
    binary: Option<PathBuf>,
    #[structopt(long)]
    buffer_size: Option<usize>,
    #[structopt(short, long)]
    seed: Option<u64>,
    #[structopt(short, long)]
    iterations: Option<usize>,
    /// supported strategies: PerTasklet, WholeRegion, Batched
    #[structopt(short, long)]
    pull: Option<PullStrategy>,
    /// disable DPUs that fail an iteration
    #[structopt(long)]
    disable_failing: bool,
    /// YAML description of the simulated DPU pool
    #[structopt(long, parse(from_os_str))]
    simulator: Option<PathBuf>,
}

impl Arguments {
    fn run_config(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        if let Some(binary) = &self.binary {
            config.binary_path = binary.clone();
        }
        if let Some(buffer_size) = self.buffer_size {
            config.buffer_size = buffer_size;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(iterations) = self.iterations {
            config.iterations = iterations;
        }
        if let Some(pull) = self.pull {
            config.pull_strategy = pull;
        }
        config.disable_failing |= self.disable_failing;
        config.validate()?;
        Ok(config)
    }
}

fn run_checksum(args: &Arguments) -> anyhow::Result<i32> {
    let config = args.run_config()?;
    let simulator = match &args.simulator {
        Some(path) => SimulatorConfiguration::from_file(path)?,
        None => SimulatorConfiguration::default(),
    };
    let mut runtime = SimulatedRuntime::new(simulator);

    let summary: StressSummary =
        checksum::stress(&mut runtime, &config, args.nr_dpus, args.nr_tasklets);
    for (i, iteration) in summary.iterations.iter().enumerate() {
        if config.iterations > 1 {
            println!("Iteration {} (seed {}):", i, iteration.seed);
        }
        match &iteration.report {
            Ok(report) => println!("{}", report),
            Err(e) => println!("[ERROR] {}", e),
        }
    }
    if config.iterations > 1 {
        println!("{}", summary);
    }
    Ok(summary.exit_code())
}

fn main() {
    let args = Arguments::from_args();

    let _logger = env_logger::builder()
        .filter(Some("checksum"), log::LevelFilter::Info)
        .filter(Some("dpu_platform"), log::LevelFilter::Info)
        .target(Target::Stderr)
        .init();

    let code = match run_checksum(&args) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{:#}", e);
            dpu_platform::EX_SOFTWARE
        }
    };
    std::process::exit(code);
}
