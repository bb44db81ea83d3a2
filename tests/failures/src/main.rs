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

use crate::bit_flips::{count_mismatches, simulate_bit_flips};
use crate::dpu_faults::{mixed_failures, run_simulate_dpu_faults, summarize};

mod bit_flips;
mod dpu_faults;

fn main() {
    env_logger::init();

    let report = simulate_bit_flips(0.05);
    log::info!(
        "Bit flips: {} of {} DPU(s) mismatched",
        count_mismatches(&report),
        report.entries.len()
    );

    let (report, released) = run_simulate_dpu_faults(mixed_failures());
    log::info!("DPU faults: {} (released: {})", summarize(&report), released);
}
