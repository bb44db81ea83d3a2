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

//! Host side of the DPU checksum verification.
//!
//! The host generates a pseudo-random buffer, broadcasts it to every DPU of
//! a device set, and runs the checksum program: each tasklet sums a share
//! of the buffer and leaves a `(checksum, cycles)` record in WRAM. The host
//! pulls the records back, reduces them per DPU, and compares each DPU's
//! checksum with the one it computed itself.
//!
//! A DPU failing (a transfer error, an execution fault, a malformed results
//! region or a wrong checksum) is reported on its own line and never hides
//! the outcome of the other DPUs.

mod config;
mod run;
mod stress;

pub use config::{Config, DEFAULT_BINARY};
pub use run::{run, RunState, Trace};
pub use stress::{stress, Iteration, StressSummary};
