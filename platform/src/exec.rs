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

use crate::{DeviceSet, DpuRuntime, Error};

impl<R: DpuRuntime + ?Sized> DeviceSet<'_, R> {
    /// Runs the loaded program on every DPU of the set and blocks until all
    /// of them stop. Returns one status per DPU, in set order; a DPU that
    /// faulted yields `ExecutionFault` and its memory must not be trusted.
    pub fn run(&mut self) -> Vec<Result<(), Error>> {
        if self.image().is_none() {
            let dpus = self.dpus().to_vec();
            return dpus
                .into_iter()
                .map(|dpu| {
                    Err(Error::ExecutionFault {
                        dpu,
                        reason: "no program loaded".to_string(),
                    })
                })
                .collect();
        }
        let dpus = self.dpus().to_vec();
        log::debug!("launching {} DPU(s)", dpus.len());
        let mut status = self.runtime().launch(&dpus);
        if status.len() != dpus.len() {
            // every DPU gets an entry, even if the runtime dropped some
            log::error!(
                "runtime returned {} statuses for {} DPUs",
                status.len(),
                dpus.len()
            );
            status.resize(
                dpus.len(),
                Err(Error::Protocol {
                    dpu: None,
                    reason: "missing launch status".to_string(),
                }),
            );
        }
        for (dpu, result) in dpus.iter().zip(status.iter()) {
            if let Err(e) = result {
                log::debug!("DPU {}: {}", dpu, e);
            }
        }
        status
    }
}
