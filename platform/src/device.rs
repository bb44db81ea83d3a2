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

//! Scoped ownership of a group of DPUs.
//!
//! A `DeviceSet` is created by allocating DPUs from a runtime and returns
//! them when dropped, whichever way the owning scope is left.

use std::path::Path;

use crate::{DpuId, DpuRuntime, Error, NrDpus, ProgramImage};

pub struct DeviceSet<'r, R: DpuRuntime + ?Sized> {
    runtime: &'r mut R,
    dpus: Vec<DpuId>,
    image: Option<ProgramImage>,
}

impl<'r, R: DpuRuntime + ?Sized> DeviceSet<'r, R> {
    /// Allocates `nr_dpus` DPUs. "All" is resolved through the runtime's
    /// capability and availability queries at call time.
    pub fn acquire(runtime: &'r mut R, nr_dpus: NrDpus) -> Result<Self, Error> {
        let available = runtime.available();
        let count = match nr_dpus {
            NrDpus::Count(0) => {
                return Err(Error::InvalidConfig(
                    "at least one DPU must be requested".to_string(),
                ))
            }
            NrDpus::Count(count) => count,
            NrDpus::All if !runtime.supports_allocate_all() => {
                return Err(Error::AllocateAllUnsupported)
            }
            NrDpus::All => available,
        };
        if count == 0 || count > available {
            return Err(Error::Allocation {
                requested: nr_dpus,
                available,
            });
        }
        let dpus = runtime.allocate(count)?;
        log::debug!("allocated DPUs [{}]", itertools::join(&dpus, ", "));
        Ok(Self {
            runtime,
            dpus,
            image: None,
        })
    }

    pub fn len(&self) -> usize {
        self.dpus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dpus.is_empty()
    }

    pub fn dpus(&self) -> &[DpuId] {
        &self.dpus
    }

    /// The DPU at position `index` of the set.
    pub fn dpu(&self, index: usize) -> Result<DpuId, Error> {
        self.dpus.get(index).copied().ok_or_else(|| {
            Error::InvalidConfig(format!(
                "DPU index {} out of range for a set of {}",
                index,
                self.dpus.len()
            ))
        })
    }

    /// The image installed by the last successful load.
    pub fn image(&self) -> Option<&ProgramImage> {
        self.image.as_ref()
    }

    /// Reads a program image from `path` and installs it on every DPU.
    pub fn load(&mut self, path: &Path) -> Result<(), Error> {
        let image = ProgramImage::from_file(path)?;
        self.load_image(&image)
    }

    /// Installs `image` on every DPU of the set. The first rejection fails
    /// the whole load.
    pub fn load_image(&mut self, image: &ProgramImage) -> Result<(), Error> {
        self.image = None;
        for dpu in self.dpus.iter() {
            self.runtime.load(*dpu, image)?;
        }
        log::debug!("loaded {} on {} DPU(s)", image.name, self.dpus.len());
        self.image = Some(image.clone());
        Ok(())
    }

    pub fn read_log(&self, index: usize) -> Result<String, Error> {
        self.runtime.read_log(self.dpu(index)?)
    }

    pub(crate) fn runtime(&mut self) -> &mut R {
        &mut *self.runtime
    }

    pub(crate) fn runtime_ref(&self) -> &R {
        &*self.runtime
    }
}

impl<R: DpuRuntime + ?Sized> Drop for DeviceSet<'_, R> {
    fn drop(&mut self) {
        log::debug!("releasing {} DPU(s)", self.dpus.len());
        self.runtime.release(&self.dpus);
    }
}
