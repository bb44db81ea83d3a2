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

use std::fmt;

use crate::{DpuId, NrDpus};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// More DPUs were requested than the runtime can currently provide.
    Allocation { requested: NrDpus, available: usize },
    /// The runtime cannot honor the "allocate all" sentinel.
    AllocateAllUnsupported,
    /// A program image was rejected; loads are all-or-nothing.
    Load { image: String, reason: String },
    Transfer {
        dpu: DpuId,
        symbol: String,
        reason: String,
    },
    ExecutionFault { dpu: DpuId, reason: String },
    /// The result region does not hold exactly one record per tasklet.
    Protocol { dpu: Option<DpuId>, reason: String },
    /// The reference checksum does not fit the 32-bit device accumulator.
    ChecksumOverflow { sum: u64 },
    InvalidConfig(String),
    InvalidDpu(DpuId),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Allocation {
                requested,
                available,
            } => write!(
                f,
                "cannot allocate {} DPU(s), {} available",
                requested, available
            ),
            Self::AllocateAllUnsupported => {
                write!(f, "the runtime does not support allocating all DPUs")
            }
            Self::Load { image, reason } => write!(f, "cannot load {}: {}", image, reason),
            Self::Transfer {
                dpu,
                symbol,
                reason,
            } => write!(f, "transfer of {} failed on DPU {}: {}", symbol, dpu, reason),
            Self::ExecutionFault { dpu, reason } => {
                write!(f, "DPU {} faulted during execution: {}", dpu, reason)
            }
            Self::Protocol {
                dpu: Some(dpu),
                reason,
            } => write!(f, "protocol error on DPU {}: {}", dpu, reason),
            Self::Protocol { dpu: None, reason } => write!(f, "protocol error: {}", reason),
            Self::ChecksumOverflow { sum } => write!(
                f,
                "reference checksum {:#x} does not fit in 32 bits",
                sum
            ),
            Self::InvalidConfig(reason) => write!(f, "invalid configuration: {}", reason),
            Self::InvalidDpu(dpu) => write!(f, "DPU {} is not part of this set", dpu),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// The DPU this error is attributed to, if any.
    pub fn dpu(&self) -> Option<DpuId> {
        match self {
            Self::Transfer { dpu, .. } | Self::ExecutionFault { dpu, .. } => Some(*dpu),
            Self::InvalidDpu(dpu) => Some(*dpu),
            Self::Protocol { dpu, .. } => *dpu,
            _ => None,
        }
    }
}
