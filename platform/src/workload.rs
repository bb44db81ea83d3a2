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

//! Reproducible input buffers and their reference checksums.

use rand::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;
use std::fmt;

use crate::Error;

/// Default input size: 8 MiB.
pub const DEFAULT_BUFFER_SIZE: usize = 8 << 20;

/// Largest buffer whose byte sum is guaranteed to fit the 32-bit checksum
/// computed on the DPUs: 255 * MAX_EXACT_BUFFER_SIZE == u32::MAX.
pub const MAX_EXACT_BUFFER_SIZE: usize = (u32::MAX / 255) as usize;

/// Arithmetic sum of all bytes of a buffer.
///
/// Accumulated in 64 bits, so it never wraps for any buffer the host can
/// hold; narrowing to the device width is explicit and checked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Checksum(u64);

impl Checksum {
    pub fn of(bytes: &[u8]) -> Self {
        Checksum(bytes.iter().map(|b| *b as u64).sum())
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// The checksum as the DPUs compute it, or `ChecksumOverflow` if the
    /// sum does not fit in a u32.
    pub fn to_device_width(&self) -> Result<u32, Error> {
        u32::try_from(self.0).map_err(|_| Error::ChecksumOverflow { sum: self.0 })
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// An immutable input buffer and the checksum computed alongside it.
pub struct Workload {
    seed: u64,
    buffer: Vec<u8>,
    reference: Checksum,
}

impl Workload {
    /// Fills `size` bytes from a xoshiro stream seeded with `seed`. Same
    /// `(seed, size)`, same bytes and checksum, on every run.
    pub fn generate(seed: u64, size: usize) -> Self {
        let mut rng = Xoshiro256StarStar::seed_from_u64(seed);
        let mut buffer = vec![0u8; size];
        rng.fill_bytes(&mut buffer);
        let reference = Checksum::of(&buffer);
        log::debug!(
            "generated {} bytes from seed {}, checksum {}",
            size,
            seed,
            reference
        );
        Self {
            seed,
            buffer,
            reference,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn reference(&self) -> Checksum {
        self.reference
    }
}
