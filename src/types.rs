// Copyright 2025 The dcQUIC Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt;
use std::time::Duration;

/// Packet sequence number.
///
/// Sequence numbers are assigned by the packet serializer, start at 1 and increase monotonically
/// for every packet put on the wire. At 64 bits they never wrap within the lifetime of a
/// connection, so plain integer ordering applies. The value zero is reserved as "no packet".
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SequenceNumber(pub u64);

impl fmt::Debug for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Add<u64> for SequenceNumber {
    type Output = SequenceNumber;

    #[inline]
    fn add(self, rhs: u64) -> SequenceNumber {
        SequenceNumber(self.0 + rhs)
    }
}

impl std::ops::Sub<u64> for SequenceNumber {
    type Output = SequenceNumber;

    #[inline]
    fn sub(self, rhs: u64) -> SequenceNumber {
        SequenceNumber(self.0 - rhs)
    }
}

impl std::ops::AddAssign<u64> for SequenceNumber {
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}

impl SequenceNumber {
    pub fn distance_to(self, other: SequenceNumber) -> u64 {
        if self > other {
            self.0 - other.0
        } else {
            other.0 - self.0
        }
    }
}

/// A transfer rate, in bits per second.
#[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
pub struct Bandwidth(u64);

impl fmt::Display for Bandwidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bits/s", self.0)
    }
}

impl Bandwidth {
    pub const fn zero() -> Bandwidth {
        Bandwidth(0)
    }

    pub const fn from_bits_per_second(bits_per_second: u64) -> Bandwidth {
        Bandwidth(bits_per_second)
    }

    pub fn from_bytes_and_time_delta(bytes: usize, delta: Duration) -> Bandwidth {
        if delta.is_zero() {
            return Bandwidth::zero();
        }
        Bandwidth(((bytes as f64) * 8.0 / delta.as_secs_f64()) as u64)
    }

    pub const fn to_bits_per_second(self) -> u64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// How long it takes to put `bytes` on the wire at this rate. A zero bandwidth transfers
    /// instantly, so that an estimator without samples never stalls its caller.
    pub fn transfer_time(self, bytes: usize) -> Duration {
        if self.0 == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64((bytes as f64) * 8.0 / (self.0 as f64))
    }
}
