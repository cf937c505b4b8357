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

use std::time::Duration;

const RTT_ALPHA: f64 = 0.125;
const RTT_BETA: f64 = 0.25;

/// The smoothed RTT reported before any sample has arrived.
const DEFAULT_INITIAL_RTT: Duration = Duration::from_millis(100);

/// Samples above this are discarded as corrupt rather than folded into the estimate, where they
/// would take a very long time to decay.
const MAX_RTT: Duration = Duration::from_secs(60);

/// Exponentially smoothed round-trip estimator, following RFC 6298.
///
/// Feeds the controller's retransmission delay: `srtt + 4 * rttvar` once a measurement exists.
pub struct RttEstimator {
    first_measurement: bool,
    srtt: f64,
    rtt_var: f64,
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl RttEstimator {
    pub fn new() -> Self {
        Self {
            first_measurement: true,
            srtt: DEFAULT_INITIAL_RTT.as_secs_f64(),
            rtt_var: 0.0,
        }
    }

    pub fn has_sample(&self) -> bool {
        !self.first_measurement
    }

    pub fn smoothed_rtt(&self) -> Duration {
        Duration::from_secs_f64(self.srtt)
    }

    pub fn mean_deviation(&self) -> Duration {
        Duration::from_secs_f64(self.rtt_var)
    }

    /// The delay to wait before assuming a transmission was lost, per RFC 6298. Zero until the
    /// first measurement, letting callers substitute their own default.
    pub fn retransmission_delay(&self) -> Duration {
        if self.first_measurement {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.srtt + 4.0 * self.rtt_var)
    }

    pub fn update(&mut self, measured_rtt: Duration) {
        if measured_rtt > MAX_RTT {
            return;
        }
        let rtt = measured_rtt.as_secs_f64();

        if self.first_measurement {
            self.srtt = rtt;
            self.rtt_var = rtt / 2.0;
            self.first_measurement = false;
        } else {
            self.rtt_var = (1.0 - RTT_BETA) * self.rtt_var + RTT_BETA * (self.srtt - rtt).abs();
            self.srtt = (1.0 - RTT_ALPHA) * self.srtt + RTT_ALPHA * rtt;
        }
    }
}
