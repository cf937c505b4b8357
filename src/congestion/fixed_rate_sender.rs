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

use crate::api::Config;
use crate::api::QuicTime;
use crate::api::TransmissionType;
use crate::congestion::CongestionFeedback;
use crate::congestion::SendAlgorithm;
use crate::congestion::rtt::RttEstimator;
use crate::types::Bandwidth;
use crate::types::SequenceNumber;
use std::cmp::max;
use std::time::Duration;

const PACKET_SIZE: usize = 1460;

/// The rate used until the peer reports one.
const DEFAULT_RATE: Bandwidth = Bandwidth::from_bits_per_second(800_000);

/// A controller that sends at a fixed rate dictated by peer feedback.
///
/// Its window is one bandwidth-delay product, floored at two packets so a connection with an
/// unknown RTT can still make progress.
pub struct FixedRateSender {
    rate: Bandwidth,
    bytes_in_flight: usize,
    rtt: RttEstimator,
}

impl FixedRateSender {
    pub fn new() -> Self {
        Self { rate: DEFAULT_RATE, bytes_in_flight: 0, rtt: RttEstimator::new() }
    }

    fn window(&self) -> usize {
        let bdp = self.rate.to_bits_per_second() as f64 / 8.0
            * self.rtt.smoothed_rtt().as_secs_f64();
        max(bdp as usize, 2 * PACKET_SIZE)
    }
}

impl SendAlgorithm for FixedRateSender {
    fn set_from_config(&mut self, _config: &Config, _is_server: bool) {}

    fn on_incoming_congestion_feedback(
        &mut self,
        feedback: &CongestionFeedback,
        _feedback_receive_time: QuicTime,
    ) {
        if let CongestionFeedback::FixedRate { bitrate } = feedback {
            self.rate = *bitrate;
        }
    }

    fn on_packet_sent(
        &mut self,
        _sent_time: QuicTime,
        _sequence_number: SequenceNumber,
        bytes: usize,
        _transmission_type: TransmissionType,
        _has_retransmittable_data: bool,
    ) -> bool {
        self.bytes_in_flight += bytes;
        true
    }

    fn on_packet_acked(&mut self, _sequence_number: SequenceNumber, acked_bytes: usize) {
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(acked_bytes);
    }

    fn on_packet_lost(&mut self, _sequence_number: SequenceNumber, _lost_time: QuicTime) {}

    fn on_packet_abandoned(&mut self, _sequence_number: SequenceNumber, abandoned_bytes: usize) {
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(abandoned_bytes);
    }

    fn on_retransmission_timeout(&mut self, _packets_retransmitted: bool) {
        self.bytes_in_flight = 0;
    }

    fn update_rtt(&mut self, rtt_sample: Duration) {
        self.rtt.update(rtt_sample);
    }

    fn smoothed_rtt(&self) -> Duration {
        self.rtt.smoothed_rtt()
    }

    fn retransmission_delay(&self) -> Duration {
        self.rtt.retransmission_delay()
    }

    fn bandwidth_estimate(&self) -> Bandwidth {
        self.rate
    }

    fn congestion_window(&self) -> usize {
        self.window()
    }

    fn time_until_send(
        &mut self,
        _now: QuicTime,
        transmission_type: TransmissionType,
        _has_retransmittable_data: bool,
        is_handshake: bool,
    ) -> Duration {
        if transmission_type != TransmissionType::NotRetransmission || is_handshake {
            return Duration::ZERO;
        }
        if self.bytes_in_flight < self.window() {
            Duration::ZERO
        } else {
            Duration::MAX
        }
    }
}
