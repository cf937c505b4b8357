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
use std::cmp::min;
use std::time::Duration;

/// Maximum segment size assumed for window arithmetic.
const MSS: usize = 1460;

/// Initial congestion window, in segments. See <https://research.google/pubs/pub36640/> which
/// argues for at least ten.
const INITIAL_WINDOW_SEGMENTS: usize = 10;

/// The window never shrinks below this many segments on loss. A retransmission timeout still
/// collapses it to a single segment.
const MIN_WINDOW_SEGMENTS: usize = 2;

#[derive(Debug, PartialEq)]
enum Phase {
    SlowStart,
    CongestionAvoidance,
}

/// A TCP-style AIMD congestion controller.
///
/// Window management follows RFC 5681: slow start doubles per round-trip, congestion avoidance
/// adds one segment per window of acked data, loss halves the window and a retransmission timeout
/// collapses it to one segment.
pub struct TcpSender {
    cwnd: usize,
    ssthresh: usize,
    partial_bytes_acked: usize,
    bytes_in_flight: usize,
    receive_window: Option<usize>,
    rtt: RttEstimator,
}

impl TcpSender {
    pub fn new() -> Self {
        Self {
            cwnd: INITIAL_WINDOW_SEGMENTS * MSS,
            ssthresh: usize::MAX,
            partial_bytes_acked: 0,
            bytes_in_flight: 0,
            receive_window: None,
            rtt: RttEstimator::new(),
        }
    }

    fn phase(&self) -> Phase {
        if self.cwnd <= self.ssthresh {
            Phase::SlowStart
        } else {
            Phase::CongestionAvoidance
        }
    }

    fn usable_window(&self) -> usize {
        match self.receive_window {
            Some(rwnd) => min(self.cwnd, rwnd),
            None => self.cwnd,
        }
    }
}

impl SendAlgorithm for TcpSender {
    fn set_from_config(&mut self, config: &Config, _is_server: bool) {
        if let Some(segments) = config.initial_congestion_window_packets {
            self.cwnd = max(segments, MIN_WINDOW_SEGMENTS) * MSS;
        }
        if let Some(rwnd) = config.receive_window_bytes {
            self.receive_window = Some(rwnd);
        }
    }

    fn on_incoming_congestion_feedback(
        &mut self,
        feedback: &CongestionFeedback,
        _feedback_receive_time: QuicTime,
    ) {
        if let CongestionFeedback::Tcp { receive_window } = feedback {
            self.receive_window = Some(*receive_window);
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

        let old_cwnd = self.cwnd;
        match self.phase() {
            Phase::SlowStart => {
                self.cwnd += min(acked_bytes, MSS);
                log::debug!("SS increase cwnd={} ({})", self.cwnd, old_cwnd);
            }
            Phase::CongestionAvoidance => {
                self.partial_bytes_acked += acked_bytes;
                if self.partial_bytes_acked >= self.cwnd {
                    self.partial_bytes_acked -= self.cwnd;
                    self.cwnd += MSS;
                    log::debug!("CA increase cwnd={} ({})", self.cwnd, old_cwnd);
                }
            }
        }
    }

    fn on_packet_lost(&mut self, sequence_number: SequenceNumber, _lost_time: QuicTime) {
        let old_cwnd = self.cwnd;
        self.ssthresh = max(self.cwnd / 2, MIN_WINDOW_SEGMENTS * MSS);
        self.cwnd = self.ssthresh;
        self.partial_bytes_acked = 0;
        log::debug!(
            "packet {} lost. cwnd={} ({}), ssthresh={}",
            sequence_number,
            self.cwnd,
            old_cwnd,
            self.ssthresh
        );
    }

    fn on_packet_abandoned(&mut self, _sequence_number: SequenceNumber, abandoned_bytes: usize) {
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(abandoned_bytes);
    }

    fn on_retransmission_timeout(&mut self, _packets_retransmitted: bool) {
        let old_cwnd = self.cwnd;
        self.ssthresh = max(self.cwnd / 2, MIN_WINDOW_SEGMENTS * MSS);
        self.cwnd = MSS;
        self.partial_bytes_acked = 0;
        // The manager has already taken every pending packet out of flight.
        self.bytes_in_flight = 0;
        log::debug!("retransmission timeout. cwnd={} ({})", self.cwnd, old_cwnd);
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
        Bandwidth::from_bytes_and_time_delta(self.cwnd, self.rtt.smoothed_rtt())
    }

    fn congestion_window(&self) -> usize {
        self.cwnd
    }

    fn time_until_send(
        &mut self,
        _now: QuicTime,
        transmission_type: TransmissionType,
        _has_retransmittable_data: bool,
        is_handshake: bool,
    ) -> Duration {
        // Retransmissions and handshake packets bypass the window: holding either back only
        // delays recovery.
        if transmission_type != TransmissionType::NotRetransmission || is_handshake {
            return Duration::ZERO;
        }
        if self.bytes_in_flight < self.usable_window() {
            Duration::ZERO
        } else {
            Duration::MAX
        }
    }
}
