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
use crate::types::Bandwidth;
use crate::types::SequenceNumber;
use std::cmp::max;
use std::time::Duration;

/// A decorator that smooths the wrapped controller's send decisions over time.
///
/// Whenever the inner controller would allow a send immediately, the pacer spreads consecutive
/// packets by the time the bandwidth estimate says each one occupies on the wire. Deadlines within
/// the alarm granularity of now are treated as due, so callers are not asked to arm
/// sub-granularity timers.
pub struct PacingSender {
    inner: Box<dyn SendAlgorithm>,
    alarm_granularity: Duration,
    next_packet_send_time: QuicTime,
}

impl PacingSender {
    pub fn new(inner: Box<dyn SendAlgorithm>, alarm_granularity: Duration) -> Self {
        Self { inner, alarm_granularity, next_packet_send_time: QuicTime::zero() }
    }
}

impl SendAlgorithm for PacingSender {
    fn set_from_config(&mut self, config: &Config, is_server: bool) {
        self.inner.set_from_config(config, is_server);
    }

    fn on_incoming_congestion_feedback(
        &mut self,
        feedback: &CongestionFeedback,
        feedback_receive_time: QuicTime,
    ) {
        self.inner.on_incoming_congestion_feedback(feedback, feedback_receive_time);
    }

    fn on_packet_sent(
        &mut self,
        sent_time: QuicTime,
        sequence_number: SequenceNumber,
        bytes: usize,
        transmission_type: TransmissionType,
        has_retransmittable_data: bool,
    ) -> bool {
        let accepted = self.inner.on_packet_sent(
            sent_time,
            sequence_number,
            bytes,
            transmission_type,
            has_retransmittable_data,
        );
        if accepted {
            let delay = self.inner.bandwidth_estimate().transfer_time(bytes);
            self.next_packet_send_time = max(self.next_packet_send_time, sent_time) + delay;
        }
        accepted
    }

    fn on_packet_acked(&mut self, sequence_number: SequenceNumber, acked_bytes: usize) {
        self.inner.on_packet_acked(sequence_number, acked_bytes);
    }

    fn on_packet_lost(&mut self, sequence_number: SequenceNumber, lost_time: QuicTime) {
        self.inner.on_packet_lost(sequence_number, lost_time);
    }

    fn on_packet_abandoned(&mut self, sequence_number: SequenceNumber, abandoned_bytes: usize) {
        self.inner.on_packet_abandoned(sequence_number, abandoned_bytes);
    }

    fn on_retransmission_timeout(&mut self, packets_retransmitted: bool) {
        self.inner.on_retransmission_timeout(packets_retransmitted);
    }

    fn update_rtt(&mut self, rtt_sample: Duration) {
        self.inner.update_rtt(rtt_sample);
    }

    fn smoothed_rtt(&self) -> Duration {
        self.inner.smoothed_rtt()
    }

    fn retransmission_delay(&self) -> Duration {
        self.inner.retransmission_delay()
    }

    fn bandwidth_estimate(&self) -> Bandwidth {
        self.inner.bandwidth_estimate()
    }

    fn congestion_window(&self) -> usize {
        self.inner.congestion_window()
    }

    fn time_until_send(
        &mut self,
        now: QuicTime,
        transmission_type: TransmissionType,
        has_retransmittable_data: bool,
        is_handshake: bool,
    ) -> Duration {
        let inner_delay = self.inner.time_until_send(
            now,
            transmission_type,
            has_retransmittable_data,
            is_handshake,
        );
        if !inner_delay.is_zero() {
            return inner_delay;
        }
        if now + self.alarm_granularity >= self.next_packet_send_time {
            Duration::ZERO
        } else {
            self.next_packet_send_time - now
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::congestion::fixed_rate_sender::FixedRateSender;

    const GRANULARITY: Duration = Duration::from_micros(1);

    fn paced_fixed_rate(bits_per_second: u64) -> PacingSender {
        let mut inner = FixedRateSender::new();
        inner.on_incoming_congestion_feedback(
            &CongestionFeedback::FixedRate {
                bitrate: Bandwidth::from_bits_per_second(bits_per_second),
            },
            QuicTime::zero(),
        );
        PacingSender::new(Box::new(inner), GRANULARITY)
    }

    #[test]
    fn first_packet_is_unpaced() {
        let mut pacer = paced_fixed_rate(8_000);
        assert_eq!(
            pacer.time_until_send(
                QuicTime::zero(),
                TransmissionType::NotRetransmission,
                true,
                false
            ),
            Duration::ZERO
        );
    }

    #[test]
    fn spreads_consecutive_sends_by_transfer_time() {
        // 8 kbit/s: a 100-byte packet occupies the wire for 100 ms.
        let mut pacer = paced_fixed_rate(8_000);
        let now = QuicTime::zero();
        assert!(pacer.on_packet_sent(
            now,
            SequenceNumber(1),
            100,
            TransmissionType::NotRetransmission,
            true,
        ));
        assert_eq!(
            pacer.time_until_send(now, TransmissionType::NotRetransmission, true, false),
            Duration::from_millis(100)
        );
        // Once the pacing deadline passes, sending is allowed again.
        let later = now + Duration::from_millis(100);
        assert_eq!(
            pacer.time_until_send(later, TransmissionType::NotRetransmission, true, false),
            Duration::ZERO
        );
    }

    #[test]
    fn deadlines_within_granularity_are_due() {
        let mut pacer = paced_fixed_rate(8_000_000_000);
        let now = QuicTime::zero();
        // At 8 Gbit/s a 1-byte packet occupies 1 ns, far below the 1 us alarm granularity.
        assert!(pacer.on_packet_sent(
            now,
            SequenceNumber(1),
            1,
            TransmissionType::NotRetransmission,
            true,
        ));
        assert_eq!(
            pacer.time_until_send(now, TransmissionType::NotRetransmission, true, false),
            Duration::ZERO
        );
    }

    #[test]
    fn congestion_blocking_takes_precedence_over_pacing() {
        let mut pacer = paced_fixed_rate(8_000);
        let now = QuicTime::zero();
        let window = pacer.congestion_window();
        assert!(pacer.on_packet_sent(
            now,
            SequenceNumber(1),
            window,
            TransmissionType::NotRetransmission,
            true,
        ));
        assert_eq!(
            pacer.time_until_send(now, TransmissionType::NotRetransmission, true, false),
            Duration::MAX
        );
    }
}
