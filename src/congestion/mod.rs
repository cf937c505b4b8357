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
use crate::types::Bandwidth;
use crate::types::SequenceNumber;
use std::time::Duration;

pub(crate) mod fixed_rate_sender;
pub(crate) mod pacing_sender;
pub(crate) mod rtt;
pub(crate) mod tcp_sender;

/// Selects the congestion controller variant at connection setup.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CongestionFeedbackKind {
    /// TCP-style cumulative window management.
    Tcp,

    /// A fixed sending rate steered by peer feedback.
    FixedRate,
}

/// Congestion feedback reported by the peer, forwarded to the controller verbatim.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CongestionFeedback {
    Tcp { receive_window: usize },
    FixedRate { bitrate: Bandwidth },
}

/// The capability set the sent-packet manager requires from a congestion controller.
///
/// Implementations are single-threaded and owned exclusively by the manager. All packet
/// bookkeeping the controller needs is pushed through these callbacks; it never reads the
/// unacked-packet registry itself.
pub trait SendAlgorithm {
    /// Applies negotiated connection parameters.
    fn set_from_config(&mut self, config: &Config, is_server: bool);

    fn on_incoming_congestion_feedback(
        &mut self,
        feedback: &CongestionFeedback,
        feedback_receive_time: QuicTime,
    );

    /// Called when a packet is handed to the wire. Returning `false` tells the manager not to
    /// track the packet at all; it will be dropped from the registry.
    fn on_packet_sent(
        &mut self,
        sent_time: QuicTime,
        sequence_number: SequenceNumber,
        bytes: usize,
        transmission_type: TransmissionType,
        has_retransmittable_data: bool,
    ) -> bool;

    fn on_packet_acked(&mut self, sequence_number: SequenceNumber, acked_bytes: usize);

    fn on_packet_lost(&mut self, sequence_number: SequenceNumber, lost_time: QuicTime);

    /// The packet leaves in-flight accounting without having been acked.
    fn on_packet_abandoned(&mut self, sequence_number: SequenceNumber, abandoned_bytes: usize);

    /// The retransmission timer fired in RTO mode. Every pending packet has already been taken
    /// out of flight when this is called; `packets_retransmitted` says whether any of them were
    /// requeued.
    fn on_retransmission_timeout(&mut self, packets_retransmitted: bool);

    fn update_rtt(&mut self, rtt_sample: Duration);

    fn smoothed_rtt(&self) -> Duration;

    /// The controller's declared retransmission delay, or zero when it has no estimate yet.
    fn retransmission_delay(&self) -> Duration;

    fn bandwidth_estimate(&self) -> Bandwidth;

    /// Current congestion window in bytes.
    fn congestion_window(&self) -> usize;

    /// How long the caller must wait before sending the described packet. Zero means "send now";
    /// `Duration::MAX` means blocked by the congestion window.
    fn time_until_send(
        &mut self,
        now: QuicTime,
        transmission_type: TransmissionType,
        has_retransmittable_data: bool,
        is_handshake: bool,
    ) -> Duration;
}

/// Creates the controller variant selected by the connection's feedback type.
pub fn create(kind: CongestionFeedbackKind) -> Box<dyn SendAlgorithm> {
    match kind {
        CongestionFeedbackKind::Tcp => Box::new(tcp_sender::TcpSender::new()),
        CongestionFeedbackKind::FixedRate => {
            Box::new(fixed_rate_sender::FixedRateSender::new())
        }
    }
}
