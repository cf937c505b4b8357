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

use crate::api::AckFrameError;
use crate::api::Clock;
use crate::api::Config;
use crate::api::CongestionControl;
use crate::api::ConnectionStats;
use crate::api::EncryptionLevel;
use crate::api::FeatureFlags;
use crate::api::QuicTime;
use crate::api::ReceivedAckInfo;
use crate::api::RetransmittableFrames;
use crate::api::SequenceNumberLength;
use crate::api::SerializedPacket;
use crate::api::TransmissionType;
use crate::congestion;
use crate::congestion::CongestionFeedback;
use crate::congestion::CongestionFeedbackKind;
use crate::congestion::SendAlgorithm;
use crate::congestion::pacing_sender::PacingSender;
use crate::tx::ack_notifier::AckNotifierManager;
use crate::tx::loss_detection::detect_lost_packets;
use crate::tx::unacked_packet_map::UnackedPacketMap;
use crate::types::Bandwidth;
use crate::types::SequenceNumber;
use std::cell::RefCell;
use std::cmp::max;
use std::cmp::min;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

/// Used when the controller has no retransmission delay estimate yet.
const DEFAULT_RETRANSMISSION_TIME: Duration = Duration::from_millis(500);

/// TCP RFCs call for a 1 second minimum RTO, but Linux uses 200 ms and so does this code.
const MIN_RETRANSMISSION_TIME: Duration = Duration::from_millis(200);
const MAX_RETRANSMISSION_TIME: Duration = Duration::from_secs(60);

/// Caps the exponential backoff shift applied to the retransmission delay.
const MAX_RETRANSMISSIONS: u32 = 10;

/// The crypto handshake timer stops backing off after this many consecutive firings.
const MAX_HANDSHAKE_RETRANSMISSION_BACKOFFS: u32 = 5;
const MIN_HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(10);

/// Up to two tail loss probes are sent before falling back to an RTO, per
/// draft-dukkipati-tcpm-tcp-loss-probe.
const DEFAULT_MAX_TAIL_LOSS_PROBES: u32 = 2;
const MIN_TAIL_LOSS_PROBE_TIMEOUT: Duration = Duration::from_millis(10);

/// Pacing spreads sends with this alarm granularity when enabled.
const PACING_QUANTUM: Duration = Duration::from_micros(1);

/// Which unacked packets a bulk retransmit covers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetransmissionScope {
    AllPackets,
    InitialEncryptionOnly,
}

/// The three states of the retransmission timer. Re-evaluated whenever a deadline is requested or
/// the timer fires; never stored.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum RetransmissionTimeoutMode {
    Handshake,
    TailLossProbe,
    Rto,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ReceivedByPeer {
    Received,
    NotReceived,
}

/// The oldest queued retransmission, handed to the connection for reserialization. The entry stays
/// queued until [`SentPacketManager::on_retransmitted_packet`] reports the new sequence number.
#[derive(Debug)]
pub struct PendingRetransmission<'a> {
    pub sequence_number: SequenceNumber,
    pub transmission_type: TransmissionType,
    pub retransmittable_frames: &'a RetransmittableFrames,
    pub sequence_number_length: SequenceNumberLength,
}

/// Tracks every packet serialized for transmission until it is acked, lost or otherwise retired,
/// decides what to retransmit and when, and keeps the congestion controller's view of the world
/// current.
///
/// All methods run to completion on the owning connection's thread. Deadlines are reported through
/// [`Self::get_retransmission_time`]; the connection arms its own timer and calls
/// [`Self::on_retransmission_timeout`] when it fires.
pub struct SentPacketManager {
    unacked_packets: UnackedPacketMap,
    is_server: bool,
    clock: Rc<dyn Clock>,
    stats: Rc<RefCell<ConnectionStats>>,
    ack_notifier_manager: Box<dyn AckNotifierManager>,
    send_algorithm: Box<dyn SendAlgorithm>,

    /// The most recent valid RTT measurement, fed to the controller on every qualifying ack.
    rtt_sample: Option<Duration>,

    /// Payloads waiting to be reserialized, keyed by the sequence number that last carried them,
    /// tagged with the reason retransmission was chosen.
    pending_retransmissions: BTreeMap<SequenceNumber, TransmissionType>,

    /// Tracked packets whose frames carry crypto handshake data. While non-zero, the
    /// retransmission timer runs in handshake mode.
    pending_crypto_packet_count: usize,

    consecutive_rto_count: u32,
    consecutive_tlp_count: u32,
    consecutive_crypto_retransmission_count: u32,
    max_tail_loss_probes: u32,
    using_pacing: bool,
    enable_pacing: bool,
}

impl SentPacketManager {
    pub fn new(
        is_server: bool,
        clock: Rc<dyn Clock>,
        stats: Rc<RefCell<ConnectionStats>>,
        feedback_kind: CongestionFeedbackKind,
        flags: FeatureFlags,
        ack_notifier_manager: Box<dyn AckNotifierManager>,
    ) -> Self {
        SentPacketManager {
            unacked_packets: UnackedPacketMap::new(flags.track_retransmission_history),
            is_server,
            clock,
            stats,
            ack_notifier_manager,
            send_algorithm: congestion::create(feedback_kind),
            rtt_sample: None,
            pending_retransmissions: BTreeMap::new(),
            pending_crypto_packet_count: 0,
            consecutive_rto_count: 0,
            consecutive_tlp_count: 0,
            consecutive_crypto_retransmission_count: 0,
            max_tail_loss_probes: DEFAULT_MAX_TAIL_LOSS_PROBES,
            using_pacing: false,
            enable_pacing: flags.enable_pacing,
        }
    }

    fn endpoint(&self) -> &'static str {
        if self.is_server { "Server: " } else { "Client: " }
    }

    /// Applies negotiated connection parameters.
    pub fn set_from_config(&mut self, config: &Config) {
        if config.initial_round_trip_time_us > 0 && self.rtt_sample.is_none() {
            if !self.is_server {
                log::debug!("{}did not set an initial RTT, but negotiated one", self.endpoint());
            }
            let sample = Duration::from_micros(config.initial_round_trip_time_us);
            self.rtt_sample = Some(sample);
            self.send_algorithm.update_rtt(sample);
        }
        if config.congestion_control == CongestionControl::Pace {
            self.maybe_enable_pacing();
        }
        self.send_algorithm.set_from_config(config, self.is_server);
    }

    fn maybe_enable_pacing(&mut self) {
        if !self.enable_pacing || self.using_pacing {
            return;
        }
        self.using_pacing = true;
        let placeholder = congestion::create(CongestionFeedbackKind::FixedRate);
        let inner = std::mem::replace(&mut self.send_algorithm, placeholder);
        self.send_algorithm = Box::new(PacingSender::new(inner, PACING_QUANTUM));
    }

    /// Registers a freshly serialized packet. Must precede
    /// [`Self::on_packet_sent`] for the same sequence number.
    pub fn on_serialized_packet(&mut self, packet: SerializedPacket) {
        if self.unacked_packets.is_unacked(packet.sequence_number) {
            debug_assert!(false, "duplicate serialization of packet {}", packet.sequence_number);
            log::warn!(
                "{}dropping duplicate serialized packet {}",
                self.endpoint(),
                packet.sequence_number
            );
            return;
        }
        if let Some(frames) = &packet.retransmittable_frames {
            self.ack_notifier_manager.on_serialized_packet(&packet);
            if frames.has_crypto_handshake() {
                self.pending_crypto_packet_count += 1;
            }
        }
        self.unacked_packets.add(packet);
        self.debug_audit();
    }

    /// The payload queued under `old_sequence_number` has been reserialized as
    /// `new_sequence_number`.
    pub fn on_retransmitted_packet(
        &mut self,
        old_sequence_number: SequenceNumber,
        new_sequence_number: SequenceNumber,
    ) {
        debug_assert!(
            self.pending_retransmissions.contains_key(&old_sequence_number),
            "packet {} is not awaiting retransmission",
            old_sequence_number
        );
        self.pending_retransmissions.remove(&old_sequence_number);

        // A notifier may be waiting to hear about acks for the original sequence number.
        self.ack_notifier_manager.update_sequence_number(old_sequence_number, new_sequence_number);

        self.unacked_packets.on_retransmitted(old_sequence_number, new_sequence_number);
        self.debug_audit();
    }

    /// Processes an incoming ack frame.
    ///
    /// An error means the frame could not have been produced by an honest peer; nothing has been
    /// processed and the connection decides how to react. On success the caller should rearm its
    /// retransmission timer from [`Self::get_retransmission_time`], since the deadline computation
    /// has fresher inputs now.
    pub fn on_incoming_ack(
        &mut self,
        received_info: &ReceivedAckInfo,
        ack_receive_time: QuicTime,
    ) -> Result<(), AckFrameError> {
        received_info.validate(self.unacked_packets.largest_serialized_packet())?;

        // The RTT estimate relies on the peer-reported delay for the largest observed packet, so
        // only acks that newly acknowledge it make forward progress.
        let largest_observed_acked =
            self.unacked_packets.is_unacked(received_info.largest_observed);
        self.maybe_update_rtt(received_info, ack_receive_time);
        self.handle_ack_for_sent_packets(received_info);
        self.maybe_retransmit_on_ack_frame(received_info, ack_receive_time);

        if largest_observed_acked {
            // Reset all retransmit counters any time a new packet is acked.
            self.consecutive_rto_count = 0;
            self.consecutive_tlp_count = 0;
            self.consecutive_crypto_retransmission_count = 0;
        }
        self.debug_audit();
        Ok(())
    }

    /// Drops a single unacked packet on behalf of the owning connection, abandoning it in the
    /// controller if it was in flight.
    pub fn discard_unacked_packet(&mut self, sequence_number: SequenceNumber) {
        self.mark_packet_handled(sequence_number, ReceivedByPeer::NotReceived);
        self.debug_audit();
    }

    fn maybe_update_rtt(&mut self, received_info: &ReceivedAckInfo, ack_receive_time: QuicTime) {
        let Some(info) = self.unacked_packets.get(received_info.largest_observed) else {
            return;
        };
        if info.sent_time.is_zero() {
            return;
        }

        let send_delta = ack_receive_time - info.sent_time;
        match received_info.delta_time_largest_observed {
            Some(ack_delay) if send_delta > ack_delay => {
                self.rtt_sample = Some(send_delta - ack_delay);
            }
            _ if self.rtt_sample.is_none() => {
                // The peer reported a delay at least as large as the whole send delta, which
                // would be a non-positive RTT. Use the raw delta as an approximation until a
                // better sample arrives.
                self.rtt_sample = Some(send_delta);
            }
            _ => {}
        }
        if let Some(sample) = self.rtt_sample {
            self.send_algorithm.update_rtt(sample);
        }
    }

    fn handle_ack_for_sent_packets(&mut self, received_info: &ReceivedAckInfo) {
        // Retiring a packet also retires its whole retransmission chain, so collect the directly
        // acked sequence numbers first and retire in a second pass.
        let mut acked: Vec<SequenceNumber> = Vec::new();
        for (&sequence_number, _) in self.unacked_packets.iter() {
            if sequence_number > received_info.largest_observed {
                // These are very new sequence numbers.
                break;
            }
            if received_info.is_awaiting_packet(sequence_number) {
                continue;
            }
            acked.push(sequence_number);
        }
        for sequence_number in acked {
            if !self.unacked_packets.is_unacked(sequence_number) {
                // Already retired as a chain sibling of an earlier ack in this frame.
                continue;
            }
            log::debug!("{}got an ack for packet {}", self.endpoint(), sequence_number);
            self.mark_packet_handled(sequence_number, ReceivedByPeer::Received);
            self.ack_notifier_manager.on_packet_acked(sequence_number);
        }

        // Revived packets were repaired by forward error correction, not received: the payload no
        // longer needs retransmission, but an in-flight transmission keeps its congestion
        // accounting until it is retired some other way.
        for &revived in &received_info.revived_packets {
            if self.unacked_packets.is_unacked(revived) {
                self.drop_crypto_obligation(revived);
                if !self.unacked_packets.is_pending(revived) {
                    self.unacked_packets.remove(revived);
                } else {
                    self.unacked_packets.neuter(revived);
                }
            }
        }

        if received_info.is_truncated {
            // A truncated ack can't describe packets past its cut-off, so free registry slots
            // below the ack window to let the peer's future acks reach live packets.
            self.unacked_packets
                .clear_previous_retransmissions(received_info.missing_packets.len() / 2);
        }
    }

    fn maybe_retransmit_on_ack_frame(
        &mut self,
        received_info: &ReceivedAckInfo,
        ack_receive_time: QuicTime,
    ) {
        // Count the gap to the largest observed as that many nacks: a nack threshold exists to
        // tolerate reordering, and a wide gap rules reordering out. This also absorbs stretch
        // acks and forward acks.
        let mut to_nack: Vec<(SequenceNumber, u64)> = Vec::new();
        for (&sequence_number, info) in self.unacked_packets.iter() {
            if sequence_number > received_info.largest_observed {
                break;
            }
            if !info.pending {
                continue;
            }
            log::debug!("{}still missing packet {}", self.endpoint(), sequence_number);
            // Acks were handled already, so anything still pending must be missing.
            debug_assert!(received_info.is_awaiting_packet(sequence_number));
            to_nack.push((
                sequence_number,
                sequence_number.distance_to(received_info.largest_observed),
            ));
        }
        for (sequence_number, min_nack_count) in to_nack {
            self.unacked_packets.nack(sequence_number, min_nack_count);
        }

        let lost_packets = detect_lost_packets(
            &self.unacked_packets,
            ack_receive_time,
            received_info.largest_observed,
        );
        for sequence_number in lost_packets {
            self.stats.borrow_mut().packets_lost += 1;
            self.send_algorithm.on_packet_lost(sequence_number, ack_receive_time);
            self.on_packet_abandoned(sequence_number);

            if self.unacked_packets.has_retransmittable_frames(sequence_number) {
                self.mark_for_retransmission(sequence_number, TransmissionType::NackRetransmission);
            } else {
                // Nothing to re-send: this is either a transmission whose payload moved on, or a
                // packet that was neutered. Stop tracking it.
                self.unacked_packets.remove(sequence_number);
            }
        }
    }

    /// Retires a packet and every other transmission of its payload.
    fn mark_packet_handled(
        &mut self,
        sequence_number: SequenceNumber,
        received_by_peer: ReceivedByPeer,
    ) {
        let Some(info) = self.unacked_packets.get(sequence_number) else {
            debug_assert!(false, "packet is not unacked: {}", sequence_number);
            log::warn!("{}cannot handle unknown packet {}", self.endpoint(), sequence_number);
            return;
        };
        if info.pending {
            let bytes_sent = info.bytes_sent;
            match received_by_peer {
                ReceivedByPeer::Received => {
                    self.send_algorithm.on_packet_acked(sequence_number, bytes_sent);
                }
                ReceivedByPeer::NotReceived => {
                    self.send_algorithm.on_packet_abandoned(sequence_number, bytes_sent);
                }
            }
            self.unacked_packets.set_not_pending(sequence_number);
        }

        let all_transmissions =
            self.unacked_packets.all_transmissions_descending(sequence_number);
        debug_assert!(!all_transmissions.is_empty());
        let newest_transmission = all_transmissions[0];
        if newest_transmission != sequence_number {
            // The payload was retired through a superseded transmission, so the newest
            // reserialization was unnecessary.
            self.stats.borrow_mut().packets_spuriously_retransmitted += 1;
        }

        if self
            .unacked_packets
            .get(newest_transmission)
            .is_some_and(|newest| newest.has_crypto_handshake())
        {
            // The handshake obligation this payload represented is discharged.
            debug_assert!(self.pending_crypto_packet_count > 0);
            self.pending_crypto_packet_count = self.pending_crypto_packet_count.saturating_sub(1);
        }

        for &transmission in &all_transmissions {
            // A retransmission that was queued but never reserialized is moot now.
            self.pending_retransmissions.remove(&transmission);
            // Any transmission still in flight will never be waited for again.
            self.on_packet_abandoned(transmission);
            self.unacked_packets.remove(transmission);
        }
    }

    pub fn is_unacked(&self, sequence_number: SequenceNumber) -> bool {
        self.unacked_packets.is_unacked(sequence_number)
    }

    pub fn has_unacked_packets(&self) -> bool {
        !self.unacked_packets.is_empty()
    }

    pub fn has_retransmittable_frames(&self, sequence_number: SequenceNumber) -> bool {
        self.unacked_packets.has_retransmittable_frames(sequence_number)
    }

    pub fn least_unacked_sent_packet(&self) -> SequenceNumber {
        self.unacked_packets.least_unacked_sent_packet()
    }

    /// Marks every unacked packet in `scope` for retransmission, called on encryption level
    /// changes. Packets that cannot be retransmitted and have no live siblings are retired
    /// instead.
    pub fn retransmit_unacked_packets(&mut self, scope: RetransmissionScope) {
        let sequence_numbers: Vec<SequenceNumber> =
            self.unacked_packets.iter().map(|(&seq, _)| seq).collect();
        for sequence_number in sequence_numbers {
            if !self.unacked_packets.is_unacked(sequence_number) {
                continue;
            }
            let info = self.unacked_packets.get(sequence_number).unwrap();
            let is_initial = info
                .retransmittable_frames
                .as_ref()
                .is_some_and(|frames| frames.encryption_level == EncryptionLevel::Initial);
            if info.retransmittable_frames.is_none() {
                // With siblings, one of them owns the frames and gets marked below, which
                // resolves this transmission along the way. Alone, there is nothing left to
                // re-send: retire.
                if scope == RetransmissionScope::AllPackets
                    && self.unacked_packets.chain_len(sequence_number) == 1
                {
                    self.mark_packet_handled(sequence_number, ReceivedByPeer::NotReceived);
                }
            } else if scope == RetransmissionScope::AllPackets || is_initial {
                self.on_packet_abandoned(sequence_number);
                self.mark_for_retransmission(
                    sequence_number,
                    TransmissionType::NackRetransmission,
                );
            }
        }
        self.debug_audit();
    }

    fn mark_for_retransmission(
        &mut self,
        sequence_number: SequenceNumber,
        transmission_type: TransmissionType,
    ) {
        let Some(info) = self.unacked_packets.get(sequence_number) else {
            debug_assert!(false, "packet is not unacked: {}", sequence_number);
            return;
        };
        debug_assert!(info.retransmittable_frames.is_some());
        debug_assert!(!info.sent_time.is_zero());
        if info.retransmittable_frames.is_none() {
            log::warn!(
                "{}cannot mark frameless packet {} for retransmission",
                self.endpoint(),
                sequence_number
            );
            return;
        }
        // An entry already queued keeps its original reason, e.g. when the RTO fires while a
        // nack retransmission is still queued for the same data.
        if self.pending_retransmissions.contains_key(&sequence_number) {
            return;
        }
        self.pending_retransmissions.insert(sequence_number, transmission_type);
    }

    pub fn has_pending_retransmissions(&self) -> bool {
        !self.pending_retransmissions.is_empty()
    }

    /// The oldest queued retransmission. Returns `None` when the queue is empty or the queued
    /// entry has become invalid, which a correctly sequenced caller never observes.
    pub fn next_pending_retransmission(&self) -> Option<PendingRetransmission<'_>> {
        debug_assert!(!self.pending_retransmissions.is_empty());
        let (&sequence_number, &transmission_type) = self.pending_retransmissions.iter().next()?;
        debug_assert!(self.unacked_packets.is_unacked(sequence_number));
        let info = self.unacked_packets.get(sequence_number)?;
        debug_assert!(info.retransmittable_frames.is_some());
        let retransmittable_frames = info.retransmittable_frames.as_ref()?;
        Some(PendingRetransmission {
            sequence_number,
            transmission_type,
            retransmittable_frames,
            sequence_number_length: info.sequence_number_length,
        })
    }

    /// Reports a send to the congestion controller and transitions the packet to pending.
    ///
    /// Returns whether the caller should (re)arm the retransmission timer: true for the first
    /// packet in flight, and for every send while the timer is in handshake or tail-loss-probe
    /// mode, both of which measure from the latest send.
    pub fn on_packet_sent(
        &mut self,
        sequence_number: SequenceNumber,
        sent_time: QuicTime,
        bytes: usize,
        transmission_type: TransmissionType,
        has_retransmittable_data: bool,
    ) -> bool {
        debug_assert!(sequence_number > SequenceNumber(0));
        debug_assert!(bytes > 0, "cannot send empty packets");
        if bytes == 0 {
            return false;
        }
        // In rare circumstances, the packet could be serialized, sent, and then acked before
        // this is called.
        if !self.unacked_packets.is_unacked(sequence_number) {
            return false;
        }

        // Only track packets the controller wants tracked.
        if !self.send_algorithm.on_packet_sent(
            sent_time,
            sequence_number,
            bytes,
            transmission_type,
            has_retransmittable_data,
        ) {
            self.drop_crypto_obligation(sequence_number);
            self.unacked_packets.remove(sequence_number);
            // The packet isn't tracked, so leave the retransmission timer alone.
            return false;
        }

        let set_retransmission_timer = !self.unacked_packets.has_pending();
        self.unacked_packets.set_pending(sequence_number, sent_time, bytes);

        set_retransmission_timer || self.retransmission_mode() != RetransmissionTimeoutMode::Rto
    }

    /// Handles the retransmission timer firing. The mode is re-evaluated now, not when the timer
    /// was armed. Calling this with nothing in flight is a sequencing error by the caller.
    pub fn on_retransmission_timeout(&mut self) {
        debug_assert!(self.unacked_packets.has_pending());
        if !self.unacked_packets.has_pending() {
            log::warn!("{}retransmission timer fired with nothing in flight", self.endpoint());
            return;
        }
        match self.retransmission_mode() {
            RetransmissionTimeoutMode::Handshake => {
                self.stats.borrow_mut().crypto_retransmit_count += 1;
                self.retransmit_crypto_packets();
            }
            RetransmissionTimeoutMode::TailLossProbe => {
                self.stats.borrow_mut().tlp_count += 1;
                self.retransmit_oldest_packet();
            }
            RetransmissionTimeoutMode::Rto => {
                self.stats.borrow_mut().rto_count += 1;
                self.retransmit_all_packets();
            }
        }
        self.debug_audit();
    }

    fn retransmit_crypto_packets(&mut self) {
        self.consecutive_crypto_retransmission_count = min(
            MAX_HANDSHAKE_RETRANSMISSION_BACKOFFS,
            self.consecutive_crypto_retransmission_count + 1,
        );

        let crypto_packets: Vec<SequenceNumber> = self
            .unacked_packets
            .iter()
            .filter(|(_, info)| info.pending && info.has_crypto_handshake())
            .map(|(&seq, _)| seq)
            .collect();
        debug_assert!(!crypto_packets.is_empty(), "no crypto packets found to retransmit");
        for sequence_number in crypto_packets {
            self.mark_for_retransmission(sequence_number, TransmissionType::CryptoRetransmission);
            // Abandon the crypto retransmissions now so they're not lost later.
            self.on_packet_abandoned(sequence_number);
        }
    }

    fn retransmit_oldest_packet(&mut self) {
        self.consecutive_tlp_count += 1;
        let oldest = self
            .unacked_packets
            .iter()
            .find(|(_, info)| info.pending && info.retransmittable_frames.is_some())
            .map(|(&seq, info)| {
                debug_assert!(!info.has_crypto_handshake());
                seq
            });
        let Some(sequence_number) = oldest else {
            debug_assert!(false, "no retransmittable packets for a tail loss probe");
            log::warn!("{}tail loss probe found nothing to send", self.endpoint());
            return;
        };
        self.mark_for_retransmission(sequence_number, TransmissionType::TlpRetransmission);
    }

    fn retransmit_all_packets(&mut self) {
        log::debug!(
            "{}retransmission timeout fired with {} unacked packets",
            self.endpoint(),
            self.unacked_packets.len()
        );

        // Request retransmission of every retransmittable packet and let the controller decide
        // how many go out immediately. Everything leaves flight before the controller hears about
        // the timeout, so it observes zero bytes outstanding.
        let mut packets_retransmitted = false;
        let sequence_numbers: Vec<SequenceNumber> =
            self.unacked_packets.iter().map(|(&seq, _)| seq).collect();
        for sequence_number in sequence_numbers {
            self.unacked_packets.set_not_pending(sequence_number);
            if self.unacked_packets.has_retransmittable_frames(sequence_number) {
                packets_retransmitted = true;
                self.mark_for_retransmission(sequence_number, TransmissionType::RtoRetransmission);
            }
        }

        self.send_algorithm.on_retransmission_timeout(packets_retransmitted);
        if packets_retransmitted {
            self.consecutive_rto_count += 1;
        }
    }

    pub(crate) fn retransmission_mode(&self) -> RetransmissionTimeoutMode {
        debug_assert!(self.unacked_packets.has_pending());
        if self.pending_crypto_packet_count > 0 {
            RetransmissionTimeoutMode::Handshake
        } else if self.consecutive_tlp_count < self.max_tail_loss_probes
            && self.unacked_packets.has_pending_retransmittable_frames()
        {
            RetransmissionTimeoutMode::TailLossProbe
        } else {
            RetransmissionTimeoutMode::Rto
        }
    }

    fn on_packet_abandoned(&mut self, sequence_number: SequenceNumber) {
        if self.unacked_packets.is_pending(sequence_number) {
            let bytes_sent = self.unacked_packets.get(sequence_number).unwrap().bytes_sent;
            debug_assert!(bytes_sent > 0);
            self.send_algorithm.on_packet_abandoned(sequence_number, bytes_sent);
            self.unacked_packets.set_not_pending(sequence_number);
        }
    }

    /// Removes the handshake-timer obligation of a packet whose crypto frames are about to be
    /// dropped outside the normal retirement path.
    fn drop_crypto_obligation(&mut self, sequence_number: SequenceNumber) {
        if self
            .unacked_packets
            .get(sequence_number)
            .is_some_and(|info| info.has_crypto_handshake())
        {
            debug_assert!(self.pending_crypto_packet_count > 0);
            self.pending_crypto_packet_count = self.pending_crypto_packet_count.saturating_sub(1);
        }
    }

    pub fn on_incoming_congestion_feedback(
        &mut self,
        feedback: &CongestionFeedback,
        feedback_receive_time: QuicTime,
    ) {
        self.send_algorithm.on_incoming_congestion_feedback(feedback, feedback_receive_time);
    }

    pub fn time_until_send(
        &mut self,
        now: QuicTime,
        transmission_type: TransmissionType,
        has_retransmittable_data: bool,
        is_handshake: bool,
    ) -> Duration {
        self.send_algorithm.time_until_send(
            now,
            transmission_type,
            has_retransmittable_data,
            is_handshake,
        )
    }

    /// How long the peer may delay an ack. Kept under half the minimum RTO so a delayed ack gets
    /// back before the sender's retransmission timer can trigger.
    pub fn delayed_ack_time(&self) -> Duration {
        MIN_RETRANSMISSION_TIME / 2
    }

    /// The next retransmission deadline, or `None` while nothing is in flight.
    pub fn get_retransmission_time(&self) -> Option<QuicTime> {
        if !self.unacked_packets.has_pending() {
            return None;
        }
        let now = self.clock.now();
        match self.retransmission_mode() {
            RetransmissionTimeoutMode::Handshake => {
                Some(now + self.crypto_retransmission_delay())
            }
            RetransmissionTimeoutMode::TailLossProbe => {
                // Base the probe on the send time of the last pending packet, and never in the
                // past.
                let sent_time = self.unacked_packets.last_pending_sent_time()?;
                Some(max(now, sent_time + self.tail_loss_probe_delay()))
            }
            RetransmissionTimeoutMode::Rto => {
                // The RTO is based on the first pending packet, but always waits at least
                // 1.5 * SRTT from now.
                let sent_time = self.unacked_packets.first_pending_sent_time()?;
                let min_timeout = now + self.smoothed_rtt().mul_f64(1.5);
                let rto_timeout = sent_time + self.retransmission_delay();
                Some(max(min_timeout, rto_timeout))
            }
        }
    }

    /// Like the tail loss probe delay, but slightly more aggressive because crypto handshake
    /// messages don't incur a delayed ack time. Doubles per consecutive firing.
    fn crypto_retransmission_delay(&self) -> Duration {
        let delay = max(MIN_HANDSHAKE_TIMEOUT, self.smoothed_rtt().mul_f64(1.5));
        delay.saturating_mul(1 << self.consecutive_crypto_retransmission_count)
    }

    fn tail_loss_probe_delay(&self) -> Duration {
        let srtt = self.smoothed_rtt();
        if !self.unacked_packets.has_multiple_pending() {
            return max(srtt.mul_f64(1.5) + self.delayed_ack_time(), srtt * 2);
        }
        max(MIN_TAIL_LOSS_PROBE_TIMEOUT, srtt * 2)
    }

    fn retransmission_delay(&self) -> Duration {
        let mut retransmission_delay = self.send_algorithm.retransmission_delay();
        if retransmission_delay.is_zero() {
            // The controller has no estimate yet.
            retransmission_delay = DEFAULT_RETRANSMISSION_TIME;
        } else if retransmission_delay < MIN_RETRANSMISSION_TIME {
            retransmission_delay = MIN_RETRANSMISSION_TIME;
        }

        retransmission_delay = retransmission_delay
            .saturating_mul(1 << min(self.consecutive_rto_count, MAX_RETRANSMISSIONS));

        min(retransmission_delay, MAX_RETRANSMISSION_TIME)
    }

    pub fn smoothed_rtt(&self) -> Duration {
        self.send_algorithm.smoothed_rtt()
    }

    pub fn bandwidth_estimate(&self) -> Bandwidth {
        self.send_algorithm.bandwidth_estimate()
    }

    pub fn congestion_window(&self) -> usize {
        self.send_algorithm.congestion_window()
    }

    pub fn rtt_sample(&self) -> Option<Duration> {
        self.rtt_sample
    }

    fn debug_audit(&self) {
        debug_assert_eq!(
            self.pending_crypto_packet_count,
            self.unacked_packets.crypto_frame_packet_count()
        );
        debug_assert!(self.unacked_packets.is_consistent());
    }
}
