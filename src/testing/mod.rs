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

use crate::api::Clock;
use crate::api::Config;
use crate::api::EncryptionLevel;
use crate::api::Frame;
use crate::api::QuicTime;
use crate::api::RetransmittableFrames;
use crate::api::SequenceNumberLength;
use crate::api::SerializedPacket;
use crate::api::TransmissionType;
use crate::congestion::CongestionFeedback;
use crate::congestion::SendAlgorithm;
use crate::tx::ack_notifier::AckNotifierManager;
use crate::types::Bandwidth;
use crate::types::SequenceNumber;
use std::cell::Cell;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

/// A clock that only moves when told to.
///
/// Starts slightly after the connection epoch so that a packet sent "now" is distinguishable from
/// the never-sent zero sentinel.
pub struct ManualClock {
    now: Cell<QuicTime>,
}

impl ManualClock {
    pub fn new() -> Self {
        ManualClock { now: Cell::new(QuicTime::zero() + Duration::from_millis(1)) }
    }

    pub fn advance(&self, delta: Duration) {
        self.now.set(self.now.get() + delta);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> QuicTime {
        self.now.get()
    }
}

pub fn retransmittable_packet(sequence_number: u64) -> SerializedPacket {
    SerializedPacket {
        sequence_number: SequenceNumber(sequence_number),
        sequence_number_length: SequenceNumberLength::FourBytes,
        retransmittable_frames: Some(RetransmittableFrames::new(
            vec![Frame::Stream { stream_id: 3, offset: 0, data: b"data".to_vec() }],
            EncryptionLevel::ForwardSecure,
        )),
    }
}

pub fn crypto_packet(sequence_number: u64) -> SerializedPacket {
    SerializedPacket {
        sequence_number: SequenceNumber(sequence_number),
        sequence_number_length: SequenceNumberLength::FourBytes,
        retransmittable_frames: Some(RetransmittableFrames::new(
            vec![Frame::Crypto { data: b"chlo".to_vec() }],
            EncryptionLevel::Initial,
        )),
    }
}

pub fn initial_encryption_packet(sequence_number: u64) -> SerializedPacket {
    SerializedPacket {
        sequence_number: SequenceNumber(sequence_number),
        sequence_number_length: SequenceNumberLength::FourBytes,
        retransmittable_frames: Some(RetransmittableFrames::new(
            vec![Frame::Stream { stream_id: 3, offset: 0, data: b"data".to_vec() }],
            EncryptionLevel::Initial,
        )),
    }
}

pub fn ack_only_packet(sequence_number: u64) -> SerializedPacket {
    SerializedPacket {
        sequence_number: SequenceNumber(sequence_number),
        sequence_number_length: SequenceNumberLength::FourBytes,
        retransmittable_frames: None,
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ControllerEvent {
    PacketSent(SequenceNumber, usize),
    Acked(SequenceNumber, usize),
    Lost(SequenceNumber),
    Abandoned(SequenceNumber, usize),
    RetransmissionTimeout(bool),
    RttUpdated(Duration),
    FeedbackReceived,
}

/// A controller that records every call and answers queries with preset values. Clones share
/// their state, so a test can keep a handle after moving one copy into the manager.
#[derive(Clone)]
pub struct RecordingSendAlgorithm {
    events: Rc<RefCell<Vec<ControllerEvent>>>,
    smoothed_rtt: Rc<Cell<Duration>>,
    retransmission_delay: Rc<Cell<Duration>>,
    accept_packets: Rc<Cell<bool>>,
}

impl RecordingSendAlgorithm {
    pub fn new() -> Self {
        Self {
            events: Rc::new(RefCell::new(Vec::new())),
            smoothed_rtt: Rc::new(Cell::new(Duration::from_millis(100))),
            retransmission_delay: Rc::new(Cell::new(Duration::ZERO)),
            accept_packets: Rc::new(Cell::new(true)),
        }
    }

    pub fn events(&self) -> Vec<ControllerEvent> {
        self.events.borrow().clone()
    }

    pub fn set_smoothed_rtt(&self, srtt: Duration) {
        self.smoothed_rtt.set(srtt);
    }

    pub fn set_retransmission_delay(&self, delay: Duration) {
        self.retransmission_delay.set(delay);
    }

    pub fn set_accept_packets(&self, accept: bool) {
        self.accept_packets.set(accept);
    }
}

impl SendAlgorithm for RecordingSendAlgorithm {
    fn set_from_config(&mut self, _config: &Config, _is_server: bool) {}

    fn on_incoming_congestion_feedback(
        &mut self,
        _feedback: &CongestionFeedback,
        _feedback_receive_time: QuicTime,
    ) {
        self.events.borrow_mut().push(ControllerEvent::FeedbackReceived);
    }

    fn on_packet_sent(
        &mut self,
        _sent_time: QuicTime,
        sequence_number: SequenceNumber,
        bytes: usize,
        _transmission_type: TransmissionType,
        _has_retransmittable_data: bool,
    ) -> bool {
        if !self.accept_packets.get() {
            return false;
        }
        self.events.borrow_mut().push(ControllerEvent::PacketSent(sequence_number, bytes));
        true
    }

    fn on_packet_acked(&mut self, sequence_number: SequenceNumber, acked_bytes: usize) {
        self.events.borrow_mut().push(ControllerEvent::Acked(sequence_number, acked_bytes));
    }

    fn on_packet_lost(&mut self, sequence_number: SequenceNumber, _lost_time: QuicTime) {
        self.events.borrow_mut().push(ControllerEvent::Lost(sequence_number));
    }

    fn on_packet_abandoned(&mut self, sequence_number: SequenceNumber, abandoned_bytes: usize) {
        self.events
            .borrow_mut()
            .push(ControllerEvent::Abandoned(sequence_number, abandoned_bytes));
    }

    fn on_retransmission_timeout(&mut self, packets_retransmitted: bool) {
        self.events
            .borrow_mut()
            .push(ControllerEvent::RetransmissionTimeout(packets_retransmitted));
    }

    fn update_rtt(&mut self, rtt_sample: Duration) {
        self.events.borrow_mut().push(ControllerEvent::RttUpdated(rtt_sample));
    }

    fn smoothed_rtt(&self) -> Duration {
        self.smoothed_rtt.get()
    }

    fn retransmission_delay(&self) -> Duration {
        self.retransmission_delay.get()
    }

    fn bandwidth_estimate(&self) -> Bandwidth {
        Bandwidth::zero()
    }

    fn congestion_window(&self) -> usize {
        usize::MAX
    }

    fn time_until_send(
        &mut self,
        _now: QuicTime,
        _transmission_type: TransmissionType,
        _has_retransmittable_data: bool,
        _is_handshake: bool,
    ) -> Duration {
        Duration::ZERO
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum NotifierEvent {
    Serialized(SequenceNumber),
    Acked(SequenceNumber),
    Renumbered(SequenceNumber, SequenceNumber),
}

/// An ack-notifier fabric that records what it is told.
pub struct RecordingAckNotifierManager {
    events: Rc<RefCell<Vec<NotifierEvent>>>,
}

impl RecordingAckNotifierManager {
    pub fn new() -> Self {
        Self { events: Rc::new(RefCell::new(Vec::new())) }
    }

    pub fn events(&self) -> Rc<RefCell<Vec<NotifierEvent>>> {
        Rc::clone(&self.events)
    }
}

impl AckNotifierManager for RecordingAckNotifierManager {
    fn on_serialized_packet(&mut self, packet: &SerializedPacket) {
        self.events.borrow_mut().push(NotifierEvent::Serialized(packet.sequence_number));
    }

    fn on_packet_acked(&mut self, sequence_number: SequenceNumber) {
        self.events.borrow_mut().push(NotifierEvent::Acked(sequence_number));
    }

    fn update_sequence_number(
        &mut self,
        old_sequence_number: SequenceNumber,
        new_sequence_number: SequenceNumber,
    ) {
        self.events
            .borrow_mut()
            .push(NotifierEvent::Renumbered(old_sequence_number, new_sequence_number));
    }
}
