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

use std::collections::BTreeSet;
use std::ops::Add;
use std::ops::Sub;
use std::time::Duration;
use thiserror::Error;

pub use crate::congestion::CongestionFeedback;
pub use crate::congestion::CongestionFeedbackKind;
pub use crate::congestion::SendAlgorithm;
pub use crate::tx::ack_notifier::AckNotifierManager;
pub use crate::tx::ack_notifier::NullAckNotifierManager;
pub use crate::tx::sent_packet_manager::PendingRetransmission;
pub use crate::tx::sent_packet_manager::RetransmissionScope;
pub use crate::tx::sent_packet_manager::SentPacketManager;
pub use crate::types::Bandwidth;
pub use crate::types::SequenceNumber;

/// A point in time relative to the creation of the connection.
///
/// The zero value doubles as the "never sent" sentinel on transmission records: a packet that has
/// been serialized but not yet handed to the wire carries `QuicTime::zero()` as its send time.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct QuicTime(Duration);

impl QuicTime {
    pub const fn zero() -> QuicTime {
        QuicTime(Duration::ZERO)
    }

    pub const fn is_zero(self) -> bool {
        self.0.as_nanos() == 0
    }
}

impl Add<Duration> for QuicTime {
    type Output = QuicTime;
    fn add(self, rhs: Duration) -> QuicTime {
        QuicTime(self.0 + rhs)
    }
}

impl Sub<Duration> for QuicTime {
    type Output = QuicTime;
    fn sub(self, rhs: Duration) -> QuicTime {
        QuicTime(self.0 - rhs)
    }
}

impl Sub<QuicTime> for QuicTime {
    type Output = Duration;
    fn sub(self, rhs: QuicTime) -> Duration {
        self.0 - rhs.0
    }
}

impl From<Duration> for QuicTime {
    fn from(value: Duration) -> Self {
        QuicTime(value)
    }
}

impl From<QuicTime> for Duration {
    fn from(value: QuicTime) -> Self {
        value.0
    }
}

/// A monotone, non-decreasing source of the current time.
///
/// The clock is a borrowed capability: the sent-packet manager reads it when computing timer
/// deadlines but never sleeps on it.
pub trait Clock {
    fn now(&self) -> QuicTime;
}

/// The encryption level a packet's payload was serialized under. Only the distinction between the
/// initial level and everything later matters to retransmission decisions.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EncryptionLevel {
    Initial,
    ForwardSecure,
}

/// On-wire encoding width of a sequence number, carried through to the retransmitter so a
/// reserialized packet can use the same width.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SequenceNumberLength {
    OneByte,
    TwoBytes,
    FourBytes,
    SixBytes,
}

/// The frames a packet may carry, reduced to what retransmission decisions need. Wire encoding is
/// not this crate's concern.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Frame {
    /// Application data on a stream. Retransmittable.
    Stream { stream_id: u32, offset: u64, data: Vec<u8> },

    /// Crypto handshake data. Retransmittable, and drives the handshake retransmission timer.
    Crypto { data: Vec<u8> },

    /// An acknowledgement of the peer's packets. Not retransmittable on its own.
    Ack,
}

/// The frames that must be re-sent if a transmission is lost.
///
/// Exactly one transmission of a payload owns its frames at any time: when a packet is
/// retransmitted, the frames move to the new sequence number and the superseded transmission can
/// no longer be independently retransmitted.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RetransmittableFrames {
    pub frames: Vec<Frame>,
    pub encryption_level: EncryptionLevel,
}

impl RetransmittableFrames {
    pub fn new(frames: Vec<Frame>, encryption_level: EncryptionLevel) -> Self {
        RetransmittableFrames { frames, encryption_level }
    }

    pub fn has_crypto_handshake(&self) -> bool {
        self.frames.iter().any(|frame| matches!(frame, Frame::Crypto { .. }))
    }
}

/// A packet as produced by the serializer, before it is handed to the wire.
#[derive(Debug)]
pub struct SerializedPacket {
    pub sequence_number: SequenceNumber,
    pub sequence_number_length: SequenceNumberLength,

    /// `None` for packets that carry nothing worth re-sending, e.g. pure acks.
    pub retransmittable_frames: Option<RetransmittableFrames>,
}

/// Why a packet is being (re)transmitted. Queued retransmissions are tagged with the reason so the
/// connection can serialize them appropriately and statistics stay attributable.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransmissionType {
    /// A first transmission.
    NotRetransmission,

    /// Declared lost by NACK counting.
    NackRetransmission,

    /// Requeued by a retransmission timeout.
    RtoRetransmission,

    /// Sent as a tail loss probe.
    TlpRetransmission,

    /// Requeued by the crypto handshake timer.
    CryptoRetransmission,
}

/// Which congestion control behavior the connection negotiated.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum CongestionControl {
    #[default]
    Standard,

    /// The peer requested paced sending. Only honored when [`FeatureFlags::enable_pacing`] is set.
    Pace,
}

/// Negotiated connection parameters that the sent-packet manager consumes. Anything not listed
/// here is passed through to the congestion controller verbatim.
#[derive(Clone, Debug, Default)]
pub struct Config {
    /// If non-zero and no RTT sample has been recorded yet, seeds the RTT estimate.
    pub initial_round_trip_time_us: u64,

    pub congestion_control: CongestionControl,

    /// Initial congestion window, in packets. Controller-specific.
    pub initial_congestion_window_packets: Option<usize>,

    /// The peer's advertised receive window, in bytes. Controller-specific.
    pub receive_window_bytes: Option<usize>,
}

/// Build-time behavior toggles. These were process-wide globals in earlier incarnations of this
/// code; making them explicit constructor inputs keeps the pacing decision visible.
#[derive(Clone, Copy, Debug)]
pub struct FeatureFlags {
    /// When set, all transmissions of the same payload are linked, so that an ack of any of them
    /// retires the whole set. When unset every transmission stands alone and an ack only retires
    /// the exact sequence number it names.
    pub track_retransmission_history: bool,

    /// Allows [`CongestionControl::Pace`] to wrap the controller in a pacing decorator.
    pub enable_pacing: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        FeatureFlags { track_retransmission_history: true, enable_pacing: false }
    }
}

/// Counters the sent-packet manager maintains on behalf of the connection.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ConnectionStats {
    pub packets_lost: u64,

    /// An ack retired a payload through a superseded transmission, proving the newest
    /// reserialization was unnecessary.
    pub packets_spuriously_retransmitted: u64,

    pub tlp_count: u64,
    pub rto_count: u64,
    pub crypto_retransmit_count: u64,
}

/// An incoming ack frame rejected before processing. The connection decides whether a misbehaving
/// peer warrants closing; no state changes have been made when this is returned.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
pub enum AckFrameError {
    #[error("peer acked packet {0} which has never been serialized")]
    LargestObservedTooHigh(SequenceNumber),

    #[error("peer reported packet {0} missing above its largest observed {1}")]
    MissingAboveLargestObserved(SequenceNumber, SequenceNumber),
}

/// The contents of a received ack frame, as far as loss recovery is concerned.
#[derive(Clone, Debug, Default)]
pub struct ReceivedAckInfo {
    /// The highest sequence number the peer has seen.
    pub largest_observed: SequenceNumber,

    /// How long the peer held `largest_observed` before acking it, or `None` if the peer did not
    /// report a delay. Subtracted from the send delta to form an RTT sample.
    pub delta_time_largest_observed: Option<Duration>,

    /// Sequence numbers below `largest_observed` the peer has not seen.
    pub missing_packets: BTreeSet<SequenceNumber>,

    /// Packets the peer recovered through forward error correction rather than receiving.
    pub revived_packets: BTreeSet<SequenceNumber>,

    /// The peer had to cut its missing ranges short to fit the frame. Some packets above the
    /// reported range may be acked or missing without this frame saying so.
    pub is_truncated: bool,
}

impl ReceivedAckInfo {
    /// Whether the peer is still waiting for `sequence_number` according to this ack.
    pub fn is_awaiting_packet(&self, sequence_number: SequenceNumber) -> bool {
        sequence_number > self.largest_observed
            || self.missing_packets.contains(&sequence_number)
    }

    /// Rejects frames that cannot have been produced by an honest peer.
    pub fn validate(
        &self,
        largest_serialized: SequenceNumber,
    ) -> Result<(), AckFrameError> {
        if self.largest_observed > largest_serialized {
            return Err(AckFrameError::LargestObservedTooHigh(self.largest_observed));
        }
        if let Some(&largest_missing) = self.missing_packets.iter().next_back() {
            if largest_missing > self.largest_observed {
                return Err(AckFrameError::MissingAboveLargestObserved(
                    largest_missing,
                    self.largest_observed,
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quic_time_zero_is_sentinel() {
        assert!(QuicTime::zero().is_zero());
        assert!(!(QuicTime::zero() + Duration::from_nanos(1)).is_zero());
    }

    #[test]
    fn quic_time_arithmetic() {
        let t = QuicTime::zero() + Duration::from_millis(250);
        assert_eq!(t - QuicTime::zero(), Duration::from_millis(250));
        assert_eq!(t - Duration::from_millis(50), QuicTime::zero() + Duration::from_millis(200));
    }

    #[test]
    fn retransmittable_frames_detect_crypto_handshake() {
        let crypto = RetransmittableFrames::new(
            vec![Frame::Crypto { data: vec![1, 2, 3] }],
            EncryptionLevel::Initial,
        );
        assert!(crypto.has_crypto_handshake());

        let stream = RetransmittableFrames::new(
            vec![Frame::Stream { stream_id: 3, offset: 0, data: vec![1] }, Frame::Ack],
            EncryptionLevel::ForwardSecure,
        );
        assert!(!stream.has_crypto_handshake());
    }

    #[test]
    fn ack_info_awaiting_packet() {
        let ack = ReceivedAckInfo {
            largest_observed: SequenceNumber(5),
            missing_packets: BTreeSet::from([SequenceNumber(2)]),
            ..Default::default()
        };
        assert!(ack.is_awaiting_packet(SequenceNumber(2)));
        assert!(ack.is_awaiting_packet(SequenceNumber(6)));
        assert!(!ack.is_awaiting_packet(SequenceNumber(3)));
        assert!(!ack.is_awaiting_packet(SequenceNumber(5)));
    }

    #[test]
    fn ack_info_validation() {
        let ack = ReceivedAckInfo {
            largest_observed: SequenceNumber(5),
            ..Default::default()
        };
        assert_eq!(ack.validate(SequenceNumber(5)), Ok(()));
        assert_eq!(
            ack.validate(SequenceNumber(4)),
            Err(AckFrameError::LargestObservedTooHigh(SequenceNumber(5)))
        );

        let ack = ReceivedAckInfo {
            largest_observed: SequenceNumber(5),
            missing_packets: BTreeSet::from([SequenceNumber(7)]),
            ..Default::default()
        };
        assert_eq!(
            ack.validate(SequenceNumber(10)),
            Err(AckFrameError::MissingAboveLargestObserved(
                SequenceNumber(7),
                SequenceNumber(5)
            ))
        );
    }
}
