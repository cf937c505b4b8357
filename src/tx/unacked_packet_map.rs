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

use crate::api::QuicTime;
use crate::api::RetransmittableFrames;
use crate::api::SequenceNumberLength;
use crate::api::SerializedPacket;
use crate::types::SequenceNumber;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;

/// Identifies the set of sequence numbers that carried the same logical payload. Stored in a side
/// table so the records themselves never form an ownership cycle.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
struct ChainId(u64);

/// Everything tracked about one on-wire transmission.
#[derive(Debug)]
pub(crate) struct TransmissionInfo {
    /// The frames to re-send if this transmission is lost. Absent for pure-ack packets and for
    /// transmissions that have been superseded, neutered or retired.
    pub retransmittable_frames: Option<RetransmittableFrames>,

    pub sequence_number_length: SequenceNumberLength,

    /// When the packet was handed to the wire; the zero sentinel while only serialized.
    pub sent_time: QuicTime,

    pub bytes_sent: usize,

    /// The number of acks in which this sequence number was reported missing while an equal or
    /// greater sequence number was observed.
    pub nack_count: u64,

    /// In flight: counted against the congestion window, not yet acked, lost or abandoned.
    pub pending: bool,

    chain: ChainId,
}

impl TransmissionInfo {
    pub fn has_crypto_handshake(&self) -> bool {
        self.retransmittable_frames
            .as_ref()
            .is_some_and(|frames| frames.has_crypto_handshake())
    }
}

/// The authoritative registry of every packet handed to the wire but not yet retired.
///
/// Entries are keyed by sequence number and linked into retransmission chains: all transmissions
/// of the same logical payload share one chain. Only this type mutates [`TransmissionInfo`];
/// callers drive it through the mutators below and read back through the aggregate queries.
#[derive(Debug)]
pub(crate) struct UnackedPacketMap {
    track_retransmission_history: bool,
    packets: BTreeMap<SequenceNumber, TransmissionInfo>,
    chains: HashMap<ChainId, BTreeSet<SequenceNumber>>,
    next_chain_id: u64,

    /// Highest sequence number ever serialized, whether or not it is still tracked.
    largest_serialized_packet: SequenceNumber,

    /// Highest sequence number ever made pending.
    largest_sent_packet: SequenceNumber,

    pending_count: usize,
    retransmittable_count: usize,
}

impl UnackedPacketMap {
    pub fn new(track_retransmission_history: bool) -> Self {
        UnackedPacketMap {
            track_retransmission_history,
            packets: BTreeMap::new(),
            chains: HashMap::new(),
            next_chain_id: 0,
            largest_serialized_packet: SequenceNumber(0),
            largest_sent_packet: SequenceNumber(0),
            pending_count: 0,
            retransmittable_count: 0,
        }
    }

    fn new_chain(&mut self, sequence_number: SequenceNumber) -> ChainId {
        let id = ChainId(self.next_chain_id);
        self.next_chain_id += 1;
        self.chains.insert(id, BTreeSet::from([sequence_number]));
        id
    }

    /// Inserts a freshly serialized packet: not pending, never sent, alone in its chain.
    pub fn add(&mut self, packet: SerializedPacket) {
        let sequence_number = packet.sequence_number;
        if self.packets.contains_key(&sequence_number) {
            debug_assert!(false, "duplicate add of packet {}", sequence_number);
            log::warn!("refusing duplicate add of packet {}", sequence_number);
            return;
        }
        if packet.retransmittable_frames.is_some() {
            self.retransmittable_count += 1;
        }
        if sequence_number > self.largest_serialized_packet {
            self.largest_serialized_packet = sequence_number;
        }
        let chain = self.new_chain(sequence_number);
        self.packets.insert(
            sequence_number,
            TransmissionInfo {
                retransmittable_frames: packet.retransmittable_frames,
                sequence_number_length: packet.sequence_number_length,
                sent_time: QuicTime::zero(),
                bytes_sent: 0,
                nack_count: 0,
                pending: false,
                chain,
            },
        );
        debug_assert!(self.is_consistent());
    }

    /// Installs a new entry for a reserialized payload. The frames move from the old transmission
    /// to the new one, so the old entry can no longer be independently retransmitted. With
    /// retransmission-history tracking the new entry joins the old one's chain; without it the
    /// new entry stands alone.
    pub fn on_retransmitted(
        &mut self,
        old_sequence_number: SequenceNumber,
        new_sequence_number: SequenceNumber,
    ) {
        if self.packets.contains_key(&new_sequence_number) {
            debug_assert!(false, "duplicate add of packet {}", new_sequence_number);
            log::warn!("refusing duplicate add of packet {}", new_sequence_number);
            return;
        }
        let Some(old_info) = self.packets.get_mut(&old_sequence_number) else {
            debug_assert!(false, "packet {} is not unacked", old_sequence_number);
            log::warn!("cannot retransmit unknown packet {}", old_sequence_number);
            return;
        };
        let Some(frames) = old_info.retransmittable_frames.take() else {
            debug_assert!(
                false,
                "packet {} has no retransmittable frames",
                old_sequence_number
            );
            log::warn!("cannot retransmit frameless packet {}", old_sequence_number);
            return;
        };
        let sequence_number_length = old_info.sequence_number_length;
        let chain = if self.track_retransmission_history {
            let chain = old_info.chain;
            self.chains.get_mut(&chain).unwrap().insert(new_sequence_number);
            chain
        } else {
            self.new_chain(new_sequence_number)
        };
        if new_sequence_number > self.largest_serialized_packet {
            self.largest_serialized_packet = new_sequence_number;
        }
        self.packets.insert(
            new_sequence_number,
            TransmissionInfo {
                retransmittable_frames: Some(frames),
                sequence_number_length,
                sent_time: QuicTime::zero(),
                bytes_sent: 0,
                nack_count: 0,
                pending: false,
                chain,
            },
        );
        debug_assert!(self.is_consistent());
    }

    /// Marks the packet in flight, stamping its send time and size.
    pub fn set_pending(&mut self, sequence_number: SequenceNumber, sent_time: QuicTime, bytes: usize) {
        let Some(info) = self.packets.get_mut(&sequence_number) else {
            debug_assert!(false, "packet {} is not unacked", sequence_number);
            log::warn!("cannot mark unknown packet {} pending", sequence_number);
            return;
        };
        debug_assert!(!info.pending, "packet {} is already pending", sequence_number);
        if info.pending {
            return;
        }
        debug_assert!(bytes > 0, "cannot send empty packets");
        info.sent_time = sent_time;
        info.bytes_sent = bytes;
        info.pending = true;
        self.pending_count += 1;
        if sequence_number > self.largest_sent_packet {
            self.largest_sent_packet = sequence_number;
        }
        debug_assert!(self.is_consistent());
    }

    /// Takes the packet out of flight. Idempotent.
    pub fn set_not_pending(&mut self, sequence_number: SequenceNumber) {
        if let Some(info) = self.packets.get_mut(&sequence_number) {
            if info.pending {
                info.pending = false;
                self.pending_count -= 1;
            }
        }
        debug_assert!(self.is_consistent());
    }

    /// Drops the entry and its chain membership, freeing the chain when it empties.
    pub fn remove(&mut self, sequence_number: SequenceNumber) {
        let Some(info) = self.packets.remove(&sequence_number) else {
            debug_assert!(false, "packet {} is not unacked", sequence_number);
            log::warn!("cannot remove unknown packet {}", sequence_number);
            return;
        };
        if info.pending {
            self.pending_count -= 1;
        }
        if info.retransmittable_frames.is_some() {
            self.retransmittable_count -= 1;
        }
        let chain = self.chains.get_mut(&info.chain).unwrap();
        chain.remove(&sequence_number);
        if chain.is_empty() {
            self.chains.remove(&info.chain);
        }
        debug_assert!(self.is_consistent());
    }

    /// Strips the retransmittable frames while keeping the entry, so a packet revived by forward
    /// error correction can remain as a pending placeholder for congestion accounting.
    pub fn neuter(&mut self, sequence_number: SequenceNumber) {
        let Some(info) = self.packets.get_mut(&sequence_number) else {
            debug_assert!(false, "packet {} is not unacked", sequence_number);
            log::warn!("cannot neuter unknown packet {}", sequence_number);
            return;
        };
        if info.retransmittable_frames.take().is_some() {
            self.retransmittable_count -= 1;
        }
        debug_assert!(self.is_consistent());
    }

    /// Records one more ack in which the packet was reported missing, but raises the count to at
    /// least `min_nack_count` to absorb stretch acks and forward acks.
    pub fn nack(&mut self, sequence_number: SequenceNumber, min_nack_count: u64) {
        let Some(info) = self.packets.get_mut(&sequence_number) else {
            debug_assert!(false, "packet {} is not unacked", sequence_number);
            log::warn!("cannot nack unknown packet {}", sequence_number);
            return;
        };
        info.nack_count = std::cmp::max(info.nack_count + 1, min_nack_count);
    }

    /// Removes up to `num_to_clear` of the oldest superseded transmissions, stopping at the first
    /// entry that is pending or still carries frames: nothing past that point can be below the
    /// peer's ack window, so removing it would not help a truncated ack reach live packets.
    pub fn clear_previous_retransmissions(&mut self, mut num_to_clear: usize) {
        let mut to_remove: Vec<SequenceNumber> = Vec::new();
        for (&sequence_number, info) in &self.packets {
            if num_to_clear == 0 {
                break;
            }
            if info.pending || info.retransmittable_frames.is_some() {
                break;
            }
            to_remove.push(sequence_number);
            num_to_clear -= 1;
        }
        for sequence_number in to_remove {
            self.remove(sequence_number);
        }
    }

    pub fn get(&self, sequence_number: SequenceNumber) -> Option<&TransmissionInfo> {
        self.packets.get(&sequence_number)
    }

    pub fn is_unacked(&self, sequence_number: SequenceNumber) -> bool {
        self.packets.contains_key(&sequence_number)
    }

    pub fn is_pending(&self, sequence_number: SequenceNumber) -> bool {
        self.packets.get(&sequence_number).is_some_and(|info| info.pending)
    }

    pub fn has_retransmittable_frames(&self, sequence_number: SequenceNumber) -> bool {
        self.packets
            .get(&sequence_number)
            .is_some_and(|info| info.retransmittable_frames.is_some())
    }

    /// Every transmission of the packet's payload, newest first. Empty if the packet is unknown.
    pub fn all_transmissions_descending(
        &self,
        sequence_number: SequenceNumber,
    ) -> Vec<SequenceNumber> {
        let Some(info) = self.packets.get(&sequence_number) else {
            return Vec::new();
        };
        self.chains[&info.chain].iter().rev().copied().collect()
    }

    pub fn chain_len(&self, sequence_number: SequenceNumber) -> usize {
        self.packets
            .get(&sequence_number)
            .map_or(0, |info| self.chains[&info.chain].len())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SequenceNumber, &TransmissionInfo)> {
        self.packets.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn has_pending(&self) -> bool {
        self.pending_count > 0
    }

    pub fn has_multiple_pending(&self) -> bool {
        self.pending_count > 1
    }

    pub fn has_unacked_retransmittable_frames(&self) -> bool {
        self.retransmittable_count > 0
    }

    /// Whether any packet in flight still owns its frames. Distinct from
    /// [`Self::has_unacked_retransmittable_frames`]: a packet that was abandoned and queued for
    /// retransmission keeps its frames while out of flight, and must not count here.
    pub fn has_pending_retransmittable_frames(&self) -> bool {
        self.packets
            .values()
            .any(|info| info.pending && info.retransmittable_frames.is_some())
    }

    /// The lowest still-tracked sequence number, or the next one to be sent when nothing is
    /// tracked.
    pub fn least_unacked_sent_packet(&self) -> SequenceNumber {
        match self.packets.keys().next() {
            Some(&first) => first,
            None => self.largest_sent_packet + 1,
        }
    }

    pub fn largest_sent_packet(&self) -> SequenceNumber {
        self.largest_sent_packet
    }

    pub fn largest_serialized_packet(&self) -> SequenceNumber {
        self.largest_serialized_packet
    }

    /// Send time of the oldest pending packet.
    pub fn first_pending_sent_time(&self) -> Option<QuicTime> {
        self.packets.values().find(|info| info.pending).map(|info| info.sent_time)
    }

    /// Send time of the newest pending packet.
    pub fn last_pending_sent_time(&self) -> Option<QuicTime> {
        self.packets.values().rev().find(|info| info.pending).map(|info| info.sent_time)
    }

    /// The number of entries whose frames carry crypto handshake data. Used to audit the
    /// manager's handshake counter.
    pub fn crypto_frame_packet_count(&self) -> usize {
        self.packets.values().filter(|info| info.has_crypto_handshake()).count()
    }

    pub(crate) fn is_consistent(&self) -> bool {
        let mut actual_pending = 0;
        let mut actual_retransmittable = 0;
        for (&sequence_number, info) in &self.packets {
            if info.pending {
                actual_pending += 1;
                if info.sent_time.is_zero() || info.bytes_sent == 0 {
                    return false;
                }
                if sequence_number > self.largest_sent_packet {
                    return false;
                }
            }
            if info.retransmittable_frames.is_some() {
                actual_retransmittable += 1;
            }
            match self.chains.get(&info.chain) {
                Some(chain) if chain.contains(&sequence_number) => {}
                _ => return false,
            }
        }
        for (id, chain) in &self.chains {
            if chain.is_empty() {
                return false;
            }
            for member in chain {
                match self.packets.get(member) {
                    Some(info) if info.chain == *id => {}
                    _ => return false,
                }
            }
        }
        actual_pending == self.pending_count
            && actual_retransmittable == self.retransmittable_count
    }
}
