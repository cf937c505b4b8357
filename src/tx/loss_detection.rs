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
use crate::tx::unacked_packet_map::UnackedPacketMap;
use crate::types::SequenceNumber;
use std::collections::BTreeSet;

/// The number of times a packet must be reported missing before it is declared lost, matching
/// TCP's three duplicate acks.
const NUMBER_OF_NACKS_BEFORE_RETRANSMISSION: u64 = 3;

/// Returns the pending packets at or below `largest_observed` that this ack proves lost.
///
/// A packet is lost once its nack count reaches the threshold. The threshold is normally three,
/// but drops to the gap between the packet and `largest_observed` when the largest observed packet
/// is also the largest ever sent: nothing newer remains in flight to produce further nacks, so a
/// small tail would otherwise wait for a timeout (early retransmit, RFC 5827).
///
/// This is a pure function: it inspects the registry and decides. Every mutation (retransmission
/// choice, congestion notification, removal) is left to the caller.
pub(crate) fn detect_lost_packets(
    unacked_packets: &UnackedPacketMap,
    _now: QuicTime,
    largest_observed: SequenceNumber,
) -> BTreeSet<SequenceNumber> {
    let mut lost_packets = BTreeSet::new();

    for (&sequence_number, info) in unacked_packets.iter() {
        if sequence_number > largest_observed {
            break;
        }
        if !info.pending {
            continue;
        }

        let mut num_nacks_needed = NUMBER_OF_NACKS_BEFORE_RETRANSMISSION;
        if info.retransmittable_frames.is_some()
            && unacked_packets.largest_sent_packet() == largest_observed
        {
            num_nacks_needed = sequence_number.distance_to(largest_observed);
        }

        if info.nack_count < num_nacks_needed {
            continue;
        }
        lost_packets.insert(sequence_number);
    }

    lost_packets
}
