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

use crate::api::SerializedPacket;
use crate::types::SequenceNumber;

/// The dispatch fabric that matches acked sequence numbers back to interested parties.
///
/// The sent-packet manager drives this interface but does not care how delivery callbacks are
/// routed; a connection that doesn't need delivery notifications installs the
/// [`NullAckNotifierManager`].
pub trait AckNotifierManager {
    /// A packet with retransmittable frames has been serialized; any notifiers attached to its
    /// frames should be registered under its sequence number.
    fn on_serialized_packet(&mut self, packet: &SerializedPacket);

    /// The peer acknowledged `sequence_number`.
    fn on_packet_acked(&mut self, sequence_number: SequenceNumber);

    /// A payload that notifiers were registered for has moved to a new sequence number. Interest
    /// in `old_sequence_number` transfers to `new_sequence_number`.
    fn update_sequence_number(
        &mut self,
        old_sequence_number: SequenceNumber,
        new_sequence_number: SequenceNumber,
    );
}

/// Discards every notification.
#[derive(Debug, Default)]
pub struct NullAckNotifierManager;

impl AckNotifierManager for NullAckNotifierManager {
    fn on_serialized_packet(&mut self, _packet: &SerializedPacket) {}

    fn on_packet_acked(&mut self, _sequence_number: SequenceNumber) {}

    fn update_sequence_number(
        &mut self,
        _old_sequence_number: SequenceNumber,
        _new_sequence_number: SequenceNumber,
    ) {
    }
}
