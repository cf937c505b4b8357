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

//! Loss recovery and retransmission scheduling for a QUIC-style transport endpoint.
//!
//! The central type is [`api::SentPacketManager`]: it tracks every packet handed to the wire,
//! decides when packets are acked or lost, queues retransmissions, feeds round-trip samples to a
//! pluggable congestion controller and reports the deadlines the owning connection should arm its
//! retransmission timer with.

use crate::api::Clock;
use crate::api::ConnectionStats;
use crate::api::FeatureFlags;
use crate::api::NullAckNotifierManager;
use crate::api::SentPacketManager;
use crate::congestion::CongestionFeedbackKind;
use std::cell::RefCell;
use std::rc::Rc;

pub mod api;

pub(crate) mod congestion;
pub(crate) mod tx;
pub(crate) mod types;

#[cfg(test)]
pub(crate) mod testing;

/// Returns the version of this crate.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Creates a [`SentPacketManager`] with default feature flags and no ack-notifier fabric.
///
/// Connections that need delivery notifications or non-default flags use
/// [`SentPacketManager::new`] directly.
pub fn new_sent_packet_manager(
    is_server: bool,
    clock: Rc<dyn Clock>,
    stats: Rc<RefCell<ConnectionStats>>,
    feedback_kind: CongestionFeedbackKind,
) -> SentPacketManager {
    SentPacketManager::new(
        is_server,
        clock,
        stats,
        feedback_kind,
        FeatureFlags::default(),
        Box::new(NullAckNotifierManager),
    )
}
