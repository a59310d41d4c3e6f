// BSD 3-Clause License
// Copyright (c) 2026, Virtual Cable S.L.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions are met:
//
// 1. Redistributions of source code must retain the above copyright notice,
//    this list of conditions and the following disclaimer.
//
// 2. Redistributions in binary form must reproduce the above copyright notice,
//    this list of conditions and the following disclaimer in the documentation
//    and/or other materials provided with the distribution.
//
// 3. Neither the name of the copyright holder nor the names of its contributors
//    may be used to endorse or promote products derived from this software
//    without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS"
// AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO, THE
// IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
// DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE
// FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL, EXEMPLARY, OR CONSEQUENTIAL
// DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
// SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER
// CAUSED AND ON ANY THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY,
// OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE
// OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

// Authors: Adolfo Gómez, dkmaster at dkmon dot com

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::consts::STATS_RING_SIZE;

/// Received/sent pair for one counter dimension.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct Tx {
    pub received: u64,
    pub sent: u64,
}

impl Tx {
    fn accumulate(&mut self, other: &Tx) {
        self.received += other.received;
        self.sent += other.sent;
    }
}

/// Counters of one queue. `bytes` is wire bytes including framing,
/// `payload` only the message bodies.
#[derive(Debug, Default, Clone, Serialize)]
pub struct QueueStatistics {
    pub name: String,
    pub messages: Tx,
    pub bytes: Tx,
    pub payload: Tx,
    pub peak_backlog: u64,
    pub last_sequence: u64,
}

impl QueueStatistics {
    pub fn accumulate(&mut self, other: &QueueStatistics) {
        self.messages.accumulate(&other.messages);
        self.bytes.accumulate(&other.bytes);
        self.payload.accumulate(&other.payload);
        self.peak_backlog = self.peak_backlog.max(other.peak_backlog);
        self.last_sequence = self.last_sequence.max(other.last_sequence);
    }

    /// Returns the current counters and clears the deltas. Peaks and the
    /// last sequence carry over.
    pub fn take_snapshot(&mut self, reset: bool) -> QueueStatistics {
        let snapshot = self.clone();
        if reset {
            self.messages = Tx::default();
            self.bytes = Tx::default();
            self.payload = Tx::default();
            self.peak_backlog = 0;
        }
        snapshot
    }
}

/// One server wide sample: sum over all queues at a point in time.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ServerStatistics {
    pub sequence_number: i64,
    pub timestamp: DateTime<Utc>,
    pub messages: Tx,
    pub bytes: Tx,
    pub payload: Tx,
    pub queues: Vec<QueueStatistics>,
}

impl ServerStatistics {
    pub fn from_queues(queues: Vec<QueueStatistics>) -> ServerStatistics {
        let mut stats = ServerStatistics {
            timestamp: Utc::now(),
            queues,
            ..ServerStatistics::default()
        };
        for queue in &stats.queues {
            stats.messages.accumulate(&queue.messages);
            stats.bytes.accumulate(&queue.bytes);
            stats.payload.accumulate(&queue.payload);
        }
        stats
    }
}

/// Bounded history of snapshots plus running totals.
#[derive(Debug)]
pub struct StatisticsRing {
    samples: VecDeque<ServerStatistics>,
    cumulated: ServerStatistics,
}

impl StatisticsRing {
    pub fn new() -> Self {
        StatisticsRing {
            samples: VecDeque::with_capacity(STATS_RING_SIZE),
            cumulated: ServerStatistics {
                sequence_number: -1,
                ..ServerStatistics::default()
            },
        }
    }

    pub fn push(&mut self, mut sample: ServerStatistics) {
        sample.sequence_number = self
            .samples
            .back()
            .map(|s| s.sequence_number + 1)
            .unwrap_or(0);

        self.cumulated.timestamp = sample.timestamp;
        self.cumulated.messages.accumulate(&sample.messages);
        self.cumulated.bytes.accumulate(&sample.bytes);
        self.cumulated.payload.accumulate(&sample.payload);
        if self.cumulated.queues.len() < sample.queues.len() {
            self.cumulated
                .queues
                .resize_with(sample.queues.len(), QueueStatistics::default);
        }
        for (total, queue) in self.cumulated.queues.iter_mut().zip(&sample.queues) {
            if total.name.is_empty() {
                total.name = queue.name.clone();
            }
            total.accumulate(queue);
        }

        if self.samples.len() == STATS_RING_SIZE {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn last(&self) -> Option<&ServerStatistics> {
        self.samples.back()
    }

    pub fn cumulated(&self) -> &ServerStatistics {
        &self.cumulated
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl Default for StatisticsRing {
    fn default() -> Self {
        StatisticsRing::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(received: u64) -> ServerStatistics {
        ServerStatistics::from_queues(vec![QueueStatistics {
            name: "production".to_string(),
            messages: Tx {
                received,
                sent: received * 2,
            },
            ..QueueStatistics::default()
        }])
    }

    #[test]
    fn test_sequence_numbers_increase() {
        let mut ring = StatisticsRing::new();
        ring.push(sample(1));
        ring.push(sample(2));
        ring.push(sample(3));
        assert_eq!(ring.last().unwrap().sequence_number, 2);
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn test_totals_accumulate() {
        let mut ring = StatisticsRing::new();
        ring.push(sample(100));
        ring.push(sample(50));
        assert_eq!(ring.cumulated().messages.received, 150);
        assert_eq!(ring.cumulated().messages.sent, 300);
        assert_eq!(ring.cumulated().queues[0].messages.received, 150);
    }

    #[test]
    fn test_ring_is_bounded() {
        let mut ring = StatisticsRing::new();
        for i in 0..STATS_RING_SIZE + 10 {
            ring.push(sample(i as u64));
        }
        assert_eq!(ring.len(), STATS_RING_SIZE);
        // Sequence numbers keep counting past evicted samples
        assert_eq!(
            ring.last().unwrap().sequence_number,
            (STATS_RING_SIZE + 9) as i64
        );
    }

    #[test]
    fn test_snapshot_reset_keeps_peaks() {
        let mut stats = QueueStatistics {
            name: "q".to_string(),
            peak_backlog: 77,
            last_sequence: 12,
            messages: Tx {
                received: 5,
                sent: 9,
            },
            ..QueueStatistics::default()
        };
        let snapshot = stats.take_snapshot(true);
        assert_eq!(snapshot.messages.received, 5);
        assert_eq!(snapshot.peak_backlog, 77);
        assert_eq!(stats.messages.received, 0);
        assert_eq!(stats.last_sequence, 12);
    }

    #[test]
    fn test_from_queues_sums() {
        let stats = ServerStatistics::from_queues(vec![
            QueueStatistics {
                name: "a".to_string(),
                messages: Tx {
                    received: 100,
                    sent: 0,
                },
                ..QueueStatistics::default()
            },
            QueueStatistics {
                name: "b".to_string(),
                messages: Tx {
                    received: 50,
                    sent: 0,
                },
                ..QueueStatistics::default()
            },
        ]);
        assert_eq!(stats.messages.received, 150);
    }
}
