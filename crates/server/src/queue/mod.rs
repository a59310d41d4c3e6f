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

use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    fmt,
    sync::{Arc, Mutex},
};

use anyhow::{Context, Result};
use serde::Serialize;

use shared::{log, scmp, websocket};

use crate::{
    config::{Config, QueueConfig},
    consts::{MAX_CLIENT_BACKLOG_BYTES, MAX_CLIENT_BACKLOG_MESSAGES},
    session::{FrameBuffer, SessionHandle},
    stats::QueueStatistics,
};

pub mod message;
pub mod processor;
pub mod worker;

pub use message::Message;
pub use processor::{Action, MessageProcessor};

/// Which synthetic notice a removal emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Notice {
    Leave,
    Disconnected,
}

#[derive(Debug, PartialEq, Eq)]
pub enum QueueError {
    InvalidName(String),
    AlreadyExists(String),
    UnknownGroup(String),
    NotConnected(String),
    Oversized { size: usize, limit: usize },
    ResumeGap { requested: u64, oldest: u64 },
}

impl std::error::Error for QueueError {}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::InvalidName(name) => write!(f, "invalid name {:?}", name),
            QueueError::AlreadyExists(name) => write!(f, "group {:?} already exists", name),
            QueueError::UnknownGroup(name) => write!(f, "unknown group {:?}", name),
            QueueError::NotConnected(name) => write!(f, "client {:?} is not connected", name),
            QueueError::Oversized { size, limit } => {
                write!(f, "payload of {} bytes exceeds limit of {}", size, limit)
            }
            QueueError::ResumeGap { requested, oldest } => write!(
                f,
                "sequence {} is no longer retained (oldest is {})",
                requested, oldest
            ),
        }
    }
}

#[derive(Debug, Default)]
struct Group {
    members: HashSet<String>,
}

struct Client {
    session: SessionHandle,
    subscriptions: HashSet<String>,
    self_delivery: bool,
    last_sent_seq: u64,
}

struct Retained {
    sequence: u64,
    payload_len: usize,
    frame: FrameBuffer,
}

/// One named topic namespace: groups, clients, sequencing, retention and
/// the processor chain. Owned exclusively by its worker task; everything
/// here is single-threaded except the statistics cell.
pub struct Queue {
    name: String,
    max_payload_size: usize,
    groups: HashMap<String, Group>,
    clients: HashMap<String, Client>,
    next_sequence: u64,
    retained: VecDeque<Retained>,
    retained_bytes: usize,
    retention_messages: usize,
    retention_bytes: usize,
    processors: Vec<Box<dyn MessageProcessor>>,
    stats: Arc<Mutex<QueueStatistics>>,
}

#[derive(Serialize)]
struct ClientState {
    name: String,
    subscriptions: Vec<String>,
    backlog_bytes: usize,
    last_sent_seq: u64,
    authenticated: bool,
    authorized: bool,
}

#[derive(Serialize)]
struct QueueState {
    name: String,
    groups: BTreeMap<String, Vec<String>>,
    clients: Vec<ClientState>,
    statistics: QueueStatistics,
}

impl Queue {
    pub fn new(name: &str, max_payload_size: usize) -> Queue {
        let stats = QueueStatistics {
            name: name.to_string(),
            ..QueueStatistics::default()
        };
        Queue {
            name: name.to_string(),
            max_payload_size,
            groups: HashMap::new(),
            clients: HashMap::new(),
            next_sequence: 1,
            retained: VecDeque::new(),
            retained_bytes: 0,
            retention_messages: crate::consts::DEFAULT_RETENTION_MESSAGES,
            retention_bytes: crate::consts::DEFAULT_RETENTION_BYTES,
            processors: Vec::new(),
            stats: Arc::new(Mutex::new(stats)),
        }
    }

    /// Builds the queue with groups and processor chain from its
    /// configuration block. Failures here abort server startup.
    pub fn from_config(config: &Config, queue_config: &QueueConfig) -> Result<Queue> {
        let mut queue = Queue::new(&queue_config.name, queue_config.max_payload_size);
        queue.retention_messages = queue_config.retention_messages;
        queue.retention_bytes = queue_config.retention_bytes;

        for group in &queue_config.groups {
            queue
                .add_group(group)
                .with_context(|| format!("queue {:?}: group {:?}", queue_config.name, group))?;
        }

        for name in &queue_config.message_processors {
            let mut proc = processor::create(name).with_context(|| {
                format!("unknown message processor interface {:?}", name)
            })?;
            proc.init(config, &queue_config.name).with_context(|| {
                format!("failed to initialize message processor {:?}", name)
            })?;
            queue.processors.push(proc);
        }

        Ok(queue)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }

    pub fn stats_handle(&self) -> Arc<Mutex<QueueStatistics>> {
        self.stats.clone()
    }

    pub fn set_retention(&mut self, messages: usize, bytes: usize) {
        self.retention_messages = messages;
        self.retention_bytes = bytes;
    }

    pub fn add_group(&mut self, name: &str) -> Result<(), QueueError> {
        if !valid_name(name) {
            return Err(QueueError::InvalidName(name.to_string()));
        }
        if self.groups.contains_key(name) {
            return Err(QueueError::AlreadyExists(name.to_string()));
        }
        self.groups.insert(name.to_string(), Group::default());
        Ok(())
    }

    pub fn has_group(&self, name: &str) -> bool {
        self.groups.contains_key(name)
    }

    pub fn has_client(&self, name: &str) -> bool {
        self.clients.contains_key(name)
    }

    /// Session currently bound to a client name. Lets a handler verify it
    /// still owns the name before acting on a connection loss.
    pub fn client_session_id(&self, name: &str) -> Option<crate::session::SessionId> {
        self.clients.get(name).map(|c| c.session.id())
    }

    /// Registers a client. A name already in use replaces (disconnects)
    /// the prior occupant. A `continue_with` request is only validated
    /// here; the caller triggers the replay with `resume` once its
    /// connect reply is on the wire.
    pub fn connect(
        &mut self,
        name: &str,
        session: SessionHandle,
        self_delivery: bool,
        continue_with: Option<u64>,
    ) -> Result<(), QueueError> {
        if !valid_name(name) {
            return Err(QueueError::InvalidName(name.to_string()));
        }

        // Resume must be answerable before any state changes
        if let Some(seq) = continue_with {
            self.check_resume(seq)?;
        }

        if self.clients.contains_key(name) {
            log::info!(
                "[{}] client {:?} reconnects, replacing previous session",
                self.name,
                name
            );
            self.remove_client(name, Notice::Disconnected);
        }

        self.clients.insert(
            name.to_string(),
            Client {
                session,
                subscriptions: HashSet::new(),
                self_delivery,
                last_sent_seq: 0,
            },
        );

        Ok(())
    }

    fn check_resume(&self, requested: u64) -> Result<(), QueueError> {
        if requested >= self.next_sequence {
            return Ok(()); // nothing to replay
        }
        match self.retained.front() {
            Some(first) if first.sequence <= requested => Ok(()),
            Some(first) => Err(QueueError::ResumeGap {
                requested,
                oldest: first.sequence,
            }),
            None => Err(QueueError::ResumeGap {
                requested,
                oldest: self.next_sequence,
            }),
        }
    }

    /// Replays every retained message with `sequence >= from` into the
    /// client's outbox, ahead of anything live.
    pub fn resume(&mut self, name: &str, from: u64) {
        let frames: Vec<(u64, usize, FrameBuffer)> = self
            .retained
            .iter()
            .filter(|r| r.sequence >= from)
            .map(|r| (r.sequence, r.payload_len, r.frame.clone()))
            .collect();

        let mut overflowed = Vec::new();
        if let Some(client) = self.clients.get_mut(name) {
            for (sequence, payload_len, frame) in frames {
                match client.session.send(frame) {
                    Ok(bytes) => {
                        client.last_sent_seq = sequence;
                        let mut stats = self.stats.lock().unwrap();
                        stats.messages.sent += 1;
                        stats.bytes.sent += bytes as u64;
                        stats.payload.sent += payload_len as u64;
                    }
                    Err(_) => {
                        overflowed.push(name.to_string());
                        break;
                    }
                }
            }
        }
        self.drop_overflowed(overflowed);
    }

    /// Joins `client` to `group`. Re-subscribing is a no-op reported as
    /// success. Every other member learns about the join.
    pub fn subscribe(&mut self, client: &str, group: &str) -> Result<(), QueueError> {
        if !self.clients.contains_key(client) {
            return Err(QueueError::NotConnected(client.to_string()));
        }
        let Some(entry) = self.groups.get_mut(group) else {
            return Err(QueueError::UnknownGroup(group.to_string()));
        };

        if !entry.members.insert(client.to_string()) {
            return Ok(()); // already a member
        }
        self.clients
            .get_mut(client)
            .map(|c| c.subscriptions.insert(group.to_string()));

        let notice = Arc::new(websocket::binary(&scmp::enter(group, client)));
        let audience = self.members_except(group, client);
        let overflowed = self.deliver(&audience, &notice, 0, None);
        self.drop_overflowed(overflowed);
        Ok(())
    }

    pub fn unsubscribe(&mut self, client: &str, group: &str) -> Result<(), QueueError> {
        if !self.clients.contains_key(client) {
            return Err(QueueError::NotConnected(client.to_string()));
        }
        let Some(entry) = self.groups.get_mut(group) else {
            return Err(QueueError::UnknownGroup(group.to_string()));
        };

        if !entry.members.remove(client) {
            return Ok(()); // was not a member
        }
        self.clients
            .get_mut(client)
            .map(|c| c.subscriptions.remove(group));

        let notice = Arc::new(websocket::binary(&scmp::leave(group, client)));
        let audience = self.members_except(group, client);
        let overflowed = self.deliver(&audience, &notice, 0, None);
        self.drop_overflowed(overflowed);
        Ok(())
    }

    /// Admits a message: size check, sequence assignment, processor
    /// chain, retention, fan-out to the target group. Returns the
    /// assigned sequence (also when a processor dropped the message; the
    /// sender is acknowledged either way).
    pub fn push(
        &mut self,
        sender: &str,
        target: &str,
        mime_type: &str,
        payload: Vec<u8>,
        frame_len: usize,
    ) -> Result<u64, QueueError> {
        if !self.clients.contains_key(sender) {
            return Err(QueueError::NotConnected(sender.to_string()));
        }
        if payload.len() > self.max_payload_size {
            return Err(QueueError::Oversized {
                size: payload.len(),
                limit: self.max_payload_size,
            });
        }
        if !self.groups.contains_key(target) {
            return Err(QueueError::UnknownGroup(target.to_string()));
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        {
            let mut stats = self.stats.lock().unwrap();
            stats.messages.received += 1;
            stats.bytes.received += frame_len as u64;
            stats.payload.received += payload.len() as u64;
            stats.last_sequence = sequence;
        }

        let mut message = Message::regular(sequence, sender, target, mime_type, payload);
        for proc in &mut self.processors {
            match proc.process(&mut message) {
                Action::Pass | Action::Replace => {}
                Action::Drop => {
                    log::debug!(
                        "[{}] message {} dropped by processor {}",
                        self.name,
                        sequence,
                        proc.name()
                    );
                    return Ok(sequence);
                }
            }
        }

        let payload_len = message.payload.len();
        let frame: FrameBuffer = Arc::new(websocket::binary(&scmp::message(
            &message.sender,
            &message.target,
            sequence,
            &message.mime_type,
            &message.payload,
        )));

        self.retain(sequence, payload_len, frame.clone());

        let self_delivery = self
            .clients
            .get(sender)
            .map(|c| c.self_delivery)
            .unwrap_or(false);
        let mut audience: Vec<String> = self.groups[target]
            .members
            .iter()
            .filter(|m| self_delivery || m.as_str() != sender)
            .cloned()
            .collect();
        audience.sort(); // deterministic delivery order eases testing

        let overflowed = self.deliver(&audience, &frame, payload_len, Some(sequence));
        self.drop_overflowed(overflowed);
        self.update_peak_backlog();

        Ok(sequence)
    }

    /// Graceful leave: every group the client was in gets a leave notice,
    /// then the client is removed and its session closed.
    pub fn disconnect(&mut self, client: &str) {
        self.remove_client(client, Notice::Leave);
    }

    /// Abrupt removal (socket loss, backlog overflow): one disconnected
    /// notice to every subscriber sharing a group with the client.
    pub fn drop_client(&mut self, client: &str) {
        self.remove_client(client, Notice::Disconnected);
    }

    /// One second tick from the worker. Keeps the backlog peak statistic
    /// current even when no message moves.
    pub fn timeout(&mut self) {
        self.update_peak_backlog();
    }

    /// Membership and statistics snapshot for STATE replies.
    pub fn state_json(&self) -> Vec<u8> {
        let statistics = self.stats.lock().unwrap().clone();
        let state = QueueState {
            name: self.name.clone(),
            groups: self
                .groups
                .iter()
                .map(|(name, group)| {
                    let mut members: Vec<String> = group.members.iter().cloned().collect();
                    members.sort();
                    (name.clone(), members)
                })
                .collect(),
            clients: {
                let mut clients: Vec<ClientState> = self
                    .clients
                    .iter()
                    .map(|(name, client)| ClientState {
                        name: name.clone(),
                        subscriptions: {
                            let mut subs: Vec<String> =
                                client.subscriptions.iter().cloned().collect();
                            subs.sort();
                            subs
                        },
                        backlog_bytes: client.session.backlog_bytes(),
                        last_sent_seq: client.last_sent_seq,
                        authenticated: client.session.is_authenticated(),
                        authorized: client.session.is_authorized(),
                    })
                    .collect();
                clients.sort_by(|a, b| a.name.cmp(&b.name));
                clients
            },
            statistics,
        };
        serde_json::to_vec(&state).unwrap_or_default()
    }

    /// Closes every client session. Called once the worker loop exits.
    pub fn shutdown(&mut self) {
        for (_, client) in self.clients.drain() {
            client.session.close();
        }
        for group in self.groups.values_mut() {
            group.members.clear();
        }
    }

    // ------------------------------------------------------------------
    //  Internals
    // ------------------------------------------------------------------

    fn retain(&mut self, sequence: u64, payload_len: usize, frame: FrameBuffer) {
        self.retained_bytes += payload_len;
        self.retained.push_back(Retained {
            sequence,
            payload_len,
            frame,
        });
        while self.retained.len() > self.retention_messages
            || self.retained_bytes > self.retention_bytes
        {
            match self.retained.pop_front() {
                Some(evicted) => self.retained_bytes -= evicted.payload_len,
                None => break,
            }
        }
    }

    fn members_except(&self, group: &str, except: &str) -> Vec<String> {
        let mut members: Vec<String> = self
            .groups
            .get(group)
            .map(|g| {
                g.members
                    .iter()
                    .filter(|m| m.as_str() != except)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        members.sort();
        members
    }

    /// Enqueues `frame` toward every named client. Returns the clients
    /// whose backlog overflowed; the caller removes them.
    fn deliver(
        &mut self,
        audience: &[String],
        frame: &FrameBuffer,
        payload_len: usize,
        sequence: Option<u64>,
    ) -> Vec<String> {
        let mut overflowed = Vec::new();
        for name in audience {
            let Some(client) = self.clients.get_mut(name) else {
                continue;
            };
            match client.session.send(frame.clone()) {
                Ok(bytes) => {
                    if let Some(sequence) = sequence {
                        client.last_sent_seq = sequence;
                    }
                    let mut stats = self.stats.lock().unwrap();
                    stats.messages.sent += 1;
                    stats.bytes.sent += bytes as u64;
                    stats.payload.sent += payload_len as u64;

                    if client.session.backlog_bytes() > MAX_CLIENT_BACKLOG_BYTES
                        || client.session.backlog_messages() > MAX_CLIENT_BACKLOG_MESSAGES
                    {
                        overflowed.push(name.clone());
                    }
                }
                Err(_) => overflowed.push(name.clone()),
            }
        }
        overflowed
    }

    /// Removes overflowed subscribers. Disconnect notices may overflow
    /// further clients, hence the work list instead of recursion.
    fn drop_overflowed(&mut self, mut pending: Vec<String>) {
        while let Some(name) = pending.pop() {
            if !self.clients.contains_key(&name) {
                continue;
            }
            log::warn!(
                "[{}] client {:?} exceeded its backlog, dropping",
                self.name,
                name
            );
            let more = self.remove_client_collect(&name, Notice::Disconnected);
            pending.extend(more);
        }
    }

    fn remove_client(&mut self, name: &str, kind: Notice) {
        let overflowed = self.remove_client_collect(name, kind);
        self.drop_overflowed(overflowed);
    }

    /// Removes one client, emits the appropriate notices and reports any
    /// subscribers that overflowed while receiving them.
    fn remove_client_collect(&mut self, name: &str, kind: Notice) -> Vec<String> {
        let Some(client) = self.clients.remove(name) else {
            return Vec::new();
        };

        let mut subscriptions: Vec<String> = client.subscriptions.iter().cloned().collect();
        subscriptions.sort();
        for group in &subscriptions {
            if let Some(entry) = self.groups.get_mut(group) {
                entry.members.remove(name);
            }
        }
        client.session.close();

        let mut overflowed = Vec::new();
        match kind {
            Notice::Leave => {
                for group in &subscriptions {
                    let notice = Arc::new(websocket::binary(&scmp::leave(group, name)));
                    let audience = self.members_except(group, name);
                    overflowed.extend(self.deliver(&audience, &notice, 0, None));
                }
            }
            _ => {
                // One notice per affected subscriber, groups deduplicated
                let mut audience: Vec<String> = subscriptions
                    .iter()
                    .filter_map(|g| self.groups.get(g))
                    .flat_map(|g| g.members.iter().cloned())
                    .collect::<HashSet<String>>()
                    .into_iter()
                    .collect();
                audience.sort();
                let notice = Arc::new(websocket::binary(&scmp::disconnected(name)));
                overflowed.extend(self.deliver(&audience, &notice, 0, None));
            }
        }
        overflowed
    }

    fn update_peak_backlog(&mut self) {
        let peak = self
            .clients
            .values()
            .map(|c| c.session.backlog_bytes() as u64)
            .max()
            .unwrap_or(0);
        let mut stats = self.stats.lock().unwrap();
        stats.peak_backlog = stats.peak_backlog.max(peak);
    }
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 128
        && name
            .chars()
            .all(|c| c.is_ascii_graphic() && !matches!(c, ',' | ':' | '\'' | '"' | '`' | '\\'))
}
