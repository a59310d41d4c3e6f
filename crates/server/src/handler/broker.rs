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

use std::sync::Arc;

use shared::{
    log,
    scmp::{self, Command, Verb, headers},
    websocket,
};

use crate::{
    consts::{DEFAULT_ACK_WINDOW, MAX_ACK_WINDOW},
    queue::{Queue, QueueError},
    session::SessionHandle,
};

/// Per-session scmp state machine. Lives on the queue worker; frames
/// reach it through the worker mailbox, replies leave through the
/// session outbox.
pub struct BrokerHandler {
    session: SessionHandle,
    client_name: Option<String>,
    ack_window: u32,
    ack_pending: u32,
    last_seq: u64,
    finished: bool,
}

impl BrokerHandler {
    pub fn new(session: SessionHandle) -> BrokerHandler {
        BrokerHandler {
            session,
            client_name: None,
            ack_window: DEFAULT_ACK_WINDOW,
            ack_pending: 0,
            last_seq: 0,
            finished: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// True once the queue disowned this session (backlog drop, name
    /// replaced). The worker prunes defunct handlers on its tick.
    pub fn is_defunct(&self, _queue: &Queue) -> bool {
        self.session.is_closed()
    }

    pub fn handle_frame(&mut self, queue: &mut Queue, payload: &[u8]) {
        let commands = match Command::parse_all(payload) {
            Ok(commands) => commands,
            Err(e) => {
                // Malformed framing is fatal
                log::warn!("[{}] bad command frame: {}", self.session.peer(), e);
                self.fatal(queue);
                return;
            }
        };

        for command in commands {
            if self.finished {
                break;
            }
            match command.verb {
                Verb::Connect => self.command_connect(queue, &command),
                Verb::Disconnect => self.command_disconnect(queue),
                Verb::Subscribe => self.command_subscribe(queue, &command),
                Verb::Unsubscribe => self.command_unsubscribe(queue, &command),
                Verb::Send => self.command_send(queue, &command),
                Verb::State => self.command_state(queue, &command),
            }
        }
    }

    /// One second tick: flush a partially filled ack window.
    pub fn tick(&mut self, _queue: &mut Queue) {
        if self.ack_pending > 0 {
            self.flush_ack();
        }
    }

    /// The connection is gone without DISCONNECT.
    pub fn closed(&mut self, queue: &mut Queue) {
        if let Some(name) = self.client_name.take() {
            // Only drop the client if the name still belongs to us; a
            // reconnect may have taken it over already
            if queue.client_session_id(&name) == Some(self.session.id()) {
                queue.drop_client(&name);
            }
        }
        self.finished = true;
    }

    // ------------------------------------------------------------------
    //  Commands
    // ------------------------------------------------------------------

    fn command_connect(&mut self, queue: &mut Queue, command: &Command) {
        if self.client_name.is_some() {
            self.reply_error("already connected");
            return;
        }

        let Some(name) = command.header(headers::NAME) else {
            self.reply_error("CONNECT requires a Name header");
            return;
        };
        let name = name.to_string();

        let continue_with = match command.header(headers::CONTINUE_WITH) {
            Some(value) => match value.parse::<u64>() {
                Ok(seq) => Some(seq),
                Err(_) => {
                    self.reply_error("invalid ContinueWith value");
                    return;
                }
            },
            None => None,
        };

        let ack_window = command
            .header(headers::ACK_WINDOW)
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(DEFAULT_ACK_WINDOW)
            .clamp(1, MAX_ACK_WINDOW);

        let self_delivery = command
            .header(headers::SELF_DELIVERY)
            .map(|v| v.eq_ignore_ascii_case("yes") || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        match queue.connect(&name, self.session.clone(), self_delivery, continue_with) {
            Ok(()) => {
                self.ack_window = ack_window;
                self.client_name = Some(name.clone());
                self.reply(scmp::connected(queue.name(), &name, ack_window));
                if let Some(from) = continue_with {
                    queue.resume(&name, from);
                }
            }
            Err(e) => self.reply_error(&e.to_string()),
        }
    }

    fn command_disconnect(&mut self, queue: &mut Queue) {
        if let Some(name) = self.client_name.take() {
            if queue.client_session_id(&name) == Some(self.session.id()) {
                queue.disconnect(&name);
            }
        }
        self.reply(scmp::ack(self.last_seq));
        self.session.close();
        self.finished = true;
    }

    fn command_subscribe(&mut self, queue: &mut Queue, command: &Command) {
        let Some(name) = self.client_name.clone() else {
            self.reply_error("not connected");
            return;
        };

        let groups: Vec<String> = command
            .header_values(headers::GROUP)
            .map(|g| g.to_string())
            .collect();
        if groups.is_empty() {
            self.reply_error("SUBSCRIBE requires a Group header");
            return;
        }

        for group in &groups {
            if let Err(e) = queue.subscribe(&name, group) {
                self.reply_error(&e.to_string());
                return;
            }
        }
        self.reply(scmp::ack(self.last_seq));
    }

    fn command_unsubscribe(&mut self, queue: &mut Queue, command: &Command) {
        let Some(name) = self.client_name.clone() else {
            self.reply_error("not connected");
            return;
        };

        let groups: Vec<String> = command
            .header_values(headers::GROUP)
            .map(|g| g.to_string())
            .collect();
        if groups.is_empty() {
            self.reply_error("UNSUBSCRIBE requires a Group header");
            return;
        }

        for group in &groups {
            if let Err(e) = queue.unsubscribe(&name, group) {
                self.reply_error(&e.to_string());
                return;
            }
        }
        self.reply(scmp::ack(self.last_seq));
    }

    fn command_send(&mut self, queue: &mut Queue, command: &Command) {
        let Some(name) = self.client_name.clone() else {
            self.reply_error("not connected");
            return;
        };

        let Some(destination) = command.header(headers::DESTINATION) else {
            self.reply_error("SEND requires a Destination header");
            return;
        };
        let destination = destination.to_string();
        let mime_type = command
            .header(headers::CONTENT_TYPE)
            .unwrap_or("application/octet-stream")
            .to_string();

        match queue.push(
            &name,
            &destination,
            &mime_type,
            command.payload.clone(),
            command.wire_len,
        ) {
            Ok(sequence) => {
                self.last_seq = sequence;
                self.ack_pending += 1;
                if self.ack_pending >= self.ack_window {
                    self.flush_ack();
                }
            }
            Err(e @ QueueError::Oversized { .. }) => {
                // Admission failure; the session stays usable
                self.reply_error(&e.to_string());
            }
            Err(e) => self.reply_error(&e.to_string()),
        }
    }

    fn command_state(&mut self, queue: &mut Queue, command: &Command) {
        // Type selects the snapshot flavor; everything maps to the
        // service snapshot for now
        let _ = command.header(headers::TYPE);
        self.reply(scmp::state(queue.name(), &queue.state_json()));
    }

    // ------------------------------------------------------------------
    //  Replies
    // ------------------------------------------------------------------

    fn flush_ack(&mut self) {
        self.ack_pending = 0;
        self.reply(scmp::ack(self.last_seq));
    }

    fn reply(&mut self, block: Vec<u8>) {
        let frame = Arc::new(websocket::binary(&block));
        if self.session.send(frame).is_err() {
            // A client that cannot even take replies is beyond help
            log::warn!("[{}] reply outbox full, closing", self.session.peer());
            self.session.close();
            self.finished = true;
        }
    }

    fn reply_error(&mut self, reason: &str) {
        log::debug!("[{}] error reply: {}", self.session.peer(), reason);
        self.reply(scmp::error(reason));
    }

    fn fatal(&mut self, queue: &mut Queue) {
        let _ = self
            .session
            .send(Arc::new(websocket::close(websocket::CLOSE_PROTOCOL_ERROR)));
        if let Some(name) = self.client_name.take() {
            if queue.client_session_id(&name) == Some(self.session.id()) {
                queue.drop_client(&name);
            }
        }
        self.session.close();
        self.finished = true;
    }
}
