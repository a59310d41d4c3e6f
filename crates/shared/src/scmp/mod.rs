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

//! Broker sub-protocol framing. A WebSocket binary frame carries one or
//! more command blocks:
//!
//! ```text
//! VERB\r\n
//! Name: Value\r\n
//! ...\r\n
//! \r\n
//! <payload of Content-Length bytes, when present>
//! ```

use crate::errors::CommandError;

pub mod headers {
    pub const NAME: &str = "Name";
    pub const QUEUE: &str = "Queue";
    pub const CONTINUE_WITH: &str = "ContinueWith";
    pub const ACK_WINDOW: &str = "AckWindow";
    pub const SELF_DELIVERY: &str = "SelfDelivery";
    pub const GROUP: &str = "Group";
    pub const DESTINATION: &str = "Destination";
    pub const CONTENT_TYPE: &str = "Content-Type";
    pub const CONTENT_LENGTH: &str = "Content-Length";
    pub const SEQ: &str = "Seq";
    pub const SENDER: &str = "Sender";
    pub const CLIENT: &str = "Client";
    pub const TYPE: &str = "Type";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Connect,
    Disconnect,
    Subscribe,
    Unsubscribe,
    Send,
    State,
}

impl Verb {
    pub fn parse(line: &str) -> Option<Verb> {
        match line {
            "CONNECT" => Some(Verb::Connect),
            "DISCONNECT" => Some(Verb::Disconnect),
            "SUBSCRIBE" => Some(Verb::Subscribe),
            "UNSUBSCRIBE" => Some(Verb::Unsubscribe),
            "SEND" => Some(Verb::Send),
            "STATE" => Some(Verb::State),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Connect => "CONNECT",
            Verb::Disconnect => "DISCONNECT",
            Verb::Subscribe => "SUBSCRIBE",
            Verb::Unsubscribe => "UNSUBSCRIBE",
            Verb::Send => "SEND",
            Verb::State => "STATE",
        }
    }
}

#[derive(Debug)]
pub struct Command {
    pub verb: Verb,
    pub headers: Vec<(String, String)>,
    pub payload: Vec<u8>,
    /// Size of the block on the wire, headers included.
    pub wire_len: usize,
}

impl Command {
    /// Parses every command block in one frame. Trailing line breaks
    /// between blocks are tolerated.
    pub fn parse_all(frame: &[u8]) -> Result<Vec<Command>, CommandError> {
        let mut commands = Vec::new();
        let mut pos = 0;
        while let Some(command) = Self::parse_next(frame, &mut pos)? {
            commands.push(command);
        }
        if commands.is_empty() {
            return Err(CommandError::new("empty command frame"));
        }
        Ok(commands)
    }

    fn parse_next(frame: &[u8], pos: &mut usize) -> Result<Option<Command>, CommandError> {
        // Tolerate blank lines between blocks
        while frame[*pos..].starts_with(b"\r\n") {
            *pos += 2;
        }
        if *pos >= frame.len() {
            return Ok(None);
        }

        let rest = &frame[*pos..];
        let head_end = rest
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .ok_or_else(|| CommandError::new("unterminated command head"))?;

        let head = std::str::from_utf8(&rest[..head_end])
            .map_err(|_| CommandError::new("command head is not valid UTF-8"))?;

        let mut lines = head.split("\r\n");
        let verb_line = lines.next().unwrap_or("");
        let verb = Verb::parse(verb_line)
            .ok_or_else(|| CommandError::new(format!("unknown command: {:?}", verb_line)))?;

        let mut headers = Vec::new();
        let mut content_length = 0usize;
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| CommandError::new(format!("malformed header: {:?}", line)))?;
            let name = name.trim();
            let value = value.trim();
            if name.eq_ignore_ascii_case(headers::CONTENT_LENGTH) {
                content_length = value.parse::<usize>().map_err(|_| {
                    CommandError::new(format!("invalid Content-Length: {:?}", value))
                })?;
            }
            headers.push((name.to_string(), value.to_string()));
        }

        let payload_start = head_end + 4;
        if rest.len() < payload_start + content_length {
            return Err(CommandError::new("truncated command payload"));
        }
        let payload = rest[payload_start..payload_start + content_length].to_vec();

        let wire_len = payload_start + content_length;
        *pos += wire_len;

        Ok(Some(Command {
            verb,
            headers,
            payload,
            wire_len,
        }))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for a header that may repeat or hold comma-separated
    /// lists (SUBSCRIBE's Group).
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.headers
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .flat_map(|(_, v)| v.split(','))
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

fn block(verb: &str, headers: &[(&str, String)], payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(64 + payload.len());
    frame.extend_from_slice(verb.as_bytes());
    frame.extend_from_slice(b"\r\n");
    for (name, value) in headers {
        frame.extend_from_slice(name.as_bytes());
        frame.extend_from_slice(b": ");
        frame.extend_from_slice(value.as_bytes());
        frame.extend_from_slice(b"\r\n");
    }
    if !payload.is_empty() {
        frame.extend_from_slice(
            format!("{}: {}\r\n", headers::CONTENT_LENGTH, payload.len()).as_bytes(),
        );
    }
    frame.extend_from_slice(b"\r\n");
    frame.extend_from_slice(payload);
    frame
}

pub fn connected(queue: &str, client: &str, ack_window: u32) -> Vec<u8> {
    block(
        "CONNECTED",
        &[
            (headers::QUEUE, queue.to_string()),
            (headers::CLIENT, client.to_string()),
            (headers::ACK_WINDOW, ack_window.to_string()),
        ],
        &[],
    )
}

pub fn ack(seq: u64) -> Vec<u8> {
    block("ACK", &[(headers::SEQ, seq.to_string())], &[])
}

pub fn error(reason: &str) -> Vec<u8> {
    block("ERROR", &[], reason.as_bytes())
}

pub fn message(
    sender: &str,
    destination: &str,
    seq: u64,
    mime_type: &str,
    payload: &[u8],
) -> Vec<u8> {
    block(
        "MESSAGE",
        &[
            (headers::SENDER, sender.to_string()),
            (headers::DESTINATION, destination.to_string()),
            (headers::SEQ, seq.to_string()),
            (headers::CONTENT_TYPE, mime_type.to_string()),
        ],
        payload,
    )
}

pub fn enter(group: &str, client: &str) -> Vec<u8> {
    block(
        "ENTER",
        &[
            (headers::GROUP, group.to_string()),
            (headers::CLIENT, client.to_string()),
        ],
        &[],
    )
}

pub fn leave(group: &str, client: &str) -> Vec<u8> {
    block(
        "LEAVE",
        &[
            (headers::GROUP, group.to_string()),
            (headers::CLIENT, client.to_string()),
        ],
        &[],
    )
}

pub fn disconnected(client: &str) -> Vec<u8> {
    block("DISCONNECTED", &[(headers::CLIENT, client.to_string())], &[])
}

pub fn state(queue: &str, json: &[u8]) -> Vec<u8> {
    block("STATE", &[(headers::QUEUE, queue.to_string())], json)
}

#[cfg(test)]
mod tests;
