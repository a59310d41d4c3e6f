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

//! Database sub-protocol framing. One command per WebSocket binary frame:
//! `cmd: u8 | body`. Responses echo the command byte: `cmd: u8 |
//! status: u8 | body`. All integers little-endian.

use num_enum::{FromPrimitive, IntoPrimitive};

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Command {
    Start = 1,
    Commit = 2,
    Rollback = 3,
    Execute = 4,
    Query = 5,
    QueryEnd = 6,
    LastId = 7,
    AffectedRows = 8,
    Fetch = 9,
    #[num_enum(default)]
    Unknown = 0,
}

impl Command {
    /// Commands whose body is a SQL or identifier text tail.
    pub fn takes_text(&self) -> bool {
        matches!(self, Command::Execute | Command::Query | Command::LastId)
    }
}

pub const STATUS_OK: u8 = 0;
pub const STATUS_ERROR: u8 = 1;
// Distinct from STATUS_ERROR so a drained result set is not an error
pub const STATUS_END_OF_ROWS: u8 = 2;

#[derive(Debug)]
pub struct Request {
    pub command: Command,
    pub text: String,
}

impl Request {
    /// Splits a frame into command byte and optional text tail. The tail
    /// may carry a terminating NUL which is stripped.
    pub fn parse(frame: &[u8]) -> Option<Request> {
        let (&cmd, tail) = frame.split_first()?;
        let command = Command::from(cmd);
        if command == Command::Unknown {
            return None;
        }

        let mut text = String::new();
        if command.takes_text() {
            if tail.is_empty() {
                return None;
            }
            let tail = tail.strip_suffix(&[0u8]).unwrap_or(tail);
            text = String::from_utf8(tail.to_vec()).ok()?;
        }

        Some(Request { command, text })
    }
}

pub fn status_response(command: Command, status: u8, message: &str) -> Vec<u8> {
    let mut response = Vec::with_capacity(2 + message.len());
    response.push(command.into());
    response.push(status);
    response.extend_from_slice(message.as_bytes());
    response
}

pub fn u64_response(command: Command, value: u64) -> Vec<u8> {
    let mut response = Vec::with_capacity(10);
    response.push(command.into());
    response.push(STATUS_OK);
    response.extend_from_slice(&value.to_le_bytes());
    response
}

/// QUERY response: status, field count and the field name list.
pub fn fields_response(command: Command, names: &[String]) -> Vec<u8> {
    let mut response = Vec::new();
    response.push(command.into());
    response.push(STATUS_OK);
    response.extend_from_slice(&(names.len() as i32).to_le_bytes());
    for name in names {
        response.extend_from_slice(&(name.len() as i32).to_le_bytes());
        response.extend_from_slice(name.as_bytes());
    }
    response
}

/// FETCH response: one row, `len = -1` flags SQL NULL.
pub fn row_response(fields: &[Option<Vec<u8>>]) -> Vec<u8> {
    let mut response = Vec::new();
    response.push(Command::Fetch.into());
    response.push(STATUS_OK);
    response.extend_from_slice(&(fields.len() as i32).to_le_bytes());
    for field in fields {
        match field {
            Some(content) => {
                response.extend_from_slice(&(content.len() as i32).to_le_bytes());
                response.extend_from_slice(content);
            }
            None => response.extend_from_slice(&(-1i32).to_le_bytes()),
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_command() {
        let request = Request::parse(&[1]).unwrap();
        assert_eq!(request.command, Command::Start);
        assert!(request.text.is_empty());
    }

    #[test]
    fn test_parse_text_command_strips_nul() {
        let mut frame = vec![4u8];
        frame.extend_from_slice(b"CREATE TABLE t(x INT)\0");
        let request = Request::parse(&frame).unwrap();
        assert_eq!(request.command, Command::Execute);
        assert_eq!(request.text, "CREATE TABLE t(x INT)");
    }

    #[test]
    fn test_parse_rejects_empty_sql() {
        assert!(Request::parse(&[5]).is_none());
    }

    #[test]
    fn test_parse_rejects_unknown_command() {
        assert!(Request::parse(&[0]).is_none());
        assert!(Request::parse(&[200]).is_none());
        assert!(Request::parse(&[]).is_none());
    }

    #[test]
    fn test_status_response_layout() {
        assert_eq!(
            status_response(Command::Start, STATUS_OK, "OK"),
            vec![1, 0, b'O', b'K']
        );
        assert_eq!(
            status_response(Command::Execute, STATUS_ERROR, "Error"),
            vec![4, 1, b'E', b'r', b'r', b'o', b'r']
        );
    }

    #[test]
    fn test_u64_response_little_endian() {
        let response = u64_response(Command::LastId, 0x0102030405060708);
        assert_eq!(response[..2], [7, 0]);
        assert_eq!(response[2..], [8, 7, 6, 5, 4, 3, 2, 1]);
    }

    #[test]
    fn test_fields_response_layout() {
        let response =
            fields_response(Command::Query, &["_oid".to_string(), "code".to_string()]);
        assert_eq!(response[..2], [5, 0]);
        assert_eq!(&response[2..6], &2i32.to_le_bytes());
        assert_eq!(&response[6..10], &4i32.to_le_bytes());
        assert_eq!(&response[10..14], b"_oid");
        assert_eq!(&response[14..18], &4i32.to_le_bytes());
        assert_eq!(&response[18..22], b"code");
    }

    #[test]
    fn test_row_response_null_field() {
        let response = row_response(&[Some(b"7".to_vec()), None]);
        assert_eq!(response[..2], [9, 0]);
        assert_eq!(&response[2..6], &2i32.to_le_bytes());
        assert_eq!(&response[6..10], &1i32.to_le_bytes());
        assert_eq!(response[10], b'7');
        assert_eq!(&response[11..15], &(-1i32).to_le_bytes());
    }
}
