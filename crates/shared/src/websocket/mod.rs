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

use num_enum::{FromPrimitive, IntoPrimitive};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::errors::FrameError;

// Close status codes, RFC 6455 section 7.4.1
pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;
pub const CLOSE_TOO_BIG: u16 = 1009;

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xa,
    #[num_enum(default)]
    Reserved = 0xf,
}

impl Opcode {
    fn is_control(&self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }
}

/// One complete inbound message (fragments already reassembled) or control
/// frame.
#[derive(Debug, PartialEq, Eq)]
pub enum Frame {
    Text(Vec<u8>),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(Option<u16>),
}

struct RawFrame {
    fin: bool,
    opcode: Opcode,
    payload: Vec<u8>,
}

/// Decoder for masked client frames. Fragmented messages are reassembled up
/// to `max_payload_size`; control frames pass through even between
/// fragments.
#[derive(Debug)]
pub struct FrameReader {
    max_payload_size: usize,
    fragment_opcode: Option<Opcode>,
    fragment: Vec<u8>,
}

impl FrameReader {
    pub fn new(max_payload_size: usize) -> Self {
        FrameReader {
            max_payload_size,
            fragment_opcode: None,
            fragment: Vec::new(),
        }
    }

    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }

    /// Reads until a full message or control frame is available. `buf` is
    /// the connection's rolling inbound buffer shared with the HTTP parser.
    pub async fn read_message<R: AsyncRead + Unpin>(
        &mut self,
        reader: &mut R,
        buf: &mut Vec<u8>,
    ) -> Result<Frame, FrameError> {
        loop {
            let raw = self.read_raw(reader, buf).await?;

            if raw.opcode.is_control() {
                if !raw.fin {
                    return Err(FrameError::Protocol("fragmented control frame"));
                }
                if raw.payload.len() > 125 {
                    return Err(FrameError::Protocol("oversized control frame"));
                }
                return Ok(match raw.opcode {
                    Opcode::Ping => Frame::Ping(raw.payload),
                    Opcode::Pong => Frame::Pong(raw.payload),
                    _ => Frame::Close(close_code(&raw.payload)),
                });
            }

            match raw.opcode {
                Opcode::Continuation => {
                    if self.fragment_opcode.is_none() {
                        return Err(FrameError::Protocol("continuation without start"));
                    }
                    self.append_fragment(raw.payload)?;
                    if raw.fin {
                        let opcode = self.fragment_opcode.take().unwrap_or(Opcode::Binary);
                        let payload = std::mem::take(&mut self.fragment);
                        return Ok(assemble(opcode, payload));
                    }
                }
                Opcode::Text | Opcode::Binary => {
                    if self.fragment_opcode.is_some() {
                        return Err(FrameError::Protocol("new message inside fragment"));
                    }
                    if raw.fin {
                        return Ok(assemble(raw.opcode, raw.payload));
                    }
                    self.fragment_opcode = Some(raw.opcode);
                    self.fragment.clear();
                    self.append_fragment(raw.payload)?;
                }
                _ => return Err(FrameError::Protocol("reserved opcode")),
            }
        }
    }

    fn append_fragment(&mut self, payload: Vec<u8>) -> Result<(), FrameError> {
        let size = self.fragment.len() + payload.len();
        if size > self.max_payload_size {
            return Err(FrameError::TooLarge {
                size,
                limit: self.max_payload_size,
            });
        }
        self.fragment.extend_from_slice(&payload);
        Ok(())
    }

    async fn read_raw<R: AsyncRead + Unpin>(
        &self,
        reader: &mut R,
        buf: &mut Vec<u8>,
    ) -> Result<RawFrame, FrameError> {
        need_bytes(reader, buf, 2).await?;
        let b0 = buf[0];
        let b1 = buf[1];

        if b0 & 0x70 != 0 {
            return Err(FrameError::Protocol("reserved bits set"));
        }
        let opcode = Opcode::from(b0 & 0x0f);
        if opcode == Opcode::Reserved {
            return Err(FrameError::Protocol("unknown opcode"));
        }
        // RFC 6455: a client MUST mask every frame it sends
        if b1 & 0x80 == 0 {
            return Err(FrameError::Protocol("unmasked client frame"));
        }

        let len7 = (b1 & 0x7f) as usize;
        let (len, len_bytes) = match len7 {
            126 => {
                need_bytes(reader, buf, 4).await?;
                (u16::from_be_bytes([buf[2], buf[3]]) as usize, 2)
            }
            127 => {
                need_bytes(reader, buf, 10).await?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&buf[2..10]);
                let len = u64::from_be_bytes(raw);
                if len > usize::MAX as u64 {
                    return Err(FrameError::Protocol("absurd frame length"));
                }
                (len as usize, 8)
            }
            n => (n, 0),
        };

        if len > self.max_payload_size {
            return Err(FrameError::TooLarge {
                size: len,
                limit: self.max_payload_size,
            });
        }

        let header_len = 2 + len_bytes + 4;
        need_bytes(reader, buf, header_len + len).await?;

        let mut mask = [0u8; 4];
        mask.copy_from_slice(&buf[2 + len_bytes..2 + len_bytes + 4]);

        let mut payload = buf[header_len..header_len + len].to_vec();
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= mask[i % 4];
        }

        buf.drain(..header_len + len);

        Ok(RawFrame {
            fin: b0 & 0x80 != 0,
            opcode,
            payload,
        })
    }
}

fn assemble(opcode: Opcode, payload: Vec<u8>) -> Frame {
    match opcode {
        Opcode::Text => Frame::Text(payload),
        _ => Frame::Binary(payload),
    }
}

fn close_code(payload: &[u8]) -> Option<u16> {
    if payload.len() >= 2 {
        Some(u16::from_be_bytes([payload[0], payload[1]]))
    } else {
        None
    }
}

async fn need_bytes<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    n: usize,
) -> Result<(), FrameError> {
    while buf.len() < n {
        let mut chunk = [0u8; 4096];
        let read = reader.read(&mut chunk).await?;
        if read == 0 {
            return Err(FrameError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed inside frame",
            )));
        }
        buf.extend_from_slice(&chunk[..read]);
    }
    Ok(())
}

/// Encodes an unmasked (server to client) frame.
pub fn encode(opcode: Opcode, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 10);
    frame.push(0x80 | u8::from(opcode));
    if payload.len() < 126 {
        frame.push(payload.len() as u8);
    } else if payload.len() <= u16::MAX as usize {
        frame.push(126);
        frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    } else {
        frame.push(127);
        frame.extend_from_slice(&(payload.len() as u64).to_be_bytes());
    }
    frame.extend_from_slice(payload);
    frame
}

pub fn binary(payload: &[u8]) -> Vec<u8> {
    encode(Opcode::Binary, payload)
}

pub fn pong(payload: &[u8]) -> Vec<u8> {
    encode(Opcode::Pong, payload)
}

pub fn close(code: u16) -> Vec<u8> {
    encode(Opcode::Close, &code.to_be_bytes())
}

#[cfg(test)]
mod tests;
