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

use anyhow::{Result, bail};
use base64::{Engine as _, engine::general_purpose};
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::consts::{MAX_REQUEST_HEADER_SIZE, WS_ACCEPT_MAGIC};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Continue,
    SwitchingProtocols,
    Ok,
    BadRequest,
    Forbidden,
    NotFound,
    UpgradeRequired,
    InternalError,
    ServiceUnavailable,
}

impl Status {
    pub fn code(&self) -> u16 {
        match self {
            Status::Continue => 100,
            Status::SwitchingProtocols => 101,
            Status::Ok => 200,
            Status::BadRequest => 400,
            Status::Forbidden => 403,
            Status::NotFound => 404,
            Status::UpgradeRequired => 426,
            Status::InternalError => 500,
            Status::ServiceUnavailable => 503,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Status::Continue => "Continue",
            Status::SwitchingProtocols => "Switching Protocols",
            Status::Ok => "OK",
            Status::BadRequest => "Bad Request",
            Status::Forbidden => "Forbidden",
            Status::NotFound => "Not Found",
            Status::UpgradeRequired => "Upgrade Required",
            Status::InternalError => "Internal Server Error",
            Status::ServiceUnavailable => "Service Unavailable",
        }
    }
}

/// A parsed HTTP/1.1 request head. Only the fields the broker acts on are
/// retained; unknown headers are skipped.
#[derive(Debug, Default)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub keep_alive: bool,
    pub expect_continue: bool,
    pub upgrade_to: Option<String>,
    pub sec_websocket_key: Option<String>,
    pub sec_websocket_version: Option<i32>,
    pub sec_websocket_protocols: Vec<String>,
    pub content_length: usize,
}

impl Request {
    /// Reads one request head from `reader`. `buf` is the connection's
    /// rolling inbound buffer; bytes following the head (a pipelined
    /// WebSocket frame, a request body) stay in it for the caller.
    ///
    /// Returns `None` on a clean EOF before any byte of a request.
    pub async fn read_from<R: AsyncRead + Unpin>(
        reader: &mut R,
        buf: &mut Vec<u8>,
    ) -> Result<Option<Request>> {
        loop {
            if let Some(end) = find_head_end(buf) {
                let head = std::str::from_utf8(&buf[..end])
                    .map_err(|_| anyhow::anyhow!("request head is not valid UTF-8"))?;
                let request = Request::parse(head)?;
                buf.drain(..end + 4);
                return Ok(Some(request));
            }

            if buf.len() > MAX_REQUEST_HEADER_SIZE {
                bail!("request head exceeds {} bytes", MAX_REQUEST_HEADER_SIZE);
            }

            let mut chunk = [0u8; 2048];
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                if buf.is_empty() {
                    return Ok(None);
                }
                bail!("connection closed inside request head");
            }
            buf.extend_from_slice(&chunk[..n]);
        }
    }

    pub fn parse(head: &str) -> Result<Request> {
        let mut lines = head.split("\r\n");

        let request_line = lines.next().unwrap_or("");
        let mut parts = request_line.split_ascii_whitespace();
        let method = parts.next().unwrap_or("").to_string();
        let path = parts.next().unwrap_or("").to_string();
        let version = parts.next().unwrap_or("");

        if method.is_empty() || path.is_empty() {
            bail!("malformed request line: {:?}", request_line);
        }
        if version != "HTTP/1.1" && version != "HTTP/1.0" {
            bail!("unsupported HTTP version: {:?}", version);
        }

        let mut request = Request {
            method,
            path,
            keep_alive: version == "HTTP/1.1",
            ..Request::default()
        };

        for line in lines {
            if line.is_empty() {
                continue;
            }
            let Some((name, value)) = line.split_once(':') else {
                bail!("malformed header line: {:?}", line);
            };
            let value = value.trim();

            if name.eq_ignore_ascii_case("Connection") {
                for token in value.split(',') {
                    let token = token.trim();
                    if token.eq_ignore_ascii_case("close") {
                        request.keep_alive = false;
                    } else if token.eq_ignore_ascii_case("keep-alive") {
                        request.keep_alive = true;
                    }
                }
            } else if name.eq_ignore_ascii_case("Upgrade") {
                request.upgrade_to = Some(value.to_ascii_lowercase());
            } else if name.eq_ignore_ascii_case("Sec-WebSocket-Key") {
                request.sec_websocket_key = Some(value.to_string());
            } else if name.eq_ignore_ascii_case("Sec-WebSocket-Version") {
                request.sec_websocket_version = value.parse::<i32>().ok();
            } else if name.eq_ignore_ascii_case("Sec-WebSocket-Protocol") {
                request
                    .sec_websocket_protocols
                    .extend(value.split(',').map(|p| p.trim().to_string()));
            } else if name.eq_ignore_ascii_case("Content-Length") {
                request.content_length = value
                    .parse::<usize>()
                    .map_err(|_| anyhow::anyhow!("invalid Content-Length: {:?}", value))?;
            } else if name.eq_ignore_ascii_case("Expect")
                && value.eq_ignore_ascii_case("100-continue")
            {
                request.expect_continue = true;
            }
        }

        Ok(request)
    }

    pub fn wants_websocket(&self) -> bool {
        self.upgrade_to.as_deref() == Some("websocket")
    }

    pub fn offers_protocol(&self, name: &str) -> bool {
        self.sec_websocket_protocols.iter().any(|p| p == name)
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

pub fn continue_response() -> &'static [u8] {
    b"HTTP/1.1 100 Continue\r\n\r\n"
}

/// Plain status response with a small text body.
pub fn status_response(status: Status, body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {}\r\n\
         \r\n{}",
        status.code(),
        status.reason(),
        body.len(),
        body
    )
    .into_bytes()
}

pub fn file_response(content_type: &str, body: &[u8], keep_alive: bool) -> Vec<u8> {
    let mut response = format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: {}\r\n\
         Content-Length: {}\r\n\
         Connection: {}\r\n\
         \r\n",
        content_type,
        body.len(),
        if keep_alive { "keep-alive" } else { "close" },
    )
    .into_bytes();
    response.extend_from_slice(body);
    response
}

/// Sec-WebSocket-Accept for a client key, per RFC 6455.
pub fn websocket_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_ACCEPT_MAGIC.as_bytes());
    general_purpose::STANDARD.encode(hasher.finalize())
}

/// The 101 response completing a WebSocket upgrade. `extra_headers` lets a
/// handler announce its own headers (e.g. backend identification).
pub fn upgrade_response(
    client_key: &str,
    protocol: &str,
    extra_headers: &[(&str, String)],
) -> Vec<u8> {
    let mut response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Protocol: {}\r\n\
         Sec-WebSocket-Accept: {}\r\n",
        protocol,
        websocket_accept_key(client_key),
    );
    for (name, value) in extra_headers {
        response.push_str(name);
        response.push_str(": ");
        response.push_str(value);
        response.push_str("\r\n");
    }
    response.push_str("\r\n");
    response.into_bytes()
}

pub fn guess_content_type(path: &str) -> &'static str {
    match path.rsplit_once('.').map(|(_, ext)| ext) {
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests;
