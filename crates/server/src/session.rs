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
    fmt,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};

use anyhow::Result;
use flume::Receiver;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use shared::{log, system::trigger::Trigger};

use crate::consts::MAX_CLIENT_BACKLOG_MESSAGES;

/// Outbound frames are reference counted so one broadcast enqueues the
/// same byte region into every subscriber's outbox.
pub type FrameBuffer = Arc<Vec<u8>>;

pub type SessionId = u64;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Returned by `SessionHandle::send` when the outbox cannot take the
/// frame. The queue treats it as a backlog overflow.
#[derive(Debug)]
pub struct Backlogged;

impl std::error::Error for Backlogged {}

impl fmt::Display for Backlogged {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session outbox full")
    }
}

/// Cloneable reference to one connection's outbound side. The socket
/// itself stays with the connection task; everything a queue worker or
/// handler needs goes through this handle.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    peer: SocketAddr,
    outbox: flume::Sender<FrameBuffer>,
    backlog_bytes: Arc<AtomicUsize>,
    stop: Trigger,
    authenticated: bool,
    authorized: bool,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn is_authorized(&self) -> bool {
        self.authorized
    }

    /// Enqueues a frame without blocking. Returns the enqueued byte count;
    /// a full or closed outbox yields `Backlogged`.
    pub fn send(&self, frame: FrameBuffer) -> Result<usize, Backlogged> {
        let len = frame.len();
        match self.outbox.try_send(frame) {
            Ok(()) => {
                self.backlog_bytes.fetch_add(len, Ordering::AcqRel);
                Ok(len)
            }
            Err(_) => Err(Backlogged),
        }
    }

    /// Bytes enqueued but not yet written to the socket.
    pub fn backlog_bytes(&self) -> usize {
        self.backlog_bytes.load(Ordering::Acquire)
    }

    pub fn backlog_messages(&self) -> usize {
        self.outbox.len()
    }

    /// Requests the connection to close. Idempotent; the writer drains
    /// already queued frames best-effort first.
    pub fn close(&self) {
        self.stop.trigger();
    }

    pub fn is_closed(&self) -> bool {
        self.stop.is_triggered()
    }
}

/// Drains the session outbox onto the socket's write half. Owned by its
/// own task so any thread may enqueue while ordering stays FIFO.
pub struct SessionWriter<W> {
    rx: Receiver<FrameBuffer>,
    writer: W,
    backlog_bytes: Arc<AtomicUsize>,
    stop: Trigger,
}

/// Builds the handle/writer pair for a freshly upgraded connection.
pub fn session_pair<W: AsyncWrite + Unpin>(
    peer: SocketAddr,
    writer: W,
    stop: Trigger,
    authenticated: bool,
    authorized: bool,
) -> (SessionHandle, SessionWriter<W>) {
    let (tx, rx) = flume::bounded(MAX_CLIENT_BACKLOG_MESSAGES);
    let backlog_bytes = Arc::new(AtomicUsize::new(0));

    let handle = SessionHandle {
        id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
        peer,
        outbox: tx,
        backlog_bytes: backlog_bytes.clone(),
        stop: stop.clone(),
        authenticated,
        authorized,
    };
    let writer = SessionWriter {
        rx,
        writer,
        backlog_bytes,
        stop,
    };
    (handle, writer)
}

impl<W: AsyncWrite + Unpin> SessionWriter<W> {
    pub async fn run(mut self) -> Result<()> {
        loop {
            tokio::select! {
                _ = self.stop.wait_async() => {
                    break;
                }
                frame = self.rx.recv_async() => {
                    match frame {
                        Ok(frame) => self.write_frame(frame).await?,
                        Err(_) => break, // all senders gone
                    }
                }
            }
        }

        // Best-effort flush of whatever is already queued
        while let Ok(frame) = self.rx.try_recv() {
            if self.write_frame(frame).await.is_err() {
                break;
            }
        }
        let _ = self.writer.shutdown().await;
        log::debug!("session writer finished");
        Ok(())
    }

    async fn write_frame(&mut self, frame: FrameBuffer) -> Result<()> {
        let result = self.writer.write_all(&frame).await;
        self.backlog_bytes.fetch_sub(frame.len(), Ordering::AcqRel);
        result?;
        Ok(())
    }
}
