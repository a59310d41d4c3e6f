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

use std::{collections::HashMap, sync::Arc, time::Duration};

use flume::{Receiver, Sender};
use tokio::task::JoinHandle;

use shared::{consts::CHANNEL_SIZE, log, system::trigger::Trigger};

use crate::{
    acl::IpAcl,
    consts::QUEUE_TICK_SECS,
    handler::broker::BrokerHandler,
    session::{SessionHandle, SessionId},
};

use super::Queue;

/// Cross-task mailbox of a queue worker. Sessions are attached once by
/// the accept path and addressed by id afterwards; frames arrive in
/// socket order because each connection pumps them sequentially.
pub enum WorkerCommand {
    Attach { session: SessionHandle },
    Frame { session: SessionId, payload: Vec<u8> },
    Closed { session: SessionId },
}

/// Cloneable reference the server and the accept path keep per queue.
#[derive(Clone)]
pub struct QueueHandle {
    max_payload_size: usize,
    acl: Arc<IpAcl>,
    ctrl_tx: Sender<WorkerCommand>,
}

impl QueueHandle {
    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }

    pub fn check_access(&self, addr: std::net::IpAddr) -> bool {
        self.acl.check(addr)
    }

    pub async fn attach(&self, session: SessionHandle) -> bool {
        self.ctrl_tx
            .send_async(WorkerCommand::Attach { session })
            .await
            .is_ok()
    }

    /// Forwards one inbound frame. Awaiting applies the worker's
    /// backpressure to the sending connection.
    pub async fn frame(&self, session: SessionId, payload: Vec<u8>) -> bool {
        self.ctrl_tx
            .send_async(WorkerCommand::Frame { session, payload })
            .await
            .is_ok()
    }

    pub async fn closed(&self, session: SessionId) {
        let _ = self
            .ctrl_tx
            .send_async(WorkerCommand::Closed { session })
            .await;
    }
}

/// Spawns the worker task owning `queue`. The task runs until `stop`
/// triggers or every handle is gone.
pub fn spawn(queue: Queue, acl: IpAcl, stop: Trigger) -> (QueueHandle, JoinHandle<()>) {
    let (ctrl_tx, ctrl_rx) = flume::bounded(CHANNEL_SIZE);
    let handle = QueueHandle {
        max_payload_size: queue.max_payload_size(),
        acl: Arc::new(acl),
        ctrl_tx,
    };
    let join = tokio::spawn(run(queue, ctrl_rx, stop));
    (handle, join)
}

async fn run(mut queue: Queue, ctrl_rx: Receiver<WorkerCommand>, stop: Trigger) {
    let mut handlers: HashMap<SessionId, BrokerHandler> = HashMap::new();
    let mut tick = tokio::time::interval(Duration::from_secs(QUEUE_TICK_SECS));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    log::debug!("[worker@{}] started", queue.name());

    loop {
        tokio::select! {
            _ = stop.wait_async() => {
                log::debug!("[worker@{}] stop signal received", queue.name());
                break;
            }
            _ = tick.tick() => {
                queue.timeout();
                for handler in handlers.values_mut() {
                    handler.tick(&mut queue);
                }
                // Sessions the queue dropped (backlog, replaced names)
                handlers.retain(|_, h| !h.is_defunct(&queue));
            }
            command = ctrl_rx.recv_async() => {
                match command {
                    Ok(WorkerCommand::Attach { session }) => {
                        log::debug!(
                            "[worker@{}] session {} from {} attached",
                            queue.name(), session.id(), session.peer()
                        );
                        handlers.insert(session.id(), BrokerHandler::new(session));
                    }
                    Ok(WorkerCommand::Frame { session, payload }) => {
                        if let Some(handler) = handlers.get_mut(&session) {
                            handler.handle_frame(&mut queue, &payload);
                            if handler.is_finished() {
                                handlers.remove(&session);
                            }
                        }
                    }
                    Ok(WorkerCommand::Closed { session }) => {
                        if let Some(mut handler) = handlers.remove(&session) {
                            handler.closed(&mut queue);
                        }
                    }
                    Err(_) => break, // all handles dropped
                }
            }
        }
    }

    queue.shutdown();
    log::debug!("[worker@{}] finished", queue.name());
}
