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
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use tokio::task::JoinHandle;

use shared::{log, system::trigger::Trigger};

use crate::{
    acl::IpAcl,
    config::Config,
    consts::STATS_INTERVAL_SECS,
    endpoint::{self, Endpoint},
    queue::{Queue, worker, worker::QueueHandle},
    stats::{QueueStatistics, ServerStatistics, StatisticsRing},
};

/// Read-only routing state shared with every accept loop and
/// connection task. Queues are fixed after startup.
pub struct Router {
    pub config: Config,
    queues: HashMap<String, QueueHandle>,
}

impl Router {
    pub fn new(config: Config, queues: HashMap<String, QueueHandle>) -> Router {
        Router { config, queues }
    }

    pub fn queue(&self, name: &str) -> Option<&QueueHandle> {
        self.queues.get(name)
    }
}

type QueueStatsHandle = (String, Arc<Mutex<QueueStatistics>>);

/// Owns the queue workers, the endpoints and the statistics history.
pub struct Server {
    config: Config,
    stop: Trigger,
    router: Option<Arc<Router>>,
    workers: Vec<(String, JoinHandle<()>)>,
    listeners: Vec<JoinHandle<()>>,
    queue_stats: Vec<QueueStatsHandle>,
    stats: Arc<Mutex<StatisticsRing>>,
    stats_task: Option<JoinHandle<()>>,
}

impl Server {
    pub fn new(config: Config) -> Result<Server> {
        if config.queues.is_empty() {
            bail!("no queues configured");
        }
        let mut seen = std::collections::HashSet::new();
        for queue in &config.queues {
            if !seen.insert(queue.name.as_str()) {
                bail!("duplicate queue: {:?}", queue.name);
            }
        }

        Ok(Server {
            config,
            stop: Trigger::new(),
            router: None,
            workers: Vec::new(),
            listeners: Vec::new(),
            queue_stats: Vec::new(),
            stats: Arc::new(Mutex::new(StatisticsRing::new())),
            stats_task: None,
        })
    }

    pub fn stop_trigger(&self) -> Trigger {
        self.stop.clone()
    }

    /// Builds the queues, spawns one worker per queue, binds the
    /// listeners and starts the statistics timer. Any failure here is an
    /// initialization error.
    pub async fn init(&mut self) -> Result<()> {
        let mut queues = HashMap::new();

        for queue_config in &self.config.queues {
            let acl = IpAcl::parse(&queue_config.acl)
                .with_context(|| format!("queue {:?}: bad acl", queue_config.name))?;
            let queue = Queue::from_config(&self.config, queue_config)?;

            log::info!("+ Q {}", queue_config.name);
            for group in &queue_config.groups {
                log::info!("  + G {}", group);
            }
            for proc in &queue_config.message_processors {
                log::info!("  + MP {}", proc);
            }

            self.queue_stats
                .push((queue_config.name.clone(), queue.stats_handle()));
            let (handle, join) = worker::spawn(queue, acl, self.stop.clone());
            queues.insert(queue_config.name.clone(), handle);
            self.workers.push((queue_config.name.clone(), join));
        }

        let router = Arc::new(Router::new(self.config.clone(), queues));
        self.router = Some(router.clone());

        // Listeners: plain, then TLS when configured
        if let Some(addr) = self.config.listen_sockaddr()? {
            let acl = IpAcl::parse(&self.config.interface.acl).context("interface.acl")?;
            let endpoint = Endpoint::plain(addr, acl, self.config.interface.socket_port_reuse);
            let listener = endpoint.bind()?;
            self.listeners.push(tokio::spawn(endpoint.run(
                listener,
                router.clone(),
                self.stop.clone(),
            )));
        }

        let ssl = &self.config.interface.ssl;
        if let Some(addr) = self.config.ssl_listen_sockaddr()? {
            if ssl.key.is_empty() || ssl.certificate.is_empty() {
                bail!("interface.ssl.bind is set but key/certificate are not");
            }
            let acl = IpAcl::parse(&ssl.acl).context("interface.ssl.acl")?;
            let acceptor = endpoint::build_tls_acceptor(ssl)?;
            let endpoint = Endpoint::tls(addr, acl, ssl.socket_port_reuse, acceptor);
            let listener = endpoint.bind()?;
            self.listeners.push(tokio::spawn(endpoint.run(
                listener,
                router.clone(),
                self.stop.clone(),
            )));
        }

        if self.listeners.is_empty() {
            bail!("no listening interface configured");
        }

        // Periodic statistics snapshots, plus the baseline sample
        create_statistics_snapshot(&self.queue_stats, &self.stats);
        let queue_stats = self.queue_stats.clone();
        let stats = self.stats.clone();
        let stop = self.stop.clone();
        self.stats_task = Some(tokio::spawn(async move {
            let mut tick =
                tokio::time::interval(Duration::from_secs(STATS_INTERVAL_SECS));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            tick.tick().await; // first tick fires immediately, skip it
            loop {
                tokio::select! {
                    _ = stop.wait_async() => break,
                    _ = tick.tick() => create_statistics_snapshot(&queue_stats, &stats),
                }
            }
        }));

        Ok(())
    }

    pub fn router(&self) -> Option<Arc<Router>> {
        self.router.clone()
    }

    /// Waits for the stop trigger, then tears everything down in order:
    /// listeners first, then workers, then the final snapshot.
    pub async fn run(&mut self) -> Result<()> {
        self.stop.wait_async().await;
        self.shutdown().await;
        Ok(())
    }

    pub async fn shutdown(&mut self) {
        self.stop.trigger();

        for listener in self.listeners.drain(..) {
            let _ = listener.await;
        }
        for (name, join) in self.workers.drain(..) {
            log::debug!("shutdown sequence for queue {}", name);
            let _ = join.await;
        }
        if let Some(task) = self.stats_task.take() {
            let _ = task.await;
        }

        create_statistics_snapshot(&self.queue_stats, &self.stats);
        let stats = self.stats.lock().unwrap();
        let totals = stats.cumulated();
        log::info!(
            "received {} messages ({} payload bytes), dispatched {} messages ({} payload bytes)",
            totals.messages.received,
            totals.payload.received,
            totals.messages.sent,
            totals.payload.sent,
        );
    }
}

/// Collects one snapshot from every queue (resetting the deltas), pushes
/// it into the ring and folds it into the totals.
pub fn create_statistics_snapshot(
    queue_stats: &[QueueStatsHandle],
    ring: &Mutex<StatisticsRing>,
) {
    let snapshots: Vec<QueueStatistics> = queue_stats
        .iter()
        .map(|(name, stats)| {
            let mut stats = stats.lock().unwrap();
            let mut snapshot = stats.take_snapshot(true);
            if snapshot.name.is_empty() {
                snapshot.name = name.clone();
            }
            snapshot
        })
        .collect();

    ring.lock()
        .unwrap()
        .push(ServerStatistics::from_queues(snapshots));
}
