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

use anyhow::{Context, Result};
use base64::{Engine as _, engine::general_purpose};

use shared::log;

use crate::{config::Config, database, database::DatabaseBackend};

use super::message::Message;

/// Verdict of one processor for one admitted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Hand the message unchanged to the next processor.
    Pass,
    /// End propagation; the sender is still acknowledged.
    Drop,
    /// The processor substituted the payload in place.
    Replace,
}

/// In-chain transformer/observer of admitted messages. Runs synchronously
/// on the queue worker, in configured order, before fan-out.
pub trait MessageProcessor: Send {
    fn name(&self) -> &'static str;
    fn init(&mut self, config: &Config, queue: &str) -> Result<()>;
    fn process(&mut self, message: &mut Message) -> Action;
}

/// Name-keyed factory. Unknown names are a configuration error reported
/// by the caller.
pub fn create(name: &str) -> Option<Box<dyn MessageProcessor>> {
    match name {
        "forward" => Some(Box::new(Forward)),
        "dbstore" => Some(Box::new(DbStore::default())),
        _ => None,
    }
}

/// Pass-through terminator; useful as an explicit no-op chain.
struct Forward;

impl MessageProcessor for Forward {
    fn name(&self) -> &'static str {
        "forward"
    }

    fn init(&mut self, _config: &Config, _queue: &str) -> Result<()> {
        Ok(())
    }

    fn process(&mut self, _message: &mut Message) -> Action {
        Action::Pass
    }
}

/// Persists every admitted message through the configured database
/// driver. Storage failures are logged and do not stop propagation.
#[derive(Default)]
struct DbStore {
    backend: Option<Box<dyn DatabaseBackend>>,
}

impl MessageProcessor for DbStore {
    fn name(&self) -> &'static str {
        "dbstore"
    }

    fn init(&mut self, config: &Config, queue: &str) -> Result<()> {
        let queue_config = config
            .queue(queue)
            .with_context(|| format!("queue {:?} is not configured", queue))?;
        let dbstore = &queue_config.dbstore;
        if dbstore.driver.is_empty() {
            anyhow::bail!("queue {:?}: dbstore.driver is not set", queue);
        }
        let url = format!("{}://{}", dbstore.driver, dbstore.parameters);
        self.backend = Some(database::open(&url)?);
        Ok(())
    }

    fn process(&mut self, message: &mut Message) -> Action {
        let Some(backend) = self.backend.as_mut() else {
            return Action::Pass;
        };

        // Target and mime type come from client headers; they are bound,
        // never spliced into the statement
        let sequence = message.sequence.to_string();
        let payload = general_purpose::STANDARD.encode(&message.payload);
        if let Err(e) = backend.execute_params(
            "INSERT INTO messages (target, seq, mime, payload) VALUES (?, ?, ?, ?)",
            &[&message.target, &sequence, &message.mime_type, &payload],
        ) {
            log::warn!("dbstore: failed to persist message {}: {}", message.sequence, e);
        }
        Action::Pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_knows_builtins() {
        assert!(create("forward").is_some());
        assert!(create("dbstore").is_some());
        assert!(create("no-such-processor").is_none());
    }

    #[test]
    fn test_forward_passes() {
        let mut forward = create("forward").unwrap();
        let mut message = Message::regular(1, "a", "G", "text/plain", b"x".to_vec());
        assert_eq!(forward.process(&mut message), Action::Pass);
        assert_eq!(message.payload, b"x");
    }

    #[test]
    fn test_dbstore_requires_driver() {
        let mut config = Config::default();
        config.queues.push(crate::config::QueueConfig {
            name: "q".to_string(),
            ..crate::config::QueueConfig::default()
        });

        let mut dbstore = create("dbstore").unwrap();
        assert!(dbstore.init(&config, "q").is_err());

        config.queues[0].dbstore.driver = "dummy".to_string();
        assert!(dbstore.init(&config, "q").is_ok());
    }

    #[test]
    fn test_dbstore_stores_and_passes() {
        let mut config = Config::default();
        config.queues.push(crate::config::QueueConfig {
            name: "q".to_string(),
            dbstore: crate::config::DbStoreConfig {
                driver: "dummy".to_string(),
                parameters: String::new(),
            },
            ..crate::config::QueueConfig::default()
        });

        let mut dbstore = create("dbstore").unwrap();
        dbstore.init(&config, "q").unwrap();
        let mut message = Message::regular(3, "a", "PICK", "text/xml", b"<pick/>".to_vec());
        assert_eq!(dbstore.process(&mut message), Action::Pass);
    }

    // Header values reach the store as bound parameters, so a hostile
    // Content-Type cannot terminate the statement
    #[test]
    fn test_dbstore_survives_hostile_mime_type() {
        let mut config = Config::default();
        config.queues.push(crate::config::QueueConfig {
            name: "q".to_string(),
            dbstore: crate::config::DbStoreConfig {
                driver: "dummy".to_string(),
                parameters: String::new(),
            },
            ..crate::config::QueueConfig::default()
        });

        let mut dbstore = create("dbstore").unwrap();
        dbstore.init(&config, "q").unwrap();
        let mut message = Message::regular(
            1,
            "a",
            "PICK",
            "x'); DROP TABLE messages;--",
            b"payload".to_vec(),
        );
        assert_eq!(dbstore.process(&mut message), Action::Pass);
    }
}
