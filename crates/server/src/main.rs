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

use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal as unix_signal};
use tokio::signal;

use shared::log;

pub mod acl;
pub mod config;
pub mod connection;
pub mod consts;
pub mod database;
pub mod endpoint;
pub mod handler;
pub mod queue;
pub mod server;
pub mod session;
pub mod stats;

use crate::{config::Config, consts::CONFIGFILE_PATH, consts::DEFAULT_LOG_LEVEL};

#[derive(Parser)]
#[command(name = "scmaster", version = consts::VERSION, about = "Seismic messaging broker")]
struct Args {
    /// Configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// The non encrypted bind address in format [ip:]port
    #[arg(long, value_name = "[IP:]PORT")]
    bind: Option<String>,

    /// The encrypted bind address in format [ip:]port
    #[arg(long, value_name = "[IP:]PORT")]
    sbind: Option<String>,
}

// Catch SIGTERM and SIGINT to perform a graceful shutdown
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();
    log::setup_logging(DEFAULT_LOG_LEVEL, log::LogType::Master);

    let config_path = args.config.unwrap_or_else(|| PathBuf::from(CONFIGFILE_PATH));
    let mut config = if config_path.exists() {
        match Config::load(&config_path) {
            Ok(config) => config,
            Err(e) => {
                log::error!("{:#}", e);
                return ExitCode::from(1);
            }
        }
    } else {
        log::warn!("configuration file {:?} not found, using defaults", config_path);
        Config::default()
    };

    // Command line overrides
    if let Some(bind) = args.bind {
        config.interface.bind = bind;
    }
    if let Some(sbind) = args.sbind {
        config.interface.ssl.bind = sbind;
    }

    let mut server = match server::Server::new(config) {
        Ok(server) => server,
        Err(e) => {
            log::error!("{:#}", e);
            return ExitCode::from(1);
        }
    };

    let stop = server.stop_trigger();

    // Spawn the signal handler
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            let ctrl_c = signal::ctrl_c();
            #[cfg(unix)]
            let mut terminate = match unix_signal(SignalKind::terminate()) {
                Ok(terminate) => terminate,
                Err(e) => {
                    log::error!("failed to install SIGTERM handler: {}", e);
                    return;
                }
            };

            #[cfg(unix)]
            tokio::select! {
                _ = ctrl_c => {
                    log::info!("received Ctrl-C, shutting down");
                }
                _ = terminate.recv() => {
                    log::info!("received SIGTERM, shutting down");
                }
            }
            #[cfg(not(unix))]
            {
                let _ = ctrl_c.await;
                log::info!("received Ctrl-C, shutting down");
            }
            stop.trigger();
        });
    }

    if let Err(e) = server.init().await {
        log::error!("initialization failed: {:#}", e);
        return ExitCode::from(1);
    }

    match server.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("runtime failure: {:#}", e);
            ExitCode::from(2)
        }
    }
}
