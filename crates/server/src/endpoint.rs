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

use std::{fs::File, io::BufReader, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio_rustls::TlsAcceptor;

use shared::{log, system::trigger::Trigger};

use crate::{acl::IpAcl, config::SslConfig, connection, server::Router};

/// A listening socket with its accept policy. The TLS flavor completes
/// the handshake before any HTTP byte is parsed.
pub struct Endpoint {
    addr: SocketAddr,
    acl: IpAcl,
    port_reuse: bool,
    tls: Option<TlsAcceptor>,
}

impl Endpoint {
    pub fn plain(addr: SocketAddr, acl: IpAcl, port_reuse: bool) -> Endpoint {
        Endpoint {
            addr,
            acl,
            port_reuse,
            tls: None,
        }
    }

    pub fn tls(addr: SocketAddr, acl: IpAcl, port_reuse: bool, acceptor: TlsAcceptor) -> Endpoint {
        Endpoint {
            addr,
            acl,
            port_reuse,
            tls: Some(acceptor),
        }
    }

    pub fn bind(&self) -> Result<TcpListener> {
        let socket = if self.addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        if self.port_reuse {
            socket
                .set_reuseaddr(true)
                .with_context(|| format!("unable to reuse port {}", self.addr.port()))?;
        }
        socket
            .bind(self.addr)
            .with_context(|| format!("failed to bind to {}", self.addr))?;
        socket.listen(1024).context("listen failed")
    }

    /// Accept loop; runs until `stop` triggers. Each admitted connection
    /// gets its own task.
    pub async fn run(self, listener: TcpListener, router: Arc<Router>, stop: Trigger) {
        log::info!(
            "bound {} to {}",
            if self.tls.is_some() {
                "encrypted"
            } else {
                "unencrypted"
            },
            self.addr
        );

        loop {
            tokio::select! {
                _ = stop.wait_async() => {
                    log::info!("shutdown signal received, stopping listener on {}", self.addr);
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((socket, addr)) => {
                            if !self.acl.check(addr.ip()) {
                                log::info!("access blocked for IP {}", addr.ip());
                                continue;
                            }
                            let _ = socket.set_nodelay(true);
                            log::debug!("accepted connection from {}", addr);
                            tokio::spawn(serve(
                                socket,
                                addr,
                                self.tls.clone(),
                                router.clone(),
                                stop.clone(),
                            ));
                        }
                        Err(e) => {
                            log::error!("failed to accept connection: {:?}", e);
                            // Transient resource exhaustion; do not spin
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                    }
                }
            }
        }
    }
}

async fn serve(
    socket: TcpStream,
    addr: SocketAddr,
    tls: Option<TlsAcceptor>,
    router: Arc<Router>,
    stop: Trigger,
) {
    let result = match tls {
        Some(acceptor) => match acceptor.accept(socket).await {
            Ok(stream) => {
                // A peer certificate only exists when the verifier asked
                // for one and it checked out
                let authenticated = stream
                    .get_ref()
                    .1
                    .peer_certificates()
                    .map(|c| !c.is_empty())
                    .unwrap_or(false);
                connection::handle_connection(stream, addr, router, stop, authenticated, authenticated)
                    .await
            }
            Err(e) => {
                log::warn!("[{}] TLS handshake failed: {}", addr, e);
                return;
            }
        },
        None => connection::handle_connection(socket, addr, router, stop, false, false).await,
    };

    if let Err(e) = result {
        log::error!("error handling connection from {}: {:?}", addr, e);
    }
}

/// Builds the rustls acceptor from the configured PEM files. With
/// `verifyPeer`, clients must present a certificate rooted in
/// `clientAuthority`; unverifiable peers are rejected during the
/// handshake.
pub fn build_tls_acceptor(ssl: &SslConfig) -> Result<TlsAcceptor> {
    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(
        File::open(&ssl.certificate)
            .with_context(|| format!("cannot open certificate {:?}", ssl.certificate))?,
    ))
    .collect::<Result<_, _>>()
    .context("cannot parse certificate")?;

    let key = rustls_pemfile::private_key(&mut BufReader::new(
        File::open(&ssl.key).with_context(|| format!("cannot open key {:?}", ssl.key))?,
    ))
    .context("cannot parse key")?
    .context("no private key found")?;

    let builder = rustls::ServerConfig::builder();
    let config = if ssl.verify_peer {
        let mut roots = rustls::RootCertStore::empty();
        let authorities: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(
            File::open(&ssl.client_authority).with_context(|| {
                format!(
                    "verifyPeer requires clientAuthority, cannot open {:?}",
                    ssl.client_authority
                )
            })?,
        ))
        .collect::<Result<_, _>>()
        .context("cannot parse client authority")?;
        for authority in authorities {
            roots.add(authority).context("invalid client authority")?;
        }
        let verifier = rustls::server::WebPkiClientVerifier::builder(Arc::new(roots))
            .build()
            .context("cannot build client verifier")?;
        builder
            .with_client_cert_verifier(verifier)
            .with_single_cert(certs, key)
            .context("invalid certificate/key pair")?
    } else {
        builder
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .context("invalid certificate/key pair")?
    };

    Ok(TlsAcceptor::from(Arc::new(config)))
}
