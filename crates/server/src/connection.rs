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

use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf},
    time::timeout,
};

use shared::{
    consts::{
        BROKER_PROTOCOL_NAME, DATABASE_PROTOCOL_NAME, DEFAULT_MAX_WS_PAYLOAD_SIZE,
        WS_SUPPORTED_VERSION,
    },
    errors::FrameError,
    http::{self, Request, Status},
    log,
    system::trigger::Trigger,
    websocket::{self, CLOSE_NORMAL, CLOSE_PROTOCOL_ERROR, Frame, FrameReader},
};

use crate::{
    consts::REQUEST_TIMEOUT_MS,
    database,
    handler::db::{DbAction, DbHandler},
    queue::worker::QueueHandle,
    server::Router,
    session,
};

/// Runs one accepted connection: plain HTTP requests until an upgrade
/// claims it for good. The stream is already past TLS, if any.
pub async fn handle_connection<S>(
    stream: S,
    peer: SocketAddr,
    router: Arc<Router>,
    stop: Trigger,
    authenticated: bool,
    authorized: bool,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut buf: Vec<u8> = Vec::new();

    loop {
        let request = match timeout(
            Duration::from_millis(REQUEST_TIMEOUT_MS),
            Request::read_from(&mut reader, &mut buf),
        )
        .await
        {
            Ok(Ok(Some(request))) => request,
            Ok(Ok(None)) => return Ok(()), // clean close
            Ok(Err(e)) => {
                let _ = writer
                    .write_all(&http::status_response(Status::BadRequest, "bad request"))
                    .await;
                return Err(e);
            }
            Err(_) => return Ok(()), // idle client, drop quietly
        };

        if request.expect_continue {
            writer.write_all(http::continue_response()).await?;
        }

        if request.upgrade_to.is_some() {
            // An upgrade consumes the connection either way
            return handle_upgrade(
                request,
                reader,
                writer,
                buf,
                peer,
                router,
                stop,
                authenticated,
                authorized,
            )
            .await;
        }

        // Bodies are never consumed, so anything but a bare GET would
        // desynchronize a kept-alive connection
        if request.method != "GET" || request.content_length > 0 {
            let _ = writer
                .write_all(&http::status_response(Status::BadRequest, "bad request"))
                .await;
            return Ok(());
        }

        let keep_alive = request.keep_alive;
        serve_static(&request, &mut writer, &router).await?;
        if !keep_alive {
            return Ok(());
        }
    }
}

fn without_query(path: &str) -> &str {
    path.split('?').next().unwrap_or(path)
}

/// Sub-protocol gate: a request that names protocols must name ours.
fn accepts_protocol(request: &Request, name: &str) -> bool {
    request.sec_websocket_protocols.is_empty() || request.offers_protocol(name)
}

#[allow(clippy::too_many_arguments)]
async fn handle_upgrade<S>(
    request: Request,
    reader: ReadHalf<S>,
    mut writer: WriteHalf<S>,
    buf: Vec<u8>,
    peer: SocketAddr,
    router: Arc<Router>,
    stop: Trigger,
    authenticated: bool,
    authorized: bool,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    if !request.wants_websocket() {
        writer
            .write_all(&http::status_response(
                Status::UpgradeRequired,
                "websocket only",
            ))
            .await?;
        return Ok(());
    }
    if request.sec_websocket_version != Some(WS_SUPPORTED_VERSION) {
        log::error!(
            "[{}] invalid websocket version: {:?}",
            peer,
            request.sec_websocket_version
        );
        writer
            .write_all(&http::status_response(
                Status::BadRequest,
                "Invalid websocket version",
            ))
            .await?;
        return Ok(());
    }
    let Some(key) = request.sec_websocket_key.clone() else {
        writer
            .write_all(&http::status_response(
                Status::BadRequest,
                "missing Sec-WebSocket-Key",
            ))
            .await?;
        return Ok(());
    };

    let path = without_query(&request.path).to_string();
    let http_config = &router.config.http;

    // The db path is matched first; with both paths at their "/" default
    // the broker route would swallow everything
    if let Some(db_url) = path.strip_prefix(&http_config.db_path) {
        if !accepts_protocol(&request, DATABASE_PROTOCOL_NAME) {
            writer
                .write_all(&http::status_response(Status::BadRequest, "unknown protocol"))
                .await?;
            return Ok(());
        }
        return handle_database_upgrade(&key, db_url, reader, writer, buf, peer, router.clone(), stop)
            .await;
    }

    if let Some(queue_name) = path.strip_prefix(&http_config.broker_path) {
        if !accepts_protocol(&request, BROKER_PROTOCOL_NAME) {
            writer
                .write_all(&http::status_response(Status::BadRequest, "unknown protocol"))
                .await?;
            return Ok(());
        }
        let Some(queue) = router.queue(queue_name) else {
            writer
                .write_all(&http::status_response(Status::NotFound, "no such queue"))
                .await?;
            return Ok(());
        };
        if !queue.check_access(peer.ip()) {
            log::info!("access blocked to queue {} for IP {}", queue_name, peer.ip());
            writer
                .write_all(&http::status_response(Status::Forbidden, "access denied"))
                .await?;
            return Ok(());
        }
        let queue = queue.clone();
        return handle_broker_upgrade(
            &key,
            queue,
            reader,
            writer,
            buf,
            peer,
            stop,
            authenticated,
            authorized,
        )
        .await;
    }

    writer
        .write_all(&http::status_response(Status::NotFound, "not found"))
        .await?;
    Ok(())
}

/// Completes the scmp upgrade, hands the session to the queue worker and
/// pumps inbound frames into its mailbox until either side gives up.
#[allow(clippy::too_many_arguments)]
async fn handle_broker_upgrade<S>(
    key: &str,
    queue: QueueHandle,
    mut reader: ReadHalf<S>,
    mut writer: WriteHalf<S>,
    mut buf: Vec<u8>,
    peer: SocketAddr,
    stop: Trigger,
    authenticated: bool,
    authorized: bool,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    writer
        .write_all(&http::upgrade_response(key, BROKER_PROTOCOL_NAME, &[]))
        .await?;

    let session_stop = Trigger::new();
    let (session, session_writer) =
        session::session_pair(peer, writer, session_stop.clone(), authenticated, authorized);
    tokio::spawn(session_writer.run());

    if !queue.attach(session.clone()).await {
        session.close();
        return Ok(());
    }

    // Frames may exceed the queue payload cap by the command head; the
    // queue enforces the exact payload limit itself
    let codec_limit = DEFAULT_MAX_WS_PAYLOAD_SIZE.max(queue.max_payload_size() + 16 * 1024);
    let mut frame_reader = FrameReader::new(codec_limit);

    loop {
        tokio::select! {
            _ = stop.wait_async() => break,
            _ = session_stop.wait_async() => break,
            message = frame_reader.read_message(&mut reader, &mut buf) => {
                match message {
                    Ok(Frame::Binary(payload)) | Ok(Frame::Text(payload)) => {
                        if payload.is_empty() {
                            log::warn!("[{}] empty frame received", peer);
                            continue;
                        }
                        if !queue.frame(session.id(), payload).await {
                            break;
                        }
                    }
                    Ok(Frame::Ping(payload)) => {
                        let _ = session.send(Arc::new(websocket::pong(&payload)));
                    }
                    Ok(Frame::Pong(_)) => {}
                    Ok(Frame::Close(_)) => {
                        log::debug!("[{}] close request received", peer);
                        let _ = session.send(Arc::new(websocket::close(CLOSE_NORMAL)));
                        break;
                    }
                    Err(FrameError::TooLarge { size, limit }) => {
                        log::warn!("[{}] frame of {} bytes exceeds {}", peer, size, limit);
                        let _ = session.send(Arc::new(websocket::close(CLOSE_PROTOCOL_ERROR)));
                        break;
                    }
                    Err(FrameError::Protocol(what)) => {
                        log::warn!("[{}] websocket protocol error: {}", peer, what);
                        let _ = session.send(Arc::new(websocket::close(CLOSE_PROTOCOL_ERROR)));
                        break;
                    }
                    Err(FrameError::Io(_)) => break,
                }
            }
        }
    }

    queue.closed(session.id()).await;
    session.close();
    Ok(())
}

/// Completes the scsql upgrade and runs the command/response loop on
/// this task; a blocking driver only ever stalls its own session.
#[allow(clippy::too_many_arguments)]
async fn handle_database_upgrade<S>(
    key: &str,
    db_url: &str,
    mut reader: ReadHalf<S>,
    mut writer: WriteHalf<S>,
    mut buf: Vec<u8>,
    peer: SocketAddr,
    router: Arc<Router>,
    stop: Trigger,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let backend = match database::open(db_url) {
        Ok(backend) => backend,
        Err(e) => {
            log::warn!("[{}] cannot open database {:?}: {}", peer, db_url, e);
            writer
                .write_all(&http::status_response(
                    Status::ServiceUnavailable,
                    "database unavailable",
                ))
                .await?;
            return Ok(());
        }
    };

    let mut handler = DbHandler::new(backend, router.config.db.clone());
    writer
        .write_all(&http::upgrade_response(
            key,
            DATABASE_PROTOCOL_NAME,
            &handler.upgrade_headers(),
        ))
        .await?;

    let mut frame_reader = FrameReader::new(DEFAULT_MAX_WS_PAYLOAD_SIZE);

    loop {
        let idle = handler.idle_timeout();
        tokio::select! {
            _ = stop.wait_async() => break,
            _ = tokio::time::sleep(idle.unwrap_or(Duration::ZERO)), if idle.is_some() => {
                log::warn!("[{}] idle transaction timed out", peer);
                let _ = writer.write_all(&websocket::close(CLOSE_PROTOCOL_ERROR)).await;
                break;
            }
            message = frame_reader.read_message(&mut reader, &mut buf) => {
                match message {
                    Ok(Frame::Binary(payload)) => {
                        match handler.handle_frame(&payload) {
                            DbAction::Respond(response) => {
                                writer.write_all(&websocket::binary(&response)).await?;
                            }
                            DbAction::Close => {
                                let _ = writer
                                    .write_all(&websocket::close(CLOSE_PROTOCOL_ERROR))
                                    .await;
                                break;
                            }
                        }
                    }
                    Ok(Frame::Text(_)) => {
                        // Command frames are binary only
                        let _ = writer.write_all(&websocket::close(CLOSE_PROTOCOL_ERROR)).await;
                        break;
                    }
                    Ok(Frame::Ping(payload)) => {
                        writer.write_all(&websocket::pong(&payload)).await?;
                    }
                    Ok(Frame::Pong(_)) => {}
                    Ok(Frame::Close(_)) => {
                        let _ = writer.write_all(&websocket::close(CLOSE_NORMAL)).await;
                        break;
                    }
                    Err(FrameError::TooLarge { .. }) | Err(FrameError::Protocol(_)) => {
                        let _ = writer.write_all(&websocket::close(CLOSE_PROTOCOL_ERROR)).await;
                        break;
                    }
                    Err(FrameError::Io(_)) => break,
                }
            }
        }
    }

    handler.finish();
    Ok(())
}

/// `GET <staticPath>/…` from `http.filebase`; everything else is a 404.
async fn serve_static<W: AsyncWrite + Unpin>(
    request: &Request,
    writer: &mut W,
    router: &Router,
) -> Result<()> {
    let http_config = &router.config.http;
    let path = without_query(&request.path);

    let local = if http_config.filebase.is_empty() {
        None
    } else {
        path.strip_prefix(&http_config.static_path)
            .and_then(|rel| sanitize(rel))
    };

    let Some(local) = local else {
        writer
            .write_all(&http::status_response(Status::NotFound, "not found"))
            .await?;
        return Ok(());
    };

    let mut file = PathBuf::from(&http_config.filebase);
    file.push(local);

    match tokio::fs::read(&file).await {
        Ok(body) => {
            let content_type = http::guess_content_type(&file.to_string_lossy());
            writer
                .write_all(&http::file_response(content_type, &body, request.keep_alive))
                .await?;
        }
        Err(_) => {
            writer
                .write_all(&http::status_response(Status::NotFound, "not found"))
                .await?;
        }
    }
    Ok(())
}

/// Maps a request path fragment to a safe relative file path. Directory
/// requests resolve to their index document.
fn sanitize(rel: &str) -> Option<PathBuf> {
    let rel = if rel.is_empty() || rel.ends_with('/') {
        format!("{}index.html", rel)
    } else {
        rel.to_string()
    };
    let mut out = PathBuf::new();
    for part in rel.split('/') {
        match part {
            "" | "." => continue,
            ".." => return None,
            part => out.push(part),
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests;
