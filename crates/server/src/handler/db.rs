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

use shared::{
    log,
    scsql::{self, Command, Request, STATUS_END_OF_ROWS, STATUS_ERROR, STATUS_OK},
};

use crate::{config::DbConfig, database::DatabaseBackend};

/// Outcome of one scsql frame: the responses to write, or an order to
/// close with protocol-error status.
pub enum DbAction {
    Respond(Vec<u8>),
    Close,
}

/// Per-session scsql state machine over one backend connection. The
/// session task drives it frame by frame.
pub struct DbHandler {
    backend: Box<dyn DatabaseBackend>,
    limits: DbConfig,
    transaction_active: bool,
    query_active: bool,
    rows_fetched: u64,
}

impl DbHandler {
    pub fn new(backend: Box<dyn DatabaseBackend>, limits: DbConfig) -> DbHandler {
        DbHandler {
            backend,
            limits,
            transaction_active: false,
            query_active: false,
            rows_fetched: 0,
        }
    }

    /// Headers announced in the upgrade response so clients can adapt to
    /// the backend dialect.
    pub fn upgrade_headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("X-DB-Backend", self.backend.backend().to_string()),
            ("X-DB-Prefix", self.backend.column_prefix().to_string()),
        ]
    }

    /// An open transaction bounds how long the session may sit idle.
    pub fn idle_timeout(&self) -> Option<std::time::Duration> {
        self.transaction_active
            .then(|| std::time::Duration::from_secs(self.limits.idle_transaction_timeout))
    }

    /// Rolls whatever is open back; called when the session ends.
    pub fn finish(&mut self) {
        if self.query_active {
            self.backend.end_query();
        }
        if self.transaction_active {
            let _ = self.backend.rollback();
        }
    }

    pub fn handle_frame(&mut self, frame: &[u8]) -> DbAction {
        let Some(request) = Request::parse(frame) else {
            log::warn!("[scsql] malformed frame, closing");
            return DbAction::Close;
        };

        match request.command {
            Command::Start => {
                self.transaction_active = true;
                let result = self.backend.start();
                self.status_of(Command::Start, result)
            }
            Command::Commit => {
                self.transaction_active = false;
                let result = self.backend.commit();
                self.status_of(Command::Commit, result)
            }
            Command::Rollback => {
                self.transaction_active = false;
                let result = self.backend.rollback();
                self.status_of(Command::Rollback, result)
            }
            Command::Execute => {
                let result = self.backend.execute(&request.text);
                self.status_of(Command::Execute, result)
            }
            Command::Query => {
                if self.query_active {
                    return DbAction::Close;
                }
                match self.backend.begin_query(&request.text) {
                    Ok(fields) => {
                        self.query_active = true;
                        self.rows_fetched = 0;
                        DbAction::Respond(scsql::fields_response(Command::Query, &fields))
                    }
                    Err(e) => DbAction::Respond(scsql::status_response(
                        Command::Query,
                        STATUS_ERROR,
                        &e.to_string(),
                    )),
                }
            }
            Command::QueryEnd => {
                if !self.query_active {
                    return DbAction::Close;
                }
                self.backend.end_query();
                self.query_active = false;
                DbAction::Respond(scsql::status_response(Command::QueryEnd, STATUS_OK, "OK"))
            }
            Command::Fetch => {
                if !self.query_active {
                    return DbAction::Close;
                }
                if self.rows_fetched >= self.limits.max_rows_per_query {
                    self.backend.end_query();
                    self.query_active = false;
                    return DbAction::Respond(scsql::status_response(
                        Command::Fetch,
                        STATUS_ERROR,
                        "row limit exceeded",
                    ));
                }
                match self.backend.fetch_row() {
                    Ok(Some(row)) => {
                        self.rows_fetched += 1;
                        DbAction::Respond(scsql::row_response(&row))
                    }
                    Ok(None) => DbAction::Respond(scsql::status_response(
                        Command::Fetch,
                        STATUS_END_OF_ROWS,
                        "End",
                    )),
                    Err(e) => DbAction::Respond(scsql::status_response(
                        Command::Fetch,
                        STATUS_ERROR,
                        &e.to_string(),
                    )),
                }
            }
            Command::LastId => match self.backend.last_insert_id(&request.text) {
                Ok(id) => DbAction::Respond(scsql::u64_response(Command::LastId, id)),
                Err(e) => DbAction::Respond(scsql::status_response(
                    Command::LastId,
                    STATUS_ERROR,
                    &e.to_string(),
                )),
            },
            Command::AffectedRows => {
                let n = self.backend.affected_rows();
                DbAction::Respond(scsql::u64_response(Command::AffectedRows, n))
            }
            Command::Unknown => DbAction::Close,
        }
    }

    fn status_of(&self, command: Command, result: anyhow::Result<()>) -> DbAction {
        match result {
            Ok(()) => DbAction::Respond(scsql::status_response(command, STATUS_OK, "OK")),
            Err(e) => {
                DbAction::Respond(scsql::status_response(command, STATUS_ERROR, &e.to_string()))
            }
        }
    }
}
