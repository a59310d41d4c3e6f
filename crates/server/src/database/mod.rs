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

/// Seam toward a relational store. Real drivers are external
/// collaborators registered by URL scheme; calls run on the session's
/// own task so a slow driver never stalls a queue worker.
pub trait DatabaseBackend: Send {
    fn backend(&self) -> &'static str;
    fn column_prefix(&self) -> &str {
        ""
    }

    fn start(&mut self) -> Result<()>;
    fn commit(&mut self) -> Result<()>;
    fn rollback(&mut self) -> Result<()>;
    fn execute(&mut self, sql: &str) -> Result<()>;
    /// Executes a statement with `?` placeholders. `params` are bound in
    /// order by the driver, never spliced into the SQL text; untrusted
    /// values must go through here.
    fn execute_params(&mut self, sql: &str, params: &[&str]) -> Result<()>;

    /// Opens a result set and returns the field names.
    fn begin_query(&mut self, sql: &str) -> Result<Vec<String>>;
    fn end_query(&mut self);
    /// `None` once the result set is drained; `None` inside a row is SQL
    /// NULL.
    fn fetch_row(&mut self) -> Result<Option<Vec<Option<Vec<u8>>>>>;

    fn last_insert_id(&mut self, sequence: &str) -> Result<u64>;
    fn affected_rows(&mut self) -> u64;
}

/// Resolves `<scheme>://<parameters>` to a backend instance.
pub fn open(url: &str) -> Result<Box<dyn DatabaseBackend>> {
    let (scheme, parameters) = url.split_once("://").unwrap_or((url, ""));
    match scheme {
        "dummy" => Ok(Box::new(DummyBackend::new(parameters))),
        _ => bail!("no database driver for {:?}", scheme),
    }
}

/// Accepts every command and serves empty result sets. Stands in where a
/// real driver is not wired up, and carries the protocol tests.
pub struct DummyBackend {
    statements: Vec<String>,
    bound_params: Vec<Vec<String>>,
    query_active: bool,
    last_id: u64,
    affected: u64,
}

impl DummyBackend {
    pub fn new(_parameters: &str) -> DummyBackend {
        DummyBackend {
            statements: Vec::new(),
            bound_params: Vec::new(),
            query_active: false,
            last_id: 0,
            affected: 0,
        }
    }

    // Only for tests
    #[cfg(test)]
    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    #[cfg(test)]
    pub fn bound_params(&self) -> &[Vec<String>] {
        &self.bound_params
    }
}

impl DatabaseBackend for DummyBackend {
    fn backend(&self) -> &'static str {
        "dummy"
    }

    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        Ok(())
    }

    fn execute(&mut self, sql: &str) -> Result<()> {
        self.statements.push(sql.to_string());
        self.last_id += 1;
        self.affected = 1;
        Ok(())
    }

    fn execute_params(&mut self, sql: &str, params: &[&str]) -> Result<()> {
        self.statements.push(sql.to_string());
        self.bound_params
            .push(params.iter().map(|p| p.to_string()).collect());
        self.last_id += 1;
        self.affected = 1;
        Ok(())
    }

    fn begin_query(&mut self, sql: &str) -> Result<Vec<String>> {
        self.statements.push(sql.to_string());
        self.query_active = true;
        Ok(Vec::new())
    }

    fn end_query(&mut self) {
        self.query_active = false;
    }

    fn fetch_row(&mut self) -> Result<Option<Vec<Option<Vec<u8>>>>> {
        Ok(None)
    }

    fn last_insert_id(&mut self, _sequence: &str) -> Result<u64> {
        Ok(self.last_id)
    }

    fn affected_rows(&mut self) -> u64 {
        self.affected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_by_scheme() {
        let backend = open("dummy://host=localhost").unwrap();
        assert_eq!(backend.backend(), "dummy");
        assert!(open("oracle://x").is_err());
    }

    #[test]
    fn test_dummy_records_statements() {
        let mut backend = DummyBackend::new("");
        backend.execute("CREATE TABLE t(x INT)").unwrap();
        backend.execute("INSERT INTO t VALUES (1)").unwrap();
        assert_eq!(backend.statements().len(), 2);
        assert_eq!(backend.last_insert_id("t").unwrap(), 2);
        assert_eq!(backend.affected_rows(), 1);
    }

    #[test]
    fn test_dummy_binds_parameters() {
        let mut backend = DummyBackend::new("");
        backend
            .execute_params("INSERT INTO t VALUES (?, ?)", &["a", "b'); DROP TABLE t;--"])
            .unwrap();
        // The statement keeps its placeholders; values stay values
        assert_eq!(backend.statements(), ["INSERT INTO t VALUES (?, ?)"]);
        assert_eq!(
            backend.bound_params(),
            [vec!["a".to_string(), "b'); DROP TABLE t;--".to_string()]]
        );
    }

    #[test]
    fn test_dummy_empty_result_set() {
        let mut backend = DummyBackend::new("");
        assert!(backend.begin_query("SELECT 1").unwrap().is_empty());
        assert!(backend.fetch_row().unwrap().is_none());
        backend.end_query();
    }
}
