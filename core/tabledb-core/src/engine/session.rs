//! Per-user session: acting username plus the current database.

use super::realtime::RealtimeMirror;
use crate::error::TdbResult;
use crate::sql::ast::Statement;
use crate::sql::executor::{QueryExecutor, QueryResult};
use crate::sql::lexer::split_statements;
use crate::sql::parser::parse_statement;
use std::sync::Arc;

pub struct Session {
    username: String,
    database: Option<String>,
    executor: Arc<QueryExecutor>,
    mirror: Arc<RealtimeMirror>,
    ended: bool,
}

impl Session {
    pub fn new(
        username: impl Into<String>,
        executor: Arc<QueryExecutor>,
        mirror: Arc<RealtimeMirror>,
    ) -> Self {
        Self {
            username: username.into(),
            database: None,
            executor,
            mirror,
            ended: false,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn current_database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    /// Switch database, failing if it does not exist.
    pub fn use_database(&mut self, database: &str) -> TdbResult<()> {
        self.executor.engine().store().require_database(database)?;
        self.database = Some(database.to_string());
        Ok(())
    }

    /// Run one statement; a successful `USE` switches the session database.
    pub fn execute(&mut self, sql: &str) -> QueryResult {
        match self.try_execute(sql) {
            Ok(result) => result,
            Err(e) => QueryResult::error(&e),
        }
    }

    pub fn try_execute(&mut self, sql: &str) -> TdbResult<QueryResult> {
        let statement = parse_statement(sql)?;
        let database = self.database.clone().unwrap_or_default();
        let result = self
            .executor
            .execute_statement(&self.username, &database, &statement)?;
        if let Statement::Use { database } = statement {
            self.database = Some(database);
        }
        Ok(result)
    }

    /// Run a `;`-separated script statement by statement.
    pub fn execute_script(&mut self, script: &str) -> Vec<QueryResult> {
        split_statements(script)
            .iter()
            .map(|sql| self.execute(sql))
            .collect()
    }

    /// Flush every dirty realtime table. Also runs on drop.
    pub fn end(&mut self) -> usize {
        if self.ended {
            return 0;
        }
        self.ended = true;
        self.mirror.end_session()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.end();
    }
}
