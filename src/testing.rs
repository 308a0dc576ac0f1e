// ABOUTME: Test-only helpers - an in-memory connector and table builders
// ABOUTME: The fake connector replays canned query results and records executed SQL

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::db::{Connector, Dialect, TextRow};
use crate::schema::{Column, Table};

/// Connector that answers queries from a FIFO of canned results.
pub struct FakeConnector {
    name: String,
    dialect: Dialect,
    responses: Mutex<VecDeque<Vec<TextRow>>>,
    keys: Mutex<Vec<i64>>,
    queries: Mutex<Vec<String>>,
    executed: Mutex<Vec<String>>,
    fail_execute: Mutex<bool>,
    fail_query: Mutex<bool>,
    reconnects: Mutex<usize>,
}

impl FakeConnector {
    pub fn new(name: &str, dialect: Dialect) -> Self {
        Self {
            name: name.to_string(),
            dialect,
            responses: Mutex::new(VecDeque::new()),
            keys: Mutex::new(Vec::new()),
            queries: Mutex::new(Vec::new()),
            executed: Mutex::new(Vec::new()),
            fail_execute: Mutex::new(false),
            fail_query: Mutex::new(false),
            reconnects: Mutex::new(0),
        }
    }

    pub fn push_response(&self, rows: Vec<TextRow>) {
        self.responses.lock().unwrap().push_back(rows);
    }

    pub fn set_keys(&self, keys: Vec<i64>) {
        *self.keys.lock().unwrap() = keys;
    }

    pub fn fail_execute(&self, fail: bool) {
        *self.fail_execute.lock().unwrap() = fail;
    }

    pub fn fail_query(&self, fail: bool) {
        *self.fail_query.lock().unwrap() = fail;
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub fn reconnects(&self) -> usize {
        *self.reconnects.lock().unwrap()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn query(&self, sql: &str) -> Result<Vec<TextRow>> {
        self.queries.lock().unwrap().push(sql.to_string());
        if *self.fail_query.lock().unwrap() {
            bail!("canceling statement due to statement timeout");
        }
        Ok(self.responses.lock().unwrap().pop_front().unwrap_or_default())
    }

    async fn for_each_key(&self, sql: &str, f: &mut (dyn FnMut(i64) + Send)) -> Result<u64> {
        self.queries.lock().unwrap().push(sql.to_string());
        let keys = self.keys.lock().unwrap().clone();
        for key in &keys {
            f(*key);
        }
        Ok(keys.len() as u64)
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        if *self.fail_execute.lock().unwrap() {
            bail!("duplicate key value violates unique constraint");
        }
        self.executed.lock().unwrap().push(sql.to_string());
        Ok(1)
    }

    async fn reconnect(&self) -> Result<()> {
        *self.reconnects.lock().unwrap() += 1;
        Ok(())
    }
}

/// Text value helper for canned rows.
pub fn text(value: &str) -> Option<String> {
    Some(value.to_string())
}

/// `orders(id int, customer varchar(40), total decimal, created datetime)` on `conn`.
pub fn orders_table(conn: Arc<FakeConnector>) -> Table {
    let dialect = conn.dialect();
    let columns = vec![
        Column::new("id", "int", dialect, true, None, 0),
        Column::new("customer", "varchar", dialect, false, None, 40),
        Column::new("total", "decimal", dialect, false, Some("0".to_string()), 0),
        Column::new("created", "datetime", dialect, false, None, 0),
    ];
    Table::new("orders", columns, vec!["id".to_string()], String::new(), conn)
}
