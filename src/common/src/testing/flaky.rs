//! Fault-injecting store wrappers.
//!
//! Each wrapper counts calls per operation (1-based) and fails the calls it
//! was told to fail. Everything else is forwarded to the wrapped store.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

use crate::document::{DocumentPage, DocumentQuery, DocumentStore, StoredDocument};
use crate::error::{StoreError, StoreResult};
use crate::table::{RowFilter, RowPage, TableOperation, TableRow, TableStore};

/// Failure to inject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultKind {
    Transient,
    Conflict,
    NotFound,
    Backend,
    /// Apply the first `committed` operations of a batch, then fail transiently.
    PartialBatch { committed: usize },
}

impl FaultKind {
    fn to_error(&self, operation: &str) -> StoreError {
        match self {
            FaultKind::Transient => {
                StoreError::Transient(format!("injected 503 Service Unavailable on {operation}"))
            }
            FaultKind::Conflict => StoreError::Conflict {
                key: format!("injected conflict on {operation}"),
            },
            FaultKind::NotFound => StoreError::NotFound(format!("injected on {operation}")),
            FaultKind::Backend => StoreError::Backend(format!("injected failure on {operation}")),
            FaultKind::PartialBatch { committed } => StoreError::PartialBatch {
                committed: *committed,
                source: Box::new(StoreError::Transient(format!(
                    "injected throttling on {operation}"
                ))),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Op {
    ListTables,
    DeleteTable,
    GetRow,
    Batch,
    RowQuery,
    Get,
    Upsert,
    Delete,
    DocumentQuery,
}

/// Call counters and the failure script shared by both wrappers.
#[derive(Default)]
struct Script {
    calls: Mutex<HashMap<Op, usize>>,
    faults: Mutex<HashMap<(Op, usize), FaultKind>>,
    cancel_after: Mutex<Option<(Op, usize, CancellationToken)>>,
    failures: AtomicUsize,
}

impl Script {
    fn fail(&self, op: Op, nth: usize, kind: FaultKind) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.insert((op, nth), kind);
        }
    }

    fn cancel_after(&self, op: Op, calls: usize, token: CancellationToken) {
        if let Ok(mut slot) = self.cancel_after.lock() {
            *slot = Some((op, calls, token));
        }
    }

    /// Count the call and return the fault scheduled for it, if any.
    fn enter(&self, op: Op) -> Option<FaultKind> {
        let nth = match self.calls.lock() {
            Ok(mut calls) => {
                let count = calls.entry(op).or_insert(0);
                *count += 1;
                *count
            }
            Err(_) => return None,
        };

        let fault = self
            .faults
            .lock()
            .ok()
            .and_then(|mut faults| faults.remove(&(op, nth)));
        if fault.is_some() {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        fault
    }

    /// Trip the cancellation token once the configured call has completed.
    fn leave(&self, op: Op) {
        let calls = self.calls(op);
        if let Ok(slot) = self.cancel_after.lock() {
            if let Some((target, after, token)) = slot.as_ref() {
                if *target == op && calls >= *after {
                    token.cancel();
                }
            }
        }
    }

    fn calls(&self, op: Op) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.get(&op).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

/// [`TableStore`] wrapper failing scripted calls.
pub struct FlakyTableStore {
    inner: Arc<dyn TableStore>,
    script: Script,
}

impl fmt::Debug for FlakyTableStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlakyTableStore")
            .field("inner", &self.inner)
            .field("failures", &self.failures())
            .finish()
    }
}

impl FlakyTableStore {
    pub fn new(inner: Arc<dyn TableStore>) -> Self {
        Self {
            inner,
            script: Script::default(),
        }
    }

    /// Fail the `nth` call to `execute_batch`.
    pub fn fail_batch(self, nth: usize, kind: FaultKind) -> Self {
        self.script.fail(Op::Batch, nth, kind);
        self
    }

    /// Fail the `nth` call to `query`.
    pub fn fail_query(self, nth: usize, kind: FaultKind) -> Self {
        self.script.fail(Op::RowQuery, nth, kind);
        self
    }

    /// Fail the `nth` call to `delete_table`.
    pub fn fail_delete_table(self, nth: usize, kind: FaultKind) -> Self {
        self.script.fail(Op::DeleteTable, nth, kind);
        self
    }

    /// Fail the `nth` call to `list_tables`.
    pub fn fail_list_tables(self, nth: usize, kind: FaultKind) -> Self {
        self.script.fail(Op::ListTables, nth, kind);
        self
    }

    /// Cancel `token` once `calls` queries have returned.
    pub fn cancel_after_queries(self, calls: usize, token: CancellationToken) -> Self {
        self.script.cancel_after(Op::RowQuery, calls, token);
        self
    }

    /// Cancel `token` once `calls` batches have returned.
    pub fn cancel_after_batches(self, calls: usize, token: CancellationToken) -> Self {
        self.script.cancel_after(Op::Batch, calls, token);
        self
    }

    pub fn batch_calls(&self) -> usize {
        self.script.calls(Op::Batch)
    }

    pub fn query_calls(&self) -> usize {
        self.script.calls(Op::RowQuery)
    }

    pub fn delete_table_calls(&self) -> usize {
        self.script.calls(Op::DeleteTable)
    }

    pub fn get_row_calls(&self) -> usize {
        self.script.calls(Op::GetRow)
    }

    /// Number of injected failures so far.
    pub fn failures(&self) -> usize {
        self.script.failures.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TableStore for FlakyTableStore {
    async fn list_tables(&self) -> StoreResult<Vec<String>> {
        if let Some(fault) = self.script.enter(Op::ListTables) {
            return Err(fault.to_error("list_tables"));
        }
        let result = self.inner.list_tables().await;
        self.script.leave(Op::ListTables);
        result
    }

    async fn create_table(&self, table: &str) -> StoreResult<()> {
        self.inner.create_table(table).await
    }

    async fn delete_table(&self, table: &str) -> StoreResult<()> {
        if let Some(fault) = self.script.enter(Op::DeleteTable) {
            return Err(fault.to_error("delete_table"));
        }
        let result = self.inner.delete_table(table).await;
        self.script.leave(Op::DeleteTable);
        result
    }

    async fn get_row(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> StoreResult<Option<TableRow>> {
        if let Some(fault) = self.script.enter(Op::GetRow) {
            return Err(fault.to_error("get_row"));
        }
        let result = self.inner.get_row(table, partition_key, row_key).await;
        self.script.leave(Op::GetRow);
        result
    }

    async fn execute_batch(
        &self,
        table: &str,
        partition_key: &str,
        operations: &[TableOperation],
    ) -> StoreResult<()> {
        if let Some(fault) = self.script.enter(Op::Batch) {
            if let FaultKind::PartialBatch { committed } = fault {
                let committed = committed.min(operations.len());
                if committed > 0 {
                    self.inner
                        .execute_batch(table, partition_key, &operations[..committed])
                        .await?;
                }
                return Err(FaultKind::PartialBatch { committed }.to_error("execute_batch"));
            }
            return Err(fault.to_error("execute_batch"));
        }
        let result = self
            .inner
            .execute_batch(table, partition_key, operations)
            .await;
        self.script.leave(Op::Batch);
        result
    }

    async fn query(
        &self,
        table: &str,
        filter: &RowFilter,
        continuation: Option<&str>,
        max_rows: usize,
    ) -> StoreResult<RowPage> {
        if let Some(fault) = self.script.enter(Op::RowQuery) {
            return Err(fault.to_error("query"));
        }
        let result = self
            .inner
            .query(table, filter, continuation, max_rows)
            .await;
        self.script.leave(Op::RowQuery);
        result
    }
}

/// [`DocumentStore`] wrapper failing scripted calls.
pub struct FlakyDocumentStore {
    inner: Arc<dyn DocumentStore>,
    script: Script,
}

impl fmt::Debug for FlakyDocumentStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlakyDocumentStore")
            .field("inner", &self.inner)
            .field("failures", &self.failures())
            .finish()
    }
}

impl FlakyDocumentStore {
    pub fn new(inner: Arc<dyn DocumentStore>) -> Self {
        Self {
            inner,
            script: Script::default(),
        }
    }

    /// Fail the `nth` call to `get`.
    pub fn fail_get(self, nth: usize, kind: FaultKind) -> Self {
        self.script.fail(Op::Get, nth, kind);
        self
    }

    /// Fail the `nth` write (`upsert` or `create`).
    pub fn fail_upsert(self, nth: usize, kind: FaultKind) -> Self {
        self.script.fail(Op::Upsert, nth, kind);
        self
    }

    /// Fail the `nth` call to `delete`.
    pub fn fail_delete(self, nth: usize, kind: FaultKind) -> Self {
        self.script.fail(Op::Delete, nth, kind);
        self
    }

    /// Fail the `nth` call to `query`.
    pub fn fail_query(self, nth: usize, kind: FaultKind) -> Self {
        self.script.fail(Op::DocumentQuery, nth, kind);
        self
    }

    /// Cancel `token` once `calls` queries have returned.
    pub fn cancel_after_queries(self, calls: usize, token: CancellationToken) -> Self {
        self.script.cancel_after(Op::DocumentQuery, calls, token);
        self
    }

    pub fn upsert_calls(&self) -> usize {
        self.script.calls(Op::Upsert)
    }

    pub fn delete_calls(&self) -> usize {
        self.script.calls(Op::Delete)
    }

    pub fn query_calls(&self) -> usize {
        self.script.calls(Op::DocumentQuery)
    }

    /// Number of injected failures so far.
    pub fn failures(&self) -> usize {
        self.script.failures.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DocumentStore for FlakyDocumentStore {
    async fn get(&self, id: &str) -> StoreResult<StoredDocument> {
        if let Some(fault) = self.script.enter(Op::Get) {
            return Err(fault.to_error("get"));
        }
        let result = self.inner.get(id).await;
        self.script.leave(Op::Get);
        result
    }

    async fn upsert(
        &self,
        id: &str,
        body: &Value,
        expected_etag: Option<&str>,
    ) -> StoreResult<Option<String>> {
        if let Some(fault) = self.script.enter(Op::Upsert) {
            return Err(fault.to_error("upsert"));
        }
        let result = self.inner.upsert(id, body, expected_etag).await;
        self.script.leave(Op::Upsert);
        result
    }

    async fn create(&self, id: &str, body: &Value) -> StoreResult<Option<String>> {
        if let Some(fault) = self.script.enter(Op::Upsert) {
            return Err(fault.to_error("create"));
        }
        let result = self.inner.create(id, body).await;
        self.script.leave(Op::Upsert);
        result
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        if let Some(fault) = self.script.enter(Op::Delete) {
            return Err(fault.to_error("delete"));
        }
        let result = self.inner.delete(id).await;
        self.script.leave(Op::Delete);
        result
    }

    async fn query(
        &self,
        query: &DocumentQuery,
        continuation: Option<&str>,
        max_items: usize,
    ) -> StoreResult<DocumentPage> {
        if let Some(fault) = self.script.enter(Op::DocumentQuery) {
            return Err(fault.to_error("query"));
        }
        let result = self.inner.query(query, continuation, max_items).await;
        self.script.leave(Op::DocumentQuery);
        result
    }
}
