//! Interactive transactions: a stream-id groups a sequence of requests into
//! one server-side transaction, started with `IPROTO_BEGIN` and closed with
//! `IPROTO_COMMIT`/`IPROTO_ROLLBACK`.

use crate::codec::Value;
use crate::connection::Executor;
use crate::error::Result;
use crate::iproto::IsolationLevel;
use crate::request::{self, IndexRef, IteratorArg, SpaceRef, TupleArg};
use crate::response::Body as RespBody;
use crate::tuple::TarantoolTuple;
use std::sync::Arc;
use std::time::Duration;

/// A stream-id bound to an [`Executor`], giving every request issued
/// through it the same `IPROTO_STREAM_ID`. Opening a [`StreamTransaction`]
/// on a stream groups the requests in between into one transaction.
pub struct Stream {
    executor: Arc<dyn Executor>,
    stream_id: u64,
}

impl Stream {
    pub fn new(executor: Arc<dyn Executor>, stream_id: u64) -> Self {
        Self { executor, stream_id }
    }

    pub fn stream_id(&self) -> u64 {
        self.stream_id
    }

    async fn execute(&self, body: request::Body) -> Result<RespBody> {
        self.executor.execute(body, Some(self.stream_id)).await
    }

    pub async fn select(
        &self,
        space: SpaceRef,
        index: IndexRef,
        key: TupleArg,
        limit: Option<u32>,
        offset: Option<u32>,
        iterator: IteratorArg,
    ) -> Result<Vec<TarantoolTuple>> {
        let schema = self.executor.current_schema();
        let body = request::select(&schema, &space, &index, key, limit, offset, iterator)?;
        match self.execute(body).await? {
            RespBody::Tuples(rows) => Ok(rows),
            RespBody::Scalar(Value::Nil) => Ok(vec![]),
            _ => Ok(vec![]),
        }
    }

    pub async fn insert(&self, space: SpaceRef, tuple: TupleArg) -> Result<TarantoolTuple> {
        let schema = self.executor.current_schema();
        let body = request::insert(&schema, &space, tuple)?;
        match self.execute(body).await? {
            RespBody::Tuples(mut rows) if !rows.is_empty() => Ok(rows.remove(0)),
            _ => Ok(TarantoolTuple::new(vec![])),
        }
    }

    pub async fn update(
        &self,
        space: SpaceRef,
        index: IndexRef,
        key: TupleArg,
        ops: Vec<Value>,
    ) -> Result<TarantoolTuple> {
        let schema = self.executor.current_schema();
        let body = request::update(&schema, &space, &index, key, ops)?;
        match self.execute(body).await? {
            RespBody::Tuples(mut rows) if !rows.is_empty() => Ok(rows.remove(0)),
            _ => Ok(TarantoolTuple::new(vec![])),
        }
    }

    pub async fn delete(&self, space: SpaceRef, index: IndexRef, key: TupleArg) -> Result<Option<TarantoolTuple>> {
        let schema = self.executor.current_schema();
        let body = request::delete(&schema, &space, &index, key)?;
        match self.execute(body).await? {
            RespBody::Tuples(mut rows) => Ok(rows.pop()),
            _ => Ok(None),
        }
    }

    /// Opens a transaction on this stream. The returned guard rolls back on
    /// `Drop` unless [`StreamTransaction::commit`] consumed it first.
    pub async fn begin(&self, isolation: IsolationLevel, timeout: Option<Duration>) -> Result<StreamTransaction<'_>> {
        let timeout_secs = timeout.map(|d| d.as_secs_f64());
        self.execute(request::begin(isolation, timeout_secs)).await?;
        Ok(StreamTransaction {
            stream: self,
            resolved: false,
        })
    }
}

/// RAII guard for an open transaction on a [`Stream`]. Rolls back
/// automatically if dropped without an explicit [`commit`](Self::commit) or
/// [`rollback`](Self::rollback) — mirroring the rollback-on-drop shape used
/// elsewhere for scoped server-side resources.
pub struct StreamTransaction<'a> {
    stream: &'a Stream,
    resolved: bool,
}

impl<'a> StreamTransaction<'a> {
    pub async fn commit(mut self) -> Result<()> {
        self.stream.execute(request::commit()).await?;
        self.resolved = true;
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<()> {
        self.stream.execute(request::rollback()).await?;
        self.resolved = true;
        Ok(())
    }
}

impl<'a> Drop for StreamTransaction<'a> {
    fn drop(&mut self) {
        if !self.resolved {
            let stream_id = self.stream.stream_id;
            let executor = self.stream.executor.clone();
            tokio::spawn(async move {
                if let Err(err) = executor.execute(request::rollback(), Some(stream_id)).await {
                    tracing::warn!(error = %err, stream_id, "failed to roll back abandoned stream transaction");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Executor;
    use crate::schema::Schema;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingExecutor {
        calls: AtomicUsize,
        last_type: std::sync::Mutex<Option<crate::iproto::RequestType>>,
    }

    #[async_trait]
    impl Executor for RecordingExecutor {
        async fn execute(&self, body: request::Body, _stream_id: Option<u64>) -> Result<RespBody> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_type.lock().unwrap() = Some(body.request_type);
            Ok(RespBody::Scalar(Value::Nil))
        }

        fn current_schema(&self) -> Arc<Schema> {
            Arc::new(Schema::default())
        }
    }

    #[tokio::test]
    async fn dropping_an_unresolved_transaction_schedules_rollback() {
        let executor = Arc::new(RecordingExecutor {
            calls: AtomicUsize::new(0),
            last_type: std::sync::Mutex::new(None),
        });
        let stream = Stream::new(executor.clone(), 1);
        {
            let _txn = stream.begin(IsolationLevel::Default, None).await.unwrap();
        }
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            *executor.last_type.lock().unwrap(),
            Some(crate::iproto::RequestType::Rollback)
        );
    }

    #[tokio::test]
    async fn committing_a_transaction_does_not_roll_back() {
        let executor = Arc::new(RecordingExecutor {
            calls: AtomicUsize::new(0),
            last_type: std::sync::Mutex::new(None),
        });
        let stream = Stream::new(executor.clone(), 1);
        let txn = stream.begin(IsolationLevel::Default, None).await.unwrap();
        txn.commit().await.unwrap();
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            *executor.last_type.lock().unwrap(),
            Some(crate::iproto::RequestType::Commit)
        );
    }
}
