//! Prepared SQL statements: `IPROTO_PREPARE` allocates a `statement_id` on
//! the server that subsequent `IPROTO_EXECUTE` calls bind parameters
//! against, avoiding re-parsing the SQL text on every execution.

use crate::codec::Value;
use crate::connection::Executor;
use crate::error::{Error, Result};
use crate::request;
use crate::response::Body as RespBody;
use crate::tuple::TarantoolTuple;
use std::sync::Arc;

/// A server-side prepared statement handle, scoped to the connection (or
/// stream) that created it. Nothing unprepares it automatically — Tarantool
/// has no `IPROTO_UNPREPARE` request; the server reclaims it when the
/// session closes, so this type is a thin, `Clone`-free handle rather than
/// an RAII guard.
pub struct PreparedStatement {
    executor: Arc<dyn Executor>,
    statement_id: u64,
    param_count: Option<u32>,
    metadata: Vec<String>,
    stream_id: Option<u64>,
}

impl PreparedStatement {
    pub async fn prepare(executor: Arc<dyn Executor>, sql_text: &str) -> Result<Self> {
        Self::prepare_on_stream(executor, sql_text, None).await
    }

    pub async fn prepare_on_stream(
        executor: Arc<dyn Executor>,
        sql_text: &str,
        stream_id: Option<u64>,
    ) -> Result<Self> {
        let body = request::prepare(sql_text);
        match executor.execute(body, stream_id).await? {
            RespBody::Prepared {
                statement_id,
                param_count,
                metadata,
            } => Ok(Self {
                executor,
                statement_id,
                param_count,
                metadata,
                stream_id,
            }),
            _ => Err(Error::Protocol("prepare response did not carry a statement id")),
        }
    }

    pub fn statement_id(&self) -> u64 {
        self.statement_id
    }

    pub fn param_count(&self) -> Option<u32> {
        self.param_count
    }

    pub fn metadata(&self) -> &[String] {
        &self.metadata
    }

    pub async fn execute(&self, bind: Vec<Value>) -> Result<(Vec<TarantoolTuple>, Option<u64>)> {
        let body = request::execute_prepared(self.statement_id, bind);
        match self.executor.execute(body, self.stream_id).await? {
            RespBody::Sql { rows, row_count, .. } => Ok((rows, row_count)),
            RespBody::Tuples(rows) => Ok((rows, None)),
            _ => Ok((vec![], None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;
    use async_trait::async_trait;

    struct FakeExecutor;

    #[async_trait]
    impl Executor for FakeExecutor {
        async fn execute(&self, body: request::Body, _stream_id: Option<u64>) -> Result<RespBody> {
            match body.request_type {
                crate::iproto::RequestType::Prepare => Ok(RespBody::Prepared {
                    statement_id: 42,
                    param_count: Some(1),
                    metadata: vec!["id".to_owned()],
                }),
                crate::iproto::RequestType::Execute => Ok(RespBody::Sql {
                    rows: vec![TarantoolTuple::new(vec![Value::Int(1)])],
                    row_count: Some(1),
                    autoincrement_ids: vec![],
                    metadata: vec!["id".to_owned()],
                }),
                _ => Ok(RespBody::Scalar(Value::Nil)),
            }
        }

        fn current_schema(&self) -> Arc<Schema> {
            Arc::new(Schema::default())
        }
    }

    #[tokio::test]
    async fn prepare_then_execute_round_trip() {
        let statement = PreparedStatement::prepare(Arc::new(FakeExecutor), "select * from t where id = ?")
            .await
            .unwrap();
        assert_eq!(statement.statement_id(), 42);
        assert_eq!(statement.param_count(), Some(1));

        let (rows, row_count) = statement.execute(vec![Value::Int(1)]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(row_count, Some(1));
    }
}
