//! Server-push iteration for long-running requests (e.g. `call`) that emit
//! intermediate messages sharing the originating request's sync-id.
//!
//! Per the design decision in the design notes, this driver models "one
//! iterator per request": the [`PushIterator`] is handed back at the same
//! time as the request is issued, rather than being obtainable separately
//! and fanned out to multiple subscribers.

use crate::codec::Value;
use crate::error::Result;
use crate::response::Body;
use tokio::sync::mpsc;

/// A bounded queue of push payloads, terminated when the multiplexer closes
/// the channel on delivering the request's terminal (non-push) response.
pub struct PushIterator {
    rx: mpsc::Receiver<crate::response::Response>,
}

impl PushIterator {
    pub(crate) fn new(rx: mpsc::Receiver<crate::response::Response>) -> Self {
        Self { rx }
    }

    /// Returns the next push payload, or `None` once the request's terminal
    /// response has arrived and no further pushes will be delivered.
    pub async fn next(&mut self) -> Option<Result<Value>> {
        let response = self.rx.recv().await?;
        Some(Ok(push_payload(response.body)))
    }
}

fn push_payload(body: Body) -> Value {
    match body {
        Body::Scalar(value) => value,
        Body::Tuples(mut rows) if rows.len() == 1 => Value::Array(rows.remove(0).into_vec()),
        Body::Tuples(rows) => Value::Array(
            rows.into_iter()
                .map(|row| Value::Array(row.into_vec()))
                .collect(),
        ),
        Body::Sql { rows, .. } => Value::Array(
            rows.into_iter()
                .map(|row| Value::Array(row.into_vec()))
                .collect(),
        ),
        Body::Prepared { statement_id, .. } => Value::UInt(statement_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::Response;

    #[tokio::test]
    async fn yields_pushes_in_order_then_ends() {
        let (tx, rx) = mpsc::channel(8);
        let mut iter = PushIterator::new(rx);

        for i in 1..=3 {
            tx.send(Response {
                sync: 1,
                schema_version: 1,
                is_push: true,
                body: Body::Scalar(Value::from(format!("hello_{i}"))),
            })
            .await
            .unwrap();
        }
        drop(tx);

        let mut seen = Vec::new();
        while let Some(item) = iter.next().await {
            seen.push(item.unwrap());
        }
        assert_eq!(
            seen,
            vec![
                Value::from("hello_1".to_string()),
                Value::from("hello_2".to_string()),
                Value::from("hello_3".to_string()),
            ]
        );
    }
}
