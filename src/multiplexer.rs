//! Sync-id allocation and the in-flight request table.
//!
//! A dedicated reader task (owned by the connection engine) holds the
//! socket's read half and calls [`Multiplexer::complete`]/[`Multiplexer::push`]
//! as frames arrive; callers hold a [`Waiter`] that detaches itself from the
//! table on `Drop` if it's dropped before completion -- the cancellation
//! mechanism described in the design notes.

use crate::error::{Error, Result};
use crate::response::Response;
use crate::tuple::FieldIndex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

struct Entry {
    reply: Option<oneshot::Sender<Result<Response>>>,
    push: Option<mpsc::Sender<Response>>,
    fields: Option<Arc<FieldIndex>>,
}

#[derive(Default)]
struct Table {
    entries: HashMap<u64, Entry>,
}

pub struct Multiplexer {
    next_sync: AtomicU64,
    table: Mutex<Table>,
}

impl Default for Multiplexer {
    fn default() -> Self {
        Self {
            next_sync: AtomicU64::new(1),
            table: Mutex::new(Table::default()),
        }
    }
}

impl Multiplexer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Allocates the next sync-id, skipping zero (reserved by the protocol
    /// to mean "no sync").
    fn next_sync(&self) -> u64 {
        loop {
            let sync = self.next_sync.fetch_add(1, Ordering::Relaxed);
            if sync != 0 {
                return sync;
            }
        }
    }

    /// Registers a new in-flight request and returns its sync-id and waiter.
    /// `fields` is the resolved space's field index, if any, so a later
    /// response for this sync can build named tuples against it.
    pub fn register(self: &Arc<Self>, fields: Option<Arc<FieldIndex>>) -> (u64, Waiter) {
        let sync = self.next_sync();
        let (tx, rx) = oneshot::channel();
        self.table.lock().unwrap().entries.insert(
            sync,
            Entry {
                reply: Some(tx),
                push: None,
                fields,
            },
        );
        (
            sync,
            Waiter {
                sync,
                multiplexer: self.clone(),
                rx: Some(rx),
                done: false,
            },
        )
    }

    /// Registers a request that expects server push messages in addition to
    /// its final response.
    pub fn register_with_push(
        self: &Arc<Self>,
        push_buffer: usize,
        fields: Option<Arc<FieldIndex>>,
    ) -> (u64, Waiter, mpsc::Receiver<Response>) {
        let sync = self.next_sync();
        let (tx, rx) = oneshot::channel();
        let (push_tx, push_rx) = mpsc::channel(push_buffer.max(1));
        self.table.lock().unwrap().entries.insert(
            sync,
            Entry {
                reply: Some(tx),
                push: Some(push_tx),
                fields,
            },
        );
        (
            sync,
            Waiter {
                sync,
                multiplexer: self.clone(),
                rx: Some(rx),
                done: false,
            },
            push_rx,
        )
    }

    /// Looks up the field index recorded for a sync-id at registration time,
    /// without disturbing the entry itself. Called by the reader task once
    /// it has decoded a response's sync-id but before it decodes the body.
    pub fn fields_for(&self, sync: u64) -> Option<Arc<FieldIndex>> {
        self.table.lock().unwrap().entries.get(&sync).and_then(|e| e.fields.clone())
    }

    /// Called by the reader task when a final (non-push) response arrives.
    /// Per §4.6, an unknown sync is logged and dropped rather than erroring.
    pub fn complete(&self, sync: u64, result: Result<Response>) {
        let entry = self.table.lock().unwrap().entries.remove(&sync);
        match entry {
            Some(entry) => {
                if let Some(reply) = entry.reply {
                    let _ = reply.send(result);
                }
            }
            None => {
                tracing::debug!(sync, "response for unknown or cancelled sync dropped");
            }
        }
    }

    /// Called by the reader task when a push chunk arrives; the record
    /// stays registered so the terminal response can still complete it.
    pub fn push(&self, sync: u64, response: Response) {
        let table = self.table.lock().unwrap();
        match table.entries.get(&sync) {
            Some(entry) => {
                if let Some(push) = &entry.push {
                    let _ = push.try_send(response);
                }
            }
            None => {
                tracing::debug!(sync, "push for unknown or cancelled sync dropped");
            }
        }
    }

    fn cancel(&self, sync: u64) {
        self.table.lock().unwrap().entries.remove(&sync);
    }

    /// Completes every in-flight request with `NotConnected` and clears the
    /// table, called once when the socket closes.
    pub fn sweep(&self) {
        let entries = std::mem::take(&mut self.table.lock().unwrap().entries);
        for (_, entry) in entries {
            if let Some(reply) = entry.reply {
                let _ = reply.send(Err(Error::NotConnected));
            }
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.table.lock().unwrap().entries.len()
    }
}

/// A pending request's completion handle. Dropping it before it resolves
/// removes its table entry so a late response is silently discarded.
pub struct Waiter {
    sync: u64,
    multiplexer: Arc<Multiplexer>,
    rx: Option<oneshot::Receiver<Result<Response>>>,
    done: bool,
}

impl Waiter {
    pub fn sync(&self) -> u64 {
        self.sync
    }

    /// Awaits the final response, optionally bounded by a deadline.
    pub async fn recv(mut self, deadline: Option<Instant>) -> Result<Response> {
        let mut rx = self.rx.take().expect("Waiter::recv called twice");
        let result = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, &mut rx).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(Error::Cancelled),
                Err(_) => Err(Error::Timeout),
            },
            None => rx.await.map_err(|_| Error::Cancelled)?,
        };
        self.done = true;
        result
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        if !self.done {
            self.multiplexer.cancel(self.sync);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::Body;

    fn dummy_response(sync: u64) -> Response {
        Response {
            sync,
            schema_version: 1,
            is_push: false,
            body: Body::Scalar(crate::codec::Value::Nil),
        }
    }

    #[tokio::test]
    async fn complete_resolves_the_matching_waiter() {
        let mux = Multiplexer::new();
        let (sync, waiter) = mux.register(None);
        mux.complete(sync, Ok(dummy_response(sync)));
        let response = waiter.recv(None).await.unwrap();
        assert_eq!(response.sync, sync);
    }

    #[tokio::test]
    async fn dropping_a_waiter_cancels_its_entry() {
        let mux = Multiplexer::new();
        let (sync, waiter) = mux.register(None);
        drop(waiter);
        assert_eq!(mux.in_flight_count(), 0);
        // A late response for the now-cancelled sync is simply dropped.
        mux.complete(sync, Ok(dummy_response(sync)));
    }

    #[tokio::test]
    async fn sweep_fails_all_in_flight_requests() {
        let mux = Multiplexer::new();
        let (_, waiter_a) = mux.register(None);
        let (_, waiter_b) = mux.register(None);
        mux.sweep();
        assert!(matches!(waiter_a.recv(None).await, Err(Error::NotConnected)));
        assert!(matches!(waiter_b.recv(None).await, Err(Error::NotConnected)));
    }
}
