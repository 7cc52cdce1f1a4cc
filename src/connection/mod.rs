//! The connection lifecycle engine: socket I/O, the handshake, the
//! reconnect loop, the background ping task, and the public request API
//! built on top of the multiplexer and request/response codecs.

mod handshake;

pub use handshake::ServerVersion;

use crate::codec::Value;
use crate::error::{Error, Result};
use crate::multiplexer::Multiplexer;
use crate::request::{self, Body as ReqBody, IndexRef, IteratorArg, SpaceRef, TupleArg};
use crate::response::{self, Body as RespBody};
use crate::schema::{Schema, VINDEX_ID, VSPACE_ID};
use crate::tuple::{FieldIndex, TarantoolTuple};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Where to dial: TCP host/port, or a Unix-domain socket path (the `host ==
/// "unix/"` convention from §6, expressed here as its own variant instead).
#[derive(Debug, Clone)]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    Unix { path: String },
}

impl Endpoint {
    async fn open(&self) -> Result<Socket> {
        match self {
            Endpoint::Tcp { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port)).await?;
                stream.set_nodelay(true)?;
                Ok(Socket::Tcp(stream))
            }
            Endpoint::Unix { path } => Ok(Socket::Unix(UnixStream::connect(path).await?)),
        }
    }
}

enum Socket {
    Tcp(TcpStream),
    Unix(UnixStream),
}

type BoxRead = Box<dyn tokio::io::AsyncRead + Unpin + Send>;
type BoxWrite = Box<dyn tokio::io::AsyncWrite + Unpin + Send>;

impl Socket {
    fn split(self) -> (BoxRead, BoxWrite) {
        match self {
            Socket::Tcp(s) => {
                let (r, w) = s.into_split();
                (Box::new(r), Box::new(w))
            }
            Socket::Unix(s) => {
                let (r, w) = s.into_split();
                (Box::new(r), Box::new(w))
            }
        }
    }
}

/// Endpoint, credentials, timeouts, and codec knobs for one [`Connection`].
/// Built up via per-field setter methods rather than a separate
/// file-based config format.
#[derive(Debug, Clone)]
pub struct Config {
    pub endpoint: EndpointConfig,
    pub username: Option<String>,
    pub password: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Option<Duration>,
    pub reconnect_timeout: Option<Duration>,
    pub ping_timeout: Option<Duration>,
    pub fetch_schema: bool,
    pub auto_refetch_schema: bool,
    pub read_buffer_initial_size: usize,
}

/// A cloneable, owned description of an [`Endpoint`] (`Endpoint` itself
/// isn't `Clone` because opening it is a one-shot async operation).
#[derive(Debug, Clone)]
pub enum EndpointConfig {
    Tcp { host: String, port: u16 },
    Unix { path: String },
}

impl EndpointConfig {
    fn to_endpoint(&self) -> Endpoint {
        match self {
            EndpointConfig::Tcp { host, port } => Endpoint::Tcp {
                host: host.clone(),
                port: *port,
            },
            EndpointConfig::Unix { path } => Endpoint::Unix { path: path.clone() },
        }
    }
}

impl Config {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            endpoint: EndpointConfig::Tcp {
                host: host.into(),
                port,
            },
            username: None,
            password: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: None,
            reconnect_timeout: Some(Duration::from_secs(1)),
            ping_timeout: Some(Duration::from_secs(30)),
            fetch_schema: true,
            auto_refetch_schema: true,
            read_buffer_initial_size: 16 * 1024,
        }
    }

    pub fn unix(path: impl Into<String>) -> Self {
        Self {
            endpoint: EndpointConfig::Unix { path: path.into() },
            ..Self::tcp("", 0)
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_reconnect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.reconnect_timeout = timeout;
        self
    }

    pub fn with_ping_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.ping_timeout = timeout;
        self
    }

    pub fn with_fetch_schema(mut self, fetch_schema: bool) -> Self {
        self.fetch_schema = fetch_schema;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Disconnecting = 3,
    Reconnecting = 4,
}

impl From<u8> for State {
    fn from(v: u8) -> Self {
        match v {
            1 => State::Connecting,
            2 => State::Connected,
            3 => State::Disconnecting,
            4 => State::Reconnecting,
            _ => State::Disconnected,
        }
    }
}

/// Anything able to execute a resolved request body on behalf of a
/// [`Stream`]/[`PreparedStatement`], abstracting over the concrete
/// [`Connection`] so those types don't depend on it directly.
#[async_trait::async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, body: ReqBody, stream_id: Option<u64>) -> Result<RespBody>;
    fn current_schema(&self) -> Arc<Schema>;
}

struct StateCell(AtomicU8);

impl StateCell {
    fn new(state: State) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn get(&self) -> State {
        State::from(self.0.load(Ordering::SeqCst))
    }

    fn set(&self, state: State) {
        self.0.store(state as u8, Ordering::SeqCst);
    }
}

/// One socket, one multiplexer, one schema cache. See the module docs and
/// design notes for the state machine and concurrency model.
pub struct Connection {
    config: Config,
    mux: Arc<Multiplexer>,
    schema: StdRwLock<Arc<Schema>>,
    state: StateCell,
    writer: AsyncMutex<Option<BoxWrite>>,
    server_version: StdRwLock<Option<ServerVersion>>,
    next_stream_id: AtomicU64,
    connect_lock: AsyncMutex<()>,
    disconnect_lock: AsyncMutex<()>,
    shutdown: Notify,
    reader_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    ping_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    reconnect_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    pub fn new(config: Config) -> Arc<Self> {
        Arc::new(Self {
            config,
            mux: Multiplexer::new(),
            schema: StdRwLock::new(Arc::new(Schema::default())),
            state: StateCell::new(State::Disconnected),
            writer: AsyncMutex::new(None),
            server_version: StdRwLock::new(None),
            next_stream_id: AtomicU64::new(1),
            connect_lock: AsyncMutex::new(()),
            disconnect_lock: AsyncMutex::new(()),
            shutdown: Notify::new(),
            reader_task: std::sync::Mutex::new(None),
            ping_task: std::sync::Mutex::new(None),
            reconnect_task: std::sync::Mutex::new(None),
        })
    }

    pub fn state(&self) -> State {
        self.state.get()
    }

    pub fn schema(&self) -> Arc<Schema> {
        self.schema.read().unwrap().clone()
    }

    pub fn server_version(&self) -> Option<ServerVersion> {
        *self.server_version.read().unwrap()
    }

    #[tracing::instrument(skip(self), fields(endpoint = ?self.config.endpoint))]
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        let _guard = self.connect_lock.lock().await;
        if self.state.get() == State::Connected {
            return Ok(());
        }
        self.state.set(State::Connecting);

        match self.connect_once().await {
            Ok(()) => {
                self.state.set(State::Connected);
                self.spawn_ping_task();
                Ok(())
            }
            Err(err) => {
                tracing::warn!(error = %err, "connect failed");
                if self.config.reconnect_timeout.is_some() {
                    self.state.set(State::Reconnecting);
                    self.spawn_reconnect_task();
                    Ok(())
                } else {
                    self.state.set(State::Disconnected);
                    Err(err)
                }
            }
        }
    }

    async fn connect_once(self: &Arc<Self>) -> Result<()> {
        let endpoint = self.config.endpoint.to_endpoint();
        let socket = tokio::time::timeout(self.config.connect_timeout, endpoint.open())
            .await
            .map_err(|_| Error::Timeout)??;

        let (mut read_half, mut write_half) = socket.split();

        let mut greeting = [0u8; handshake::GREETING_LEN];
        tokio::time::timeout(self.config.connect_timeout, read_half.read_exact(&mut greeting))
            .await
            .map_err(|_| Error::Timeout)??;
        let greeting = handshake::parse_greeting(&greeting)?;
        *self.server_version.write().unwrap() = greeting.version;

        write_half.flush().await?;
        *self.writer.lock().await = Some(write_half);
        self.spawn_reader_task(read_half);

        if let (Some(username), Some(password)) = (&self.config.username, &self.config.password) {
            let scramble = handshake::scramble(password.as_bytes(), &greeting.salt);
            let body = request::auth(username, scramble);
            self.execute(body, None).await?;
        }

        if self.config.fetch_schema {
            self.refetch_schema().await?;
        }

        Ok(())
    }

    fn spawn_reader_task(self: &Arc<Self>, mut read_half: BoxRead) {
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let mut len_buf = [0u8; 5];
            loop {
                if read_half.read_exact(&mut len_buf).await.is_err() {
                    break;
                }
                let len = u32::from_be_bytes([len_buf[1], len_buf[2], len_buf[3], len_buf[4]]) as usize;
                let mut frame = vec![0u8; len];
                if read_half.read_exact(&mut frame).await.is_err() {
                    break;
                }

                let schema = this.schema();
                let parsed = response::parse_frame(&frame, |sync| this.mux.fields_for(sync));
                match parsed {
                    Ok((meta, body_result)) => {
                        if meta.schema_version > schema.version && this.config.auto_refetch_schema {
                            let this = this.clone();
                            tokio::spawn(async move {
                                let _ = this.refetch_schema().await;
                            });
                        }
                        if meta.is_push {
                            if let Ok(body) = body_result {
                                this.mux.push(
                                    meta.sync,
                                    crate::response::Response {
                                        sync: meta.sync,
                                        schema_version: meta.schema_version,
                                        is_push: true,
                                        body,
                                    },
                                );
                            }
                        } else {
                            this.mux.complete(
                                meta.sync,
                                body_result.map(|body| crate::response::Response {
                                    sync: meta.sync,
                                    schema_version: meta.schema_version,
                                    is_push: false,
                                    body,
                                }),
                            );
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "dropping unparseable frame");
                    }
                }
            }

            tracing::debug!("reader task observed socket close");
            this.mux.sweep();
            this.state.set(State::Disconnected);
            if this.config.reconnect_timeout.is_some() {
                this.state.set(State::Reconnecting);
                this.spawn_reconnect_task();
            }
        });
        *self.reader_task.lock().unwrap() = Some(handle);
    }

    fn spawn_ping_task(self: &Arc<Self>) {
        let Some(ping_timeout) = self.config.ping_timeout else {
            return;
        };
        let this = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = this.shutdown.notified() => break,
                    _ = tokio::time::sleep(ping_timeout) => {}
                }
                if this.state.get() != State::Connected {
                    break;
                }
                if let Err(err) = this.ping().await {
                    tracing::warn!(error = %err, "ping failed");
                }
            }
        });
        *self.ping_task.lock().unwrap() = Some(handle);
    }

    #[tracing::instrument(skip(self))]
    fn spawn_reconnect_task(self: &Arc<Self>) {
        let Some(reconnect_timeout) = self.config.reconnect_timeout else {
            return;
        };
        let this = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = this.shutdown.notified() => return,
                    _ = tokio::time::sleep(reconnect_timeout) => {}
                }
                if this.state.get() == State::Disconnecting {
                    return;
                }
                this.state.set(State::Connecting);
                match this.connect_once().await {
                    Ok(()) => {
                        this.state.set(State::Connected);
                        this.spawn_ping_task();
                        return;
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "reconnect attempt failed");
                        this.state.set(State::Reconnecting);
                    }
                }
            }
        });
        *self.reconnect_task.lock().unwrap() = Some(handle);
    }

    #[tracing::instrument(skip(self))]
    pub async fn disconnect(self: &Arc<Self>) {
        let _guard = self.disconnect_lock.lock().await;
        self.state.set(State::Disconnecting);
        self.shutdown.notify_waiters();

        if let Some(handle) = self.reconnect_task.lock().unwrap().take() {
            handle.abort();
        }
        if let Some(handle) = self.ping_task.lock().unwrap().take() {
            handle.abort();
        }
        *self.writer.lock().await = None;
        if let Some(handle) = self.reader_task.lock().unwrap().take() {
            handle.abort();
        }
        self.mux.sweep();
        self.state.set(State::Disconnected);
    }

    async fn write_frame(&self, frame: Vec<u8>) -> Result<()> {
        let mut guard = self.writer.lock().await;
        match guard.as_mut() {
            Some(writer) => {
                writer.write_all(&frame).await?;
                writer.flush().await?;
                Ok(())
            }
            None => Err(Error::NotConnected),
        }
    }

    fn deadline(&self) -> Option<Instant> {
        self.config.request_timeout.map(|d| Instant::now() + d)
    }

    /// Executes a resolved request body, returning its decoded result body
    /// or propagating a `DatabaseError`/transport error.
    pub async fn execute(&self, body: ReqBody, stream_id: Option<u64>) -> Result<RespBody> {
        let schema = self.schema();
        let schema_version = schema.version;
        let fields = fields_for_body(&schema, &body);
        let (sync, waiter) = self.mux.register(fields.clone());
        let frame = request::encode_frame(&body, sync, schema_version, stream_id)?;
        if let Err(err) = self.write_frame(frame).await {
            drop(waiter);
            return Err(err);
        }
        let deadline = self.deadline();
        match waiter.recv(deadline).await {
            Ok(response) => Ok(response.body),
            Err(err) if err.is_wrong_schema_version() => {
                self.refetch_schema().await?;
                let schema = self.schema();
                let schema_version = schema.version;
                let fields = fields_for_body(&schema, &body);
                let (sync, waiter) = self.mux.register(fields);
                let frame = request::encode_frame(&body, sync, schema_version, stream_id)?;
                self.write_frame(frame).await?;
                let deadline = self.deadline();
                waiter.recv(deadline).await.map(|r| r.body)
            }
            Err(err) => Err(err),
        }
    }

    /// Like [`Connection::execute`] but for requests that may emit push
    /// messages (currently only `call`); see [`crate::push::PushIterator`].
    pub async fn execute_with_push(
        &self,
        body: ReqBody,
        stream_id: Option<u64>,
        push_buffer: usize,
    ) -> Result<(RespBody, crate::push::PushIterator)> {
        let schema = self.schema();
        let schema_version = schema.version;
        let fields = fields_for_body(&schema, &body);
        let (sync, waiter, push_rx) = self.mux.register_with_push(push_buffer, fields);
        let frame = request::encode_frame(&body, sync, schema_version, stream_id)?;
        self.write_frame(frame).await?;
        let deadline = self.deadline();
        let response = waiter.recv(deadline).await?;
        Ok((response.body, crate::push::PushIterator::new(push_rx)))
    }

    fn select_all_body(space_id: u32) -> ReqBody {
        ReqBody {
            request_type: crate::iproto::RequestType::Select,
            entries: vec![
                (crate::iproto::SPACE_ID, Value::UInt(space_id as u64)),
                (crate::iproto::INDEX_ID, Value::UInt(0)),
                (crate::iproto::ITERATOR, Value::UInt(crate::iproto::IteratorType::All as u64)),
                (crate::iproto::LIMIT, Value::UInt(u32::MAX as u64)),
                (crate::iproto::KEY, Value::Array(vec![])),
            ],
        }
    }

    /// Refetches `_vspace`/`_vindex` and atomically swaps in the new schema
    /// snapshot. `_vcollation` is not yet consulted; see the design notes.
    #[tracing::instrument(skip(self))]
    pub async fn refetch_schema(&self) -> Result<()> {
        let vspace = self.execute(Self::select_all_body(VSPACE_ID), None).await?;
        let vindex = self.execute(Self::select_all_body(VINDEX_ID), None).await?;

        let space_rows = rows_to_value_lists(vspace);
        let index_rows = rows_to_value_lists(vindex);
        let version = self.schema().version.max(1);
        let schema = Schema::from_rows(version, &space_rows, &index_rows)?;
        *self.schema.write().unwrap() = Arc::new(schema);
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn ping(&self) -> Result<()> {
        self.execute(request::ping(), None).await?;
        Ok(())
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
        let schema = self.schema();
        let body = request::select(&schema, &space, &index, key, limit, offset, iterator)?;
        match self.execute(body, None).await? {
            RespBody::Tuples(rows) => Ok(rows),
            RespBody::Scalar(Value::Nil) => Ok(vec![]),
            other => Err(unexpected_body(other)),
        }
    }

    pub async fn insert(&self, space: SpaceRef, tuple: TupleArg) -> Result<TarantoolTuple> {
        let schema = self.schema();
        let body = request::insert(&schema, &space, tuple)?;
        single_tuple(self.execute(body, None).await?)
    }

    pub async fn replace(&self, space: SpaceRef, tuple: TupleArg) -> Result<TarantoolTuple> {
        let schema = self.schema();
        let body = request::replace(&schema, &space, tuple)?;
        single_tuple(self.execute(body, None).await?)
    }

    pub async fn update(
        &self,
        space: SpaceRef,
        index: IndexRef,
        key: TupleArg,
        ops: Vec<Value>,
    ) -> Result<TarantoolTuple> {
        let schema = self.schema();
        let body = request::update(&schema, &space, &index, key, ops)?;
        single_tuple(self.execute(body, None).await?)
    }

    pub async fn upsert(&self, space: SpaceRef, tuple: TupleArg, ops: Vec<Value>) -> Result<()> {
        let schema = self.schema();
        let body = request::upsert(&schema, &space, tuple, ops)?;
        self.execute(body, None).await?;
        Ok(())
    }

    pub async fn delete(&self, space: SpaceRef, index: IndexRef, key: TupleArg) -> Result<Option<TarantoolTuple>> {
        let schema = self.schema();
        let body = request::delete(&schema, &space, &index, key)?;
        match self.execute(body, None).await? {
            RespBody::Tuples(mut rows) => Ok(rows.pop()),
            _ => Ok(None),
        }
    }

    pub async fn call(&self, function_name: &str, args: Vec<Value>) -> Result<Vec<Value>> {
        match self.execute(request::call(function_name, args), None).await? {
            RespBody::Tuples(rows) => Ok(rows.into_iter().flat_map(TarantoolTuple::into_vec).collect()),
            RespBody::Scalar(v) => Ok(vec![v]),
            other => Err(unexpected_body(other)),
        }
    }

    pub async fn call_with_push(
        &self,
        function_name: &str,
        args: Vec<Value>,
        push_buffer: usize,
    ) -> Result<(Vec<Value>, crate::push::PushIterator)> {
        let (body, iterator) = self
            .execute_with_push(request::call(function_name, args), None, push_buffer)
            .await?;
        let values = match body {
            RespBody::Tuples(rows) => rows.into_iter().flat_map(TarantoolTuple::into_vec).collect(),
            RespBody::Scalar(v) => vec![v],
            other => return Err(unexpected_body(other)),
        };
        Ok((values, iterator))
    }

    pub async fn eval(&self, expr: &str, args: Vec<Value>) -> Result<Vec<Value>> {
        match self.execute(request::eval(expr, args), None).await? {
            RespBody::Tuples(rows) => Ok(rows.into_iter().flat_map(TarantoolTuple::into_vec).collect()),
            RespBody::Scalar(v) => Ok(vec![v]),
            other => Err(unexpected_body(other)),
        }
    }

    /// Allocates a fresh stream-id for a new interactive transaction.
    pub fn new_stream_id(&self) -> u64 {
        self.next_stream_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl Executor for Connection {
    async fn execute(&self, body: ReqBody, stream_id: Option<u64>) -> Result<RespBody> {
        Connection::execute(self, body, stream_id).await
    }

    fn current_schema(&self) -> Arc<Schema> {
        self.schema()
    }
}

fn single_tuple(body: RespBody) -> Result<TarantoolTuple> {
    match body {
        RespBody::Tuples(mut rows) if !rows.is_empty() => Ok(rows.remove(0)),
        other => Err(unexpected_body(other)),
    }
}

fn unexpected_body(_body: RespBody) -> Error {
    Error::Protocol("response body shape did not match the request kind")
}

fn rows_to_value_lists(body: RespBody) -> Vec<Vec<Value>> {
    match body {
        RespBody::Tuples(rows) => rows.into_iter().map(TarantoolTuple::into_vec).collect(),
        _ => Vec::new(),
    }
}

/// Resolves the field index of the space a request body targets, if it
/// carries a `SPACE_ID` key and that space is present in `schema` -- this is
/// what lets a response's tuples later support [`TarantoolTuple::get_named`].
fn fields_for_body(schema: &Schema, body: &ReqBody) -> Option<Arc<FieldIndex>> {
    body.entries
        .iter()
        .find(|(key, _)| *key == crate::iproto::SPACE_ID)
        .and_then(|(_, value)| value.as_u64())
        .and_then(|id| u32::try_from(id).ok())
        .and_then(|space_id| schema.space_by_id(space_id))
        .map(|space| space.field_positions.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_u8() {
        for state in [
            State::Disconnected,
            State::Connecting,
            State::Connected,
            State::Disconnecting,
            State::Reconnecting,
        ] {
            assert_eq!(State::from(state as u8), state);
        }
    }
}
