use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use bytes::Bytes;
use hurpc_envelope::{Envelope, EnvelopeError, EnvelopeReader, EnvelopeWriter};
use hurpc_transport::IpcStream;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::config::MuxConfig;
use crate::correlation::CorrelationTable;
use crate::error::{MuxError, Result};
use crate::gate::WriteGate;
use crate::registry::{HandlerError, HandlerRegistry, HandlerResult};

/// Bidirectional call multiplexer bound 1:1 to one connection.
///
/// Either side can [`call`](Self::call) the other and serve calls from it at
/// the same time. One dispatch loop ([`run`](Self::run)) owns the read half;
/// every writer goes through a shared [`WriteGate`]. Cloning is cheap and
/// yields another handle to the same connection.
#[derive(Clone)]
pub struct Multiplexer {
    inner: Arc<Inner>,
}

struct Inner {
    id: String,
    config: MuxConfig,
    /// Handle kept for shutdown; the reader and gate own their own clones.
    stream: IpcStream,
    reader: Mutex<Option<EnvelopeReader<IpcStream>>>,
    gate: WriteGate<IpcStream>,
    pending: CorrelationTable,
    handlers: HandlerRegistry,
    /// Shared by every call this side initiates. Replies echo the caller's
    /// token and only the caller looks tokens up, so inbound requests never
    /// collide with it.
    next_token: AtomicI64,
    running: AtomicBool,
    closed: AtomicBool,
}

impl Multiplexer {
    /// Bind a multiplexer to a connected stream.
    ///
    /// Applies the read/write deadlines and buffer sizes from `config`. The
    /// dispatch loop is not started; call [`run`](Self::run) or
    /// [`spawn`](Self::spawn).
    pub fn initialize(stream: IpcStream, config: MuxConfig) -> Result<Self> {
        let id = stream
            .peer_addr()
            .unwrap_or_else(|| stream.transport_name().to_string());
        Self::with_id(id, stream, config)
    }

    /// Like [`initialize`](Self::initialize) with an explicit identifier.
    pub fn with_id(id: impl Into<String>, stream: IpcStream, config: MuxConfig) -> Result<Self> {
        config.validate()?;

        let envelope_config = config.envelope_config();
        let reader = EnvelopeReader::with_config_ipc(stream.try_clone()?, envelope_config.clone())
            .map_err(MuxError::Decode)?;
        let writer = EnvelopeWriter::with_config_ipc(stream.try_clone()?, envelope_config)
            .map_err(MuxError::Write)?;

        Ok(Self {
            inner: Arc::new(Inner {
                id: id.into(),
                config,
                stream,
                reader: Mutex::new(Some(reader)),
                gate: WriteGate::new(writer),
                pending: CorrelationTable::new(),
                handlers: HandlerRegistry::new(),
                next_token: AtomicI64::new(1),
                running: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Invoke `method` on the peer and block until its response or the timeout.
    ///
    /// Remote failures come back as [`MuxError::Remote`] (handler error text)
    /// or [`MuxError::MethodNotFound`]; local ones as [`MuxError::Write`],
    /// [`MuxError::CallTimeout`] or [`MuxError::Closed`].
    pub fn call(&self, method: &str, args: impl Into<Bytes>) -> Result<Bytes> {
        let inner = &self.inner;
        let token = inner.next_token.fetch_add(1, Ordering::Relaxed);
        let request = Envelope::request(token, method, args);

        let waiter = inner.pending.register(token);
        // Teardown sets `closed` before draining, so either we see the flag
        // here or the drain disconnects our waiter.
        if inner.closed.load(Ordering::SeqCst) {
            inner.pending.remove(token);
            return Err(MuxError::Closed);
        }

        if let Err(err) = inner.gate.send(&request) {
            inner.pending.remove(token);
            self.write_failed(&err);
            return Err(MuxError::Write(err));
        }
        trace!(peer = %inner.id, token, method, "call sent");

        let response = match waiter.recv_timeout(inner.config.timeout) {
            Ok(response) => response,
            Err(RecvTimeoutError::Timeout) => {
                if inner.pending.remove(token) {
                    debug!(peer = %inner.id, token, method, "call timed out");
                    return Err(MuxError::CallTimeout(inner.config.timeout));
                }
                // Resolved between the timer firing and our removal.
                match waiter.try_recv() {
                    Ok(response) => response,
                    Err(_) => return Err(MuxError::CallTimeout(inner.config.timeout)),
                }
            }
            Err(RecvTimeoutError::Disconnected) => return Err(MuxError::Closed),
        };

        if response.error.is_empty() {
            Ok(response.payload)
        } else {
            Err(MuxError::from_remote(response.error))
        }
    }

    /// [`call`](Self::call) with JSON-encoded argument and result.
    pub fn call_json<A, R>(&self, method: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let payload = serde_json::to_vec(args)?;
        let result = self.call(method, payload)?;
        Ok(serde_json::from_slice(&result)?)
    }

    /// Register a handler for calls the peer makes to `method`.
    pub fn register<F>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(Bytes) -> HandlerResult + Send + Sync + 'static,
    {
        self.inner.handlers.register(method, handler);
    }

    /// Register a handler whose argument and result travel as JSON.
    pub fn register_json<A, R, F>(&self, method: impl Into<String>, handler: F)
    where
        A: DeserializeOwned + 'static,
        R: Serialize + 'static,
        F: Fn(A) -> std::result::Result<R, HandlerError> + Send + Sync + 'static,
    {
        self.inner.handlers.register_json(method, handler);
    }

    /// Run the dispatch loop on the calling thread until the connection ends.
    ///
    /// Returns `Ok(())` when the peer closes the stream between envelopes (or
    /// [`close`](Self::close) is called) and `Err(MuxError::Decode)` on
    /// malformed or truncated input or an expired read deadline. Either way the stream is shut down, outstanding calls
    /// fail with [`MuxError::Closed`], and this multiplexer is finished.
    pub fn run(&self) -> Result<()> {
        let mut reader = self
            .inner
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(MuxError::AlreadyRunning)?;

        self.inner.running.store(true, Ordering::SeqCst);
        info!(peer = %self.inner.id, "dispatch loop started");

        let outcome = loop {
            match reader.read_envelope() {
                Ok(envelope) => self.route(envelope),
                Err(EnvelopeError::ConnectionClosed) => break Ok(()),
                Err(err) => break Err(MuxError::Decode(err)),
            }
        };

        self.teardown();
        match &outcome {
            Ok(()) => info!(peer = %self.inner.id, "dispatch loop stopped: connection closed"),
            Err(err) => info!(peer = %self.inner.id, error = %err, "dispatch loop stopped"),
        }
        outcome
    }

    /// Run the dispatch loop on a dedicated thread.
    pub fn spawn(&self) -> std::io::Result<JoinHandle<Result<()>>> {
        // Thread names cannot hold NUL bytes.
        let name: String = format!("hurpc-dispatch-{}", self.inner.id)
            .chars()
            .filter(|c| *c != '\0')
            .collect();
        let mux = self.clone();
        std::thread::Builder::new()
            .name(name)
            .spawn(move || mux.run())
    }

    /// Shut the connection down. The dispatch loop exits on its next read.
    ///
    /// The multiplexer counts as closed from here on, whether or not its loop
    /// ever ran; later calls fail with [`MuxError::Closed`].
    pub fn close(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.stream.shutdown()?;
        Ok(())
    }

    /// Connection identifier (peer address or listener-assigned id).
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn config(&self) -> &MuxConfig {
        &self.inner.config
    }

    /// Remote address of the connection, when the transport has one.
    pub fn peer_addr(&self) -> Option<String> {
        self.inner.stream.peer_addr()
    }

    /// Locally registered handlers.
    pub fn handlers(&self) -> &HandlerRegistry {
        &self.inner.handlers
    }

    /// Calls waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }

    /// Whether the dispatch loop is currently reading.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Whether the connection has been closed, either by [`close`](Self::close)
    /// or by the dispatch loop ending. A closed multiplexer stays closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn route(&self, envelope: Envelope) {
        if envelope.completed {
            // Resolution never blocks (single-slot channel, one send), so it
            // runs inline rather than on its own thread.
            let token = envelope.token;
            if !self.inner.pending.resolve(envelope) {
                debug!(peer = %self.inner.id, token, "dropping completion with no waiter");
            }
            return;
        }

        trace!(
            peer = %self.inner.id,
            token = envelope.token,
            method = %envelope.method,
            "request received"
        );
        let mux = self.clone();
        let spawned = std::thread::Builder::new()
            .name("hurpc-handler".to_string())
            .spawn(move || mux.serve(envelope));
        if let Err(err) = spawned {
            // The envelope moved into the failed closure; the caller times out.
            warn!(peer = %self.inner.id, error = %err, "failed to spawn handler thread");
        }
    }

    fn serve(&self, request: Envelope) {
        let token = request.token;
        let response = match self.inner.handlers.invoke(&request.method, request.payload) {
            Ok(payload) => Envelope::response(token, payload),
            Err(text) => Envelope::failure(token, text),
        };

        // Nobody to report a failed reply to; the caller will time out.
        if let Err(err) = self.inner.gate.send(&response) {
            warn!(
                peer = %self.inner.id,
                token,
                method = %request.method,
                error = %err,
                "failed to send response"
            );
            self.write_failed(&err);
        }
    }

    /// A failed write can leave a torn envelope on the stream, after which the
    /// gate refuses to write. The connection is useless then, so shut it down
    /// and let the dispatch loop tear everything down.
    fn write_failed(&self, err: &EnvelopeError) {
        if !self.inner.gate.is_broken() {
            return;
        }
        warn!(
            peer = %self.inner.id,
            error = %err,
            "write failed mid-stream, closing connection"
        );
        if let Err(close_err) = self.close() {
            debug!(peer = %self.inner.id, error = %close_err, "close after write failure failed");
        }
    }

    fn teardown(&self) {
        let inner = &self.inner;
        inner.closed.store(true, Ordering::SeqCst);
        inner.running.store(false, Ordering::SeqCst);
        if let Err(err) = inner.stream.shutdown() {
            debug!(peer = %inner.id, error = %err, "shutdown after dispatch loop failed");
        }
        let abandoned = inner.pending.drain();
        if abandoned > 0 {
            debug!(peer = %inner.id, abandoned, "failed outstanding calls on close");
        }
    }
}

impl std::fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("id", &self.inner.id)
            .field("transport", &self.inner.stream.transport_name())
            .field("pending_calls", &self.pending_calls())
            .field("running", &self.is_running())
            .field("closed", &self.is_closed())
            .finish()
    }
}
