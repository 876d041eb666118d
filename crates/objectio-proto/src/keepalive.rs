//! Server side of the keep-alive protocol
//!
//! A session owns the response body through a single writer task. The
//! handler runs its operation elsewhere and reports the outcome with
//! [`KeepAlive::done`], which returns only once the writer task has put the
//! terminal frame on the wire. Only the first completion is used.
//!
//! Three variants share the writer:
//! - [`KeepAlive::respond_only`] heartbeats from the start.
//! - [`KeepAlive::with_request_body`] stays silent until the request body
//!   has been consumed, since the caller is still uploading.
//! - [`StreamResponse`] additionally carries data blocks submitted through a
//!   bounded channel.

use crate::frame::{DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_MAX_BLOCK_SIZE, Frame, block_header};
use bytes::Bytes;
use futures::Stream;
use objectio_common::config::KeepAliveConfig;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// Frames buffered between the writer task and the transport
const WIRE_CAPACITY: usize = 8;

/// Session tunables
#[derive(Clone, Copy, Debug)]
pub struct KeepAliveOptions {
    pub heartbeat_interval: Duration,
    pub max_block_size: usize,
    pub stream_capacity: usize,
}

impl Default for KeepAliveOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            max_block_size: DEFAULT_MAX_BLOCK_SIZE,
            stream_capacity: 1,
        }
    }
}

impl From<&KeepAliveConfig> for KeepAliveOptions {
    fn from(config: &KeepAliveConfig) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval(),
            max_block_size: config.max_block_size,
            stream_capacity: config.stream_capacity,
        }
    }
}

/// Outcome of an operation. The success payload is written after the terminator.
pub type Outcome = Result<Bytes, String>;

struct Completion {
    outcome: Outcome,
    ack: oneshot::Sender<()>,
}

/// Single-use completion handoff
///
/// The slot lock is held until the writer acknowledges, so concurrent
/// callers queue behind the first and then find the slot empty.
struct CompletionSignal {
    slot: Mutex<Option<oneshot::Sender<Completion>>>,
}

impl CompletionSignal {
    fn new() -> (Self, oneshot::Receiver<Completion>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                slot: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Returns false if a completion was already delivered
    async fn complete(&self, outcome: impl FnOnce() -> Outcome) -> bool {
        let mut slot = self.slot.lock().await;
        let Some(tx) = slot.take() else {
            return false;
        };

        let (ack, acked) = oneshot::channel();
        if tx
            .send(Completion {
                outcome: outcome(),
                ack,
            })
            .is_ok()
        {
            let _ = acked.await;
        }
        true
    }
}

/// Response body of a keep-alive session
pub struct FrameStream {
    inner: ReceiverStream<io::Result<Bytes>>,
}

impl Stream for FrameStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// The connection as seen by the writer task
struct Wire {
    tx: mpsc::Sender<io::Result<Bytes>>,
    can_write: bool,
    cancel: CancellationToken,
}

impl Wire {
    fn new() -> (Self, FrameStream, CancellationToken) {
        let (tx, rx) = mpsc::channel(WIRE_CAPACITY);
        let cancel = CancellationToken::new();
        (
            Self {
                tx,
                can_write: true,
                cancel: cancel.clone(),
            },
            FrameStream {
                inner: ReceiverStream::new(rx),
            },
            cancel,
        )
    }

    async fn write(&mut self, data: Bytes) {
        if !self.can_write {
            return;
        }
        if self.tx.send(Ok(data)).await.is_err() {
            self.lost();
        }
    }

    async fn write_block(&mut self, data: Bytes) {
        self.write(block_header(data.len())).await;
        if !data.is_empty() {
            self.write(data).await;
        }
    }

    /// Resolves when the transport drops the response body
    async fn closed(&self) {
        self.tx.closed().await;
    }

    /// Stop writing and tell the operation nobody is listening
    fn lost(&mut self) {
        if self.can_write {
            tracing::debug!("keep-alive peer went away, cancelling operation");
            self.can_write = false;
            self.cancel.cancel();
        }
    }

    async fn finish(&mut self, completion: Result<Completion, oneshot::error::RecvError>) {
        match completion {
            Ok(Completion { outcome, ack }) => {
                match outcome {
                    Ok(payload) => {
                        self.write(Frame::Success.encode()).await;
                        if !payload.is_empty() {
                            self.write(payload).await;
                        }
                    }
                    Err(msg) => self.write(Frame::Error(msg).encode()).await,
                }
                let _ = ack.send(());
            }
            Err(_) => {
                tracing::warn!("keep-alive session dropped without completing");
                self.write(Frame::Error("operation abandoned by server".into()).encode())
                    .await;
            }
        }
    }
}

fn heartbeat_ticker(interval: Duration) -> Interval {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn heartbeat_until_done(
    mut wire: Wire,
    mut done: oneshot::Receiver<Completion>,
    interval: Duration,
) {
    let mut ticker = heartbeat_ticker(interval);
    loop {
        tokio::select! {
            biased;
            completion = &mut done => {
                wire.finish(completion).await;
                return;
            }
            () = wire.closed(), if wire.can_write => wire.lost(),
            _ = ticker.tick() => wire.write(Frame::Heartbeat.encode()).await,
        }
    }
}

/// Keep-alive session for handlers that produce a single result
pub struct KeepAlive {
    completion: CompletionSignal,
    cancel: CancellationToken,
}

impl KeepAlive {
    /// Start a session whose request was fully decoded up front
    #[must_use]
    pub fn respond_only(options: KeepAliveOptions) -> (Self, FrameStream) {
        let (wire, frames, cancel) = Wire::new();
        let (completion, done) = CompletionSignal::new();
        tokio::spawn(heartbeat_until_done(wire, done, options.heartbeat_interval));
        (Self { completion, cancel }, frames)
    }

    /// Start a session that must consume `body` before producing a result
    ///
    /// No heartbeats are written until the returned [`DrainBody`] reaches
    /// its end, fails, or is dropped, or the peer goes away.
    pub fn with_request_body<S>(body: S, options: KeepAliveOptions) -> (Self, DrainBody<S>, FrameStream) {
        let (mut wire, frames, cancel) = Wire::new();
        let (completion, mut done) = CompletionSignal::new();
        let (drained_tx, drained_rx) = oneshot::channel();
        let token = cancel.clone();
        let interval = options.heartbeat_interval;

        tokio::spawn(async move {
            tokio::select! {
                biased;
                completion = &mut done => {
                    wire.finish(completion).await;
                    return;
                }
                () = token.cancelled() => {}
                () = wire.closed() => wire.lost(),
                _ = drained_rx => {}
            }
            heartbeat_until_done(wire, done, interval).await;
        });

        let body = DrainBody {
            inner: body,
            drained: Some(drained_tx),
        };
        (Self { completion, cancel }, body, frames)
    }

    /// Token cancelled when the peer stops reading the response
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Report the outcome and wait until the terminal frame is written
    ///
    /// Calls after the first are no-ops.
    pub async fn done(&self, outcome: Outcome) {
        self.completion.complete(|| outcome).await;
    }
}

/// Request body wrapper that tells the session when reading has finished
pub struct DrainBody<S> {
    inner: S,
    drained: Option<oneshot::Sender<()>>,
}

impl<S> DrainBody<S> {
    fn signal(&mut self) {
        if let Some(tx) = self.drained.take() {
            let _ = tx.send(());
        }
    }
}

impl<S, E> Stream for DrainBody<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<Bytes, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        let item = ready!(Pin::new(&mut this.inner).poll_next(cx));
        if !matches!(item, Some(Ok(_))) {
            this.signal();
        }
        Poll::Ready(item)
    }
}

impl<S> Drop for DrainBody<S> {
    fn drop(&mut self) {
        self.signal();
    }
}

/// Block-streaming session
///
/// Producers call [`write`](Self::write) from any task; blocks reach the
/// wire in submission order. The channel is bounded, so a slow reader
/// holds producers back.
pub struct StreamResponse {
    blocks: mpsc::Sender<Bytes>,
    completion: CompletionSignal,
    first_error: parking_lot::Mutex<Option<String>>,
    max_block_size: usize,
    cancel: CancellationToken,
}

impl StreamResponse {
    #[must_use]
    pub fn new(options: KeepAliveOptions) -> (Self, FrameStream) {
        let (wire, frames, cancel) = Wire::new();
        let (completion, done) = CompletionSignal::new();
        let (blocks, block_rx) = mpsc::channel(options.stream_capacity.max(1));
        tokio::spawn(stream_blocks(
            wire,
            block_rx,
            done,
            options.heartbeat_interval,
        ));

        (
            Self {
                blocks,
                completion,
                first_error: parking_lot::Mutex::new(None),
                max_block_size: options.max_block_size.max(1),
                cancel,
            },
            frames,
        )
    }

    /// Submit data, split into blocks no larger than the configured maximum
    ///
    /// Empty writes are ignored.
    pub async fn write(&self, mut data: Bytes) -> io::Result<()> {
        while !data.is_empty() {
            let chunk = if data.len() > self.max_block_size {
                data.split_to(self.max_block_size)
            } else {
                std::mem::take(&mut data)
            };
            self.blocks.send(chunk).await.map_err(|_| {
                io::Error::new(io::ErrorKind::BrokenPipe, "stream response already closed")
            })?;
        }
        Ok(())
    }

    /// Token cancelled when the peer stops reading the response
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Finish successfully, unless an error was recorded first
    pub async fn close(&self) {
        self.finish().await;
    }

    /// Finish with an error. Only the first error recorded is written.
    pub async fn close_with_error(&self, err: impl ToString) {
        {
            let mut first = self.first_error.lock();
            if first.is_none() {
                *first = Some(err.to_string());
            }
        }
        self.finish().await;
    }

    async fn finish(&self) {
        self.completion
            .complete(|| match self.first_error.lock().clone() {
                Some(msg) => Err(msg),
                None => Ok(Bytes::new()),
            })
            .await;
    }
}

async fn stream_blocks(
    mut wire: Wire,
    mut blocks: mpsc::Receiver<Bytes>,
    mut done: oneshot::Receiver<Completion>,
    interval: Duration,
) {
    let mut ticker = heartbeat_ticker(interval);
    loop {
        tokio::select! {
            biased;
            Some(block) = blocks.recv() => {
                wire.write_block(block).await;
                ticker.reset();
            }
            completion = &mut done => {
                while let Ok(block) = blocks.try_recv() {
                    wire.write_block(block).await;
                }
                wire.finish(completion).await;
                return;
            }
            () = wire.closed(), if wire.can_write => wire.lost(),
            _ = ticker.tick() => wire.write(Frame::Heartbeat.encode()).await,
        }
    }
}
