//! Request/response multiplexer over the shared bridge channel.
//!
//! One read loop demultiplexes everything the bridge writes: correlated
//! responses fulfill their pending request exactly once, unsolicited events
//! are queued and handed to the registered handler in arrival order by a
//! separate dispatch task. A `send` never blocks the read loop and the read
//! loop never blocks on an event handler.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::TransportError;
use crate::transport::protocol::{Inbound, InboundEvent, Request};

/// Receiver for unsolicited bridge events. Exactly one handler is active at
/// a time; registering a new one replaces the previous.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: InboundEvent);
}

struct PendingEntry {
    command: String,
    tx: oneshot::Sender<Result<serde_json::Value, TransportError>>,
}

type PendingTable = Arc<Mutex<HashMap<Uuid, PendingEntry>>>;
type HandlerSlot = Arc<Mutex<Option<Arc<dyn EventHandler>>>>;

/// Correlates outbound commands with their responses on one duplex channel.
pub struct Multiplexer {
    writer: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    pending: PendingTable,
    handler: HandlerSlot,
    ready: Notify,
    closed: Arc<AtomicBool>,
    timeout: Duration,
}

impl Multiplexer {
    /// Start the multiplexer over an arbitrary duplex pair. Spawns the read
    /// loop and the event dispatch loop; both run until the channel closes.
    pub fn start<R, W>(reader: R, writer: W, timeout: Duration) -> Arc<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let mux = Arc::new(Self {
            writer: Mutex::new(Box::new(writer)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            handler: Arc::new(Mutex::new(None)),
            ready: Notify::new(),
            closed: Arc::new(AtomicBool::new(false)),
            timeout,
        });

        tokio::spawn(read_loop(reader, event_tx, Arc::clone(&mux)));
        tokio::spawn(dispatch_loop(event_rx, Arc::clone(&mux.handler)));

        mux
    }

    /// Register the event handler. Events arriving before registration are
    /// dropped with a debug log, matching the bridge's fire-and-forget
    /// contract for its startup chatter.
    pub async fn set_event_handler(&self, handler: Arc<dyn EventHandler>) {
        *self.handler.lock().await = Some(handler);
    }

    /// Wait until the bridge announces readiness (its `READY` line).
    /// Single-waiter: the readiness permit is stored, so waiting after the
    /// line has already arrived returns immediately.
    pub async fn wait_ready(&self) {
        self.ready.notified().await;
    }

    /// Send a command and suspend until its correlated response arrives or
    /// the timeout elapses. A timed-out request removes its pending entry;
    /// a response arriving later is silently dropped.
    pub async fn send(
        &self,
        command: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        let request = Request::new(command, params);
        let request_id = request.request_id;
        let (tx, rx) = oneshot::channel();

        self.pending.lock().await.insert(
            request_id,
            PendingEntry {
                command: command.to_string(),
                tx,
            },
        );

        let mut line =
            serde_json::to_vec(&request).map_err(|e| TransportError::Malformed(e.to_string()))?;
        line.push(b'\n');

        {
            let mut writer = self.writer.lock().await;
            let write_result = async {
                writer.write_all(&line).await?;
                writer.flush().await
            }
            .await;

            if let Err(e) = write_result {
                self.pending.lock().await.remove(&request_id);
                return Err(TransportError::Io(e));
            }
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result,
            // The read loop drained the table and dropped our sender.
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                Err(TransportError::Timeout {
                    command: command.to_string(),
                    seconds: self.timeout.as_secs(),
                })
            }
        }
    }

    /// Number of requests still awaiting a response.
    pub async fn pending_requests(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Whether the channel has terminated.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn notify_ready(&self) {
        self.ready.notify_one();
    }
}

async fn read_loop<R>(reader: R, events: mpsc::UnboundedSender<InboundEvent>, mux: Arc<Multiplexer>)
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let pending = Arc::clone(&mux.pending);
    let mut lines = BufReader::new(reader).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(raw)) => {
                let line = raw.trim();
                if line.is_empty() {
                    continue;
                }

                match serde_json::from_str::<Inbound>(line) {
                    Ok(Inbound::Response(resp)) => {
                        let entry = pending.lock().await.remove(&resp.request_id);
                        match entry {
                            Some(entry) => {
                                let result = if resp.success {
                                    Ok(resp.data.unwrap_or(serde_json::Value::Null))
                                } else {
                                    Err(TransportError::Command {
                                        command: entry.command,
                                        message: resp
                                            .error
                                            .unwrap_or_else(|| "unknown error".to_string()),
                                    })
                                };
                                // The caller may have timed out already; a
                                // late result has nowhere to go and is dropped.
                                let _ = entry.tx.send(result);
                            }
                            None => {
                                debug!(
                                    request_id = %resp.request_id,
                                    "dropping response for unknown or completed request"
                                );
                            }
                        }
                    }
                    Ok(Inbound::Event(event)) => {
                        if events.send(event).is_err() {
                            break;
                        }
                    }
                    Err(_) => {
                        // The bridge writes a bare READY line once its
                        // session is established; everything else non-JSON
                        // is noise to skip.
                        if line.contains("READY") {
                            mux.notify_ready();
                        } else {
                            warn!(line, "skipping malformed bridge line");
                        }
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("bridge read failed: {e}");
                break;
            }
        }
    }

    mux.closed.store(true, Ordering::SeqCst);

    let drained: Vec<PendingEntry> = {
        let mut table = pending.lock().await;
        table.drain().map(|(_, entry)| entry).collect()
    };
    for entry in drained {
        let _ = entry.tx.send(Err(TransportError::Closed));
    }

    let _ = events.send(InboundEvent::disconnected());
}

async fn dispatch_loop(mut events: mpsc::UnboundedReceiver<InboundEvent>, handler: HandlerSlot) {
    while let Some(event) = events.recv().await {
        let active = handler.lock().await.clone();
        match active {
            Some(h) => h.handle(event).await,
            None => debug!(event = %event.event, "no event handler registered, dropping event"),
        }
    }
}
