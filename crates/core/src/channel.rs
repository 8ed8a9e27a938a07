//! Request/response correlation over the device WebSocket.
//!
//! Every outbound command gets a fresh `cid`; the device echoes it in its
//! reply. Text frames without a matching pending request are broadcast as
//! notifications, binary frames are decoded as telemetry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::comm::{check_device_status, DeviceStatus};
use crate::command::Command;
use crate::envelope::{Request, Response};
use crate::error::{Error, Result};
use crate::telemetry::{decode_frame, TelemetryFrame};
use crate::transport::CommandTransport;

/// How long a request waits for its reply.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Keep-alive ping period.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

const BROADCAST_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy)]
pub struct ChannelConfig {
    pub request_timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            request_timeout: REQUEST_TIMEOUT,
            heartbeat_interval: HEARTBEAT_INTERVAL,
        }
    }
}

/// Writes text frames to the socket.
pub trait FrameSink: Send + Sync {
    fn send_text(&self, text: String) -> Result<()>;
}

/// Hand frames to a writer task.
impl FrameSink for mpsc::UnboundedSender<String> {
    fn send_text(&self, text: String) -> Result<()> {
        self.send(text)
            .map_err(|_| Error::Disconnected("socket writer closed".into()))
    }
}

type PendingTable = HashMap<u32, oneshot::Sender<Result<Response>>>;

/// A cid-correlating command channel.
pub struct CommandChannel {
    sink: Box<dyn FrameSink>,
    config: ChannelConfig,
    next_cid: AtomicU32,
    closed: AtomicBool,
    pending: Mutex<PendingTable>,
    notifications: broadcast::Sender<Response>,
    telemetry: broadcast::Sender<TelemetryFrame>,
}

impl CommandChannel {
    pub fn new(sink: impl FrameSink + 'static, config: ChannelConfig) -> Self {
        let (notifications, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (telemetry, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            sink: Box::new(sink),
            config,
            next_cid: AtomicU32::new(1),
            closed: AtomicBool::new(false),
            pending: Mutex::new(HashMap::new()),
            notifications,
            telemetry,
        }
    }

    fn pending(&self) -> MutexGuard<'_, PendingTable> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn allocate_cid(&self) -> u32 {
        loop {
            let cid = self.next_cid.fetch_add(1, Ordering::Relaxed);
            if cid != 0 {
                return cid;
            }
        }
    }

    /// Send `command` and wait for the correlated reply's `data`.
    pub async fn request(&self, command: Command) -> Result<Value> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Disconnected("channel closed".into()));
        }

        let cid = self.allocate_cid();
        let name = command.name();
        let text = Request::new(cid, &command).to_text()?;

        let (tx, rx) = oneshot::channel();
        self.pending().insert(cid, tx);

        trace!(cid, command = name, frame = %text, "WS TX");
        if let Err(e) = self.sink.send_text(text) {
            self.pending().remove(&cid);
            return Err(e);
        }

        let response = match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => return Err(Error::Disconnected("channel dropped".into())),
            Err(_) => {
                self.pending().remove(&cid);
                warn!(cid, command = name, "request timed out");
                return Err(Error::Timeout(format!(
                    "{name} (cid {cid}) after {:?}",
                    self.config.request_timeout
                )));
            }
        };

        if response.is_success() {
            Ok(response.data.unwrap_or_else(|| Value::Object(Default::default())))
        } else {
            let message = response
                .error_message()
                .unwrap_or("device reported an error")
                .to_string();
            debug!(cid, command = name, err_no = response.err_no, %message, "device error");
            Err(Error::Device {
                command: name.to_string(),
                err_no: response.err_no,
                message,
            })
        }
    }

    /// Route an inbound text frame.
    pub fn handle_text(&self, text: &str) {
        let response = match Response::parse(text) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, len = text.len(), "unparseable text frame");
                return;
            }
        };
        trace!(cid = ?response.cid, command = %response.command, err_no = response.err_no, "WS RX");

        let waiter = response.cid.and_then(|cid| self.pending().remove(&cid));
        match waiter {
            Some(tx) => {
                let _ = tx.send(Ok(response));
            }
            None => {
                debug!(command = %response.command, "unsolicited message");
                let _ = self.notifications.send(response);
            }
        }
    }

    /// Route an inbound binary frame.
    pub fn handle_binary(&self, bytes: &[u8]) {
        trace!(len = bytes.len(), head = format_args!("{:02X?}", &bytes[..bytes.len().min(4)]), "WS RX binary");
        if let Some(frame) = decode_frame(bytes) {
            let _ = self.telemetry.send(frame);
        }
    }

    /// Fail every pending request and refuse new ones.
    pub fn close(&self, reason: &str) {
        self.closed.store(true, Ordering::Release);
        let drained: Vec<_> = self.pending().drain().collect();
        if !drained.is_empty() {
            warn!(count = drained.len(), reason, "draining pending requests");
        }
        for (_, tx) in drained {
            let _ = tx.send(Err(Error::Disconnected(reason.to_string())));
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }

    /// Messages that did not answer a pending request.
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Response> {
        self.notifications.subscribe()
    }

    /// Decoded telemetry push frames.
    pub fn subscribe_telemetry(&self) -> broadcast::Receiver<TelemetryFrame> {
        self.telemetry.subscribe()
    }

    /// Ping the device periodically until the channel closes, is dropped, or
    /// its socket writer goes away.
    pub fn spawn_heartbeat(self: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.config.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(channel) = weak.upgrade() else { break };
                if channel.is_closed() {
                    break;
                }
                match check_device_status(&*channel).await {
                    DeviceStatus::Connected => trace!("heartbeat ok"),
                    DeviceStatus::Error => warn!("heartbeat ping failed"),
                    DeviceStatus::Disconnected => {
                        warn!("heartbeat lost the socket");
                        break;
                    }
                }
            }
            trace!("heartbeat stopped");
        })
    }
}

impl CommandTransport for CommandChannel {
    fn send(&self, command: Command) -> BoxFuture<'_, Result<Value>> {
        self.request(command).boxed()
    }
}
