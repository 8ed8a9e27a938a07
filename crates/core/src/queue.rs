//! Outbound command queue.
//!
//! Rate-limits, coalesces and single-flights control commands:
//! - one live entry per command name; a newer enqueue supersedes the older
//!   one, whose ticket resolves as [`QueueReply::Paused`];
//! - entries wait `send_delay` unless queued as immediate;
//! - a background poller sends at most one command at a time.
//!
//! Interactive settings (sliders, color pickers) generate bursts of updates
//! for the same command; only the last one reaches the device.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

use crate::command::Command;
use crate::error::{Error, Result};
use crate::transport::CommandTransport;

/// Delay before a non-immediate command becomes sendable.
pub const SEND_DELAY: Duration = Duration::from_millis(1000);
/// Poller tick.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Queue timing.
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    pub send_delay: Duration,
    pub poll_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            send_delay: SEND_DELAY,
            poll_interval: POLL_INTERVAL,
        }
    }
}

/// How a queued command settled.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueReply {
    /// The device answered; carries the reply's `data`.
    Completed(Value),
    /// A later enqueue of the same command replaced this one before it was sent.
    Paused,
}

impl QueueReply {
    pub fn is_paused(&self) -> bool {
        matches!(self, Self::Paused)
    }

    /// Reply data, `None` when superseded.
    pub fn into_data(self) -> Option<Value> {
        match self {
            Self::Completed(v) => Some(v),
            Self::Paused => None,
        }
    }
}

/// Resolves once the queued command settles.
#[derive(Debug)]
#[must_use = "a ticket does nothing unless awaited"]
pub struct Ticket {
    rx: oneshot::Receiver<Result<QueueReply>>,
}

impl Future for Ticket {
    type Output = Result<QueueReply>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(reply)) => Poll::Ready(reply),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::QueueClosed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Snapshot for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub queue_size: usize,
    pub busy: bool,
    pub flushing: bool,
    pub polling: bool,
    /// Names of the queued commands in enqueue order.
    pub queued_commands: Vec<&'static str>,
}

struct Entry {
    command: Command,
    can_send_at: Instant,
    seq: u64,
    reply: oneshot::Sender<Result<QueueReply>>,
    /// Flushes waiting on this entry.
    flushes: Vec<u64>,
}

struct PendingFlush {
    remaining: usize,
    done: Option<oneshot::Sender<()>>,
}

#[derive(Default)]
struct State {
    transport: Option<Arc<dyn CommandTransport>>,
    entries: HashMap<&'static str, Entry>,
    busy: bool,
    polling: bool,
    next_seq: u64,
    next_flush: u64,
    flushes: HashMap<u64, PendingFlush>,
}

impl State {
    /// Count one settled entry against each flush it belongs to.
    fn settle_flushes(&mut self, ids: &[u64]) {
        for id in ids {
            let finished = match self.flushes.get_mut(id) {
                Some(flush) => {
                    flush.remaining = flush.remaining.saturating_sub(1);
                    flush.remaining == 0
                }
                None => false,
            };
            if finished {
                if let Some(mut flush) = self.flushes.remove(id) {
                    if let Some(done) = flush.done.take() {
                        let _ = done.send(());
                    }
                    debug!(flush = id, "flush complete");
                }
            }
        }
    }
}

struct Inner {
    config: QueueConfig,
    state: Mutex<State>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means a holder panicked; the state is still consistent.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

enum Tick {
    Stop,
    Wait,
    Send(Entry, Arc<dyn CommandTransport>),
}

/// Coalescing, delayed, single-flight command queue.
///
/// Cheap to clone; clones share the same queue.
#[derive(Clone)]
pub struct CommandQueue {
    inner: Arc<Inner>,
}

impl CommandQueue {
    /// Queue without a transport; `enqueue` fails until one is installed.
    pub fn new(config: QueueConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn with_transport(transport: Arc<dyn CommandTransport>, config: QueueConfig) -> Self {
        let queue = Self::new(config);
        queue.set_transport(transport);
        queue
    }

    /// Install or replace the transport. Entries already queued use the new one.
    pub fn set_transport(&self, transport: Arc<dyn CommandTransport>) {
        self.inner.lock().transport = Some(transport);
    }

    /// Queue `command`, superseding any queued command of the same name.
    ///
    /// Fails synchronously when no transport is configured or when called
    /// outside a Tokio runtime.
    pub fn enqueue(&self, command: Command, immediate: bool) -> Result<Ticket> {
        let mut state = self.inner.lock();
        if state.transport.is_none() {
            return Err(Error::TransportNotConfigured);
        }
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::NoRuntime(e.to_string()))?;

        let name = command.name();
        let now = Instant::now();
        let can_send_at = if immediate {
            now
        } else {
            now + self.inner.config.send_delay
        };

        let mut flushes = Vec::new();
        if let Some(old) = state.entries.remove(name) {
            debug!(command = name, seq = old.seq, "superseding queued command");
            flushes = old.flushes;
            let _ = old.reply.send(Ok(QueueReply::Paused));
        }

        let seq = state.next_seq;
        state.next_seq += 1;

        let (tx, rx) = oneshot::channel();
        state.entries.insert(
            name,
            Entry {
                command,
                can_send_at,
                seq,
                reply: tx,
                flushes,
            },
        );
        debug!(command = name, seq, immediate, "command queued");

        if !state.polling {
            state.polling = true;
            handle.spawn(run_poller(self.inner.clone()));
        }

        Ok(Ticket { rx })
    }

    /// Send every currently queued command now and wait until each has
    /// settled. Commands queued after this call are not waited for.
    pub fn flush(&self) -> impl Future<Output = ()> + Send + 'static {
        let rx = {
            let mut state = self.inner.lock();
            if state.entries.is_empty() {
                None
            } else {
                let id = state.next_flush;
                state.next_flush += 1;
                let remaining = state.entries.len();
                for entry in state.entries.values_mut() {
                    entry.flushes.push(id);
                }
                let (tx, rx) = oneshot::channel();
                state.flushes.insert(
                    id,
                    PendingFlush {
                        remaining,
                        done: Some(tx),
                    },
                );
                debug!(flush = id, remaining, "flush started");
                Some(rx)
            }
        };

        async move {
            if let Some(rx) = rx {
                let _ = rx.await;
            }
        }
    }

    /// Reject every queued command with [`Error::QueueCleared`].
    ///
    /// Returns how many were dropped. The in-flight command, if any, still
    /// settles normally.
    pub fn clear(&self) -> usize {
        let mut state = self.inner.lock();
        let drained: Vec<Entry> = state.entries.drain().map(|(_, e)| e).collect();
        for entry in &drained {
            state.settle_flushes(&entry.flushes);
        }
        drop(state);

        let count = drained.len();
        for entry in drained {
            let _ = entry.reply.send(Err(Error::QueueCleared));
        }
        if count > 0 {
            debug!(count, "queue cleared");
        }
        count
    }

    pub fn status(&self) -> QueueStatus {
        let state = self.inner.lock();
        let mut queued: Vec<(u64, &'static str)> =
            state.entries.iter().map(|(name, e)| (e.seq, *name)).collect();
        queued.sort_unstable();
        QueueStatus {
            queue_size: state.entries.len(),
            busy: state.busy,
            flushing: !state.flushes.is_empty(),
            polling: state.polling,
            queued_commands: queued.into_iter().map(|(_, name)| name).collect(),
        }
    }
}

/// Sends through the queue as an immediate command.
///
/// A send that gets superseded before going out resolves with `Value::Null`.
impl CommandTransport for CommandQueue {
    fn send(&self, command: Command) -> BoxFuture<'_, Result<Value>> {
        let ticket = self.enqueue(command, true);
        async move {
            match ticket?.await? {
                QueueReply::Completed(data) => Ok(data),
                QueueReply::Paused => Ok(Value::Null),
            }
        }
        .boxed()
    }
}

impl Inner {
    fn next_tick(&self) -> Tick {
        let mut state = self.lock();
        if state.busy {
            return Tick::Wait;
        }
        if state.entries.is_empty() {
            state.polling = false;
            return Tick::Stop;
        }

        let now = Instant::now();
        let flushing = !state.flushes.is_empty();
        let next = state
            .entries
            .iter()
            .filter(|(_, e)| flushing || e.can_send_at <= now)
            .min_by_key(|(_, e)| (e.can_send_at, e.seq))
            .map(|(name, _)| *name);

        let Some(name) = next else {
            return Tick::Wait;
        };
        let Some(transport) = state.transport.clone() else {
            return Tick::Wait;
        };
        match state.entries.remove(name) {
            Some(entry) => {
                state.busy = true;
                Tick::Send(entry, transport)
            }
            None => Tick::Wait,
        }
    }

    fn finish(&self, flushes: &[u64]) {
        let mut state = self.lock();
        state.busy = false;
        state.settle_flushes(flushes);
    }
}

async fn run_poller(inner: Arc<Inner>) {
    let mut ticker = interval(inner.config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    trace!("queue poller started");

    loop {
        ticker.tick().await;
        match inner.next_tick() {
            Tick::Stop => {
                trace!("queue poller stopped");
                return;
            }
            Tick::Wait => {}
            Tick::Send(entry, transport) => {
                tokio::spawn(dispatch(inner.clone(), entry, transport));
            }
        }
    }
}

/// Holds the single-flight slot; releasing it also runs if the transport
/// panics, in which case the dropped reply sender fails the ticket.
struct InFlight<'a> {
    inner: &'a Inner,
    flushes: Vec<u64>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.inner.finish(&self.flushes);
    }
}

async fn dispatch(inner: Arc<Inner>, entry: Entry, transport: Arc<dyn CommandTransport>) {
    let Entry {
        command,
        seq,
        reply,
        flushes,
        ..
    } = entry;
    let name = command.name();
    debug!(command = name, seq, "sending queued command");

    let in_flight = InFlight {
        inner: &inner,
        flushes,
    };
    let result = transport.send(command).await;
    drop(in_flight);

    match &result {
        Ok(_) => trace!(command = name, seq, "queued command completed"),
        Err(e) => warn!(command = name, seq, error = %e, "queued command failed"),
    }
    let _ = reply.send(result.map(QueueReply::Completed));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use serde_json::json;

    fn queue_with(mock: &Arc<MockTransport>) -> CommandQueue {
        CommandQueue::with_transport(mock.clone(), QueueConfig::default())
    }

    fn global(mode: &str) -> Command {
        Command::UpdateGlobalConfig {
            global_config: json!({ "inputMode": mode }),
        }
    }

    #[test]
    fn enqueue_without_transport_fails_loudly() {
        let queue = CommandQueue::new(QueueConfig::default());
        let err = queue.enqueue(Command::Ping, true).unwrap_err();
        assert!(matches!(err, Error::TransportNotConfigured));
        assert_eq!(queue.status().queue_size, 0);
    }

    #[test]
    fn enqueue_outside_runtime_fails() {
        let mock = Arc::new(MockTransport::new());
        let queue = queue_with(&mock);
        assert!(matches!(
            queue.enqueue(Command::Ping, true),
            Err(Error::NoRuntime(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn same_command_is_coalesced() {
        let mock = Arc::new(MockTransport::new());
        mock.on_command("update_global_config", json!({ "ok": true }));
        let queue = queue_with(&mock);

        let first = queue.enqueue(global("XINPUT"), false).unwrap();
        let second = queue.enqueue(global("SWITCH"), false).unwrap();

        assert_eq!(first.await.unwrap(), QueueReply::Paused);
        assert_eq!(
            second.await.unwrap(),
            QueueReply::Completed(json!({ "ok": true }))
        );
        assert_eq!(mock.sent(), vec![global("SWITCH")]);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_command_waits_send_delay() {
        let mock = Arc::new(MockTransport::new());
        let queue = queue_with(&mock);
        let start = Instant::now();

        queue.enqueue(Command::GetGlobalConfig, false).unwrap().await.unwrap();
        assert!(start.elapsed() >= SEND_DELAY);

        let start = Instant::now();
        queue.enqueue(Command::Ping, true).unwrap().await.unwrap();
        assert!(start.elapsed() < SEND_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn one_send_outstanding_at_a_time() {
        let mock = Arc::new(MockTransport::with_delay(Duration::from_millis(250)));
        let queue = queue_with(&mock);

        let tickets: Vec<Ticket> = [
            Command::GetGlobalConfig,
            Command::GetHotkeysConfig,
            Command::GetProfileList,
            Command::MsGetList,
            Command::GetCalibrationStatus,
            Command::GetButtonStates,
            Command::GetFirmwareMetadata,
            Command::Ping,
        ]
        .into_iter()
        .map(|cmd| queue.enqueue(cmd, true).unwrap())
        .collect();

        for result in futures::future::join_all(tickets).await {
            assert!(matches!(result, Ok(QueueReply::Completed(_))));
        }
        assert_eq!(mock.sent().len(), 8);
        assert_eq!(mock.max_in_flight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn equal_deadlines_go_out_in_enqueue_order() {
        let mock = Arc::new(MockTransport::new());
        let queue = queue_with(&mock);

        let a = queue.enqueue(Command::Reboot, true).unwrap();
        let b = queue.enqueue(Command::GetDeviceAuth, true).unwrap();
        let c = queue.enqueue(Command::Ping, true).unwrap();
        let _ = futures::future::join3(a, b, c).await;

        assert_eq!(
            mock.sent(),
            vec![Command::Reboot, Command::GetDeviceAuth, Command::Ping]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failure_rejects_only_that_ticket() {
        let mock = Arc::new(MockTransport::new());
        mock.fail_command("reboot", "busy");
        let queue = queue_with(&mock);

        let bad = queue.enqueue(Command::Reboot, true).unwrap();
        let good = queue.enqueue(Command::Ping, true).unwrap();

        assert!(matches!(bad.await, Err(Error::Device { .. })));
        assert!(matches!(good.await, Ok(QueueReply::Completed(_))));
        assert!(!queue.status().busy);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_waits_only_for_snapshot() {
        let mock = Arc::new(MockTransport::with_delay(Duration::from_millis(10)));
        let queue = queue_with(&mock);
        let start = Instant::now();

        let _a = queue.enqueue(Command::GetGlobalConfig, false).unwrap();
        let _b = queue.enqueue(Command::GetHotkeysConfig, false).unwrap();
        let _c = queue.enqueue(Command::GetProfileList, false).unwrap();

        let flush = queue.flush();
        let late = queue.enqueue(Command::Ping, false).unwrap();

        flush.await;
        assert!(start.elapsed() < SEND_DELAY);
        assert_eq!(mock.sent().len(), 3);
        assert_eq!(mock.sent_count("ping"), 0);
        assert_eq!(queue.status().queued_commands, vec!["ping"]);

        late.await.unwrap();
        assert_eq!(mock.sent_count("ping"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_follows_superseding_entry() {
        let mock = Arc::new(MockTransport::new());
        let queue = queue_with(&mock);

        let first = queue.enqueue(global("XINPUT"), false).unwrap();
        let flush = queue.flush();
        let second = queue.enqueue(global("PS4"), false).unwrap();

        flush.await;
        assert!(first.await.unwrap().is_paused());
        assert_eq!(mock.sent(), vec![global("PS4")]);
        assert!(!second.await.unwrap().is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn flush_on_empty_queue_resolves() {
        let mock = Arc::new(MockTransport::new());
        let queue = queue_with(&mock);
        queue.flush().await;
        assert!(mock.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn clear_rejects_queued_tickets() {
        let mock = Arc::new(MockTransport::new());
        let queue = queue_with(&mock);

        let a = queue.enqueue(Command::GetGlobalConfig, false).unwrap();
        let b = queue.enqueue(Command::Ping, false).unwrap();
        let flush = queue.flush();

        assert_eq!(queue.clear(), 2);
        assert!(matches!(a.await, Err(Error::QueueCleared)));
        assert!(matches!(b.await, Err(Error::QueueCleared)));
        flush.await;
        assert_eq!(queue.status().queue_size, 0);
        assert!(mock.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn poller_stops_when_idle_and_restarts() {
        let mock = Arc::new(MockTransport::new());
        let queue = queue_with(&mock);

        queue.enqueue(Command::Ping, true).unwrap().await.unwrap();
        tokio::time::sleep(POLL_INTERVAL * 3).await;
        let status = queue.status();
        assert!(!status.polling);
        assert!(!status.busy);

        queue.enqueue(Command::Ping, true).unwrap().await.unwrap();
        assert_eq!(mock.sent_count("ping"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn status_lists_commands_in_order() {
        let mock = Arc::new(MockTransport::new());
        let queue = queue_with(&mock);

        let _a = queue.enqueue(Command::GetProfileList, false).unwrap();
        let _b = queue.enqueue(Command::MsGetList, false).unwrap();
        let status = queue.status();
        assert_eq!(status.queue_size, 2);
        assert!(status.polling);
        assert_eq!(status.queued_commands, vec!["get_profile_list", "ms_get_list"]);
    }

    /// Panics on `reboot`, answers everything else.
    struct PanicsOnReboot;

    impl CommandTransport for PanicsOnReboot {
        fn send(&self, command: Command) -> BoxFuture<'_, Result<Value>> {
            async move {
                if matches!(command, Command::Reboot) {
                    panic!("transport crashed");
                }
                Ok(json!({}))
            }
            .boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transport_panic_releases_the_queue() {
        let queue = CommandQueue::with_transport(Arc::new(PanicsOnReboot), QueueConfig::default());

        let crashed = queue.enqueue(Command::Reboot, true).unwrap();
        let flush = queue.flush();
        assert!(matches!(crashed.await, Err(Error::QueueClosed)));
        flush.await;
        assert!(!queue.status().busy);

        let next = queue.enqueue(Command::Ping, true).unwrap();
        assert_eq!(next.await.unwrap(), QueueReply::Completed(json!({})));
    }
}
