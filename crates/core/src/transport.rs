//! Command transport abstraction.
//!
//! The queue and the auth cache talk to the device through this trait so that
//! the live WebSocket channel, the in-process mock device and test doubles
//! share one interface.

use futures::future::BoxFuture;
use serde_json::Value;

use crate::command::Command;
use crate::error::Result;

/// Sends one command and resolves with the reply's `data` payload.
///
/// A reply with nonzero `errNo` must surface as `Err`.
pub trait CommandTransport: Send + Sync {
    fn send(&self, command: Command) -> BoxFuture<'_, Result<Value>>;
}

/// A recording transport for tests.
#[cfg(test)]
pub mod mock {
    use super::*;
    use crate::error::Error;
    use futures::FutureExt;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Mock transport that records every command and answers from a table.
    ///
    /// Unregistered commands answer `{}` after `delay`.
    pub struct MockTransport {
        sent: Mutex<Vec<Command>>,
        responses: Mutex<HashMap<&'static str, Result<Value>>>,
        delay: Mutex<Duration>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                responses: Mutex::new(HashMap::new()),
                delay: Mutex::new(Duration::ZERO),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        pub fn with_delay(delay: Duration) -> Self {
            let mock = Self::new();
            *mock.delay.lock().unwrap() = delay;
            mock
        }

        /// Register the reply data for a command name.
        pub fn on_command(&self, name: &'static str, data: Value) {
            self.responses.lock().unwrap().insert(name, Ok(data));
        }

        /// Make a command name fail with a device error.
        pub fn fail_command(&self, name: &'static str, message: &str) {
            self.responses.lock().unwrap().insert(
                name,
                Err(Error::Device {
                    command: name.to_string(),
                    err_no: -1,
                    message: message.to_string(),
                }),
            );
        }

        pub fn sent(&self) -> Vec<Command> {
            self.sent.lock().unwrap().clone()
        }

        pub fn sent_count(&self, name: &str) -> usize {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.name() == name)
                .count()
        }

        /// Highest number of sends that were outstanding at the same time.
        pub fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }
    }

    impl CommandTransport for MockTransport {
        fn send(&self, command: Command) -> BoxFuture<'_, Result<Value>> {
            async move {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_in_flight.fetch_max(now, Ordering::SeqCst);

                let name = command.name();
                self.sent.lock().unwrap().push(command);

                let delay = *self.delay.lock().unwrap();
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }

                let reply = self
                    .responses
                    .lock()
                    .unwrap()
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| Ok(Value::Object(Default::default())));

                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                reply
            }
            .boxed()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockTransport;
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn mock_answers_registered_and_default() {
        let mock = MockTransport::new();
        mock.on_command("ping", json!({"message": "pong"}));

        let reply = mock.send(Command::Ping).await.unwrap();
        assert_eq!(reply["message"], "pong");

        let reply = mock.send(Command::Reboot).await.unwrap();
        assert_eq!(reply, json!({}));
        assert_eq!(mock.sent(), vec![Command::Ping, Command::Reboot]);
    }

    #[tokio::test]
    async fn mock_reports_failures() {
        let mock = MockTransport::new();
        mock.fail_command("get_device_auth", "not provisioned");
        let err = mock.send(Command::GetDeviceAuth).await.unwrap_err();
        assert!(err.to_string().contains("not provisioned"));
        assert_eq!(mock.sent_count("get_device_auth"), 1);
    }
}
