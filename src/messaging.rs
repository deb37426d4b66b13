//! In-process stand-ins for the message transport and the notifier.

use super::Result;
use crate::callbacks::Payload;
use crate::config::{ConfigOverlay, ConfigService};
use crate::context::{Services, TestContext};
use crate::rpc;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Config group holding the transport options
pub const MESSAGING_GROUP: &str = "messaging";
/// Driver name of the in-process transport
pub const FAKE_DRIVER: &str = "fake";
/// Error module of the harness's own tests, accepted while the stub is installed
pub const TEST_EXMOD: &str = "testbed::tests";

const DEFAULT_DRIVER: &str = "rabbit";
const DEFAULT_RESPONSE_TIMEOUT_SECS: u64 = 60;

#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("Timed out waiting for a reply to {method} on topic {topic}")]
    Timeout { topic: String, method: String },

    #[error("transport driver '{0}' is not available in this process")]
    UnsupportedDriver(String),

    #[error("RPC transport is not initialized")]
    NotInitialized,
}

/// Transport options resolved from configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSettings {
    pub driver: String,
    pub response_timeout: Duration,
}

impl TransportSettings {
    pub fn from_config(config: &ConfigOverlay) -> Result<Self> {
        let driver = config
            .get("transport_driver", Some(MESSAGING_GROUP))
            .unwrap_or_else(|| DEFAULT_DRIVER.to_string());
        let response_timeout = match config.get("rpc_response_timeout", None) {
            Some(_) => config.get_parsed::<u64>("rpc_response_timeout", None)?,
            None => DEFAULT_RESPONSE_TIMEOUT_SECS,
        };
        Ok(Self {
            driver,
            response_timeout: Duration::from_secs(response_timeout),
        })
    }
}

/// Client side of a request/reply topic
pub struct RpcClient {
    topic: String,
    settings: TransportSettings,
}

impl RpcClient {
    pub fn new(services: &Services, topic: impl Into<String>) -> Result<Self> {
        Ok(Self {
            topic: topic.into(),
            settings: TransportSettings::from_config(&services.config)?,
        })
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    fn ensure_local(&self) -> std::result::Result<(), MessagingError> {
        if self.settings.driver == FAKE_DRIVER {
            Ok(())
        } else {
            Err(MessagingError::UnsupportedDriver(self.settings.driver.clone()))
        }
    }

    /// Sends a request and waits for the reply.
    ///
    /// Nothing consumes requests on the in-process transport, so a call
    /// always ends at the response timeout.
    pub async fn call(&self, method: &str) -> std::result::Result<String, MessagingError> {
        self.ensure_local()?;
        debug!("rpc call {} on {}", method, self.topic);
        let reply = std::future::pending::<String>();
        tokio::time::timeout(self.settings.response_timeout, reply)
            .await
            .map_err(|_| MessagingError::Timeout {
                topic: self.topic.clone(),
                method: method.to_string(),
            })
    }

    /// Sends a one-way message
    pub fn cast(&self, method: &str) -> std::result::Result<(), MessagingError> {
        self.ensure_local()?;
        debug!("rpc cast {} on {}", method, self.topic);
        Ok(())
    }
}

/// Points the test's transport at the in-process driver with no reply wait
pub struct TransportStub;

impl TransportStub {
    /// Overrides the transport options, then brings the process-wide
    /// transport up with them. Cleanups undo both in reverse.
    pub fn install(ctx: &mut TestContext) -> Result<()> {
        let config = ctx.config().clone();
        config.set_override("transport_driver", FAKE_DRIVER, Some(MESSAGING_GROUP));
        config.set_override("rpc_response_timeout", "0", None);
        ctx.add_cleanup("restore transport settings", move || {
            config.clear_override("transport_driver", Some(MESSAGING_GROUP));
            config.clear_override("rpc_response_timeout", None);
            Ok(())
        });

        rpc::init(TransportSettings::from_config(ctx.config())?);
        ctx.add_cleanup("rpc cleanup", || {
            rpc::cleanup();
            Ok(())
        });

        rpc::add_extra_exmods(&[TEST_EXMOD]);
        ctx.add_cleanup("clear extra exmods", || {
            rpc::clear_extra_exmods();
            Ok(())
        });
        Ok(())
    }
}

/// A notification as emitted by the code under test
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub event_type: String,
    pub payload: Payload,
}

/// Outbound notification sink
pub trait Notifier: Send + Sync {
    fn notify(&self, event_type: &str, payload: &Payload);
}

/// Writes notifications to the log
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event_type: &str, payload: &Payload) {
        info!("notification {}: {:?}", event_type, payload);
    }
}

/// Records notifications for assertions
#[derive(Default)]
pub struct FakeNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl FakeNotifier {
    pub fn notifications(&self) -> Vec<Notification> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn reset(&self) {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl Notifier for FakeNotifier {
    fn notify(&self, event_type: &str, payload: &Payload) {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Notification {
                event_type: event_type.to_string(),
                payload: payload.clone(),
            });
    }
}

/// Routes the test's notifications into a fresh [`FakeNotifier`]
pub fn setup_notification_driver(ctx: &mut TestContext) -> Arc<FakeNotifier> {
    let fake = Arc::new(FakeNotifier::default());
    ctx.services_mut().notifier = fake.clone();
    ctx.config().set_override("notification_driver", FAKE_DRIVER, None);

    let recorded = fake.clone();
    ctx.add_cleanup("reset fake notifier", move || {
        recorded.reset();
        Ok(())
    });
    fake
}
