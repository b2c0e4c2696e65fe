//! Test doubles for the platform services
//!
//! Enabled for this crate's tests and, through the `test-util` feature, for
//! the tests of downstream crates.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::TransportError;
use crate::event_bus::EventBus;
use crate::platform::{
    DeviceIdentity, MemoryParameterStore, Platform, PlugType, PowerStatus, SimulatedDevice,
    TransferOptions, Transport,
};
use crate::wake_lock::WakeLock;

/// Scripted answer for an exchange URL prefix
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    /// Respond with this body
    Body(Vec<u8>),
    /// Fail with HTTP 503
    Fail,
}

/// One recorded exchange request
#[derive(Debug, Clone)]
pub struct RecordedExchange {
    /// Request URL
    pub url: String,
    /// Uncompressed request body
    pub body: Option<Vec<u8>>,
}

/// In-memory [`Transport`] answering from a script and recording requests
pub struct ScriptedTransport {
    responses: Mutex<Vec<(String, ScriptedResponse)>>,
    upload_failures: Mutex<HashMap<String, u16>>,
    upload_status: AtomicU16,
    upload_delay: Mutex<Duration>,
    exchanges: Mutex<Vec<RecordedExchange>>,
    uploads: Mutex<Vec<String>>,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            upload_failures: Mutex::new(HashMap::new()),
            upload_status: AtomicU16::new(200),
            upload_delay: Mutex::new(Duration::ZERO),
            exchanges: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedTransport {
    /// Transport with no scripted exchanges and uploads answering 200
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer exchanges whose URL starts with `prefix` with `body`
    pub fn serve(&self, prefix: &str, body: impl Into<Vec<u8>>) {
        self.script(prefix, ScriptedResponse::Body(body.into()));
    }

    /// Fail exchanges whose URL starts with `prefix`
    pub fn fail(&self, prefix: &str) {
        self.script(prefix, ScriptedResponse::Fail);
    }

    fn script(&self, prefix: &str, response: ScriptedResponse) {
        let mut responses = self.responses.lock().unwrap();
        responses.retain(|(p, _)| p != prefix);
        responses.push((prefix.to_string(), response));
    }

    /// Status returned for uploads without a specific failure
    pub fn set_upload_status(&self, status: u16) {
        self.upload_status.store(status, Ordering::SeqCst);
    }

    /// Answer uploads whose URL ends with `suffix` with `status`
    pub fn fail_upload(&self, suffix: &str, status: u16) {
        self.upload_failures
            .lock()
            .unwrap()
            .insert(suffix.to_string(), status);
    }

    /// Delay every upload by `delay`
    pub fn set_upload_delay(&self, delay: Duration) {
        *self.upload_delay.lock().unwrap() = delay;
    }

    /// Exchanges seen so far
    pub fn exchanges(&self) -> Vec<RecordedExchange> {
        self.exchanges.lock().unwrap().clone()
    }

    /// URLs of the exchanges seen so far
    pub fn exchange_urls(&self) -> Vec<String> {
        self.exchanges().into_iter().map(|e| e.url).collect()
    }

    /// URLs of the uploads seen so far
    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn exchange(
        &self,
        url: &str,
        body: Option<Vec<u8>>,
        _options: TransferOptions,
    ) -> Result<Vec<u8>, TransportError> {
        self.exchanges.lock().unwrap().push(RecordedExchange {
            url: url.to_string(),
            body,
        });

        let response = self
            .responses
            .lock()
            .unwrap()
            .iter()
            .find(|(prefix, _)| url.starts_with(prefix.as_str()))
            .map(|(_, response)| response.clone());

        match response {
            Some(ScriptedResponse::Body(body)) => Ok(body),
            Some(ScriptedResponse::Fail) => Err(TransportError::Status {
                url: url.to_string(),
                status: 503,
            }),
            None => Err(TransportError::Status {
                url: url.to_string(),
                status: 404,
            }),
        }
    }

    async fn upload_file(
        &self,
        url: &str,
        path: &Path,
        _options: TransferOptions,
    ) -> Result<u16, TransportError> {
        let delay = *self.upload_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        tokio::fs::metadata(path).await?;
        self.uploads.lock().unwrap().push(url.to_string());

        let failure = self
            .upload_failures
            .lock()
            .unwrap()
            .iter()
            .find(|(suffix, _)| url.ends_with(suffix.as_str()))
            .map(|(_, status)| *status);
        Ok(failure.unwrap_or_else(|| self.upload_status.load(Ordering::SeqCst)))
    }
}

/// Platform wired to test doubles, with handles to each double
pub struct TestPlatform {
    /// Platform handed to tasks
    pub platform: Platform,
    /// Device whose state tests can flip
    pub device: Arc<SimulatedDevice>,
    /// Backing parameter store
    pub store: Arc<MemoryParameterStore>,
    /// Scripted transport
    pub transport: Arc<ScriptedTransport>,
}

impl TestPlatform {
    /// Connected device charging on AC, version `1.0`, device id `device-1`
    pub fn new() -> Self {
        let bus = EventBus::new(64);
        let device = Arc::new(SimulatedDevice::new(
            bus.clone(),
            true,
            PowerStatus::charging(PlugType::Ac),
        ));
        let store = Arc::new(MemoryParameterStore::new());
        let transport = Arc::new(ScriptedTransport::new());

        let platform = Platform {
            bus,
            store: store.clone(),
            wake_lock: WakeLock::default(),
            device: device.clone(),
            identity: DeviceIdentity::new("1.0", "1", "device-1"),
            transport: transport.clone(),
        };

        Self {
            platform,
            device,
            store,
            transport,
        }
    }
}

impl Default for TestPlatform {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll `condition` every 10ms for up to two seconds
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
