//! Test doubles for the host and engine boundaries

use crate::engine::{EngineError, GlobalConfig, StatusResponse, TunnelConfig, TunnelEngine};
use crate::platform::{HostError, InterfaceBuilder, InterfaceOwnership, PreferenceStore, TunDescriptor};
use crate::session::StatusCallback;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// Let spawned tasks run until they are all idle (paused-clock tests)
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuilderCall {
    SetMtu(u16),
    AddAddress(String, u8),
    AddRoute(String, u8),
    AddDnsServer(String),
    Establish,
    Detach,
}

/// A builder step that should fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Mtu,
    Address,
    Route(String),
    Dns,
    Establish,
    Detach,
}

#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<BuilderCall>>>);

impl CallLog {
    fn push(&self, call: BuilderCall) {
        self.0.lock().unwrap().push(call);
    }

    pub fn snapshot(&self) -> Vec<BuilderCall> {
        self.0.lock().unwrap().clone()
    }
}

pub struct FakeBuilder {
    fd: i32,
    calls: CallLog,
    failures: Vec<Step>,
}

impl FakeBuilder {
    pub fn new(fd: i32) -> (Self, CallLog) {
        let calls = CallLog::default();
        (
            Self {
                fd,
                calls: calls.clone(),
                failures: Vec::new(),
            },
            calls,
        )
    }

    pub fn fail_on(mut self, step: Step) -> Self {
        self.failures.push(step);
        self
    }

    fn check(&self, step: Step, operation: &'static str) -> Result<(), HostError> {
        if self.failures.contains(&step) {
            return Err(HostError::Rejected {
                operation,
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

impl InterfaceBuilder for FakeBuilder {
    fn set_mtu(&mut self, mtu: u16) -> Result<(), HostError> {
        self.calls.push(BuilderCall::SetMtu(mtu));
        self.check(Step::Mtu, "set MTU")
    }

    fn add_address(&mut self, addr: &str, prefix_len: u8) -> Result<(), HostError> {
        self.calls
            .push(BuilderCall::AddAddress(addr.to_string(), prefix_len));
        self.check(Step::Address, "add address")
    }

    fn add_route(&mut self, route: &str, prefix_len: u8) -> Result<(), HostError> {
        self.calls
            .push(BuilderCall::AddRoute(route.to_string(), prefix_len));
        self.check(Step::Route(route.to_string()), "add route")
    }

    fn add_dns_server(&mut self, dns: &str) -> Result<(), HostError> {
        self.calls.push(BuilderCall::AddDnsServer(dns.to_string()));
        self.check(Step::Dns, "add DNS server")
    }

    fn establish(self: Box<Self>) -> Result<Box<dyn TunDescriptor>, HostError> {
        self.calls.push(BuilderCall::Establish);
        self.check(Step::Establish, "establish")?;
        Ok(Box::new(FakeDescriptor {
            fd: self.fd,
            calls: self.calls.clone(),
            fail: self.failures.contains(&Step::Detach),
        }))
    }
}

struct FakeDescriptor {
    fd: i32,
    calls: CallLog,
    fail: bool,
}

impl TunDescriptor for FakeDescriptor {
    fn detach(self: Box<Self>) -> Result<i32, HostError> {
        self.calls.push(BuilderCall::Detach);
        if self.fail {
            return Err(HostError::Rejected {
                operation: "detach",
                message: "injected failure".to_string(),
            });
        }
        Ok(self.fd)
    }
}

pub struct FakeService {
    id: String,
    protect_ok: bool,
    protected: Mutex<Vec<i32>>,
    builder: Mutex<Option<FakeBuilder>>,
}

impl FakeService {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            protect_ok: true,
            protected: Mutex::new(Vec::new()),
            builder: Mutex::new(None),
        }
    }

    pub fn refuse_protect(mut self) -> Self {
        self.protect_ok = false;
        self
    }

    pub fn with_builder(self, builder: FakeBuilder) -> Self {
        *self.builder.lock().unwrap() = Some(builder);
        self
    }

    pub fn protected(&self) -> Vec<i32> {
        self.protected.lock().unwrap().clone()
    }
}

impl InterfaceOwnership for FakeService {
    fn id(&self) -> &str {
        &self.id
    }

    fn protect(&self, fd: i32) -> bool {
        self.protected.lock().unwrap().push(fd);
        self.protect_ok
    }

    fn new_builder(&self) -> Box<dyn InterfaceBuilder> {
        let builder = self
            .builder
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| FakeBuilder::new(0).0);
        Box::new(builder)
    }

    fn close(&self) {}
}

/// Counts up when dropped, i.e. when the start future is cancelled
struct DropCounter(Arc<AtomicUsize>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeEngine {
    global: Mutex<Option<GlobalConfig>>,
    starts: Mutex<Vec<TunnelConfig>>,
    start_cancelled: Arc<AtomicUsize>,
    stops: AtomicUsize,
    switches: Mutex<Vec<String>>,
    fail_stop: bool,
    stop_gate: Option<Arc<Notify>>,
    protect_on_start: Option<i32>,
    protect_results: Mutex<Vec<bool>>,
    status: StatusResponse,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    /// Make `stop_tunnel` wait until `gate` is notified
    pub fn block_stop(mut self, gate: Arc<Notify>) -> Self {
        self.stop_gate = Some(gate);
        self
    }

    /// Protect `fd` through the host handle when the tunnel starts
    pub fn protect_on_start(mut self, fd: i32) -> Self {
        self.protect_on_start = Some(fd);
        self
    }

    pub fn protect_results(&self) -> Vec<bool> {
        self.protect_results.lock().unwrap().clone()
    }

    pub fn with_status(mut self, status: StatusResponse) -> Self {
        self.status = status;
        self
    }

    pub fn global_config(&self) -> Option<GlobalConfig> {
        self.global.lock().unwrap().clone()
    }

    pub fn starts(&self) -> Vec<TunnelConfig> {
        self.starts.lock().unwrap().clone()
    }

    pub fn start_cancelled(&self) -> bool {
        self.cancelled_starts() > 0
    }

    pub fn cancelled_starts(&self) -> usize {
        self.start_cancelled.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn switches(&self) -> Vec<String> {
        self.switches.lock().unwrap().clone()
    }
}

#[async_trait]
impl TunnelEngine for FakeEngine {
    fn init(&self, config: GlobalConfig) {
        *self.global.lock().unwrap() = Some(config);
    }

    async fn start_tunnel(&self, config: TunnelConfig) {
        self.starts.lock().unwrap().push(config);
        if let Some(fd) = self.protect_on_start {
            let host = self.global_config().map(|g| g.host);
            if let Some(host) = host {
                let protected = host.protect_socket(fd);
                self.protect_results.lock().unwrap().push(protected);
            }
        }
        let _flag = DropCounter(self.start_cancelled.clone());
        std::future::pending::<()>().await;
    }

    async fn stop_tunnel(&self) -> Result<(), EngineError> {
        if let Some(gate) = &self.stop_gate {
            gate.notified().await;
        }
        if self.fail_stop {
            return Err(EngineError::NotRunning);
        }
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn switch_org(&self, org_id: &str) -> Result<(), EngineError> {
        if org_id == "missing" {
            return Err(EngineError::UnknownOrg(org_id.to_string()));
        }
        self.switches.lock().unwrap().push(org_id.to_string());
        Ok(())
    }

    fn status(&self) -> StatusResponse {
        self.status.clone()
    }
}

#[derive(Default)]
pub struct RecordingCallback {
    events: Mutex<Vec<String>>,
}

impl RecordingCallback {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl StatusCallback for RecordingCallback {
    fn on_registered(&self) {
        self.record("registered".to_string());
    }

    fn on_connected(&self) {
        self.record("connected".to_string());
    }

    fn on_terminated(&self) {
        self.record("terminated".to_string());
    }

    fn on_auth_error(&self, status_code: i32, message: &str) {
        self.record(format!("auth_error:{}:{}", status_code, message));
    }
}

#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl PreferenceStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, HostError> {
        Ok(self.values.lock().unwrap().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), HostError> {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
