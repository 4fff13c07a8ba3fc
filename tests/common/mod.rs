//! Shared fixtures for the end-to-end proxy tests.
#![allow(dead_code)]

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use synapse::{
    core::TcpContext,
    ports::{Backend, Scheduler, SchedulerError, SchedulerResult, StatsHandler},
};
use tokio::{
    net::TcpListener,
    time::{sleep, Instant},
};

/// Scheduler returning a fixed backend and recording every counter delta.
pub struct RecordingScheduler {
    backend: Option<Backend>,
    pub take_calls: AtomicU64,
    pub connections: AtomicU64,
    pub disconnections: AtomicU64,
    pub refused: AtomicU64,
    pub rx_bytes: AtomicU64,
    pub tx_bytes: AtomicU64,
    pub stopped: AtomicBool,
    pub last_hostname: Mutex<Option<String>>,
}

impl RecordingScheduler {
    /// Always schedules `backend`
    pub fn with_backend(backend: Backend) -> Self {
        Self::new(Some(backend))
    }

    /// Always fails backend selection
    pub fn empty() -> Self {
        Self::new(None)
    }

    fn new(backend: Option<Backend>) -> Self {
        Self {
            backend,
            take_calls: AtomicU64::new(0),
            connections: AtomicU64::new(0),
            disconnections: AtomicU64::new(0),
            refused: AtomicU64::new(0),
            rx_bytes: AtomicU64::new(0),
            tx_bytes: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
            last_hostname: Mutex::new(None),
        }
    }

    pub fn take_calls(&self) -> u64 {
        self.take_calls.load(Ordering::Acquire)
    }

    pub fn connections(&self) -> u64 {
        self.connections.load(Ordering::Acquire)
    }

    pub fn disconnections(&self) -> u64 {
        self.disconnections.load(Ordering::Acquire)
    }

    pub fn refused(&self) -> u64 {
        self.refused.load(Ordering::Acquire)
    }

    pub fn rx_bytes(&self) -> u64 {
        self.rx_bytes.load(Ordering::Acquire)
    }

    pub fn tx_bytes(&self) -> u64 {
        self.tx_bytes.load(Ordering::Acquire)
    }

    pub fn hostname(&self) -> Option<String> {
        self.last_hostname.lock().unwrap().clone()
    }
}

#[async_trait]
impl Scheduler for RecordingScheduler {
    async fn start(&self) -> eyre::Result<()> {
        Ok(())
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    async fn take_backend(&self, ctx: &TcpContext) -> SchedulerResult<Backend> {
        self.take_calls.fetch_add(1, Ordering::AcqRel);
        *self.last_hostname.lock().unwrap() = ctx.hostname.clone();
        self.backend
            .clone()
            .ok_or(SchedulerError::NoBackend { hostname: None })
    }

    fn increment_connection(&self, _: &Backend) {
        self.connections.fetch_add(1, Ordering::AcqRel);
    }

    fn decrement_connection(&self, _: &Backend) {
        self.disconnections.fetch_add(1, Ordering::AcqRel);
    }

    fn increment_refused(&self, _: &Backend) {
        self.refused.fetch_add(1, Ordering::AcqRel);
    }

    fn increment_rx(&self, _: &Backend, bytes: u64) {
        self.rx_bytes.fetch_add(bytes, Ordering::AcqRel);
    }

    fn increment_tx(&self, _: &Backend, bytes: u64) {
        self.tx_bytes.fetch_add(bytes, Ordering::AcqRel);
    }
}

/// Stats handler recording every connection-count sample.
pub struct RecordingStats {
    pub samples: Mutex<Vec<usize>>,
    pub stopped: AtomicBool,
}

impl RecordingStats {
    pub fn new() -> Self {
        Self {
            samples: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn samples(&self) -> Vec<usize> {
        self.samples.lock().unwrap().clone()
    }

    pub fn last_sample(&self) -> Option<usize> {
        self.samples.lock().unwrap().last().copied()
    }
}

impl StatsHandler for RecordingStats {
    fn start(&self) {}

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    fn connections(&self, count: usize) {
        self.samples.lock().unwrap().push(count);
    }
}

/// Echo server on an ephemeral port; every accepted connection is echoed
/// until EOF.
pub async fn spawn_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind echo");
    let addr = listener.local_addr().expect("echo addr");

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });

    addr
}

/// A backend address that refuses connections (bound once, then closed).
pub async fn closed_backend_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    addr
}

/// Poll `cond` until it holds or a deadline passes.
pub async fn wait_until<F: Fn() -> bool>(what: &str, cond: F) {
    let deadline = Instant::now() + Duration::from_secs(3);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        sleep(Duration::from_millis(10)).await;
    }
}

/// A syntactically valid TLS 1.2 ClientHello record carrying `host` as SNI.
pub fn client_hello(host: &str) -> Vec<u8> {
    let name = host.as_bytes();

    let mut sni = Vec::new();
    sni.extend_from_slice(&((name.len() + 3) as u16).to_be_bytes());
    sni.push(0); // host_name
    sni.extend_from_slice(&(name.len() as u16).to_be_bytes());
    sni.extend_from_slice(name);

    let mut extensions = Vec::new();
    extensions.extend_from_slice(&0u16.to_be_bytes()); // server_name extension
    extensions.extend_from_slice(&(sni.len() as u16).to_be_bytes());
    extensions.extend_from_slice(&sni);

    let mut body = Vec::new();
    body.extend_from_slice(&[0x03, 0x03]);
    body.extend_from_slice(&[0u8; 32]);
    body.push(0);
    body.extend_from_slice(&2u16.to_be_bytes());
    body.extend_from_slice(&[0x13, 0x01]);
    body.push(1);
    body.push(0);
    body.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
    body.extend_from_slice(&extensions);

    let mut handshake = Vec::new();
    handshake.push(0x01); // ClientHello
    handshake.extend_from_slice(&[
        (body.len() >> 16) as u8,
        (body.len() >> 8) as u8,
        body.len() as u8,
    ]);
    handshake.extend_from_slice(&body);

    let mut record = Vec::new();
    record.push(0x16); // handshake record
    record.extend_from_slice(&[0x03, 0x01]);
    record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
    record.extend_from_slice(&handshake);
    record
}
