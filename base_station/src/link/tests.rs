// Engine tests against an in-memory socket. Time is paused, so timeouts and
// backoffs elapse instantly but in order.
use std::collections::HashSet;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use link_protocol::{
    ConfigStore, Reading, UplinkFields, downlink_sequence, downlink_thresholds, encode_uplink,
};
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::{mpsc, watch};
use tokio::time::{Duration, Instant};

use super::*;
use crate::logging::ReadingSink;
use crate::net::{Binder, LinkSocket};

const NODE: &str = "127.0.0.1:4210";

#[derive(Debug, Clone)]
struct SentFrame {
    from_port: u16,
    to: SocketAddr,
    bytes: Vec<u8>,
    at: Instant,
}

#[derive(Clone)]
struct FakeNet {
    bind_attempts: Arc<Mutex<Vec<u16>>>,
    binds: Arc<Mutex<Vec<u16>>>,
    closes: Arc<Mutex<Vec<u16>>>,
    refuse: Arc<Mutex<HashSet<u16>>>,
    sent: Arc<Mutex<Vec<SentFrame>>>,
    failed_sends: Arc<Mutex<usize>>,
    fail_send: Arc<Mutex<bool>>,
    fail_recv: Arc<Mutex<bool>>,
    inbox: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

impl FakeNet {
    fn new() -> (Self, mpsc::UnboundedSender<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let net = Self {
            bind_attempts: Arc::default(),
            binds: Arc::default(),
            closes: Arc::default(),
            refuse: Arc::default(),
            sent: Arc::default(),
            failed_sends: Arc::default(),
            fail_send: Arc::default(),
            fail_recv: Arc::default(),
            inbox: Arc::new(tokio::sync::Mutex::new(rx)),
        };
        (net, tx)
    }

    fn sent(&self) -> Vec<SentFrame> {
        self.sent.lock().clone()
    }
}

struct FakeSocket {
    port: u16,
    net: FakeNet,
}

impl Drop for FakeSocket {
    fn drop(&mut self) {
        self.net.closes.lock().push(self.port);
    }
}

#[async_trait]
impl LinkSocket for FakeSocket {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        if *self.net.fail_send.lock() {
            *self.net.failed_sends.lock() += 1;
            return Err(io::Error::new(io::ErrorKind::NetworkUnreachable, "no route"));
        }
        self.net.sent.lock().push(SentFrame {
            from_port: self.port,
            to: target,
            bytes: buf.to_vec(),
            at: Instant::now(),
        });
        Ok(buf.len())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        if *self.net.fail_recv.lock() {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "port unreachable"));
        }
        let mut inbox = self.net.inbox.lock().await;
        match inbox.recv().await {
            Some(datagram) => {
                let n = datagram.len().min(buf.len());
                buf[..n].copy_from_slice(&datagram[..n]);
                Ok((n, NODE.parse().unwrap()))
            }
            None => std::future::pending().await,
        }
    }
}

#[async_trait]
impl Binder for FakeNet {
    type Socket = FakeSocket;

    async fn bind(&self, port: u16) -> io::Result<FakeSocket> {
        self.bind_attempts.lock().push(port);
        if self.refuse.lock().contains(&port) {
            return Err(io::Error::new(io::ErrorKind::AddrInUse, "port taken"));
        }
        self.binds.lock().push(port);
        Ok(FakeSocket { port, net: self.clone() })
    }
}

#[derive(Clone, Default)]
struct MemorySink {
    readings: Arc<Mutex<Vec<Reading>>>,
}

#[async_trait]
impl ReadingSink for MemorySink {
    async fn record(&self, reading: &Reading) {
        self.readings.lock().push(reading.clone());
    }
}

struct Doc {
    target_port: u16,
    local_port: u16,
    enabled: bool,
    interval: f64,
}

impl Default for Doc {
    fn default() -> Self {
        Self { target_port: 4210, local_port: 9000, enabled: true, interval: 0.5 }
    }
}

impl Doc {
    fn render(&self) -> String {
        format!(
            "[link]\ntarget_address = \"127.0.0.1\"\ntarget_port = {}\nlocal_port = {}\n\n\
             [engine]\nenabled = {}\npoll_interval_seconds = {:?}\n\n\
             [device]\nattention_threshold = 600\ncritical_threshold = 200\n",
            self.target_port, self.local_port, self.enabled, self.interval
        )
    }
}

struct Rig {
    _dir: TempDir,
    path: std::path::PathBuf,
    net: FakeNet,
    uplink: mpsc::UnboundedSender<Vec<u8>>,
    sink: MemorySink,
    stop: watch::Sender<bool>,
    engine: LinkEngine<FakeNet, MemorySink>,
}

impl Rig {
    async fn new(doc: Doc) -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, doc.render()).unwrap();

        let (net, uplink) = FakeNet::new();
        let sink = MemorySink::default();
        let (stop, stop_rx) = watch::channel(false);
        let engine = LinkEngine::start(
            ConfigStore::new(&path),
            net.clone(),
            sink.clone(),
            LinkTiming::default(),
            stop_rx,
        )
        .await
        .expect("engine start");

        Rig { _dir: dir, path, net, uplink, sink, stop, engine }
    }

    fn rewrite(&self, doc: Doc) {
        std::fs::write(&self.path, doc.render()).unwrap();
    }
}

fn sent_seqs(frames: &[SentFrame]) -> Vec<u8> {
    frames.iter().map(|f| downlink_sequence(&f.bytes).unwrap()).collect()
}

#[tokio::test(start_paused = true)]
async fn first_tick_sends_and_times_out_quietly() {
    let mut rig = Rig::new(Doc::default()).await;
    assert_eq!(rig.engine.state(), LinkState::Active);

    let outcome = rig.engine.tick().await;
    assert_eq!(outcome, TickOutcome::Polled { sent: Some(1), received: None });

    let sent = rig.net.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, NODE.parse::<SocketAddr>().unwrap());
    assert_eq!(sent[0].from_port, 9000);
    assert_eq!(downlink_thresholds(&sent[0].bytes), Ok((600, 200)));
}

#[tokio::test(start_paused = true)]
async fn silent_node_keeps_the_poll_interval() {
    let mut rig = Rig::new(Doc { interval: 2.0, ..Doc::default() }).await;

    // each silent tick costs one receive timeout plus the yield slice
    let mut outcomes = Vec::new();
    for _ in 0..4 {
        outcomes.push(rig.engine.tick().await);
    }
    let sent: Vec<_> = outcomes
        .iter()
        .map(|o| match o {
            TickOutcome::Polled { sent, received: None } => *sent,
            other => panic!("unexpected outcome {other:?}"),
        })
        .collect();
    assert_eq!(sent, vec![Some(1), None, Some(2), None]);

    let frames = rig.net.sent();
    assert_eq!(sent_seqs(&frames), vec![1, 2]);
    let gap = frames[1].at.duration_since(frames[0].at);
    assert!(gap >= Duration::from_secs(2), "resent after {gap:?}");
    assert!(gap < Duration::from_secs(3), "resent after {gap:?}");
}

#[tokio::test(start_paused = true)]
async fn valid_uplink_becomes_a_reading() {
    let mut rig = Rig::new(Doc::default()).await;
    let frame = encode_uplink(&UplinkFields {
        signal_raw: 200,
        luminosity: 734,
        led_green: true,
        led_yellow: false,
        led_red: false,
        buzzer: false,
    });
    rig.uplink.send(frame.to_vec()).unwrap();

    let reading = match rig.engine.tick().await {
        TickOutcome::Polled { sent: Some(1), received: Some(reading) } => reading,
        other => panic!("unexpected outcome {other:?}"),
    };
    assert_eq!(reading.luminosity, 734);
    assert_eq!(reading.rssi_downlink_dbm, -102.0);
    assert!(reading.led_green);

    let recorded = rig.sink.readings.lock().clone();
    assert_eq!(recorded, vec![reading]);
}

#[tokio::test(start_paused = true)]
async fn wrong_length_datagrams_are_dropped() {
    let mut rig = Rig::new(Doc::default()).await;
    rig.uplink.send(vec![0xFF; 51]).unwrap();
    assert_eq!(
        rig.engine.tick().await,
        TickOutcome::Polled { sent: Some(1), received: None }
    );
    // the short datagram ended the tick early; let the poll interval run out
    tokio::time::sleep(Duration::from_millis(500)).await;
    rig.uplink.send(vec![0x01; 53]).unwrap();
    assert_eq!(
        rig.engine.tick().await,
        TickOutcome::Polled { sent: Some(2), received: None }
    );
    assert!(rig.sink.readings.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_send_is_retried_next_tick() {
    let mut rig = Rig::new(Doc { interval: 10.0, ..Doc::default() }).await;
    *rig.net.fail_send.lock() = true;

    for _ in 0..3 {
        assert_eq!(
            rig.engine.tick().await,
            TickOutcome::Polled { sent: None, received: None }
        );
    }
    assert_eq!(*rig.net.failed_sends.lock(), 3);
    assert_eq!(rig.engine.state(), LinkState::Active);

    *rig.net.fail_send.lock() = false;
    assert_eq!(
        rig.engine.tick().await,
        TickOutcome::Polled { sent: Some(1), received: None }
    );
    assert_eq!(sent_seqs(&rig.net.sent()), vec![1]);
    // interval counts from the successful send
    assert_eq!(
        rig.engine.tick().await,
        TickOutcome::Polled { sent: None, received: None }
    );
}

#[tokio::test(start_paused = true)]
async fn receive_error_is_a_dropped_packet() {
    let mut rig = Rig::new(Doc::default()).await;
    *rig.net.fail_recv.lock() = true;

    assert_eq!(
        rig.engine.tick().await,
        TickOutcome::Polled { sent: Some(1), received: None }
    );
    assert_eq!(rig.engine.state(), LinkState::Active);
    assert!(rig.sink.readings.lock().is_empty());

    *rig.net.fail_recv.lock() = false;
    let frame = encode_uplink(&UplinkFields { luminosity: 90, ..UplinkFields::default() });
    rig.uplink.send(frame.to_vec()).unwrap();
    match rig.engine.tick().await {
        TickOutcome::Polled { received: Some(reading), .. } => assert_eq!(reading.luminosity, 90),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(rig.sink.readings.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn local_port_change_rebinds_once() {
    let mut rig = Rig::new(Doc::default()).await;

    assert!(matches!(rig.engine.tick().await, TickOutcome::Polled { .. }));
    rig.rewrite(Doc { local_port: 9001, ..Doc::default() });
    assert!(matches!(rig.engine.tick().await, TickOutcome::Polled { .. }));
    assert!(matches!(rig.engine.tick().await, TickOutcome::Polled { .. }));

    assert_eq!(*rig.net.binds.lock(), vec![9000, 9001]);
    assert_eq!(*rig.net.closes.lock(), vec![9000]);
    assert_eq!(rig.engine.bound_port(), Some(9001));
    assert_eq!(rig.engine.state(), LinkState::Active);

    let ports: Vec<u16> = rig.net.sent().iter().map(|f| f.from_port).collect();
    assert_eq!(ports, vec![9000, 9001, 9001]);
    assert_eq!(sent_seqs(&rig.net.sent()), vec![1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn target_change_leaves_socket_alone() {
    let mut rig = Rig::new(Doc::default()).await;
    rig.engine.tick().await;
    rig.rewrite(Doc { target_port: 4211, ..Doc::default() });
    rig.engine.tick().await;

    assert_eq!(*rig.net.binds.lock(), vec![9000]);
    assert!(rig.net.closes.lock().is_empty());
    assert_eq!(rig.engine.target(), "127.0.0.1:4211".parse::<SocketAddr>().unwrap());
    let last = rig.net.sent().pop().unwrap();
    assert_eq!(last.to.port(), 4211);
}

#[tokio::test(start_paused = true)]
async fn failed_rebind_is_retried_each_tick() {
    let mut rig = Rig::new(Doc::default()).await;
    rig.net.refuse.lock().insert(9001);
    rig.rewrite(Doc { local_port: 9001, ..Doc::default() });

    assert_eq!(rig.engine.tick().await, TickOutcome::RebindPending { port: 9001 });
    assert_eq!(rig.engine.state(), LinkState::Reconfiguring);
    assert_eq!(rig.engine.bound_port(), None);
    assert_eq!(rig.engine.tick().await, TickOutcome::RebindPending { port: 9001 });
    assert!(rig.net.sent().is_empty());

    rig.net.refuse.lock().clear();
    assert_eq!(
        rig.engine.tick().await,
        TickOutcome::Polled { sent: Some(1), received: None }
    );
    assert_eq!(*rig.net.bind_attempts.lock(), vec![9000, 9001, 9001, 9001]);
    assert_eq!(*rig.net.binds.lock(), vec![9000, 9001]);
    assert_eq!(*rig.net.closes.lock(), vec![9000]);
}

#[tokio::test(start_paused = true)]
async fn disabled_link_sends_nothing_and_backs_off() {
    let mut rig = Rig::new(Doc { enabled: false, ..Doc::default() }).await;
    assert_eq!(rig.engine.state(), LinkState::Idle);

    let t0 = Instant::now();
    for _ in 0..3 {
        assert_eq!(rig.engine.tick().await, TickOutcome::Disabled);
    }
    assert!(t0.elapsed() >= Duration::from_secs(15));
    assert!(rig.net.sent().is_empty());
    // socket stays open while idle
    assert_eq!(rig.engine.bound_port(), Some(9000));

    rig.rewrite(Doc::default());
    assert_eq!(
        rig.engine.tick().await,
        TickOutcome::Polled { sent: Some(1), received: None }
    );
    assert_eq!(rig.engine.state(), LinkState::Active);
}

#[tokio::test(start_paused = true)]
async fn unreadable_document_backs_off() {
    let mut rig = Rig::new(Doc::default()).await;
    std::fs::write(&rig.path, "[link\nbroken").unwrap();

    let t0 = Instant::now();
    assert_eq!(rig.engine.tick().await, TickOutcome::ConfigUnavailable);
    assert!(t0.elapsed() >= Duration::from_secs(5));
    assert!(rig.net.sent().is_empty());

    rig.rewrite(Doc::default());
    assert!(matches!(rig.engine.tick().await, TickOutcome::Polled { sent: Some(1), .. }));
}

#[tokio::test(start_paused = true)]
async fn stop_closes_socket_within_a_tick() {
    let mut rig = Rig::new(Doc { enabled: false, ..Doc::default() }).await;
    let stop = rig.stop;
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        let _ = stop.send(true);
    });

    let t0 = Instant::now();
    // stop arrives in the middle of the 5 s backoff
    assert_eq!(rig.engine.tick().await, TickOutcome::Closed);
    assert!(t0.elapsed() < Duration::from_secs(1));
    assert_eq!(rig.engine.state(), LinkState::Closed);
    assert_eq!(*rig.net.closes.lock(), vec![9000]);
    assert_eq!(rig.engine.tick().await, TickOutcome::Closed);
}

#[tokio::test(start_paused = true)]
async fn run_returns_after_stop() {
    let rig = Rig::new(Doc::default()).await;
    let closes = rig.net.closes.clone();
    let stop = rig.stop;
    let handle = tokio::spawn(rig.engine.run());

    tokio::time::sleep(Duration::from_secs(3)).await;
    stop.send(true).unwrap();
    handle.await.unwrap();
    assert_eq!(*closes.lock(), vec![9000]);
}

#[tokio::test]
async fn startup_bind_failure_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.toml");
    std::fs::write(&path, Doc::default().render()).unwrap();
    let (net, _uplink) = FakeNet::new();
    net.refuse.lock().insert(9000);
    let (_stop, stop_rx) = watch::channel(false);

    let err = LinkEngine::start(ConfigStore::new(&path), net, MemorySink::default(), LinkTiming::default(), stop_rx)
        .await
        .err()
        .expect("bind must fail");
    assert!(matches!(err, LinkError::Bind { port: 9000, .. }));
}

#[tokio::test]
async fn startup_without_document_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let (net, _uplink) = FakeNet::new();
    let (_stop, stop_rx) = watch::channel(false);

    let err = LinkEngine::start(
        ConfigStore::new(dir.path().join("missing.toml")),
        net.clone(),
        MemorySink::default(),
        LinkTiming::default(),
        stop_rx,
    )
    .await
    .err()
    .expect("start must fail");
    assert!(matches!(err, LinkError::ConfigUnavailable(_)));
    assert!(net.bind_attempts.lock().is_empty());
}
