//! Command protocol over a real loopback listener.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use sand_common::StreamHeader;
use sand_daemon::app::{AgentContext, InitWait};
use sand_daemon::application::{RouteManager, RouteSettings, Supervisor};
use sand_daemon::domain::SupervisorError;
use sand_daemon::infra::{
    IpRouteBackend, JsonRouteSnapshotStore, TestRunner, TokioCommandRunner, TopologyFile,
};
use sand_daemon::server;
use sand_daemon::server::session::MAX_LINE_LEN;

const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

// ── Doubles ──────────────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeSupervisor {
    initialized: AtomicBool,
    running: AtomicBool,
    starts: AtomicUsize,
}

impl FakeSupervisor {
    fn ready() -> Arc<Self> {
        let supervisor = Self::default();
        supervisor.initialized.store(true, Ordering::SeqCst);
        Arc::new(supervisor)
    }
}

#[async_trait]
impl Supervisor for FakeSupervisor {
    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(SupervisorError::AlreadyRunning.into());
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

// ── Harness ──────────────────────────────────────────────────────────────────

struct Daemon {
    addr: std::net::SocketAddr,
    dir: tempfile::TempDir,
    supervisor: Arc<FakeSupervisor>,
    ctx: Arc<AgentContext>,
    cancel: CancellationToken,
    server: JoinHandle<()>,
}

fn route_manager(dir: &Path) -> RouteManager {
    RouteManager::new(
        IpRouteBackend::with_sysfs(TokioCommandRunner::default(), dir.join("net")),
        JsonRouteSnapshotStore,
        TopologyFile::new(dir.join("topology.conf")),
    )
}

fn unused_route_manager(dir: &Path) -> RouteManager {
    let routes = route_manager(dir);
    routes.mark_unused();
    routes
}

async fn spawn_daemon(
    dir: tempfile::TempDir,
    supervisor: Arc<FakeSupervisor>,
    routes: RouteManager,
    init_wait: InitWait,
) -> Daemon {
    let cancel = CancellationToken::new();
    let ctx = Arc::new(AgentContext {
        supervisor: Arc::clone(&supervisor) as Arc<dyn Supervisor>,
        routes: Arc::new(routes),
        tests: TestRunner::new(dir.path().join("tests").join("result"), cancel.clone()),
        deploy_dir: dir.path().join("deploy"),
        read_timeout: Duration::from_secs(5),
        init_wait,
        cancel: cancel.clone(),
    });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(server::serve(listener, Arc::clone(&ctx)));
    Daemon {
        addr,
        dir,
        supervisor,
        ctx,
        cancel,
        server,
    }
}

async fn unused_routes_daemon() -> Daemon {
    let dir = tempfile::tempdir().unwrap();
    let routes = unused_route_manager(dir.path());
    spawn_daemon(dir, FakeSupervisor::ready(), routes, InitWait::default()).await
}

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(daemon: &Daemon) -> Self {
        let (reader, writer) = TcpStream::connect(daemon.addr).await.unwrap().into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .unwrap();
    }

    async fn send_file(&mut self, name: &str, content: &[u8]) {
        let header = StreamHeader::File {
            name: name.into(),
            length: content.len() as u64,
        };
        self.writer.write_all(header.to_line().as_bytes()).await.unwrap();
        self.writer.write_all(content).await.unwrap();
    }

    /// Next reply line, `None` once the daemon closed the connection.
    async fn recv(&mut self) -> Option<String> {
        let mut line = String::new();
        let read = tokio::time::timeout(REPLY_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("reply in time")
            .unwrap();
        (read > 0).then(|| line.trim_end().to_string())
    }
}

// ── Commands ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_command_is_rejected_and_closed() {
    let daemon = unused_routes_daemon().await;
    let mut client = Client::connect(&daemon).await;
    client.send("FOO").await;
    assert_eq!(client.recv().await.as_deref(), Some("ERROR unknown command 'FOO'"));
    assert_eq!(client.recv().await, None);
}

#[tokio::test]
async fn garbled_command_still_gets_one_error_line() {
    let daemon = unused_routes_daemon().await;
    let mut client = Client::connect(&daemon).await;
    client.writer.write_all(b"ST\xffRT\n").await.unwrap();
    assert_eq!(
        client.recv().await.as_deref(),
        Some("ERROR unknown command 'ST\u{fffd}RT'")
    );
    assert_eq!(client.recv().await, None);
}

#[tokio::test]
async fn endless_command_line_is_cut_short() {
    let daemon = unused_routes_daemon().await;
    let mut client = Client::connect(&daemon).await;
    let line = vec![b'A'; usize::try_from(MAX_LINE_LEN).unwrap()];
    client.writer.write_all(&line).await.unwrap();
    assert_eq!(client.recv().await.as_deref(), Some("ERROR bad instruction"));
    assert_eq!(client.recv().await, None);
}

#[tokio::test]
async fn start_twice_reports_already_started() {
    let daemon = unused_routes_daemon().await;

    let mut client = Client::connect(&daemon).await;
    client.send("START").await;
    assert_eq!(client.recv().await.as_deref(), Some("OK"));

    let mut client = Client::connect(&daemon).await;
    client.send("START").await;
    assert_eq!(
        client.recv().await.as_deref(),
        Some("ERROR some process are already started")
    );
    assert!(daemon.supervisor.is_running());
    assert_eq!(daemon.supervisor.starts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stop_always_answers_ok() {
    let daemon = unused_routes_daemon().await;
    for _ in 0..2 {
        let mut client = Client::connect(&daemon).await;
        client.send("STOP").await;
        assert_eq!(client.recv().await.as_deref(), Some("OK"));
    }
    assert!(!daemon.supervisor.is_running());
}

#[tokio::test]
async fn start_reports_unreadable_topology() {
    let dir = tempfile::tempdir().unwrap();
    let routes = route_manager(dir.path());
    routes
        .load(RouteSettings {
            cache_dir: dir.path().join("cache"),
            local_name: "gw0".to_string(),
            interface: None,
            is_workstation: false,
            instance: "0".to_string(),
        })
        .await;
    let daemon = spawn_daemon(dir, FakeSupervisor::ready(), routes, InitWait::default()).await;

    let mut client = Client::connect(&daemon).await;
    client.send("START").await;
    assert_eq!(
        client.recv().await.as_deref(),
        Some("ERROR cannot read topology configuration")
    );
    assert_eq!(daemon.supervisor.starts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn uninitialized_supervisor_refuses_commands() {
    let dir = tempfile::tempdir().unwrap();
    let routes = unused_route_manager(dir.path());
    let wait = InitWait {
        attempts: 2,
        delay: Duration::from_millis(10),
    };
    let daemon = spawn_daemon(dir, Arc::new(FakeSupervisor::default()), routes, wait).await;

    let mut client = Client::connect(&daemon).await;
    assert_eq!(
        client.recv().await.as_deref(),
        Some("ERROR process list is not initialized")
    );
    assert_eq!(client.recv().await, None);
}

#[tokio::test]
async fn late_initialization_is_waited_for() {
    let dir = tempfile::tempdir().unwrap();
    let routes = unused_route_manager(dir.path());
    let supervisor = Arc::new(FakeSupervisor::default());
    let wait = InitWait {
        attempts: 50,
        delay: Duration::from_millis(20),
    };
    let daemon = spawn_daemon(dir, Arc::clone(&supervisor), routes, wait).await;

    let mut client = Client::connect(&daemon).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    supervisor.initialized.store(true, Ordering::SeqCst);
    client.send("START").await;
    assert_eq!(client.recv().await.as_deref(), Some("OK"));
}

// ── TEST ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_command_reports_exit_code() {
    let daemon = unused_routes_daemon().await;
    let mut client = Client::connect(&daemon).await;
    client.send("TEST").await;
    assert_eq!(client.recv().await.as_deref(), Some("OK"));
    client.send("COMMAND /bin/true").await;
    assert_eq!(client.recv().await.as_deref(), Some("0"));
    assert_eq!(client.recv().await, None);

    let mut client = Client::connect(&daemon).await;
    client.send("TEST").await;
    assert_eq!(client.recv().await.as_deref(), Some("OK"));
    client.send("COMMAND /bin/sh -c 'exit 4'").await;
    assert_eq!(client.recv().await.as_deref(), Some("4"));

    let log = std::fs::read_to_string(daemon.dir.path().join("tests").join("result")).unwrap();
    assert_eq!(log, "\n\n");
}

#[tokio::test]
async fn test_requires_command_keyword() {
    let daemon = unused_routes_daemon().await;
    let mut client = Client::connect(&daemon).await;
    client.send("TEST").await;
    assert_eq!(client.recv().await.as_deref(), Some("OK"));
    client.send("RUN /bin/true").await;
    assert_eq!(client.recv().await.as_deref(), Some("ERROR bad instruction"));
}

#[tokio::test]
async fn shutdown_silences_a_running_test() {
    let daemon = unused_routes_daemon().await;
    let mut client = Client::connect(&daemon).await;
    client.send("TEST").await;
    assert_eq!(client.recv().await.as_deref(), Some("OK"));
    client.send("COMMAND /bin/sleep 30").await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    daemon.cancel.cancel();
    tokio::time::timeout(REPLY_TIMEOUT, daemon.server)
        .await
        .expect("listener stops")
        .unwrap();
    // the connection task is done, not detached
    assert_eq!(Arc::strong_count(&daemon.ctx), 1);
    assert_eq!(client.recv().await, None);
}

#[tokio::test]
async fn shutdown_does_not_wait_for_idle_connections() {
    let daemon = unused_routes_daemon().await;
    let mut client = Client::connect(&daemon).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    daemon.cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), daemon.server)
        .await
        .expect("listener stops before the read timeout")
        .unwrap();
    assert_eq!(Arc::strong_count(&daemon.ctx), 1);
    assert_eq!(client.recv().await, None);
}

// ── DEPLOY / CONFIGURE ───────────────────────────────────────────────────────

const TOPOLOGY: &[u8] = b"<configuration><gw_table><default_gw>0</default_gw></gw_table></configuration>";

#[tokio::test]
async fn deploy_stream_writes_every_unit() {
    let daemon = unused_routes_daemon().await;
    let mut client = Client::connect(&daemon).await;
    client.send("DEPLOY").await;
    assert_eq!(client.recv().await.as_deref(), Some("OK"));

    client.send_file("topology.conf", TOPOLOGY).await;
    assert_eq!(client.recv().await.as_deref(), Some("OK"));
    client.send("DIRECTORY plugins/gse").await;
    assert_eq!(client.recv().await.as_deref(), Some("OK"));
    client.send_file("README", b"no xml here").await;
    assert_eq!(client.recv().await.as_deref(), Some("OK"));
    client.send("COMPLETE").await;
    assert_eq!(client.recv().await.as_deref(), Some("OK"));
    assert_eq!(client.recv().await, None);

    let deploy = daemon.dir.path().join("deploy");
    assert_eq!(std::fs::read(deploy.join("topology.conf")).unwrap(), TOPOLOGY);
    assert_eq!(
        std::fs::read_to_string(deploy.join("plugins/gse/README")).unwrap(),
        "no xml here"
    );
}

#[tokio::test]
async fn configure_rejects_malformed_xml_and_keeps_earlier_units() {
    let daemon = unused_routes_daemon().await;
    let mut client = Client::connect(&daemon).await;
    client.send("CONFIGURE").await;
    assert_eq!(client.recv().await.as_deref(), Some("OK"));

    client.send_file("topology.conf", TOPOLOGY).await;
    assert_eq!(client.recv().await.as_deref(), Some("OK"));
    client.send_file("core.xml", b"<configuration>").await;
    let reply = client.recv().await.unwrap();
    assert!(
        reply.starts_with("ERROR core.xml is not a valid XML document"),
        "{reply}"
    );
    assert_eq!(client.recv().await, None);

    let deploy = daemon.dir.path().join("deploy");
    assert!(deploy.join("topology.conf").exists());
    assert!(!deploy.join("core.xml").exists());
}

#[tokio::test]
async fn stream_refuses_escaping_paths() {
    let daemon = unused_routes_daemon().await;
    let mut client = Client::connect(&daemon).await;
    client.send("DEPLOY").await;
    assert_eq!(client.recv().await.as_deref(), Some("OK"));
    client.send("DIRECTORY ../../etc").await;
    assert_eq!(client.recv().await.as_deref(), Some("ERROR bad instruction"));
    assert_eq!(client.recv().await, None);
}
