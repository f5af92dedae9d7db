//! Shared test harness for integration tests.
//!
//! [`TestHarness`] builds a full [`AppContext`] over a scratch directory:
//! a file-backed store, a temp root and a `/bin/sh` stand-in for ffmpeg.
//! [`TestHarness::with_server`] additionally runs the worker pool and the
//! monitoring API on a random port.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use tf_core::config::Config;
use tf_core::{JobId, JobStatus};
use tf_server::{AppContext, Dispatcher};

/// Copies the first `-i` input to the last argument, or fails with
/// "bad codec" when the input mentions "fail".
pub const FAKE_FFMPEG: &str = r#"#!/bin/sh
if [ "$1" = "-version" ]; then echo "ffmpeg version test"; exit 0; fi
in=""
prev=""
for a in "$@"; do
  if [ "$prev" = "-i" ] && [ -z "$in" ]; then in="$a"; fi
  prev="$a"
  out="$a"
done
if grep -q fail "$in"; then echo "bad codec" >&2; exit 1; fi
cp "$in" "$out"
"#;

/// Like [`FAKE_FFMPEG`] but takes a second before copying.
pub const SLOW_FFMPEG: &str = r#"#!/bin/sh
if [ "$1" = "-version" ]; then echo "ffmpeg version test"; exit 0; fi
sleep 1
in=""
prev=""
for a in "$@"; do
  if [ "$prev" = "-i" ] && [ -z "$in" ]; then in="$a"; fi
  prev="$a"
  out="$a"
done
cp "$in" "$out"
"#;

/// Ignores SIGTERM and never finishes on its own.
pub const STUBBORN_FFMPEG: &str = r#"#!/bin/sh
if [ "$1" = "-version" ]; then echo "ffmpeg version test"; exit 0; fi
trap '' TERM
sleep 30
"#;

pub struct TestHarness {
    pub dir: TempDir,
    pub ctx: AppContext,
    pub dispatcher: Dispatcher,
}

impl TestHarness {
    /// Harness with the copying ffmpeg and default test settings.
    pub fn new() -> Self {
        Self::with_script(FAKE_FFMPEG, |_| {})
    }

    /// Harness whose ffmpeg is `script`; `tweak` adjusts the config before
    /// the context is built.
    pub fn with_script(script: &str, tweak: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let ffmpeg = write_script(dir.path(), "ffmpeg", script);

        let mut config = Config::default();
        config.server.host = "127.0.0.1".into();
        config.server.port = 0;
        config.server.db_path = dir.path().join("transforge.db");
        config.files.temp_dir = dir.path().join("ffmpeg_api");
        config.execution.ffmpeg_path = Some(ffmpeg);
        config.execution.timeout_secs = 10;
        config.workers.count = 2;
        config.workers.poll_interval_ms = 20;
        tweak(&mut config);

        let ctx = tf_server::build_context(config).expect("failed to build context");
        let dispatcher = Dispatcher::new(&ctx);
        Self {
            dir,
            ctx,
            dispatcher,
        }
    }

    /// Root that job files live under.
    pub fn root(&self) -> &Path {
        self.ctx.files.root()
    }

    /// Write an input for job `id` into the temp root.
    pub fn input(&self, id: JobId, name: &str, content: &str) -> PathBuf {
        let path = self.ctx.files.job_file_path("input", id, name);
        std::fs::write(&path, content).expect("failed to write input");
        path
    }

    /// Spawn the worker pool; cancel the token to stop it.
    pub fn start_workers(&self) -> (CancellationToken, JoinHandle<()>) {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(tf_server::processor::run_worker_pool(
            self.ctx.clone(),
            self.ctx.config.workers.count,
            cancel.clone(),
        ));
        (cancel, handle)
    }

    /// Run workers and the HTTP API on a random port.
    pub async fn with_server(self) -> RunningServer {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(tf_server::run(self.ctx.clone(), listener, cancel.clone()));
        RunningServer {
            harness: self,
            addr,
            cancel,
            handle,
        }
    }

    /// Poll the store until the job is terminal.
    pub async fn wait_terminal(&self, id: JobId) -> tf_db::JobRecord {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
        loop {
            let job = self
                .ctx
                .store
                .get_task_info(id)
                .expect("store lookup failed")
                .expect("job missing");
            if job.status.is_terminal() {
                return job;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job {id} stuck in {}",
                job.status
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Poll until `check` holds for the job.
    pub async fn wait_for(&self, id: JobId, check: impl Fn(&tf_db::JobRecord) -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
        loop {
            let job = self
                .ctx
                .store
                .get_task_info(id)
                .expect("store lookup failed")
                .expect("job missing");
            if check(&job) {
                return;
            }
            assert!(tokio::time::Instant::now() < deadline, "condition never held for {id}");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    pub fn status(&self, id: JobId) -> JobStatus {
        self.ctx
            .store
            .get_task_info(id)
            .expect("store lookup failed")
            .expect("job missing")
            .status
    }
}

pub struct RunningServer {
    pub harness: TestHarness,
    pub addr: SocketAddr,
    pub cancel: CancellationToken,
    pub handle: JoinHandle<tf_core::Result<()>>,
}

impl RunningServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub async fn shutdown(self) -> TestHarness {
        self.cancel.cancel();
        self.handle
            .await
            .expect("server task panicked")
            .expect("server returned an error");
        self.harness
    }
}

pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).expect("failed to write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("failed to chmod script");
    path
}
