//! Composition root
//!
//! Startup order: LEDs and display are brought up by the hardware layer,
//! then the sensor is calibrated with the display showing the calibrating
//! screen, then the store is opened and finally both loops start. Nothing
//! reads the store before calibration has finished.

use std::ffi::OsString;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use alco_core::actuation::{ActuationTask, Indicators};
use alco_core::calibration::{Calibration, Calibrator};
use alco_core::config::{Config, MetricParams};
use alco_core::display::{Display, Panel};
use alco_core::sampling::SamplingTask;
use alco_core::sensors::RawSampler;
use anyhow::{Context, anyhow, bail};
use clap::ValueEnum;
use embedded_hal::digital::OutputPin;
use log::{debug, info, warn};
use tokio::net::TcpListener;

use crate::clock::LocalClock;
use crate::hardware::{Hardware, StdDelay};
use crate::http::{self, DynStore};
use crate::manager::{ManagerClient, ManagerServer};
use crate::runtime::{Shutdown, spawn_periodic};
use crate::shm::ShmStore;
use crate::sync::ThreadStore;

pub const DEFAULT_SHM_PATH: &str = "/dev/shm/alco-state";
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/alco-manager.sock";

const MANAGER_TIMEOUT: Duration = Duration::from_secs(2);
const MANAGER_CONNECT_ATTEMPTS: u32 = 50;
const MANAGER_CONNECT_BACKOFF: Duration = Duration::from_millis(100);
/// How often the parent checks that its child processes are still running
const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How the sampling loop and its readers share state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum StoreStrategy {
    /// One process, loops on threads sharing a locked store
    #[default]
    Thread,
    /// Query surface in a child process, state in a shared memory file
    Shm,
    /// Store owned by a manager child process, reached over a Unix socket
    Manager,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub strategy: StoreStrategy,
    pub shm_path: PathBuf,
    pub socket_path: PathBuf,
    /// Forwarded to child processes
    pub config_path: Option<PathBuf>,
    /// Binary to launch child processes from
    pub exe: PathBuf,
}

impl RunOptions {
    pub fn new(strategy: StoreStrategy) -> anyhow::Result<Self> {
        Ok(Self {
            strategy,
            shm_path: PathBuf::from(DEFAULT_SHM_PATH),
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            config_path: None,
            exe: std::env::current_exe().context("cannot locate own executable")?,
        })
    }
}

/// Child processes and files owned by a store strategy, torn down on drop
#[derive(Default)]
struct Teardown {
    children: Vec<Child>,
    files: Vec<PathBuf>,
}

impl Teardown {
    fn spawn(&mut self, exe: &Path, args: Vec<OsString>) -> anyhow::Result<()> {
        self.children.push(spawn_child(exe, args)?);
        Ok(())
    }

    /// Fail if any child process has already exited.
    fn check_children(&mut self) -> anyhow::Result<()> {
        for child in &mut self.children {
            let pid = child.id();
            if let Some(status) = child
                .try_wait()
                .with_context(|| format!("failed to poll child process {}", pid))?
            {
                bail!("child process {} exited unexpectedly: {}", pid, status);
            }
        }
        Ok(())
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        for child in &mut self.children {
            let pid = child.id();
            if let Err(e) = child.kill() {
                debug!("Child {} already gone: {}", pid, e);
            }
            match child.wait() {
                Ok(status) => debug!("Child {} exited: {}", pid, status),
                Err(e) => warn!("Failed to reap child {}: {}", pid, e),
            }
        }
        for path in &self.files {
            if let Err(e) = std::fs::remove_file(path) {
                debug!("Could not remove {}: {}", path.display(), e);
            }
        }
    }
}

/// Store handles for each role
struct Stores {
    writer: DynStore,
    reader: DynStore,
    /// Set when the query surface runs in this process
    query: Option<DynStore>,
    teardown: Teardown,
}

impl Stores {
    fn open(config: &Config, options: &RunOptions) -> anyhow::Result<Self> {
        let mut teardown = Teardown::default();
        match options.strategy {
            StoreStrategy::Thread => {
                let store: DynStore = Arc::new(ThreadStore::new());
                Ok(Self {
                    writer: Arc::clone(&store),
                    reader: Arc::clone(&store),
                    query: Some(store),
                    teardown,
                })
            }
            StoreStrategy::Shm => {
                let params = config.metric_params();
                let writer = ShmStore::create(&options.shm_path, params)?;
                teardown.files.push(options.shm_path.clone());
                let reader = ShmStore::open(&options.shm_path, params)?;
                teardown.spawn(&options.exe, query_child_args(config, options, "shm"))?;
                Ok(Self {
                    writer: Arc::new(writer),
                    reader: Arc::new(reader),
                    query: None,
                    teardown,
                })
            }
            StoreStrategy::Manager => {
                let mut args = child_args(options, "manager");
                args.extend(["--socket".into(), options.socket_path.clone().into()]);
                teardown.spawn(&options.exe, args)?;
                teardown.files.push(options.socket_path.clone());

                let params = config.metric_params();
                let writer = connect_manager(&options.socket_path, params)?;
                let reader = connect_manager(&options.socket_path, params)?;
                teardown.spawn(&options.exe, query_child_args(config, options, "manager"))?;
                Ok(Self {
                    writer: Arc::new(writer),
                    reader: Arc::new(reader),
                    query: None,
                    teardown,
                })
            }
        }
    }
}

fn connect_manager(path: &Path, params: MetricParams) -> anyhow::Result<ManagerClient> {
    ManagerClient::connect_with_retry(
        path,
        MANAGER_TIMEOUT,
        params,
        MANAGER_CONNECT_ATTEMPTS,
        MANAGER_CONNECT_BACKOFF,
    )
    .with_context(|| format!("store manager did not come up at {}", path.display()))
}

fn child_args(options: &RunOptions, subcommand: &str) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![subcommand.into()];
    if let Some(path) = &options.config_path {
        args.extend(["--config".into(), path.clone().into()]);
    }
    args
}

fn query_child_args(config: &Config, options: &RunOptions, store: &str) -> Vec<OsString> {
    let mut args = child_args(options, "query");
    args.extend([
        "--store".into(),
        store.into(),
        "--shm-path".into(),
        options.shm_path.clone().into(),
        "--socket".into(),
        options.socket_path.clone().into(),
        "--http-port".into(),
        config.http_port.to_string().into(),
    ]);
    args
}

/// Children get their own process group so a terminal Ctrl-C reaches only
/// the parent, which then stops them after its loops have finished.
fn spawn_child(exe: &Path, args: Vec<OsString>) -> anyhow::Result<Child> {
    let child = Command::new(exe)
        .args(&args)
        .process_group(0)
        .spawn()
        .with_context(|| format!("failed to start {} {:?}", exe.display(), args))?;
    info!("Started child process {} {:?}", child.id(), args);
    Ok(child)
}

/// The running sampling and actuation loops.
pub struct Pipeline<R, N, A, P> {
    shutdown: Shutdown,
    calibration: Calibration,
    sampling: JoinHandle<SamplingTask<R, DynStore, LocalClock>>,
    actuation: JoinHandle<ActuationTask<DynStore, N, A, P>>,
    stores: Stores,
}

impl<R, N, A, P> Pipeline<R, N, A, P>
where
    R: RawSampler + Send + 'static,
    N: OutputPin + Send + 'static,
    A: OutputPin + Send + 'static,
    P: Panel + Send + 'static,
{
    /// Calibrate, open the store and start both loops.
    pub fn start(
        config: &Config,
        options: &RunOptions,
        hardware: Hardware<R, N, A, P>,
    ) -> anyhow::Result<Self> {
        let Hardware {
            sampler,
            led_normal,
            led_alert,
            panel,
        } = hardware;
        let mut display = panel.map(Display::new);

        let mut calibrator = Calibrator::new(sampler, StdDelay, &config.timing);
        let calibration = calibrator.run(display.as_mut());
        let sampler = calibrator.into_sampler();

        let stores = Stores::open(config, options)?;
        info!("Using {:?} store", options.strategy);

        let shutdown = Shutdown::new();
        let sampling = SamplingTask::new(
            sampler,
            Arc::clone(&stores.writer),
            LocalClock,
            calibration.baseline,
            config.metric_params(),
            config.timing.sampling_interval(),
        );
        let footer = format!("HTTP :{}", config.http_port);
        let actuation = ActuationTask::new(
            Arc::clone(&stores.reader),
            Indicators::new(led_normal, led_alert),
            display,
            &footer,
            config.timing.actuation_interval(),
        );

        let sampling = spawn_periodic(sampling, shutdown.clone())
            .context("failed to start sampling thread")?;
        let actuation = match spawn_periodic(actuation, shutdown.clone()) {
            Ok(handle) => handle,
            Err(e) => {
                shutdown.request();
                let _ = sampling.join();
                return Err(e).context("failed to start actuation thread");
            }
        };

        Ok(Self {
            shutdown,
            calibration,
            sampling,
            actuation,
            stores,
        })
    }

    pub fn calibration(&self) -> Calibration {
        self.calibration
    }

    /// Store handle for an in-process query surface, if this strategy uses one
    pub fn query_store(&self) -> Option<DynStore> {
        self.stores.query.clone()
    }

    /// A reader handle independent of the loops
    pub fn reader(&self) -> DynStore {
        Arc::clone(&self.stores.reader)
    }

    /// Stop both loops, wait for them, then tear down the store.
    ///
    /// The actuation loop switches both LEDs off on its way out.
    pub fn stop(self) -> anyhow::Result<()> {
        info!("Shutting down");
        self.shutdown.request();
        let sampling = self.sampling.join();
        let actuation = self.actuation.join();
        if let Ok(task) = &sampling
            && task.zero_readings() > 0
        {
            info!(
                "{} zero readings were published this session",
                task.zero_readings()
            );
        }
        drop(self.stores);

        sampling.map_err(|_| anyhow!("sampling thread panicked"))?;
        actuation.map_err(|_| anyhow!("actuation thread panicked"))?;
        Ok(())
    }
}

fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

/// Wait for Ctrl-C, failing early if a child process dies.
async fn supervise(teardown: &mut Teardown) -> anyhow::Result<()> {
    let mut poll = tokio::time::interval(CHILD_POLL_INTERVAL);
    let ctrl_c = http::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            () = &mut ctrl_c => return Ok(()),
            _ = poll.tick() => teardown.check_children()?,
        }
    }
}

async fn serve_on_port(port: u16, store: DynStore) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind HTTP port {}", port))?;
    http::serve(listener, store, http::ctrl_c()).await?;
    Ok(())
}

/// Run the whole device until Ctrl-C.
pub fn run<R, N, A, P>(
    config: &Config,
    options: &RunOptions,
    hardware: Hardware<R, N, A, P>,
) -> anyhow::Result<()>
where
    R: RawSampler + Send + 'static,
    N: OutputPin + Send + 'static,
    A: OutputPin + Send + 'static,
    P: Panel + Send + 'static,
{
    let runtime = runtime()?;
    let mut pipeline = Pipeline::start(config, options, hardware)?;

    let served = match pipeline.query_store() {
        Some(store) => runtime.block_on(serve_on_port(config.http_port, store)),
        None => {
            info!("Running, press Ctrl-C to stop");
            runtime.block_on(supervise(&mut pipeline.stores.teardown))
        }
    };

    pipeline.stop()?;
    served
}

/// Serve the query surface from a store owned by another process.
pub fn run_query(
    config: &Config,
    strategy: StoreStrategy,
    shm_path: &Path,
    socket_path: &Path,
    port: u16,
) -> anyhow::Result<()> {
    let store: DynStore = match strategy {
        StoreStrategy::Thread => {
            bail!("the thread store lives inside the run process and cannot be queried separately")
        }
        StoreStrategy::Shm => Arc::new(ShmStore::open(shm_path, config.metric_params())?),
        StoreStrategy::Manager => Arc::new(connect_manager(socket_path, config.metric_params())?),
    };
    runtime()?.block_on(serve_on_port(port, store))
}

/// Own the store and serve it over `socket_path` until killed.
pub fn run_manager(config: &Config, socket_path: &Path) -> anyhow::Result<()> {
    ManagerServer::new(Arc::new(ThreadStore::new()), config.metric_params())
        .bind_and_serve(socket_path)
        .with_context(|| format!("store manager failed on {}", socket_path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn shell(script: &str) -> Vec<OsString> {
        vec!["-c".into(), script.into()]
    }

    #[test]
    fn test_running_children_pass_the_check() {
        let mut teardown = Teardown::default();
        teardown.spawn(Path::new("/bin/sh"), shell("sleep 30")).unwrap();
        assert!(teardown.check_children().is_ok());
        // Dropping the teardown kills and reaps the child.
    }

    #[test]
    fn test_exited_child_fails_the_check() {
        let mut teardown = Teardown::default();
        teardown.spawn(Path::new("/bin/sh"), shell("exit 3")).unwrap();
        thread::sleep(Duration::from_millis(200));

        let err = teardown.check_children().unwrap_err();
        assert!(err.to_string().contains("exited unexpectedly"), "{:#}", err);
    }

    #[tokio::test]
    async fn test_supervise_returns_when_a_child_dies() {
        let mut teardown = Teardown::default();
        teardown.spawn(Path::new("/bin/sh"), shell("exit 0")).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), supervise(&mut teardown)).await;
        assert!(matches!(result, Ok(Err(_))));
    }
}
