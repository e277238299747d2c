//! Plugin host: spawns sandboxed workers and owns their lifetime.
//!
//! The host is the only place capability scoping is configured and the only
//! component that terminates workers. Each worker is a child process whose
//! stdin/stdout carry the RPC stream and whose stderr is inherited.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use evm_rpc::{RequestHandler, Unhandled, WorkerClient};
use tokio::process::{Child, Command};
use tracing::{error, info, warn};

use crate::client::PluginClient;
use crate::descriptor::{PluginDescriptor, PluginLocator};
use crate::error::{PluginError, PluginResult};
use crate::sandbox::{ResourceLimits, SandboxProfile};

/// Host-wide settings applied to every worker.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Apply OS sandboxing (Landlock / sandbox-exec).
    pub os_sandbox: bool,
    /// Fail the spawn instead of running unsandboxed when the kernel or
    /// platform cannot enforce the sandbox.
    pub require_sandbox: bool,
    /// How long a worker may take to exit after its channel closes.
    pub shutdown_timeout: Duration,
    /// Deadline for each plugin request; `None` waits indefinitely.
    pub request_timeout: Option<Duration>,
    /// Resource limits for workers.
    pub resource_limits: Option<ResourceLimits>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            os_sandbox: true,
            require_sandbox: false,
            shutdown_timeout: Duration::from_secs(5),
            request_timeout: None,
            resource_limits: None,
        }
    }
}

/// Lifecycle state of a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginState {
    /// The worker is running and its channel is open.
    Running,
    /// The worker exited or its channel failed.
    Failed(String),
    /// The worker was terminated by the host.
    Stopped,
}

struct Worker {
    descriptor: PluginDescriptor,
    child: Child,
    client: PluginClient,
    state: PluginState,
}

/// Spawns and supervises plugin workers, one per locator.
pub struct PluginHost {
    config: HostConfig,
    request_handler: Arc<dyn RequestHandler>,
    workers: HashMap<PluginLocator, Worker>,
}

impl std::fmt::Debug for PluginHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHost")
            .field("config", &self.config)
            .field("workers", &self.workers.len())
            .finish_non_exhaustive()
    }
}

impl PluginHost {
    /// A host with no handler for worker-initiated requests.
    #[must_use]
    pub fn new(config: HostConfig) -> Self {
        Self {
            config,
            request_handler: Arc::new(Unhandled),
            workers: HashMap::new(),
        }
    }

    /// Answer requests that workers send to the host with `handler`.
    #[must_use]
    pub fn with_request_handler(mut self, handler: Arc<dyn RequestHandler>) -> Self {
        self.request_handler = handler;
        self
    }

    /// Host settings.
    #[must_use]
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Spawn a worker for `descriptor` and connect a client to it.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`PluginError::AlreadyRunning`] if a worker for the locator is running.
    /// - [`PluginError::InvalidCapability`] for relative grant paths.
    /// - [`PluginError::UnsupportedLocator`] for remote locators.
    /// - [`PluginError::SpawnFailed`] if the process cannot be started.
    pub fn spawn(&mut self, descriptor: PluginDescriptor) -> PluginResult<PluginClient> {
        let locator = descriptor.locator().clone();
        if self
            .workers
            .get(&locator)
            .is_some_and(|w| w.state == PluginState::Running)
        {
            return Err(PluginError::AlreadyRunning(locator.to_string()));
        }
        descriptor.capabilities().validate()?;
        let executable = locator.executable()?;
        let name = locator.file_stem().unwrap_or_else(|| locator.to_string());

        let mut command = self.build_command(&descriptor, &executable)?;
        let mut child = command.spawn().map_err(|e| self.spawn_error(&locator, &e))?;
        let rpc = WorkerClient::from_child(&mut child, Arc::clone(&self.request_handler), name.clone())
            .map_err(|f| PluginError::SpawnFailed {
                locator: locator.to_string(),
                message: f.to_string(),
            })?;
        let client = PluginClient::new(name, rpc, self.config.request_timeout);

        info!(
            plugin = %locator,
            pid = child.id(),
            sandboxed = self.config.os_sandbox,
            "Spawned plugin worker"
        );
        self.workers.insert(
            locator,
            Worker {
                descriptor,
                child,
                client: client.clone(),
                state: PluginState::Running,
            },
        );
        Ok(client)
    }

    #[cfg_attr(not(target_os = "linux"), allow(clippy::unused_self))]
    fn spawn_error(&self, locator: &PluginLocator, e: &std::io::Error) -> PluginError {
        #[cfg(target_os = "linux")]
        if self.config.os_sandbox
            && self.config.require_sandbox
            && e.raw_os_error() == Some(crate::platform::NOT_ENFORCED_ERRNO)
        {
            warn!(
                plugin = %locator,
                "Kernel cannot fully enforce the Landlock sandbox; refusing to run the plugin"
            );
            return PluginError::SandboxError(format!(
                "the kernel cannot fully enforce the sandbox for '{locator}'; \
                 network rules need Landlock ABI v4 (Linux 6.7+)"
            ));
        }
        PluginError::SpawnFailed {
            locator: locator.to_string(),
            message: e.to_string(),
        }
    }

    /// Build the worker command with a cleared environment and the sandbox
    /// for the descriptor's capabilities.
    ///
    /// On Linux, Landlock rules and resource limits are applied in a
    /// `pre_exec` hook. The `unsafe` is required by POSIX: `pre_exec` runs
    /// between `fork()` and `exec()` where only async-signal-safe operations
    /// are permitted.
    #[allow(unsafe_code)]
    fn build_command(&self, descriptor: &PluginDescriptor, executable: &Path) -> PluginResult<Command> {
        let mut profile = SandboxProfile::new(executable.to_path_buf(), descriptor.capabilities().clone());
        if let Some(limits) = self.config.resource_limits.as_ref().filter(|l| !l.is_empty()) {
            profile = profile.with_resource_limits(limits.clone());
        }

        let (program, args) = if self.config.os_sandbox {
            #[cfg(not(any(target_os = "linux", target_os = "macos")))]
            if self.config.require_sandbox {
                return Err(PluginError::SandboxError(
                    "OS sandboxing is not available on this platform".into(),
                ));
            }
            profile.wrap_command(descriptor.args())?
        } else {
            warn!(plugin = %descriptor.locator(), "OS sandbox disabled; plugin runs unconfined");
            (executable.to_path_buf(), descriptor.args().to_vec())
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&profile.plugin_dir)
            .env_clear()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let env = descriptor.spawn_env();
        for key in &env.rejected {
            warn!(
                plugin = %descriptor.locator(),
                key = %key,
                "Ignoring blocked env var from plugin configuration"
            );
        }
        cmd.envs(env.vars);

        // PathFds are opened here, before fork, where allocation is safe.
        #[cfg(target_os = "linux")]
        if self.config.os_sandbox || profile.resource_limits.is_some() {
            let mut prepared = Some(crate::platform::prepare(
                &profile,
                self.config.os_sandbox,
                self.config.require_sandbox,
            ));
            // SAFETY: pre_exec runs between fork() and exec(). The closure
            // only invokes Landlock syscalls and setrlimit on descriptors
            // opened before the fork. Error construction may allocate, which
            // is acceptable because any error aborts the exec.
            unsafe {
                cmd.pre_exec(move || {
                    let prepared = prepared
                        .take()
                        .ok_or_else(|| std::io::Error::other("sandbox pre_exec called more than once"))?;
                    crate::platform::enforce(prepared)
                });
            }
        }

        Ok(cmd)
    }

    /// Client for a running worker.
    #[must_use]
    pub fn client(&self, locator: &PluginLocator) -> Option<PluginClient> {
        self.workers
            .get(locator)
            .filter(|w| w.state == PluginState::Running)
            .map(|w| w.client.clone())
    }

    /// The descriptor a worker was spawned from.
    #[must_use]
    pub fn descriptor(&self, locator: &PluginLocator) -> Option<&PluginDescriptor> {
        self.workers.get(locator).map(|w| &w.descriptor)
    }

    /// Last observed state of a worker, without polling it.
    #[must_use]
    pub fn state(&self, locator: &PluginLocator) -> Option<PluginState> {
        self.workers.get(locator).map(|w| w.state.clone())
    }

    /// Locators of workers last observed running.
    pub fn running(&self) -> impl Iterator<Item = &PluginLocator> {
        self.workers
            .iter()
            .filter(|(_, w)| w.state == PluginState::Running)
            .map(|(locator, _)| locator)
    }

    /// Poll a worker's process and channel and update its state.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotRunning`] if no worker was spawned for
    /// `locator`.
    pub fn check_health(&mut self, locator: &PluginLocator) -> PluginResult<PluginState> {
        let worker = self
            .workers
            .get_mut(locator)
            .ok_or_else(|| PluginError::NotRunning(locator.to_string()))?;
        if worker.state != PluginState::Running {
            return Ok(worker.state.clone());
        }

        let failure = match worker.child.try_wait() {
            Ok(Some(status)) => Some(format!("worker exited: {status}")),
            Ok(None) => worker
                .client
                .failure()
                .map(|f| format!("channel failed: {f}")),
            Err(e) => Some(format!("failed to poll worker: {e}")),
        };
        if let Some(reason) = failure {
            warn!(plugin = %locator, %reason, "Plugin worker failed");
            worker.state = PluginState::Failed(reason);
        }
        Ok(worker.state.clone())
    }

    /// Kill a worker and spawn a fresh one from the same descriptor.
    ///
    /// Calls in flight on the old worker are lost and never retried.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotRunning`] if no worker was spawned for
    /// `locator`, or any error from [`spawn`](Self::spawn).
    pub async fn respawn(&mut self, locator: &PluginLocator) -> PluginResult<PluginClient> {
        let mut worker = self
            .workers
            .remove(locator)
            .ok_or_else(|| PluginError::NotRunning(locator.to_string()))?;
        worker.client.close();
        if let Err(e) = worker.child.kill().await {
            warn!(plugin = %locator, error = %e, "Failed to kill plugin worker");
        }
        info!(plugin = %locator, "Respawning plugin worker");
        self.spawn(worker.descriptor)
    }

    /// Close a worker's channel, wait up to the shutdown timeout for it to
    /// exit, then kill it.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotRunning`] if no worker was spawned for
    /// `locator`.
    pub async fn terminate(&mut self, locator: &PluginLocator) -> PluginResult<()> {
        let timeout = self.config.shutdown_timeout;
        let worker = self
            .workers
            .get_mut(locator)
            .ok_or_else(|| PluginError::NotRunning(locator.to_string()))?;
        if worker.state == PluginState::Stopped {
            return Ok(());
        }

        worker.client.close();
        match tokio::time::timeout(timeout, worker.child.wait()).await {
            Ok(Ok(status)) => info!(plugin = %locator, %status, "Plugin worker exited"),
            Ok(Err(e)) => warn!(plugin = %locator, error = %e, "Failed to wait for plugin worker"),
            Err(_) => {
                warn!(
                    plugin = %locator,
                    timeout_secs = timeout.as_secs(),
                    "Plugin worker did not exit in time; killing"
                );
                if let Err(e) = worker.child.kill().await {
                    error!(plugin = %locator, error = %e, "Failed to kill plugin worker");
                }
            },
        }
        worker.state = PluginState::Stopped;
        Ok(())
    }

    /// Terminate every worker.
    pub async fn shutdown(&mut self) {
        let locators: Vec<PluginLocator> = self.workers.keys().cloned().collect();
        for locator in locators {
            if let Err(e) = self.terminate(&locator).await {
                warn!(plugin = %locator, error = %e, "Failed to terminate plugin worker");
            }
        }
    }
}
