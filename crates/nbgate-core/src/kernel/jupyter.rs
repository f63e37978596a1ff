//! Jupyter kernel process management.
//!
//! Provides `JupyterKernel` for spawning a kernel from its kernelspec and
//! talking to it over ZeroMQ, and `JupyterLauncher` to plug it into the
//! engine.

use std::fs;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use nbgate_format::OutputCollector;
use serde_json::json;
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout};
use uuid::Uuid;
use zeromq::{DealerSocket, Socket, SocketRecv, SocketSend, SubSocket, ZmqMessage};

use crate::error::{Error, Result};
use crate::kernelspec::KernelSpec;
use crate::paths;

use super::connection::ConnectionInfo;
use super::protocol::{ExecuteReply, IopubEvent, Message, Session, execute_request};
use super::{CellExecution, Kernel, KernelLauncher, LaunchOptions};

/// Delay between connection attempts while the kernel is binding its ports.
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// How long one `kernel_info_request` round waits before it is re-sent.
const HANDSHAKE_ROUND: Duration = Duration::from_millis(500);

/// Time a kernel gets to exit after `shutdown_request` before it is killed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Launches [`JupyterKernel`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct JupyterLauncher;

#[async_trait]
impl KernelLauncher for JupyterLauncher {
    async fn launch(&self, spec: &KernelSpec, options: &LaunchOptions) -> Result<Box<dyn Kernel>> {
        let kernel = JupyterKernel::start(spec, options).await?;
        Ok(Box::new(kernel))
    }
}

/// Handle to a kernel child process.
///
/// Dropping the handle kills the process and removes its connection file.
pub struct JupyterKernel {
    /// Kernelspec name.
    name: String,
    /// The kernel process.
    child: Child,
    /// Request/reply channel.
    shell: DealerSocket,
    /// Broadcast channel for outputs and status.
    iopub: SubSocket,
    /// Out-of-band channel for shutdown.
    control: DealerSocket,
    session: Session,
    connection_file: PathBuf,
    execution_timeout: Option<Duration>,
    /// Whether `shutdown` already ran.
    stopped: bool,
}

impl JupyterKernel {
    /// Spawn a kernel and wait until it answers `kernel_info_request`.
    pub async fn start(spec: &KernelSpec, options: &LaunchOptions) -> Result<Self> {
        let connection = ConnectionInfo::allocate(&spec.name)?;
        Self::start_with(spec, options, connection).await
    }

    /// Spawn a kernel on an already chosen set of ports.
    async fn start_with(
        spec: &KernelSpec,
        options: &LaunchOptions,
        connection: ConnectionInfo,
    ) -> Result<Self> {
        let runtime_dir = paths::runtime_dir();
        fs::create_dir_all(&runtime_dir)?;
        let connection_file = runtime_dir.join(format!("kernel-nbgate-{}.json", Uuid::new_v4()));
        connection.write_to(&connection_file)?;

        let mut child = match Self::spawn(spec, options, &connection_file) {
            Ok(child) => child,
            Err(e) => {
                let _ = fs::remove_file(&connection_file);
                return Err(e);
            }
        };
        tracing::debug!(
            "Started kernel '{}' (pid {:?}), connection file {}",
            spec.name,
            child.id(),
            connection_file.display()
        );

        let session = connection.session();
        let ready = timeout(
            options.start_timeout,
            Self::connect(&connection, &session, &mut child),
        )
        .await;

        let sockets = match ready {
            Ok(Ok(sockets)) => sockets,
            Ok(Err(e)) => {
                Self::abandon(&mut child, &connection_file).await;
                return Err(e);
            }
            Err(_) => {
                Self::abandon(&mut child, &connection_file).await;
                return Err(Error::Timeout {
                    what: format!("kernel '{}' to start", spec.name),
                    elapsed: options.start_timeout,
                });
            }
        };
        let (shell, iopub, control) = sockets;

        tracing::debug!("Kernel '{}' is ready", spec.name);
        Ok(Self {
            name: spec.name.clone(),
            child,
            shell,
            iopub,
            control,
            session,
            connection_file,
            execution_timeout: options.execution_timeout,
            stopped: false,
        })
    }

    fn spawn(spec: &KernelSpec, options: &LaunchOptions, connection_file: &std::path::Path) -> Result<Child> {
        let argv = spec.launch_argv(connection_file);
        let (program, args) = argv.split_first().ok_or_else(|| Error::KernelLaunch {
            kernel: spec.name.clone(),
            message: "kernelspec argv is empty".to_string(),
        })?;

        let mut command = Command::new(program);
        command
            .args(args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if options.forward_kernel_output {
            command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }
        if let Some(dir) = &options.working_dir {
            command.current_dir(dir);
        }

        command.spawn().map_err(|e| Error::KernelLaunch {
            kernel: spec.name.clone(),
            message: format!("failed to spawn '{}': {}", program, e),
        })
    }

    /// Connect all sockets and complete the `kernel_info` handshake.
    ///
    /// The handshake is repeated until both the reply on shell and some
    /// traffic on iopub have been seen, so no output published after this
    /// returns can be lost to a late SUB subscription.
    async fn connect(
        connection: &ConnectionInfo,
        session: &Session,
        child: &mut Child,
    ) -> Result<(DealerSocket, SubSocket, DealerSocket)> {
        let mut shell = DealerSocket::new();
        connect_with_retry(&mut shell, &connection.endpoint(connection.shell_port), child).await?;

        let mut control = DealerSocket::new();
        connect_with_retry(&mut control, &connection.endpoint(connection.control_port), child)
            .await?;

        let mut iopub = SubSocket::new();
        iopub.subscribe("").await?;
        connect_with_retry(&mut iopub, &connection.endpoint(connection.iopub_port), child).await?;

        let mut shell_ready = false;
        let mut iopub_ready = false;
        while !(shell_ready && iopub_ready) {
            check_alive(child)?;
            let request = session.message("kernel_info_request", json!({}));
            shell.send(to_zmq(&request, session)?).await?;

            let round = sleep(HANDSHAKE_ROUND);
            tokio::pin!(round);
            loop {
                tokio::select! {
                    frames = shell.recv() => {
                        let message = Message::from_frames(frames?.into_vec(), session.signer())?;
                        if message.msg_type() == "kernel_info_reply" {
                            shell_ready = true;
                        }
                    }
                    frames = iopub.recv() => {
                        frames?;
                        iopub_ready = true;
                    }
                    _ = &mut round => break,
                }
                if shell_ready && iopub_ready {
                    break;
                }
            }
        }

        Ok((shell, iopub, control))
    }

    /// Kill a kernel that never became ready.
    async fn abandon(child: &mut Child, connection_file: &std::path::Path) {
        let _ = child.start_kill();
        let _ = child.wait().await;
        let _ = fs::remove_file(connection_file);
    }

    /// Collect replies and outputs for one `execute_request`.
    async fn collect(&mut self, msg_id: &str) -> Result<CellExecution> {
        let Self {
            name,
            child,
            shell,
            iopub,
            session,
            ..
        } = self;

        let mut collector = OutputCollector::new();
        let mut reply: Option<ExecuteReply> = None;
        let mut idle = false;

        while reply.is_none() || !idle {
            tokio::select! {
                frames = shell.recv() => {
                    let message = Message::from_frames(frames?.into_vec(), session.signer())?;
                    if message.is_reply_to(msg_id) && message.msg_type() == "execute_reply" {
                        reply = Some(ExecuteReply::from_content(&message.content)?);
                    }
                }
                frames = iopub.recv() => {
                    let message = Message::from_frames(frames?.into_vec(), session.signer())?;
                    if !message.is_reply_to(msg_id) {
                        continue;
                    }
                    match IopubEvent::from_message(&message)? {
                        IopubEvent::Status(state) if state == "idle" => idle = true,
                        IopubEvent::Output(output) => collector.push(output),
                        IopubEvent::ClearOutput => collector.clear(),
                        IopubEvent::Status(_) | IopubEvent::Other => {}
                    }
                }
                status = child.wait() => {
                    let status = status?;
                    return Err(Error::KernelDied(format!(
                        "kernel '{}' exited with {} while executing a cell",
                        name, status
                    )));
                }
            }
        }

        let reply = reply.ok_or_else(|| Error::Protocol("missing execute_reply".to_string()))?;
        Ok(CellExecution {
            outputs: collector.into_outputs(),
            execution_count: reply.execution_count,
            status: reply.status,
        })
    }
}

#[async_trait]
impl Kernel for JupyterKernel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&mut self, code: &str) -> Result<CellExecution> {
        if self.stopped {
            return Err(Error::KernelDied(format!("kernel '{}' has been shut down", self.name)));
        }

        let request = self.session.message("execute_request", execute_request(code));
        let msg_id = request.header.msg_id.clone();
        let frames = to_zmq(&request, &self.session)?;
        self.shell.send(frames).await?;

        match self.execution_timeout {
            Some(limit) => match timeout(limit, self.collect(&msg_id)).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout {
                    what: "cell execution".to_string(),
                    elapsed: limit,
                }),
            },
            None => self.collect(&msg_id).await,
        }
    }

    async fn shutdown(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;

        let request = self
            .session
            .message("shutdown_request", json!({"restart": false}));
        match to_zmq(&request, &self.session) {
            Ok(frames) => {
                if let Err(e) = self.control.send(frames).await {
                    tracing::debug!("Failed to send shutdown_request: {}", e);
                }
            }
            Err(e) => tracing::debug!("Failed to encode shutdown_request: {}", e),
        }

        match timeout(SHUTDOWN_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => tracing::debug!("Kernel '{}' exited with {}", self.name, status),
            _ => {
                tracing::warn!("Kernel '{}' did not exit after shutdown_request, killing it", self.name);
                if let Err(e) = self.child.start_kill() {
                    tracing::warn!("Failed to kill kernel '{}': {}", self.name, e);
                }
                let _ = self.child.wait().await;
            }
        }

        let _ = fs::remove_file(&self.connection_file);
        Ok(())
    }
}

impl Drop for JupyterKernel {
    fn drop(&mut self) {
        // kill_on_drop takes care of the process
        if !self.stopped {
            let _ = fs::remove_file(&self.connection_file);
        }
    }
}

fn to_zmq(message: &Message, session: &Session) -> Result<ZmqMessage> {
    ZmqMessage::try_from(message.to_frames(session.signer())?)
        .map_err(|e| Error::Protocol(e.to_string()))
}

fn check_alive(child: &mut Child) -> Result<()> {
    match child.try_wait()? {
        Some(status) => Err(Error::KernelDied(format!(
            "kernel exited during startup with {}",
            status
        ))),
        None => Ok(()),
    }
}

/// Connect, retrying while the kernel has not bound the port yet.
async fn connect_with_retry<S: Socket>(socket: &mut S, endpoint: &str, child: &mut Child) -> Result<()> {
    loop {
        match socket.connect(endpoint).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                check_alive(child)?;
                tracing::trace!("Kernel not accepting connections on {} yet: {}", endpoint, e);
                sleep(CONNECT_RETRY_INTERVAL).await;
            }
        }
    }
}
