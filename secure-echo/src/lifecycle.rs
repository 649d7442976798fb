//! Start, readiness and graceful shutdown of a composed [`EchoServer`].
//!
//! The main RPC listener starts first. Once it reports its bound address
//! the gateway is started against that address. Shutdown runs in reverse:
//! the gateway drains before the RPC listener it forwards to.

use axum_server::Handle;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::error::{EchoError, Result};
use crate::gateway::GatewayBridge;
use crate::server::{EchoServer, Listener};

/// How long in-flight calls may run after shutdown starts
pub const DRAIN_PERIOD: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Constructed,
    Starting,
    Serving,
    Stopping,
    Stopped,
}

/// A listener task plus the handle used to observe and stop it
struct Running {
    handle: Handle,
    task: JoinHandle<std::io::Result<()>>,
}

impl Running {
    fn spawn(listener: Listener) -> Self {
        let handle = Handle::new();
        let task = tokio::spawn(listener.serve(handle.clone()));
        Self { handle, task }
    }

    /// Resolves to the bound address, or to the reason the listener exited
    async fn ready(&mut self) -> Result<SocketAddr> {
        if let Some(addr) = self.handle.listening().await {
            return Ok(addr);
        }
        let reason = match (&mut self.task).await {
            Ok(Err(e)) => format!("failed to start listener: {}", e),
            Ok(Ok(())) => "listener exited before becoming ready".to_string(),
            Err(e) => format!("listener task failed: {}", e),
        };
        Err(EchoError::Transport(reason))
    }

    async fn stop(self) -> Result<()> {
        self.handle.graceful_shutdown(Some(DRAIN_PERIOD));
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(EchoError::Transport(format!("listener failed: {}", e))),
            Err(e) => Err(EchoError::Transport(format!("listener task failed: {}", e))),
        }
    }
}

/// Owns a composed server through its whole life
pub struct LifecycleController {
    state: LifecycleState,
    server_name: String,
    server: Option<EchoServer>,
    bridge: Option<GatewayBridge>,
    main: Option<Running>,
    gateway: Option<Running>,
    gateway_addr: Option<SocketAddr>,
}

impl LifecycleController {
    pub fn new(server: EchoServer) -> Self {
        Self {
            state: LifecycleState::Constructed,
            server_name: server.server_name().to_string(),
            server: Some(server),
            bridge: None,
            main: None,
            gateway: None,
            gateway_addr: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn gateway_addr(&self) -> Option<SocketAddr> {
        self.gateway_addr
    }

    /// Spawns the main listener without waiting for it.
    pub fn start(&mut self) -> Result<()> {
        let server = match (self.state, self.server.take()) {
            (LifecycleState::Constructed, Some(server)) => server,
            _ => return Err(EchoError::config("server was already started")),
        };

        let (listener, bridge) = server.into_parts();
        self.bridge = bridge;
        self.main = Some(Running::spawn(listener));
        self.state = LifecycleState::Starting;
        Ok(())
    }

    /// Waits until the main listener is bound, then starts the gateway
    /// and waits for it as well. There is no timeout.
    pub async fn await_ready(&mut self) -> Result<SocketAddr> {
        let main = self
            .main
            .as_mut()
            .ok_or_else(|| EchoError::config("server was not started"))?;
        // a listener that failed to come up has already been joined
        let rpc_addr = match main.ready().await {
            Ok(addr) => addr,
            Err(e) => {
                self.main = None;
                return Err(e);
            }
        };

        if let Some(bridge) = &self.bridge {
            let mut gateway = Running::spawn(bridge.listener(rpc_addr)?);
            let gateway_addr = gateway.ready().await?;
            tracing::info!("HTTP gateway listening on port: {}", gateway_addr.port());
            self.gateway = Some(gateway);
            self.gateway_addr = Some(gateway_addr);
        }

        self.state = LifecycleState::Serving;
        tracing::info!(
            server_name = %self.server_name,
            "waiting for requests at port: {}",
            rpc_addr.port()
        );
        Ok(rpc_addr)
    }

    /// Stops the gateway, then the main listener, letting in-flight calls
    /// drain. Stopping twice is a no-op.
    pub async fn stop(&mut self) -> Result<()> {
        if self.state == LifecycleState::Stopped {
            return Ok(());
        }
        self.state = LifecycleState::Stopping;

        let gateway = match self.gateway.take() {
            Some(gateway) => gateway.stop().await,
            None => Ok(()),
        };
        let main = match self.main.take() {
            Some(main) => main.stop().await,
            None => Ok(()),
        };

        self.state = LifecycleState::Stopped;
        tracing::info!("server stopped");
        gateway.and(main)
    }

    /// Serves until `shutdown` resolves, then stops gracefully
    pub async fn serve_until<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.start()?;
        if let Err(e) = self.await_ready().await {
            // the listeners that did come up must not linger
            let _ = self.stop().await;
            return Err(e);
        }

        shutdown.await;
        tracing::warn!("shutting down server");
        self.stop().await
    }

    /// Serves until the process receives a termination signal
    pub async fn run(self) -> Result<()> {
        self.serve_until(async {
            match termination_signal().await {
                Ok(name) => tracing::info!("received {}", name),
                Err(e) => tracing::error!("failed to listen for termination signals: {}", e),
            }
        })
        .await
    }
}

/// Resolves with the name of the first termination signal received
pub async fn termination_signal() -> Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut hangup = signal(SignalKind::hangup())?;
        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let mut quit = signal(SignalKind::quit())?;

        let name = tokio::select! {
            _ = hangup.recv() => "SIGHUP",
            _ = interrupt.recv() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
            _ = quit.recv() => "SIGQUIT",
        };
        Ok(name)
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok("ctrl-c")
    }
}
