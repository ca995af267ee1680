//! TCP listener and connection-per-task loop, draining in-flight
//! connections via `FuturesUnordered` on graceful shutdown. TLS
//! negotiation itself is out of scope; `ImapConfig::tls` is accepted and
//! parsed but unused until that surface is built.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::stream::{FuturesUnordered, StreamExt};
use mail_proto::{EngineOutput, LineProtocolFramer, SessionEngine};
use mail_store::{MailboxStore, NotificationBus};
use mail_user::{ConnectionRegistry, CredentialVault};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use crate::config::ImapConfig;
use crate::telemetry::Telemetry;

pub struct Server {
    bind_addr: SocketAddr,
    session_timeout: Duration,
    connection_cap: u32,
    server_name: String,
    store: Arc<dyn MailboxStore>,
    vault: Arc<CredentialVault>,
    registry: Arc<ConnectionRegistry>,
    notify: Arc<NotificationBus>,
    telemetry: Arc<Telemetry>,
    next_connection_id: AtomicU64,
}

impl Server {
    pub fn new(
        config: &ImapConfig,
        connection_cap: u32,
        server_name: String,
        store: Arc<dyn MailboxStore>,
        vault: Arc<CredentialVault>,
        registry: Arc<ConnectionRegistry>,
        notify: Arc<NotificationBus>,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            bind_addr: config.bind_addr,
            session_timeout: Duration::from_secs(config.session_timeout_secs),
            connection_cap,
            server_name,
            store,
            vault,
            registry,
            notify,
            telemetry,
            next_connection_id: AtomicU64::new(1),
        }
    }

    pub async fn run(self: Arc<Self>, mut must_exit: watch::Receiver<bool>) -> Result<()> {
        let tcp = TcpListener::bind(self.bind_addr).await?;
        tracing::info!(addr = %self.bind_addr, "IMAP server listening");

        let mut connections = FuturesUnordered::new();

        while !*must_exit.borrow() {
            let wait_conn_finished = async {
                if connections.is_empty() {
                    futures::future::pending().await
                } else {
                    connections.next().await
                }
            };
            let (socket, remote_addr) = tokio::select! {
                a = tcp.accept() => a?,
                _ = wait_conn_finished => continue,
                _ = must_exit.changed() => continue,
            };
            tracing::info!(addr = %remote_addr, "accepted IMAP connection");

            let this = self.clone();
            let conn = tokio::spawn(async move { this.handle_connection(socket, remote_addr.ip()).await });
            connections.push(conn);
        }
        drop(tcp);

        tracing::info!("IMAP server shutting down, draining remaining connections...");
        while connections.next().await.is_some() {}

        Ok(())
    }

    /// Drives one connection to completion. Generic over the transport so
    /// integration tests can pass a `tokio::io::duplex` pair instead of a
    /// real `TcpStream`, the same simplification a harness would need
    /// without a live listener to drive.
    pub async fn handle_connection<S>(&self, socket: S, client_ip: IpAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let mut engine = SessionEngine::new(
            self.store.clone(),
            self.vault.clone(),
            self.registry.clone(),
            self.notify.clone(),
            self.server_name.clone(),
            self.connection_cap,
            connection_id,
            client_ip,
        );
        let mut framer = LineProtocolFramer::new(socket);

        if framer.write_line(&engine.greeting()).await.is_err() {
            return;
        }

        loop {
            let line = match tokio::time::timeout(self.session_timeout, framer.read_command_line()).await {
                Ok(Ok(Some(line))) => line,
                Ok(Ok(None)) => break,
                Ok(Err(e)) => {
                    tracing::warn!(connection_id, err = %e, "transport error reading command");
                    self.telemetry.record_failure(&e);
                    break;
                }
                Err(_) => {
                    framer.close_with_bye("Session timeout").await;
                    break;
                }
            };

            tracing::debug!(connection_id, line = %line, "received line");
            self.telemetry.record_command(command_name(&line));

            match engine.handle_line(&line).await {
                Ok(EngineOutput::Lines(lines)) => {
                    if write_all(&mut framer, &lines).await.is_err() {
                        break;
                    }
                }
                Ok(EngineOutput::AwaitContinuation { lines }) => {
                    if write_all(&mut framer, &lines).await.is_err() {
                        break;
                    }
                }
                Ok(EngineOutput::Close { lines }) => {
                    let _ = write_all(&mut framer, &lines).await;
                    break;
                }
                Err(e) => {
                    tracing::warn!(connection_id, err = %e, "session error");
                    self.telemetry.record_failure(&e);
                    framer.close_with_bye(&e.to_string()).await;
                    break;
                }
            }
        }

        engine.release_registry_slot();
        tracing::info!(connection_id, "IMAP connection closed");
    }
}

/// Best-effort command-name extraction for the telemetry counter table,
/// without re-running the full parser.
fn command_name(line: &str) -> &'static str {
    let second = line.split_whitespace().nth(1).unwrap_or("").to_ascii_uppercase();
    match second.as_str() {
        "LOGIN" => "LOGIN",
        "AUTHENTICATE" => "AUTHENTICATE",
        "CAPABILITY" => "CAPABILITY",
        "NOOP" => "NOOP",
        "LOGOUT" => "LOGOUT",
        "ENABLE" => "ENABLE",
        "SELECT" => "SELECT",
        "EXAMINE" => "EXAMINE",
        "LIST" => "LIST",
        "LSUB" => "LSUB",
        "STATUS" => "STATUS",
        "FETCH" => "FETCH",
        "STORE" => "STORE",
        "SEARCH" => "SEARCH",
        "UID" => "UID",
        "EXPUNGE" => "EXPUNGE",
        "CLOSE" => "CLOSE",
        "UNSELECT" => "UNSELECT",
        _ => "OTHER",
    }
}

async fn write_all<S>(framer: &mut LineProtocolFramer<S>, lines: &[String]) -> Result<(), mail_proto::SessionError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    for line in lines {
        framer.write_line(line).await?;
    }
    Ok(())
}
