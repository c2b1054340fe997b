//! Server lifecycle (the rest of C7): explicit start/stop/status, instead of
//! the teacher's signal-driven `srv_async_unix` loop.
//!
//! The sibling core's Lua program is expected to be able to bring this
//! server up and down at will (spec.md 4.7's "WiFi-up/down-equivalent"
//! requirement), so this listens on an explicit `stop()` call rather than
//! OS signals the way the teacher's `srv_async_unix` does. The accept loop
//! itself — `TcpListener::bind`, `accept()` in a loop, one task per
//! connection — is kept verbatim from the teacher's `srv_async_tcp`; only
//! the per-message dispatch inside each connection differs (see
//! `dispatch::serve_connection`).

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::{error, info};
use tokio::net::TcpListener;
use tokio::sync::Notify;

use crate::config::Config;
use crate::dispatch;
use crate::handlers::Handler;
use crate::lock::FatLock;

/// Snapshot of a running server instance, per spec.md 4.7's `server_status`
/// supplemented operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServerStatus {
    pub running: bool,
    pub active_sessions: usize,
}

/// One running (or stopped) server instance bound to a single FAT32 volume.
pub struct Server {
    config: Config,
    handler: Arc<Handler>,
    active_sessions: Arc<AtomicUsize>,
    stop: Arc<Notify>,
    running: Arc<std::sync::atomic::AtomicBool>,
}

impl Server {
    pub fn new(config: Config, fs_file: std::fs::File) -> crate::error::Result<Server> {
        let config = config.sanitized();
        let timeout = std::time::Duration::from_millis(config.fs_lock_timeout_ms);
        let lock = Arc::new(FatLock::open(fs_file, timeout)?);
        let handler = Arc::new(Handler::new(lock, config));
        Ok(Server {
            config,
            handler,
            active_sessions: Arc::new(AtomicUsize::new(0)),
            stop: Arc::new(Notify::new()),
            running: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        })
    }

    pub fn status(&self) -> ServerStatus {
        ServerStatus {
            running: self.running.load(Ordering::SeqCst),
            active_sessions: self.active_sessions.load(Ordering::SeqCst),
        }
    }

    /// Request shutdown. Idempotent: calling this on an already-stopped (or
    /// not-yet-started) server is a no-op, matching spec.md's "stop when
    /// already stopped is a no-op" rule.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            self.stop.notify_waiters();
        }
    }

    /// Bind and serve until `stop()` is called or the listener itself fails.
    /// A bind failure here only fails this call — it never panics or aborts
    /// the process, per spec.md's "errors are local to the failing
    /// operation" principle (4.1).
    pub async fn start(&self, bind_addr: SocketAddr) -> std::io::Result<()> {
        let listener = TcpListener::bind(bind_addr).await?;
        self.running.store(true, Ordering::SeqCst);
        info!("listening on {}", bind_addr);

        loop {
            tokio::select! {
                _ = self.stop.notified() => {
                    info!("server stop requested");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    if self.active_sessions.load(Ordering::SeqCst) >= self.config.max_clients {
                        info!("rejecting {}: max_clients reached", peer);
                        drop(stream);
                        continue;
                    }
                    info!("accepted: {}", peer);

                    let handler = self.handler.clone();
                    let config = self.config;
                    let sessions = self.active_sessions.clone();
                    sessions.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(async move {
                        let (readhalf, writehalf) = stream.into_split();
                        let res = dispatch::serve_connection(handler, config, readhalf, writehalf).await;
                        if let Err(e) = res {
                            error!("connection {}: {}", peer, e);
                        }
                        sessions.fetch_sub(1, Ordering::SeqCst);
                    });
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}
