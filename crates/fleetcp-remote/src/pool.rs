//! Per-host bounded pool of authenticated SSH sessions
//!
//! Sessions are not checked out exclusively: remote command execution is
//! one-shot per command, so a pooled session is shared behind a mutex and
//! reused by whoever finds it live. A reuse hit moves the session to the
//! most-recently-used end of its host's pool; dead sessions are discarded
//! on sight; when a freshly authenticated session pushes the pool past its
//! bound, the oldest entry is evicted first.

use fleetcp_config::{PoolConfig, ServerDescriptor};
use fleetcp_types::{Error, Result};
use ssh2::Session;
use std::collections::HashMap;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

/// A session shared behind a mutex; ssh2 sessions are `Send` but not
/// `Sync`, and one session must not run two commands at once.
pub type SharedSession = Arc<StdMutex<Session>>;

struct PooledSession {
    session: SharedSession,
    created_at: Instant,
    last_used: Instant,
}

impl PooledSession {
    /// Probe transport liveness with a keepalive packet. Cheap, and the
    /// only way libssh2 surfaces a dead transport without running a
    /// command.
    fn is_live(&self) -> bool {
        match self.session.try_lock() {
            Ok(session) => session.keepalive_send().is_ok(),
            // Busy means some command is mid-flight on it, so it is live
            // but not reusable right now.
            Err(_) => false,
        }
    }
}

/// Statistics about the session pool
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Number of hosts with at least one pooled session
    pub hosts: usize,
    /// Total pooled sessions across all hosts
    pub total_sessions: usize,
    /// Sessions created since the pool was built
    pub created: u64,
    /// Sessions evicted or discarded as dead since the pool was built
    pub discarded: u64,
}

/// Per-host bounded pool of authenticated ssh2 sessions
#[derive(Debug)]
pub struct SessionPool {
    config: PoolConfig,
    pools: Mutex<HashMap<String, Vec<PooledSession>>>,
    stats: Mutex<PoolStats>,
}

impl std::fmt::Debug for PooledSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSession")
            .field("created_at", &self.created_at)
            .field("last_used", &self.last_used)
            .finish()
    }
}

impl SessionPool {
    /// Create a new session pool
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            pools: Mutex::new(HashMap::new()),
            stats: Mutex::new(PoolStats::default()),
        }
    }

    /// Acquire a live session for the given host.
    ///
    /// Reuses a pooled session when its transport is still active,
    /// otherwise authenticates a new one (public key first, password
    /// fallback). Authentication failure is a connection error the caller
    /// treats as fatal for the current command; there is no retry here.
    pub async fn acquire(&self, server: &ServerDescriptor) -> Result<SharedSession> {
        if let Some(session) = self.try_reuse(&server.address).await {
            trace!("Reusing pooled session for {}", server.address);
            return Ok(session);
        }

        let descriptor = server.clone();
        let timeout = Duration::from_secs(self.config.connect_timeout_secs);
        let session = tokio::task::spawn_blocking(move || connect(&descriptor, timeout))
            .await
            .map_err(|e| Error::other(format!("Connect task failed: {}", e)))??;

        debug!("Authenticated new session for {}", server.address);
        let shared: SharedSession = Arc::new(StdMutex::new(session));

        let mut pools = self.pools.lock().await;
        let pool = pools.entry(server.address.clone()).or_default();
        pool.push(PooledSession {
            session: Arc::clone(&shared),
            created_at: Instant::now(),
            last_used: Instant::now(),
        });

        let mut evicted = 0u64;
        while pool.len() > self.config.max_sessions_per_host {
            // FIFO: the front entry is the oldest
            let old = pool.remove(0);
            trace!(
                "Evicting session for {} created {:?} ago",
                server.address,
                old.created_at.elapsed()
            );
            evicted += 1;
        }
        drop(pools);

        let mut stats = self.stats.lock().await;
        stats.created += 1;
        stats.discarded += evicted;

        Ok(shared)
    }

    /// Scan a host's pool for a live session; discard dead entries and
    /// move a hit to the most-recently-used position.
    async fn try_reuse(&self, address: &str) -> Option<SharedSession> {
        let mut pools = self.pools.lock().await;
        let pool = pools.get_mut(address)?;

        let mut discarded = 0u64;
        let mut found: Option<SharedSession> = None;
        let mut index = 0;
        while index < pool.len() {
            if pool[index].is_live() {
                let mut entry = pool.remove(index);
                entry.last_used = Instant::now();
                found = Some(Arc::clone(&entry.session));
                pool.push(entry);
                break;
            }
            // Removal shifts the next candidate into this index
            pool.remove(index);
            discarded += 1;
        }

        if discarded > 0 {
            warn!("Discarded {} dead session(s) for {}", discarded, address);
            drop(pools);
            self.stats.lock().await.discarded += discarded;
        }
        found
    }

    /// Drop every pooled session
    pub async fn clear(&self) {
        self.pools.lock().await.clear();
        debug!("Session pool cleared");
    }

    /// Snapshot of pool statistics
    pub async fn stats(&self) -> PoolStats {
        let pools = self.pools.lock().await;
        let mut stats = self.stats.lock().await.clone();
        stats.hosts = pools.len();
        stats.total_sessions = pools.values().map(Vec::len).sum();
        stats
    }
}

/// Resolve a host to socket address candidates. Hostnames yield every
/// address record; IP literals a single one.
fn resolve_candidates(address: &str, port: u16) -> Result<Vec<SocketAddr>> {
    let candidates: Vec<SocketAddr> = (address, port)
        .to_socket_addrs()
        .map_err(|e| Error::connection(address, format!("resolve {}: {}", address, e)))?
        .collect();
    if candidates.is_empty() {
        return Err(Error::connection(
            address,
            format!("no addresses for {}", address),
        ));
    }
    Ok(candidates)
}

/// Blocking connect + handshake + authenticate. Runs on the blocking pool.
/// Each resolved address gets its own connect attempt with the full
/// timeout; the first that answers wins.
fn connect(server: &ServerDescriptor, timeout: Duration) -> Result<Session> {
    let mut tcp = None;
    let mut last_error = None;
    for candidate in resolve_candidates(&server.address, server.port())? {
        match TcpStream::connect_timeout(&candidate, timeout) {
            Ok(stream) => {
                tcp = Some(stream);
                break;
            }
            Err(e) => {
                debug!("Connect to {} via {} failed: {}", server.address, candidate, e);
                last_error = Some(e);
            }
        }
    }
    let Some(tcp) = tcp else {
        return Err(Error::connection(
            &server.address,
            last_error.map_or_else(|| "connect failed".to_string(), |e| e.to_string()),
        ));
    };
    tcp.set_read_timeout(Some(timeout)).ok();
    tcp.set_write_timeout(Some(timeout)).ok();

    let mut session = Session::new()
        .map_err(|e| Error::connection(&server.address, format!("session init: {}", e)))?;
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .map_err(|e| Error::connection(&server.address, format!("handshake: {}", e)))?;

    authenticate(&session, server)?;

    if !session.authenticated() {
        return Err(Error::connection(
            &server.address,
            "authentication failed".to_string(),
        ));
    }
    session.set_keepalive(true, 30);
    Ok(session)
}

/// Public key first (explicit key file, then agent), then password.
fn authenticate(session: &Session, server: &ServerDescriptor) -> Result<()> {
    if let Some(key_path) = &server.key_path {
        if session
            .userauth_pubkey_file(&server.user, None, key_path, None)
            .is_ok()
        {
            return Ok(());
        }
        debug!(
            "Key file auth failed for {}@{}, trying fallbacks",
            server.user, server.address
        );
    }

    if session.userauth_agent(&server.user).is_ok() {
        return Ok(());
    }

    if let Some(password) = &server.password {
        return session
            .userauth_password(&server.user, password)
            .map_err(|e| Error::connection(&server.address, format!("password auth: {}", e)));
    }

    Err(Error::connection(
        &server.address,
        "no authentication method succeeded",
    ))
}
