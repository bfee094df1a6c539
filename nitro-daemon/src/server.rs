//! Unix socket server
//!
//! One listener per daemon. Client connection tasks only parse and forward:
//! every request crosses one mpsc channel into the daemon's single control
//! task, which owns the hardware state and applies requests strictly in
//! arrival order. The server enforces the outer limits - connection count,
//! message size, read/write timeouts, per-UID rate - and logs peer
//! credentials for every connection. Who may connect at all is deployment
//! policy (socket ownership, polkit on the caller side), not daemon logic.

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::timeout;
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, trace, warn};

use nitro_error::NitroError;
use nitro_protocol::{RequestEnvelope, RequestKind, Response, ResponseEnvelope, MAX_MESSAGE_SIZE};

/// Maximum concurrent client connections
const MAX_CONNECTIONS: usize = 16;

/// Read timeout per message
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Write timeout per message
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum requests per client per window
const RATE_LIMIT_REQUESTS: u32 = 600;

/// Rate limit window duration
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(10);

/// Socket permissions; peer credentials are audited, admission is policy
const SOCKET_MODE: u32 = 0o666;

/// Global connection counter
static ACTIVE_CONNECTIONS: AtomicUsize = AtomicUsize::new(0);

/// One request handed to the control task, with its reply slot
pub struct Command<R> {
    pub request: R,
    pub reply: oneshot::Sender<Response>,
}

/// Completes on SIGINT or SIGTERM
///
/// Every listener gets its own registration, so the server loop and the
/// control task can both wait on it independently.
pub async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let ctrl_c = tokio::signal::ctrl_c();
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            warn!("Failed to register SIGTERM handler: {}", e);
            let _ = ctrl_c.await;
        }
    }
}

/// Read one newline-terminated message without buffering past `max_len`
async fn read_line_bounded<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    out: &mut Vec<u8>,
    max_len: usize,
) -> std::io::Result<usize> {
    out.clear();

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(0);
        }

        let (take_len, found_newline) = match available.iter().position(|b| *b == b'\n') {
            Some(pos) => (pos + 1, true),
            None => (available.len(), false),
        };

        let remaining = max_len.saturating_sub(out.len());
        if take_len > remaining {
            // Consume what fits so the connection makes forward progress,
            // then reject the oversized message.
            let consume_len = remaining.min(available.len());
            reader.consume(consume_len);
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "Message too large",
            ));
        }

        out.extend_from_slice(&available[..take_len]);
        reader.consume(take_len);

        if found_newline {
            return Ok(out.len());
        }
    }
}

/// Fixed-window rate limiter keyed by client UID
struct RateLimiter {
    clients: HashMap<u32, ClientState>,
}

struct ClientState {
    request_count: u32,
    window_start: Instant,
}

impl RateLimiter {
    fn new() -> Self {
        Self {
            clients: HashMap::new(),
        }
    }

    /// Returns true if the request is allowed
    fn check_and_increment(&mut self, uid: u32) -> bool {
        let now = Instant::now();

        let state = self.clients.entry(uid).or_insert(ClientState {
            request_count: 0,
            window_start: now,
        });

        if now.duration_since(state.window_start) > RATE_LIMIT_WINDOW {
            state.request_count = 0;
            state.window_start = now;
        }

        if state.request_count >= RATE_LIMIT_REQUESTS {
            return false;
        }

        state.request_count += 1;
        true
    }

    /// Drop expired entries to bound memory
    fn cleanup(&mut self) {
        let now = Instant::now();
        self.clients
            .retain(|_, state| now.duration_since(state.window_start) < RATE_LIMIT_WINDOW * 2);
    }
}

/// Client credentials from the Unix socket peer
#[derive(Debug, Clone, Copy)]
struct PeerCredentials {
    uid: u32,
    gid: u32,
    pid: i32,
}

/// Get peer credentials (uid, gid, pid) via SO_PEERCRED
fn get_peer_credentials(stream: &UnixStream) -> Option<PeerCredentials> {
    use std::os::unix::io::AsRawFd;

    let fd = stream.as_raw_fd();

    // SAFETY: ucred is a plain C struct; zeroing it is a valid initial state.
    let mut cred: libc::ucred = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

    // SAFETY: fd is a valid socket descriptor, cred and len describe a
    // properly sized ucred buffer.
    let result = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_PEERCRED,
            &mut cred as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };

    if result == 0 {
        Some(PeerCredentials {
            uid: cred.uid,
            gid: cred.gid,
            pid: cred.pid,
        })
    } else {
        None
    }
}

/// Run the socket server until a termination signal arrives
///
/// Requests parsed from client connections are forwarded through `tx`; the
/// receiving control task owns all hardware state.
pub async fn run_server<R>(
    socket_path: &str,
    tx: mpsc::Sender<Command<R>>,
) -> Result<(), Box<dyn std::error::Error>>
where
    R: DeserializeOwned + RequestKind + Send + 'static,
{
    let path = Path::new(socket_path);

    // Remove a previous socket, but never follow a symlink
    if path.exists() {
        let metadata = path.symlink_metadata()?;
        if metadata.file_type().is_symlink() {
            return Err("Refusing symlinked socket path".into());
        }
        std::fs::remove_file(path)?;
        debug!("Removed existing socket file");
    }

    let listener = UnixListener::bind(socket_path)?;
    std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(SOCKET_MODE))?;

    info!("Listening on {} (mode {:o})", socket_path, SOCKET_MODE);
    info!(
        "Limits: max_conn={}, max_msg={}, rate_limit={}/{:?}",
        MAX_CONNECTIONS, MAX_MESSAGE_SIZE, RATE_LIMIT_REQUESTS, RATE_LIMIT_WINDOW
    );

    let rate_limiter = Arc::new(Mutex::new(RateLimiter::new()));

    let rate_limiter_cleanup = rate_limiter.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(RATE_LIMIT_WINDOW).await;
            rate_limiter_cleanup.lock().await.cleanup();
        }
    });

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let current = ACTIVE_CONNECTIONS.load(Ordering::SeqCst);
                        if current >= MAX_CONNECTIONS {
                            warn!("Connection limit reached ({}), rejecting new connection", current);
                            drop(stream);
                            continue;
                        }

                        ACTIVE_CONNECTIONS.fetch_add(1, Ordering::SeqCst);
                        let rate_limiter = rate_limiter.clone();
                        let tx = tx.clone();

                        tokio::spawn(async move {
                            handle_client(stream, rate_limiter, tx).await;
                            ACTIVE_CONNECTIONS.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    let _ = std::fs::remove_file(socket_path);
    info!("Server stopped");

    Ok(())
}

/// Handle a single client connection
async fn handle_client<R>(
    stream: UnixStream,
    rate_limiter: Arc<Mutex<RateLimiter>>,
    tx: mpsc::Sender<Command<R>>,
) where
    R: DeserializeOwned + RequestKind + Send + 'static,
{
    let cred = match get_peer_credentials(&stream) {
        Some(c) => c,
        None => {
            error!("Failed to get peer credentials, rejecting connection");
            return;
        }
    };

    info!(
        "Connection from uid={}, gid={}, pid={}",
        cred.uid, cred.gid, cred.pid
    );

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line: Vec<u8> = Vec::with_capacity(MAX_MESSAGE_SIZE);
    let mut request_count: u64 = 0;

    loop {
        let read_result = timeout(
            READ_TIMEOUT,
            read_line_bounded(&mut reader, &mut line, MAX_MESSAGE_SIZE),
        )
        .await;

        match read_result {
            Ok(Ok(0)) => {
                debug!(
                    "Client disconnected: uid={}, pid={}, requests={}",
                    cred.uid, cred.pid, request_count
                );
                break;
            }
            Ok(Ok(n)) => {
                {
                    let mut limiter = rate_limiter.lock().await;
                    if !limiter.check_and_increment(cred.uid) {
                        warn!("Rate limit exceeded for uid={}, pid={}", cred.uid, cred.pid);
                        let envelope =
                            ResponseEnvelope::new(0, Response::error("Rate limit exceeded"));
                        let _ = send_response(&mut writer, &envelope).await;
                        continue;
                    }
                }

                request_count += 1;
                trace!("Request #{} from uid={}: {} bytes", request_count, cred.uid, n);

                let envelope = match parse_request::<R>(&line) {
                    Ok(e) => e,
                    Err(msg) => {
                        debug!("Rejected request from uid={}: {}", cred.uid, msg);
                        let envelope = ResponseEnvelope::new(0, Response::error(msg));
                        let _ = send_response(&mut writer, &envelope).await;
                        break;
                    }
                };

                let request_id = envelope.id;
                debug!(
                    "Processing {} (id={}) from uid={}, pid={}",
                    envelope.request.type_name(),
                    request_id,
                    cred.uid,
                    cred.pid
                );

                let (reply_tx, reply_rx) = oneshot::channel();
                let command = Command {
                    request: envelope.request,
                    reply: reply_tx,
                };

                let response = if tx.send(command).await.is_err() {
                    Response::error("Daemon is shutting down")
                } else {
                    match reply_rx.await {
                        Ok(response) => response,
                        Err(_) => Response::error("Daemon is shutting down"),
                    }
                };

                if send_response(&mut writer, &ResponseEnvelope::new(request_id, response))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Ok(Err(e)) => {
                if e.kind() == std::io::ErrorKind::InvalidData {
                    warn!(
                        "Message too large (>{} bytes) from uid={}, pid={}",
                        MAX_MESSAGE_SIZE, cred.uid, cred.pid
                    );
                    let envelope = ResponseEnvelope::new(
                        0,
                        Response::error(NitroError::MessageTooLarge {
                            max_size: MAX_MESSAGE_SIZE,
                        }),
                    );
                    let _ = send_response(&mut writer, &envelope).await;
                } else {
                    error!("Read error from uid={}, pid={}: {}", cred.uid, cred.pid, e);
                }
                break;
            }
            Err(_) => {
                debug!("Read timeout for uid={}, pid={}", cred.uid, cred.pid);
                let envelope = ResponseEnvelope::new(0, Response::error("Read timeout"));
                let _ = send_response(&mut writer, &envelope).await;
                break;
            }
        }
    }
}

fn parse_request<R: DeserializeOwned>(line: &[u8]) -> Result<RequestEnvelope<R>, NitroError> {
    let text = std::str::from_utf8(line)
        .map_err(|_| NitroError::IpcProtocol("Invalid request encoding".into()))?;
    Ok(serde_json::from_str(text.trim())?)
}

/// Send one response envelope with timeout
async fn send_response(
    writer: &mut tokio::net::unix::OwnedWriteHalf,
    envelope: &ResponseEnvelope,
) -> Result<(), ()> {
    let response_json = serde_json::to_string(envelope).unwrap_or_else(|_| {
        r#"{"id":0,"status":"error","message":"Serialization error"}"#.to_string()
    });

    let write_result = timeout(WRITE_TIMEOUT, async {
        writer.write_all(response_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        Ok::<_, std::io::Error>(())
    })
    .await;

    match write_result {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => {
            error!("Write error: {}", e);
            Err(())
        }
        Err(_) => {
            error!("Write timeout");
            Err(())
        }
    }
}
