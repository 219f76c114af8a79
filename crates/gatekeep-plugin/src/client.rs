//! Host side of the plugin protocol.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use gatekeep_session::SessionBackend;
use serde_json::{Map, Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::error::{PluginError, Result};
use crate::protocol::{
    GetResult, JsonRpcRequest, JsonRpcResponse, MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE,
    check_handshake, method,
};
use crate::transport::{read_message, write_message};

/// Default time a plugin has to print its handshake line.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time a plugin has to answer `close`.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Time a plugin has to exit after `close` before it is killed.
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// How to launch a plugin executable.
#[derive(Debug, Clone)]
pub struct PluginConfig {
    /// Path to the executable.
    pub path: PathBuf,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
    /// Deadline for the handshake line.
    pub handshake_timeout: Duration,
    /// Deadline for the plugin's answer to `close`.
    pub close_timeout: Duration,
}

impl PluginConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            args: Vec::new(),
            env: Vec::new(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }
}

type BoxedReader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct Connection {
    reader: BoxedReader,
    writer: BoxedWriter,
}

impl Connection {
    async fn exchange(&mut self, request: &JsonRpcRequest) -> Result<JsonRpcResponse> {
        write_message(&mut self.writer, request).await?;
        loop {
            let Some(response) = read_message::<_, JsonRpcResponse>(&mut self.reader).await?
            else {
                return Err(PluginError::ConnectionClosed);
            };
            if response.id == request.id {
                return Ok(response);
            }
            tracing::warn!(
                expected = request.id,
                got = response.id,
                "discarding unmatched plugin response"
            );
        }
    }
}

/// A [`SessionBackend`] served by a plugin process.
pub struct PluginBackend {
    name: String,
    conn: Arc<Mutex<Connection>>,
    child: Mutex<Option<Child>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    close_timeout: Duration,
}

impl std::fmt::Debug for PluginBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginBackend")
            .field("name", &self.name)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl PluginBackend {
    /// Start the plugin and wait for its handshake.
    ///
    /// The child gets the magic cookie in its environment and inherits stderr. If the
    /// handshake line is missing, late or wrong, the child is killed.
    pub async fn spawn(config: PluginConfig) -> Result<Self> {
        let name = plugin_name(&config.path);

        let mut cmd = Command::new(&config.path);
        cmd.args(&config.args)
            .envs(config.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env(MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            PluginError::spawn_failed(format!("failed to spawn '{}': {}", config.path.display(), e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PluginError::spawn_failed("failed to capture stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PluginError::spawn_failed("failed to capture stdout"))?;

        let mut reader: BoxedReader =
            BufReader::new(Box::new(stdout) as Box<dyn AsyncRead + Send + Unpin>);
        if let Err(e) = read_handshake(&mut reader, config.handshake_timeout).await {
            tracing::warn!(plugin = %name, error = %e, "session plugin handshake failed");
            let _ = child.kill().await;
            return Err(e);
        }

        tracing::info!(plugin = %name, pid = ?child.id(), "session plugin started");

        let backend = Self::from_parts(name, reader, Box::new(stdin))
            .with_close_timeout(config.close_timeout);
        *backend.child.lock().await = Some(child);
        Ok(backend)
    }

    /// Talk to a plugin over already-connected streams. No handshake is performed.
    pub fn from_streams<R, W>(name: impl Into<String>, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::from_parts(
            name.into(),
            BufReader::new(Box::new(reader) as Box<dyn AsyncRead + Send + Unpin>),
            Box::new(writer),
        )
    }

    fn from_parts(name: String, reader: BoxedReader, writer: BoxedWriter) -> Self {
        Self {
            name,
            conn: Arc::new(Mutex::new(Connection { reader, writer })),
            child: Mutex::new(None),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }

    /// Bound the wait for the plugin's answer to `close`.
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Plugin name, taken from the executable's file name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// OS process ID of the plugin, while it is running.
    pub async fn pid(&self) -> Option<u32> {
        self.child.lock().await.as_ref().and_then(|c| c.id())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send one request and wait for its response.
    async fn call(&self, method: &'static str, params: Option<Value>) -> Result<Value> {
        if self.is_closed() {
            return Err(PluginError::ConnectionClosed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(id, method, params);
        let conn = self.conn.clone();

        // Detached so a cancelled caller cannot leave a half-read frame on the pipe.
        let exchange = tokio::spawn(async move {
            let mut conn = conn.lock().await;
            conn.exchange(&request).await
        });

        let response = exchange
            .await
            .map_err(|e| PluginError::transport(format!("plugin call task failed: {}", e)))??;
        Ok(response.into_result()?)
    }

    async fn reap(&self) {
        let Some(mut child) = self.child.lock().await.take() else {
            return;
        };
        match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(plugin = %self.name, %status, "session plugin exited");
            }
            _ => {
                tracing::warn!(plugin = %self.name, "session plugin did not exit, killing");
                let _ = child.kill().await;
            }
        }
    }
}

async fn read_handshake(reader: &mut BoxedReader, timeout: Duration) -> Result<()> {
    let mut line = String::new();
    let read = tokio::time::timeout(timeout, reader.read_line(&mut line))
        .await
        .map_err(|_| PluginError::handshake(format!("no handshake within {:?}", timeout)))??;
    if read == 0 {
        return Err(PluginError::handshake("plugin exited before handshake"));
    }
    check_handshake(&line)
}

fn plugin_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[async_trait]
impl SessionBackend for PluginBackend {
    async fn init(&self, settings: &Map<String, Value>) -> gatekeep_session::Result<()> {
        self.call(method::INIT, Some(json!({ "settings": settings })))
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> gatekeep_session::Result<Option<String>> {
        let value = self.call(method::GET, Some(json!({ "key": key }))).await?;
        let result: GetResult = serde_json::from_value(value)?;
        Ok(result.value)
    }

    async fn put(&self, key: &str, value: &str) -> gatekeep_session::Result<()> {
        self.call(method::PUT, Some(json!({ "key": key, "value": value })))
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> gatekeep_session::Result<()> {
        self.call(method::DELETE, Some(json!({ "key": key }))).await?;
        Ok(())
    }

    async fn close(&self) -> gatekeep_session::Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        // The child is reaped whether or not the plugin answers.
        let result = match tokio::time::timeout(self.close_timeout, self.call(method::CLOSE, None))
            .await
        {
            Ok(result) => result.map(|_| ()),
            Err(_) => {
                tracing::warn!(plugin = %self.name, timeout = ?self.close_timeout, "session plugin did not answer close");
                Err(PluginError::Timeout)
            }
        };
        self.closed.store(true, Ordering::SeqCst);
        self.reap().await;
        result?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::serve_io;
    use gatekeep_session::MemoryBackend;

    fn in_process() -> (PluginBackend, tokio::task::JoinHandle<Result<()>>) {
        let (host, plugin) = tokio::io::duplex(64 * 1024);
        let (plugin_read, plugin_write) = tokio::io::split(plugin);
        let server = tokio::spawn(async move {
            let backend = MemoryBackend::default();
            serve_io(&backend, BufReader::new(plugin_read), plugin_write).await
        });
        let (host_read, host_write) = tokio::io::split(host);
        (
            PluginBackend::from_streams("in-process", host_read, host_write),
            server,
        )
    }

    #[tokio::test]
    async fn test_round_trip_in_process() {
        let (backend, server) = in_process();
        backend.init(&Map::new()).await.unwrap();

        assert_eq!(backend.get("session_X").await.unwrap(), None);
        backend.put("session_X", r#"{"a":1}"#).await.unwrap();
        assert_eq!(
            backend.get("session_X").await.unwrap().as_deref(),
            Some(r#"{"a":1}"#)
        );
        backend.delete("session_X").await.unwrap();
        assert_eq!(backend.get("session_X").await.unwrap(), None);

        backend.close().await.unwrap();
        assert!(backend.is_closed());
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_calls_after_close_fail() {
        let (backend, _server) = in_process();
        backend.close().await.unwrap();
        backend.close().await.unwrap();
        assert!(backend.get("k").await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_calls_are_serialised() {
        let (backend, _server) = in_process();
        let backend = Arc::new(backend);
        backend.init(&Map::new()).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..16 {
            let backend = backend.clone();
            tasks.push(tokio::spawn(async move {
                let key = format!("session_{}", i);
                backend.put(&key, &i.to_string()).await.unwrap();
                backend.get(&key).await.unwrap()
            }));
        }
        for (i, task) in tasks.into_iter().enumerate() {
            assert_eq!(task.await.unwrap(), Some(i.to_string()));
        }
    }

    #[tokio::test]
    async fn test_close_gives_up_on_silent_plugin() {
        let (host, plugin) = tokio::io::duplex(64 * 1024);
        let (host_read, host_write) = tokio::io::split(host);
        let backend = PluginBackend::from_streams("silent", host_read, host_write)
            .with_close_timeout(Duration::from_millis(200));

        let closed = tokio::time::timeout(Duration::from_secs(5), backend.close()).await;
        let err = closed.expect("close returned").unwrap_err();
        assert!(matches!(err, gatekeep_session::SessionError::Backend(ref m) if m.contains("timed out")));
        assert!(backend.is_closed());
        assert!(backend.get("k").await.is_err());
        drop(plugin);
    }

    #[test]
    fn test_plugin_name() {
        assert_eq!(plugin_name(Path::new("/opt/oidc-plugin/redis")), "redis");
    }
}
