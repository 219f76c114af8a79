//! Plugin side of the protocol.
//!
//! A plugin binary wraps its backend and hands it to [`serve`]:
//!
//! ```no_run
//! use gatekeep_session::MemoryBackend;
//!
//! #[tokio::main]
//! async fn main() -> gatekeep_plugin::Result<()> {
//!     gatekeep_plugin::serve(MemoryBackend::default()).await
//! }
//! ```

use gatekeep_session::SessionBackend;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::{PluginError, Result};
use crate::protocol::{
    InitParams, JsonRpcError, JsonRpcRequest, JsonRpcResponse, KeyParams, MAGIC_COOKIE_KEY,
    MAGIC_COOKIE_VALUE, PutParams, handshake_line, method,
};
use crate::transport::{read_message, write_message};

/// Serve `backend` over stdin/stdout until the host sends `close` or hangs up.
///
/// Refuses to run unless launched by a host that set the magic cookie.
pub async fn serve<B>(backend: B) -> Result<()>
where
    B: SessionBackend,
{
    if std::env::var(MAGIC_COOKIE_KEY).ok().as_deref() != Some(MAGIC_COOKIE_VALUE) {
        return Err(PluginError::handshake(
            "this binary is a gatekeep session plugin and is not meant to be run directly",
        ));
    }

    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(format!("{}\n", handshake_line()).as_bytes())
        .await?;
    stdout.flush().await?;

    serve_io(&backend, BufReader::new(tokio::io::stdin()), stdout).await
}

/// Serve `backend` over arbitrary streams. No handshake is written.
pub async fn serve_io<B, R, W>(backend: &B, mut reader: R, mut writer: W) -> Result<()>
where
    B: SessionBackend + ?Sized,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    while let Some(request) = read_message::<_, JsonRpcRequest>(&mut reader).await? {
        let closing = request.method == method::CLOSE;
        let id = request.id;
        let response = match handle(backend, &request.method, request.params).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::failure(id, error),
        };
        write_message(&mut writer, &response).await?;
        if closing {
            break;
        }
    }
    Ok(())
}

async fn handle<B>(
    backend: &B,
    name: &str,
    params: Option<Value>,
) -> std::result::Result<Value, JsonRpcError>
where
    B: SessionBackend + ?Sized,
{
    match name {
        method::INIT => {
            let params: InitParams = parse(params)?;
            backend.init(&params.settings).await.map_err(backend_error)?;
            Ok(Value::Null)
        }
        method::GET => {
            let params: KeyParams = parse(params)?;
            let value = backend.get(&params.key).await.map_err(backend_error)?;
            Ok(json!({ "value": value }))
        }
        method::PUT => {
            let params: PutParams = parse(params)?;
            backend
                .put(&params.key, &params.value)
                .await
                .map_err(backend_error)?;
            Ok(Value::Null)
        }
        method::DELETE => {
            let params: KeyParams = parse(params)?;
            backend.delete(&params.key).await.map_err(backend_error)?;
            Ok(Value::Null)
        }
        method::CLOSE => {
            backend.close().await.map_err(backend_error)?;
            Ok(Value::Null)
        }
        other => Err(JsonRpcError::new(
            JsonRpcError::METHOD_NOT_FOUND,
            format!("unknown method {:?}", other),
        )),
    }
}

fn parse<T: DeserializeOwned>(params: Option<Value>) -> std::result::Result<T, JsonRpcError> {
    serde_json::from_value(params.unwrap_or_else(|| json!({})))
        .map_err(|e| JsonRpcError::new(JsonRpcError::INVALID_PARAMS, e.to_string()))
}

fn backend_error(err: gatekeep_session::SessionError) -> JsonRpcError {
    JsonRpcError::new(JsonRpcError::BACKEND_ERROR, err.to_string())
}
