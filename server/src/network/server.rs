//! HTTP/1.1 accept loop.

use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::{Body, Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use log::{info, warn};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use super::api::{dispatch, ApiRequest, AppState};
use super::error::ApiError;
use super::response::HttpResponse;

/// Largest request body accepted
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Pause after a failed accept (e.g. out of file descriptors)
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Serve connections until the listener fails
pub async fn serve(listener: TcpListener, state: Arc<AppState>) {
    if let Ok(addr) = listener.local_addr() {
        info!("Listening on http://{}", addr);
    }

    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Failed to accept connection: {}", e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };

        let io = TokioIo::new(stream);
        let state = state.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let state = state.clone();
                async move { Ok::<_, Infallible>(handle_request(&state, remote_addr, req).await) }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                warn!("Connection error from {}: {}", remote_addr, e);
            }
        });
    }
}

async fn handle_request(state: &AppState, remote_addr: SocketAddr, req: Request<Incoming>) -> HttpResponse {
    let (parts, body) = req.into_parts();

    let body = match read_body(body).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Rejected body from {}: {}", remote_addr, e);
            return e.into_response();
        }
    };

    let request = ApiRequest::new(
        parts.method,
        parts.uri.path(),
        parts.uri.query(),
        parts.headers,
        body,
    );
    dispatch(state, request).await
}

/// Collect a request body, refusing anything over `MAX_BODY_BYTES`
async fn read_body<B>(body: B) -> Result<Bytes, ApiError>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, MAX_BODY_BYTES).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => Err(ApiError::PayloadTooLarge(
            format!("Request body exceeds {} bytes", MAX_BODY_BYTES),
        )),
        Err(e) => Err(ApiError::Validation(format!("Unreadable request body: {}", e))),
    }
}
