//! Server network layer: framed request/response over TCP.
//!
//! Each connection gets its own task that reads one frame, runs the router on
//! the blocking pool and writes the answer back before reading the next
//! frame. A slow request only ever holds up its own connection.

use crate::router::Router;
use log::{debug, error, info, warn};
use shared::frame::{decode_payload, encode_frame};
use shared::{read_frame, ErrorKind, ProtocolError, Request, Response};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub struct Server {
    listener: TcpListener,
    router: Arc<Router>,
}

impl Server {
    pub async fn bind(addr: &str, router: Arc<Router>) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(addr).await?;
        info!("Navigation server listening on {}", listener.local_addr()?);
        Ok(Server { listener, router })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until the task is dropped.
    pub async fn run(self) {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    continue;
                }
            };
            let router = Arc::clone(&self.router);

            tokio::spawn(async move {
                debug!("Client {} connected", peer);
                match handle_connection(stream, router).await {
                    Ok(served) => debug!("Client {} disconnected after {} requests", peer, served),
                    Err(e) => warn!("Connection with {} closed: {}", peer, e),
                }
            });
        }
    }
}

/// Serves one connection until the peer hangs up. Returns the number of
/// requests answered.
pub async fn handle_connection(
    mut stream: TcpStream,
    router: Arc<Router>,
) -> Result<usize, ProtocolError> {
    stream.set_nodelay(true)?;
    let mut served = 0;

    loop {
        let body = match read_frame(&mut stream).await {
            Ok(Some(body)) => body,
            Ok(None) => return Ok(served),
            Err(e @ (ProtocolError::FrameTooLarge(_) | ProtocolError::EmptyFrame)) => {
                // framing is lost, answer once and hang up
                let response = Response::error(ErrorKind::Validation, e.to_string());
                send_response(&mut stream, &response).await?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let response = match decode_payload::<Request>(&body) {
            Ok(request) => dispatch(&router, request).await,
            Err(e) => {
                debug!("Undecodable request: {}", e);
                Response::error(ErrorKind::Validation, format!("malformed request: {}", e))
            }
        };

        send_response(&mut stream, &response).await?;
        served += 1;
    }
}

/// Writes one response frame. A response too large to frame is replaced by
/// an `Internal` error so the peer still gets exactly one answer.
pub async fn send_response<W>(writer: &mut W, response: &Response) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let frame = match encode_frame(response) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("Could not frame response: {}", e);
            encode_frame(&Response::error(
                ErrorKind::Internal,
                format!("response could not be encoded: {}", e),
            ))?
        }
    };
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

async fn dispatch(router: &Arc<Router>, request: Request) -> Response {
    let router = Arc::clone(router);
    let kind = request.kind_name();
    match tokio::task::spawn_blocking(move || router.handle_request(request)).await {
        Ok(response) => response,
        Err(e) => {
            error!("Worker for {} request failed: {}", kind, e);
            Response::error(
                ErrorKind::Internal,
                format!("internal error while handling {}", kind),
            )
        }
    }
}
