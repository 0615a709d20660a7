use log::{debug, info};
use shared::frame::decode_payload;
use shared::{
    read_frame, write_frame, ErrorKind, GroundHeightRequest, GroundHeightResult,
    LineOfSightRequest, MovementResult, MovementSnapshot, NearbyObject, PathRequest, PathResult,
    Point3D, ProtocolError, Request, Response, ServiceStatus, StepRequest,
};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::sleep;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("server closed the connection")]
    Closed,
    #[error("server error ({kind:?}): {message}")]
    Server { kind: ErrorKind, message: String },
    #[error("unexpected {0} response")]
    Unexpected(&'static str),
    #[error("server not ready after {0:?}")]
    Timeout(Duration),
}

impl ClientError {
    /// True for the "still initializing" rejection.
    pub fn is_not_ready(&self) -> bool {
        matches!(
            self,
            ClientError::Server {
                kind: ErrorKind::NotReady,
                ..
            }
        )
    }
}

fn response_name(response: &Response) -> &'static str {
    match response {
        Response::Path(_) => "path",
        Response::LineOfSight { .. } => "line_of_sight",
        Response::Step(_) => "step",
        Response::GroundHeight(_) => "ground_height",
        Response::Health(_) => "health",
        Response::Error { .. } => "error",
    }
}

/// One connection to the navigation server. Requests are answered in order.
pub struct NavClient<S = TcpStream> {
    stream: S,
}

impl NavClient<TcpStream> {
    pub async fn connect(addr: &str) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        info!("Connected to navigation server at {}", addr);
        Ok(Self { stream })
    }
}

impl<S> NavClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn from_stream(stream: S) -> Self {
        Self { stream }
    }

    /// Sends one request and waits for its response, errors included.
    pub async fn request(&mut self, request: &Request) -> Result<Response, ClientError> {
        debug!("Sending {} request", request.kind_name());
        write_frame(&mut self.stream, request).await?;
        let body = read_frame(&mut self.stream)
            .await?
            .ok_or(ClientError::Closed)?;
        Ok(decode_payload(&body)?)
    }

    /// Like [`request`](Self::request) but turns `Response::Error` into `Err`.
    async fn call(&mut self, request: &Request) -> Result<Response, ClientError> {
        match self.request(request).await? {
            Response::Error { kind, message } => Err(ClientError::Server { kind, message }),
            response => Ok(response),
        }
    }

    pub async fn find_path(
        &mut self,
        map_id: u32,
        start: Point3D,
        end: Point3D,
        smooth: bool,
    ) -> Result<PathResult, ClientError> {
        let request = Request::FindPath(PathRequest {
            map_id,
            start,
            end,
            smooth,
        });
        match self.call(&request).await? {
            Response::Path(path) => Ok(path),
            other => Err(ClientError::Unexpected(response_name(&other))),
        }
    }

    pub async fn line_of_sight(
        &mut self,
        map_id: u32,
        from: Point3D,
        to: Point3D,
    ) -> Result<bool, ClientError> {
        let request = Request::LineOfSight(LineOfSightRequest { map_id, from, to });
        match self.call(&request).await? {
            Response::LineOfSight { visible } => Ok(visible),
            other => Err(ClientError::Unexpected(response_name(&other))),
        }
    }

    pub async fn step(
        &mut self,
        snapshot: MovementSnapshot,
        nearby_objects: Vec<NearbyObject>,
        delta_time: f32,
    ) -> Result<MovementResult, ClientError> {
        let request = Request::Step(StepRequest {
            snapshot,
            nearby_objects,
            delta_time,
        });
        match self.call(&request).await? {
            Response::Step(result) => Ok(result),
            other => Err(ClientError::Unexpected(response_name(&other))),
        }
    }

    pub async fn ground_height(
        &mut self,
        map_id: u32,
        position: Point3D,
        max_search_distance: f32,
    ) -> Result<GroundHeightResult, ClientError> {
        let request = Request::GroundHeight(GroundHeightRequest {
            map_id,
            position,
            max_search_distance,
        });
        match self.call(&request).await? {
            Response::GroundHeight(result) => Ok(result),
            other => Err(ClientError::Unexpected(response_name(&other))),
        }
    }

    pub async fn health(&mut self) -> Result<ServiceStatus, ClientError> {
        match self.call(&Request::Health).await? {
            Response::Health(status) => Ok(status),
            other => Err(ClientError::Unexpected(response_name(&other))),
        }
    }

    /// Polls the health probe until the server reports ready.
    pub async fn wait_until_ready(&mut self, timeout: Duration) -> Result<ServiceStatus, ClientError> {
        let deadline = Instant::now() + timeout;
        loop {
            let status = self.health().await?;
            if status.is_ready {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                return Err(ClientError::Timeout(timeout));
            }
            debug!("Server still loading: {}", status.message);
            sleep(Duration::from_millis(50)).await;
        }
    }
}
