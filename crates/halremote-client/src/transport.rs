//! Endpoint addressing and channel connection.
//!
//! Both halremote channels run the [`FrameCodec`] over a stream socket;
//! this module parses the endpoint uris and produces connected framed
//! streams. `tcp://host:port` and `ipc://path` endpoints are supported.

use std::path::PathBuf;

use halremote_proto::FrameCodec;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};
use tokio_util::codec::Framed;
use tracing::debug;

use crate::error::{Error, Result};

/// A parsed channel endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `tcp://host:port`
    Tcp(String),
    /// `ipc://path`
    Ipc(PathBuf),
}

impl Endpoint {
    /// Parse an endpoint uri.
    pub fn parse(uri: &str) -> Result<Self> {
        if let Some(addr) = uri.strip_prefix("tcp://") {
            if addr.is_empty() {
                return Err(Error::InvalidEndpoint(uri.to_string()));
            }
            return Ok(Endpoint::Tcp(addr.to_string()));
        }

        if let Some(path) = uri.strip_prefix("ipc://") {
            if path.is_empty() {
                return Err(Error::InvalidEndpoint(uri.to_string()));
            }
            return Ok(Endpoint::Ipc(PathBuf::from(path)));
        }

        Err(Error::InvalidEndpoint(uri.to_string()))
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "tcp://{addr}"),
            Endpoint::Ipc(path) => write!(f, "ipc://{}", path.display()),
        }
    }
}

/// Byte stream a channel can run over.
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Connection for T {}

/// A connected, framed channel.
pub type FramedConnection = Framed<Box<dyn Connection>, FrameCodec>;

/// Connect to an endpoint and wrap the stream in the frame codec.
pub async fn connect(endpoint: &Endpoint) -> Result<FramedConnection> {
    let stream: Box<dyn Connection> = match endpoint {
        Endpoint::Tcp(addr) => Box::new(TcpStream::connect(addr.as_str()).await?),
        Endpoint::Ipc(path) => Box::new(UnixStream::connect(path).await?),
    };

    debug!("connected to {endpoint}");
    Ok(Framed::new(stream, FrameCodec::new()))
}
