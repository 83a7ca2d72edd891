use std::future::Future;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Pluggable transport used by the agent to reach the router.
///
/// The agent treats the stream as an opaque byte pipe, so callers can wrap
/// TLS or a tunnel around it by providing their own connector.
pub trait Connector: Send + Sync + 'static {
    /// Byte stream this connector produces.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Open a fresh stream to the router.
    fn connect(&self) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

/// Plain TCP connector.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: SocketAddr,
}

impl TcpConnector {
    /// Connector dialing the given address.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }
}

impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self) -> io::Result<TcpStream> {
        let stream = TcpStream::connect(self.addr).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}
