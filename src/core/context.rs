//! Connection context handed from the accept path to the control loop.

use std::{io, net::SocketAddr};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsAcceptor;

/// Object-safe duplex byte stream
pub trait Io: AsyncRead + AsyncWrite + Send + Sync + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Sync + Unpin> Io for T {}

/// A boxed duplex stream, the engine's uniform connection type
pub type BoxedIo = Box<dyn Io>;

/// A client connection as produced by the accept/wrap path.
///
/// TLS termination is deferred: the wrap task attaches the acceptor and the
/// per-connection handler completes the handshake after admission, so a
/// failed handshake behaves like any other per-connection relay error.
pub enum ClientConn {
    /// Plain stream, possibly wrapped to replay sniffed ClientHello bytes
    Plain(BoxedIo),
    /// Stream awaiting TLS server handshake
    TlsPending { io: BoxedIo, acceptor: TlsAcceptor },
}

impl ClientConn {
    /// Complete any pending TLS handshake and return the established stream
    pub async fn establish(self) -> io::Result<BoxedIo> {
        match self {
            ClientConn::Plain(io) => Ok(io),
            ClientConn::TlsPending { io, acceptor } => {
                let tls = acceptor.accept(io).await?;
                Ok(Box::new(tls))
            }
        }
    }

    /// Whether a TLS handshake is still outstanding
    pub fn is_tls_pending(&self) -> bool {
        matches!(self, ClientConn::TlsPending { .. })
    }
}

/// Context for one accepted connection, consumed by the control loop and
/// passed to the scheduler for backend selection.
pub struct TcpContext {
    /// Hostname extracted from the ClientHello `server_name` extension, if
    /// SNI sniffing is enabled and succeeded
    pub hostname: Option<String>,
    /// Remote address of the client, also the client-table key
    pub peer_addr: SocketAddr,
    /// The (possibly wrapped) client connection
    pub conn: ClientConn,
}

impl TcpContext {
    /// Client-table key for this connection
    pub fn key(&self) -> String {
        self.peer_addr.to_string()
    }
}
