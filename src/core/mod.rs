pub mod access;
pub mod context;
pub mod relay;
pub mod server;
pub mod sni;
pub mod tls;

pub use access::AccessFilter;
pub use context::{BoxedIo, ClientConn, TcpContext};
pub use server::{Server, ServerError};
