//! SNI extraction from a TLS ClientHello without terminating TLS.
//!
//! [`sniff`] reads just enough of a new connection to parse the TLS record
//! header and the ClientHello, pulls the `server_name` extension (RFC 6066)
//! and hands back a [`SniffedStream`] whose reads replay the consumed bytes
//! before the rest of the underlying stream, so a TLS terminator or a
//! backend sees the exact ClientHello the client sent.

use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf},
    time::timeout,
};

/// TLS record type for handshake messages
const RECORD_TYPE_HANDSHAKE: u8 = 0x16;

/// Handshake message type for ClientHello
const HANDSHAKE_TYPE_CLIENT_HELLO: u8 = 0x01;

/// Extension number of server_name
const EXTENSION_SERVER_NAME: u16 = 0x0000;

/// Name type host_name inside the server_name extension
const NAME_TYPE_HOST_NAME: u8 = 0;

/// Maximum TLS plaintext record length (RFC 8446 §5.1)
const MAX_RECORD_LEN: usize = 16384;

/// Errors raised while sniffing a ClientHello
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SniError {
    #[error("Timed out waiting for ClientHello")]
    Timeout,

    #[error("Connection does not start with a TLS handshake record")]
    NotTls,

    #[error("Malformed ClientHello")]
    Malformed,

    #[error("ClientHello carries no server_name extension")]
    NoServerName,

    #[error("I/O error while reading ClientHello: {0}")]
    Io(#[from] io::Error),
}

/// A stream that replays previously consumed bytes before reading on.
#[derive(Debug)]
pub struct SniffedStream<S> {
    prefix: Vec<u8>,
    offset: usize,
    inner: S,
}

impl<S> SniffedStream<S> {
    fn new(prefix: Vec<u8>, inner: S) -> Self {
        Self {
            prefix,
            offset: 0,
            inner,
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for SniffedStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.offset < this.prefix.len() {
            let pending = &this.prefix[this.offset..];
            let n = pending.len().min(buf.remaining());
            buf.put_slice(&pending[..n]);
            this.offset += n;
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for SniffedStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Read the ClientHello from `conn` and extract the SNI hostname.
///
/// Returns the wrapped connection (replaying every byte consumed) and the
/// hostname. Fails if the timeout elapses, the handshake is malformed, or no
/// server_name extension is present; the caller closes the connection on
/// failure.
pub async fn sniff<S>(
    mut conn: S,
    read_timeout: Duration,
) -> Result<(SniffedStream<S>, String), SniError>
where
    S: AsyncRead + Unpin,
{
    let record = match timeout(read_timeout, read_handshake_record(&mut conn)).await {
        Ok(res) => res?,
        Err(_) => return Err(SniError::Timeout),
    };

    let hostname = parse_client_hello(&record[5..])?;
    Ok((SniffedStream::new(record, conn), hostname))
}

/// Read the 5-byte record header plus the full handshake record.
async fn read_handshake_record<S: AsyncRead + Unpin>(conn: &mut S) -> Result<Vec<u8>, SniError> {
    let mut header = [0u8; 5];
    conn.read_exact(&mut header)
        .await
        .map_err(|_| SniError::NotTls)?;

    if header[0] != RECORD_TYPE_HANDSHAKE {
        return Err(SniError::NotTls);
    }

    let record_len = u16::from_be_bytes([header[3], header[4]]) as usize;
    if record_len == 0 || record_len > MAX_RECORD_LEN {
        return Err(SniError::Malformed);
    }

    let mut record = vec![0u8; 5 + record_len];
    record[..5].copy_from_slice(&header);
    conn.read_exact(&mut record[5..])
        .await
        .map_err(|_| SniError::Malformed)?;

    Ok(record)
}

/// Minimal forward-only reader over the handshake bytes
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take_u8(&mut self) -> Result<u8, SniError> {
        let b = *self.data.get(self.pos).ok_or(SniError::Malformed)?;
        self.pos += 1;
        Ok(b)
    }

    fn take_u16(&mut self) -> Result<u16, SniError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], SniError> {
        let end = self.pos.checked_add(n).ok_or(SniError::Malformed)?;
        let slice = self.data.get(self.pos..end).ok_or(SniError::Malformed)?;
        self.pos = end;
        Ok(slice)
    }

    fn skip(&mut self, n: usize) -> Result<(), SniError> {
        self.take(n).map(|_| ())
    }
}

/// Walk the ClientHello structure up to the extensions and pull server_name.
fn parse_client_hello(handshake: &[u8]) -> Result<String, SniError> {
    let mut cur = Cursor::new(handshake);

    if cur.take_u8()? != HANDSHAKE_TYPE_CLIENT_HELLO {
        return Err(SniError::NotTls);
    }
    cur.skip(3)?; // handshake length
    cur.skip(2)?; // client version
    cur.skip(32)?; // random

    let session_id_len = cur.take_u8()? as usize;
    cur.skip(session_id_len)?;

    let cipher_suites_len = cur.take_u16()? as usize;
    cur.skip(cipher_suites_len)?;

    let compression_len = cur.take_u8()? as usize;
    cur.skip(compression_len)?;

    let extensions_len = cur.take_u16()? as usize;
    let extensions = Cursor::new(cur.take(extensions_len)?);
    parse_extensions(extensions)
}

fn parse_extensions(mut cur: Cursor<'_>) -> Result<String, SniError> {
    while cur.pos < cur.data.len() {
        let ext_type = cur.take_u16()?;
        let ext_len = cur.take_u16()? as usize;
        let body = cur.take(ext_len)?;

        if ext_type == EXTENSION_SERVER_NAME {
            return parse_server_name_list(Cursor::new(body));
        }
    }
    Err(SniError::NoServerName)
}

fn parse_server_name_list(mut cur: Cursor<'_>) -> Result<String, SniError> {
    let list_len = cur.take_u16()? as usize;
    let mut list = Cursor::new(cur.take(list_len)?);

    while list.pos < list.data.len() {
        let name_type = list.take_u8()?;
        let name_len = list.take_u16()? as usize;
        let name = list.take(name_len)?;

        if name_type == NAME_TYPE_HOST_NAME {
            let hostname = std::str::from_utf8(name).map_err(|_| SniError::Malformed)?;
            return Ok(hostname.to_string());
        }
    }
    Err(SniError::NoServerName)
}

#[cfg(test)]
mod tests {
    use tokio::io::{duplex, AsyncWriteExt};

    use super::*;

    /// Assemble a syntactically valid TLS 1.2 ClientHello record carrying
    /// the given SNI hostname.
    fn client_hello(host: &str) -> Vec<u8> {
        let name = host.as_bytes();

        let mut sni = Vec::new();
        sni.extend_from_slice(&((name.len() + 3) as u16).to_be_bytes());
        sni.push(NAME_TYPE_HOST_NAME);
        sni.extend_from_slice(&(name.len() as u16).to_be_bytes());
        sni.extend_from_slice(name);

        let mut extensions = Vec::new();
        extensions.extend_from_slice(&EXTENSION_SERVER_NAME.to_be_bytes());
        extensions.extend_from_slice(&(sni.len() as u16).to_be_bytes());
        extensions.extend_from_slice(&sni);

        let mut body = Vec::new();
        body.extend_from_slice(&[0x03, 0x03]); // client version
        body.extend_from_slice(&[0u8; 32]); // random
        body.push(0); // session id length
        body.extend_from_slice(&2u16.to_be_bytes()); // cipher suites length
        body.extend_from_slice(&[0x13, 0x01]); // TLS_AES_128_GCM_SHA256
        body.push(1); // compression methods length
        body.push(0); // null compression
        body.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
        body.extend_from_slice(&extensions);

        let mut handshake = Vec::new();
        handshake.push(HANDSHAKE_TYPE_CLIENT_HELLO);
        handshake.extend_from_slice(&[
            (body.len() >> 16) as u8,
            (body.len() >> 8) as u8,
            body.len() as u8,
        ]);
        handshake.extend_from_slice(&body);

        let mut record = Vec::new();
        record.push(RECORD_TYPE_HANDSHAKE);
        record.extend_from_slice(&[0x03, 0x01]);
        record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
        record.extend_from_slice(&handshake);
        record
    }

    #[tokio::test]
    async fn test_sniff_extracts_hostname() {
        let (mut client, server) = duplex(4096);
        client.write_all(&client_hello("example.com")).await.unwrap();

        let (_stream, hostname) = sniff(server, Duration::from_secs(1)).await.unwrap();
        assert_eq!(hostname, "example.com");
    }

    #[tokio::test]
    async fn test_sniff_replays_client_hello() {
        let hello = client_hello("backend.internal");
        let (mut client, server) = duplex(4096);
        client.write_all(&hello).await.unwrap();
        client.write_all(b"after-hello").await.unwrap();
        drop(client);

        let (mut stream, _) = sniff(server, Duration::from_secs(1)).await.unwrap();

        let mut replayed = Vec::new();
        stream.read_to_end(&mut replayed).await.unwrap();

        let mut expected = hello;
        expected.extend_from_slice(b"after-hello");
        assert_eq!(replayed, expected);
    }

    #[tokio::test]
    async fn test_sniff_rejects_non_tls() {
        let (mut client, server) = duplex(4096);
        client
            .write_all(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n")
            .await
            .unwrap();

        let err = sniff(server, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, SniError::NotTls));
    }

    #[tokio::test]
    async fn test_sniff_times_out_on_silent_client() {
        let (_client, server) = duplex(4096);

        let err = sniff(server, Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, SniError::Timeout));
    }

    #[tokio::test]
    async fn test_sniff_requires_server_name() {
        // A ClientHello whose extensions block holds only a padding
        // extension.
        let mut extensions = Vec::new();
        extensions.extend_from_slice(&0x0015u16.to_be_bytes());
        extensions.extend_from_slice(&4u16.to_be_bytes());
        extensions.extend_from_slice(&[0u8; 4]);

        let mut body = Vec::new();
        body.extend_from_slice(&[0x03, 0x03]);
        body.extend_from_slice(&[0u8; 32]);
        body.push(0);
        body.extend_from_slice(&2u16.to_be_bytes());
        body.extend_from_slice(&[0x13, 0x01]);
        body.push(1);
        body.push(0);
        body.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
        body.extend_from_slice(&extensions);

        let mut handshake = vec![HANDSHAKE_TYPE_CLIENT_HELLO, 0, 0, body.len() as u8];
        handshake.extend_from_slice(&body);

        let mut record = vec![RECORD_TYPE_HANDSHAKE, 0x03, 0x01];
        record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
        record.extend_from_slice(&handshake);

        let (mut client, server) = duplex(4096);
        client.write_all(&record).await.unwrap();

        let err = sniff(server, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, SniError::NoServerName));
    }

    #[tokio::test]
    async fn test_parse_truncated_hello_is_malformed() {
        let mut record = client_hello("example.com");
        record.truncate(20);
        // Fix the record length so read_exact succeeds on the short body.
        let body_len = (record.len() - 5) as u16;
        record[3..5].copy_from_slice(&body_len.to_be_bytes());

        let (mut client, server) = duplex(4096);
        client.write_all(&record).await.unwrap();

        let err = sniff(server, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, SniError::Malformed));
    }
}
