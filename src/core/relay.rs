//! One-directional byte pump between two stream halves.
//!
//! A proxy session runs two of these, one per direction. Each pump copies
//! bytes from `src` to `dst` and yields a [`Sample`] per write batch; the
//! sum of `count_written` over the sample stream equals the bytes delivered
//! in that direction. The pump terminates on end-of-stream, I/O error, idle
//! timeout (no read progress within the window) or cancellation, and shuts
//! down the write side of `dst` so the opposite direction observes
//! end-of-stream and unwinds symmetrically.

use std::{io, time::Duration};

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Copy buffer size per pump
const BUFFER_SIZE: usize = 8192;

/// Sample channel depth; the consumer drains continuously so this only
/// smooths bursts
const SAMPLE_CHANNEL_SIZE: usize = 16;

/// Byte-count observation for one write batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub count_written: u64,
}

/// Spawn a pump copying `src` to `dst` and return its sample stream.
///
/// The stream closes when the pump terminates. A `None` idle timeout
/// disables the idle check.
pub fn spawn<R, W>(
    mut src: R,
    mut dst: W,
    idle_timeout: Option<Duration>,
    shutdown: CancellationToken,
) -> mpsc::Receiver<Sample>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let (tx, rx) = mpsc::channel(SAMPLE_CHANNEL_SIZE);

    tokio::spawn(async move {
        let mut buf = vec![0u8; BUFFER_SIZE];

        loop {
            let read = tokio::select! {
                res = read_idle_bounded(&mut src, &mut buf, idle_timeout) => res,
                _ = shutdown.cancelled() => {
                    trace!("Relay cancelled");
                    break;
                }
            };

            let n = match read {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    trace!(error = %e, "Relay read ended");
                    break;
                }
            };

            if let Err(e) = dst.write_all(&buf[..n]).await {
                trace!(error = %e, "Relay write ended");
                break;
            }

            let _ = tx
                .send(Sample {
                    count_written: n as u64,
                })
                .await;
        }

        // Half-close so the peer direction sees EOF; errors here mean the
        // socket is already gone.
        let _ = dst.shutdown().await;
    });

    rx
}

async fn read_idle_bounded<R: AsyncRead + Unpin>(
    src: &mut R,
    buf: &mut [u8],
    idle_timeout: Option<Duration>,
) -> io::Result<usize> {
    match idle_timeout {
        Some(window) => match timeout(window, src.read(buf)).await {
            Ok(res) => res,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "idle timeout")),
        },
        None => src.read(buf).await,
    }
}
