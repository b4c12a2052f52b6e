use std::io;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Mutex;

const CHUNK_SIZE: usize = 4096;

/// Appends everything `reader` produces to the shared buffer, one chunk at a
/// time, so stdout and stderr interleave in arrival order.
pub(super) async fn read_stream_capture<R: AsyncRead + Unpin>(
    mut reader: R,
    buffer: Arc<Mutex<Vec<u8>>>,
) -> io::Result<()> {
    let mut chunk = [0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buffer.lock().await.extend_from_slice(&chunk[..n]);
    }
    Ok(())
}
