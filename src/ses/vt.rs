//! The VT channel: multiplexed PTY bytes for every pane of a session.
//!
//! Frames are `(pane_id: u32, len: u32, payload)`, both directions. A
//! zero-length frame signals pane EOF.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::wire::MAX_FRAME;

pub async fn write_vt_frame<W: AsyncWrite + Unpin>(
    w: &mut W,
    pane_id: u32,
    payload: &[u8],
) -> std::io::Result<()> {
    w.write_all(&pane_id.to_be_bytes()).await?;
    w.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    w.write_all(payload).await?;
    w.flush().await?;
    Ok(())
}

/// Returns `Ok(None)` on clean EOF of the channel itself.
pub async fn read_vt_frame<R: AsyncRead + Unpin>(
    r: &mut R,
) -> std::io::Result<Option<(u32, Vec<u8>)>> {
    let mut header = [0u8; 8];
    match r.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let pane_id = u32::from_be_bytes(header[..4].try_into().unwrap());
    let len = u32::from_be_bytes(header[4..].try_into().unwrap());
    if len > MAX_FRAME {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("vt frame too large: {} bytes", len),
        ));
    }
    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload).await?;
    Ok(Some((pane_id, payload)))
}
