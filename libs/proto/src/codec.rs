//! Length-prefixed JSON framing over any async byte stream.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProtoError;
use crate::frame::Frame;

/// Largest frame body either side accepts.
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// Writes one frame and flushes the stream.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), ProtoError>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(frame)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(ProtoError::FrameTooLarge {
            size: body.len(),
            max: MAX_FRAME_LEN,
        });
    }

    // Length fits in u32 after the check above.
    let len = body.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame.
///
/// Returns `Ok(None)` when the peer closed the stream cleanly between frames.
/// A stream that ends inside a frame is an I/O error.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>, ProtoError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtoError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_LEN,
        });
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(serde_json::from_slice(&body)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ErrorCode;
    use crate::kinds::Role;
    use cpat_id::AgentUuid;

    #[tokio::test]
    async fn test_frames_survive_the_stream_in_order() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let uuid = AgentUuid::new();

        write_frame(
            &mut client,
            &Frame::Connect {
                role: Role::Agent,
                uuid,
            },
        )
        .await
        .unwrap();
        write_frame(
            &mut client,
            &Frame::Error {
                code: ErrorCode::NotConnected,
                detail: "late".to_string(),
            },
        )
        .await
        .unwrap();
        drop(client);

        let first = read_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(
            first,
            Frame::Connect {
                role: Role::Agent,
                uuid
            }
        );
        let second = read_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(second.name(), "error");
        assert!(read_frame(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_length_prefix_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let len = (MAX_FRAME_LEN as u32) + 1;
        client.write_all(&len.to_be_bytes()).await.unwrap();

        let result = read_frame(&mut server).await;
        assert!(matches!(result, Err(ProtoError::FrameTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_truncated_frame_is_an_io_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&10u32.to_be_bytes()).await.unwrap();
        client.write_all(b"{\"ty").await.unwrap();
        drop(client);

        let result = read_frame(&mut server).await;
        assert!(matches!(result, Err(ProtoError::Io(_))));
    }

    #[tokio::test]
    async fn test_garbage_body_is_malformed() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&3u32.to_be_bytes()).await.unwrap();
        client.write_all(b"abc").await.unwrap();

        let result = read_frame(&mut server).await;
        assert!(matches!(result, Err(ProtoError::Malformed(_))));
    }
}
