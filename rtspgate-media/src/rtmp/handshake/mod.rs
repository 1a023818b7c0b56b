//! Simple (non-digest) RTMP handshake.
//!
//! ```text
//! client                      server
//!   C0 + C1   ------------->
//!             <-------------  S0 + S1 + S2 (S2 echoes C1)
//!   C2        ------------->
//! ```
//!
//! S1 carries a zero version field, which clients treat as a request for the
//! simple scheme.

pub mod errors;

use {
    super::define::{RTMP_HANDSHAKE_SIZE, RTMP_VERSION},
    byteorder::{BigEndian, ByteOrder},
    errors::{HandshakeError, HandshakeErrorValue},
    std::time::Duration,
    tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
};

pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

fn random_block(epoch: u32) -> Vec<u8> {
    let mut block = vec![0u8; RTMP_HANDSHAKE_SIZE];
    BigEndian::write_u32(&mut block[0..4], epoch);
    // bytes 4..8 stay zero
    for chunk in block[8..].chunks_mut(32) {
        let random: [u8; 32] = rand::random();
        chunk.copy_from_slice(&random[..chunk.len()]);
    }
    block
}

async fn with_timeout<F, T>(future: F) -> Result<T, HandshakeError>
where
    F: std::future::Future<Output = Result<T, HandshakeError>>,
{
    tokio::time::timeout(HANDSHAKE_TIMEOUT, future)
        .await
        .map_err(|_| HandshakeErrorValue::Timeout)?
}

/// Run the server half of the handshake. Bytes the client sends after C2
/// stay unread in `io`.
pub async fn server_handshake<S>(io: &mut S) -> Result<(), HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    with_timeout(async {
        let version = io.read_u8().await?;
        if version != RTMP_VERSION {
            return Err(HandshakeErrorValue::VersionNotSupported(version).into());
        }
        let mut c1 = vec![0u8; RTMP_HANDSHAKE_SIZE];
        io.read_exact(&mut c1).await?;

        let mut response = Vec::with_capacity(1 + RTMP_HANDSHAKE_SIZE * 2);
        response.push(RTMP_VERSION);
        response.extend_from_slice(&random_block(0));
        response.extend_from_slice(&c1);
        io.write_all(&response).await?;
        io.flush().await?;

        let mut c2 = vec![0u8; RTMP_HANDSHAKE_SIZE];
        io.read_exact(&mut c2).await?;
        tracing::trace!("rtmp handshake complete");
        Ok(())
    })
    .await
}

/// Client half, used by publishers driving the gateway.
pub async fn client_handshake<S>(io: &mut S) -> Result<(), HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    with_timeout(async {
        let mut hello = Vec::with_capacity(1 + RTMP_HANDSHAKE_SIZE);
        hello.push(RTMP_VERSION);
        hello.extend_from_slice(&random_block(0));
        io.write_all(&hello).await?;
        io.flush().await?;

        let version = io.read_u8().await?;
        if version != RTMP_VERSION {
            return Err(HandshakeErrorValue::VersionNotSupported(version).into());
        }
        let mut s1 = vec![0u8; RTMP_HANDSHAKE_SIZE];
        io.read_exact(&mut s1).await?;
        let mut s2 = vec![0u8; RTMP_HANDSHAKE_SIZE];
        io.read_exact(&mut s2).await?;

        // C2 echoes S1
        io.write_all(&s1).await?;
        io.flush().await?;
        Ok(())
    })
    .await
}
