//! PRELOGIN framing for the TLS handshake.
//!
//! TDS 7.x carries the TLS handshake inside PRELOGIN (0x12) packets on the
//! connection that already exchanged the cleartext PRELOGIN messages. Once
//! the handshake is done, TLS records flow over the socket unframed and the
//! TDS packets travel inside them instead.
//!
//! The wrapper works for either side of the handshake: it frames whatever
//! the TLS engine writes and strips the framing from whatever it reads,
//! until [`TlsPreloginWrapper::handshake_complete`] is called.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::{Buf, BytesMut};
use tdslink_codec::{FIRST_PACKET_ID, PacketFramer};
use tdslink_protocol::{PACKET_HEADER_SIZE, PacketHeader, PacketType};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Stream adapter that wraps handshake bytes in PRELOGIN packets.
pub struct TlsPreloginWrapper<S> {
    stream: S,
    pending_handshake: bool,
    framer: PacketFramer,

    header: [u8; PACKET_HEADER_SIZE],
    header_pos: usize,
    read_remaining: usize,

    // TLS bytes written since the last flush.
    unframed: BytesMut,
    // Framed bytes not yet accepted by the stream.
    outgoing: BytesMut,
}

impl<S> TlsPreloginWrapper<S> {
    /// Wrap `stream`, framing with the default packet size.
    pub fn new(stream: S) -> Self {
        Self::with_framer(stream, PacketFramer::default())
    }

    /// Wrap `stream`, framing handshake flights with `framer`.
    pub fn with_framer(stream: S, framer: PacketFramer) -> Self {
        Self {
            stream,
            pending_handshake: true,
            framer,
            header: [0u8; PACKET_HEADER_SIZE],
            header_pos: 0,
            read_remaining: 0,
            unframed: BytesMut::new(),
            outgoing: BytesMut::new(),
        }
    }

    /// Stop framing; from now on bytes pass through untouched.
    pub fn handshake_complete(&mut self) {
        tracing::trace!("TLS wrapper: handshake complete, switching to pass-through");
        self.pending_handshake = false;
    }

    /// Whether handshake framing is still active.
    #[must_use]
    pub fn is_handshaking(&self) -> bool {
        self.pending_handshake
    }

    /// Reference to the underlying stream.
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Mutable reference to the underlying stream.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Consume the wrapper and return the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: AsyncWrite + Unpin> TlsPreloginWrapper<S> {
    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while !self.outgoing.is_empty() {
            let n = ready!(Pin::new(&mut self.stream).poll_write(cx, &self.outgoing))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            self.outgoing.advance(n);
        }
        Poll::Ready(Ok(()))
    }
}

fn invalid_data(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

impl<S: AsyncRead + Unpin> AsyncRead for TlsPreloginWrapper<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if !this.pending_handshake {
            return Pin::new(&mut this.stream).poll_read(cx, buf);
        }

        loop {
            if this.read_remaining == 0 {
                while this.header_pos < PACKET_HEADER_SIZE {
                    let mut header_buf = ReadBuf::new(&mut this.header[this.header_pos..]);
                    ready!(Pin::new(&mut this.stream).poll_read(cx, &mut header_buf))?;
                    let n = header_buf.filled().len();
                    if n == 0 {
                        if this.header_pos == 0 {
                            return Poll::Ready(Ok(()));
                        }
                        return Poll::Ready(Err(io::ErrorKind::UnexpectedEof.into()));
                    }
                    this.header_pos += n;
                }
                this.header_pos = 0;

                let header = PacketHeader::decode(&mut &this.header[..])
                    .map_err(|e| invalid_data(e.to_string()))?;
                if header.packet_type != PacketType::PreLogin {
                    return Poll::Ready(Err(invalid_data(format!(
                        "expected PRELOGIN packet during TLS handshake, got {:?}",
                        header.packet_type
                    ))));
                }
                this.read_remaining = header.payload_length();
                tracing::trace!(bytes = this.read_remaining, "TLS wrapper: reading handshake packet");
                if this.read_remaining == 0 {
                    continue;
                }
            }

            let max_read = this.read_remaining.min(buf.remaining());
            if max_read == 0 {
                return Poll::Ready(Ok(()));
            }

            let n = {
                let mut limited = ReadBuf::new(buf.initialize_unfilled_to(max_read));
                ready!(Pin::new(&mut this.stream).poll_read(cx, &mut limited))?;
                limited.filled().len()
            };
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::UnexpectedEof.into()));
            }
            buf.advance(n);
            this.read_remaining -= n;
            return Poll::Ready(Ok(()));
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TlsPreloginWrapper<S> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        if !this.pending_handshake {
            ready!(this.poll_drain(cx))?;
            return Pin::new(&mut this.stream).poll_write(cx, buf);
        }

        // Framed on flush: one TLS flight becomes one PRELOGIN message.
        this.unframed.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.pending_handshake && !this.unframed.is_empty() {
            let framed = this
                .framer
                .encode_to_bytes(PacketType::PreLogin, &this.unframed, FIRST_PACKET_ID);
            tracing::trace!(
                tls_bytes = this.unframed.len(),
                packets = this.framer.packet_count(this.unframed.len()),
                "TLS wrapper: sending handshake flight"
            );
            this.unframed.clear();
            this.outgoing.unsplit(framed);
        }

        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.stream).poll_shutdown(cx)
    }
}

impl<S> std::fmt::Debug for TlsPreloginWrapper<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsPreloginWrapper")
            .field("pending_handshake", &self.pending_handshake)
            .field("read_remaining", &self.read_remaining)
            .field("unframed", &self.unframed.len())
            .field("outgoing", &self.outgoing.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    fn prelogin_packet(status: u8, id: u8, payload: &[u8]) -> Vec<u8> {
        let len = (PACKET_HEADER_SIZE + payload.len()) as u16;
        let mut out = vec![0x12, status, (len >> 8) as u8, len as u8, 0, 0, id, 0];
        out.extend_from_slice(payload);
        out
    }

    #[tokio::test]
    async fn test_flush_wraps_flight_in_prelogin_packet() {
        let mock = tokio_test::io::Builder::new()
            .write(&prelogin_packet(0x01, 1, b"hello"))
            .build();
        let mut wrapper = TlsPreloginWrapper::new(mock);
        wrapper.write_all(b"hel").await.unwrap();
        wrapper.write_all(b"lo").await.unwrap();
        wrapper.flush().await.unwrap();
    }

    #[tokio::test]
    async fn test_large_flight_is_split_at_packet_size() {
        let framer = PacketFramer::new(16).unwrap();
        let mut expected = prelogin_packet(0x00, 1, b"abcdefgh");
        expected.extend(prelogin_packet(0x01, 2, b"ij"));
        let mock = tokio_test::io::Builder::new().write(&expected).build();
        let mut wrapper = TlsPreloginWrapper::with_framer(mock, framer);
        wrapper.write_all(b"abcdefghij").await.unwrap();
        wrapper.flush().await.unwrap();
    }

    #[tokio::test]
    async fn test_read_strips_framing_across_packets() {
        let mut wire = prelogin_packet(0x00, 1, b"abc");
        wire.extend(prelogin_packet(0x01, 2, b""));
        wire.extend(prelogin_packet(0x01, 1, b"def"));
        let mock = tokio_test::io::Builder::new().read(&wire).build();
        let mut wrapper = TlsPreloginWrapper::new(mock);
        let mut out = [0u8; 6];
        wrapper.read_exact(&mut out).await.unwrap();
        assert_eq!(&out, b"abcdef");
    }

    #[tokio::test]
    async fn test_rejects_non_prelogin_packet() {
        let mut wire = prelogin_packet(0x01, 1, b"abc");
        wire[0] = 0x04;
        let mock = tokio_test::io::Builder::new().read(&wire).build();
        let mut wrapper = TlsPreloginWrapper::new(mock);
        let mut out = [0u8; 3];
        let err = wrapper.read_exact(&mut out).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_eof_inside_header() {
        let mock = tokio_test::io::Builder::new().read(&[0x12, 0x01, 0x00]).build();
        let mut wrapper = TlsPreloginWrapper::new(mock);
        let mut out = [0u8; 1];
        let err = wrapper.read_exact(&mut out).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_pass_through_after_handshake() {
        let mock = tokio_test::io::Builder::new()
            .write(b"record")
            .read(b"reply")
            .build();
        let mut wrapper = TlsPreloginWrapper::new(mock);
        wrapper.handshake_complete();
        assert!(!wrapper.is_handshaking());
        wrapper.write_all(b"record").await.unwrap();
        wrapper.flush().await.unwrap();
        let mut out = [0u8; 5];
        wrapper.read_exact(&mut out).await.unwrap();
        assert_eq!(&out, b"reply");
    }
}
