//! Shadowsocks ingress/egress (§4.B). Stream-cipher connections are
//! rewrapped into a [`CipherStream`] that keystream-XORs every byte
//! crossing the wire for the rest of the session. AEAD connections are
//! wrapped into an [`AeadStream`] that de/re-frames each logical frame as
//! bytes arrive, since a single `poll_read` call may see less than one
//! whole frame.

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

use super::{Accepted, BoxedStream, IoStream};
use crate::crypto::stream::{random_iv, StreamCrypto};
use crate::crypto::{aead, psk, AeadCrypto};
use crate::error::{Error, Result};
use crate::model::{self, CryptoMethod, Endpoint, MAX_FRAME_SIZE};
use crate::vo::{EgressVo, IngressVo};

pub struct ShadowsocksIngress {
    method: CryptoMethod,
    key: Vec<u8>,
}

impl ShadowsocksIngress {
    pub fn new(vo: &IngressVo) -> Result<Self> {
        let opt = vo
            .ss_option
            .as_ref()
            .ok_or_else(|| Error::SemanticError("ss ingress requires ssOption".into()))?;
        Ok(Self {
            method: opt.method,
            key: psk::generate_key(opt.method, &opt.password),
        })
    }

    pub async fn accept(&self, mut stream: BoxedStream) -> Result<(BoxedStream, Accepted)> {
        if self.method.is_aead() {
            let mut salt = vec![0u8; self.method.salt_size()];
            stream.read_exact(&mut salt).await?;
            let mut recv = AeadCrypto::new(self.method, &self.key, &salt)?;

            let tag = self.method.tag_size();
            let mut len_buf = vec![0u8; 2 + tag];
            stream.read_exact(&mut len_buf).await?;
            let len = recv.open_length(&len_buf)?;

            let mut payload_buf = vec![0u8; len + tag];
            stream.read_exact(&mut payload_buf).await?;
            let payload = recv.open_payload(&payload_buf)?;

            let (remote, consumed) = model::parse_endpoint_from_slice(&payload)?;

            let mut accepted = Accepted::new(remote);
            accepted.prelude = payload[consumed..].to_vec();

            let wrapped: BoxedStream =
                Box::pin(AeadStream::new(stream, self.method, self.key.clone(), None, Some(recv)));
            Ok((wrapped, accepted))
        } else {
            let mut iv = vec![0u8; self.method.iv_size()];
            stream.read_exact(&mut iv).await?;
            let decryptor = StreamCrypto::new_decryptor(self.method, &self.key, &iv)?;

            let mut wrapped: BoxedStream =
                Box::pin(CipherStream::new(stream, self.method, self.key.clone(), Some(decryptor), None));

            let remote = model::parse_endpoint(&mut wrapped).await?;
            Ok((wrapped, Accepted::new(remote)))
        }
    }
}

/// Wraps a connected stream-cipher socket: reads decrypt in place, writes
/// lazily prepend a fresh random IV to the first outbound chunk and then
/// encrypt in place. Both directions run their own independent keystream.
struct CipherStream {
    inner: BoxedStream,
    method: CryptoMethod,
    key: Vec<u8>,
    decryptor: Option<StreamCrypto>,
    encryptor: Option<StreamCrypto>,
    /// IV bytes read so far while `decryptor` is still unset (the egress
    /// side reads its peer's IV lazily, off the first bytes of its
    /// reply, rather than at construction time).
    iv_buf: Vec<u8>,
    /// Our own outbound IV, queued until fully flushed to `inner` ahead
    /// of the first encrypted chunk.
    pending_iv: Vec<u8>,
    /// Ciphertext produced for a plaintext chunk that hasn't been fully
    /// flushed to `inner` yet, so the keystream position it was encrypted
    /// against isn't re-applied to the same bytes on retry.
    pending_write: Vec<u8>,
    /// Plaintext length `pending_write` represents; reported as consumed
    /// only once `pending_write` is completely flushed.
    pending_plain_len: usize,
}

impl CipherStream {
    fn new(
        inner: BoxedStream,
        method: CryptoMethod,
        key: Vec<u8>,
        decryptor: Option<StreamCrypto>,
        encryptor: Option<StreamCrypto>,
    ) -> Self {
        Self {
            inner,
            method,
            key,
            decryptor,
            encryptor,
            iv_buf: Vec::new(),
            pending_iv: Vec::new(),
            pending_write: Vec::new(),
            pending_plain_len: 0,
        }
    }
}

impl AsyncRead for CipherStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();

        loop {
            if this.decryptor.is_none() {
                let want = this.method.iv_size() - this.iv_buf.len();
                let mut scratch = [0u8; 32];
                let mut read_buf = ReadBuf::new(&mut scratch[..want]);
                match Pin::new(&mut this.inner).poll_read(cx, &mut read_buf) {
                    Poll::Ready(Ok(())) => {
                        let n = read_buf.filled().len();
                        if n == 0 {
                            return Poll::Ready(Ok(())); // clean EOF before the IV arrived
                        }
                        this.iv_buf.extend_from_slice(read_buf.filled());
                        if this.iv_buf.len() < this.method.iv_size() {
                            continue;
                        }
                        this.decryptor = Some(
                            StreamCrypto::new_decryptor(this.method, &this.key, &this.iv_buf)
                                .map_err(to_io)?,
                        );
                        continue;
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                }
            }

            let before = buf.filled().len();
            return match Pin::new(&mut this.inner).poll_read(cx, buf) {
                Poll::Ready(Ok(())) => {
                    let filled = buf.filled_mut();
                    this.decryptor.as_mut().expect("set above").apply(&mut filled[before..]);
                    Poll::Ready(Ok(()))
                }
                other => other,
            };
        }
    }
}

impl AsyncWrite for CipherStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();

        if this.encryptor.is_none() && this.pending_iv.is_empty() {
            let iv = random_iv(this.method);
            let enc = StreamCrypto::new_encryptor(this.method, &this.key, &iv)
                .expect("key/iv sizes were already validated at construction");
            this.encryptor = Some(enc);
            this.pending_iv = iv;
        }

        if !this.pending_iv.is_empty() {
            match Pin::new(&mut this.inner).poll_write(cx, &this.pending_iv) {
                Poll::Ready(Ok(n)) => {
                    this.pending_iv.drain(..n);
                    if !this.pending_iv.is_empty() {
                        return Poll::Pending;
                    }
                }
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            }
        }

        // Encrypt `buf` into `pending_write` exactly once: the keystream
        // advances as soon as `apply` runs, so re-running it on a retry
        // would encrypt those bytes against the wrong keystream position.
        if this.pending_write.is_empty() && this.pending_plain_len == 0 {
            let mut encrypted = buf.to_vec();
            this.encryptor.as_mut().expect("set above").apply(&mut encrypted);
            this.pending_write = encrypted;
            this.pending_plain_len = buf.len();
        }

        match Pin::new(&mut this.inner).poll_write(cx, &this.pending_write) {
            Poll::Ready(Ok(n)) => {
                this.pending_write.drain(..n);
                if this.pending_write.is_empty() {
                    Poll::Ready(Ok(std::mem::take(&mut this.pending_plain_len)))
                } else {
                    Poll::Pending
                }
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

impl IoStream for CipherStream {}

/// What an [`AeadStream`] read-half is waiting for next.
enum ReadState {
    /// Accumulating the encrypted-and-tagged 2-byte length.
    Length,
    /// Accumulating the encrypted-and-tagged payload of `len` plaintext
    /// bytes.
    Payload(usize),
}

/// Wraps a connected AEAD socket: reads de-frame and decrypt one logical
/// frame at a time, carrying partially-read ciphertext and un-consumed
/// plaintext across `poll_read` calls; writes frame and encrypt up to
/// `MAX_FRAME_SIZE` bytes at a time.
struct AeadStream {
    inner: BoxedStream,
    method: CryptoMethod,
    key: Vec<u8>,
    send: Option<AeadCrypto>,
    recv: Option<AeadCrypto>,
    read_state: ReadState,
    /// Ciphertext (+tag) accumulated so far for the frame part named by
    /// `read_state`.
    cipher_buf: Vec<u8>,
    /// Decrypted bytes not yet handed to the caller.
    plain_buf: Vec<u8>,
    /// Our own outbound salt, queued until fully flushed to `inner`
    /// ahead of the first sealed frame.
    pending_salt: Vec<u8>,
    /// Sealed ciphertext+tag for a chunk not yet fully flushed to
    /// `inner`. `seal_frame` advances the AEAD nonce every call, so it
    /// must run at most once per chunk; re-sealing on a retry would
    /// desync the nonce sequence the peer expects.
    pending_frame: Vec<u8>,
    /// Plaintext length `pending_frame` represents; reported as consumed
    /// only once `pending_frame` is completely flushed.
    pending_frame_plain_len: usize,
    /// Peer's inbound salt bytes accumulated so far while `recv` is
    /// still unset.
    recv_salt_buf: Vec<u8>,
}

impl AeadStream {
    fn new(
        inner: BoxedStream,
        method: CryptoMethod,
        key: Vec<u8>,
        send: Option<AeadCrypto>,
        recv: Option<AeadCrypto>,
    ) -> Self {
        Self {
            inner,
            method,
            key,
            send,
            recv,
            read_state: ReadState::Length,
            cipher_buf: Vec::new(),
            plain_buf: Vec::new(),
            pending_salt: Vec::new(),
            pending_frame: Vec::new(),
            pending_frame_plain_len: 0,
            recv_salt_buf: Vec::new(),
        }
    }

    fn new_outbound(method: CryptoMethod, key: &[u8]) -> (AeadCrypto, Vec<u8>) {
        let salt = aead::random_salt(method);
        let crypto = AeadCrypto::new(method, key, &salt).expect("validated at construction");
        (crypto, salt)
    }
}

impl AsyncRead for AeadStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();

        loop {
            if !this.plain_buf.is_empty() {
                let n = this.plain_buf.len().min(buf.remaining());
                buf.put_slice(&this.plain_buf[..n]);
                this.plain_buf.drain(..n);
                return Poll::Ready(Ok(()));
            }

            if this.recv.is_none() {
                let want = this.method.salt_size() - this.recv_salt_buf.len();
                let mut scratch = [0u8; 32];
                let mut read_buf = ReadBuf::new(&mut scratch[..want]);
                match Pin::new(&mut this.inner).poll_read(cx, &mut read_buf) {
                    Poll::Ready(Ok(())) => {
                        let n = read_buf.filled().len();
                        if n == 0 {
                            return Poll::Ready(Ok(())); // clean EOF before a reply ever arrived
                        }
                        this.recv_salt_buf.extend_from_slice(read_buf.filled());
                        if this.recv_salt_buf.len() < this.method.salt_size() {
                            continue;
                        }
                        this.recv = Some(
                            AeadCrypto::new(this.method, &this.key, &this.recv_salt_buf).map_err(to_io)?,
                        );
                        continue;
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                }
            }

            let tag = this.method.tag_size();
            let target = match this.read_state {
                ReadState::Length => 2 + tag,
                ReadState::Payload(len) => len + tag,
            };

            if this.cipher_buf.len() < target {
                let mut scratch = [0u8; 4096];
                let want = (target - this.cipher_buf.len()).min(scratch.len());
                let mut read_buf = ReadBuf::new(&mut scratch[..want]);
                match Pin::new(&mut this.inner).poll_read(cx, &mut read_buf) {
                    Poll::Ready(Ok(())) => {
                        let n = read_buf.filled().len();
                        if n == 0 {
                            return Poll::Ready(Ok(())); // clean EOF
                        }
                        this.cipher_buf.extend_from_slice(read_buf.filled());
                        continue;
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                }
            }

            let frame = std::mem::take(&mut this.cipher_buf);
            let recv = this.recv.as_mut().expect("established above");
            match this.read_state {
                ReadState::Length => {
                    let len = recv.open_length(&frame).map_err(to_io)?;
                    this.read_state = ReadState::Payload(len);
                }
                ReadState::Payload(_) => {
                    let plain = recv.open_payload(&frame).map_err(to_io)?;
                    this.plain_buf = plain;
                    this.read_state = ReadState::Length;
                }
            }
        }
    }
}

impl AsyncWrite for AeadStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();

        if this.send.is_none() && this.pending_salt.is_empty() {
            let (send, salt) = AeadStream::new_outbound(this.method, &this.key);
            this.send = Some(send);
            this.pending_salt = salt;
        }

        if !this.pending_salt.is_empty() {
            match Pin::new(&mut this.inner).poll_write(cx, &this.pending_salt) {
                Poll::Ready(Ok(n)) => {
                    this.pending_salt.drain(..n);
                    if !this.pending_salt.is_empty() {
                        return Poll::Pending;
                    }
                }
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            }
        }

        if this.pending_frame.is_empty() && this.pending_frame_plain_len == 0 {
            let chunk_len = buf.len().min(MAX_FRAME_SIZE);
            let frame = this
                .send
                .as_mut()
                .expect("established above")
                .seal_frame(&buf[..chunk_len])
                .map_err(to_io)?;
            this.pending_frame = frame;
            this.pending_frame_plain_len = chunk_len;
        }

        match Pin::new(&mut this.inner).poll_write(cx, &this.pending_frame) {
            Poll::Ready(Ok(n)) => {
                this.pending_frame.drain(..n);
                if this.pending_frame.is_empty() {
                    Poll::Ready(Ok(std::mem::take(&mut this.pending_frame_plain_len)))
                } else {
                    Poll::Pending
                }
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

impl IoStream for AeadStream {}

fn to_io(e: Error) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
}

pub struct ShadowsocksEgress {
    host: String,
    port: u16,
    method: CryptoMethod,
    key: Vec<u8>,
}

impl ShadowsocksEgress {
    pub fn new(vo: &EgressVo) -> Result<Self> {
        let host = vo
            .host
            .clone()
            .ok_or_else(|| Error::SemanticError("ss egress requires host".into()))?;
        let port = vo
            .port
            .as_ref()
            .ok_or_else(|| Error::SemanticError("ss egress requires port".into()))?
            .parse()
            .map_err(|_| Error::SemanticError("invalid ss egress port".into()))?;
        let method = vo
            .method
            .ok_or_else(|| Error::SemanticError("ss egress requires method".into()))?;
        let password = vo
            .password
            .clone()
            .ok_or_else(|| Error::SemanticError("ss egress requires password".into()))?;
        Ok(Self {
            host,
            port,
            method,
            key: psk::generate_key(method, &password),
        })
    }

    pub async fn connect(&self, remote: &Endpoint) -> Result<(BoxedStream, std::net::SocketAddr)> {
        let mut tcp = tokio::net::TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| Error::conn_failure(e.to_string()))?;
        let bound = super::fake_bound_addr();

        let mut addr_buf = Vec::new();
        model::serialize_endpoint(remote, &mut addr_buf)?;

        if self.method.is_aead() {
            let (mut send, salt) = AeadStream::new_outbound(self.method, &self.key);
            tcp.write_all(&salt).await?;
            let frame = send.seal_frame(&addr_buf)?;
            tcp.write_all(&frame).await?;

            let raw: BoxedStream = Box::pin(tcp);
            let wrapped: BoxedStream =
                Box::pin(AeadStream::new(raw, self.method, self.key.clone(), Some(send), None));
            Ok((wrapped, bound))
        } else {
            let iv = random_iv(self.method);
            tcp.write_all(&iv).await?;
            let mut encryptor = StreamCrypto::new_encryptor(self.method, &self.key, &iv)?;
            encryptor.apply(&mut addr_buf);
            tcp.write_all(&addr_buf).await?;

            let raw: BoxedStream = Box::pin(tcp);
            let wrapped: BoxedStream =
                Box::pin(CipherStream::new(raw, self.method, self.key.clone(), None, Some(encryptor)));
            Ok((wrapped, bound))
        }
    }
}
