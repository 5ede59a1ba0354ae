// #![deny(warnings)]

#![warn(unused_extern_crates)]
// Enable some groups of clippy lints.
#![deny(clippy::suspicious)]
#![deny(clippy::perf)]
// Specific lints to enforce.
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::trivially_copy_pass_by_ref)]
#![deny(clippy::disallowed_types)]
#![deny(clippy::manual_let_else)]
#![allow(clippy::unreachable)]

mod asn1;
pub mod ap;
pub mod ccache;
pub mod client;
pub mod config;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod kdc;
pub mod preauth;
pub mod proto;

pub use crate::asn1::constants::{ChecksumType, EncryptionType, KrbErrorCode, PaDataType};
pub use crate::asn1::kerberos_flags::KerberosFlags;
pub use crate::asn1::ticket_flags::TicketFlags;

use crate::constants::DEFAULT_IO_MAX_SIZE;
use crate::error::KrbError;
use bytes::{Buf, BytesMut};
use proto::{KerberosReply, KerberosRequest};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{error, trace};

/// RFC 4120 section 7.2.2. Every message on a stream is preceded by its
/// length as four octets in network byte order.
const LENGTH_PREFIX: usize = 4;

fn decode_frame(buf: &mut BytesMut, max_size: usize) -> Result<Option<BytesMut>, KrbError> {
    if buf.len() < LENGTH_PREFIX {
        return Ok(None);
    }

    let mut prefix = [0u8; LENGTH_PREFIX];
    prefix.copy_from_slice(&buf[..LENGTH_PREFIX]);
    let len = u32::from_be_bytes(prefix) as usize;

    if len > max_size {
        error!(len, max_size, "message exceeds the maximum frame size");
        return Err(KrbError::MessageTooLarge);
    }

    if buf.len() < LENGTH_PREFIX + len {
        buf.reserve(LENGTH_PREFIX + len - buf.len());
        trace!(have = buf.len(), want = LENGTH_PREFIX + len, "partial frame");
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX);
    Ok(Some(buf.split_to(len)))
}

fn encode_frame(der: &[u8], max_size: usize, buf: &mut BytesMut) -> Result<(), KrbError> {
    if der.len() > max_size {
        error!(len = der.len(), max_size, "refusing to send an oversized message");
        return Err(KrbError::MessageTooLarge);
    }
    let len = u32::try_from(der.len()).map_err(|_| KrbError::MessageTooLarge)?;

    buf.reserve(LENGTH_PREFIX + der.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(der);
    Ok(())
}

/// Client side of a KDC stream: sends requests, reads replies.
#[derive(Debug, Clone)]
pub struct KerberosTcpCodec {
    max_size: usize,
}

impl KerberosTcpCodec {
    pub fn new(max_size: usize) -> Self {
        KerberosTcpCodec { max_size }
    }
}

impl Default for KerberosTcpCodec {
    fn default() -> Self {
        KerberosTcpCodec::new(DEFAULT_IO_MAX_SIZE)
    }
}

impl Decoder for KerberosTcpCodec {
    type Item = KerberosReply;
    type Error = KrbError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        decode_frame(buf, self.max_size)?
            .map(|frame| KerberosReply::from_der(&frame))
            .transpose()
    }
}

impl Encoder<KerberosRequest> for KerberosTcpCodec {
    type Error = KrbError;

    fn encode(&mut self, msg: KerberosRequest, buf: &mut BytesMut) -> Result<(), Self::Error> {
        encode_frame(&msg.to_der()?, self.max_size, buf)
    }
}

/// Server side of a KDC stream: reads requests, sends replies.
#[derive(Debug, Clone)]
pub struct KdcTcpCodec {
    max_size: usize,
}

impl KdcTcpCodec {
    pub fn new(max_size: usize) -> Self {
        KdcTcpCodec { max_size }
    }
}

impl Default for KdcTcpCodec {
    fn default() -> Self {
        KdcTcpCodec::new(DEFAULT_IO_MAX_SIZE)
    }
}

impl Decoder for KdcTcpCodec {
    type Item = KerberosRequest;
    type Error = KrbError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        decode_frame(buf, self.max_size)?
            .map(|frame| KerberosRequest::from_der(&frame))
            .transpose()
    }
}

impl Encoder<KerberosReply> for KdcTcpCodec {
    type Error = KrbError;

    fn encode(&mut self, msg: KerberosReply, buf: &mut BytesMut) -> Result<(), Self::Error> {
        encode_frame(&msg.to_der()?, self.max_size, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::{KdcTcpCodec, KerberosTcpCodec};
    use crate::asn1::constants::{EncryptionType, KrbErrorCode};
    use crate::asn1::kerberos_flags::KerberosFlags;
    use crate::error::KrbError;
    use crate::proto::{ErrorReply, KdcRequest, KerberosReply, KerberosRequest, Name, RequestBody};
    use bytes::BytesMut;
    use futures::{SinkExt, StreamExt};
    use std::time::{Duration, SystemTime};
    use tokio_util::codec::{Decoder, Encoder, Framed};

    fn request() -> KerberosRequest {
        let body = RequestBody {
            kdc_options: KerberosFlags::none(),
            client: Some(Name::principal("alice", "EXAMPLE.COM")),
            service: Name::service_krbtgt("EXAMPLE.COM"),
            from: None,
            until: SystemTime::now() + Duration::from_secs(3600),
            renew_until: None,
            nonce: 42,
            etypes: vec![i32::from(EncryptionType::AES256_CTS_HMAC_SHA1_96)],
        };
        KerberosRequest::AS(Box::new(KdcRequest::new(body, vec![]).unwrap()))
    }

    fn reply() -> KerberosReply {
        KerberosReply::from(ErrorReply::new(
            KrbErrorCode::KdcErrPreauthRequired,
            Name::service_krbtgt("EXAMPLE.COM"),
            SystemTime::now(),
        ))
    }

    #[test]
    fn frame_carries_a_length_prefix() {
        let req = request();
        let der = req.to_der().unwrap();

        let mut buf = BytesMut::new();
        KerberosTcpCodec::default().encode(req, &mut buf).unwrap();
        assert_eq!(&buf[..4], &(der.len() as u32).to_be_bytes());
        assert_eq!(&buf[4..], der.as_slice());

        let decoded = KdcTcpCodec::default().decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.inner().body().nonce, 42);
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_frames_wait_for_more() {
        let mut whole = BytesMut::new();
        KdcTcpCodec::default().encode(reply(), &mut whole).unwrap();

        let mut codec = KerberosTcpCodec::default();
        let mut buf = BytesMut::new();

        buf.extend_from_slice(&whole[..2]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&whole[2..whole.len() - 1]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&whole[whole.len() - 1..]);
        match codec.decode(&mut buf).unwrap() {
            Some(KerberosReply::Error(err)) => {
                assert_eq!(err.code(), KrbErrorCode::KdcErrPreauthRequired)
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn oversized_frames_are_refused() {
        let mut buf = BytesMut::from(&(4096u32).to_be_bytes()[..]);
        let err = KdcTcpCodec::new(1024).decode(&mut buf).unwrap_err();
        assert!(matches!(err, KrbError::MessageTooLarge));

        let mut out = BytesMut::new();
        let err = KerberosTcpCodec::new(16)
            .encode(request(), &mut out)
            .unwrap_err();
        assert!(matches!(err, KrbError::MessageTooLarge));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn back_to_back_frames_over_a_stream() {
        let _ = tracing_subscriber::fmt::try_init();

        let (client, server) = tokio::io::duplex(4096);
        let mut client = Framed::new(client, KerberosTcpCodec::default());
        let mut server = Framed::new(server, KdcTcpCodec::default());

        client.send(request()).await.unwrap();
        client.send(request()).await.unwrap();

        for _ in 0..2 {
            let req = server.next().await.unwrap().unwrap();
            assert!(matches!(req, KerberosRequest::AS(_)));
            server.send(reply()).await.unwrap();
        }

        for _ in 0..2 {
            assert!(matches!(
                client.next().await.unwrap().unwrap(),
                KerberosReply::Error(_)
            ));
        }
    }
}
