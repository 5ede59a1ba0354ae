use crate::constants::{DEFAULT_IO_MAX_SIZE, DEFAULT_TRANSPORT_TIMEOUT};
use crate::error::KrbError;
use crate::proto::{KerberosReply, KerberosRequest};
use crate::KerberosTcpCodec;
use futures::{SinkExt, StreamExt};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpStream, UdpSocket};
use tokio_util::codec::Framed;
use tracing::{error, instrument, trace};

/// Delivers one request to a KDC and returns its answer.
pub trait Transport: Send + Sync {
    fn send_recv(
        &self,
        request: KerberosRequest,
    ) -> impl Future<Output = Result<KerberosReply, KrbError>> + Send;
}

/// RFC 4120 section 7.2.2: each message is preceded by its length as four
/// octets in network order. One connection per exchange.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    address: SocketAddr,
    timeout: Duration,
    max_size: usize,
}

impl TcpTransport {
    pub fn new(address: SocketAddr) -> Self {
        TcpTransport {
            address,
            timeout: DEFAULT_TRANSPORT_TIMEOUT,
            max_size: DEFAULT_IO_MAX_SIZE,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }
}

impl Transport for TcpTransport {
    #[instrument(level = "debug", skip_all, fields(address = %self.address))]
    async fn send_recv(&self, request: KerberosRequest) -> Result<KerberosReply, KrbError> {
        let exchange = async {
            let stream = TcpStream::connect(self.address).await?;
            let mut framed = Framed::new(stream, KerberosTcpCodec::new(self.max_size));

            framed.send(request).await?;
            trace!("request sent");

            match framed.next().await {
                Some(reply) => reply,
                None => {
                    error!("kdc closed the connection without answering");
                    Err(KrbError::TransportClosed)
                }
            }
        };

        tokio::time::timeout(self.timeout, exchange).await?
    }
}

/// One datagram each way. Replies larger than `max_size` are refused.
#[derive(Debug, Clone)]
pub struct UdpTransport {
    address: SocketAddr,
    timeout: Duration,
    max_size: usize,
}

impl UdpTransport {
    pub fn new(address: SocketAddr) -> Self {
        UdpTransport {
            address,
            timeout: DEFAULT_TRANSPORT_TIMEOUT,
            max_size: DEFAULT_IO_MAX_SIZE,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Transport for UdpTransport {
    #[instrument(level = "debug", skip_all, fields(address = %self.address))]
    async fn send_recv(&self, request: KerberosRequest) -> Result<KerberosReply, KrbError> {
        let der = request.to_der()?;
        let local: SocketAddr = if self.address.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };

        let exchange = async {
            let socket = UdpSocket::bind(local).await?;
            socket.connect(self.address).await?;
            socket.send(&der).await?;

            // One byte more than we accept so an oversized reply is noticed
            // rather than silently truncated.
            let mut buf = vec![0u8; self.max_size + 1];
            let len = socket.recv(&mut buf).await?;
            if len > self.max_size {
                error!(len, "kdc reply exceeds the maximum message size");
                return Err(KrbError::MessageTooLarge);
            }
            KerberosReply::from_der(&buf[..len])
        };

        tokio::time::timeout(self.timeout, exchange).await?
    }
}

#[cfg(test)]
mod tests {
    use super::{TcpTransport, Transport, UdpTransport};
    use crate::asn1::constants::{EncryptionType, KrbErrorCode};
    use crate::asn1::kerberos_flags::KerberosFlags;
    use crate::error::{ErrorClass, KrbError};
    use crate::proto::{
        ErrorReply, KdcRequest, KerberosReply, KerberosRequest, Name, RequestBody,
    };
    use std::time::{Duration, SystemTime};
    use tokio::net::{TcpListener, UdpSocket};

    fn request() -> KerberosRequest {
        let body = RequestBody {
            kdc_options: KerberosFlags::none(),
            client: Some(Name::principal("alice", "EXAMPLE.COM")),
            service: Name::service_krbtgt("EXAMPLE.COM"),
            from: None,
            until: SystemTime::now() + Duration::from_secs(3600),
            renew_until: None,
            nonce: 1,
            etypes: vec![EncryptionType::AES256_CTS_HMAC_SHA1_96.into()],
        };
        KerberosRequest::AS(Box::new(KdcRequest::new(body, vec![]).unwrap()))
    }

    #[tokio::test]
    async fn unresponsive_kdc_times_out() {
        let _ = tracing_subscriber::fmt::try_init();

        // Accepts, then never says anything.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let transport = TcpTransport::new(address).with_timeout(Duration::from_millis(100));
        let err = transport.send_recv(request()).await.unwrap_err();
        assert!(matches!(err, KrbError::TransportTimeout));
        assert_eq!(err.class(), ErrorClass::Resource);
        assert!(err.is_retryable());

        server.abort();
    }

    #[tokio::test]
    async fn udp_round_trip() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let address = server.local_addr().unwrap();

        let kdc = tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            let (len, peer) = server.recv_from(&mut buf).await.unwrap();
            let request = KerberosRequest::from_der(&buf[..len]).unwrap();
            let client = request.inner().body().client().cloned();

            let reply = KerberosReply::from(
                ErrorReply::new(
                    KrbErrorCode::KdcErrCPrincipalUnknown,
                    Name::service_krbtgt("EXAMPLE.COM"),
                    SystemTime::now(),
                )
                .with_client(client),
            );
            server
                .send_to(&reply.to_der().unwrap(), peer)
                .await
                .unwrap();
        });

        let transport = UdpTransport::new(address).with_timeout(Duration::from_secs(5));
        let reply = transport.send_recv(request()).await.unwrap();
        match reply {
            KerberosReply::Error(err) => {
                assert_eq!(err.code(), KrbErrorCode::KdcErrCPrincipalUnknown);
                assert_eq!(err.client(), Some(&Name::principal("alice", "EXAMPLE.COM")));
            }
            _ => unreachable!(),
        }

        kdc.await.unwrap();
    }
}
