use super::{options::Options, ClientError};
use bytes::BytesMut;
use tokio::{
	io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
	net::TcpStream,
	time::Duration,
};

pub(crate) trait AsyncReadWrite: AsyncRead + AsyncWrite + Send + Sync {}
impl AsyncReadWrite for TcpStream {}

#[cfg(feature = "tls")]
impl AsyncReadWrite for tokio_rustls::client::TlsStream<TcpStream> {}

#[cfg(test)]
impl AsyncReadWrite for tokio::io::DuplexStream {}

/// A full-duplex byte stream to the broker.
///
/// The framer neither knows nor cares which variant it reads from; a
/// WebSocket transport surfaces frame payloads as plain bytes and sends
/// each outbound packet as a single binary frame.
pub(crate) enum Transport {
	Stream(Box<dyn AsyncReadWrite + Unpin>),
	#[cfg(feature = "websocket")]
	WebSocket(tokio_tungstenite::WebSocketStream<Box<dyn AsyncReadWrite + Unpin>>),
}

impl Transport {
	/// Establishes a transport to the broker described by `options`:
	/// TCP, then optionally TLS, then optionally the WebSocket handshake.
	pub async fn open(options: &Options) -> Result<Self, ClientError> {
		let stream = TcpStream::connect((options.host.as_str(), options.port())).await?;
		stream.set_linger(Some(Duration::from_secs(options.keep_alive.into())))?;

		#[cfg(feature = "tls")]
		let stream: Box<dyn AsyncReadWrite + Unpin> = if options.tls {
			Box::new(tls::wrap(stream, options.sni_host(), options.tls_config.clone()).await?)
		} else {
			Box::new(stream)
		};

		#[cfg(not(feature = "tls"))]
		let stream: Box<dyn AsyncReadWrite + Unpin> = Box::new(stream);

		#[cfg(feature = "websocket")]
		if options.websocket {
			return websocket::wrap(stream, options).await;
		}

		Ok(Self::Stream(stream))
	}

	/// Reads at least one byte into `buffer`. Returns 0 at end of stream.
	pub async fn read_buf(&mut self, buffer: &mut BytesMut) -> Result<usize, ClientError> {
		match self {
			Self::Stream(stream) => Ok(stream.read_buf(buffer).await?),
			#[cfg(feature = "websocket")]
			Self::WebSocket(stream) => websocket::read_buf(stream, buffer).await,
		}
	}

	/// Writes the whole of `bytes` to the peer.
	pub async fn write_all(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
		match self {
			Self::Stream(stream) => {
				stream.write_all(bytes).await?;
				stream.flush().await?;
				Ok(())
			}
			#[cfg(feature = "websocket")]
			Self::WebSocket(stream) => {
				use futures_util::SinkExt;
				use tokio_tungstenite::tungstenite::Message;

				stream
					.send(Message::Binary(bytes.to_vec()))
					.await
					.map_err(websocket::to_client_error)
			}
		}
	}

	/// Closes the transport; errors at this point are of no interest.
	pub async fn shutdown(&mut self) {
		match self {
			Self::Stream(stream) => {
				let _ = stream.shutdown().await;
			}
			#[cfg(feature = "websocket")]
			Self::WebSocket(stream) => {
				use futures_util::SinkExt;
				let _ = stream.close(None).await;
			}
		}
	}
}

#[cfg(feature = "tls")]
mod tls {
	use super::AsyncReadWrite;
	use crate::client::ClientError;
	use std::{io, sync::Arc};
	use tokio::net::TcpStream;
	use tokio_rustls::{
		client::TlsStream,
		rustls::{ClientConfig, OwnedTrustAnchor, RootCertStore, ServerName},
		TlsConnector,
	};

	pub(super) async fn wrap(
		stream: TcpStream,
		host: &str,
		config: Option<Arc<ClientConfig>>,
	) -> Result<TlsStream<TcpStream>, ClientError> {
		let config = config.unwrap_or_else(|| {
			let mut root_cert_store = RootCertStore::empty();
			root_cert_store.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
				OwnedTrustAnchor::from_subject_spki_name_constraints(
					ta.subject,
					ta.spki,
					ta.name_constraints,
				)
			}));

			Arc::new(
				ClientConfig::builder()
					.with_safe_defaults()
					.with_root_certificates(root_cert_store)
					.with_no_client_auth(),
			)
		});
		let connector = TlsConnector::from(config);

		let dnsname = ServerName::try_from(host).map_err(|_| {
			ClientError::Transport(io::Error::new(
				io::ErrorKind::InvalidInput,
				"host is not a valid TLS server name",
			))
		})?;

		Ok(connector.connect(dnsname, stream).await?)
	}
}

#[cfg(feature = "websocket")]
mod websocket {
	use super::{AsyncReadWrite, Transport};
	use crate::client::{options::Options, ClientError};
	use bytes::BytesMut;
	use futures_util::StreamExt;
	use std::io;
	use tokio_tungstenite::{
		client_async,
		tungstenite::{
			client::IntoClientRequest,
			http::{header, HeaderValue},
			Message,
		},
		WebSocketStream,
	};

	const SUBPROTOCOL: &str = "mqtt";

	pub(super) fn to_client_error(error: tokio_tungstenite::tungstenite::Error) -> ClientError {
		match error {
			tokio_tungstenite::tungstenite::Error::Io(error) => ClientError::Transport(error),
			other => ClientError::Transport(io::Error::new(io::ErrorKind::Other, other)),
		}
	}

	pub(super) async fn wrap(
		stream: Box<dyn AsyncReadWrite + Unpin>,
		options: &Options,
	) -> Result<Transport, ClientError> {
		let scheme = if options.tls { "wss" } else { "ws" };
		let url = format!(
			"{scheme}://{}:{}{}",
			options.host,
			options.port(),
			options.websocket_path
		);

		let mut request = url.into_client_request().map_err(to_client_error)?;
		request.headers_mut().insert(
			header::SEC_WEBSOCKET_PROTOCOL,
			HeaderValue::from_static(SUBPROTOCOL),
		);

		let (stream, _response) = client_async(request, stream)
			.await
			.map_err(to_client_error)?;
		Ok(Transport::WebSocket(stream))
	}

	/// Surfaces WebSocket frame payloads as a byte stream. Frames of any
	/// fragmentation are accepted; control frames are handled by the
	/// protocol machinery and skipped here.
	pub(super) async fn read_buf(
		stream: &mut WebSocketStream<Box<dyn AsyncReadWrite + Unpin>>,
		buffer: &mut BytesMut,
	) -> Result<usize, ClientError> {
		loop {
			match stream.next().await {
				None | Some(Ok(Message::Close(_))) => return Ok(0),
				Some(Ok(Message::Binary(data))) => {
					if data.is_empty() {
						continue;
					}
					buffer.extend_from_slice(&data);
					return Ok(data.len());
				}
				Some(Ok(Message::Text(data))) => {
					if data.is_empty() {
						continue;
					}
					buffer.extend_from_slice(data.as_bytes());
					return Ok(data.len());
				}
				Some(Ok(_)) => continue,
				Some(Err(error)) => return Err(to_client_error(error)),
			}
		}
	}
}
