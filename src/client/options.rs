use crate::misc::{Credentials, Will};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_MQTT_PORT: u16 = 1883;
pub const DEFAULT_MQTTS_PORT: u16 = 8883;
pub const DEFAULT_WEBSOCKET_PATH: &str = "/mqtt";

/// The largest packet the protocol can frame.
pub const MAXIMUM_PACKET_SIZE: usize = 268_435_455;

/// Client options.
///
/// The transport knobs select between plain TCP, TLS and WebSocket; the
/// session fields populate the Connect packet. Invalid combinations are
/// rejected by [`Client::new`](super::Client::new).
#[derive(Clone, Debug)]
pub struct Options {
	/// Hostname or IP address of the MQTT Server.
	pub host: String,

	/// Port to connect to. When unset, derived from `tls` (1883 plain,
	/// 8883 TLS). An explicit port of 0 is rejected.
	pub port: Option<u16>,

	/// Connect through TLS. Requires the `tls` crate feature.
	pub tls: bool,

	/// Overrides the server name presented during the TLS handshake.
	/// Defaults to `host`.
	pub sni: Option<String>,

	/// TLS configuration handed to the connector. When unset, a
	/// configuration trusting the webpki roots is built.
	#[cfg(feature = "tls")]
	pub tls_config: Option<std::sync::Arc<tokio_rustls::rustls::ClientConfig>>,

	/// Tunnel packets through WebSocket binary frames. Requires the
	/// `websocket` crate feature.
	pub websocket: bool,

	/// URL path of the WebSocket endpoint.
	pub websocket_path: String,

	/// How long to wait for the acknowledgement of a request before failing
	/// it. `None` waits forever.
	pub timeout: Option<Duration>,

	/// Inbound packets announcing a larger total size tear the connection
	/// down.
	pub max_packet_size: usize,

	/// Client identifier sent in the Connect packet.
	pub client_id: String,

	/// Keep alive interval in seconds. Zero disables keep alive.
	pub keep_alive: u16,

	/// Ask the Server to discard any previous session state.
	pub clean_session: bool,

	/// Username and optional password for authentication.
	pub credentials: Option<Credentials>,

	/// Will message the Server publishes if this client vanishes.
	pub will: Option<Will>,
}

impl Default for Options {
	fn default() -> Self {
		Self {
			host: String::from("localhost"),
			port: None,
			tls: false,
			sni: None,
			#[cfg(feature = "tls")]
			tls_config: None,
			websocket: false,
			websocket_path: String::from(DEFAULT_WEBSOCKET_PATH),
			timeout: None,
			max_packet_size: MAXIMUM_PACKET_SIZE,
			client_id: String::new(),
			keep_alive: 60,
			clean_session: true,
			credentials: None,
			will: None,
		}
	}
}

impl<H: AsRef<str>> From<(H, u16)> for Options {
	#[inline]
	fn from(value: (H, u16)) -> Self {
		let (host, port) = value;
		Self {
			host: host.as_ref().into(),
			port: Some(port),
			..Default::default()
		}
	}
}

#[derive(Debug, Error)]
pub enum InvalidOptions {
	#[error("host cannot be empty")]
	Host,
	#[error("port cannot be 0")]
	Port,
	#[error("maximum packet size must be between 1 and 268,435,455 bytes")]
	MaxPacketSize,
	#[error("an empty client identifier requires a clean session")]
	ClientId,
	#[error("websocket path must begin with '/'")]
	WebsocketPath,
	#[error("this build does not include TLS support (enable the `tls` feature)")]
	TlsSupport,
	#[error("this build does not include WebSocket support (enable the `websocket` feature)")]
	WebsocketSupport,
}

impl Options {
	pub(crate) fn validate(&self) -> Result<(), InvalidOptions> {
		if self.host.is_empty() {
			return Err(InvalidOptions::Host);
		}

		if self.port == Some(0) {
			return Err(InvalidOptions::Port);
		}

		if self.max_packet_size == 0 || self.max_packet_size > MAXIMUM_PACKET_SIZE {
			return Err(InvalidOptions::MaxPacketSize);
		}

		if self.client_id.is_empty() && !self.clean_session {
			return Err(InvalidOptions::ClientId);
		}

		if self.websocket && !self.websocket_path.starts_with('/') {
			return Err(InvalidOptions::WebsocketPath);
		}

		if self.tls && !cfg!(feature = "tls") {
			return Err(InvalidOptions::TlsSupport);
		}

		if self.websocket && !cfg!(feature = "websocket") {
			return Err(InvalidOptions::WebsocketSupport);
		}

		Ok(())
	}

	#[inline]
	pub(crate) fn port(&self) -> u16 {
		self.port.unwrap_or(if self.tls {
			DEFAULT_MQTTS_PORT
		} else {
			DEFAULT_MQTT_PORT
		})
	}

	#[cfg(feature = "tls")]
	#[inline]
	pub(crate) fn sni_host(&self) -> &str {
		self.sni.as_deref().unwrap_or(&self.host)
	}
}
