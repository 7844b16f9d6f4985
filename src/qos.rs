use std::fmt;

/// Quality of Service
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum QoS {
	#[default]
	AtMostOnce = 0,
	AtLeastOnce,
	ExactlyOnce,
}

#[derive(Debug, thiserror::Error)]
#[error("quality of service must be 0, 1 or 2")]
pub struct InvalidQoS;

impl QoS {
	/// Whether a Publish packet at this level carries a packet identifier.
	#[inline]
	pub fn needs_id(self) -> bool {
		!matches!(self, Self::AtMostOnce)
	}
}

impl TryFrom<u8> for QoS {
	type Error = InvalidQoS;
	#[inline]
	fn try_from(value: u8) -> Result<Self, Self::Error> {
		match value {
			0 => Ok(Self::AtMostOnce),
			1 => Ok(Self::AtLeastOnce),
			2 => Ok(Self::ExactlyOnce),
			_ => Err(InvalidQoS),
		}
	}
}

impl fmt::Display for QoS {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", *self as u8)
	}
}
