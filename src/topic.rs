use std::{borrow::Borrow, fmt, ops::Deref};
use thiserror::Error;

/// The name a Publish packet is addressed to.
///
/// A topic is plain UTF-8 with `/`-separated levels. Unlike a
/// [`Filter`](crate::Filter) it carries no wildcards: `+`, `#` and the NUL
/// character are refused outright, as is anything that does not fit an
/// MQTT string. `Topic` borrows its text; [`TopicBuf`] owns it.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Topic(str);

/// An owned [`Topic`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TopicBuf(String);

#[derive(Debug, Error)]
pub enum InvalidTopic {
	#[error("topic cannot be empty")]
	Empty,
	#[error("topic cannot exceed maximum length for an MQTT string (65,535 bytes)")]
	TooLong,
	#[error("topic cannot contain '{1}' (at byte {0})")]
	InvalidCharacter(usize, char),
}

fn validate(topic: &str) -> Result<(), InvalidTopic> {
	if topic.is_empty() {
		return Err(InvalidTopic::Empty);
	}

	if topic.len() > u16::MAX as usize {
		return Err(InvalidTopic::TooLong);
	}

	let forbidden = topic
		.char_indices()
		.find(|(_, c)| matches!(c, '+' | '#' | '\0'));
	if let Some((position, character)) = forbidden {
		return Err(InvalidTopic::InvalidCharacter(position, character));
	}

	Ok(())
}

impl Topic {
	/// Checks `topic` against the topic grammar and borrows it as a
	/// `Topic`.
	pub fn new<S: AsRef<str> + ?Sized>(topic: &S) -> Result<&Topic, InvalidTopic> {
		let topic = topic.as_ref();
		validate(topic)?;
		Ok(Self::cast(topic))
	}

	/// Wraps a topic known to be valid at compile time, skipping the
	/// checks.
	pub fn from_static(topic: &'static str) -> &'static Self {
		Self::cast(topic)
	}

	/// The topic text.
	#[inline]
	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// How many bytes the topic occupies on the wire, not counting the
	/// length prefix.
	#[inline]
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Always `false`: a zero-length topic never passes validation.
	#[inline]
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Copies the topic into an owned [`TopicBuf`].
	#[inline]
	pub fn to_topic_buf(&self) -> TopicBuf {
		TopicBuf(self.0.to_owned())
	}

	/// Walks the `/`-separated levels of the name.
	#[inline]
	pub fn levels(&self) -> impl Iterator<Item = &str> {
		self.0.split('/')
	}

	fn cast(topic: &str) -> &Self {
		// Topic is a transparent wrapper around str.
		unsafe { &*(topic as *const str as *const Topic) }
	}
}

impl TopicBuf {
	/// Checks `topic` against the topic grammar and takes ownership of it.
	pub fn new(topic: impl Into<String>) -> Result<Self, InvalidTopic> {
		let topic = topic.into();
		validate(&topic)?;
		Ok(Self(topic))
	}

	/// Unwraps the topic text.
	pub fn into_inner(self) -> String {
		self.0
	}
}

impl Deref for TopicBuf {
	type Target = Topic;
	#[inline]
	fn deref(&self) -> &Topic {
		Topic::cast(&self.0)
	}
}

impl Borrow<Topic> for TopicBuf {
	#[inline]
	fn borrow(&self) -> &Topic {
		self
	}
}

impl ToOwned for Topic {
	type Owned = TopicBuf;
	#[inline]
	fn to_owned(&self) -> TopicBuf {
		self.to_topic_buf()
	}
}

impl TryFrom<&str> for TopicBuf {
	type Error = InvalidTopic;
	#[inline]
	fn try_from(topic: &str) -> Result<Self, Self::Error> {
		Self::new(topic)
	}
}

impl TryFrom<String> for TopicBuf {
	type Error = InvalidTopic;
	#[inline]
	fn try_from(topic: String) -> Result<Self, Self::Error> {
		Self::new(topic)
	}
}

impl fmt::Display for Topic {
	#[inline]
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl fmt::Display for TopicBuf {
	#[inline]
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}
