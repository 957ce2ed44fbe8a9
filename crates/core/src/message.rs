//! Message, chunk and destination group types.
//!
//! A [`Message`] is created by a source and never changes after it has been
//! enqueued. An output drains its buffer into a [`Chunk`]; the destination
//! resolver then reads the chunk and produces [`DestinationGroups`], one
//! ordered sub-sequence per resolved destination.
//!
//! ```text
//! enqueue -> MessageBuffer -> Chunk -> DestinationGroups -> send(group, destination)
//! ```

use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;

/// Opaque payload plus optional key/value attributes.
///
/// Cloning is cheap: the payload is reference counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    payload: Bytes,
    attributes: BTreeMap<String, String>,
}

impl Message {
    /// Creates a message without attributes.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Adds an attribute, replacing an existing one with the same key.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Adds every attribute from `attributes` that the message does not
    /// already carry. Attributes set by the source win.
    pub fn with_default_attributes(mut self, attributes: &BTreeMap<String, String>) -> Self {
        for (key, value) in attributes {
            self.attributes
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        self
    }

    /// Returns a copy carrying `payload` and the same attributes.
    pub fn with_payload(&self, payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            attributes: self.attributes.clone(),
        }
    }

    /// Raw payload bytes.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Attributes attached by the source or at send time.
    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// Looks up one attribute.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// True when the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl From<&'static str> for Message {
    fn from(value: &'static str) -> Self {
        Self::new(Bytes::from_static(value.as_bytes()))
    }
}

impl From<String> for Message {
    fn from(value: String) -> Self {
        Self::new(Bytes::from(value))
    }
}

/// An ordered batch drained from one output's buffer.
///
/// A chunk is read-only: the resolver and the sender only borrow it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chunk {
    messages: Vec<Message>,
}

impl Chunk {
    /// Wraps drained messages.
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    /// Messages in enqueue order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True when the chunk holds no message.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Total payload bytes.
    pub fn byte_len(&self) -> usize {
        self.messages.iter().map(Message::len).sum()
    }
}

impl FromIterator<Message> for Chunk {
    fn from_iter<I: IntoIterator<Item = Message>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Messages that resolved to the same destination, in chunk order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationGroup {
    destination: String,
    messages: Vec<Message>,
}

impl DestinationGroup {
    /// Resolved destination string.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Messages routed to this destination.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of messages in the group.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True when the group is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Replaces every message, keeping the order. Used to apply the
    /// compression codec after routing.
    pub fn map_messages(self, f: impl FnMut(Message) -> Message) -> Self {
        Self {
            destination: self.destination,
            messages: self.messages.into_iter().map(f).collect(),
        }
    }

    /// Splits the group into destination and messages.
    pub fn into_parts(self) -> (String, Vec<Message>) {
        (self.destination, self.messages)
    }
}

/// Mapping from destination to its ordered sub-batch, built fresh for
/// every flush.
///
/// Groups are kept in the order their destination was first seen so that
/// iteration is deterministic.
#[derive(Debug, Clone, Default)]
pub struct DestinationGroups {
    groups: Vec<DestinationGroup>,
    index: HashMap<String, usize>,
}

impl DestinationGroups {
    /// Creates an empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// A mapping with exactly one group.
    pub fn single(destination: impl Into<String>, messages: Vec<Message>) -> Self {
        let mut groups = Self::new();
        let destination = destination.into();
        groups.index.insert(destination.clone(), 0);
        groups.groups.push(DestinationGroup {
            destination,
            messages,
        });
        groups
    }

    /// Appends `message` to the group for `destination`, creating it if needed.
    pub fn push(&mut self, destination: &str, message: Message) {
        match self.index.get(destination) {
            Some(&idx) => self.groups[idx].messages.push(message),
            None => {
                self.index
                    .insert(destination.to_owned(), self.groups.len());
                self.groups.push(DestinationGroup {
                    destination: destination.to_owned(),
                    messages: vec![message],
                });
            }
        }
    }

    /// Messages for one destination.
    pub fn get(&self, destination: &str) -> Option<&[Message]> {
        self.index
            .get(destination)
            .map(|&idx| self.groups[idx].messages.as_slice())
    }

    /// Destinations in first-seen order.
    pub fn destinations(&self) -> Vec<&str> {
        self.groups.iter().map(|g| g.destination.as_str()).collect()
    }

    /// Iterates the groups.
    pub fn iter(&self) -> std::slice::Iter<'_, DestinationGroup> {
        self.groups.iter()
    }

    /// Number of distinct destinations.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// True when no message was routed.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Number of routed messages across all groups.
    pub fn message_count(&self) -> usize {
        self.groups.iter().map(DestinationGroup::len).sum()
    }
}

impl IntoIterator for DestinationGroups {
    type Item = DestinationGroup;
    type IntoIter = std::vec::IntoIter<DestinationGroup>;

    fn into_iter(self) -> Self::IntoIter {
        self.groups.into_iter()
    }
}

impl<'a> IntoIterator for &'a DestinationGroups {
    type Item = &'a DestinationGroup;
    type IntoIter = std::slice::Iter<'a, DestinationGroup>;

    fn into_iter(self) -> Self::IntoIter {
        self.groups.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payloads(messages: &[Message]) -> Vec<&[u8]> {
        messages.iter().map(|m| m.payload().as_ref()).collect()
    }

    #[test]
    fn message_attributes_source_wins_over_defaults() {
        let mut defaults = BTreeMap::new();
        defaults.insert("source".to_owned(), "config".to_owned());
        defaults.insert("env".to_owned(), "prod".to_owned());

        let msg = Message::from("x")
            .with_attribute("source", "udp")
            .with_default_attributes(&defaults);

        assert_eq!(msg.attribute("source"), Some("udp"));
        assert_eq!(msg.attribute("env"), Some("prod"));
    }

    #[test]
    fn with_payload_keeps_attributes() {
        let msg = Message::from("plain").with_attribute("k", "v");
        let replaced = msg.with_payload(Bytes::from_static(b"other"));
        assert_eq!(replaced.payload().as_ref(), b"other");
        assert_eq!(replaced.attribute("k"), Some("v"));
        // the original is untouched
        assert_eq!(msg.payload().as_ref(), b"plain");
    }

    #[test]
    fn chunk_reports_sizes() {
        let chunk: Chunk = vec![Message::from("ab"), Message::from("cde")]
            .into_iter()
            .collect();
        assert_eq!(chunk.len(), 2);
        assert_eq!(chunk.byte_len(), 5);
        assert!(!chunk.is_empty());
        assert!(Chunk::default().is_empty());
    }

    #[test]
    fn groups_preserve_first_seen_order_and_message_order() {
        let mut groups = DestinationGroups::new();
        groups.push("x", Message::from("1"));
        groups.push("y", Message::from("2"));
        groups.push("x", Message::from("3"));

        assert_eq!(groups.destinations(), vec!["x", "y"]);
        assert_eq!(payloads(groups.get("x").unwrap()), vec![b"1", b"3"]);
        assert_eq!(payloads(groups.get("y").unwrap()), vec![b"2"]);
        assert_eq!(groups.message_count(), 3);
        assert!(groups.get("z").is_none());
    }

    #[test]
    fn single_group() {
        let groups = DestinationGroups::single("events", vec![Message::from("a")]);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups.get("events").map(<[Message]>::len), Some(1));
    }

    #[test]
    fn map_messages_keeps_destination() {
        let groups = DestinationGroups::single("d", vec![Message::from("a"), Message::from("b")]);
        let group = groups.into_iter().next().unwrap();
        let upper = group.map_messages(|m| {
            let bytes = m.payload().to_ascii_uppercase();
            m.with_payload(bytes)
        });
        let (dest, messages) = upper.into_parts();
        assert_eq!(dest, "d");
        assert_eq!(payloads(&messages), vec![b"A", b"B"]);
    }
}
