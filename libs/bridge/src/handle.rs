//! Foreign Handle Types
//!
//! A handle is the opaque integer the foreign library hands out for one of
//! its objects. Handles only mean something together with their declared
//! type: a `Stream` 7 and a `Topic` 7 are unrelated.

use std::fmt;

/// Raw handle as minted by the foreign library
pub type RawHandle = u64;

/// Universal "no object" sentinel for handles
pub const INVALID_HANDLE: RawHandle = 0;

/// Failure sentinel for byte counts and status codes
pub const FAILED: i64 = -1;

/// Declared type of a foreign handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleType {
    Option,
    Host,
    Peerstore,
    PeerId,
    MultiaddrList,
    Stream,
    Listener,
    Iterator,
    Node,
    PubSub,
    Topic,
    Subscription,
    Message,
}

impl HandleType {
    pub const ALL: [HandleType; 13] = [
        HandleType::Option,
        HandleType::Host,
        HandleType::Peerstore,
        HandleType::PeerId,
        HandleType::MultiaddrList,
        HandleType::Stream,
        HandleType::Listener,
        HandleType::Iterator,
        HandleType::Node,
        HandleType::PubSub,
        HandleType::Topic,
        HandleType::Subscription,
        HandleType::Message,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            HandleType::Option => "option",
            HandleType::Host => "host",
            HandleType::Peerstore => "peerstore",
            HandleType::PeerId => "peer id",
            HandleType::MultiaddrList => "multiaddr list",
            HandleType::Stream => "stream",
            HandleType::Listener => "listener",
            HandleType::Iterator => "iterator",
            HandleType::Node => "node",
            HandleType::PubSub => "pubsub",
            HandleType::Topic => "topic",
            HandleType::Subscription => "subscription",
            HandleType::Message => "message",
        }
    }
}

impl fmt::Display for HandleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
