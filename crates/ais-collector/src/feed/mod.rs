//! AIS feed client: wire types and the connection lifecycle

pub mod connector;
pub mod message;

pub use connector::{ConnectionState, FeedError, FeedHandler, StreamConnector};
pub use message::{FeedEnvelope, FeedMessage, MessageKind, SubscriptionRequest};
