pub mod error;
pub mod message;
pub mod payloads;

#[cfg(test)]
mod tests;

pub use error::{CloudError, Result};
pub use message::{now_millis, Message, MessageBody, MessageId, NodeId, TYPE_FIELD};
pub use payloads::*;
