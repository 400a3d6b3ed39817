mod types;

#[cfg(feature = "google")]
pub mod google;
pub mod stub;

pub use types::{to_contents, ChatRepository, Content, Part, StreamFuture, TextStream};
