pub mod chat;
pub mod credentials;
pub mod error;
pub mod events;
pub mod history;
pub mod images;

pub use error::EditorError;
