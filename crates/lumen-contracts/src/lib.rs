pub mod chat;
pub mod error;
pub mod events;
pub mod features;
pub mod media;
pub mod models;
pub mod slider;
pub mod studio;
pub mod upload;

pub use error::StudioError;
pub use media::{AcceptClass, MediaKind, MediaRef};
pub use studio::{GenerationMode, GenerationResult, GenerationTicket, Stage, Studio};
