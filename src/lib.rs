pub mod commands;
pub mod config;
pub mod error;
pub mod media;

pub use commands::{CommandError, Library};
pub use config::Settings;
pub use error::{MediaError, Result};
pub use media::library::{KindFilter, MediaEntry, MediaKind};
