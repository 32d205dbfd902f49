pub mod duplicate;
pub mod extractor;
pub mod favorites;
pub mod hash;
pub mod library;
pub mod progress;
pub mod recommend;
pub mod store;
pub mod thumbnail;

pub use duplicate::DuplicateService;
pub use favorites::FavoriteService;
pub use hash::HashService;
pub use library::LibraryService;
pub use recommend::RecommendService;
pub use thumbnail::ThumbnailService;
