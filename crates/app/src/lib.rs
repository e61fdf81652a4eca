pub mod console;
pub mod error;
pub mod settings;

pub use error::{AppError, AppResult};
pub use settings::{LlemmySettings, ModelSettings};
