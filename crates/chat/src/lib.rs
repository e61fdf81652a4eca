pub mod attachment;
pub mod error;
pub mod observable;
pub mod ticker;
pub mod transcript;
pub mod workflow;

pub use attachment::{Attachment, AttachmentId, MimeType};
pub use error::{ChatError, ChatResult};
pub use observable::{Observable, ObservableView};
pub use ticker::ElapsedTicker;
pub use transcript::{LineStyle, TranscriptLine, chronological, render_transcript, render_turn};
pub use workflow::{ChatWorkflow, Phase, WorkflowEvent};
