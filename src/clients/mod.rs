pub mod completion;
pub mod file_store;
pub mod openai_client;

pub use completion::{
    Completion, CompletionRequest, CompletionService, ContentPart, FileRef, FinishReason,
    TokenUsage,
};
pub use file_store::{FileStore, OpenAiFileStore};
pub use openai_client::OpenAiCompletion;
