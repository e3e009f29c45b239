pub mod gateway;
pub mod prompt;

pub use gateway::{
    AssistantGateway, AssistantReply, ChatMessage, ProcedureSummary, FALLBACK_REPLY,
    UNAVAILABLE_REPLY,
};
