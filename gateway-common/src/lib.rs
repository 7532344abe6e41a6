//! Inference Gateway Common Types
//!
//! Wire types shared by the gateway server and its clients.

pub mod detection;
pub mod ollama;

pub use detection::{Detection, DetectionResponse};
pub use ollama::{
    ChatRequest, ChatResponse, ErrorResponse, GenerateRequest, GenerateResponse, Message, Options,
};
