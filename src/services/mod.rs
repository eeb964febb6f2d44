pub mod gateway;
pub mod gemini;
pub mod narration;
pub mod player;
pub mod prompts;
pub mod session;
