mod assembler;
pub use assembler::{looks_complete, response_seems_complete, LineAssembler, StreamTiming};

pub mod backend;
pub use backend::{
    ByteStream, FakeBackend, HttpBackend, HttpMethod, ProviderBackend, ProviderRequest,
    ProviderResponse,
};

mod client;
pub use client::{GenerateOptions, GenerateRequest, ModelInfo, OllamaClient};
