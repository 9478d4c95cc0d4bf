mod session;
pub use session::SessionRegistry;

mod router;
pub use router::{InferenceProvider, OllamaProvider, UniversalRouter, AUDIO_NOT_IMPLEMENTED};
