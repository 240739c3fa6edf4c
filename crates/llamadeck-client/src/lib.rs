pub mod ollama;
pub mod progress;
pub mod transport;

pub use ollama::{OllamaClient, ShowResponse};
pub use progress::ProgressDecoder;
pub use transport::{ModelTransport, PullStream};
