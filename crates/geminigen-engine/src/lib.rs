pub mod extract;
pub mod output;
pub mod request;
pub mod session;
pub mod transport;

pub use extract::{decode_images, is_likely_base64_image, DecodedImage, ResponseDiagnostics};
pub use request::{build_payload, endpoint_for_model, GenerateMode, SourceImage};
pub use session::{GenerationReport, Generator, SavedImage, DEFAULT_PROMPT};
pub use transport::{send_with_retry, ReqwestTransport, RetryPolicy, Transport};
