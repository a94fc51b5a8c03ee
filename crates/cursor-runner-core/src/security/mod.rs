pub mod redact;
pub mod url_mask;

pub use redact::SecretRedactor;
pub use url_mask::mask_query_params;
