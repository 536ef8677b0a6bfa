pub mod http;
pub mod reporter;
pub mod signing;
pub mod traits;

pub use reporter::{BackendReporter, LogNotifier};
pub use signing::{sign_payload, verify_signature, SIGNATURE_HEADER};
pub use traits::{ViolationKind, ViolationNotifier, ViolationReport};
