/// Wire protocol types: request/response envelopes and correlation ids.
///
/// Everything here is pure data; no I/O and no locking.
mod correlation;
mod message;

pub use correlation::{CorrelationId, IdGenerator};
pub use message::{ApiError, RequestEnvelope, ResponseEnvelope, DELIMITER};
