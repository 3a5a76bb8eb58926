pub mod correlation;
pub mod errors;

pub use correlation::{propagate_correlation_id, CorrelationConfig, CorrelationId};
pub use errors::translate_errors;
