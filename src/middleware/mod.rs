// Middleware for resilient calls to the translation service
//
// Provides the retry combinator and its injectable clock

pub mod retry;

// Re-export commonly used types
pub use retry::{with_retry, RetryPolicy, Sleeper, TokioSleeper};
