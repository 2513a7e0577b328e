pub mod constants;
mod errors;
pub mod retry;
pub mod timeout;
mod wait_for_element;

pub use errors::SearchError;
pub use retry::{RetryPolicy, retry_until};
pub use wait_for_element::wait_for_selector;
