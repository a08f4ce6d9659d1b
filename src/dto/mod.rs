pub mod token_request;
pub mod token_response;

pub use token_request::{TokenExchangeParams, VerifyParams};
pub use token_response::TokenExchangeOutcome;
