pub mod base;
pub mod collateral;
pub mod currency;
pub mod temporal;
pub mod validation;

pub use base::{LlmClient, LlmRequest, ReqwestLlmClient};
pub use collateral::CollateralAgent;
pub use currency::CurrencyAgent;
pub use temporal::TemporalAgent;
pub use validation::ValidationAgent;
