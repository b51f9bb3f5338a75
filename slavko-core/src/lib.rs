/*!
Resilient execution and lightweight verifiable tokens for the Slavko kernel
*/

pub mod broadcaster;
pub mod config;
pub mod dat_token;
pub mod error;
pub mod identity;
pub mod lazy_retry;
pub mod resurrection;

pub use broadcaster::{Finding, FindingsBroadcaster};
pub use config::KernelConfig;
pub use dat_token::DelegatedAuthorityToken;
pub use error::{AttemptFailure, IdentityBoundaryError, ResurrectionError};
pub use identity::{LocalStorage, StaticToken, TokenSource};
pub use lazy_retry::{LazyModule, lazy_named, lazy_with_retry};
pub use resurrection::{Resurrection, RetryPolicy};
