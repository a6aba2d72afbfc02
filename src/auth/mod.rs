//! Authentication: password hashing, signed session tokens and the
//! `Caller` extractor that turns a bearer token into an identity.

pub mod caller;
pub mod jwt;
pub mod password;

pub use caller::Caller;
