//! Types shared by the HikeHub session, client and gateway crates

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
