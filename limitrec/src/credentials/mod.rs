//! Site credentials and the authenticated browser session.
//!
//! [`CredentialSession`] owns the persistent browser profile, logs in when the
//! cached cookie jar is stale, and falls back to an alternate automation
//! backend when the primary one cannot log in.

mod error;
mod session;

pub use error::CredentialError;
pub use session::CredentialSession;
