//! Middleware stages.
//!
//! [`recovery::RecoveryMiddleware`] must be the outermost stage: it builds
//! the request context every inner stage reads, and it is the single point
//! where errors and panics become responses.

pub mod recovery;
