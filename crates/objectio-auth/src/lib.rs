//! ObjectIO internode authentication
//!
//! Every call between storage nodes carries a bearer token signed with the
//! cluster credential. The token's audience binds it to the exact query
//! string of the call, and a companion timestamp header bounds replay.

pub mod error;
pub mod token;

pub use error::AuthError;
pub use token::{
    AUTHORIZATION_HEADER, Claims, Credentials, DEFAULT_MAX_SKEW, TIME_HEADER, TokenVerifier,
    issue_token, request_time,
};
