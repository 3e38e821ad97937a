//! The privilege-escalation helper.
//!
//! Spawned by the slave with piped stdin/stdout, it runs the
//! credential conversation for the invoking user, relocates the user's
//! private cache mirrors into the system directories, executes the
//! requested command as root, and reports `AuthFinished` when the
//! command has run.

pub mod authority;
pub mod error;
pub mod relay;
pub mod session;

pub use authority::{
    AuthOutcome, Conversation, CredentialAuthority, DenyingAuthority, NullAuthority, Query,
};
pub use error::HelperError;
pub use relay::{negotiate, AuthDecision, PipeConversation};
pub use session::{run, SessionConfig};
