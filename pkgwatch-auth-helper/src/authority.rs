//! The credential-authority boundary.
//!
//! The system backend (PAM or equivalent) is an external collaborator;
//! it binds through [`CredentialAuthority`] and drives whatever
//! dialogue it needs through [`Conversation`]. This crate only ships
//! the two trivial authorities: one for the real-root path and a
//! refusing default for builds without a backend.

/// One item a credential authority puts to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// A prompt whose answer must not be echoed.
    PromptNoEcho(String),
    /// A prompt whose answer may be echoed.
    PromptEcho(String),
    /// Error text; no answer expected.
    Error(String),
    /// Informational text; no answer expected.
    Info(String),
}

/// How a conversation ended on the authority's side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Granted,
    Denied(String),
}

/// Why an exchange could not be completed.
#[derive(Debug)]
pub enum ConvError {
    /// The user closed the channel instead of answering.
    Cancelled,
    /// The answer violated the wire protocol.
    Protocol(pkgwatch_proto::ProtoError),
}

/// The dialogue channel handed to an authority: prompts return the
/// typed answer, the other query kinds return `None`.
pub trait Conversation {
    fn exchange(&mut self, query: &Query) -> Result<Option<String>, ConvError>;
}

/// Authenticate and authorise the invoking user.
pub trait CredentialAuthority {
    fn authenticate(
        &mut self,
        uid: u32,
        conv: &mut dyn Conversation,
    ) -> Result<AuthOutcome, ConvError>;
}

/// No challenge at all. Used when the helper is invoked by real root,
/// where there is no privilege boundary to cross.
#[derive(Debug, Default)]
pub struct NullAuthority;

impl CredentialAuthority for NullAuthority {
    fn authenticate(
        &mut self,
        _uid: u32,
        _conv: &mut dyn Conversation,
    ) -> Result<AuthOutcome, ConvError> {
        Ok(AuthOutcome::Granted)
    }
}

/// Refuses everyone. The default for setuid invocations when no system
/// credential backend is compiled in: failing closed beats guessing.
#[derive(Debug, Default)]
pub struct DenyingAuthority;

impl CredentialAuthority for DenyingAuthority {
    fn authenticate(
        &mut self,
        uid: u32,
        conv: &mut dyn Conversation,
    ) -> Result<AuthOutcome, ConvError> {
        conv.exchange(&Query::Error(
            "No credential backend is available to authenticate you.".to_string(),
        ))?;
        Ok(AuthOutcome::Denied(format!(
            "Cannot authenticate uid {uid}: no credential backend."
        )))
    }
}
