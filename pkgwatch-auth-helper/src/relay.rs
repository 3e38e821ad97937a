//! The conversation relay: authority queries out as reply frames,
//! credential answers back in as bare length-prefixed strings.

use std::io::{Read, Write};

use pkgwatch_proto::{wire, Reply, MAX_CREDENTIAL_LEN};

use crate::authority::{AuthOutcome, ConvError, Conversation, CredentialAuthority, Query};

/// Drives one authority dialogue over the helper's stdin/stdout.
/// Every query text is prefixed with the command banner, so the user
/// always sees what they are granting.
pub struct PipeConversation<R, W> {
    input: R,
    output: W,
    banner: String,
}

impl<R: Read, W: Write> PipeConversation<R, W> {
    pub fn new(input: R, output: W, command: &str) -> Self {
        Self {
            input,
            output,
            banner: format!("Running \"{command}\" as root.\n"),
        }
    }

    fn branded(&self, text: &str) -> String {
        format!("{}{}", self.banner, text)
    }
}

impl<R: Read, W: Write> Conversation for PipeConversation<R, W> {
    fn exchange(&mut self, query: &Query) -> Result<Option<String>, ConvError> {
        let (frame, wants_answer) = match query {
            Query::PromptNoEcho(text) => (Reply::AuthPromptNoEcho(self.branded(text)), true),
            Query::PromptEcho(text) => (Reply::AuthPromptEcho(self.branded(text)), true),
            Query::Error(text) => (Reply::AuthError(self.branded(text)), false),
            Query::Info(text) => (Reply::AuthInfo(self.branded(text)), false),
        };
        frame
            .write_to(&mut self.output)
            .map_err(|e| ConvError::Protocol(pkgwatch_proto::ProtoError::Io(e)))?;
        if !wants_answer {
            return Ok(None);
        }
        match wire::read_string(&mut self.input, MAX_CREDENTIAL_LEN) {
            Ok(Some(answer)) => Ok(Some(answer)),
            Ok(None) => Err(ConvError::Cancelled),
            Err(err) => Err(ConvError::Protocol(err)),
        }
    }
}

/// How the negotiation ended, from the session's point of view.
#[derive(Debug)]
pub enum AuthDecision {
    Granted,
    Denied(String),
    /// The user closed the channel; exit quietly.
    Cancelled,
    /// The peer broke the wire protocol.
    Violation(String),
}

/// Run the full authenticate-and-authorise exchange for `uid`.
pub fn negotiate<R: Read, W: Write>(
    authority: &mut dyn CredentialAuthority,
    uid: u32,
    input: R,
    output: W,
    command: &str,
) -> AuthDecision {
    let mut conv = PipeConversation::new(input, output, command);
    match authority.authenticate(uid, &mut conv) {
        Ok(AuthOutcome::Granted) => AuthDecision::Granted,
        Ok(AuthOutcome::Denied(reason)) => AuthDecision::Denied(reason),
        Err(ConvError::Cancelled) => AuthDecision::Cancelled,
        Err(ConvError::Protocol(err)) => AuthDecision::Violation(err.to_string()),
    }
}
