use std::any::Any;
use std::ops::{Deref, DerefMut};
use std::time::Duration;

use crate::addr::Address;
use crate::event::{Kind, Phase};
use crate::response::Output;
use crate::{AuthResult, Status};

// Constructor/destructor pair for per-session or per-message state
// supplied by filter code.
pub(crate) struct LocalHooks {
    pub oncreate: Box<dyn FnMut(&Session) -> Box<dyn Any>>,
    pub ondelete: Box<dyn FnMut(&Session, Box<dyn Any>)>,
}

/// One live SMTP session, keyed by its request id.
///
/// The record carries the metadata of the event currently being
/// dispatched, plus whatever context the filter asked the library to
/// cache through [`Need`](crate::Need). The message-level fields
/// (`msgid`, `mail_from`, `rcpt_to`, `evpid`) are only populated between
/// `tx-begin` and the matching `tx-commit` or `tx-rollback`.
pub struct Session {
    pub(crate) reqid: u64,
    pub(crate) kind: Kind,
    pub(crate) phase: Phase,
    pub(crate) incoming: bool,
    pub(crate) version_major: u32,
    pub(crate) version_minor: u32,
    pub(crate) timestamp: Duration,
    pub(crate) token: u64,
    pub(crate) rdns: Option<String>,
    pub(crate) fcrdns: Status,
    pub(crate) src: Option<Address>,
    pub(crate) dst: Option<Address>,
    pub(crate) identity: Option<String>,
    pub(crate) greeting: Option<String>,
    pub(crate) ciphers: Option<String>,
    pub(crate) msgid: Option<u32>,
    pub(crate) mailfrom: Option<String>,
    pub(crate) rcptto: Vec<String>,
    pub(crate) evpid: Option<u64>,
    pub(crate) local_session: Option<Box<dyn Any>>,
    pub(crate) local_message: Option<Box<dyn Any>>,
}

impl Session {
    pub(crate) fn new(reqid: u64) -> Self {
        Session {
            reqid,
            kind: Kind::Report,
            phase: Phase::LinkConnect,
            incoming: true,
            version_major: 0,
            version_minor: 0,
            timestamp: Duration::ZERO,
            token: 0,
            rdns: None,
            // Unknown until a link-connect report is seen
            fcrdns: Status::TempFail,
            src: None,
            dst: None,
            identity: None,
            greeting: None,
            ciphers: None,
            msgid: None,
            mailfrom: None,
            rcptto: Vec::new(),
            evpid: None,
            local_session: None,
            local_message: None,
        }
    }

    /// The host-assigned id of this session.
    pub fn reqid(&self) -> u64 {
        self.reqid
    }

    /// The token of the pending filter query, 0 for reports.
    pub fn token(&self) -> u64 {
        self.token
    }

    /// Kind of the event currently being dispatched.
    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Phase of the event currently being dispatched.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// True when the underlying SMTP session is inbound to the host.
    pub fn incoming(&self) -> bool {
        self.incoming
    }

    /// Protocol version as (major, minor).
    pub fn version(&self) -> (u32, u32) {
        (self.version_major, self.version_minor)
    }

    /// Timestamp of the current event.
    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }

    /// Reverse DNS name of the peer, when cached.
    pub fn rdns(&self) -> Option<&str> {
        self.rdns.as_deref()
    }

    /// Forward-confirmed rDNS status of the peer.
    pub fn fcrdns(&self) -> Status {
        self.fcrdns
    }

    /// Source address of the connection, when cached.
    pub fn src(&self) -> Option<&Address> {
        self.src.as_ref()
    }

    /// Destination address of the connection, when cached.
    pub fn dst(&self) -> Option<&Address> {
        self.dst.as_ref()
    }

    /// HELO/EHLO identity, when cached.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Greeting identity, when cached.
    pub fn greeting(&self) -> Option<&str> {
        self.greeting.as_deref()
    }

    /// TLS cipher string, when cached.
    pub fn ciphers(&self) -> Option<&str> {
        self.ciphers.as_deref()
    }

    /// Id of the in-flight message, when cached.
    pub fn msgid(&self) -> Option<u32> {
        self.msgid
    }

    /// MAIL FROM address of the in-flight message, when cached.
    pub fn mail_from(&self) -> Option<&str> {
        self.mailfrom.as_deref()
    }

    /// RCPT TO addresses of the in-flight message, in arrival order.
    pub fn rcpt_to(&self) -> &[String] {
        &self.rcptto
    }

    /// Envelope id of the current recipient, when cached.
    pub fn evpid(&self) -> Option<u64> {
        self.evpid
    }

    /// Session state created by the `local_session` hook.
    pub fn local_session<T: 'static>(&self) -> Option<&T> {
        self.local_session.as_ref().and_then(|b| b.downcast_ref())
    }

    /// Mutable access to the `local_session` state.
    pub fn local_session_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.local_session.as_mut().and_then(|b| b.downcast_mut())
    }

    /// Message state created by the `local_message` hook.
    pub fn local_message<T: 'static>(&self) -> Option<&T> {
        self.local_message.as_ref().and_then(|b| b.downcast_ref())
    }

    /// Mutable access to the `local_message` state.
    pub fn local_message_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.local_message.as_mut().and_then(|b| b.downcast_mut())
    }
}

/// Handle on the current event, passed to every callback.
///
/// Dereferences to the [`Session`] for all cached context, and carries
/// the verdict emitters for filter events.
pub struct Ctx<'a> {
    pub(crate) session: &'a mut Session,
    pub(crate) out: &'a mut Output,
}

impl Deref for Ctx<'_> {
    type Target = Session;

    fn deref(&self) -> &Session {
        self.session
    }
}

impl DerefMut for Ctx<'_> {
    fn deref_mut(&mut self) -> &mut Session {
        self.session
    }
}

pub(crate) fn parse_status(s: &str) -> Option<Status> {
    match s {
        "ok" => Some(Status::Ok),
        "tempfail" => Some(Status::TempFail),
        "permfail" => Some(Status::PermFail),
        _ => None,
    }
}

// The fcrdns field of link-connect uses pass/fail/error spellings.
pub(crate) fn parse_fcrdns(s: &str) -> Option<Status> {
    match s {
        "pass" => Some(Status::Ok),
        "fail" => Some(Status::PermFail),
        "error" => Some(Status::TempFail),
        _ => None,
    }
}

pub(crate) fn parse_auth_result(s: &str) -> Option<AuthResult> {
    match s {
        "pass" => Some(AuthResult::Pass),
        "fail" => Some(AuthResult::Fail),
        "error" => Some(AuthResult::Error),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_is_empty() {
        let session = Session::new(7);
        assert_eq!(session.reqid(), 7);
        assert_eq!(session.fcrdns(), Status::TempFail);
        assert!(session.rdns().is_none());
        assert!(session.src().is_none());
        assert!(session.msgid().is_none());
        assert!(session.rcpt_to().is_empty());
    }

    #[test]
    fn local_state_downcasts() {
        let mut session = Session::new(1);
        session.local_session = Some(Box::new(42u32));
        assert_eq!(session.local_session::<u32>(), Some(&42));
        assert_eq!(session.local_session::<String>(), None);
        *session.local_session_mut::<u32>().unwrap() = 43;
        assert_eq!(session.local_session::<u32>(), Some(&43));
    }

    #[test]
    fn status_spellings() {
        assert_eq!(parse_status("ok"), Some(Status::Ok));
        assert_eq!(parse_status("tempfail"), Some(Status::TempFail));
        assert_eq!(parse_status("permfail"), Some(Status::PermFail));
        assert_eq!(parse_status("pass"), None);
        assert_eq!(parse_fcrdns("pass"), Some(Status::Ok));
        assert_eq!(parse_fcrdns("fail"), Some(Status::PermFail));
        assert_eq!(parse_fcrdns("error"), Some(Status::TempFail));
        assert_eq!(parse_fcrdns("ok"), None);
    }
}
