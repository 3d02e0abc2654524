//! A library for writing OpenSMTPD filters.
//!
//! OpenSMTPD runs filters as separate processes and speaks a
//! line-oriented protocol to them over stdin and stdout. *Reports*
//! notify the filter of session activity; *filter* events demand a
//! verdict. This library owns the wire protocol, the per-session state
//! and the dispatch logic. Code using the library registers callbacks
//! for the events it cares about and makes the business decisions.
//!
//! # Pseudo Code
//! ```rust,ignore
//! use smtpd_filter::{Filter, Need};
//!
//! let mut filter = Filter::new();
//!
//! // Have the library cache rDNS state on every session
//! filter.need(Need::RDNS | Need::FCRDNS);
//!
//! // Reject senders we do not like
//! filter.filter_mail_from(|ctx, sender| {
//!     if sender.contains("spam") {
//!         ctx.reject(550, "blocked")?;
//!     } else {
//!         ctx.proceed();
//!     }
//!     Ok(())
//! })?;
//!
//! // Hand stdin/stdout to the event loop
//! filter.run()
//! ```
//!
//! Every callback receives a [`Ctx`] handle giving access to the cached
//! session context and, for filter events, the verdict emitters. A
//! filter callback must respond exactly once.

#![forbid(unsafe_code)]

use std::any::Any;
use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};

mod addr;
mod dispatch;
mod err;
mod event;
mod registry;
mod response;
mod session;

pub use crate::addr::Address;
pub use crate::err::{fatal, fatal_sys, Error};
pub use crate::event::{Kind, Phase};
pub use crate::registry::Need;
pub use crate::session::{Ctx, Session};

use crate::registry::{Callback, Registry};
use crate::response::Output;
use crate::session::LocalHooks;

/// Result of an SMTP sub-operation as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    TempFail,
    PermFail,
}

/// Outcome of an authentication attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthResult {
    Pass,
    Fail,
    Error,
}

type ConfCb = Box<dyn FnMut(Option<(&str, &str)>) -> Result<(), Error>>;

/// An OpenSMTPD filter under construction.
///
/// Register callbacks and declare needs in any order, then call
/// [`run`](Filter::run). `run` consumes the filter, so registration is
/// only possible before the event loop starts.
pub struct Filter {
    pub(crate) registry: Registry,
    pub(crate) needs: Need,
    pub(crate) sessions: BTreeMap<u64, Session>,
    pub(crate) out: Output,
    pub(crate) conf_cb: Option<ConfCb>,
    pub(crate) session_hooks: Option<LocalHooks>,
    pub(crate) message_hooks: Option<LocalHooks>,
    pub(crate) session_timeout: u32,
}

impl Filter {
    pub fn new() -> Self {
        Filter {
            registry: Registry::new(),
            needs: Need::empty(),
            sessions: BTreeMap::new(),
            out: Output::new(),
            conf_cb: None,
            session_hooks: None,
            message_hooks: None,
            // Default from smtpd
            session_timeout: 300,
        }
    }

    /// Declare session context the library should cache automatically.
    pub fn need(&mut self, needs: Need) {
        self.needs |= needs;
    }

    /// Register a callback for parsed configuration key/value pairs.
    /// `None` is delivered once the host has sent all configuration.
    pub fn config<F>(&mut self, cb: F)
    where
        F: FnMut(Option<(&str, &str)>) -> Result<(), Error> + 'static,
    {
        self.conf_cb = Some(Box::new(cb));
    }

    /// Attach per-session state. `oncreate` runs once when a session is
    /// first seen, `ondelete` when it disconnects.
    pub fn local_session<C, D>(&mut self, oncreate: C, ondelete: D)
    where
        C: FnMut(&Session) -> Box<dyn Any> + 'static,
        D: FnMut(&Session, Box<dyn Any>) + 'static,
    {
        self.session_hooks = Some(LocalHooks {
            oncreate: Box::new(oncreate),
            ondelete: Box::new(ondelete),
        });
    }

    /// Attach per-message state. `oncreate` runs at `tx-begin`,
    /// `ondelete` at `tx-commit` or `tx-rollback`.
    pub fn local_message<C, D>(&mut self, oncreate: C, ondelete: D)
    where
        C: FnMut(&Session) -> Box<dyn Any> + 'static,
        D: FnMut(&Session, Box<dyn Any>) + 'static,
    {
        self.message_hooks = Some(LocalHooks {
            oncreate: Box::new(oncreate),
            ondelete: Box::new(ondelete),
        });
    }

    /// The session timeout configured by the host, in seconds.
    pub fn session_timeout(&self) -> u32 {
        self.session_timeout
    }

    //------ Filter registration ------------------------------------------------

    /// Called when a client connects, with its hostname and address.
    pub fn filter_connect<F>(&mut self, cb: F) -> Result<(), Error>
    where
        F: FnMut(&mut Ctx<'_>, &str, &Address) -> Result<(), Error> + 'static,
    {
        self.register_filter(Phase::Connect, Callback::Connect(Box::new(cb)))
    }

    /// Called on HELO with the announced identity.
    pub fn filter_helo<F>(&mut self, cb: F) -> Result<(), Error>
    where
        F: FnMut(&mut Ctx<'_>, &str) -> Result<(), Error> + 'static,
    {
        self.register_filter(Phase::Helo, Callback::OneArg(Box::new(cb)))
    }

    /// Called on EHLO with the announced identity.
    pub fn filter_ehlo<F>(&mut self, cb: F) -> Result<(), Error>
    where
        F: FnMut(&mut Ctx<'_>, &str) -> Result<(), Error> + 'static,
    {
        self.register_filter(Phase::Ehlo, Callback::OneArg(Box::new(cb)))
    }

    /// Called on STARTTLS.
    pub fn filter_starttls<F>(&mut self, cb: F) -> Result<(), Error>
    where
        F: FnMut(&mut Ctx<'_>) -> Result<(), Error> + 'static,
    {
        self.register_filter(Phase::StartTls, Callback::NoArgs(Box::new(cb)))
    }

    /// Called on AUTH with the raw command argument.
    pub fn filter_auth<F>(&mut self, cb: F) -> Result<(), Error>
    where
        F: FnMut(&mut Ctx<'_>, &str) -> Result<(), Error> + 'static,
    {
        self.register_filter(Phase::Auth, Callback::OneArg(Box::new(cb)))
    }

    /// Called on MAIL FROM with the sender address.
    pub fn filter_mail_from<F>(&mut self, cb: F) -> Result<(), Error>
    where
        F: FnMut(&mut Ctx<'_>, &str) -> Result<(), Error> + 'static,
    {
        self.register_filter(Phase::MailFrom, Callback::OneArg(Box::new(cb)))
    }

    /// Called on RCPT TO with the recipient address.
    pub fn filter_rcpt_to<F>(&mut self, cb: F) -> Result<(), Error>
    where
        F: FnMut(&mut Ctx<'_>, &str) -> Result<(), Error> + 'static,
    {
        self.register_filter(Phase::RcptTo, Callback::OneArg(Box::new(cb)))
    }

    /// Called on DATA.
    pub fn filter_data<F>(&mut self, cb: F) -> Result<(), Error>
    where
        F: FnMut(&mut Ctx<'_>) -> Result<(), Error> + 'static,
    {
        self.register_filter(Phase::Data, Callback::NoArgs(Box::new(cb)))
    }

    /// Called for every line of the message body. The callback decides
    /// what the host sees by emitting [`dataline`](Ctx::dataline) lines.
    pub fn filter_data_line<F>(&mut self, cb: F) -> Result<(), Error>
    where
        F: FnMut(&mut Ctx<'_>, &str) -> Result<(), Error> + 'static,
    {
        self.register_filter(Phase::DataLine, Callback::OneArg(Box::new(cb)))
    }

    /// Called on RSET.
    pub fn filter_rset<F>(&mut self, cb: F) -> Result<(), Error>
    where
        F: FnMut(&mut Ctx<'_>) -> Result<(), Error> + 'static,
    {
        self.register_filter(Phase::Rset, Callback::NoArgs(Box::new(cb)))
    }

    /// Called on QUIT.
    pub fn filter_quit<F>(&mut self, cb: F) -> Result<(), Error>
    where
        F: FnMut(&mut Ctx<'_>) -> Result<(), Error> + 'static,
    {
        self.register_filter(Phase::Quit, Callback::NoArgs(Box::new(cb)))
    }

    /// Called on NOOP.
    pub fn filter_noop<F>(&mut self, cb: F) -> Result<(), Error>
    where
        F: FnMut(&mut Ctx<'_>) -> Result<(), Error> + 'static,
    {
        self.register_filter(Phase::Noop, Callback::NoArgs(Box::new(cb)))
    }

    /// Called on HELP.
    pub fn filter_help<F>(&mut self, cb: F) -> Result<(), Error>
    where
        F: FnMut(&mut Ctx<'_>) -> Result<(), Error> + 'static,
    {
        self.register_filter(Phase::Help, Callback::NoArgs(Box::new(cb)))
    }

    /// Called on WIZ.
    pub fn filter_wiz<F>(&mut self, cb: F) -> Result<(), Error>
    where
        F: FnMut(&mut Ctx<'_>) -> Result<(), Error> + 'static,
    {
        self.register_filter(Phase::Wiz, Callback::NoArgs(Box::new(cb)))
    }

    /// Called when a message is about to be committed.
    pub fn filter_commit<F>(&mut self, cb: F) -> Result<(), Error>
    where
        F: FnMut(&mut Ctx<'_>) -> Result<(), Error> + 'static,
    {
        self.register_filter(Phase::Commit, Callback::NoArgs(Box::new(cb)))
    }

    //------ Report registration ------------------------------------------------

    /// Connection established, with rDNS name, forward-confirmed rDNS
    /// status and both socket addresses.
    pub fn report_link_connect<F>(&mut self, incoming: bool, cb: F) -> Result<(), Error>
    where
        F: FnMut(&mut Ctx<'_>, &str, Status, &Address, &Address) -> Result<(), Error> + 'static,
    {
        self.register_report(Phase::LinkConnect, incoming, Callback::LinkConnect(Box::new(cb)))
    }

    /// Connection closed. The session record is destroyed after this
    /// callback returns.
    pub fn report_link_disconnect<F>(&mut self, incoming: bool, cb: F) -> Result<(), Error>
    where
        F: FnMut(&mut Ctx<'_>) -> Result<(), Error> + 'static,
    {
        self.registry.register(
            Kind::Report,
            Phase::LinkDisconnect,
            incoming,
            false,
            Some(Callback::NoArgs(Box::new(cb))),
        )
    }

    /// The greeting hostname sent to the client.
    pub fn report_link_greeting<F>(&mut self, incoming: bool, cb: F) -> Result<(), Error>
    where
        F: FnMut(&mut Ctx<'_>, &str) -> Result<(), Error> + 'static,
    {
        self.register_report(Phase::LinkGreeting, incoming, Callback::OneArg(Box::new(cb)))
    }

    /// The client identified itself with HELO or EHLO.
    pub fn report_link_identify<F>(&mut self, incoming: bool, cb: F) -> Result<(), Error>
    where
        F: FnMut(&mut Ctx<'_>, &str) -> Result<(), Error> + 'static,
    {
        self.register_report(Phase::LinkIdentify, incoming, Callback::OneArg(Box::new(cb)))
    }

    /// TLS negotiated, with the cipher string.
    pub fn report_link_tls<F>(&mut self, incoming: bool, cb: F) -> Result<(), Error>
    where
        F: FnMut(&mut Ctx<'_>, &str) -> Result<(), Error> + 'static,
    {
        self.register_report(Phase::LinkTls, incoming, Callback::OneArg(Box::new(cb)))
    }

    /// Authentication attempted, with the username and the outcome.
    pub fn report_link_auth<F>(&mut self, incoming: bool, cb: F) -> Result<(), Error>
    where
        F: FnMut(&mut Ctx<'_>, &str, AuthResult) -> Result<(), Error> + 'static,
    {
        self.register_report(Phase::LinkAuth, incoming, Callback::LinkAuth(Box::new(cb)))
    }

    /// A message transaction started.
    pub fn report_tx_begin<F>(&mut self, incoming: bool, cb: F) -> Result<(), Error>
    where
        F: FnMut(&mut Ctx<'_>, u32) -> Result<(), Error> + 'static,
    {
        self.register_report(Phase::TxBegin, incoming, Callback::Msgid(Box::new(cb)))
    }

    /// The sender of the transaction was accepted or refused.
    pub fn report_tx_mail<F>(&mut self, incoming: bool, cb: F) -> Result<(), Error>
    where
        F: FnMut(&mut Ctx<'_>, u32, &str, Status) -> Result<(), Error> + 'static,
    {
        self.register_report(Phase::TxMail, incoming, Callback::MsgidAddrStatus(Box::new(cb)))
    }

    /// A recipient of the transaction was accepted or refused.
    pub fn report_tx_rcpt<F>(&mut self, incoming: bool, cb: F) -> Result<(), Error>
    where
        F: FnMut(&mut Ctx<'_>, u32, &str, Status) -> Result<(), Error> + 'static,
    {
        self.register_report(Phase::TxRcpt, incoming, Callback::MsgidAddrStatus(Box::new(cb)))
    }

    /// An envelope was assigned to a recipient.
    pub fn report_tx_envelope<F>(&mut self, incoming: bool, cb: F) -> Result<(), Error>
    where
        F: FnMut(&mut Ctx<'_>, u32, u64) -> Result<(), Error> + 'static,
    {
        self.register_report(Phase::TxEnvelope, incoming, Callback::MsgidEvpid(Box::new(cb)))
    }

    /// The DATA phase of the transaction concluded.
    pub fn report_tx_data<F>(&mut self, incoming: bool, cb: F) -> Result<(), Error>
    where
        F: FnMut(&mut Ctx<'_>, u32, Status) -> Result<(), Error> + 'static,
    {
        self.register_report(Phase::TxData, incoming, Callback::MsgidStatus(Box::new(cb)))
    }

    /// The transaction was committed, with the message size in bytes.
    /// Message-level state is cleared after this callback returns.
    pub fn report_tx_commit<F>(&mut self, incoming: bool, cb: F) -> Result<(), Error>
    where
        F: FnMut(&mut Ctx<'_>, u32, usize) -> Result<(), Error> + 'static,
    {
        self.register_report(Phase::TxCommit, incoming, Callback::MsgidSize(Box::new(cb)))
    }

    /// The transaction was rolled back. Message-level state is cleared
    /// after this callback returns.
    pub fn report_tx_rollback<F>(&mut self, incoming: bool, cb: F) -> Result<(), Error>
    where
        F: FnMut(&mut Ctx<'_>, u32) -> Result<(), Error> + 'static,
    {
        self.register_report(Phase::TxRollback, incoming, Callback::Msgid(Box::new(cb)))
    }

    /// A raw protocol line sent by the client.
    pub fn report_protocol_client<F>(&mut self, incoming: bool, cb: F) -> Result<(), Error>
    where
        F: FnMut(&mut Ctx<'_>, &str) -> Result<(), Error> + 'static,
    {
        self.register_report(Phase::ProtocolClient, incoming, Callback::OneArg(Box::new(cb)))
    }

    /// A raw protocol line sent by the server.
    pub fn report_protocol_server<F>(&mut self, incoming: bool, cb: F) -> Result<(), Error>
    where
        F: FnMut(&mut Ctx<'_>, &str) -> Result<(), Error> + 'static,
    {
        self.register_report(Phase::ProtocolServer, incoming, Callback::OneArg(Box::new(cb)))
    }

    /// Another filter answered a query.
    pub fn report_filter_response<F>(&mut self, incoming: bool, cb: F) -> Result<(), Error>
    where
        F: FnMut(&mut Ctx<'_>, &str) -> Result<(), Error> + 'static,
    {
        self.register_report(Phase::FilterResponse, incoming, Callback::OneArg(Box::new(cb)))
    }

    /// The session timed out.
    pub fn report_timeout<F>(&mut self, incoming: bool, cb: F) -> Result<(), Error>
    where
        F: FnMut(&mut Ctx<'_>) -> Result<(), Error> + 'static,
    {
        self.register_report(Phase::Timeout, incoming, Callback::NoArgs(Box::new(cb)))
    }

    //------ Event loop ---------------------------------------------------------

    /// Emit the registration handshake and process events from stdin,
    /// writing verdicts to stdout, until the host closes the pipe.
    pub fn run(self) -> Result<(), Error> {
        let stdin = io::stdin();
        let stdout = io::stdout();
        self.run_with(stdin.lock(), stdout.lock())
    }

    /// Like [`run`](Filter::run), over arbitrary input and output.
    pub fn run_with<R, W>(mut self, mut reader: R, mut writer: W) -> Result<(), Error>
    where
        R: BufRead,
        W: Write,
    {
        self.handshake()?;
        self.out.flush_to(&mut writer)?;
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            let stripped = line.strip_suffix('\n').unwrap_or(&line);
            self.dispatch_line(stripped)?;
            // Verdicts emitted while handling one line leave in a
            // single batch
            self.out.flush_to(&mut writer)?;
        }
        Ok(())
    }

    // Compute implicit registrations and emit the register lines. Needs
    // and message hooks expand in every direction that has at least one
    // registration of its own.
    pub(crate) fn handshake(&mut self) -> Result<(), Error> {
        for incoming in [true, false] {
            if !self.registry.any_registered(incoming) {
                continue;
            }
            self.registry.expand_needs(self.needs, incoming)?;
            if self.message_hooks.is_some() {
                for phase in [Phase::TxBegin, Phase::TxRollback, Phase::TxCommit] {
                    self.registry
                        .register(Kind::Report, phase, incoming, false, None)?;
                }
            }
        }
        self.registry.promote_identify();
        self.registry.emit_handshake(&mut self.out)
    }

    fn register_filter(&mut self, phase: Phase, cb: Callback) -> Result<(), Error> {
        self.registry
            .register(Kind::Filter, phase, true, false, Some(cb))?;
        self.registry
            .register(Kind::Report, Phase::LinkDisconnect, true, false, None)
    }

    fn register_report(
        &mut self,
        phase: Phase,
        incoming: bool,
        cb: Callback,
    ) -> Result<(), Error> {
        self.registry
            .register(Kind::Report, phase, incoming, false, Some(cb))?;
        self.registry
            .register(Kind::Report, Phase::LinkDisconnect, incoming, false, None)
    }
}

impl Default for Filter {
    fn default() -> Self {
        Filter::new()
    }
}
