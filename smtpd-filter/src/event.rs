use std::fmt;

/// Whether an event demands a verdict or is a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// The host is waiting for a verdict carrying the event token.
    Filter,
    /// Fire-and-forget notification.
    Report,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Kind::Filter => f.write_str("filter"),
            Kind::Report => f.write_str("report"),
        }
    }
}

/// The stage of the SMTP conversation an event belongs to.
///
/// Each phase has a canonical lowercase wire spelling; only the
/// combinations listed in the event catalog are legal on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connect,
    Helo,
    Ehlo,
    StartTls,
    Auth,
    MailFrom,
    RcptTo,
    Data,
    DataLine,
    Rset,
    Quit,
    Noop,
    Help,
    Wiz,
    Commit,
    LinkAuth,
    LinkConnect,
    LinkDisconnect,
    LinkGreeting,
    LinkIdentify,
    LinkTls,
    TxBegin,
    TxMail,
    TxRcpt,
    TxEnvelope,
    TxData,
    TxCommit,
    TxRollback,
    ProtocolClient,
    ProtocolServer,
    FilterResponse,
    Timeout,
}

impl Phase {
    pub(crate) fn from_wire(s: &str) -> Option<Phase> {
        let phase = match s {
            "connect" => Phase::Connect,
            "helo" => Phase::Helo,
            "ehlo" => Phase::Ehlo,
            "starttls" => Phase::StartTls,
            "auth" => Phase::Auth,
            "mail-from" => Phase::MailFrom,
            "rcpt-to" => Phase::RcptTo,
            "data" => Phase::Data,
            "data-line" => Phase::DataLine,
            "rset" => Phase::Rset,
            "quit" => Phase::Quit,
            "noop" => Phase::Noop,
            "help" => Phase::Help,
            "wiz" => Phase::Wiz,
            "commit" => Phase::Commit,
            "link-auth" => Phase::LinkAuth,
            "link-connect" => Phase::LinkConnect,
            "link-disconnect" => Phase::LinkDisconnect,
            "link-greeting" => Phase::LinkGreeting,
            "link-identify" => Phase::LinkIdentify,
            "link-tls" => Phase::LinkTls,
            "tx-begin" => Phase::TxBegin,
            "tx-mail" => Phase::TxMail,
            "tx-rcpt" => Phase::TxRcpt,
            "tx-envelope" => Phase::TxEnvelope,
            "tx-data" => Phase::TxData,
            "tx-commit" => Phase::TxCommit,
            "tx-rollback" => Phase::TxRollback,
            "protocol-client" => Phase::ProtocolClient,
            "protocol-server" => Phase::ProtocolServer,
            "filter-response" => Phase::FilterResponse,
            "timeout" => Phase::Timeout,
            _ => return None,
        };
        Some(phase)
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Phase::Connect => "connect",
            Phase::Helo => "helo",
            Phase::Ehlo => "ehlo",
            Phase::StartTls => "starttls",
            Phase::Auth => "auth",
            Phase::MailFrom => "mail-from",
            Phase::RcptTo => "rcpt-to",
            Phase::Data => "data",
            Phase::DataLine => "data-line",
            Phase::Rset => "rset",
            Phase::Quit => "quit",
            Phase::Noop => "noop",
            Phase::Help => "help",
            Phase::Wiz => "wiz",
            Phase::Commit => "commit",
            Phase::LinkAuth => "link-auth",
            Phase::LinkConnect => "link-connect",
            Phase::LinkDisconnect => "link-disconnect",
            Phase::LinkGreeting => "link-greeting",
            Phase::LinkIdentify => "link-identify",
            Phase::LinkTls => "link-tls",
            Phase::TxBegin => "tx-begin",
            Phase::TxMail => "tx-mail",
            Phase::TxRcpt => "tx-rcpt",
            Phase::TxEnvelope => "tx-envelope",
            Phase::TxData => "tx-data",
            Phase::TxCommit => "tx-commit",
            Phase::TxRollback => "tx-rollback",
            Phase::ProtocolClient => "protocol-client",
            Phase::ProtocolServer => "protocol-server",
            Phase::FilterResponse => "filter-response",
            Phase::Timeout => "timeout",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Payload shape of a catalog entry. Dispatch picks the parser to run
// and the callback signature to invoke from this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Parser {
    NoArgs,
    OneArg,
    Connect,
    Identify,
    LinkAuth,
    LinkConnect,
    LinkDisconnect,
    LinkGreeting,
    LinkIdentify,
    LinkTls,
    TxBegin,
    TxMail,
    TxRcpt,
    TxEnvelope,
    TxData,
    TxCommit,
    TxRollback,
}

pub(crate) struct EventDef {
    pub kind: Kind,
    pub phase: Phase,
    pub incoming: bool,
    pub parser: Parser,
}

const fn def(kind: Kind, phase: Phase, incoming: bool, parser: Parser) -> EventDef {
    EventDef {
        kind,
        phase,
        incoming,
        parser,
    }
}

// Every legal (kind, phase, direction) triple. Filter events only exist
// for incoming sessions; link-auth reports are incoming-only as well.
// The registration handshake is emitted in this order.
pub(crate) static CATALOG: [EventDef; 48] = [
    def(Kind::Filter, Phase::Connect, true, Parser::Connect),
    def(Kind::Filter, Phase::Helo, true, Parser::Identify),
    def(Kind::Filter, Phase::Ehlo, true, Parser::Identify),
    def(Kind::Filter, Phase::StartTls, true, Parser::NoArgs),
    def(Kind::Filter, Phase::Auth, true, Parser::OneArg),
    def(Kind::Filter, Phase::MailFrom, true, Parser::OneArg),
    def(Kind::Filter, Phase::RcptTo, true, Parser::OneArg),
    def(Kind::Filter, Phase::Data, true, Parser::NoArgs),
    def(Kind::Filter, Phase::DataLine, true, Parser::OneArg),
    def(Kind::Filter, Phase::Rset, true, Parser::NoArgs),
    def(Kind::Filter, Phase::Quit, true, Parser::NoArgs),
    def(Kind::Filter, Phase::Noop, true, Parser::NoArgs),
    def(Kind::Filter, Phase::Help, true, Parser::NoArgs),
    def(Kind::Filter, Phase::Wiz, true, Parser::NoArgs),
    def(Kind::Filter, Phase::Commit, true, Parser::NoArgs),
    def(Kind::Report, Phase::LinkAuth, true, Parser::LinkAuth),
    def(Kind::Report, Phase::LinkConnect, true, Parser::LinkConnect),
    def(Kind::Report, Phase::LinkDisconnect, true, Parser::LinkDisconnect),
    def(Kind::Report, Phase::LinkGreeting, true, Parser::LinkGreeting),
    def(Kind::Report, Phase::LinkIdentify, true, Parser::LinkIdentify),
    def(Kind::Report, Phase::LinkTls, true, Parser::LinkTls),
    def(Kind::Report, Phase::TxBegin, true, Parser::TxBegin),
    def(Kind::Report, Phase::TxMail, true, Parser::TxMail),
    def(Kind::Report, Phase::TxRcpt, true, Parser::TxRcpt),
    def(Kind::Report, Phase::TxEnvelope, true, Parser::TxEnvelope),
    def(Kind::Report, Phase::TxData, true, Parser::TxData),
    def(Kind::Report, Phase::TxCommit, true, Parser::TxCommit),
    def(Kind::Report, Phase::TxRollback, true, Parser::TxRollback),
    def(Kind::Report, Phase::ProtocolClient, true, Parser::OneArg),
    def(Kind::Report, Phase::ProtocolServer, true, Parser::OneArg),
    def(Kind::Report, Phase::FilterResponse, true, Parser::OneArg),
    def(Kind::Report, Phase::Timeout, true, Parser::NoArgs),
    def(Kind::Report, Phase::LinkConnect, false, Parser::LinkConnect),
    def(Kind::Report, Phase::LinkDisconnect, false, Parser::LinkDisconnect),
    def(Kind::Report, Phase::LinkGreeting, false, Parser::LinkGreeting),
    def(Kind::Report, Phase::LinkIdentify, false, Parser::LinkIdentify),
    def(Kind::Report, Phase::LinkTls, false, Parser::LinkTls),
    def(Kind::Report, Phase::TxBegin, false, Parser::TxBegin),
    def(Kind::Report, Phase::TxMail, false, Parser::TxMail),
    def(Kind::Report, Phase::TxRcpt, false, Parser::TxRcpt),
    def(Kind::Report, Phase::TxEnvelope, false, Parser::TxEnvelope),
    def(Kind::Report, Phase::TxData, false, Parser::TxData),
    def(Kind::Report, Phase::TxCommit, false, Parser::TxCommit),
    def(Kind::Report, Phase::TxRollback, false, Parser::TxRollback),
    def(Kind::Report, Phase::ProtocolClient, false, Parser::OneArg),
    def(Kind::Report, Phase::ProtocolServer, false, Parser::OneArg),
    def(Kind::Report, Phase::FilterResponse, false, Parser::OneArg),
    def(Kind::Report, Phase::Timeout, false, Parser::NoArgs),
];

pub(crate) fn catalog_index(kind: Kind, phase: Phase, incoming: bool) -> Option<usize> {
    CATALOG
        .iter()
        .position(|d| d.kind == kind && d.phase == phase && d.incoming == incoming)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_spellings_round_trip() {
        for def in CATALOG.iter() {
            let wire = def.phase.as_str();
            assert_eq!(Phase::from_wire(wire), Some(def.phase));
        }
        assert_eq!(Phase::from_wire("smtp-foo"), None);
        assert_eq!(Phase::from_wire(""), None);
    }

    #[test]
    fn catalog_triples_are_unique() {
        for (i, a) in CATALOG.iter().enumerate() {
            for b in CATALOG.iter().skip(i + 1) {
                assert!(
                    !(a.kind == b.kind && a.phase == b.phase && a.incoming == b.incoming),
                    "duplicate triple {:?} {:?} {}",
                    a.kind,
                    a.phase,
                    a.incoming
                );
            }
        }
    }

    #[test]
    fn filters_are_incoming_only() {
        assert!(CATALOG
            .iter()
            .filter(|d| d.kind == Kind::Filter)
            .all(|d| d.incoming));
        assert_eq!(catalog_index(Kind::Filter, Phase::MailFrom, false), None);
    }

    #[test]
    fn link_auth_has_no_outgoing_variant() {
        assert!(catalog_index(Kind::Report, Phase::LinkAuth, true).is_some());
        assert_eq!(catalog_index(Kind::Report, Phase::LinkAuth, false), None);
    }
}
