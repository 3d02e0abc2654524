use log::trace;
use std::time::Duration;

use crate::addr::Address;
use crate::event::{catalog_index, Kind, Parser, CATALOG};
use crate::registry::Callback;
use crate::session::{parse_auth_result, parse_fcrdns, parse_status, Ctx, LocalHooks, Session};
use crate::{Error, Filter};

impl Filter {
    // Decode one line from the host and run it to completion: parse the
    // framing, locate or create the session, run the payload parser and
    // the user callback, then apply any lifecycle effect. All field
    // references borrow from `raw`; `raw` itself is echoed in full on
    // every parse error.
    pub(crate) fn dispatch_line(&mut self, raw: &str) -> Result<(), Error> {
        trace!("> {raw}");
        let (kind_s, rest) = raw
            .split_once('|')
            .ok_or_else(|| Error::parse("missing version", raw))?;
        let kind = match kind_s {
            "filter" => Kind::Filter,
            "report" => Kind::Report,
            "config" => return self.config_line(rest, raw),
            _ => return Err(Error::parse("unknown message type", raw)),
        };

        let (version_s, rest) = rest
            .split_once('|')
            .ok_or_else(|| Error::parse("missing time", raw))?;
        let (major_s, minor_s) = version_s
            .split_once('.')
            .ok_or_else(|| Error::parse("invalid protocol", raw))?;
        let version_major: u32 = major_s
            .parse()
            .map_err(|_| Error::parse("invalid protocol", raw))?;
        let version_minor: u32 = minor_s
            .parse()
            .map_err(|_| Error::parse("invalid protocol", raw))?;
        if version_major != 0 {
            return Err(Error::unsupported(raw));
        }

        let (timestamp_s, rest) = rest
            .split_once('|')
            .ok_or_else(|| Error::parse("missing direction", raw))?;
        let (sec_s, frac_s) = timestamp_s
            .split_once('.')
            .ok_or_else(|| Error::parse("invalid timestamp", raw))?;
        let sec: u64 = sec_s
            .parse()
            .map_err(|_| Error::parse("invalid timestamp", raw))?;
        let timestamp = Duration::new(sec, parse_nanos(frac_s, raw)?);

        let (dir_s, rest) = rest
            .split_once('|')
            .ok_or_else(|| Error::parse("missing phase", raw))?;
        let incoming = match dir_s {
            "smtp-in" => true,
            "smtp-out" => false,
            _ => return Err(Error::parse("invalid direction", raw)),
        };

        let (phase_s, rest) = rest
            .split_once('|')
            .ok_or_else(|| Error::parse("missing reqid", raw))?;
        let phase = crate::Phase::from_wire(phase_s)
            .ok_or_else(|| Error::parse("invalid phase", raw))?;

        let (reqid_s, payload) = match rest.split_once('|') {
            Some((reqid_s, payload)) => (reqid_s, payload),
            None => (rest, ""),
        };
        let reqid = u64::from_str_radix(reqid_s, 16)
            .map_err(|_| Error::parse("invalid reqid", raw))?;

        let idx = catalog_index(kind, phase, incoming)
            .ok_or_else(|| Error::parse("received unregistered line", raw))?;

        let Filter {
            registry,
            sessions,
            out,
            session_hooks,
            message_hooks,
            ..
        } = self;

        let session = sessions.entry(reqid).or_insert_with(|| {
            let mut session = Session::new(reqid);
            if let Some(hooks) = session_hooks {
                let local = (hooks.oncreate)(&session);
                session.local_session = Some(local);
            }
            session
        });
        session.kind = kind;
        session.phase = phase;
        session.incoming = incoming;
        session.version_major = version_major;
        session.version_minor = version_minor;
        session.timestamp = timestamp;
        session.token = 0;

        let args = if kind == Kind::Filter {
            let (token_s, args) = payload
                .split_once('|')
                .ok_or_else(|| Error::parse("invalid token", raw))?;
            session.token = u64::from_str_radix(token_s, 16)
                .map_err(|_| Error::parse("invalid token", raw))?;
            args
        } else {
            payload
        };

        let store = registry.entries[idx].store_report;
        let cb = &mut registry.entries[idx].cb;
        let parser = CATALOG[idx].parser;
        let mut ctx = Ctx { session, out };

        match parser {
            Parser::NoArgs | Parser::LinkDisconnect => {
                if let Some(Callback::NoArgs(f)) = cb {
                    f(&mut ctx)?;
                }
            }
            Parser::OneArg => {
                if let Some(Callback::OneArg(f)) = cb {
                    f(&mut ctx, args)?;
                }
            }
            Parser::Connect => {
                let (hostname, addr_s) = args
                    .split_once('|')
                    .ok_or_else(|| Error::parse("missing address", raw))?;
                let addr = parse_addr(addr_s, false, raw)?;
                if let Some(Callback::Connect(f)) = cb {
                    f(&mut ctx, hostname, &addr)?;
                }
            }
            Parser::Identify => {
                if store {
                    ctx.session.identity = Some(args.to_string());
                }
                if let Some(Callback::OneArg(f)) = cb {
                    f(&mut ctx, args)?;
                }
            }
            Parser::LinkAuth => {
                let (username, result_s) = args
                    .split_once('|')
                    .ok_or_else(|| Error::parse("missing username", raw))?;
                let result = parse_auth_result(result_s)
                    .ok_or_else(|| Error::parse("invalid result", raw))?;
                if let Some(Callback::LinkAuth(f)) = cb {
                    f(&mut ctx, username, result)?;
                }
            }
            Parser::LinkConnect => {
                let (rdns, rest) = args
                    .split_once('|')
                    .ok_or_else(|| Error::parse("missing fcrdns", raw))?;
                let (fcrdns_s, rest) = rest
                    .split_once('|')
                    .ok_or_else(|| Error::parse("missing src", raw))?;
                let fcrdns = parse_fcrdns(fcrdns_s)
                    .ok_or_else(|| Error::parse("invalid fcrdns", raw))?;
                let (src_s, dst_s) = rest
                    .split_once('|')
                    .ok_or_else(|| Error::parse("missing dst", raw))?;
                let src = parse_addr(src_s, true, raw)?;
                let dst = parse_addr(dst_s, true, raw)?;
                if store {
                    ctx.session.rdns = Some(rdns.to_string());
                    ctx.session.fcrdns = fcrdns;
                    ctx.session.src = Some(src.clone());
                    ctx.session.dst = Some(dst.clone());
                }
                if let Some(Callback::LinkConnect(f)) = cb {
                    f(&mut ctx, rdns, fcrdns, &src, &dst)?;
                }
            }
            Parser::LinkGreeting => {
                if store {
                    ctx.session.greeting = Some(args.to_string());
                }
                if let Some(Callback::OneArg(f)) = cb {
                    f(&mut ctx, args)?;
                }
            }
            Parser::LinkIdentify => {
                if store {
                    ctx.session.identity = Some(args.to_string());
                }
                if let Some(Callback::OneArg(f)) = cb {
                    f(&mut ctx, args)?;
                }
            }
            Parser::LinkTls => {
                if store {
                    ctx.session.ciphers = Some(args.to_string());
                }
                if let Some(Callback::OneArg(f)) = cb {
                    f(&mut ctx, args)?;
                }
            }
            Parser::TxBegin => {
                let msgid = parse_msgid(args, raw)?;
                ctx.session.msgid = if store { Some(msgid) } else { None };
                if let Some(hooks) = message_hooks {
                    let local = (hooks.oncreate)(&*ctx.session);
                    ctx.session.local_message = Some(local);
                }
                if let Some(Callback::Msgid(f)) = cb {
                    f(&mut ctx, msgid)?;
                }
            }
            Parser::TxMail | Parser::TxRcpt => {
                let (msgid, rest) = split_msgid(args, raw)?;
                let (first, second) = rest
                    .split_once('|')
                    .ok_or_else(|| Error::parse("missing status", raw))?;
                // The address and status fields swapped places in 0.6
                let (address, status) = if ctx.session.version_minor < 6 {
                    (first, parse_wire_status(second, raw)?)
                } else {
                    (second, parse_wire_status(first, raw)?)
                };
                if store {
                    if parser == Parser::TxMail {
                        ctx.session.mailfrom = Some(address.to_string());
                    } else {
                        ctx.session.rcptto.push(address.to_string());
                    }
                }
                if let Some(Callback::MsgidAddrStatus(f)) = cb {
                    f(&mut ctx, msgid, address, status)?;
                }
            }
            Parser::TxEnvelope => {
                let (msgid, rest) = split_msgid(args, raw)?;
                let evpid = u64::from_str_radix(rest, 16)
                    .map_err(|_| Error::parse("invalid evpid", raw))?;
                if store {
                    ctx.session.evpid = Some(evpid);
                }
                if let Some(Callback::MsgidEvpid(f)) = cb {
                    f(&mut ctx, msgid, evpid)?;
                }
            }
            Parser::TxData => {
                let (msgid, rest) = split_msgid(args, raw)?;
                let status = parse_wire_status(rest, raw)?;
                if let Some(Callback::MsgidStatus(f)) = cb {
                    f(&mut ctx, msgid, status)?;
                }
            }
            Parser::TxCommit => {
                let (msgid, rest) = split_msgid(args, raw)?;
                let size: u32 = rest
                    .parse()
                    .map_err(|_| Error::parse("invalid msg size", raw))?;
                if let Some(Callback::MsgidSize(f)) = cb {
                    f(&mut ctx, msgid, size as usize)?;
                }
                end_transaction(ctx.session, message_hooks);
            }
            Parser::TxRollback => {
                let msgid = parse_msgid(args, raw)?;
                if let Some(Callback::Msgid(f)) = cb {
                    f(&mut ctx, msgid)?;
                }
                end_transaction(ctx.session, message_hooks);
            }
        }

        // Disconnect tears the whole session down. The record leaves
        // the store before the destructor hook runs.
        if parser == Parser::LinkDisconnect {
            if let Some(mut session) = sessions.remove(&reqid) {
                if let Some(hooks) = session_hooks {
                    if let Some(local) = session.local_session.take() {
                        (hooks.ondelete)(&session, local);
                    }
                }
            }
        }
        Ok(())
    }

    fn config_line(&mut self, params: &str, raw: &str) -> Result<(), Error> {
        if params == "ready" {
            if let Some(cb) = &mut self.conf_cb {
                cb(None)?;
            }
            return Ok(());
        }
        let (key, value) = params
            .split_once('|')
            .ok_or_else(|| Error::parse("missing key", raw))?;
        if let Some(cb) = &mut self.conf_cb {
            cb(Some((key, value)))?;
        }
        if key == "smtp-session-timeout" {
            self.session_timeout = value
                .parse::<u32>()
                .ok()
                .filter(|v| *v <= i32::MAX as u32)
                .ok_or_else(|| Error::parse("invalid smtp-session-timeout", raw))?;
        }
        Ok(())
    }
}

// Message-scoped state ends with the transaction, whichever way it went.
fn end_transaction(session: &mut Session, hooks: &mut Option<LocalHooks>) {
    if let Some(hooks) = hooks {
        if let Some(local) = session.local_message.take() {
            (hooks.ondelete)(session, local);
        }
    }
    session.local_message = None;
    session.mailfrom = None;
    session.rcptto.clear();
    session.evpid = None;
    session.msgid = None;
}

// The fraction is scaled by the number of digits supplied: "25" means
// 250 milliseconds, not 25 nanoseconds.
fn parse_nanos(frac: &str, raw: &str) -> Result<u32, Error> {
    if frac.is_empty() || frac.len() > 9 || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::parse("invalid timestamp", raw));
    }
    let value: u32 = frac
        .parse()
        .map_err(|_| Error::parse("invalid timestamp", raw))?;
    Ok(value * 10u32.pow(9 - frac.len() as u32))
}

// Message ids are 32 bits on the wire even though reqids are 64.
fn parse_msgid(s: &str, raw: &str) -> Result<u32, Error> {
    u64::from_str_radix(s, 16)
        .ok()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| Error::parse("invalid msgid", raw))
}

fn split_msgid<'a>(args: &'a str, raw: &str) -> Result<(u32, &'a str), Error> {
    let (msgid_s, rest) = args
        .split_once('|')
        .ok_or_else(|| Error::parse("missing address", raw))?;
    Ok((parse_msgid(msgid_s, raw)?, rest))
}

fn parse_wire_status(s: &str, raw: &str) -> Result<crate::Status, Error> {
    parse_status(s).ok_or_else(|| Error::parse("invalid status", raw))
}

fn parse_addr(s: &str, with_port: bool, raw: &str) -> Result<Address, Error> {
    Address::parse(s, with_port).ok_or_else(|| Error::parse(format!("invalid address ({s})"), raw))
}
