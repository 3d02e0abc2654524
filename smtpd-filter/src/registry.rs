use bitflags::bitflags;

use crate::addr::Address;
use crate::event::{catalog_index, Kind, Phase, CATALOG};
use crate::response::Output;
use crate::session::Ctx;
use crate::{AuthResult, Error, Status};

bitflags! {
    /// Session context the filter wants cached automatically.
    ///
    /// Declaring a need makes the library register for the reports that
    /// carry the data and copy it into the [`Session`](crate::Session)
    /// before any callback runs.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Need: u32 {
        const SRC = 1 << 0;
        const DST = 1 << 1;
        const RDNS = 1 << 2;
        const FCRDNS = 1 << 3;
        const IDENTITY = 1 << 4;
        const GREETING = 1 << 5;
        const CIPHERS = 1 << 6;
        const MSGID = 1 << 7;
        const MAILFROM = 1 << 8;
        const RCPTTO = 1 << 9;
        const EVPID = 1 << 10;
    }
}

type CbResult = Result<(), Error>;

// One variant per callback signature shape appearing in the catalog.
// Registration constructs the variant matching the entry's payload
// parser, so dispatch can rely on the shapes lining up.
pub(crate) enum Callback {
    NoArgs(Box<dyn FnMut(&mut Ctx<'_>) -> CbResult>),
    OneArg(Box<dyn FnMut(&mut Ctx<'_>, &str) -> CbResult>),
    Connect(Box<dyn FnMut(&mut Ctx<'_>, &str, &Address) -> CbResult>),
    LinkAuth(Box<dyn FnMut(&mut Ctx<'_>, &str, AuthResult) -> CbResult>),
    LinkConnect(Box<dyn FnMut(&mut Ctx<'_>, &str, Status, &Address, &Address) -> CbResult>),
    Msgid(Box<dyn FnMut(&mut Ctx<'_>, u32) -> CbResult>),
    MsgidAddrStatus(Box<dyn FnMut(&mut Ctx<'_>, u32, &str, Status) -> CbResult>),
    MsgidEvpid(Box<dyn FnMut(&mut Ctx<'_>, u32, u64) -> CbResult>),
    MsgidStatus(Box<dyn FnMut(&mut Ctx<'_>, u32, Status) -> CbResult>),
    MsgidSize(Box<dyn FnMut(&mut Ctx<'_>, u32, usize) -> CbResult>),
}

pub(crate) struct Entry {
    pub cb: Option<Callback>,
    pub do_register: bool,
    pub store_report: bool,
}

// Runtime registration state, indexed in parallel with the catalog.
pub(crate) struct Registry {
    pub entries: Vec<Entry>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        let entries = CATALOG
            .iter()
            .map(|_| Entry {
                cb: None,
                do_register: false,
                store_report: false,
            })
            .collect();
        Registry { entries }
    }

    pub(crate) fn register(
        &mut self,
        kind: Kind,
        phase: Phase,
        incoming: bool,
        store_report: bool,
        cb: Option<Callback>,
    ) -> Result<(), Error> {
        let idx = catalog_index(kind, phase, incoming).ok_or(Error::UnknownEvent)?;
        let entry = &mut self.entries[idx];
        if cb.is_some() && entry.cb.is_some() {
            return Err(Error::AlreadyRegistered);
        }
        if cb.is_some() {
            entry.cb = cb;
        }
        entry.do_register = true;
        if store_report {
            entry.store_report = true;
        }
        Ok(())
    }

    pub(crate) fn any_registered(&self, incoming: bool) -> bool {
        CATALOG
            .iter()
            .zip(&self.entries)
            .any(|(def, entry)| entry.do_register && def.incoming == incoming)
    }

    // Expand the need mask into implicit registrations for one
    // direction. Needs register with store_report set; the tx-commit
    // and tx-rollback companions register without store, purely to
    // drive message-state cleanup. Disconnect is always observed so
    // sessions can be torn down.
    pub(crate) fn expand_needs(&mut self, needs: Need, incoming: bool) -> Result<(), Error> {
        if needs.intersects(Need::SRC | Need::DST | Need::RDNS | Need::FCRDNS) {
            self.register(Kind::Report, Phase::LinkConnect, incoming, true, None)?;
        }
        if needs.contains(Need::GREETING) {
            self.register(Kind::Report, Phase::LinkGreeting, incoming, true, None)?;
        }
        if needs.contains(Need::IDENTITY) {
            self.register(Kind::Report, Phase::LinkIdentify, incoming, true, None)?;
        }
        if needs.contains(Need::CIPHERS) {
            self.register(Kind::Report, Phase::LinkTls, incoming, true, None)?;
        }
        let tx_needs = [
            (Need::MSGID, Phase::TxBegin),
            (Need::MAILFROM, Phase::TxMail),
            (Need::RCPTTO, Phase::TxRcpt),
            (Need::EVPID, Phase::TxEnvelope),
        ];
        for (need, phase) in tx_needs {
            if needs.contains(need) {
                self.register(Kind::Report, phase, incoming, true, None)?;
                self.register(Kind::Report, Phase::TxRollback, incoming, false, None)?;
                self.register(Kind::Report, Phase::TxCommit, incoming, false, None)?;
            }
        }
        self.register(Kind::Report, Phase::LinkDisconnect, incoming, false, None)
    }

    // When the inbound link-identify report is cached, helo/ehlo
    // filters must cache as well so the identity a filter callback
    // reads is never stale.
    pub(crate) fn promote_identify(&mut self) {
        let promote = catalog_index(Kind::Report, Phase::LinkIdentify, true)
            .map(|idx| {
                let entry = &self.entries[idx];
                entry.do_register && entry.store_report
            })
            .unwrap_or(false);
        if !promote {
            return;
        }
        for phase in [Phase::Helo, Phase::Ehlo] {
            if let Some(idx) = catalog_index(Kind::Filter, phase, true) {
                let entry = &mut self.entries[idx];
                if entry.do_register {
                    entry.store_report = true;
                }
            }
        }
    }

    // Emit one register line per opted-in triple, in catalog order,
    // terminated by register|ready.
    pub(crate) fn emit_handshake(&self, out: &mut Output) -> Result<(), Error> {
        let mut registered = false;
        for (def, entry) in CATALOG.iter().zip(&self.entries) {
            if entry.do_register {
                if entry.cb.is_some() {
                    registered = true;
                }
                out.register_event(def.kind, def.incoming, def.phase);
            }
        }
        if !registered {
            return Err(Error::NoEvents);
        }
        out.register_ready();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry<'a>(reg: &'a Registry, kind: Kind, phase: Phase, incoming: bool) -> &'a Entry {
        &reg.entries[catalog_index(kind, phase, incoming).unwrap()]
    }

    fn noop_cb() -> Callback {
        Callback::NoArgs(Box::new(|_| Ok(())))
    }

    #[test]
    fn register_unknown_triple() {
        let mut reg = Registry::new();
        let res = reg.register(Kind::Filter, Phase::MailFrom, false, false, Some(noop_cb()));
        assert!(matches!(res, Err(Error::UnknownEvent)));
    }

    #[test]
    fn double_callback_registration() {
        let mut reg = Registry::new();
        reg.register(Kind::Filter, Phase::Rset, true, false, Some(noop_cb()))
            .unwrap();
        let res = reg.register(Kind::Filter, Phase::Rset, true, false, Some(noop_cb()));
        assert!(matches!(res, Err(Error::AlreadyRegistered)));
        // Registering without a callback only merges flags
        reg.register(Kind::Filter, Phase::Rset, true, true, None)
            .unwrap();
        assert!(entry(&reg, Kind::Filter, Phase::Rset, true).store_report);
    }

    #[test]
    fn needs_expand_to_reports() {
        let mut reg = Registry::new();
        reg.expand_needs(Need::RDNS | Need::MAILFROM, true).unwrap();
        let link_connect = entry(&reg, Kind::Report, Phase::LinkConnect, true);
        assert!(link_connect.do_register && link_connect.store_report);
        let tx_mail = entry(&reg, Kind::Report, Phase::TxMail, true);
        assert!(tx_mail.do_register && tx_mail.store_report);
        // Cleanup companions register without store
        let tx_commit = entry(&reg, Kind::Report, Phase::TxCommit, true);
        assert!(tx_commit.do_register && !tx_commit.store_report);
        let tx_rollback = entry(&reg, Kind::Report, Phase::TxRollback, true);
        assert!(tx_rollback.do_register && !tx_rollback.store_report);
        // Disconnect is always observed
        let disconnect = entry(&reg, Kind::Report, Phase::LinkDisconnect, true);
        assert!(disconnect.do_register && !disconnect.store_report);
        // Nothing leaked into the other direction
        assert!(!entry(&reg, Kind::Report, Phase::LinkConnect, false).do_register);
    }

    #[test]
    fn identify_promotion() {
        let mut reg = Registry::new();
        reg.register(Kind::Filter, Phase::Helo, true, false, Some(noop_cb()))
            .unwrap();
        reg.expand_needs(Need::IDENTITY, true).unwrap();
        reg.promote_identify();
        assert!(entry(&reg, Kind::Filter, Phase::Helo, true).store_report);
        // Ehlo was never registered, so it is not promoted
        assert!(!entry(&reg, Kind::Filter, Phase::Ehlo, true).store_report);
    }

    #[test]
    fn no_promotion_without_identify_store() {
        let mut reg = Registry::new();
        reg.register(Kind::Filter, Phase::Helo, true, false, Some(noop_cb()))
            .unwrap();
        reg.promote_identify();
        assert!(!entry(&reg, Kind::Filter, Phase::Helo, true).store_report);
    }

    #[test]
    fn handshake_requires_a_callback() {
        let mut reg = Registry::new();
        reg.expand_needs(Need::RDNS, true).unwrap();
        let mut out = Output::new();
        assert!(matches!(
            reg.emit_handshake(&mut out),
            Err(Error::NoEvents)
        ));
    }

    #[test]
    fn handshake_order_and_ready() {
        let mut reg = Registry::new();
        reg.register(Kind::Filter, Phase::MailFrom, true, false, Some(noop_cb()))
            .unwrap();
        reg.register(Kind::Report, Phase::LinkDisconnect, true, false, None)
            .unwrap();
        let mut out = Output::new();
        reg.emit_handshake(&mut out).unwrap();
        assert_eq!(
            out.take(),
            "register|filter|smtp-in|mail-from\n\
             register|report|smtp-in|link-disconnect\n\
             register|ready\n"
        );
    }
}
