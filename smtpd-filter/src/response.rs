use log::trace;
use std::io::Write;

use crate::event::{Kind, Phase};
use crate::session::Ctx;
use crate::Error;

// Outbound lines are collected here and handed to the writer in one
// batch per inbound line, so that a callback emitting many lines (for
// example one filter-dataline per input line) produces a single write.
pub(crate) struct Output {
    buf: Vec<u8>,
}

impl Output {
    pub(crate) fn new() -> Self {
        Output { buf: Vec::new() }
    }

    pub(crate) fn line(&mut self, line: &str) {
        trace!("< {line}");
        self.buf.extend_from_slice(line.as_bytes());
        self.buf.push(b'\n');
    }

    pub(crate) fn register_event(&mut self, kind: Kind, incoming: bool, phase: Phase) {
        let dir = if incoming { "in" } else { "out" };
        self.line(&format!("register|{kind}|smtp-{dir}|{phase}"));
    }

    pub(crate) fn register_ready(&mut self) {
        self.line("register|ready");
    }

    pub(crate) fn flush_to<W: Write>(&mut self, writer: &mut W) -> std::io::Result<()> {
        if !self.buf.is_empty() {
            writer.write_all(&self.buf)?;
            writer.flush()?;
            self.buf.clear();
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn take(&mut self) -> String {
        String::from_utf8(std::mem::take(&mut self.buf)).expect("output is utf-8")
    }
}

//------ Verdicts ---------------------------------------------------------------

impl Ctx<'_> {
    // Protocol 0.5 swapped the order of the two identifying tokens.
    fn tokens(&self) -> (u64, u64) {
        if self.session.version_minor < 5 {
            (self.session.token, self.session.reqid)
        } else {
            (self.session.reqid, self.session.token)
        }
    }

    /// Let the event pass.
    pub fn proceed(&mut self) {
        let (a, b) = self.tokens();
        self.out.line(&format!("filter-result|{a:016x}|{b:016x}|proceed"));
    }

    /// Reject the command with an SMTP `code` (200..=599) and a reason.
    pub fn reject(&mut self, code: u16, reason: &str) -> Result<(), Error> {
        if !(200..=599).contains(&code) {
            return Err(Error::RejectCode(code));
        }
        let (a, b) = self.tokens();
        self.out
            .line(&format!("filter-result|{a:016x}|{b:016x}|reject|{code} {reason}"));
        Ok(())
    }

    /// Reject with an enhanced status code (class 2..=5, subject and
    /// detail 0..=999).
    pub fn reject_enh(
        &mut self,
        code: u16,
        class: u16,
        subject: u16,
        detail: u16,
        reason: &str,
    ) -> Result<(), Error> {
        if !(200..=599).contains(&code) {
            return Err(Error::RejectCode(code));
        }
        check_enhanced(class, subject, detail)?;
        let (a, b) = self.tokens();
        self.out.line(&format!(
            "filter-result|{a:016x}|{b:016x}|reject|{code} {class}.{subject}.{detail} {reason}"
        ));
        Ok(())
    }

    /// Drop the connection with a 421 reply.
    pub fn disconnect(&mut self, reason: &str) {
        let (a, b) = self.tokens();
        self.out
            .line(&format!("filter-result|{a:016x}|{b:016x}|disconnect|421 {reason}"));
    }

    /// Drop the connection with a 421 reply carrying an enhanced status
    /// code.
    pub fn disconnect_enh(
        &mut self,
        class: u16,
        subject: u16,
        detail: u16,
        reason: &str,
    ) -> Result<(), Error> {
        check_enhanced(class, subject, detail)?;
        let (a, b) = self.tokens();
        self.out.line(&format!(
            "filter-result|{a:016x}|{b:016x}|disconnect|421 {class}.{subject}.{detail} {reason}"
        ));
        Ok(())
    }

    /// Replace the command argument seen by the host.
    pub fn rewrite(&mut self, value: &str) {
        let (a, b) = self.tokens();
        self.out
            .line(&format!("filter-result|{a:016x}|{b:016x}|rewrite|{value}"));
    }

    /// Emit one line of message body. May be called any number of times
    /// while handling a `data-line` event.
    pub fn dataline(&mut self, line: &str) {
        let (a, b) = self.tokens();
        self.out
            .line(&format!("filter-dataline|{a:016x}|{b:016x}|{line}"));
    }
}

fn check_enhanced(class: u16, subject: u16, detail: u16) -> Result<(), Error> {
    if !(2..=5).contains(&class) {
        return Err(Error::EnhancedStatus {
            field: "class",
            value: class,
        });
    }
    if subject > 999 {
        return Err(Error::EnhancedStatus {
            field: "subject",
            value: subject,
        });
    }
    if detail > 999 {
        return Err(Error::EnhancedStatus {
            field: "detail",
            value: detail,
        });
    }
    Ok(())
}
