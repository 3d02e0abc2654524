//! Wire-level scenarios: literal input lines in, literal output lines
//! out, through the full event loop.

use smtpd_filter::{Error, Filter, Need, Status};
use std::cell::RefCell;
use std::io::Cursor;
use std::rc::Rc;

fn run(filter: Filter, input: &str) -> Result<String, Error> {
    let mut out = Vec::new();
    filter.run_with(Cursor::new(input.as_bytes().to_vec()), &mut out)?;
    Ok(String::from_utf8(out).expect("output is utf-8"))
}

#[test]
fn minimal_registration_handshake() {
    let mut filter = Filter::new();
    filter
        .filter_mail_from(|ctx, _| {
            ctx.proceed();
            Ok(())
        })
        .unwrap();
    let out = run(filter, "").unwrap();
    assert_eq!(
        out,
        "register|filter|smtp-in|mail-from\n\
         register|report|smtp-in|link-disconnect\n\
         register|ready\n"
    );
}

#[test]
fn proceed_on_current_protocol() {
    let mut filter = Filter::new();
    filter
        .filter_mail_from(|ctx, _| {
            ctx.proceed();
            Ok(())
        })
        .unwrap();
    let out = run(
        filter,
        "filter|0.7|1700000000.000000000|smtp-in|mail-from|0000000000000001|0000000000000002|ok|<a@b>\n",
    )
    .unwrap();
    assert!(out.ends_with("filter-result|0000000000000001|0000000000000002|proceed\n"));
}

#[test]
fn proceed_on_legacy_protocol_swaps_tokens() {
    let mut filter = Filter::new();
    filter
        .filter_mail_from(|ctx, _| {
            ctx.proceed();
            Ok(())
        })
        .unwrap();
    let out = run(
        filter,
        "filter|0.4|1700000000.000000000|smtp-in|mail-from|0000000000000001|0000000000000002|ok|<a@b>\n",
    )
    .unwrap();
    assert!(out.ends_with("filter-result|0000000000000002|0000000000000001|proceed\n"));
}

#[test]
fn reject_with_reason() {
    let mut filter = Filter::new();
    filter
        .filter_mail_from(|ctx, _| {
            ctx.reject(550, "blocked")?;
            Ok(())
        })
        .unwrap();
    let out = run(
        filter,
        "filter|0.7|1700000000.000000000|smtp-in|mail-from|0000000000000001|0000000000000002|ok|<a@b>\n",
    )
    .unwrap();
    assert!(
        out.ends_with("filter-result|0000000000000001|0000000000000002|reject|550 blocked\n")
    );
}

#[test]
fn disconnect_frees_the_session() {
    let created = Rc::new(RefCell::new(0u32));
    let deleted = Rc::new(RefCell::new(0u32));
    let mut filter = Filter::new();
    let c = Rc::clone(&created);
    let d = Rc::clone(&deleted);
    filter.local_session(
        move |_| {
            *c.borrow_mut() += 1;
            Box::new(())
        },
        move |_, _| {
            *d.borrow_mut() += 1;
        },
    );
    filter
        .filter_mail_from(|ctx, _| {
            ctx.proceed();
            Ok(())
        })
        .unwrap();
    let input = "\
filter|0.7|1.0|smtp-in|mail-from|0000000000000001|0000000000000002|<a@b>\n\
report|0.7|1.0|smtp-in|link-disconnect|0000000000000001\n\
filter|0.7|1.0|smtp-in|mail-from|0000000000000001|0000000000000003|<a@b>\n";
    run(filter, input).unwrap();
    // The second mail-from found no session and created a fresh one
    assert_eq!(*created.borrow(), 2);
    assert_eq!(*deleted.borrow(), 1);
}

#[test]
fn full_session_lifecycle_leaves_no_state() {
    let final_check = Rc::new(RefCell::new(false));
    let mut filter = Filter::new();
    filter.need(Need::MSGID | Need::MAILFROM | Need::RCPTTO | Need::RDNS | Need::FCRDNS);
    filter
        .filter_data_line(|ctx, line| {
            ctx.dataline(line);
            Ok(())
        })
        .unwrap();
    let checked = Rc::clone(&final_check);
    filter
        .report_link_disconnect(true, move |ctx| {
            // Message state was cleared by the commit before we got here
            assert_eq!(ctx.msgid(), None);
            assert_eq!(ctx.mail_from(), None);
            assert!(ctx.rcpt_to().is_empty());
            assert_eq!(ctx.evpid(), None);
            // Link-level context survives until the session goes away
            assert_eq!(ctx.rdns(), Some("mail.example.com"));
            assert_eq!(ctx.fcrdns(), Status::Ok);
            *checked.borrow_mut() = true;
            Ok(())
        })
        .unwrap();
    let input = "\
report|0.7|1.0|smtp-in|link-connect|0000000000000001|mail.example.com|pass|192.0.2.1:34567|192.0.2.9:25\n\
report|0.7|1.0|smtp-in|tx-begin|0000000000000001|deadbeef\n\
report|0.7|1.0|smtp-in|tx-mail|0000000000000001|deadbeef|ok|<a@b>\n\
report|0.7|1.0|smtp-in|tx-rcpt|0000000000000001|deadbeef|ok|<x@y>\n\
filter|0.7|1.0|smtp-in|data-line|0000000000000001|0000000000000002|hello world\n\
report|0.7|1.0|smtp-in|tx-commit|0000000000000001|deadbeef|42\n\
report|0.7|1.0|smtp-in|link-disconnect|0000000000000001\n";
    let out = run(filter, input).unwrap();
    assert!(*final_check.borrow());
    assert!(
        out.ends_with("filter-dataline|0000000000000001|0000000000000002|hello world\n")
    );
}

#[test]
fn bad_direction_aborts_the_loop() {
    let mut filter = Filter::new();
    filter
        .filter_mail_from(|ctx, _| {
            ctx.proceed();
            Ok(())
        })
        .unwrap();
    let err = run(
        filter,
        "report|0.7|1.0|smtp-foo|link-disconnect|0000000000000001\n",
    )
    .unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("invalid direction"), "unexpected error: {msg}");
    // The offending line is echoed in full
    assert!(msg.contains("smtp-foo|link-disconnect"));
}

#[test]
fn needs_show_up_in_the_handshake() {
    let mut filter = Filter::new();
    filter.need(Need::RDNS | Need::CIPHERS);
    filter
        .filter_mail_from(|ctx, _| {
            ctx.proceed();
            Ok(())
        })
        .unwrap();
    let out = run(filter, "").unwrap();
    assert_eq!(
        out,
        "register|filter|smtp-in|mail-from\n\
         register|report|smtp-in|link-connect\n\
         register|report|smtp-in|link-disconnect\n\
         register|report|smtp-in|link-tls\n\
         register|ready\n"
    );
}

#[test]
fn identity_promotion_keeps_helo_fresh() {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let mut filter = Filter::new();
    filter.need(Need::IDENTITY);
    let captured = Rc::clone(&seen);
    filter
        .filter_helo(move |ctx, identity| {
            // The cached identity was stored before this callback ran
            captured
                .borrow_mut()
                .push(ctx.identity().map(|s| s.to_string()));
            assert_eq!(ctx.identity(), Some(identity));
            ctx.proceed();
            Ok(())
        })
        .unwrap();
    let input =
        "filter|0.7|1.0|smtp-in|helo|0000000000000001|0000000000000002|mx.example.org\n";
    run(filter, input).unwrap();
    assert_eq!(*seen.borrow(), [Some("mx.example.org".to_string())]);
}
