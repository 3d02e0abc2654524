use anyhow::{Context, Result};
use getopts::Options;
use log::info;
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};
use smtpd_filter::{fatal, Filter, Need, Status};
use std::env;

const DEFAULT_CODE: u16 = 550;

// Command line option names
const OPT_HELP: &str = "help";
const OPT_CODE: &str = "code";
const OPT_TEMPFAIL: &str = "tempfail";
const OPT_VERBOSE: &str = "verbose";

fn print_usage(program: &str, opts: &Options) {
    let brief = format!("Usage: {program} [options]");
    print!("{}", opts.usage(&brief));
}

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let mut opts = Options::new();
    opts.optflag("h", OPT_HELP, "print this help menu");
    opts.optopt(
        "c",
        OPT_CODE,
        "the SMTP code used to reject failed sessions",
        "CODE",
    );
    opts.optflag(
        "t",
        OPT_TEMPFAIL,
        "also reject sessions whose rDNS could not be verified",
    );
    opts.optflag("v", OPT_VERBOSE, "log protocol traffic");
    let matches = opts
        .parse(&args[1..])
        .context("Cannot parse command line")?;
    if matches.opt_present(OPT_HELP) {
        print_usage(&args[0], &opts);
        return Ok(());
    }
    let code = match matches.opt_str(OPT_CODE) {
        Some(s) => s.parse().context("Invalid reject code")?,
        None => DEFAULT_CODE,
    };
    let reject_tempfail = matches.opt_present(OPT_TEMPFAIL);

    // Stdout carries the filter protocol, so logging goes to stderr
    let log_level = if matches.opt_present(OPT_VERBOSE) {
        LevelFilter::Trace
    } else {
        LevelFilter::Info
    };
    TermLogger::init(
        log_level,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )
    .context("Cannot initialize logger")?;

    let mut filter = Filter::new();
    filter.need(Need::RDNS | Need::FCRDNS);
    filter.filter_connect(move |ctx, hostname, _addr| {
        match ctx.fcrdns() {
            Status::Ok => ctx.proceed(),
            Status::TempFail if !reject_tempfail => ctx.proceed(),
            Status::TempFail => {
                info!("tempfail rDNS for {hostname}, rejecting");
                ctx.reject(451, "reverse DNS temporarily unverifiable")?;
            }
            Status::PermFail => {
                info!("rDNS mismatch for {hostname}, rejecting");
                ctx.reject_enh(code, 5, 7, 25, "reverse DNS does not match forward DNS")?;
            }
        }
        Ok(())
    })?;

    filter.run().unwrap_or_else(|err| fatal(err));
    Ok(())
}
