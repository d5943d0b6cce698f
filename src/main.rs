use std::env;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::process::{self, ExitCode};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use inboxd::config::{Config, ImapConfig};
use inboxd::runner::Runner;
use inboxd::signals::{self, Shutdown, EXIT_FAILURE};
use inboxd::store::LogStore;

/// Watch an IMAP mailbox and import new mail.
#[derive(Parser, Debug)]
#[command(name = "inboxd", version, about)]
struct Args {
    /// IMAP server hostname.
    #[arg(long, default_value = "imap.gmail.com")]
    host: String,

    /// IMAP server port.
    #[arg(long, default_value_t = 993)]
    port: u16,

    /// Account to log in as.
    #[arg(long)]
    username: String,

    /// Password; read from INBOXD_PASSWORD when not given.
    #[arg(long)]
    password: Option<String>,

    /// Mailbox to watch.
    #[arg(long, default_value = "INBOX")]
    mailbox: String,

    /// Seconds between polls when not subscribed.
    #[arg(long, default_value_t = 30)]
    interval: u64,

    /// Hold an IDLE subscription instead of polling.
    #[arg(long)]
    subscribe: bool,

    /// Where to write the pid file.
    #[arg(long, default_value = "/tmp/inboxd.pid")]
    pid: PathBuf,

    /// Log to this file instead of stderr.
    #[arg(long)]
    logto: Option<PathBuf>,

    /// More logging; repeat for even more.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8, logto: Option<&PathBuf>) -> io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        })
    });
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match logto {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            subscriber.with_writer(Arc::new(file)).with_ansi(false).init();
        }
        None => subscriber.init(),
    }
    Ok(())
}

/// Writes our pid on creation and removes the file again on drop.
struct PidFile {
    path: PathBuf,
}

impl PidFile {
    fn create(path: PathBuf) -> io::Result<PidFile> {
        fs::write(&path, format!("{}\n", process::id()))?;
        debug!(path = %path.display(), "wrote pid file");
        Ok(PidFile { path })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            debug!(path = %self.path.display(), error = %e, "could not remove pid file");
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_tracing(args.verbose, args.logto.as_ref()) {
        eprintln!("inboxd: could not open log file: {}", e);
        return ExitCode::from(EXIT_FAILURE as u8);
    }

    let password = match args.password.or_else(|| env::var("INBOXD_PASSWORD").ok()) {
        Some(password) => password,
        None => {
            error!("no password given and INBOXD_PASSWORD is not set");
            return ExitCode::from(EXIT_FAILURE as u8);
        }
    };

    let config = Config {
        imap: ImapConfig {
            host: args.host,
            port: args.port,
            username: args.username,
            password,
        },
        mailbox: args.mailbox,
        interval: Duration::from_secs(args.interval),
        subscribe: args.subscribe,
        inline_dispatch: args.verbose >= 2,
    };
    debug!(?config, "starting");

    let pid_file = match PidFile::create(args.pid) {
        Ok(pid_file) => pid_file,
        Err(e) => {
            error!(error = %e, "could not write pid file");
            return ExitCode::from(EXIT_FAILURE as u8);
        }
    };

    let shutdown = Shutdown::new();
    let escalate_path = pid_file.path.clone();
    let installed = signals::install(Arc::clone(&shutdown), move || {
        // exiting mid-escalation skips PidFile's drop
        let _ = fs::remove_file(&escalate_path);
    });
    if let Err(e) = installed {
        error!(error = %e, "could not install signal handlers");
        return ExitCode::from(EXIT_FAILURE as u8);
    }

    Runner::new(config, Arc::new(LogStore), Arc::clone(&shutdown)).run();

    drop(pid_file);
    ExitCode::from(shutdown.exit_code() as u8)
}
