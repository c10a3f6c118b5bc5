//! Watch mode: a status poller and a chat poller sharing one session.
//!
//! Each poller runs on its own thread with its own period and prints JSON
//! lines to stdout. Both hold the same `Arc<Session>`, whose lock keeps
//! their commands apart on the wire. SIGINT/SIGTERM stop both after the
//! command in flight, then the session is closed.

use hzrcon::config::Config;
use hzrcon::differ::CHAT_COMMAND;
use hzrcon::rate::TrafficRate;
use hzrcon::status::{ServerStatus, STATUS_COMMANDS};
use hzrcon::{ChatDiffer, Session};
use nix::libc;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const TICK: Duration = Duration::from_millis(100);

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn shutdown_handler(_sig: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

fn install_signal_handlers() -> io::Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(shutdown_handler),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    for sig in [Signal::SIGINT, Signal::SIGTERM] {
        unsafe { signal::sigaction(sig, &action) }.map_err(io::Error::other)?;
    }
    Ok(())
}

/// Sleep for `period` in short ticks. Returns false once shutdown is requested.
fn wait(period: Duration) -> bool {
    let deadline = Instant::now() + period;
    loop {
        if SHUTDOWN.load(Ordering::SeqCst) {
            return false;
        }
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return true;
        }
        thread::sleep(left.min(TICK));
    }
}

fn status_loop(session: Arc<Session>, interval: Duration) {
    let mut rate = TrafficRate::new();
    loop {
        let status = ServerStatus::from_results(session.fetch_all(&STATUS_COMMANDS));
        if let Some(err) = &status.error {
            log::warn!("Status poll failed: {}", err);
        }
        let traffic = session.traffic();
        let throughput = rate.sample(Instant::now(), traffic);
        println!(
            "{}",
            serde_json::json!({
                "type": "status",
                "session": session.state(),
                "status": status,
                "traffic": traffic,
                "throughput": throughput,
            })
        );
        if !wait(interval) {
            break;
        }
    }
}

fn chat_loop(session: Arc<Session>, interval: Duration, mut differ: ChatDiffer, relay_tag: String) {
    loop {
        match session.execute(CHAT_COMMAND) {
            Ok(raw) => {
                for event in differ.update(&raw) {
                    // Our own relayed messages come back as admin broadcasts.
                    if event.is_relay_echo(&relay_tag) {
                        log::debug!("Skipping relayed message: {}", event.payload);
                        continue;
                    }
                    println!(
                        "{}",
                        serde_json::json!({ "type": "chat", "event": event })
                    );
                }
            }
            Err(e) => log::warn!("Chat poll failed: {}", e),
        }
        if !wait(interval) {
            break;
        }
    }
}

/// Run both pollers until a shutdown signal arrives.
pub fn run(config: Config) -> io::Result<()> {
    install_signal_handlers()?;

    let session = Arc::new(Session::new(config.session.clone()));
    if let Err(e) = session.connect() {
        log::warn!("Initial connect failed, retrying on next poll: {}", e);
    }

    let status = {
        let session = Arc::clone(&session);
        let interval = config.status_interval;
        thread::Builder::new()
            .name("status-poller".into())
            .spawn(move || status_loop(session, interval))?
    };
    let chat = {
        let session = Arc::clone(&session);
        let interval = config.chat_interval;
        let differ = ChatDiffer::new(config.chat_memory).suppress_history();
        let relay_tag = config.relay_tag.clone();
        thread::Builder::new()
            .name("chat-poller".into())
            .spawn(move || chat_loop(session, interval, differ, relay_tag))?
    };

    log::info!(
        "Watching {}:{} (status every {:?}, chat every {:?})",
        config.session.host,
        config.session.port,
        config.status_interval,
        config.chat_interval
    );

    for handle in [status, chat] {
        if handle.join().is_err() {
            log::error!("Poller thread panicked");
        }
    }

    session.close();
    log::info!("Watch stopped");
    Ok(())
}
