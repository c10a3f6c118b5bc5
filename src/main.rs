mod watch;

use hzrcon::config::Config;
use hzrcon::status::{ServerStatus, STATUS_COMMANDS};
use hzrcon::Session;
use std::io;
use std::time::Duration;

/// `admin` replies "Message sent!" right away; no need for the full window.
const SAY_READ_TIMEOUT: Duration = Duration::from_millis(1500);

/// Longest message relayed into game chat.
const SAY_MAX_CHARS: usize = 200;

fn print_usage() {
    eprintln!(
        "hzrcon - HumanitZ rcon client

Usage:
  hzrcon exec   <command...>      # run one command, print the reply
  hzrcon batch  <cmd> [cmd...]    # run commands back-to-back, print JSON
  hzrcon status                   # parsed info + Players as JSON
  hzrcon say    <message...>      # broadcast as admin, tagged with RELAY_TAG
  hzrcon watch                    # poll status and chat, print JSON lines

Environment (a .env file in the working directory is loaded first):
  RCON_PASSWORD          required
  RCON_HOST              default 127.0.0.1
  RCON_PORT              default 8888
  RCON_CONNECT_TIMEOUT   seconds, default 10
  RCON_READ_TIMEOUT      seconds of silence that end a reply, default 3.5
  RCON_RESPONSE_DEADLINE seconds, default 30
  RCON_SILENT_GRACE      extra silent windows before reconnecting, default 0
  STATUS_INTERVAL        seconds, default 30
  CHAT_POLL_INTERVAL     seconds, default 10
  CHAT_MEMORY            chat lines remembered, default 512
  RELAY_TAG              default [bridge]
  RUST_LOG               log filter, default info"
    );
}

fn load_config() -> Config {
    Config::from_env().unwrap_or_else(|e| {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    })
}

fn require_args(args: &[String], what: &str) -> String {
    if args.is_empty() {
        eprintln!("Error: {} required", what);
        std::process::exit(1);
    }
    args.join(" ")
}

fn cmd_exec(args: &[String]) -> io::Result<()> {
    let command = require_args(args, "command");
    let session = Session::new(load_config().session);
    let reply = session.execute(&command).map_err(io::Error::other)?;
    session.close();
    println!("{}", reply);
    Ok(())
}

fn cmd_batch(args: &[String]) -> io::Result<()> {
    if args.is_empty() {
        eprintln!("Error: at least one command required");
        std::process::exit(1);
    }
    let session = Session::new(load_config().session);
    let results = session.fetch_all(args);
    session.close();

    let out: Vec<serde_json::Value> = args
        .iter()
        .zip(results)
        .map(|(command, result)| match result {
            Ok(reply) => serde_json::json!({ "command": command, "ok": true, "reply": reply }),
            Err(e) => {
                serde_json::json!({ "command": command, "ok": false, "error": e.to_string() })
            }
        })
        .collect();
    println!(
        "{}",
        serde_json::to_string_pretty(&out).map_err(io::Error::other)?
    );
    Ok(())
}

fn cmd_status() -> io::Result<()> {
    let session = Session::new(load_config().session);
    let status = ServerStatus::from_results(session.fetch_all(&STATUS_COMMANDS));
    session.close();
    println!(
        "{}",
        serde_json::to_string_pretty(&status).map_err(io::Error::other)?
    );
    if !status.online {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_say(args: &[String]) -> io::Result<()> {
    let mut message = require_args(args, "message");
    if message.chars().count() > SAY_MAX_CHARS {
        message = message.chars().take(SAY_MAX_CHARS).collect::<String>() + "...";
    }

    let config = load_config();
    let command = format!("admin {} {}", config.relay_tag, message);
    let session = Session::new(config.session);
    let reply = session
        .execute_with_timeout(&command, SAY_READ_TIMEOUT)
        .map_err(io::Error::other)?;
    session.close();

    if reply.contains("Message sent!") {
        println!("sent");
    } else {
        log::warn!("Unexpected reply to admin message: {:?}", reply);
        println!("{}", reply);
    }
    Ok(())
}

fn main() {
    // Load .env if present; real environment variables still win.
    dotenvy::dotenv().ok();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let result = match args[1].as_str() {
        "exec" => cmd_exec(&args[2..]),
        "batch" => cmd_batch(&args[2..]),
        "status" => cmd_status(),
        "say" => cmd_say(&args[2..]),
        "watch" => watch::run(load_config()),
        "-h" | "--help" | "help" => {
            print_usage();
            Ok(())
        }
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            print_usage();
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
