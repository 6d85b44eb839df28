//! fabric-ctl: command-line interface for the fabric daemon.

mod cmd;

use anyhow::{Context, Result};

const DEFAULT_PORT: u16 = 5248;

fn print_usage() {
    println!("Usage: fabric-ctl [--port <port>] <command>");
    println!();
    println!("Commands:");
    println!("  status        Show engine state, interfaces, and counters");
    println!("  hints         List inferred topology hints");
    println!("  solicit       Request a solicitation round");
    println!("  advertise     Request an advertisement round");
    println!("  shutdown      Stop the daemon");
    println!();
    println!("Options:");
    println!("  --port <port>   API port (default: {})", DEFAULT_PORT);
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    // Parse --port option
    let mut port = DEFAULT_PORT;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--port" {
            i += 1;
            port = args
                .get(i)
                .context("--port requires a value")?
                .parse()
                .context("--port must be a number")?;
        } else {
            remaining.push(&args[i]);
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["status"] | []                => cmd::status::cmd_status(port).await,
        ["hints"]                      => cmd::hints::cmd_hints(port).await,
        ["solicit"]                    => cmd::hints::cmd_solicit(port).await,
        ["advertise"]                  => cmd::hints::cmd_advertise(port).await,
        ["shutdown"]                   => cmd::status::cmd_shutdown(port).await,
        ["help"] | ["--help"] | ["-h"] => { print_usage(); Ok(()) }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
