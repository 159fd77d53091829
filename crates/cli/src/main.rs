//! # CLI — Caskade Interactive Shell
//!
//! A REPL-style command-line interface for the Caskade storage engine.
//! Reads commands from stdin, executes them against the engine, and prints
//! results to stdout. Designed for both interactive use and scripted testing
//! (pipe commands via stdin).
//!
//! ## Commands
//!
//! ```text
//! SET key value      Insert or update a key-value pair
//! GET key            Look up a key (prints value or "(nil)")
//! DEL key            Delete a key (writes a tombstone)
//! LIST               Print all live keys
//! FOLD               Print every live key-value pair
//! MERGE              Compact immutable segments
//! SYNC               Force an fsync of the active segment
//! STATS              Print engine debug info
//! EXIT / QUIT        Shut down gracefully
//! ```
//!
//! ## Configuration
//!
//! All settings are controlled via environment variables:
//!
//! ```text
//! CASKADE_DIR          Database directory        (default: "data")
//! CASKADE_SYNC_ON_PUT  fsync every put/delete    (default: "false")
//! CASKADE_MAX_FILE_KB  Segment rollover in KiB   (default: 2097152 = 2 GiB)
//! CASKADE_READ_ONLY    Open read-only            (default: "false")
//! ```

use anyhow::Result;
use engine::{Engine, Options};
use std::io::{self, BufRead, Write};

/// Reads a configuration value from the environment, falling back to `default`.
fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn main() -> Result<()> {
    let dir = env_or("CASKADE_DIR", "data");
    let sync_on_put: bool = env_or("CASKADE_SYNC_ON_PUT", "false").parse().unwrap_or(false);
    let max_file_kb: u64 = env_or("CASKADE_MAX_FILE_KB", "2097152")
        .parse()
        .unwrap_or(2 * 1024 * 1024);
    let read_only: bool = env_or("CASKADE_READ_ONLY", "false").parse().unwrap_or(false);

    // The engine expects the directory to exist; creating it is our job.
    std::fs::create_dir_all(&dir)?;

    let db = Engine::open(
        &dir,
        Options {
            read_only,
            sync_on_put,
            max_file_size: max_file_kb * 1024,
            ..Options::default()
        },
    )?;

    println!(
        "Caskade started (dir={}, keys={}, segments={}, sync_on_put={}, read_only={})",
        dir,
        db.len(),
        db.segment_count(),
        sync_on_put,
        read_only
    );
    println!("Commands: SET key value | GET key | DEL key | LIST | FOLD");
    println!("          MERGE | SYNC | STATS | EXIT");
    print!("> ");
    io::stdout().flush().ok();

    let stdin = io::stdin();

    for line in stdin.lock().lines() {
        let line = line?;
        let mut parts = line.split_whitespace();
        if let Some(cmd) = parts.next() {
            match cmd.to_uppercase().as_str() {
                "SET" => {
                    if let Some(k) = parts.next() {
                        let v: String = parts.collect::<Vec<&str>>().join(" ");
                        if v.is_empty() {
                            println!("ERR usage: SET key value");
                        } else {
                            match db.put(k.as_bytes(), v.as_bytes()) {
                                Ok(()) => println!("OK"),
                                Err(e) => println!("ERR set failed: {}", e),
                            }
                        }
                    } else {
                        println!("ERR usage: SET key value");
                    }
                }
                "GET" => {
                    if let Some(k) = parts.next() {
                        match db.get(k.as_bytes()) {
                            Ok(Some(v)) => println!("{}", String::from_utf8_lossy(&v)),
                            Ok(None) => println!("(nil)"),
                            Err(e) => println!("ERR read failed: {}", e),
                        }
                    } else {
                        println!("ERR usage: GET key");
                    }
                }
                "DEL" => {
                    if let Some(k) = parts.next() {
                        match db.delete(k.as_bytes()) {
                            Ok(()) => println!("OK"),
                            Err(e) => println!("ERR del failed: {}", e),
                        }
                    } else {
                        println!("ERR usage: DEL key");
                    }
                }
                "LIST" => match db.list() {
                    Ok(keys) => {
                        if keys.is_empty() {
                            println!("(empty)");
                        } else {
                            let mut keys = keys;
                            keys.sort();
                            for k in &keys {
                                println!("{}", String::from_utf8_lossy(k));
                            }
                            println!("({} keys)", keys.len());
                        }
                    }
                    Err(e) => println!("ERR list failed: {}", e),
                },
                "FOLD" => {
                    let mut count = 0usize;
                    let result = db.fold(|k, v| {
                        println!(
                            "{} -> {}",
                            String::from_utf8_lossy(k),
                            String::from_utf8_lossy(v)
                        );
                        count += 1;
                        Ok(())
                    });
                    match result {
                        Ok(()) => println!("({} entries)", count),
                        Err(e) => println!("ERR fold failed: {}", e),
                    }
                }
                "MERGE" => match db.merge() {
                    Ok(()) => println!("OK (segments={})", db.segment_count()),
                    Err(e) => println!("ERR merge failed: {}", e),
                },
                "SYNC" => match db.sync() {
                    Ok(()) => println!("OK"),
                    Err(e) => println!("ERR sync failed: {}", e),
                },
                "STATS" => {
                    println!("{:?}", db);
                }
                "EXIT" | "QUIT" => {
                    println!("bye");
                    break;
                }
                other => {
                    println!("unknown command: {}", other);
                }
            }
        }

        print!("> ");
        io::stdout().flush().ok();
    }

    db.close()?;
    Ok(())
}
