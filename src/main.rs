//! tisnet node binary.
//!
//! Starts a single node of a TIS-100-style computing fabric.
//!
//! # Usage
//! ```text
//! tisnet <role> <listen_addr> [OPTIONS]
//! ```
//!
//! # Arguments
//! - `role`: `program`, `stack`, or `master`
//! - `listen_addr`: RPC address to bind (e.g., `127.0.0.1:4000`)
//!
//! # Options
//! - `--master <addr>`: master RPC address (required for program nodes)
//! - `--http <addr>`: operator HTTP bind address (master only)
//! - `--node <addr>=<role>`: directory entry (master only, repeatable)
//!
//! Every option falls back to an environment variable (`TISNET_MASTER`,
//! `TISNET_HTTP`, `TISNET_NODES` as a comma-separated list) so the same
//! binary drops into container deployments unchanged.

use std::env;
use std::process;
use tisnet::nodes::{Directory, MasterNode, NodeRole, ProgramNode, StackNode};
use tisnet::{error, info};
use tokio::net::TcpListener;

const USAGE: &str = "\
tisnet node

USAGE:
    {program} <role> <listen_addr> [OPTIONS]

ARGS:
    <role>           program | stack | master
    <listen_addr>    RPC address to bind (e.g., 127.0.0.1:4000)

OPTIONS:
    --master <addr>        Master RPC address (program nodes)
    --http <addr>          Operator HTTP bind address (master, default 0.0.0.0:8080)
    --node <addr>=<role>   Directory entry (master, repeatable)
    -h, --help             Print this help message

ENVIRONMENT:
    TISNET_MASTER    Fallback for --master
    TISNET_HTTP      Fallback for --http
    TISNET_NODES     Fallback for --node entries, comma-separated

EXAMPLES:
    # A two-node network plus master on one machine
    {program} program 127.0.0.1:4001 --master 127.0.0.1:4000
    {program} stack   127.0.0.1:4002
    {program} master  127.0.0.1:4000 --http 127.0.0.1:8080 \\
        --node 127.0.0.1:4001=program --node 127.0.0.1:4002=stack
";

/// Prints usage information to stderr.
fn print_usage(program: &str) {
    eprintln!("{}", USAGE.replace("{program}", program));
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage(&args[0]);
        process::exit(if args.len() < 2 { 1 } else { 0 });
    }

    if args.len() < 3 {
        eprintln!("Missing listen address\n");
        print_usage(&args[0]);
        process::exit(1);
    }

    let role = args[1].as_str();
    let listen_addr = args[2].clone();

    let mut master_addr = env::var("TISNET_MASTER").ok();
    let mut http_addr = env::var("TISNET_HTTP").ok();
    let mut node_entries: Vec<String> = env::var("TISNET_NODES")
        .map(|v| v.split(',').map(str::to_string).collect())
        .unwrap_or_default();

    let mut i = 3;
    while i < args.len() {
        match args[i].as_str() {
            "--master" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("--master requires an argument");
                    process::exit(1);
                }
                master_addr = Some(args[i].clone());
                i += 1;
            }
            "--http" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("--http requires an argument");
                    process::exit(1);
                }
                http_addr = Some(args[i].clone());
                i += 1;
            }
            "--node" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("--node requires an argument");
                    process::exit(1);
                }
                node_entries.push(args[i].clone());
                i += 1;
            }
            other => {
                eprintln!("Unexpected argument: {}\n", other);
                print_usage(&args[0]);
                process::exit(1);
            }
        }
    }

    let listener = match TcpListener::bind(&listen_addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Failed to bind {}: {}", listen_addr, e);
            process::exit(1);
        }
    };

    match role {
        "program" => {
            let master_addr = master_addr.unwrap_or_else(|| {
                eprintln!("Program nodes need --master or TISNET_MASTER");
                process::exit(1);
            });
            let node = ProgramNode::new(&listen_addr, &master_addr);
            node.start(listener);
            info!("program node '{}' started", listen_addr);
        }
        "stack" => {
            let node = StackNode::new(&listen_addr);
            node.start(listener);
            info!("stack node '{}' started", listen_addr);
        }
        "master" => {
            let directory = match parse_directory(&node_entries) {
                Ok(d) => d,
                Err(entry) => {
                    eprintln!("Invalid --node entry '{}', expected <addr>=<role>", entry);
                    process::exit(1);
                }
            };

            let http_addr = http_addr.unwrap_or_else(|| "0.0.0.0:8080".to_string());
            let http_listener = match TcpListener::bind(&http_addr).await {
                Ok(l) => l,
                Err(e) => {
                    eprintln!("Failed to bind {}: {}", http_addr, e);
                    process::exit(1);
                }
            };

            let master = MasterNode::new(directory);
            master.start(listener);
            info!(
                "master node '{}' started, operator surface on {}",
                listen_addr, http_addr
            );

            let server = master.clone();
            tokio::spawn(async move {
                if let Err(e) = server.serve_http(http_listener).await {
                    error!("operator surface failed: {}", e);
                    process::exit(1);
                }
            });
        }
        other => {
            eprintln!("Unknown role: {}\n", other);
            print_usage(&args[0]);
            process::exit(1);
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        eprintln!("Failed to setup Ctrl+C handler: {}", e);
        return;
    }
    info!("Ctrl+C received, shutting down...");
}

/// Parses `<addr>=<role>` directory entries.
fn parse_directory(entries: &[String]) -> Result<Directory, String> {
    let mut directory = Directory::new();
    for entry in entries {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (addr, role) = entry.split_once('=').ok_or_else(|| entry.to_string())?;
        let role = NodeRole::parse(role).ok_or_else(|| entry.to_string())?;
        directory.insert(addr.to_string(), role);
    }
    Ok(directory)
}
