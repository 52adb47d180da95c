//! Inspect device declarations and encode/decode payloads offline.
//!
//! Usage:
//!   devdecl [-v] layout <decl.json>
//!   devdecl [-v] encode <decl.json> '{"<api>": {...}}'
//!   devdecl [-v] decode <decl.json> <api> <hex>
//!
//! `encode` prints the framed write payload as hex. `decode` strips the read framing
//! from the hex reply and prints the decoded JSON. `RUST_LOG` overrides the log
//! filter (default `warn`, `debug` with `-v`).

use anyhow::{anyhow, Context};
use devdecl::device::parse_command;
use devdecl::dump::{dump_expanded, dump_structure, hex_string, parse_hex};
use devdecl::loader::load_declaration_file;
use devdecl::{ApiCommand, DeviceDeclaration, ExprEvaluator};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn usage() -> anyhow::Error {
    anyhow!(
        "usage: devdecl [-v] layout <decl.json> | encode <decl.json> <json> \
         | decode <decl.json> <api> <hex>"
    )
}

fn main() -> anyhow::Result<()> {
    let mut raw_args: Vec<String> = std::env::args().skip(1).collect();
    let flag = raw_args.iter().position(|a| a == "--verbose" || a == "-v");
    let verbose = if let Some(pos) = flag {
        raw_args.remove(pos);
        true
    } else {
        false
    };
    let default_filter = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut args = raw_args.into_iter();
    let command = args.next().ok_or_else(usage)?;
    let decl_path: PathBuf = args.next().map(PathBuf::from).ok_or_else(usage)?;
    let device = load_declaration_file(&decl_path)?;

    match command.as_str() {
        "layout" => layout(&device),
        "encode" => {
            let text = args.next().ok_or_else(usage)?;
            encode(&device, &text)
        }
        "decode" => {
            let api = args.next().ok_or_else(usage)?;
            let hex = args.next().ok_or_else(usage)?;
            decode(&device, &api, &hex)
        }
        other => Err(usage().context(format!("unknown command `{}`", other))),
    }
}

fn layout(device: &DeviceDeclaration) -> anyhow::Result<()> {
    println!("device {}", device.name);
    if let Some(pid) = device.product_id {
        println!("product_id {:#06x}", pid);
    }
    for s in device.registry().iter() {
        println!();
        print!("{}", dump_structure(s));
        if let Some(e) = device.expanded(&s.name) {
            print!("{}", dump_expanded(e));
        }
    }
    println!();
    for api in device.apis() {
        let cmd = |c: &Option<ApiCommand>| match c {
            Some(c) => format!("{:#x}", c.command_id),
            None => "-".to_string(),
        };
        println!(
            "api {:<16} {:<16} write={} read={}",
            api.name,
            api.structure,
            cmd(&api.write),
            cmd(&api.read)
        );
    }
    Ok(())
}

fn encode(device: &DeviceDeclaration, text: &str) -> anyhow::Result<()> {
    let (api, doc) = parse_command(text).context("parsing command JSON")?;
    let framed = device.encode(&api, &doc, &ExprEvaluator)?;
    println!("{}", hex_string(&framed));
    Ok(())
}

fn decode(device: &DeviceDeclaration, api: &str, hex: &str) -> anyhow::Result<()> {
    let frame = parse_hex(hex).ok_or_else(|| anyhow!("invalid hex: {}", hex))?;
    let doc = device.decode(api, &frame, &ExprEvaluator)?;
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}
