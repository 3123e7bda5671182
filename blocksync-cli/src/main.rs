use std::path::PathBuf;
use std::process;

use blocksync_cli::*;
use clap::{command, value_parser, Arg, ArgMatches, Command};
use log::error;

fn path_arg(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .help(help)
        .required(true)
        .value_parser(value_parser!(PathBuf))
}
fn chunk_size_arg() -> Arg {
    Arg::new("chunk-size")
        .long("chunk-size")
        .short('c')
        .help("Read the signature or delta in pieces of this many bytes")
        .value_parser(value_parser!(usize))
        .default_value("4096")
}
fn path<'a>(matches: &'a ArgMatches, name: &str) -> &'a PathBuf {
    // required arguments
    matches
        .get_one::<PathBuf>(name)
        .unwrap_or_else(|| unreachable!("{name} is required"))
}

fn cli() -> Command {
    command!()
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("signature")
                .about("Write the signature of a reference file")
                .arg(
                    Arg::new("block-size")
                        .long("block-size")
                        .short('b')
                        .help("Size of the hashed blocks. Derived from the file size if not set")
                        .value_parser(value_parser!(usize)),
                )
                .arg(
                    Arg::new("weak")
                        .long("weak")
                        .help("The rolling hash")
                        .value_parser(WEAK_HASHES)
                        .default_value("beta"),
                )
                .arg(
                    Arg::new("strong")
                        .long("strong")
                        .help("The hash which verifies matching blocks")
                        .value_parser(STRONG_HASHES)
                        .default_value("xxh3-64"),
                )
                .arg(path_arg("REFERENCE", "The file the other side has"))
                .arg(path_arg("SIGNATURE", "Where to write the signature")),
        )
        .subcommand(
            Command::new("delta")
                .about("Write the delta of a target file against a signature")
                .arg(chunk_size_arg())
                .arg(path_arg("SIGNATURE", "The signature of the reference"))
                .arg(path_arg("TARGET", "The file to describe"))
                .arg(path_arg("DELTA", "Where to write the delta")),
        )
        .subcommand(
            Command::new("patch")
                .about("Apply a delta to the reference file")
                .arg(chunk_size_arg())
                .arg(path_arg("REFERENCE", "The file the signature was created from"))
                .arg(path_arg("DELTA", "The delta to apply"))
                .arg(path_arg("OUTPUT", "Where to write the rebuilt target")),
        )
}

fn run(matches: &ArgMatches) -> Result<(), DynError> {
    match matches.subcommand() {
        Some(("signature", matches)) => {
            let weak = weak_hash(
                matches
                    .get_one::<String>("weak")
                    .map_or("beta", String::as_str),
            )?;
            let strong = strong_hash(
                matches
                    .get_one::<String>("strong")
                    .map_or("xxh3-64", String::as_str),
            )?;
            run_signature(
                path(matches, "REFERENCE"),
                path(matches, "SIGNATURE"),
                matches.get_one::<usize>("block-size").copied(),
                weak,
                strong,
            )
        }
        Some(("delta", matches)) => {
            let chunk_size = matches
                .get_one::<usize>("chunk-size")
                .copied()
                .unwrap_or(DEFAULT_CHUNK_SIZE);
            run_delta(
                path(matches, "SIGNATURE"),
                path(matches, "TARGET"),
                path(matches, "DELTA"),
                chunk_size,
            )
            .map(drop)
        }
        Some(("patch", matches)) => {
            let chunk_size = matches
                .get_one::<usize>("chunk-size")
                .copied()
                .unwrap_or(DEFAULT_CHUNK_SIZE);
            run_patch(
                path(matches, "REFERENCE"),
                path(matches, "DELTA"),
                path(matches, "OUTPUT"),
                chunk_size,
            )
            .map(drop)
        }
        _ => unreachable!("a subcommand is required"),
    }
}

fn main() {
    env_logger::init();

    let matches = cli().get_matches();

    if let Err(err) = run(&matches) {
        error!("{err}");
        process::exit(1);
    }
}
