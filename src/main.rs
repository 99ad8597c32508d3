use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use colored::*;
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

mod config;
mod credentials;
mod error;
mod reference;
mod registry;

use config::Config;
use reference::{ImageReference, Platform};
use registry::RegistryClient;

fn cli() -> Command {
    Command::new("container-tag-exists")
        .version(env!("CARGO_PKG_VERSION"))
        .about("check for the existence of a container tag")
        .long_about(
            "check for the existence of a container tag against repositories using the Registry API v2",
        )
        .arg(
            Arg::new("image")
                .required(true)
                .help("Image name including its registry, e.g. ghcr.io/owner/app"),
        )
        .arg(Arg::new("tag").required(true).help("Tag to look for"))
        .arg(
            Arg::new("platform")
                .short('p')
                .long("platform")
                .action(ArgAction::Append)
                .value_delimiter(',')
                .value_parser(value_parser!(String))
                .help("Platforms in the format os/arch to look for. Default behavior is to look for any platform."),
        )
        .arg(
            Arg::new("plain-http")
                .long("plain-http")
                .action(ArgAction::SetTrue)
                .help("Use http:// instead of https:// to reach the registry"),
        )
        .arg(
            Arg::new("proxy")
                .long("proxy")
                .help("Proxy URL (http://, https:// or socks5://, may include user:pass@)"),
        )
        .arg(
            Arg::new("connect-timeout")
                .long("connect-timeout")
                .value_parser(value_parser!(u64))
                .help("Connection and TLS handshake timeout in seconds [default: 10]"),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .value_parser(value_parser!(u64))
                .help("Overall timeout per request in seconds [default: 10]"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Log each registry call to stderr"),
        )
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn config_from(matches: &ArgMatches) -> Config {
    let mut config = Config {
        plain_http: matches.get_flag("plain-http"),
        proxy: matches.get_one::<String>("proxy").cloned(),
        ..Config::default()
    };
    if let Some(secs) = matches.get_one::<u64>("connect-timeout") {
        config.connect_timeout = Duration::from_secs(*secs);
    }
    if let Some(secs) = matches.get_one::<u64>("timeout") {
        config.request_timeout = Duration::from_secs(*secs);
    }
    config
}

async fn run(matches: &ArgMatches) -> Result<bool> {
    let image = matches
        .get_one::<String>("image")
        .context("missing IMAGE argument")?;
    let tag = matches
        .get_one::<String>("tag")
        .context("missing TAG argument")?;
    let platforms = matches
        .get_many::<String>("platform")
        .unwrap_or_default()
        .map(|p| Platform::from(p.as_str()))
        .collect::<Vec<_>>();

    let reference = ImageReference::parse(image)?;
    let config = config_from(matches);
    let client = RegistryClient::new(&reference, &config)?.with_platforms(platforms);
    debug!(
        "Checking {}:{} (credentials prefix {})",
        reference,
        tag,
        client.identity()
    );

    Ok(client.tag_exists(tag).await?)
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();
    init_logging(matches.get_flag("verbose"));

    match run(&matches).await {
        Ok(true) => println!("found"),
        Ok(false) => {}
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red(), e);
            std::process::exit(1);
        }
    }
}
