/*!
Slavko kernel command line
*/

use std::path::PathBuf;
use clap::{Arg, ArgAction, ArgMatches, Command};
use tokio_stream::StreamExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use slavko_core::broadcaster::sse;
use slavko_core::dat_token::{self, DelegatedAuthorityToken};
use slavko_core::identity::{TokenSource, validate_access_token};
use slavko_core::{Finding, FindingsBroadcaster, KernelConfig, LocalStorage, Resurrection};

type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

fn cli() -> Command {
    Command::new("slavko-kernel")
        .version(clap::crate_version!())
        .about("Governance tokens, resilient probes and findings fan-out")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .help("Path to a TOML config file")
                .value_name("PATH")
                .global(true)
        )
        .subcommand(
            Command::new("token")
                .about("Manage the locally stored access token")
                .subcommand_required(true)
                .subcommand(Command::new("set").arg(Arg::new("token").required(true)))
                .subcommand(Command::new("show"))
                .subcommand(Command::new("clear"))
        )
        .subcommand(
            Command::new("dat")
                .about("Mint, verify and revoke delegated authority tokens")
                .subcommand_required(true)
                .subcommand(
                    Command::new("mint")
                        .arg(seal_arg())
                        .arg(epoch_arg())
                        .arg(
                            Arg::new("index")
                                .long("index")
                                .value_parser(clap::value_parser!(i64))
                                .allow_negative_numbers(true)
                                .default_value("0")
                        )
                )
                .subcommand(
                    Command::new("batch")
                        .arg(seal_arg())
                        .arg(epoch_arg())
                        .arg(
                            Arg::new("count")
                                .long("count")
                                .value_parser(clap::value_parser!(usize))
                                .required(true)
                        )
                )
                .subcommand(Command::new("verify").arg(Arg::new("json").required(true)))
                .subcommand(Command::new("revoke").arg(Arg::new("json").required(true)))
        )
        .subcommand(
            Command::new("findings")
                .about("Publish findings or follow them as server-sent events")
                .subcommand_required(true)
                .subcommand(Command::new("publish").arg(Arg::new("json").required(true)))
                .subcommand(Command::new("tail"))
        )
        .subcommand(
            Command::new("probe")
                .about("GET a URL with the stored token, retrying with backoff")
                .arg(Arg::new("url").required(true))
                .arg(
                    Arg::new("verbose")
                        .short('v')
                        .long("verbose")
                        .action(ArgAction::SetTrue)
                        .help("Print the response body")
                )
        )
}

fn seal_arg() -> Arg {
    Arg::new("seal")
        .long("seal")
        .help("Governance seal hash")
        .required(true)
}

fn epoch_arg() -> Arg {
    Arg::new("epoch")
        .long("epoch")
        .value_parser(clap::value_parser!(i64))
        .allow_negative_numbers(true)
        .required(true)
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_dat(matches: &ArgMatches) -> CliResult<DelegatedAuthorityToken> {
    let json = matches.get_one::<String>("json").map(String::as_str).unwrap_or_default();
    Ok(serde_json::from_str(json)?)
}

fn verify_dat(token: &DelegatedAuthorityToken) -> CliResult {
    let valid = dat_token::verify(token);
    println!("{}", if valid { "valid" } else { "invalid" });
    if !valid {
        return Err("token failed verification".into());
    }
    Ok(())
}

fn run_token(config: &KernelConfig, matches: &ArgMatches) -> CliResult {
    let storage = LocalStorage::from_config(&config.identity);

    match matches.subcommand() {
        Some(("set", sub)) => {
            let token = sub.get_one::<String>("token").map(String::as_str).unwrap_or_default();
            if let Err(e) = validate_access_token(token) {
                warn!("Storing token that will be rejected: {}", e);
            }
            storage.set(storage.token_key(), token)?;
            info!("💾 Token stored in {:?}", storage.path());
        }
        Some(("show", _)) => match storage.access_token() {
            Some(token) => println!("{}", token),
            None => println!("(no token stored)"),
        },
        Some(("clear", _)) => {
            if storage.remove(storage.token_key())? {
                info!("🧹 Token removed");
            }
        }
        _ => unreachable!("subcommand required"),
    }
    Ok(())
}

fn run_dat(matches: &ArgMatches) -> CliResult {
    match matches.subcommand() {
        Some(("mint", sub)) => {
            let seal = sub.get_one::<String>("seal").map(String::as_str).unwrap_or_default();
            let epoch = sub.get_one::<i64>("epoch").copied().unwrap_or_default();
            let index = sub.get_one::<i64>("index").copied().unwrap_or_default();
            print_json(&dat_token::mint(seal, epoch, index))
        }
        Some(("batch", sub)) => {
            let seal = sub.get_one::<String>("seal").map(String::as_str).unwrap_or_default();
            let epoch = sub.get_one::<i64>("epoch").copied().unwrap_or_default();
            let count = sub.get_one::<usize>("count").copied().unwrap_or_default();
            print_json(&dat_token::mint_batch(seal, epoch, count))
        }
        Some(("verify", sub)) => verify_dat(&parse_dat(sub)?),
        Some(("revoke", sub)) => print_json(&dat_token::revoke(&parse_dat(sub)?)),
        _ => unreachable!("subcommand required"),
    }
}

async fn run_findings(config: &KernelConfig, matches: &ArgMatches) -> CliResult {
    let broadcaster = FindingsBroadcaster::connect(&config.broadcaster).await;
    info!("📡 Findings strategy: {}", broadcaster.strategy_name());

    match matches.subcommand() {
        Some(("publish", sub)) => {
            let json = sub.get_one::<String>("json").map(String::as_str).unwrap_or_default();
            let finding: Finding = serde_json::from_str(json)?;
            broadcaster.publish(&finding).await?;
            info!("✅ Finding published");
        }
        Some(("tail", _)) => {
            let mut stream = sse::finding_stream(&broadcaster).await?;

            loop {
                tokio::select! {
                    frame = stream.next() => match frame {
                        Some(frame) => print!("{}", frame),
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => {
                        info!("🛑 Shutdown");
                        break;
                    }
                }
            }
        }
        _ => unreachable!("subcommand required"),
    }
    Ok(())
}

async fn run_probe(config: &KernelConfig, matches: &ArgMatches) -> CliResult {
    let url = matches.get_one::<String>("url").cloned().unwrap_or_default();
    let storage = LocalStorage::from_config(&config.identity);
    let token = storage.access_token().unwrap_or_default();
    let resurrection = Resurrection::from_config(storage, &config.retry);
    let client = reqwest::Client::new();

    let body = resurrection
        .run_with(|| {
            let request = client.get(&url).bearer_auth(&token);
            async move {
                let response = request.send().await?.error_for_status()?;
                response.text().await
            }
        })
        .await?;

    info!("✅ {} answered ({} bytes)", url, body.len());
    if matches.get_flag("verbose") {
        println!("{}", body);
    }
    Ok(())
}

async fn load_config(path: Option<&String>) -> CliResult<KernelConfig> {
    match path {
        Some(path) => Ok(KernelConfig::from_file(PathBuf::from(path)).await?),
        None => Ok(KernelConfig::default()),
    }
}

#[tokio::main]
async fn main() -> CliResult {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let matches = cli().get_matches();
    let config = load_config(matches.get_one::<String>("config")).await?;

    match matches.subcommand() {
        Some(("token", sub)) => run_token(&config, sub),
        Some(("dat", sub)) => run_dat(sub),
        Some(("findings", sub)) => run_findings(&config, sub).await,
        Some(("probe", sub)) => run_probe(&config, sub).await,
        _ => unreachable!("subcommand required"),
    }
}
