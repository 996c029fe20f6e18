//! `cardproxy-fetch`: download card images by identifier from the command line
//!
//! Settings come from `CARDPROXY_*` environment variables, an optional TOML
//! file, and flags, each overriding the one before.

use anyhow::Context;
use cardproxy_fetch::{
    ConfigLayer, CredentialsPolicy, FetchConfig, ImageFetchClient, ImageFetchWorker,
    ImageIdentifier,
};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use futures::stream::{FuturesUnordered, StreamExt};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};
use url::Url;

fn cli() -> Command {
    Command::new("cardproxy-fetch")
        .version(cardproxy_fetch::VERSION)
        .about("Fetch card images by identifier")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("TOML config file, overrides CARDPROXY_* variables"),
        )
        .arg(
            Arg::new("base-url")
                .long("base-url")
                .global(true)
                .value_name("URL")
                .value_parser(value_parser!(Url))
                .help("Image endpoint that receives ?id=<ID>"),
        )
        .arg(
            Arg::new("page-origin")
                .long("page-origin")
                .global(true)
                .value_name("URL")
                .value_parser(value_parser!(Url))
                .help("Origin the requests are made on behalf of"),
        )
        .arg(
            Arg::new("credentials")
                .long("credentials")
                .global(true)
                .value_parser(["omit", "same-origin", "include"])
                .help("When to attach cookies to requests"),
        )
        .arg(
            Arg::new("timeout-ms")
                .long("timeout-ms")
                .global(true)
                .value_parser(value_parser!(u64).range(1..))
                .help("Whole-request timeout in milliseconds"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON on stderr"),
        )
        .subcommand(
            Command::new("download")
                .about("Download images concurrently, printing each as it completes")
                .arg(
                    Arg::new("ids")
                        .value_name("ID")
                        .required(true)
                        .num_args(1..)
                        .help("Image identifiers"),
                )
                .arg(
                    Arg::new("output")
                        .long("output")
                        .short('o')
                        .value_name("DIR")
                        .value_parser(value_parser!(PathBuf))
                        .help("Write each payload to <DIR>/<ID>.txt instead of stdout"),
                ),
        )
        .subcommand(
            Command::new("url")
                .about("Print the request URL for an identifier")
                .arg(Arg::new("id").value_name("ID").required(true)),
        )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    let config = load_config(&matches, ConfigLayer::from_env()?)?;

    match matches.subcommand() {
        Some(("download", args)) => download(&config, args).await,
        Some(("url", args)) => {
            let id = args
                .get_one::<String>("id")
                .context("missing identifier")?;
            let client = ImageFetchClient::new(&config)?;
            println!("{}", client.request_url(&ImageIdentifier::from(id.as_str())));
            Ok(())
        }
        _ => unreachable!("clap requires a subcommand"),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// `env`, then config file, then flags
fn load_config(matches: &ArgMatches, env: ConfigLayer) -> anyhow::Result<FetchConfig> {
    let mut layer = env;

    if let Some(path) = matches.get_one::<PathBuf>("config") {
        let file = ConfigLayer::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?;
        layer = layer.overlay(file);
    }

    let credentials = matches
        .get_one::<String>("credentials")
        .map(|value| value.parse::<CredentialsPolicy>())
        .transpose()
        .map_err(anyhow::Error::msg)?;

    let flags = ConfigLayer {
        base_url: matches.get_one::<Url>("base-url").cloned(),
        page_origin: matches.get_one::<Url>("page-origin").cloned(),
        credentials,
        timeout_ms: matches.get_one::<u64>("timeout-ms").copied(),
        queue_capacity: None,
    };

    Ok(layer.overlay(flags).build()?)
}

async fn download(config: &FetchConfig, args: &ArgMatches) -> anyhow::Result<()> {
    let ids: Vec<ImageIdentifier> = args
        .get_many::<String>("ids")
        .context("missing identifiers")?
        .map(|id| ImageIdentifier::from(id.as_str()))
        .collect();
    let output = args.get_one::<PathBuf>("output");

    if let Some(dir) = output {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;
    }

    let worker = ImageFetchWorker::spawn(config)?;
    info!(count = ids.len(), base_url = %config.base_url, "downloading images");

    let mut pending: FuturesUnordered<_> = ids
        .iter()
        .cloned()
        .map(|id| {
            let worker = worker.clone();
            async move {
                let result = worker.download(id.clone()).await;
                (id, result)
            }
        })
        .collect();

    let mut failed = 0usize;
    while let Some((id, result)) = pending.next().await {
        match result {
            Ok(payload) => match output {
                Some(dir) => {
                    let path = dir.join(output_file_name(&id));
                    tokio::fs::write(&path, payload.as_str())
                        .await
                        .with_context(|| format!("writing {}", path.display()))?;
                    info!(%id, path = %path.display(), bytes = payload.len(), "saved");
                }
                None => println!("{id}\t{payload}"),
            },
            Err(e) => {
                error!(%id, error = %e, "download failed");
                failed += 1;
            }
        }
    }

    worker.shutdown().await;

    if failed > 0 {
        anyhow::bail!("{failed} of {} downloads failed", ids.len());
    }
    Ok(())
}

/// Identifiers are opaque, so anything outside a safe set becomes `_`
fn output_file_name(id: &ImageIdentifier) -> PathBuf {
    let name: String = id
        .as_str()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let name = name.trim_start_matches('.');
    let name = if name.is_empty() { "_" } else { name };

    PathBuf::from(format!("{name}.txt"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn flags_override_base_url() {
        let matches = cli()
            .try_get_matches_from([
                "cardproxy-fetch",
                "--base-url",
                "https://img.example.com/api/image",
                "--credentials",
                "omit",
                "url",
                "abc",
            ])
            .unwrap();

        let env = ConfigLayer::from_lookup(|_| None).unwrap();
        let config = load_config(&matches, env).unwrap();
        assert_eq!(config.base_url.as_str(), "https://img.example.com/api/image");
        assert_eq!(config.credentials, CredentialsPolicy::Omit);
    }

    #[test]
    fn flags_override_environment() {
        let matches = cli()
            .try_get_matches_from([
                "cardproxy-fetch",
                "--base-url",
                "https://img.example.com/api/image",
                "url",
                "abc",
            ])
            .unwrap();
        let env = ConfigLayer::from_lookup(|key| match key {
            "CARDPROXY_IMAGE_BASE_URL" => Some("https://stale.example.com/img".to_string()),
            "CARDPROXY_TIMEOUT_MS" => Some("250".to_string()),
            _ => None,
        })
        .unwrap();

        let config = load_config(&matches, env).unwrap();
        assert_eq!(config.base_url.as_str(), "https://img.example.com/api/image");
        assert_eq!(config.timeout_ms, Some(250));
    }

    #[test]
    fn output_file_names_stay_inside_the_directory() {
        assert_eq!(
            output_file_name(&ImageIdentifier::from("1A2b3C")),
            PathBuf::from("1A2b3C.txt")
        );
        assert_eq!(
            output_file_name(&ImageIdentifier::from("../etc/passwd")),
            PathBuf::from("_etc_passwd.txt")
        );
        assert_eq!(
            output_file_name(&ImageIdentifier::from("set.v2")),
            PathBuf::from("set.v2.txt")
        );
        assert_eq!(output_file_name(&ImageIdentifier::from("")), PathBuf::from("_.txt"));
    }
}
