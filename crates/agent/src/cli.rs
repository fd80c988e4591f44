use anyhow::Context;
use prism_protocol::AgentConfig;

pub(crate) struct Args {
    pub config: AgentConfig,
}

pub(crate) fn parse_args() -> anyhow::Result<Args> {
    let mut config_path: Option<String> = None;
    let mut device_id: Option<String> = None;
    let mut operator_url: Option<String> = None;

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-V" | "--version" => {
                println!("prism-agent {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "-h" | "--help" => {
                println!("prism-agent - Prism device-side streaming agent");
                println!();
                println!("USAGE:");
                println!("    prism-agent [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    --config <PATH>              TOML configuration file");
                println!("    --device-id <ID>             Override device.id from the config");
                println!("    --url <URL>                  Override signaling.url from the config");
                println!("    -V, --version                Print version and exit");
                println!("    -h, --help                   Print this help and exit");
                println!();
                println!("ENVIRONMENT:");
                println!(
                    "    PRISM_AUTH_TOKEN_KEY         Path to the 32-byte confirmation signing key"
                );
                std::process::exit(0);
            }
            "--config" => {
                i += 1;
                config_path = Some(args.get(i).context("Missing --config value")?.clone());
            }
            "--device-id" => {
                i += 1;
                device_id = Some(args.get(i).context("Missing --device-id value")?.clone());
            }
            "--url" => {
                i += 1;
                operator_url = Some(args.get(i).context("Missing --url value")?.clone());
            }
            other => anyhow::bail!("Unknown argument: {other}"),
        }
        i += 1;
    }

    let mut config = match config_path {
        Some(path) => AgentConfig::load(std::path::Path::new(&path))
            .with_context(|| format!("Failed to load config from {path}"))?,
        None => AgentConfig::default(),
    };
    if let Some(id) = device_id {
        config.device.id = id;
    }
    if let Some(url) = operator_url {
        config.signaling.url = url;
    }
    // Key paths go through the environment, not argv (argv is world-readable
    // in /proc).
    if config.confui.auth_token_key.is_none() {
        config.confui.auth_token_key = std::env::var("PRISM_AUTH_TOKEN_KEY").ok();
    }

    Ok(Args { config })
}
