mod chat_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    kestrel_protocol::{InvocationRequest, SERVICE_NAME},
    kestrel_tools::{Dispatcher, builtin_registry},
    serde_json::Value,
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "kestrel", about = "Kestrel: chat-driven scanning and exploitation, on a leash")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: ./kestrel.toml, then ~/.config/kestrel/).
    #[arg(long, global = true, env = "KESTREL_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway (manifest + invocation endpoint).
    Gateway {
        #[arg(long)]
        bind: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Interactive chat session with the model.
    Chat,
    /// Print the capability manifest.
    Manifest,
    /// Dispatch a single capability invocation and print the envelope.
    Invoke {
        #[arg(short, long)]
        method: String,
        /// Arguments as a JSON object.
        #[arg(short, long, default_value = "{}")]
        params: String,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr)
                    .with_ansi(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "kestrel starting");

    match cli.command {
        Commands::Gateway { bind, port } => {
            let config = kestrel_config::load_or_discover(cli.config.as_deref())?;
            let bind = bind.unwrap_or_else(|| config.gateway.bind.clone());
            let port = port.unwrap_or(config.gateway.port);
            kestrel_gateway::start_gateway(&config, &bind, port).await
        },
        Commands::Chat => {
            let config = kestrel_config::load_or_discover(cli.config.as_deref())?;
            chat_commands::run_chat(&config).await
        },
        Commands::Manifest => {
            let manifest = builtin_registry()?.manifest(SERVICE_NAME, env!("CARGO_PKG_VERSION"));
            println!("{}", serde_json::to_string_pretty(&manifest)?);
            Ok(())
        },
        Commands::Invoke { method, params } => {
            let params: Value = serde_json::from_str(&params)
                .map_err(|e| anyhow::anyhow!("--params is not valid JSON: {e}"))?;
            let config = kestrel_config::load_or_discover(cli.config.as_deref())?;
            let dispatcher = Dispatcher::from_config(&config)?;
            let request = InvocationRequest::new(method, params, Value::String("cli".into()));
            let result = dispatcher.dispatch(request).await;
            println!("{}", serde_json::to_string_pretty(&result.to_value())?);
            Ok(())
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "kestrel",
            "invoke",
            "--method",
            "scan",
            "--params",
            r#"{"target":"10.0.0.5"}"#,
            "--json-logs",
        ])
        .unwrap();
        assert!(cli.json_logs);
        assert!(matches!(cli.command, Commands::Invoke { ref method, .. } if method == "scan"));
    }

    #[test]
    fn gateway_overrides_are_optional() {
        let cli = Cli::try_parse_from(["kestrel", "gateway", "--port", "9000"]).unwrap();
        match cli.command {
            Commands::Gateway { bind, port } => {
                assert_eq!(bind, None);
                assert_eq!(port, Some(9000));
            },
            _ => panic!("expected gateway command"),
        }
    }

    #[test]
    fn invoke_params_default_to_empty_object() {
        let cli = Cli::try_parse_from(["kestrel", "invoke", "-m", "msf_sessions"]).unwrap();
        match cli.command {
            Commands::Invoke { params, .. } => assert_eq!(params, "{}"),
            _ => panic!("expected invoke command"),
        }
    }
}
