//! # dispatcher
//!
//! Command-line front end for a dispatcher server: call a method, watch
//! events, or run an entity query.

#![deny(unsafe_code)]

use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use dispatcher_client::{ClientOptions, ClientSignal, DispatcherClient};
use dispatcher_core::constants::entity_query_method;
use dispatcher_core::logging::{init_json_subscriber, init_subscriber};
use dispatcher_entity::Query;
use dispatcher_settings::{ClientSettings, load_settings};

/// Dispatcher command-line client.
#[derive(Parser, Debug)]
#[command(name = "dispatcher", about = "Talk to a dispatcher server over its socket")]
struct Cli {
    /// Server host, `host:port`, or URL. Defaults to the settings file.
    #[arg(long, global = true)]
    url: Option<String>,

    /// Log in as this user before running the command.
    #[arg(long, short, env = "DISPATCHER_USERNAME", global = true)]
    username: Option<String>,

    /// Password for `--username`.
    #[arg(long, short, env = "DISPATCHER_PASSWORD", global = true, hide_env_values = true)]
    password: Option<String>,

    /// Log filter. `RUST_LOG` takes precedence.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log as JSON lines instead of text.
    #[arg(long, global = true)]
    log_json: bool,

    /// Call timeout in seconds.
    #[arg(long, global = true)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Call a method and print its result.
    Call {
        /// Method name, e.g. `system.info`.
        method: String,
        /// JSON arguments. A non-array value is sent as the only argument.
        #[arg(default_value = "[]")]
        args: String,
    },
    /// Print matching events as JSON lines until interrupted.
    Watch {
        /// Event masks to subscribe to.
        #[arg(required = true)]
        masks: Vec<String>,
    },
    /// Query a collection on the server.
    Query {
        /// Collection name, e.g. `disk`.
        collection: String,
        /// JSON rule list.
        #[arg(default_value = "[]")]
        rules: String,
        /// JSON options object.
        #[arg(default_value = "{}")]
        options: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings().context("failed to load settings")?;
    let level = cli.log_level.as_deref().unwrap_or(&settings.log_level);
    if cli.log_json {
        init_json_subscriber(level);
    } else {
        init_subscriber(level);
    }
    run(cli, &settings).await
}

fn client_options(cli: &Cli, settings: &ClientSettings) -> Result<ClientOptions> {
    let mut options = ClientOptions::from_settings(settings);
    if let Some(url) = &cli.url {
        options.url = ClientOptions::new(url)?.url;
    }
    if let Some(secs) = cli.timeout {
        options = options.with_call_timeout(Duration::from_secs(secs));
    }
    Ok(options)
}

async fn run(cli: Cli, settings: &ClientSettings) -> Result<()> {
    let client = DispatcherClient::new(client_options(&cli, settings)?);
    log_errors(&client);

    client
        .connect()
        .await
        .with_context(|| format!("failed to connect to {}", client.options().url))?;

    if let Some(username) = &cli.username {
        let password = cli.password.as_deref().unwrap_or_default();
        let _ = client
            .login_async(username, password)
            .await
            .context("login failed")?;
        info!(%username, "logged in");
    }

    let outcome = match cli.command {
        Command::Call { method, args } => {
            let args = call_args(parse_json("args", &args)?);
            let result = client.call_async(&method, args).await?;
            print_json(&result)
        }
        Command::Watch { masks } => watch(&client, &masks).await,
        Command::Query {
            collection,
            rules,
            options,
        } => {
            let rules = parse_json("rules", &rules)?;
            let options = parse_json("options", &options)?;
            let _ = Query::parse(&rules, &options).context("invalid query")?;
            let result = client
                .call_async(&entity_query_method(&collection), json!([rules, options]))
                .await?;
            print_json(&result)
        }
    };

    client.disconnect().await;
    outcome
}

async fn watch(client: &DispatcherClient, masks: &[String]) -> Result<()> {
    let mut events = client.events();
    let mut signals = client.signals();
    client.subscribe_events(masks).await?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            event = events.recv() => match event {
                Ok(notice) => println!("{}", json!({"name": notice.name, "args": notice.args})),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event output fell behind"),
                Err(RecvError::Closed) => break,
            },
            signal = signals.recv() => {
                if matches!(signal, Ok(ClientSignal::Disconnected)) {
                    bail!("connection closed");
                }
            }
        }
    }

    client.unsubscribe_events(masks).await?;
    Ok(())
}

fn log_errors(client: &DispatcherClient) {
    let mut errors = client.errors();
    let _ = tokio::spawn(async move {
        loop {
            match errors.recv().await {
                Ok(report) => warn!(kind = %report.kind, error = %report.error, "client error"),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn parse_json(label: &str, raw: &str) -> Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("{label} is not valid JSON: {raw}"))
}

fn call_args(args: Value) -> Value {
    match args {
        Value::Array(_) => args,
        other => json!([other]),
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_defaults_to_empty_args() {
        let cli = Cli::parse_from(["dispatcher", "call", "system.info"]);
        assert_eq!(
            cli.command,
            Command::Call {
                method: "system.info".into(),
                args: "[]".into()
            }
        );
        assert_eq!(cli.url, None);
    }

    #[test]
    fn watch_requires_a_mask() {
        assert!(Cli::try_parse_from(["dispatcher", "watch"]).is_err());
        let cli = Cli::parse_from(["dispatcher", "watch", "disk.*", "pool.*"]);
        assert_eq!(
            cli.command,
            Command::Watch {
                masks: vec!["disk.*".into(), "pool.*".into()]
            }
        );
    }

    #[test]
    fn query_defaults() {
        let cli = Cli::parse_from(["dispatcher", "query", "disk"]);
        assert_eq!(
            cli.command,
            Command::Query {
                collection: "disk".into(),
                rules: "[]".into(),
                options: "{}".into()
            }
        );
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "dispatcher",
            "call",
            "system.info",
            "--url",
            "nas.local",
            "--timeout",
            "5",
            "--log-level",
            "debug",
        ]);
        assert_eq!(cli.url.as_deref(), Some("nas.local"));
        assert_eq!(cli.timeout, Some(5));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(!cli.log_json);
        assert!(Cli::parse_from(["dispatcher", "--log-json", "watch", "x"]).log_json);
    }

    #[test]
    fn options_from_settings_and_flags() {
        let settings = ClientSettings::default();
        let cli = Cli::parse_from(["dispatcher", "call", "x"]);
        let options = client_options(&cli, &settings).unwrap();
        assert_eq!(options.url, settings.socket_url());
        assert_eq!(options.call_timeout, settings.call_timeout());

        let cli = Cli::parse_from(["dispatcher", "--url", "https://nas:8443", "--timeout", "3", "call", "x"]);
        let options = client_options(&cli, &settings).unwrap();
        assert_eq!(options.url, "wss://nas:8443/socket");
        assert_eq!(options.call_timeout, Duration::from_secs(3));
        assert_eq!(options.connect_timeout, settings.connect_timeout());

        let cli = Cli::parse_from(["dispatcher", "--url", "ftp://nas", "call", "x"]);
        assert!(client_options(&cli, &settings).is_err());
    }

    #[test]
    fn json_arguments() {
        assert_eq!(parse_json("args", "[1, \"a\"]").unwrap(), json!([1, "a"]));
        let err = parse_json("rules", "[oops").unwrap_err();
        assert!(err.to_string().contains("rules is not valid JSON"));

        assert_eq!(call_args(json!([1])), json!([1]));
        assert_eq!(call_args(json!({"a": 1})), json!([{"a": 1}]));
        assert_eq!(call_args(json!("x")), json!(["x"]));
    }
}
