use std::env;

use tracing::error;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const USAGE: &str = "Usage: warden serve --config <path>\n       warden verify-audit --path <path>";

#[tokio::main]
async fn main() {
    let mut args = env::args().skip(1);
    let cmd = args.next().unwrap_or_default();
    let rest: Vec<String> = args.collect();

    match cmd.as_str() {
        "serve" => {
            let config_path = flag(&rest, "--config")
                .unwrap_or_else(|| "./config/example-config.yaml".to_string());
            let cfg = match warden_config::load_and_validate(&config_path) {
                Ok(v) => v,
                Err(e) => {
                    eprintln!("failed to load config: {e}");
                    std::process::exit(1);
                }
            };
            init_logging(&cfg.logging);

            if let Err(e) = warden_server::serve(cfg).await {
                error!(error = %e, "server exited with error");
                std::process::exit(1);
            }
        }
        "verify-audit" => {
            let Some(path) = flag(&rest, "--path") else {
                eprintln!("{USAGE}");
                std::process::exit(2);
            };
            match warden_server::verify_audit_chain(&path) {
                Ok(count) => println!("audit chain ok: {count} records"),
                Err(e) => {
                    eprintln!("audit chain broken: {e}");
                    std::process::exit(1);
                }
            }
        }
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    }
}

fn flag(args: &[String], name: &str) -> Option<String> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

/// `RUST_LOG` wins over the configured filter.
fn init_logging(cfg: &warden_config::Logging) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.filter));
    let registry = tracing_subscriber::registry().with(filter);
    if cfg.format == "json" {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(false)).init();
    }
}
