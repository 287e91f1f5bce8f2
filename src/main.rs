//! # livefn
//!
//! Demo server for the live UI runtime: a per-tab counter and a greeter,
//! both driven entirely from the server.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use livefn_server::{FnComponent, HandleFn, LiveServer, RouteContext, handle_fn};
use serde::Deserialize;
use tracing::{info, warn};

/// livefn demo server.
#[derive(Parser, Debug)]
#[command(name = "livefn", about = "Live server-driven UI demo")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (defaults to `~/.livefn/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,
}

/// Data the client sends with `input` events.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct InputEvent {
    value: String,
}

fn change_count(delta: i64) -> HandleFn {
    handle_fn(move |ctx: RouteContext| async move {
        let entry = match ctx.use_cache::<i64>("count") {
            Ok(entry) => entry,
            Err(e) => return ctx.error(e.to_string()),
        };
        let next = entry.value().unwrap_or(0) + delta;
        if let Err(e) = entry.set(next, None) {
            return ctx.error(e.to_string());
        }
        ctx.component()
            .swap_element_inner("count")
            .child(next.to_string())
    })
}

fn counter() -> HandleFn {
    handle_fn(|ctx: RouteContext| async move {
        let count = ctx
            .new_cache("count", 0_i64)
            .or_else(|_| ctx.use_cache::<i64>("count"))
            .ok()
            .and_then(|entry| entry.value().ok())
            .unwrap_or(0);

        let minus = ctx
            .component()
            .with_events(&change_count(-1), &["click"])
            .child("<button>-</button>");
        let plus = ctx
            .component()
            .with_events(&change_count(1), &["click"])
            .child("<button>+</button>");
        ctx.component()
            .with_label("counter")
            .child(format!("<h1>Count: <span id='count'>{count}</span></h1>"))
            .nest(minus)
            .nest(plus)
    })
}

fn greet() -> HandleFn {
    handle_fn(|ctx: RouteContext| async move {
        let name = match ctx.event_data::<InputEvent>() {
            Ok(input) if !input.value.is_empty() => input.value,
            _ => "stranger".to_owned(),
        };
        ctx.component()
            .swap_element_inner("greeting")
            .child(format!("Hello, {name}!"))
    })
}

fn greeter() -> HandleFn {
    handle_fn(|ctx: RouteContext| async move {
        let input = ctx
            .component()
            .with_events(&greet(), &["input"])
            .child("<input placeholder='Your name'>");
        FnComponent::new(ctx)
            .with_label("greeter")
            .child("<p id='greeting'>Hello, stranger!</p>")
            .nest(input)
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings_path = cli
        .settings
        .unwrap_or_else(livefn_settings::settings_path);
    let mut settings = livefn_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("failed to load settings from {}", settings_path.display()))?;
    if let Some(host) = cli.host {
        settings.server.host = host;
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }

    livefn_telemetry::init_telemetry(&settings.logging);

    let server = LiveServer::new(settings)
        .context("invalid settings")?
        .route("/", counter())
        .route("/greet", greeter());
    let (addr, handle) = server.listen().await.context("failed to bind")?;
    info!(%addr, "livefn demo ready, open http://{addr}/?livefn_id=<tab id>");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("ctrl-c received");
    if !server.shutdown(vec![handle]).await {
        warn!("some tasks were still running at exit");
    }
    Ok(())
}
