//! Local preview server for the generated site.

use anyhow::{Context, Result};
use axum::Router;
use bucketgames_core::WEBSITE_DIR;
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr};
use std::ops::RangeInclusive;
use std::path::Path;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Ports tried in order until one is free.
pub const PORTS: RangeInclusive<u16> = 8052..=8061;

/// Overrides the loopback bind address, e.g. `0.0.0.0` inside a container.
pub const BIND_ADDRESS_ENV: &str = "WEBSERVER_BIND_ADDRESS";

fn bind_address() -> Result<IpAddr> {
    match std::env::var(BIND_ADDRESS_ENV) {
        Ok(value) => value
            .parse()
            .with_context(|| format!("invalid {BIND_ADDRESS_ENV}: {value}")),
        Err(_) => Ok(IpAddr::V4(Ipv4Addr::LOCALHOST)),
    }
}

/// Bind the first port in `ports` that is not already taken.
pub async fn bind_first_free(ip: IpAddr, ports: RangeInclusive<u16>) -> Result<TcpListener> {
    let (first, last) = (*ports.start(), *ports.end());
    for port in ports {
        match TcpListener::bind((ip, port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) if e.kind() == ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port in use");
            }
            Err(e) => return Err(e).with_context(|| format!("failed to bind to {ip}:{port}")),
        }
    }
    anyhow::bail!("no free port between {first} and {last} on {ip}")
}

pub fn router(site: &Path) -> Router {
    Router::new()
        .fallback_service(ServeDir::new(site))
        .layer(TraceLayer::new_for_http())
}

/// Serve `<bucket>/_website` until Ctrl-C.
pub async fn serve(bucket: &Path) -> Result<()> {
    let site = bucket.join(WEBSITE_DIR);
    if !site.is_dir() {
        anyhow::bail!(
            "{} does not exist; run `bucketgames {} generate` first",
            site.display(),
            bucket.display()
        );
    }

    let listener = bind_first_free(bind_address()?, PORTS).await?;
    let addr = listener.local_addr().context("failed to read bound address")?;
    println!("Serving {} at http://{addr}/ (Ctrl-C to stop)", site.display());

    axum::serve(listener, router(&site))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("preview server failed")?;
    Ok(())
}
