//! geoenrich - IP to location enrichment
//!
//! This is the composition root: it reads configuration from the
//! environment, starts the resolver and enriches stdin line by line.
//!
//! Each input line is either a bare address, answered with the location
//! as a JSON object, or a JSON event whose address field is resolved and
//! the event echoed back with `country` and `city` added.

use anyhow::Context;
use geoenrich::{
    classify, is_ip_address, load_config, EnrichmentPipeline, GeoLocationService, IpKind, Location,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::task::JoinHandle;

type Pending = Vec<JoinHandle<Result<Option<String>, serde_json::Error>>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from environment
    let cfg = load_config()?;

    // Setup logging (stdout carries the enriched output)
    let log_level = if cfg.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(
        "starting geoenrich resolver={} workers={}",
        cfg.settings.resolver,
        cfg.workers
    );

    // ===== COMPOSITION ROOT =====
    let pipeline = EnrichmentPipeline::new(cfg.settings.clone());
    let service = pipeline.start().context("failed to start the resolver")?;

    let ip_field: Arc<str> = Arc::from(cfg.ip_field.as_str());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut out = BufWriter::new(tokio::io::stdout());
    let mut pending: Pending = Vec::with_capacity(cfg.workers);

    // Lookups block, so they run on the blocking pool; output keeps input order.
    while let Some(line) = lines.next_line().await.context("failed to read from stdin")? {
        let service = service.clone();
        let ip_field = ip_field.clone();
        pending.push(tokio::task::spawn_blocking(move || {
            enrich_line(&service, &ip_field, &line)
        }));

        if pending.len() >= cfg.workers {
            drain(&mut pending, &mut out).await?;
        }
    }
    drain(&mut pending, &mut out).await?;
    out.flush().await?;

    pipeline.stop();
    Ok(())
}

async fn drain<W>(pending: &mut Pending, out: &mut W) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    for handle in pending.drain(..) {
        if let Some(line) = handle.await?? {
            out.write_all(line.as_bytes()).await?;
            out.write_all(b"\n").await?;
        }
    }
    Ok(())
}

/// Enrich one input line. Blank and malformed lines produce nothing.
fn enrich_line(
    service: &GeoLocationService,
    ip_field: &str,
    line: &str,
) -> Result<Option<String>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if !line.starts_with('{') {
        return serde_json::to_string(&locate(service, line)).map(Some);
    }

    let mut event: Value = match serde_json::from_str(line) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, "skipping malformed event");
            return Ok(None);
        }
    };

    let ip = event
        .get(ip_field)
        .and_then(Value::as_str)
        .map(|ip| ip.trim().to_string());
    match (ip, event.as_object_mut()) {
        (Some(ip), Some(fields)) => {
            let location = locate(service, &ip);
            fields.insert("country".to_string(), Value::from(location.country));
            fields.insert("city".to_string(), Value::from(location.region_or_city));
        }
        _ => tracing::debug!("event has no '{}' field", ip_field),
    }

    serde_json::to_string(&event).map(Some)
}

/// Resolve an address or network block. Anything else is reported and
/// answered as unknown without touching the resolver.
fn locate(service: &GeoLocationService, ip: &str) -> Location {
    if is_ip_address(ip) || classify(ip) == IpKind::Cidr {
        service.resolve(ip)
    } else {
        tracing::error!(ip, "the ip address is invalid");
        Location::unknown(ip)
    }
}
