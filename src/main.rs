use anyhow::{anyhow, Result};
use clap::Parser;
use reqwest::Client;
use salesdash::{
    config::Config,
    fetch::Source,
    process::{load, Progress},
    select::{filter_suppliers, project, selection_totals, show, Selection, Shown},
    IngestError, LoadError,
};
use tokio::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::parse();

    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .init();
    info!("startup");

    // ─── 2) ingest, restarting from byte zero on source failures ─────
    let client = Client::new();
    let start = Instant::now();
    let snapshot = load(
        || Source::parse(&cfg.source, &client),
        cfg.ingest_options(),
        cfg.retry_policy(),
        log_progress,
    )
    .await
    .map_err(|e| match e {
        LoadError::Ingest(e) => {
            let headline = explain(&e);
            anyhow!(e).context(headline)
        }
        other => anyhow!(other).context(format!("could not load {}", cfg.source)),
    })?;
    info!(elapsed = ?start.elapsed(), "{}", snapshot.summary());

    // ─── 3) report ───────────────────────────────────────────────────
    if let Some(query) = &cfg.search {
        let matches = filter_suppliers(snapshot.suppliers(), query);
        info!(query = %query, matches = matches.len(), "supplier search");
        for name in matches {
            println!("{}", name);
        }
        return Ok(());
    }

    let selection = Selection::from_param(&cfg.supplier);
    if let Selection::Supplier(name) = &selection {
        if !snapshot.by_supplier().contains_key(name) {
            warn!(supplier = %name, "supplier not present in data; series is all zero");
        }
    }
    let series = project(&snapshot, &selection);
    let totals = selection_totals(&series);
    let measures = cfg.measures();

    if cfg.json {
        let shown_totals = Shown {
            bucket: totals,
            measures: &measures,
        };
        let out = serde_json::json!({
            "selection": selection.title(),
            "rows_read": snapshot.rows_read(),
            "suppliers": snapshot.suppliers().len(),
            "totals": shown_totals,
            "series": show(&series, &measures),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("Monthly totals: {}", selection.title());
        println!("{}", snapshot.summary());
        print!("{:<8}", "MONTH");
        for m in &measures {
            print!(" {:>16}", m.label());
        }
        println!();
        for point in &series {
            print!("{:<8}", point.month.to_string());
            for m in &measures {
                print!(" {:>16.2}", m.of(&point.bucket));
            }
            println!();
        }
        print!("{:<8}", "TOTAL");
        for m in &measures {
            print!(" {:>16.2}", m.of(&totals));
        }
        println!();
    }

    info!("all done");
    Ok(())
}

fn log_progress(p: Progress) {
    match p.percent() {
        Some(pct) => info!(
            pct,
            rows = p.rows_read,
            mb = p.bytes_read as f64 / 1e6,
            "loading & aggregating CSV"
        ),
        None => info!(rows = p.rows_read, bytes = p.bytes_read, "loading & aggregating CSV"),
    }
}

/// One distinct message per fatal failure kind.
fn explain(err: &IngestError) -> &'static str {
    match err {
        IngestError::Source { .. } => "could not load the sales data",
        IngestError::StreamingUnsupported { .. } => {
            "this environment cannot stream the sales data"
        }
        IngestError::Schema { .. } => "the sales data does not have the expected columns",
    }
}
