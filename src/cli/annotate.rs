use crate::annotate::{ConversionEngine, PassOutcome, PassReport, PriceLocator};
use crate::core::RateSource;
use crate::core::config::{AnnotateConfig, AppConfig};
use crate::dom::html;
use crate::rate_service::RateService;
use anyhow::{Context, Result, bail};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Annotates every price in `input`, replacing annotations from earlier runs.
pub async fn annotate_html(
    input: &str,
    source: Arc<dyn RateSource>,
    config: &AnnotateConfig,
) -> Result<(String, PassReport)> {
    let document = html::parse(input)?;
    let engine = Arc::new(
        ConversionEngine::new(
            Arc::new(Mutex::new(document)),
            source,
            PriceLocator::new(config.fee_keywords.as_slice()),
        )
        .with_fallback_rates(config.fallback_rates),
    );

    let PassOutcome::Completed(report) = engine.full_rerender().await else {
        bail!("Annotation pass did not run");
    };
    let output = html::serialize(&*engine.document().lock().await);
    Ok((output, report))
}

pub async fn run(
    input: &Path,
    output: Option<&Path>,
    service: Arc<RateService>,
    config: &AppConfig,
) -> Result<()> {
    let max_age = chrono::Duration::from_std(config.refresh.interval())
        .unwrap_or(chrono::Duration::days(1));
    if let Err(e) = service.refresh_if_stale(Utc::now(), max_age).await {
        warn!("Could not refresh rates: {:#}", e);
    }

    let page = tokio::fs::read_to_string(input)
        .await
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let (annotated, report) = annotate_html(&page, service, &config.annotate).await?;
    info!(
        annotated = report.annotated,
        skipped = report.skipped,
        failed = report.failed,
        "Annotated {}",
        input.display()
    );

    match output {
        Some(path) => tokio::fs::write(path, annotated)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => println!("{annotated}"),
    }
    Ok(())
}
