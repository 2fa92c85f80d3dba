use clap::Parser;
use route_risk::core::report::export_report;
use route_risk::utils::error::{ErrorSeverity, RiskError};
use route_risk::utils::{logger, validation::Validate};
use route_risk::{
    CliConfig, CycleSnapshot, EngineConfig, JsonFileSource, LocalStorage, ScoringMode,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = CliConfig::parse();

    // 初始化日誌
    if cli.json_logs {
        logger::init_json_logger();
    } else {
        logger::init_cli_logger(cli.verbose);
    }

    tracing::info!("Starting route-risk CLI");
    if cli.verbose {
        tracing::debug!("CLI config: {:?}", cli);
    }

    if let Err(e) = cli.validate() {
        fail(&e);
    }

    match run(&cli).await {
        Ok(snapshot) => {
            tracing::info!("✅ Cycle {} completed", snapshot.cycle_id);
        }
        Err(e) => fail(&e),
    }

    Ok(())
}

async fn run(cli: &CliConfig) -> route_risk::Result<Arc<CycleSnapshot>> {
    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!("📁 Loading configuration from: {}", path);
            EngineConfig::from_file(path)?
        }
        None => EngineConfig::default(),
    };

    // 命令列覆蓋設定
    if let Some(mode) = cli.mode {
        config.fusion.mode = Some(mode);
    }
    if let Some(output) = &cli.output {
        config.output.path = Some(output.clone());
    }
    if let Some(model_path) = &cli.model_path {
        config.model.artifact_path = Some(model_path.clone());
    }
    if let Some(alert) = cli.alert_threshold {
        config.thresholds.alert = Some(alert);
    }
    config.validate()?;

    let workspace = LocalStorage::new(".");
    let models = Arc::new(config.build_model_manager());
    if config.scoring_mode() == ScoringMode::Ensemble {
        if let Some(model) = models
            .load_or_degrade(&workspace, config.artifact_path())
            .await?
        {
            tracing::info!("📦 Using ensemble model {}", model.model_id);
        }
    }

    let engine = config.build_engine(models)?;
    let source = JsonFileSource::new(workspace, cli.observations.clone());
    let snapshot = engine.run_cycle(&source).await?;

    print_summary(&snapshot, cli.top, config.alert_threshold());

    if cli.dry_run {
        tracing::info!("🔍 Dry run, reports not written");
    } else {
        let storage = LocalStorage::new(config.output_path());
        let written = export_report(&storage, &snapshot, &config.report_formats()?).await?;
        for path in written {
            println!("📁 Report saved to: {}/{}", config.output_path(), path);
        }
    }

    Ok(snapshot)
}

fn print_summary(snapshot: &CycleSnapshot, top: usize, alert_threshold: f64) {
    println!(
        "📊 Cycle {} ({} scoring{})",
        snapshot.cycle_id,
        snapshot.model_provenance.as_str(),
        snapshot
            .model_id
            .as_deref()
            .map(|id| format!(", model {}", id))
            .unwrap_or_default()
    );

    for assessment in snapshot.top_n(top) {
        let delay = snapshot
            .prediction(&assessment.route_id)
            .map(|p| format!("{:.1}h (confidence {:.2})", p.predicted_delay_hours, p.confidence))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<24} {:>6.3} {:<6} delay {}",
            assessment.route_id,
            assessment.total_risk,
            assessment.risk_level.as_str(),
            delay
        );
    }

    for alert in snapshot.alerts(alert_threshold) {
        println!("🚨 {} at risk {:.3}", alert.route_id, alert.total_risk);
    }
    for failure in snapshot.failures() {
        println!("❌ {}: {}", failure.route_id, failure.reason);
    }
    for warning in &snapshot.warnings {
        println!("⚠️ {}", warning);
    }
    if let Some(importance) = &snapshot.feature_importance {
        for feature in importance.iter().take(5) {
            println!("🔎 {:<24} {:.3}", feature.feature, feature.importance);
        }
    }
}

fn fail(e: &RiskError) -> ! {
    tracing::error!(
        "❌ Run failed: {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 Suggestion: {}", e.recovery_suggestion());

    let exit_code = match e.severity() {
        ErrorSeverity::Low => 0,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::High => 1,
        ErrorSeverity::Critical => 3,
    };
    std::process::exit(exit_code);
}
