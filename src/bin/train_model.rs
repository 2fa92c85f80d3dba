use clap::Parser;
use route_risk::core::synthetic::generate_training_set;
use route_risk::domain::model::TrainingSample;
use route_risk::domain::ports::Storage;
use route_risk::utils::error::ErrorSeverity;
use route_risk::utils::{logger, validation::Validate};
use route_risk::{EngineConfig, LocalStorage};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "train-model")]
#[command(about = "Train the ensemble risk model and save the artifact")]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// JSON file with labelled samples; synthetic data is used when omitted
    #[arg(long)]
    samples: Option<String>,

    /// Number of synthetic samples to generate
    #[arg(long, default_value = "1000")]
    synthetic: usize,

    /// Override the artifact path from config
    #[arg(long)]
    output: Option<String>,

    /// Override the retrain timeout (seconds)
    #[arg(long)]
    timeout: Option<u64>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    logger::init_cli_logger(args.verbose);
    tracing::info!("🚀 Starting model training");

    if let Err(e) = train(&args).await {
        tracing::error!("❌ Training failed: {} (Severity: {:?})", e, e.severity());
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

    Ok(())
}

async fn train(args: &Args) -> route_risk::Result<()> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    if let Some(output) = &args.output {
        config.model.artifact_path = Some(output.clone());
    }
    config.validate()?;

    let storage = LocalStorage::new(".");
    let samples: Vec<TrainingSample> = match &args.samples {
        Some(path) => {
            tracing::info!("📥 Loading labelled samples from {}", path);
            serde_json::from_slice(&storage.read_file(path).await?)?
        }
        None => {
            let seed = config.training_config().seed;
            tracing::info!("🧪 Generating {} synthetic samples (seed {})", args.synthetic, seed);
            generate_training_set(args.synthetic, seed)
        }
    };

    let timeout = args
        .timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.retrain_timeout());

    let manager = config.build_model_manager();
    let report = manager.retrain(samples, timeout).await?;
    manager.save(&storage, config.artifact_path()).await?;

    println!("✅ Model {} trained", report.model_id);
    println!(
        "   samples: {} train / {} validation",
        report.training_samples, report.validation_samples
    );
    println!(
        "   R²: train {:.3}, validation {:.3}",
        report.train_r2, report.validation_r2
    );
    for feature in report.feature_importance.iter().take(5) {
        println!("   {:<24} {:.3}", feature.feature, feature.importance);
    }
    println!("📁 Artifact saved to: {}", config.artifact_path());
    Ok(())
}
