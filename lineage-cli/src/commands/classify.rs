use clap::Args;

use lineage_core::risk::{RiskClassifier, ThresholdClassifier};

use super::ConfigArgs;

#[derive(Args, Debug)]
pub struct ClassifyArgs {
    /// Likelihood score, 1-5
    pub likelihood: u8,

    /// Severity score, 1-5
    pub severity: u8,

    /// Output format: text or json
    #[arg(long, default_value = "text")]
    pub format: String,

    #[command(flatten)]
    pub config: ConfigArgs,
}

pub fn run(args: &ClassifyArgs) -> anyhow::Result<()> {
    let classifier = ThresholdClassifier::new(args.config.load()?);
    let c = classifier.classify(args.likelihood, args.severity)?;

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&c)?),
        _ => println!(
            "Score {} (likelihood {} x severity {}): {} risk, control as {}",
            c.score, c.likelihood, c.severity, c.level, c.strategy
        ),
    }
    Ok(())
}
