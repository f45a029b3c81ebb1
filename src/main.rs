//! Command-line front end.
//!
//! ```bash
//! court-calib-eval rescore --input predictions.json --metric rms-elementwise --csv frames.csv
//! court-calib-eval config --output eval.yaml
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use court_calib_eval::{EvaluationConfig, ErrorMetric, MetricAggregator, Plane};
use log::info;
use std::path::PathBuf;

/// Evaluate recovered camera calibrations against ground truth
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Re-score a stored result file
    Rescore {
        /// Result file written by an evaluation run
        #[arg(short = 'i', long)]
        input: PathBuf,

        /// Per-frame error metric
        #[arg(short = 'm', long, value_enum, default_value_t = MetricArg::RmsEuclidean)]
        metric: MetricArg,

        /// Height of the horizontal plane reference points are projected on
        #[arg(long, default_value = "0.0", allow_negative_numbers = true)]
        plane_height: f64,

        /// Optional CSV file receiving per-frame errors
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Write the default run configuration
    Config {
        #[arg(short = 'o', long, default_value = "eval.yaml")]
        output: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum MetricArg {
    RmsEuclidean,
    RmsElementwise,
}

impl From<MetricArg> for ErrorMetric {
    fn from(arg: MetricArg) -> Self {
        match arg {
            MetricArg::RmsEuclidean => ErrorMetric::RmsEuclidean,
            MetricArg::RmsElementwise => ErrorMetric::RmsElementwise,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Rescore {
            input,
            metric,
            plane_height,
            csv,
        } => {
            let aggregator = MetricAggregator::new(metric.into(), Plane::Z(plane_height));
            info!("Re-scoring {} on plane {}", input.display(), aggregator.plane);
            let summary = aggregator.run_file(&input)?;
            println!("{summary}");
            if let Some(csv) = csv {
                summary.export_frame_errors_csv(&csv)?;
                info!("Per-frame errors written to {}", csv.display());
            }
        }
        Command::Config { output } => {
            EvaluationConfig::default().save_to_yaml(&output)?;
            info!("Default configuration written to {}", output.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rescore() {
        let cli = Cli::parse_from([
            "court-calib-eval",
            "rescore",
            "--input",
            "predictions.json",
            "--metric",
            "rms-elementwise",
            "--plane-height",
            "-0.5",
        ]);
        match cli.command {
            Command::Rescore {
                metric,
                plane_height,
                csv,
                ..
            } => {
                assert_eq!(ErrorMetric::from(metric), ErrorMetric::RmsElementwise);
                assert_eq!(plane_height, -0.5);
                assert!(csv.is_none());
            }
            Command::Config { .. } => panic!("expected rescore"),
        }
    }

    #[test]
    fn test_parse_config_default_output() {
        let cli = Cli::parse_from(["court-calib-eval", "config"]);
        assert!(matches!(
            cli.command,
            Command::Config { output } if output == PathBuf::from("eval.yaml")
        ));
    }
}
