use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use tracing::info;

mod config;
mod dashboard;
mod data;
mod ensemble;
mod features;
#[cfg(test)]
mod fixtures;
mod models;
mod report;
mod training;
mod tree;

use config::ForecastConfig;
use dashboard::{Controller, Selection};
use data::SalesDataset;
use ensemble::Ensemble;
use models::{Tunable, WhatIf};

#[derive(Parser)]
#[command(name = "weekly-sales-forecast")]
#[command(about = "Ensemble weekly sales forecasts with what-if analysis", long_about = None)]
struct Cli {
    /// Optional TOML file with dashboard and training settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Sources {
    /// Weekly sales CSV (Store, Date, Holiday_Flag, Temperature, Fuel_Price, CPI, Unemployment, Weekly_Sales)
    #[arg(long, env = "SALES_DATA_CSV")]
    data: PathBuf,
    /// Directory holding manifest.json and the member artifacts
    #[arg(long, env = "SALES_MODELS_DIR")]
    models: PathBuf,
}

#[derive(Args)]
struct SelectionArgs {
    #[arg(long)]
    store: u32,
    /// Week to forecast (YYYY-MM-DD)
    #[arg(long)]
    date: NaiveDate,
    /// Override the holiday flag of the selected week
    #[arg(long)]
    holiday: Option<bool>,
    /// Temperature override in °F
    #[arg(long)]
    temperature: Option<f64>,
    /// Fuel price override in $/gal
    #[arg(long)]
    fuel_price: Option<f64>,
    #[arg(long)]
    cpi: Option<f64>,
    /// Unemployment rate override in percent
    #[arg(long)]
    unemployment: Option<f64>,
}

impl SelectionArgs {
    fn to_selection(&self) -> Selection {
        Selection {
            store_id: self.store,
            date: self.date,
            what_if: WhatIf {
                holiday_flag: self.holiday,
                temperature: self.temperature,
                fuel_price: self.fuel_price,
                cpi: self.cpi,
                unemployment: self.unemployment,
            },
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Fit the three ensemble members and write their artifacts
    Train {
        #[command(flatten)]
        sources: Sources,
        /// Trailing weeks per store held out for scoring
        #[arg(long)]
        holdout_weeks: Option<usize>,
    },
    /// Print the ensemble prediction for one store-week
    Predict {
        #[command(flatten)]
        sources: Sources,
        #[command(flatten)]
        selection: SelectionArgs,
        #[arg(long)]
        json: bool,
    },
    /// Render KPIs, the recent trend and sensitivity curves
    Dashboard {
        #[command(flatten)]
        sources: Sources,
        #[command(flatten)]
        selection: SelectionArgs,
        #[arg(long, default_value = "dashboard.md")]
        out: PathBuf,
        /// Write JSON instead of Markdown
        #[arg(long)]
        json: bool,
    },
    /// Print the full sensitivity curve for one input
    Sensitivity {
        #[command(flatten)]
        sources: Sources,
        #[command(flatten)]
        selection: SelectionArgs,
        #[arg(long, value_enum)]
        feature: Tunable,
    },
}

fn load_sources(sources: &Sources) -> anyhow::Result<(SalesDataset, Ensemble)> {
    let dataset = SalesDataset::load_csv(&sources.data)?;
    let ensemble = Ensemble::load(&sources.models)
        .with_context(|| format!("refusing to serve predictions from {}", sources.models.display()))?;
    Ok((dataset, ensemble))
}

fn write_output(path: &Path, contents: &str) -> anyhow::Result<()> {
    std::fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "weekly_sales_forecast=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ForecastConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Train {
            sources,
            holdout_weeks,
        } => {
            let dataset = SalesDataset::load_csv(&sources.data)?;
            let mut settings = config.training.clone();
            if let Some(weeks) = holdout_weeks {
                settings.holdout_weeks = weeks;
            }

            let outcome = training::train(&dataset, &settings)?;
            ensemble::save_artifacts(&sources.models, &outcome.artifacts)?;

            println!(
                "Trained {} members on {} weeks ({} held out).",
                outcome.artifacts.len(),
                outcome.train_rows,
                outcome.holdout_rows
            );
            for score in &outcome.holdout {
                println!(
                    "- {}: RMSE {} MAE {} R² {:.3}",
                    score.model,
                    report::format_currency(score.metrics.rmse),
                    report::format_currency(score.metrics.mae),
                    score.metrics.r2
                );
            }
            println!("Artifacts written to {}.", sources.models.display());
        }
        Commands::Predict {
            sources,
            selection,
            json,
        } => {
            let (dataset, ensemble) = load_sources(&sources)?;
            let controller = Controller::new(&dataset, &ensemble, &config.dashboard);
            let prediction = controller.predict(&selection.to_selection())?;

            if json {
                println!("{}", serde_json::to_string_pretty(&prediction)?);
                return Ok(());
            }

            println!(
                "Store {} week of {}: {}",
                selection.store,
                selection.date,
                report::format_currency(prediction.value)
            );
            for member in &prediction.members {
                println!("- {}: {}", member.model, report::format_currency(member.value));
            }
        }
        Commands::Dashboard {
            sources,
            selection,
            out,
            json,
        } => {
            let (dataset, ensemble) = load_sources(&sources)?;
            let controller = Controller::new(&dataset, &ensemble, &config.dashboard);
            let dashboard = controller.render(&selection.to_selection())?;

            let contents = if json {
                serde_json::to_string_pretty(&dashboard)?
            } else {
                report::build_report(&dashboard)
            };
            write_output(&out, &contents)?;
            info!(render_id = %dashboard.render_id, out = %out.display(), "dashboard written");
            println!("Dashboard written to {}.", out.display());
        }
        Commands::Sensitivity {
            sources,
            selection,
            feature,
        } => {
            let (dataset, ensemble) = load_sources(&sources)?;
            let controller = Controller::new(&dataset, &ensemble, &config.dashboard);
            let record = controller.resolve(&selection.to_selection())?;
            let curve = controller.sensitivity(&record, feature)?;

            let ys: Vec<f64> = curve.points.iter().map(|p| p.y).collect();
            let nearest = curve
                .points
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| {
                    let x = curve.operating_point.x;
                    (a.x - x).abs().total_cmp(&(b.x - x).abs())
                })
                .map(|(index, _)| index);

            println!("{}", report::sparkline(&ys));
            for (index, point) in curve.points.iter().enumerate() {
                let marker = if Some(index) == nearest { "  <- current" } else { "" };
                println!("{:.3}\t{}{}", point.x, report::format_currency(point.y), marker);
            }
            println!(
                "Current {}: {:.3} -> {}",
                feature.label(),
                curve.operating_point.x,
                report::format_currency(curve.operating_point.y)
            );
        }
    }

    Ok(())
}
