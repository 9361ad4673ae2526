//! SkyWell CLI - personalized UV and pollen risk alerts from forecast grids

#![deny(warnings)]

// Global invariants enforced:
// - Deterministic output ordering
// - Identical input yields byte-for-byte identical output
// - Logs go to stderr; stdout carries only results

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;
use skywell_core::alert_log::{read_alert_log, write_alert_log};
use skywell_core::{config, dataset_io};
use skywell_core::{
    Alert, AlertReport, CoverageReport, GridDataset, HarmonizedGridSet, LayerQuality,
    ProfilePreset, ResolvedConfig, RiskEngine, UserProfile, Variable,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "skywell")]
#[command(about = "Harmonize UV and pollen forecast grids into personalized risk alerts")]
#[command(version = env!("SKYWELL_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one forecast cycle and print alerts
    Score {
        /// Grid snapshot file or directory of *.json snapshots
        #[arg(long)]
        grids: PathBuf,

        /// Profile file or directory of *.json profile records
        #[arg(long)]
        profiles: Option<PathBuf>,

        /// Built-in profile preset (repeatable)
        #[arg(long = "preset", value_parser = parse_preset)]
        presets: Vec<ProfilePreset>,

        /// First forecast day, YYYY-MM-DD (default: earliest day in the grids)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Only report the grid cell containing this latitude
        #[arg(long, requires = "lon", allow_hyphen_values = true)]
        lat: Option<f64>,

        /// Only report the grid cell containing this longitude
        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lon: Option<f64>,

        /// Append emitted alerts to the alert history
        #[arg(long)]
        record: bool,

        /// Output format
        #[arg(long, default_value = "text")]
        format: OutputFormat,

        /// Path to config file (default: auto-discover)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Show recorded alert history
    History {
        /// Only show alerts for this profile
        #[arg(long)]
        profile: Option<String>,

        /// Output format
        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },
    /// List built-in profile presets
    Presets,
    /// Validate a configuration file
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate a config file without running a cycle
    Validate {
        /// Path to config file (default: auto-discover from current directory)
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Show the resolved configuration (merged defaults + config file)
    Show {
        /// Path to config file (default: auto-discover from current directory)
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn parse_preset(name: &str) -> Result<ProfilePreset, String> {
    ProfilePreset::parse(name).ok_or_else(|| {
        let known: Vec<&str> = ProfilePreset::ALL.iter().map(|p| p.as_str()).collect();
        format!("unknown preset '{}' (expected one of: {})", name, known.join(", "))
    })
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "skywell=info,skywell_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Score {
            grids,
            profiles,
            presets,
            date,
            lat,
            lon,
            record,
            format,
            config: config_path,
        } => {
            let cwd = std::env::current_dir()?;
            let resolved = config::load_and_resolve(&cwd, config_path.as_deref())
                .context("failed to load configuration")?;

            let sources = dataset_io::load_datasets(&grids)?;
            let profiles = collect_profiles(profiles.as_deref(), &presets)?;

            let start = match date {
                Some(d) => d,
                None => earliest_day(&sources)?,
            };

            let engine = RiskEngine::new(&resolved);
            let target = engine
                .forecast_target(start)
                .context("failed to build target grid")?;
            let cycle = engine
                .run_cycle(&sources, &target, &profiles)
                .context("forecast cycle failed")?;

            let location = match (lat, lon) {
                (Some(lat), Some(lon)) => Some(target.locate(lat, lon).with_context(|| {
                    format!(
                        "location ({}, {}) is outside the target extent {}",
                        lat,
                        lon,
                        target.extent()
                    )
                })?),
                _ => None,
            };

            let reports: Vec<AlertReport> = cycle
                .assessments
                .iter()
                .map(|a| restrict_report(&a.report, location))
                .collect();

            match format {
                OutputFormat::Text => print_score_text(&cycle.grid, &reports),
                OutputFormat::Json => print_score_json(&cycle.grid, &reports)?,
            }

            if record {
                let emitted: Vec<Alert> = reports
                    .iter()
                    .flat_map(|r| r.alerts.iter().cloned())
                    .collect();
                record_alerts(&cwd, &emitted, &resolved)?;
            }
        }
        Commands::History { profile, format } => {
            let cwd = std::env::current_dir()?;
            let log = read_alert_log(&cwd);
            let alerts: Vec<&Alert> = log
                .alerts
                .iter()
                .filter(|a| profile.as_deref().map_or(true, |id| a.profile_id == id))
                .collect();
            match format {
                OutputFormat::Text => {
                    if alerts.is_empty() {
                        println!("No recorded alerts.");
                    }
                    for alert in alerts {
                        println!("{}  {}", alert.profile_id, format_alert_line(alert));
                    }
                }
                OutputFormat::Json => {
                    let json = serde_json::to_string_pretty(&alerts)
                        .context("failed to serialize alert history")?;
                    println!("{}", json);
                }
            }
        }
        Commands::Presets => {
            for preset in ProfilePreset::ALL {
                let profile = preset.build(preset.as_str())?;
                let weights: Vec<String> = profile
                    .weights()
                    .iter()
                    .map(|(v, w)| format!("{}={}", v, w))
                    .collect();
                println!(
                    "{:<28} threshold {}  weights {}",
                    preset.as_str(),
                    profile.alert_threshold(),
                    weights.join(", ")
                );
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Validate { path } => {
                let cwd = std::env::current_dir()?;
                match config::load_and_resolve(&cwd, path.as_deref()) {
                    Ok(config) => {
                        if let Some(ref p) = config.config_path {
                            println!("Config valid: {}", p.display());
                        } else {
                            println!("No config file found. Using defaults.");
                        }
                    }
                    Err(e) => {
                        eprintln!("Config validation failed: {:#}", e);
                        std::process::exit(1);
                    }
                }
            }
            ConfigAction::Show { path } => {
                let cwd = std::env::current_dir()?;
                let resolved = config::load_and_resolve(&cwd, path.as_deref())
                    .context("failed to load configuration")?;
                print_config(&resolved);
            }
        },
    }

    Ok(())
}

fn collect_profiles(path: Option<&Path>, presets: &[ProfilePreset]) -> anyhow::Result<Vec<UserProfile>> {
    let mut profiles = match path {
        Some(path) => dataset_io::load_profiles(path)?,
        None => Vec::new(),
    };
    for preset in presets {
        profiles.push(preset.build(preset.as_str())?);
    }
    if profiles.is_empty() {
        anyhow::bail!("no profiles given (use --profiles or --preset)");
    }
    Ok(profiles)
}

fn earliest_day(sources: &[GridDataset]) -> anyhow::Result<NaiveDate> {
    sources
        .iter()
        .filter_map(|s| s.time_axis().first())
        .min()
        .map(|t| t.date_naive())
        .context("grid snapshots have no timestamps")
}

/// Keep only alerts for the located cell; coverage is left whole-grid
fn restrict_report(report: &AlertReport, location: Option<(usize, usize)>) -> AlertReport {
    match location {
        None => report.clone(),
        Some((lat, lon)) => AlertReport {
            profile_id: report.profile_id.clone(),
            alerts: report.at_cell(lat, lon).cloned().collect(),
            coverage: report.coverage.clone(),
        },
    }
}

fn record_alerts(root: &Path, alerts: &[Alert], config: &ResolvedConfig) -> anyhow::Result<()> {
    let mut log = read_alert_log(root);
    let superseded = log.record(alerts, config.alert_history_limit);
    write_alert_log(root, &log)?;
    tracing::info!(
        recorded = alerts.len(),
        superseded,
        kept = log.alerts.len(),
        "alert history updated"
    );
    Ok(())
}

fn format_reading(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.1}", v))
}

fn format_alert_line(alert: &Alert) -> String {
    format!(
        "{}  ({:.3}, {:.3})  {:>4.1} {:<8}  uv {:>4}  pollen {:>5}  {}",
        alert.timestamp.format("%Y-%m-%d %H:%M"),
        alert.latitude,
        alert.longitude,
        alert.risk_score,
        alert.severity.as_str(),
        format_reading(alert.uv_value),
        format_reading(alert.pollen_value),
        alert.message
    )
}

fn describe_quality(quality: &LayerQuality) -> String {
    let mut flags = Vec::new();
    if quality.coarse_source {
        flags.push("coarse source".to_string());
    }
    if quality.partial {
        let missing: Vec<&str> = quality.missing_components.iter().map(|v| v.as_str()).collect();
        if missing.is_empty() {
            flags.push("partial".to_string());
        } else {
            flags.push(format!("partial (missing {})", missing.join(", ")));
        }
    }
    if !quality.gap_timestamps.is_empty() {
        flags.push(format!("{} unreachable timestamp(s)", quality.gap_timestamps.len()));
    }
    if flags.is_empty() {
        "ok".to_string()
    } else {
        flags.join("; ")
    }
}

fn print_coverage(coverage: &CoverageReport) {
    println!(
        "  cells: {} scored / {} total, {} without data, {} below threshold{}",
        coverage.scored_cells,
        coverage.total_cells,
        coverage.no_data_cells.len(),
        coverage.below_threshold,
        coverage
            .highest_below_threshold
            .map(|h| format!(" (highest {:.1})", h))
            .unwrap_or_default()
    );
}

fn print_score_text(grid: &HarmonizedGridSet, reports: &[AlertReport]) {
    println!("Harmonized variables:");
    for variable in grid.variables() {
        if let Some(layer) = grid.layer(variable) {
            println!("  {:<16} {}", variable.as_str(), describe_quality(layer.quality()));
        }
    }
    for issue in grid.issues() {
        println!("  issue: {}", issue);
    }

    for report in reports {
        println!();
        println!("Profile {}: {}", report.profile_id, report.status_line());
        print_coverage(&report.coverage);
        for alert in &report.alerts {
            println!("  {}", format_alert_line(alert));
        }
    }
}

#[derive(Serialize)]
struct LayerSummary<'a> {
    variable: Variable,
    quality: &'a LayerQuality,
}

#[derive(Serialize)]
struct ScoreOutput<'a> {
    variables: Vec<LayerSummary<'a>>,
    issues: Vec<String>,
    profiles: &'a [AlertReport],
}

fn print_score_json(grid: &HarmonizedGridSet, reports: &[AlertReport]) -> anyhow::Result<()> {
    let output = ScoreOutput {
        variables: grid
            .variables()
            .filter_map(|variable| {
                grid.layer(variable).map(|layer| LayerSummary {
                    variable,
                    quality: layer.quality(),
                })
            })
            .collect(),
        issues: grid.issues().iter().map(|e| e.to_string()).collect(),
        profiles: reports,
    };
    let json = serde_json::to_string_pretty(&output).context("failed to serialize results")?;
    println!("{}", json);
    Ok(())
}

fn print_config(resolved: &ResolvedConfig) {
    println!("Configuration:");
    if let Some(ref p) = resolved.config_path {
        println!("  Source: {}", p.display());
    } else {
        println!("  Source: defaults (no config file found)");
    }
    println!();
    println!("Target grid:");
    println!("  extent: {}", resolved.target_extent);
    println!("  resolution: {}°", resolved.target_resolution);
    println!("  forecast_days: {}", resolved.forecast_days);
    println!("  time_step_hours: {}", resolved.time_step_hours);
    println!();
    println!("Normalization maxima:");
    for variable in Variable::ALL {
        let max = resolved
            .default_maxima
            .get(&variable)
            .copied()
            .unwrap_or_else(|| variable.default_max());
        println!("  {:<16} {} {}", variable.as_str(), max, variable.unit());
    }
    println!();
    let species: Vec<&str> = resolved.pollen_species.iter().map(|v| v.as_str()).collect();
    println!("Total pollen species: {}", species.join(", "));
    println!();
    println!("Severity:");
    println!("  moderate: {}", resolved.severity.moderate);
    println!("  high: {}", resolved.severity.high);
    println!();
    println!("Alert history limit: {}", resolved.alert_history_limit);
}
