//! pheno: drive the phenology pipeline over JSON files.
//!
//!   pheno simulate -o scene.json --zones zones.json
//!   pheno annual scene.json -o stack.json
//!   pheno trend stack.json --metric sos -o sos_trend.json
//!   pheno zonal stack.json zones.json --metrics sos,eos,season_length -o zones_summary.json
//!   pheno zonal stack.json zones.json --trend-rasters sos_trend.json,los_trend.json -o zones_summary.json
//!   pheno index-trend scene.json zones.json --igbp -o index_trend.json

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use pheno_core::config::TrendScope;
use pheno_core::synthetic::SceneBuilder;
use pheno_core::trend::slopes;
use pheno_core::{
    AnnualPhenologyEngine, Grid, Metric, MetricStack, ObservationCube, PipelineConfig, TrendEngine,
    TrendMethod, TrendRaster, ZonalAggregator, ZonalConfig, ZonalSummary, ZoneMap,
};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "pheno")]
#[command(author, version, about = "Land-surface phenology and trend analysis", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Pipeline configuration JSON (defaults apply to missing keys)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a synthetic multi-year observation scene
    Simulate {
        /// Output scene file
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long, default_value = "32")]
        width: usize,
        #[arg(long, default_value = "32")]
        height: usize,
        #[arg(long, default_value = "2010")]
        first_year: i32,
        #[arg(long, default_value = "10")]
        years: usize,
        #[arg(long, default_value = "42")]
        seed: u64,
        /// Standard deviation of additive noise
        #[arg(long, default_value = "0.02")]
        noise: f64,
        /// Probability of a cloud-masked sample
        #[arg(long, default_value = "0.15")]
        clouds: f64,
        /// Also write a striped zone map here
        #[arg(long)]
        zones: Option<PathBuf>,
        /// Class ids for the zone stripes, west to east
        #[arg(long, value_delimiter = ',', default_value = "4,10,12,17")]
        classes: Vec<u16>,
    },
    /// Per-year phenology for every pixel
    Annual {
        /// Scene or cube file with a `cubes` map of year → observation cube
        input: PathBuf,
        /// Output metric stack
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Per-pixel trend of one metric across the stacked years
    Trend {
        /// Metric stack from `annual`
        stack: PathBuf,
        /// Output trend raster
        #[arg(short, long)]
        output: PathBuf,
        /// sos, eos, peak, amplitude, min_value, max_value, season_length
        #[arg(short, long, default_value = "sos", value_parser = parse_metric)]
        metric: Metric,
        /// Override the configured estimator
        #[arg(long)]
        method: Option<MethodArg>,
        /// Write EOS slope minus SOS slope instead of a single metric trend
        #[arg(long)]
        season_length_difference: bool,
    },
    /// Per-class means and zone trends
    Zonal {
        /// Metric stack from `annual`
        stack: PathBuf,
        /// Zone map file
        zones: PathBuf,
        /// Output summary table
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long, value_delimiter = ',', default_value = "sos,eos,season_length", value_parser = parse_metric)]
        metrics: Vec<Metric>,
        /// Skip the per-zone trend columns
        #[arg(long)]
        no_trends: bool,
        /// Trend files from `trend`; their slopes are averaged per class as
        /// `<metric>_trend` columns (`los_trend` for the season-length difference)
        #[arg(long, value_delimiter = ',')]
        trend_rasters: Vec<PathBuf>,
        /// Exclude the IGBP non-vegetation classes and label rows with the IGBP legend
        #[arg(long)]
        igbp: bool,
    },
    /// Per-class trend of the annual mean vegetation index
    IndexTrend {
        /// Scene or cube file with a `cubes` map of year → observation cube
        input: PathBuf,
        /// Zone map file
        zones: PathBuf,
        /// Output summary table
        #[arg(short, long)]
        output: PathBuf,
        /// Override the configured estimator
        #[arg(long)]
        method: Option<MethodArg>,
        /// Exclude the IGBP non-vegetation classes and label rows with the IGBP legend
        #[arg(long)]
        igbp: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum MethodArg {
    Ols,
    MannKendall,
}

impl From<MethodArg> for TrendMethod {
    fn from(m: MethodArg) -> Self {
        match m {
            MethodArg::Ols => TrendMethod::Ols,
            MethodArg::MannKendall => TrendMethod::MannKendall,
        }
    }
}

fn parse_metric(s: &str) -> std::result::Result<Metric, String> {
    Metric::from_name(s).ok_or_else(|| {
        let names: Vec<&str> = Metric::ALL.iter().map(|m| m.name()).collect();
        format!("unknown metric '{s}' (expected one of {})", names.join(", "))
    })
}

// ── File schema ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CubeFile {
    cubes: BTreeMap<i32, ObservationCube>,
}

#[derive(Serialize, Deserialize)]
struct TrendFile {
    metric: String,
    method: TrendMethod,
    years: Vec<i32>,
    #[serde(flatten)]
    output: TrendOutput,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum TrendOutput {
    Raster { raster: TrendRaster },
    Difference { slope_difference: Grid<f64> },
}

impl TrendFile {
    /// Zonal column name and slope grid.
    fn slope_column(self) -> (String, Grid<f64>) {
        match self.output {
            TrendOutput::Raster { raster } => (format!("{}_trend", self.metric), slopes(&raster)),
            TrendOutput::Difference { slope_difference } => ("los_trend".to_string(), slope_difference),
        }
    }
}

#[derive(Serialize)]
struct ZonalFile {
    summary: ZonalSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    trend_slopes: Option<ZonalSummary>,
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("setting default subscriber failed")
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let json = serde_json::to_string(value).context("serializing output")?;
    fs::write(path, json).with_context(|| format!("writing {}", path.display()))
}

fn igbp_zonal(cfg: &ZonalConfig) -> ZonalConfig {
    ZonalConfig {
        min_zone_years: cfg.min_zone_years,
        ..ZonalConfig::igbp_vegetation()
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(p) => {
            let text = fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
            PipelineConfig::from_json_str(&text).with_context(|| format!("loading config {}", p.display()))
        }
        None => Ok(PipelineConfig::default()),
    }
}

// ── Main ─────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;
    let mut cfg = load_config(cli.config.as_deref())?;
    let start = Instant::now();

    match cli.command {
        Commands::Simulate { output, width, height, first_year, years, seed, noise, clouds, zones, classes } => {
            let builder = SceneBuilder::new(width, height)
                .with_seed(seed)
                .with_years(first_year, years)
                .with_noise(noise, clouds);
            let scene = builder.build().context("generating scene")?;
            write_json(&output, &scene)?;
            info!(width, height, years, path = %output.display(), "scene written");
            if let Some(zones_path) = zones {
                let map = builder.zone_map(&classes).context("building zone map")?;
                write_json(&zones_path, &map)?;
                info!(classes = ?classes, path = %zones_path.display(), "zone map written");
            }
        }

        Commands::Annual { input, output } => {
            let file: CubeFile = read_json(&input)?;
            if file.cubes.is_empty() {
                bail!("{} contains no observation cubes", input.display());
            }
            let engine = AnnualPhenologyEngine::from_config(&cfg.phenology).context("invalid phenology config")?;
            let (stack, diag) = engine.process_years(&file.cubes).context("annual phenology failed")?;
            write_json(&output, &stack)?;
            info!(
                years = stack.len(),
                pixels = diag.pixels,
                fitted = diag.fitted,
                unfitted = diag.unfitted(),
                path = %output.display(),
                "metric stack written"
            );
        }

        Commands::Trend { stack, output, metric, method, season_length_difference } => {
            let stack: MetricStack = read_json(&stack)?;
            if let Some(m) = method {
                cfg.trend.method = m.into();
            }
            let engine = TrendEngine::new(cfg.trend.clone(), TrendScope::Pixel)
                .context("invalid trend config")?
                .with_chunk_rows(cfg.phenology.chunk_rows);

            let output_data = if season_length_difference {
                TrendOutput::Difference {
                    slope_difference: engine.season_length_difference(&stack).context("trend failed")?,
                }
            } else {
                TrendOutput::Raster {
                    raster: engine.pixel_trends(&stack.layers(metric)).context("trend failed")?,
                }
            };
            let file = TrendFile {
                metric: if season_length_difference { "season_length_difference".into() } else { metric.to_string() },
                method: cfg.trend.method,
                years: stack.years(),
                output: output_data,
            };
            write_json(&output, &file)?;
            info!(path = %output.display(), "trend written");
        }

        Commands::Zonal { stack, zones, output, metrics, no_trends, trend_rasters, igbp } => {
            let stack: MetricStack = read_json(&stack)?;
            let zones: ZoneMap = read_json(&zones)?;
            if igbp {
                cfg.zonal = igbp_zonal(&cfg.zonal);
            }
            let aggregator = ZonalAggregator::from_config(&cfg.zonal);
            let engine = if no_trends {
                None
            } else {
                Some(TrendEngine::new(cfg.zone_trend(), TrendScope::Zone).context("invalid trend config")?)
            };
            let summary = aggregator
                .summarize_stack(&stack, &metrics, &zones, engine.as_ref())
                .context("zonal aggregation failed")?;

            let trend_slopes = if trend_rasters.is_empty() {
                None
            } else {
                let columns: Vec<(String, Grid<f64>)> = trend_rasters
                    .iter()
                    .map(|p| read_json::<TrendFile>(p).map(TrendFile::slope_column))
                    .collect::<Result<_>>()?;
                let refs: Vec<(&str, &Grid<f64>)> = columns.iter().map(|(n, g)| (n.as_str(), g)).collect();
                Some(aggregator.summarize(&refs, &zones).context("zonal trend-slope aggregation failed")?)
            };
            let classes = summary.len();
            write_json(&output, &ZonalFile { summary, trend_slopes })?;
            info!(classes, path = %output.display(), "zonal summary written");
        }

        Commands::IndexTrend { input, zones, output, method, igbp } => {
            let file: CubeFile = read_json(&input)?;
            let zones: ZoneMap = read_json(&zones)?;
            if igbp {
                cfg.zonal = igbp_zonal(&cfg.zonal);
            }
            if let Some(m) = method {
                cfg.trend.method = m.into();
            }
            let layers: BTreeMap<i32, Grid<f64>> = file
                .cubes
                .iter()
                .map(|(&year, cube)| {
                    cube.annual_mean(cfg.phenology.fill_value, cfg.phenology.value_scale)
                        .map(|g| (year, g))
                        .with_context(|| format!("annual mean for {year}"))
                })
                .collect::<Result<_>>()?;
            let engine = TrendEngine::new(cfg.zone_trend(), TrendScope::Zone).context("invalid trend config")?;
            let summary = ZonalAggregator::from_config(&cfg.zonal)
                .summarize_yearly_grids("mean_index", &layers, &zones, Some(&engine))
                .context("zonal index trend failed")?;
            write_json(&output, &summary)?;
            info!(years = layers.len(), classes = summary.len(), path = %output.display(), "index trends written");
        }
    }

    info!(elapsed_ms = start.elapsed().as_millis() as u64, "done");
    Ok(())
}
