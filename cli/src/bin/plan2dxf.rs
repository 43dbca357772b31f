use clap::{Parser, Subcommand};
use cli::TraceJob;
use color_eyre::eyre::{eyre, Result};
use std::path::PathBuf;
use strum::IntoEnumIterator;
use tracing::{info, warn};
use tracing_subscriber::{self, EnvFilter};
use vectorize::{
    render_preview, CancelToken, Capabilities, DetectionStrategy, DxfExporter, PixelBuffer,
    Pipeline, TraceError,
};

#[derive(Parser)]
#[command(author, version, about = "Trace raster line drawings into DXF", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect primitives in a raster image and write them as DXF
    Trace {
        /// Raster image to trace (overrides the job file)
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// DXF output path (defaults to the input with a .dxf extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Job file (.toml or .json) with detection and export settings
        #[arg(short, long)]
        job: Option<PathBuf>,
        /// Detection strategy
        #[arg(short, long)]
        strategy: Option<DetectionStrategy>,
        /// Drawing units per pixel
        #[arg(long)]
        scale: Option<f64>,
        /// Also save a PNG preview of the detections
        #[arg(long)]
        preview: Option<PathBuf>,
        /// Also save the detection result as JSON
        #[arg(long)]
        json: Option<PathBuf>,
        /// Run every stage on a single thread
        #[arg(long)]
        sequential: bool,
    },
    /// List the available detection strategies
    Strategies,
    /// Print the JSON schema of job files
    Schema,
    /// Write a job file with every setting at its default
    InitConfig {
        /// Destination TOML file
        #[arg(short, long, default_value = "trace.toml")]
        output: PathBuf,
        /// Input image recorded in the job
        #[arg(short, long, default_value = "plan.png")]
        input: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Trace {
            input,
            output,
            job,
            strategy,
            scale,
            preview,
            json,
            sequential,
        } => {
            let mut job = match job {
                Some(path) => TraceJob::from_file(&path)?,
                None => TraceJob::new(""),
            };
            if let Some(input) = input {
                job.input = input.to_string_lossy().into_owned();
            }
            if let Some(output) = output {
                job.output = Some(output.to_string_lossy().into_owned());
            }
            if let Some(strategy) = strategy {
                job.detection.strategy = strategy;
            }
            if let Some(scale) = scale {
                job.export.scale = scale;
            }
            if let Some(preview) = preview {
                job.preview = Some(preview.to_string_lossy().into_owned());
            }
            if let Some(json) = json {
                job.json = Some(json.to_string_lossy().into_owned());
            }
            job.validate()?;

            let capabilities = if sequential {
                Capabilities::sequential()
            } else {
                Capabilities::probe()
            };
            trace(job, capabilities).await?;
        }
        Commands::Strategies => {
            for strategy in DetectionStrategy::iter() {
                println!("{:<16} {}", strategy.to_string(), strategy.description());
            }
        }
        Commands::Schema => {
            println!("{}", serde_json::to_string_pretty(&TraceJob::schema())?);
        }
        Commands::InitConfig { output, input } => {
            TraceJob::new(input).to_toml_file(&output)?;
            info!("Wrote default job to {}", output.display());
        }
    }

    Ok(())
}

async fn trace(job: TraceJob, capabilities: Capabilities) -> Result<()> {
    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current stage");
            on_interrupt.cancel();
        }
    });

    let output = job.output_path();
    info!("Tracing {} -> {}", job.input, output);

    let outcome = tokio::task::spawn_blocking(move || {
        let buffer = PixelBuffer::from_path(&job.input)?;
        let pipeline = Pipeline::new(job.detection.clone(), capabilities);
        info!("{}", pipeline.info());
        let result = pipeline.detect_with_cancel(&buffer, &cancel)?;
        Ok::<_, TraceError>((job, buffer, result))
    })
    .await?;

    let (job, buffer, result) = match outcome {
        Ok(done) => done,
        Err(TraceError::Cancelled { stage }) => {
            return Err(eyre!("Tracing cancelled before the {stage} stage"));
        }
        Err(err) => return Err(err.into()),
    };

    for diagnostic in &result.diagnostics {
        warn!("{} stage skipped: {}", diagnostic.stage, diagnostic.message);
    }
    info!("Detected {}", result.summary());

    if let Some(path) = &job.json {
        result.save_json(path)?;
        info!("Saved detection JSON to {}", path);
    }
    if let Some(path) = &job.preview {
        render_preview(&buffer, &result).save(path)?;
        info!("Saved preview to {}", path);
    }

    DxfExporter::new(job.export.clone()).save(&result, &output)?;
    info!("✅ DXF written to {}", output);
    Ok(())
}
