use anyhow::{Context, Result};
use arcast::{
    ActivationEngine, CharacterRegistry, SensorSnapshot, Settings, TomlConfigStore,
};
use arcast_core::{ConfigurationStore, DeviceFix, DeviceOrientation, MarkerRole, MediaStore};
use arcast_cv::utils::ImageUtils;
use arcast_cv::{FeatureIndex, Frame, ModelHandle, synthetic};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "arcast")]
#[command(about = "Decide which AR characters are visible in a camera frame, and where")]
#[command(version)]
struct Cli {
    /// Settings file (TOML). Built-in defaults apply when omitted.
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Extract features with OpenCV's ORB instead of the built-in extractor.
    #[cfg(feature = "opencv")]
    #[arg(long, global = true)]
    opencv_orb: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate one frame and print the cycle report as JSON.
    Evaluate(EvaluateArgs),

    /// Count the features in a marker image.
    Index {
        #[arg(long)]
        image: PathBuf,

        #[arg(long, value_enum, default_value_t = RoleArg::Detection)]
        role: RoleArg,
    },

    /// Re-extract every marker and rewrite the cached counts.
    Recalculate {
        #[arg(long)]
        characters: PathBuf,
    },

    /// Print the characters as JSON.
    List {
        #[arg(long)]
        characters: PathBuf,
    },

    /// Add a marker character anchored at the given position.
    Capture(CaptureArgs),

    /// Write a synthetic textured marker image.
    DemoMarker {
        #[arg(long)]
        out: PathBuf,

        /// Side length in pixels.
        #[arg(long, default_value = "400")]
        size: u32,

        /// Texture block size in pixels.
        #[arg(long, default_value = "10")]
        block: u32,

        #[arg(long, default_value = "1")]
        seed: u64,
    },

    /// Print the effective settings as TOML.
    Settings,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RoleArg {
    Detection,
    Positioning,
}

impl From<RoleArg> for MarkerRole {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Detection => MarkerRole::Detection,
            RoleArg::Positioning => MarkerRole::Positioning,
        }
    }
}

#[derive(Debug, Clone, Args)]
struct EvaluateArgs {
    /// Character file (TOML).
    #[arg(long)]
    characters: PathBuf,

    /// Camera frame image.
    #[arg(long)]
    frame: PathBuf,

    #[arg(long, allow_hyphen_values = true)]
    lat: f64,

    #[arg(long, allow_hyphen_values = true)]
    lon: f64,

    /// Device altitude in meters.
    #[arg(long, allow_hyphen_values = true)]
    alt: Option<f64>,

    /// Compass heading of the camera, degrees from north.
    #[arg(long, default_value = "0.0")]
    heading: f64,

    /// ONNX object detection model.
    #[cfg(feature = "opencv")]
    #[arg(long)]
    model: Option<PathBuf>,

    /// Class labels for the model, one per line.
    #[cfg(feature = "opencv")]
    #[arg(long)]
    labels: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct CaptureArgs {
    /// Character file (TOML); created if missing.
    #[arg(long)]
    characters: PathBuf,

    #[arg(long)]
    name: String,

    /// Scanned marker image.
    #[arg(long)]
    image: PathBuf,

    #[arg(long, allow_hyphen_values = true)]
    lat: f64,

    #[arg(long, allow_hyphen_values = true)]
    lon: f64,

    #[arg(long, allow_hyphen_values = true)]
    alt: Option<f64>,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "arcast=info,arcast_cv=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let settings = match &cli.settings {
        Some(path) => Settings::load(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => Settings::default(),
    };
    let index = Arc::new(feature_index(&cli, &settings));

    match cli.command {
        Commands::Evaluate(args) => evaluate(&args, &settings, index),
        Commands::Index { image, role } => {
            let bytes = std::fs::read(&image)
                .with_context(|| format!("Failed to read {}", image.display()))?;
            let role = MarkerRole::from(role);
            let count = match index.extract_feature_count(&bytes, index.config().target_for(role)) {
                Ok(count) => count,
                Err(failure) => {
                    tracing::warn!(%failure, "marker is unusable");
                    0
                }
            };
            println!("{count}");
            Ok(())
        }
        Commands::Recalculate { characters } => {
            let registry = open_registry(&characters, index, false)?;
            let summary = registry.recalculate_all()?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Commands::List { characters } => {
            let store = TomlConfigStore::open(&characters)?;
            let configs = store.list_active_configs()?;
            println!("{}", serde_json::to_string_pretty(&configs)?);
            Ok(())
        }
        Commands::Capture(args) => {
            let registry = open_registry(&args.characters, index, true)?;
            let bytes = std::fs::read(&args.image)
                .with_context(|| format!("Failed to read {}", args.image.display()))?;
            let name = args
                .image
                .file_name()
                .map_or_else(|| "marker.png".to_string(), |n| n.to_string_lossy().to_string());

            let mut fix = DeviceFix::new(args.lat, args.lon);
            fix.altitude = args.alt;
            let committed = registry.capture_marker(args.name, &fix, &name, bytes)?;
            for warning in &committed.warnings {
                tracing::warn!(%warning, "captured marker");
            }
            println!("{}", serde_json::to_string_pretty(&committed.config)?);
            Ok(())
        }
        Commands::DemoMarker {
            out,
            size,
            block,
            seed,
        } => {
            let marker = synthetic::random_blocks(size, size, block, seed);
            ImageUtils::save(&marker, &out)?;
            tracing::info!(path = %out.display(), size, seed, "demo marker written");
            Ok(())
        }
        Commands::Settings => {
            print!("{}", settings.to_toml()?);
            Ok(())
        }
    }
}

#[cfg(feature = "opencv")]
fn feature_index(cli: &Cli, settings: &Settings) -> FeatureIndex {
    if cli.opencv_orb {
        let extractor = Arc::new(arcast_cv::backend::OpenCvOrbExtractor::new(&settings.features));
        return FeatureIndex::with_extractor(extractor, settings.features.clone());
    }
    FeatureIndex::new(settings.features.clone())
}

#[cfg(not(feature = "opencv"))]
fn feature_index(_cli: &Cli, settings: &Settings) -> FeatureIndex {
    FeatureIndex::new(settings.features.clone())
}

fn open_registry(
    characters: &Path,
    index: Arc<FeatureIndex>,
    create: bool,
) -> Result<CharacterRegistry> {
    let store = if create {
        TomlConfigStore::open_or_create(characters)?
    } else {
        TomlConfigStore::open(characters)?
    };
    let store = Arc::new(store);
    let media: Arc<dyn MediaStore> = Arc::new(store.media_store());
    Ok(CharacterRegistry::new(store, media, index))
}

fn evaluate(args: &EvaluateArgs, settings: &Settings, index: Arc<FeatureIndex>) -> Result<()> {
    let store = Arc::new(TomlConfigStore::open(&args.characters)?);
    let media: Arc<dyn MediaStore> = Arc::new(store.media_store());

    for config in store.list_active_configs()? {
        let unindexed = config.marker.enabled
            && config
                .marker
                .detection
                .as_ref()
                .is_some_and(|m| m.content_hash.is_empty());
        if unindexed {
            tracing::warn!(
                character = %config.id,
                "marker was never indexed; run `arcast recalculate` first"
            );
        }
    }

    let bytes = std::fs::read(&args.frame)
        .with_context(|| format!("Failed to read {}", args.frame.display()))?;
    let frame = Frame::decode(&bytes)?;

    let mut fix = DeviceFix::new(args.lat, args.lon);
    fix.altitude = args.alt;
    let snapshot = SensorSnapshot::new(frame, fix, DeviceOrientation::new(args.heading));

    let engine = ActivationEngine::new(settings, store, media, index, object_model(args));
    let report = engine.evaluate(&snapshot)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(feature = "opencv")]
fn object_model(args: &EvaluateArgs) -> ModelHandle {
    use arcast_cv::backend::{OpenCvYoloModel, YoloConfig};
    use arcast_cv::traits::ObjectModel;

    let Some(model_path) = args.model.clone() else {
        return ModelHandle::unavailable("no object model configured");
    };
    let labels_path = args.labels.clone();
    ModelHandle::new("yolo", move || {
        let Some(labels_path) = &labels_path else {
            anyhow::bail!("--labels is required with --model");
        };
        let labels = std::fs::read_to_string(labels_path)?
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();
        let model = OpenCvYoloModel::load(YoloConfig {
            model_path: model_path.clone(),
            labels,
            input_size: 640,
            min_score: 0.1,
        })?;
        Ok(Arc::new(model) as Arc<dyn ObjectModel>)
    })
}

#[cfg(not(feature = "opencv"))]
fn object_model(_args: &EvaluateArgs) -> ModelHandle {
    ModelHandle::unavailable("no object model configured")
}
