use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;

use fiducial::detect::detector::FiducialDetector;
use fiducial::detect::image::ImageU8;
use fiducial::detect::pose::CameraIntrinsics;
use fiducial::family::{FamilyId, FamilySet};
use fiducial::render::{render, MarkerPattern};
use fiducial::types::Fiducial;

/// Fiducial marker detection CLI: detect markers in PNG/JPEG images
#[derive(Parser)]
#[command(name = "fiducial-detect", version)]
struct Args {
    /// Input image files (PNG or JPEG)
    #[arg(required_unless_present = "render")]
    images: Vec<String>,

    /// Marker families to detect (comma-separated, or "all")
    #[arg(short, long, default_value = "all")]
    family: String,

    /// TOML file with a [detector] table and [plugins.<family>] tables
    #[arg(short, long)]
    config: Option<String>,

    /// Marker side length in world units (for pose estimation)
    #[arg(long)]
    marker_size: Option<f64>,

    /// Camera focal length x in pixels
    #[arg(long)]
    fx: Option<f64>,

    /// Camera focal length y in pixels
    #[arg(long)]
    fy: Option<f64>,

    /// Camera principal point x in pixels
    #[arg(long)]
    cx: Option<f64>,

    /// Camera principal point y in pixels
    #[arg(long)]
    cy: Option<f64>,

    /// Pretty-print JSON output
    #[arg(long)]
    pretty: bool,

    /// Suppress non-JSON output
    #[arg(short, long)]
    quiet: bool,

    /// Draw a marker instead of detecting: FAMILY:ID OUT.png
    #[arg(long, num_args = 2, value_names = ["FAMILY:ID", "OUT"])]
    render: Option<Vec<String>>,

    /// Marker side in pixels for --render
    #[arg(long, default_value = "400")]
    side: u32,
}

#[derive(Serialize)]
struct OutputResult<'a> {
    file: &'a str,
    image_width: u32,
    image_height: u32,
    fiducials: Vec<Fiducial>,
}

fn load_image(path: &str) -> Result<ImageU8> {
    let img = image::open(path)
        .with_context(|| format!("failed to open image: {path}"))?
        .into_luma8();

    let width = img.width();
    let height = img.height();
    let pixels = img.into_raw();

    ImageU8::from_buf(width, height, width, pixels)
        .with_context(|| format!("unusable image: {path}"))
}

fn build_detector(args: &Args) -> Result<FiducialDetector> {
    let mut detector = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config: {path}"))?;
            FiducialDetector::from_toml_str(&text)
                .with_context(|| format!("invalid config: {path}"))?
        }
        None => FiducialDetector::default(),
    };

    if let Some(size) = args.marker_size {
        detector.config.marker_size = size;
    }
    match (args.fx, args.fy, args.cx, args.cy) {
        (Some(fx), Some(fy), Some(cx), Some(cy)) => {
            detector.config.pose.intrinsics = Some(CameraIntrinsics { fx, fy, cx, cy });
        }
        (None, None, None, None) => {}
        _ => bail!("--fx, --fy, --cx and --cy must be given together"),
    }
    detector.config.validate()?;
    Ok(detector)
}

fn render_marker(detector: &FiducialDetector, spec: &str, out: &str, side: u32) -> Result<()> {
    let (family, id) = spec
        .split_once(':')
        .with_context(|| format!("expected FAMILY:ID, got '{spec}'"))?;
    let family: FamilyId = family.parse()?;
    let id: u32 = id.trim().parse().with_context(|| format!("invalid id '{id}'"))?;

    let registry = detector.registry.snapshot();
    let config = registry
        .config(family)
        .with_context(|| format!("family {family} is not registered"))?;
    let pattern = MarkerPattern::from_config(config, id)
        .with_context(|| format!("{family} has no marker with id {id}"))?;

    let img = render(&pattern, side, side / 8);
    let (w, h) = (img.width, img.height);
    image::GrayImage::from_raw(w, h, img.buf)
        .context("rendered buffer has the wrong size")?
        .save(out)
        .with_context(|| format!("failed to write {out}"))?;
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(if args.quiet {
        "error"
    } else {
        "warn"
    }))
    .init();

    let detector = build_detector(&args)?;

    if let Some(render_args) = &args.render {
        let [spec, out] = render_args.as_slice() else {
            bail!("--render takes FAMILY:ID and an output path");
        };
        render_marker(&detector, spec, out, args.side)?;
        if !args.quiet {
            eprintln!("wrote {spec} to {out}");
        }
        return Ok(());
    }

    let active: FamilySet = args.family.parse()?;

    // Process each image
    for image_path in &args.images {
        let img = load_image(image_path)?;

        if !args.quiet {
            eprintln!("detecting in {} ({}x{})", image_path, img.width, img.height);
        }

        let fiducials = detector.detect(&img, active)?;

        if !args.quiet {
            eprintln!("  found {} markers", fiducials.len());
        }

        let result = OutputResult {
            file: image_path,
            image_width: img.width,
            image_height: img.height,
            fiducials,
        };

        let json = if args.pretty {
            serde_json::to_string_pretty(&result)?
        } else {
            serde_json::to_string(&result)?
        };
        println!("{json}");
    }

    Ok(())
}
