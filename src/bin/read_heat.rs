//! Offline diagnostic: run a saved frame through the acquisition
//! pipeline once and print what each stage produced.
//!
//! Usage: read_heat [--config <config.json>] [--template <icon.png>]
//!                  [--tesseract <path>] [--show-version] <frame.png>

use std::path::PathBuf;
use std::process::ExitCode;

use heat_overlay::{DigitExtractor, Locator, TemplateStore, TesseractOcr, VisionConfig};

struct Args {
    config: Option<PathBuf>,
    template: Option<PathBuf>,
    tesseract: Option<PathBuf>,
    show_version: bool,
    frame: Option<PathBuf>,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        config: None,
        template: None,
        tesseract: None,
        show_version: false,
        frame: None,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                args.config = Some(PathBuf::from(
                    iter.next().ok_or("--config requires a path")?,
                ))
            }
            "--template" => {
                args.template = Some(PathBuf::from(
                    iter.next().ok_or("--template requires a path")?,
                ))
            }
            "--tesseract" => {
                args.tesseract = Some(PathBuf::from(
                    iter.next().ok_or("--tesseract requires a path")?,
                ))
            }
            "--show-version" => args.show_version = true,
            other if other.starts_with("--") => {
                return Err(format!("unknown option: {other}"));
            }
            other => args.frame = Some(PathBuf::from(other)),
        }
    }
    Ok(args)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "heat_overlay=debug,heat_capture=debug,heat_vision=debug".into()
            }),
        )
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("read_heat: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut config = match &args.config {
        Some(path) => {
            let content = match std::fs::read_to_string(path) {
                Ok(content) => content,
                Err(e) => {
                    eprintln!("Failed to read {}: {e}", path.display());
                    return ExitCode::FAILURE;
                }
            };
            match serde_json::from_str::<VisionConfig>(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Failed to parse {}: {e}", path.display());
                    return ExitCode::FAILURE;
                }
            }
        }
        None => VisionConfig::default(),
    };
    if args.template.is_some() {
        config.template_path = args.template;
    }
    if args.tesseract.is_some() {
        config.tesseract_cmd = args.tesseract;
    }

    if args.show_version {
        return match TesseractOcr::new(config.tesseract_cmd.as_deref(), config.ocr_psm)
            .and_then(|ocr| ocr.version())
        {
            Ok(version) => {
                println!("{version}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{e:#}");
                ExitCode::FAILURE
            }
        };
    }

    let Some(frame_path) = args.frame else {
        eprintln!("read_heat: provide a frame image or use --show-version");
        return ExitCode::FAILURE;
    };
    let frame = match image::open(&frame_path) {
        Ok(img) => img.to_rgb8(),
        Err(e) => {
            eprintln!("Failed to open {}: {e}", frame_path.display());
            return ExitCode::FAILURE;
        }
    };
    println!(
        "Frame: {} ({}x{})",
        frame_path.display(),
        frame.width(),
        frame.height()
    );

    let mut templates = TemplateStore::new();
    let Some(template) = templates.load(config.template_path.as_deref()) else {
        eprintln!("No template available; set template_path or pass --template");
        return ExitCode::FAILURE;
    };

    let gray = image::imageops::grayscale(&frame);
    let mut locator = Locator::new();
    let Some(m) = locator.find(&gray, &template.gray, &config.match_config()) else {
        println!("No match at or above threshold {}", config.match_threshold);
        return ExitCode::SUCCESS;
    };
    println!(
        "Match: ({}, {}) scale {:.2} score {:.3}",
        m.x, m.y, m.scale, m.score
    );

    let Some(rel) = config.ocr_relative_rect else {
        println!("OCR rect not configured; stopping after the match stage");
        return ExitCode::SUCCESS;
    };
    let extractor = match DigitExtractor::new(&config.ocr_config()) {
        Ok(extractor) => extractor,
        Err(e) => {
            eprintln!("{e:#}");
            return ExitCode::FAILURE;
        }
    };
    match extractor.extract(&frame, &m, template.dimensions(), &rel) {
        Some(value) => println!("Heat: {value}"),
        None => println!("Heat: no reading"),
    }
    ExitCode::SUCCESS
}
