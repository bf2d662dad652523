//! Example driver for the conversion facade: `<html-path> [<pdf-path> [<browser-path>]]`.
//!
//! Non-core per the design brief: a thin demonstration of [`facade::convert`],
//! not a subject of the pool's documented invariants.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use html2pdf::error::AppError;
use html2pdf::pdf_options::PdfOptions;
use html2pdf::{config, facade, singleton};

#[derive(Parser)]
#[command(name = "html2pdf", about = "Convert an HTML file to PDF via a headless browser")]
struct Args {
    /// Path to the source HTML file.
    html_path: PathBuf,

    /// Path to write the rendered PDF to.
    #[arg(default_value = "output.pdf")]
    pdf_path: PathBuf,

    /// Explicit path to the browser executable, overriding auto-discovery.
    browser_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            e.print_json_stderr();
            ExitCode::from(e.code as u8)
        }
    }
}

async fn run(args: Args) -> Result<(), AppError> {
    let (config_path, config_file) = config::load_config(None);
    let resolved = config::resolve_config(&config_file, config_path);
    let pool_config = resolved
        .build_pool_config(args.browser_path.as_deref())
        .map_err(AppError::from)?;

    let pool = singleton::shared_pool(pool_config).await;

    let html = std::fs::read_to_string(&args.html_path).map_err(|e| {
        AppError::with_source(
            format!("failed to read {}", args.html_path.display()),
            html2pdf::error::ExitCode::GeneralError,
            e,
        )
    })?;

    facade::convert(&pool, &html, &args.pdf_path, &PdfOptions::default()).await
}
