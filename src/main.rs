use anyhow::Context;
use clap::{Parser, Subcommand};
use nmc_check::config::Config;
use nmc_check::driver::{CommandDriver, RegisterCheck};
use nmc_check::llm_extract::VisionTiers;
use nmc_check::server::{self, AppState};
use nmc_check::{Extractor, Pin, report};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nmc_check", about = "Extract NMC PINs and run register checks")]
struct Cli {
    /// TOML config file; defaults apply when it does not exist
    #[arg(long, global = true, default_value = "nmc_check.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Find the PIN in a PDF, image or text file and print the result as JSON
    Extract { file: PathBuf },
    /// Run the configured register check for a PIN
    Check {
        pin: String,
        /// Directory for the register PDF
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
    /// Start the HTTP server
    Serve {
        /// Overrides `[server] addr`
        #[arg(long)]
        addr: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // init tracing
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Command::Extract { file } => {
            let extractor = Extractor::new(cfg.extract, VisionTiers::from_config(&cfg.vision));
            let result = extractor.extract_pin(&file).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if let Some(tier) = result.tier {
                info!(?tier, "Matched");
            }
        }
        Command::Check { pin, out } => {
            let pin: Pin = pin.parse()?;
            let driver = CommandDriver::from_config(&cfg.driver);
            let outcome = driver.check(&pin, &out).await;
            match &outcome.pdf_path {
                Some(pdf) => println!("{}", pdf.display()),
                None => {
                    let path = out.join("NMC-Error-Internal.pdf");
                    let mut lines = vec![format!("NMC PIN: {pin}")];
                    lines.extend(outcome.message.clone());
                    report::write_error_pdf(&path, "NMC check failed", &lines)?;
                    warn!(path = %path.display(), "No register PDF; wrote error report");
                    println!("{}", path.display());
                }
            }
            if !outcome.ok {
                anyhow::bail!(
                    "register check failed: {}",
                    outcome.message.as_deref().unwrap_or("no details")
                );
            }
        }
        Command::Serve { addr } => {
            let addr = addr.unwrap_or_else(|| cfg.server.addr.clone());
            let driver = CommandDriver::from_config(&cfg.driver);
            if !driver.is_configured() {
                warn!("[driver] program not set; every check will return an error report");
            }
            let vision = VisionTiers::from_config(&cfg.vision);
            let state = Arc::new(AppState {
                extractor: Extractor::new(cfg.extract, vision),
                driver: Box::new(driver),
                data_root: cfg.server.data_root,
            });
            server::serve(state, &addr).await?;
        }
    }

    Ok(())
}
