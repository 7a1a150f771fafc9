use anyhow::{bail, Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::info;

use reelcount::cli::{Args, Command};
use reelcount::config::Config;
use reelcount::service::ViewCounter;
use reelcount::store;
use reelcount::{api, logging};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let Some(command) = &args.command else {
        eprintln!("\x1b[33m⚠️  No command specified.\x1b[0m\n");
        eprintln!("\x1b[1mQuick Start:\x1b[0m");
        eprintln!("  \x1b[32mreelcount serve\x1b[0m          Start the view counter API");
        eprintln!("  \x1b[32mreelcount views movie 550\x1b[0m Show views for one item");
        eprintln!("  \x1b[32mreelcount top\x1b[0m            Show the most viewed items");
        eprintln!("  \x1b[32mreelcount import FILE\x1b[0m    Merge a legacy views.txt\n");
        std::process::exit(1);
    };

    let mut config = logging::with_startup_logging(|| match &args.config {
        Some(path) => Config::load_from_file(path),
        None => Config::load(),
    })?;
    args.apply_overrides(&mut config);

    logging::init(&config.logging)?;

    let path = config.storage.resolved_path();
    let backend = config.storage.backend;
    let opened = tokio::task::spawn_blocking({
        let path = path.clone();
        move || store::open(backend, &path)
    })
    .await?
    .with_context(|| format!("Failed to open {} store at {}", backend, path.display()))?;
    info!("Using {} store at {}", backend, path.display());

    let counter =
        ViewCounter::new(Arc::from(opened)).with_leaderboard_limit(config.leaderboard.limit);

    match command {
        Command::Serve { .. } => {
            eprintln!("\x1b[35m🎬 reelcount view counter\x1b[0m");
            eprintln!("\x1b[36m━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\x1b[0m\n");
            api::start_server(counter, &config.server.host, config.server.port).await?;
        }
        Command::Views { content_type, id } => {
            let views = counter
                .get_views(content_type, id)
                .context("Invalid type or ID")?;
            println!("{}", views);
        }
        Command::Top => {
            let top = counter.top_viewed();
            println!("{}", serde_json::to_string_pretty(&top)?);
        }
        Command::Import { file } => {
            let contents = std::fs::read_to_string(file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let Some(table) = store::parse_table(&contents) else {
                bail!("{} is not a JSON view table", file.display());
            };
            if backend == store::Backend::Json && same_file(file, &path) {
                bail!("Refusing to import {} into itself", file.display());
            }

            let report = counter.import(&table)?;
            eprintln!(
                "\x1b[32m✓\x1b[0m Imported {} entries ({} views)",
                report.imported, report.total_views
            );
            for key in &report.skipped {
                eprintln!("\x1b[33m  • skipped:\x1b[0m {}", key);
            }
        }
    }

    Ok(())
}

fn same_file(a: &std::path::Path, b: &std::path::Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
