//! Command-line front end for the cart automation library.
//!
//! Run with the `cli` feature (enabled by default):
//!
//! ```bash
//! cartbot --config settings.json add groceries.json
//! cartbot --transport browser --headed list
//! cartbot search "whole milk"
//! cartbot clear
//! ```

use anyhow::{Context, Result};
use cartbot::{
    ApiBackend, BrowserBackend, CancelToken, CartBackend, DesiredItem, FulfillmentMode, HttpGql,
    LaunchOptions, OperationOutcome, Orchestrator, OutcomeStatus, Progress, StoreConfig,
};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cartbot", about = "Grocery cart automation for the Woodman's storefront", version)]
struct Cli {
    /// Path to the JSON settings file.
    #[arg(long, default_value = "settings.json")]
    config: PathBuf,

    /// Transport strategy.
    #[arg(long, value_enum, default_value_t = Transport::Fast)]
    transport: Transport,

    /// Fulfillment mode override; defaults to the configured mode.
    #[arg(long, value_enum)]
    mode: Option<Mode>,

    /// Run the browser visibly (browser transport only).
    #[arg(long)]
    headed: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum Transport {
    /// Direct GraphQL calls with persisted-query hashes.
    Fast,
    /// Headless Chrome clicking through the storefront.
    Browser,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Instore,
    Pickup,
}

impl From<Mode> for FulfillmentMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Instore => FulfillmentMode::Instore,
            Mode::Pickup => FulfillmentMode::Pickup,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Add items from a JSON file to the cart.
    Add {
        /// JSON array of items: [{"item": "Milk", "productName": "whole milk", "quantity": 2}]
        items: PathBuf,
    },
    /// Print the current cart contents.
    List,
    /// Remove everything from the cart.
    Clear,
    /// Search the catalog and print the top hits.
    Search { query: String },
}

/// Progress sink that prints to stdout, like the desktop app's log pane.
struct ConsoleProgress;

impl Progress for ConsoleProgress {
    fn log(&mut self, message: &str) {
        println!("{message}");
    }

    fn item_done(&mut self, outcome: &OperationOutcome) {
        let marker = match outcome.status {
            OutcomeStatus::Added => "ok",
            OutcomeStatus::Failed => "FAIL",
            OutcomeStatus::Skipped => "skip",
        };
        match &outcome.reason {
            Some(reason) => println!("  [{marker}] {} ({reason})", outcome.label),
            None => println!("  [{marker}] {}", outcome.label),
        }
    }
}

fn build_backend(cli: &Cli, config: StoreConfig) -> Result<Box<dyn CartBackend>> {
    Ok(match cli.transport {
        Transport::Fast => {
            let transport = HttpGql::new(&config)?;
            Box::new(ApiBackend::with_transport(transport, config))
        }
        Transport::Browser => {
            let launch = LaunchOptions::new().headless(!cli.headed);
            Box::new(BrowserBackend::new(config).with_launch_options(launch))
        }
    })
}

fn load_items(path: &PathBuf) -> Result<Vec<DesiredItem>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading items file {}", path.display()))?;
    let mut items: Vec<DesiredItem> =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    for (index, item) in items.iter_mut().enumerate() {
        if item.id == 0 {
            item.id = index as u64 + 1;
        }
    }
    Ok(items)
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = StoreConfig::load(&cli.config)
        .with_context(|| format!("loading config {}", cli.config.display()))?;
    let mode = cli.mode.map(FulfillmentMode::from).unwrap_or(config.shopping_mode);

    let mut backend = build_backend(&cli, config)?;
    let mut orchestrator = Orchestrator::new(backend.as_mut());
    let mut progress = ConsoleProgress;

    match &cli.command {
        Command::Add { items } => {
            let items = load_items(items)?;
            if items.is_empty() {
                println!("Nothing to add.");
                return Ok(());
            }
            let summary =
                orchestrator.run_add(&items, mode, &CancelToken::new(), &mut progress)?;

            println!();
            println!(
                "Done: {} added, {} failed, {} skipped{}",
                summary.added,
                summary.failed,
                summary.skipped,
                if summary.stopped { " (stopped)" } else { "" },
            );
            if let Some(cart) = &summary.cart {
                println!("Cart now holds {} item(s):", cart.len());
                for line in cart {
                    print_line_item(line);
                }
            }
            if let Some(reason) = &summary.reconcile_error {
                println!("Could not verify cart contents: {reason}");
            }
            if summary.failed > 0 {
                std::process::exit(1);
            }
        }
        Command::List => {
            let cart = orchestrator.fetch_cart(mode, &mut progress)?;
            if cart.is_empty() {
                println!("Cart is empty.");
            } else {
                for line in &cart {
                    print_line_item(line);
                }
            }
        }
        Command::Clear => {
            let removed = orchestrator.clear_cart(mode, &mut progress)?;
            println!("Removed {removed} item(s).");
        }
        Command::Search { query } => {
            let hits = orchestrator.search_products(query, mode, &mut progress)?;
            if hits.is_empty() {
                println!("No products found.");
            }
            for hit in &hits {
                match (hit.price.is_empty(), hit.size.is_empty()) {
                    (false, false) => println!("{} - {} ({})", hit.name, hit.price, hit.size),
                    (false, true) => println!("{} - {}", hit.name, hit.price),
                    _ => println!("{}", hit.name),
                }
            }
        }
    }

    Ok(())
}

fn print_line_item(line: &cartbot::CartLineItem) {
    let qty = if line.quantity > 1 { format!(" x{}", line.quantity) } else { String::new() };
    match (line.price.is_empty(), line.size.is_empty()) {
        (false, false) => println!("  {}{} - {} ({})", line.name, qty, line.price, line.size),
        (false, true) => println!("  {}{} - {}", line.name, qty, line.price),
        _ => println!("  {}{}", line.name, qty),
    }
}
