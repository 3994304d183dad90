use std::fs::OpenOptions;
use std::path::PathBuf;

use crate::market::MarketClock;
use crate::quote::{QuoteSource, RelayClient};

use clap::{arg, Command};
use colored::Colorize;
use eyre::WrapErr;
use futures::future::join_all;
use log::warn;
use serde::Deserialize;
use serde::Serialize;

mod error;
mod form;
mod market;
mod portfolio;
mod position;
mod quote;
mod refresh;
mod tui;

const APP_NAME: &str = "stockboard_rs";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Prefix the percent-encoded target URL is appended to. Empty to call the API directly.
    pub relay_url: String,
    pub api_base: String,
    pub price_refresh_secs: u64,
    pub index_refresh_secs: u64,
    pub debounce_ms: u64,
    pub request_timeout_secs: u64,
    pub log_file: Option<PathBuf>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relay_url: "https://corsproxy.io/?url=".to_string(),
            api_base: "https://query1.finance.yahoo.com".to_string(),
            price_refresh_secs: 15,
            index_refresh_secs: 30,
            debounce_ms: 300,
            request_timeout_secs: 10,
            log_file: None,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    fn log_path(&self) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(format!("{APP_NAME}.log")))
    }
}

fn cli() -> Command {
    Command::new(APP_NAME)
        .about("Track manually entered stock positions against live market prices")
        .arg_required_else_help(true)
        .subcommand(Command::new("config").about("Print the path to the config file"))
        .subcommand(Command::new("dashboard").about("Open the interactive finance dashboard"))
        .subcommand(
            Command::new("search")
                .about("Look up ticker symbols matching a query")
                .arg(arg!(<QUERY> "Company name or ticker fragment")),
        )
        .subcommand(
            Command::new("quote")
                .about("Show the live price of one or more tickers")
                .arg(arg!(<SYMBOL> ... "Ticker symbols, e.g. AAPL MSFT")),
        )
        .subcommand(Command::new("market").about("Show US market hours status"))
}

// While the dashboard owns the terminal, log lines go to a file instead of stderr
fn init_logging(cfg: &Config, to_file: bool) -> eyre::Result<()> {
    let env = env_logger::Env::default().default_filter_or(cfg.log_level.as_str());
    let mut builder = env_logger::Builder::from_env(env);
    if to_file {
        let path = cfg.log_path();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .wrap_err_with(|| format!("cannot open log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.try_init()?;
    Ok(())
}

async fn print_search(source: &dyn QuoteSource, query: &str) -> eyre::Result<()> {
    use comfy_table::{presets::UTF8_FULL, Attribute, Cell, ContentArrangement, Table};

    let suggestions = source.search(query).await?;
    if suggestions.is_empty() {
        println!("No matches for '{query}'");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(80)
        .set_header(vec![
            Cell::new("Symbol").add_attribute(Attribute::Bold),
            Cell::new("Name").add_attribute(Attribute::Bold),
        ]);
    for s in suggestions {
        table.add_row(vec![Cell::new(s.symbol), Cell::new(s.name)]);
    }
    println!("{table}");
    Ok(())
}

async fn print_quotes(source: &dyn QuoteSource, symbols: &[String]) {
    use comfy_table::{
        presets::UTF8_FULL, Attribute, Cell, CellAlignment, Color as TColor, ContentArrangement,
        Table,
    };

    let tasks = symbols.iter().map(|symbol| async move {
        let symbol = symbol.trim().to_uppercase();
        let result = source.quote(&symbol).await;
        (symbol, result)
    });

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(100)
        .set_header(vec![
            Cell::new("Symbol").add_attribute(Attribute::Bold),
            Cell::new("Price").add_attribute(Attribute::Bold),
            Cell::new("Prev Close").add_attribute(Attribute::Bold),
            Cell::new("%Day").add_attribute(Attribute::Bold),
            Cell::new("Market").add_attribute(Attribute::Bold),
        ]);

    for (symbol, result) in join_all(tasks).await {
        match result {
            Ok(quote) => {
                let change = quote.change_percent();
                let c = if change >= 0.0 { TColor::Green } else { TColor::Red };
                table.add_row(vec![
                    Cell::new(&symbol),
                    Cell::new(format!("{:.2}", quote.price)).set_alignment(CellAlignment::Right),
                    Cell::new(
                        quote
                            .previous_close
                            .map(|p| format!("{p:.2}"))
                            .unwrap_or_else(|| "-".to_string()),
                    )
                    .set_alignment(CellAlignment::Right),
                    Cell::new(format!("{change:.2}%"))
                        .set_alignment(CellAlignment::Right)
                        .fg(c),
                    Cell::new(quote.market_state.to_string()),
                ]);
            }
            Err(e) => {
                warn!("could not fetch {symbol}: {e}");
                table.add_row(vec![
                    Cell::new(&symbol),
                    Cell::new("-").set_alignment(CellAlignment::Right),
                    Cell::new("-").set_alignment(CellAlignment::Right),
                    Cell::new("-").set_alignment(CellAlignment::Right),
                    Cell::new("unavailable").fg(TColor::Red),
                ]);
            }
        }
    }

    println!("{table}");
}

fn print_market(clock: &MarketClock) {
    let status = match clock.status {
        market::MarketStatus::Open => clock.status_line().green(),
        market::MarketStatus::Closed => clock.status_line().red(),
    };
    println!("Market Status: {status}");
    println!("US Local Time: {} hrs", clock.us_hhmm());
    println!("SG Local Time: {} hrs", clock.sg_hhmm());
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let cfg: Config = confy::load(APP_NAME, "config")?;

    let matches = cli().get_matches();

    init_logging(&cfg, matches.subcommand_name() == Some("dashboard"))?;

    match matches.subcommand() {
        Some(("config", _)) => {
            println!(
                "Your config file is located here: \n{}",
                confy::get_configuration_file_path(APP_NAME, "config")?.display()
            );
        }
        Some(("dashboard", _)) => {
            tui::run_tui(&cfg).await?;
        }
        Some(("search", sub)) => {
            let client = RelayClient::new(&cfg)?;
            if let Some(query) = sub.get_one::<String>("QUERY") {
                print_search(&client, query).await?;
            }
        }
        Some(("quote", sub)) => {
            let client = RelayClient::new(&cfg)?;
            let symbols: Vec<String> = sub
                .get_many::<String>("SYMBOL")
                .map(|values| values.cloned().collect())
                .unwrap_or_default();
            print_quotes(&client, &symbols).await;
        }
        Some(("market", _)) => print_market(&MarketClock::now()),
        _ => cli().print_help()?,
    }
    Ok(())
}
