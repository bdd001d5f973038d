use std::fmt;

use anyhow::Context;
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use eiswarnung_core::{
    Config, Forecast, Ratelimit, client_from_config, config::validate_coordinates,
};
use inquire::{CustomType, Password, validator::Validation};
use tracing::debug;

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "eiswarnung", version, about = "Ice warning forecasts from eiswarnung.de")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Store API key and location.
    Configure,

    /// Show the ice warning forecast for the configured location.
    Forecast {
        /// Latitude in decimal degrees; overrides the stored value.
        #[arg(long, allow_hyphen_values = true)]
        lat: Option<f64>,

        /// Longitude in decimal degrees; overrides the stored value.
        #[arg(long, allow_hyphen_values = true)]
        lng: Option<f64>,

        /// API key; overrides the stored value.
        #[arg(long, env = "EISWARNUNG_API_KEY", hide_env_values = true)]
        key: Option<String>,

        /// Request timeout in seconds.
        #[arg(long)]
        timeout: Option<u64>,
    },
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Command::Configure => configure(),
            Command::Forecast { lat, lng, key, timeout } => {
                let cfg = with_overrides(Config::load()?, key, lat, lng, timeout);
                let mut client = client_from_config(&cfg)?;
                debug!(?client, "fetching forecast");

                let forecast = client
                    .forecast()
                    .await
                    .context("Failed to fetch forecast from eiswarnung.de")?;

                let report = ForecastReport {
                    forecast: &forecast,
                    ratelimit: client.ratelimit(),
                    today: Local::now().date_naive(),
                };
                print!("{report}");
                Ok(())
            }
        }
    }
}

fn configure() -> anyhow::Result<()> {
    let mut cfg = Config::load()?;

    let api_key = Password::new("API key:")
        .without_confirmation()
        .with_help_message("Request a key at https://www.eiswarnung.de/rest-api/")
        .prompt()
        .context("Failed to read API key")?;

    let latitude = coordinate_prompt("Latitude:", cfg.latitude)
        .with_validator(|v: &f64| match validate_coordinates(*v, 0.0) {
            Ok(()) => Ok(Validation::Valid),
            Err(e) => Ok(Validation::Invalid(e.to_string().into())),
        })
        .prompt()
        .context("Failed to read latitude")?;

    let longitude = coordinate_prompt("Longitude:", cfg.longitude)
        .with_validator(|v: &f64| match validate_coordinates(0.0, *v) {
            Ok(()) => Ok(Validation::Valid),
            Err(e) => Ok(Validation::Invalid(e.to_string().into())),
        })
        .prompt()
        .context("Failed to read longitude")?;

    cfg.set_api_key(api_key.trim().to_string());
    cfg.set_location(latitude, longitude)?;
    cfg.save()?;

    println!("Saved configuration to {}", Config::config_file_path()?.display());
    Ok(())
}

fn coordinate_prompt(message: &str, current: Option<f64>) -> CustomType<'_, f64> {
    let prompt = CustomType::<f64>::new(message).with_error_message("Please type a decimal number");
    match current {
        Some(value) => prompt.with_default(value),
        None => prompt,
    }
}

fn with_overrides(
    mut cfg: Config,
    key: Option<String>,
    lat: Option<f64>,
    lng: Option<f64>,
    timeout: Option<u64>,
) -> Config {
    if let Some(key) = key {
        cfg.api_key = Some(key);
    }
    cfg.latitude = lat.or(cfg.latitude);
    cfg.longitude = lng.or(cfg.longitude);
    cfg.request_timeout_secs = timeout.or(cfg.request_timeout_secs);
    cfg
}

/// Human readable forecast and rate limit, as printed by `eiswarnung forecast`.
struct ForecastReport<'a> {
    forecast: &'a Forecast,
    ratelimit: Option<&'a Ratelimit>,
    today: NaiveDate,
}

impl fmt::Display for ForecastReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let forecast = self.forecast;
        let day = match (forecast.forecast_date - self.today).num_days() {
            0 => " (today)",
            1 => " (tomorrow)",
            _ => "",
        };

        writeln!(f, "--- FORECAST ---")?;
        writeln!(f, "Forecast Type: {}", forecast.forecast_type())?;
        writeln!(f, "Forecast Text: {}", forecast.text.as_deref().unwrap_or("-"))?;
        writeln!(f, "Forecast Date: {}{day}", forecast.forecast_date)?;
        writeln!(f, "Forecast City: {}", forecast.city.as_deref().unwrap_or("-"))?;
        writeln!(
            f,
            "Request Date:  {}",
            forecast.request_date.format("%Y-%m-%d %H:%M:%S %Z")
        )?;

        if let Some(rl) = self.ratelimit {
            let retry_after = rl.retry_after.map(|secs| format!("{secs}s"));

            writeln!(f)?;
            writeln!(f, "--- RATE LIMIT ---")?;
            writeln!(f, "Call Limit:      {}", display_or_dash(rl.call_limit))?;
            writeln!(f, "Remaining Calls: {}", display_or_dash(rl.remaining_calls))?;
            writeln!(f, "Retry After:     {}", display_or_dash(retry_after))?;
        }

        Ok(())
    }
}

fn display_or_dash<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}
