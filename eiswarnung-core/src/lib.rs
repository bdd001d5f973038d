//! Async client for the Eiswarnung ice-warning API.
//!
//! This crate defines:
//! - The [`Eiswarnung`] client: request pipeline, error classification, rate limit tracking
//! - Domain models ([`Forecast`], [`ForecastType`], [`Ratelimit`])
//! - On-disk configuration used by `eiswarnung-cli`
//!
//! ```no_run
//! # async fn run() -> Result<(), eiswarnung_core::EiswarnungError> {
//! let mut client = eiswarnung_core::Eiswarnung::new("API_KEY", 49.41, 8.68);
//! let forecast = client.forecast().await?;
//! println!("{}: {}", forecast.forecast_date, forecast.forecast_type());
//! println!("{:?}", client.ratelimit());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod models;

pub use client::{DEFAULT_BASE_URL, DEFAULT_TIMEOUT, Eiswarnung, client_from_config};
pub use config::Config;
pub use error::EiswarnungError;
pub use models::{Envelope, Forecast, ForecastType, ParseError, Ratelimit};
