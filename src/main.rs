mod cli;
mod output;

use std::fs;
use std::io::Read;

use anyhow::{Context, Result};
use clap::Parser;

use reckon::config::load_config;
use reckon::{Calculator, ExchangeRates};

use cli::{Cli, OutputFormat};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config();

    let mut settings = config.settings.unwrap_or_default();
    if let Some(precision) = cli.precision {
        settings.precision = precision;
    }
    if let Some(angle) = cli.angle_unit.clone() {
        settings.angle_unit = angle.into();
    }
    if let Some(imperial) = cli.imperial.clone() {
        settings.imperial_units = imperial.into();
    }
    if let Some(locale) = cli.locale.clone() {
        settings.user_locale = locale;
    }

    let mut calculator = Calculator::with_settings(settings)?;

    // Rates are optional: currency conversion errors per line, everything
    // else keeps working without them.
    let rates_path = cli
        .rates
        .clone()
        .or_else(|| config.rates_file.as_ref().map(Into::into));
    if let Some(path) = rates_path {
        match fs::read_to_string(&path) {
            Ok(data) => match ExchangeRates::from_json(&data) {
                Ok(rates) => calculator.load_exchange_rates(rates),
                Err(e) => eprintln!("Warning: invalid rates file {}: {}", path.display(), e),
            },
            Err(e) => eprintln!("Warning: cannot read rates file {}: {}", path.display(), e),
        }
    }

    let text = if let Some(expr) = cli.expr {
        expr
    } else if let Some(ref path) = cli.file {
        fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?
    } else {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("cannot read stdin")?;
        buf
    };

    let result = calculator.calculate(&text);

    match cli.format {
        OutputFormat::Table => output::print_table(&text, &result),
        OutputFormat::Json => output::print_json(&result),
        OutputFormat::Plain => output::print_plain(&result),
    }

    let total = result.errors.total();
    if total > 0 {
        eprintln!("{total} error(s)");
    }

    Ok(())
}
