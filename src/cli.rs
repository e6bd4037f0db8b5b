use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use reckon::config::{AngleUnit, ImperialVariant};

#[derive(Parser, Debug)]
#[command(
    name = "reckon",
    about = "Notepad calculator: units, dates, times and currencies in plain text"
)]
pub struct Cli {
    /// Notepad file to evaluate; stdin when omitted
    pub file: Option<PathBuf>,

    /// Evaluate a single expression and exit
    #[arg(short = 'e', long)]
    pub expr: Option<String>,

    /// Output format: table (default), json, plain
    #[arg(long, default_value = "table")]
    pub format: OutputFormat,

    /// Decimal digits to display; -1 trims trailing zeros
    #[arg(long)]
    pub precision: Option<i32>,

    /// Angle convention for trig functions
    #[arg(long)]
    pub angle_unit: Option<AngleArg>,

    /// Which imperial variant gallons and pints use
    #[arg(long)]
    pub imperial: Option<ImperialArg>,

    /// Exchange-rate snapshot (JSON) to install before evaluating
    #[arg(long)]
    pub rates: Option<PathBuf>,

    /// BCP-47 locale tag for timezone disambiguation
    #[arg(long)]
    pub locale: Option<String>,
}

#[derive(ValueEnum, Debug, Clone, PartialEq)]
pub enum OutputFormat {
    Table,
    Json,
    Plain,
}

#[derive(ValueEnum, Debug, Clone, PartialEq)]
pub enum AngleArg {
    Radian,
    Degree,
}

impl From<AngleArg> for AngleUnit {
    fn from(arg: AngleArg) -> Self {
        match arg {
            AngleArg::Radian => AngleUnit::Radian,
            AngleArg::Degree => AngleUnit::Degree,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, PartialEq)]
pub enum ImperialArg {
    Us,
    Uk,
}

impl From<ImperialArg> for ImperialVariant {
    fn from(arg: ImperialArg) -> Self {
        match arg {
            ImperialArg::Us => ImperialVariant::Us,
            ImperialArg::Uk => ImperialVariant::Uk,
        }
    }
}
