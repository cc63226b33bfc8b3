use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use xlsum_core::Calculator;

mod formatter;

#[derive(Parser)]
#[command(name = "xlsum")]
#[command(about = "Sum mapped cells from a folder of workbooks into one output workbook", long_about = None)]
#[command(version)]
struct Cli {
    /// Mapping file: one `<source>;<destination>` pair per line
    #[arg(value_name = "MAPPINGS")]
    mappings: PathBuf,

    /// Directory containing the input workbooks
    #[arg(value_name = "INPUT_DIR")]
    input_dir: PathBuf,

    /// Output workbook; must already exist with every destination sheet
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value = "human")]
    format: OutputFormat,

    /// Re-evaluate formulas in the output workbook before saving
    #[arg(long)]
    evaluate: bool,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Human-readable colored output
    Human,
    /// JSON output for scripting
    Json,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut calculator = Calculator::new(&cli.mappings, &cli.input_dir, &cli.output)
        .evaluate_output(cli.evaluate);
    let report = calculator.run();

    match cli.format {
        OutputFormat::Human => formatter::print_human(&cli.output, &report),
        OutputFormat::Json => formatter::print_json(&cli.output, &report)?,
    }

    // Exit with appropriate code
    std::process::exit(if report.succeeded { 0 } else { 1 });
}
