//! CLI tool for figure-aware PDF text extraction
//!
//! Writes every extracted image to the output directory and prints the
//! annotated text plus the image manifest as JSON on stdout.

use clap::error::ErrorKind;
use clap::Parser;
use pdf_annotate::{
    process_pdf_with_options, ExtractOptions, LinearizeOptions, PlacementMatching, TableOptions,
};
use std::path::PathBuf;
use std::process;

#[derive(Parser, Debug)]
#[command(name = "extract-pdf", version, about = "Extract PDF text with figure, formula and table markers")]
struct Cli {
    /// PDF file to extract
    pdf_path: PathBuf,

    /// Directory for extracted images (created if missing)
    output_dir: PathBuf,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,

    /// Skip formula marking
    #[arg(long)]
    no_formulas: bool,

    /// Skip table detection
    #[arg(long)]
    no_tables: bool,

    /// Match images against every placement instead of one per vertical center
    #[arg(long)]
    nearest_placement: bool,

    /// Maximum vertical-center distance between an image block and its placement
    #[arg(long, default_value_t = 50.0)]
    tolerance: f32,

    /// Validate a table at the end of the text like any other table
    #[arg(long)]
    lenient_final_flush: bool,

    /// Emit multi-column table rows as TABLE_ROW markers
    #[arg(long)]
    row_markers: bool,
}

impl Cli {
    fn options(&self) -> ExtractOptions {
        ExtractOptions {
            linearize: LinearizeOptions {
                tolerance: self.tolerance,
                matching: if self.nearest_placement {
                    PlacementMatching::Nearest
                } else {
                    PlacementMatching::CenterKeyed
                },
            },
            tables: TableOptions {
                lenient_final_flush: self.lenient_final_flush,
                row_markers: self.row_markers,
            },
            mark_formulas: !self.no_formulas,
            detect_tables: !self.no_tables,
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            eprint!("{}", e);
            process::exit(1);
        }
    };

    let json = process_pdf_with_options(&cli.pdf_path, &cli.output_dir, &cli.options()).and_then(
        |result| {
            if cli.pretty {
                result.to_json_pretty()
            } else {
                result.to_json()
            }
        },
    );

    match json {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}
