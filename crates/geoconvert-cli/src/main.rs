use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

use commands::convert::ConvertArgs;
use commands::OutputFormat;
use commands::formats::KindArg;

#[derive(Parser)]
#[command(
    name = "geoconvert",
    about = "geoconvert — convert geospatial files with GDAL",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Directory containing the GDAL command-line tools (default: PATH)
    #[arg(long, global = true, env = "GEOCONVERT_GDAL_BIN")]
    gdal_bin: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a file to another format.
    ///
    /// The source format is inferred from the file extension unless
    /// --from is given. Shapefile outputs are written as .shp.zip bundles.
    Convert(ConvertArgs),
    /// List the drivers the installed GDAL can read or write
    Formats {
        /// Only show raster or vector drivers
        #[arg(short, long, value_enum)]
        kind: Option<KindArg>,
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Describe a dataset: driver, size, bands, layers, spatial reference
    Inspect {
        /// File to inspect
        input: PathBuf,
        /// Source format (default: inferred from the extension)
        #[arg(long)]
        from: Option<String>,
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("geoconvert=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let gdal_bin = cli.gdal_bin;

    match cli.command {
        Commands::Convert(args) => commands::convert::convert(gdal_bin, &args),
        Commands::Formats { kind, format } => {
            commands::formats::formats(gdal_bin, kind, format)
        }
        Commands::Inspect {
            input,
            from,
            format,
        } => commands::inspect::inspect(gdal_bin, &input, from.as_deref(), format),
    }
}
