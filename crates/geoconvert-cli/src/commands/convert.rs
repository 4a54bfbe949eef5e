use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow, bail};
use clap::Args;
use geoconvert_core::{
    ConversionParams, ConversionRequest, CreationOption, DataClass, GeospatialArtifact,
    Resampling, SpatialRef,
};
use geoconvert_engine::ServiceOptions;
use tracing::info;

use super::{Toolkit, file_name, report, resolve_source, runtime};

#[derive(Debug, Args)]
pub struct ConvertArgs {
    /// File to convert (zip multi-file datasets such as shapefiles)
    pub input: PathBuf,
    /// Target format: driver name or alias (gpkg, geojson, tif, shp, ...)
    #[arg(short, long)]
    pub to: String,
    /// Output path (default: next to the input, named after the target)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Source format (default: inferred from the extension)
    #[arg(long)]
    pub from: Option<String>,
    /// Reproject to this spatial reference, e.g. EPSG:4326
    #[arg(long)]
    pub t_srs: Option<String>,
    /// Override the source spatial reference
    #[arg(long)]
    pub s_srs: Option<String>,
    /// Resampling for raster reprojection: nearest, bilinear, cubic, average, mode
    #[arg(short, long)]
    pub resampling: Option<String>,
    /// Declare raster values categorical or continuous
    #[arg(long)]
    pub data_class: Option<String>,
    /// Name of the output layer (vector targets)
    #[arg(long)]
    pub layer_name: Option<String>,
    /// Driver creation option, repeatable
    #[arg(long = "co", value_name = "KEY=VALUE")]
    pub creation_options: Vec<String>,
    /// Skip re-opening the output after conversion
    #[arg(long)]
    pub no_validate: bool,
    /// Overwrite an existing output file
    #[arg(long)]
    pub force: bool,
}

/// What `run` wrote.
#[derive(Debug)]
pub struct Written {
    pub path: PathBuf,
    pub bytes: usize,
    pub sha256: String,
}

pub fn convert(gdal_bin: Option<PathBuf>, args: &ConvertArgs) -> anyhow::Result<()> {
    let toolkit = Toolkit::gdal(gdal_bin);
    let written = run(&toolkit, args)?;
    println!(
        "✓ Wrote {} ({} bytes, sha256 {})",
        written.path.display(),
        written.bytes,
        written.sha256
    );
    Ok(())
}

pub fn run(toolkit: &Toolkit, args: &ConvertArgs) -> anyhow::Result<Written> {
    let catalog = &toolkit.catalog;
    let target = catalog
        .resolve(&args.to)
        .ok_or_else(|| anyhow!("unknown target format '{}'", args.to))?;
    let source = resolve_source(catalog, args.from.as_deref(), &args.input, Some(&target))?;
    let params = params(args)?;

    let name = file_name(&args.input)?.to_string();
    let bytes = std::fs::read(&args.input)
        .with_context(|| format!("cannot read {}", args.input.display()))?;
    let artifact = GeospatialArtifact::new(bytes, source).with_file_name(name);
    let request = ConversionRequest::new(artifact, target).with_params(params);

    let options = ServiceOptions {
        validate_output: !args.no_validate,
        ..ServiceOptions::default()
    };
    let (service, _staging) = toolkit.service(options)?;
    let output = runtime()?
        .block_on(service.convert(request))
        .map_err(report)?;

    let path = output_path(&args.input, args.output.as_deref(), &output.file_name);
    if path == args.input {
        bail!(
            "refusing to overwrite the input file {}; pass --output",
            path.display()
        );
    }
    if path.exists() && !args.force {
        bail!("{} already exists; pass --force to overwrite", path.display());
    }
    std::fs::write(&path, &output.bytes)
        .with_context(|| format!("cannot write {}", path.display()))?;

    info!(
        path = %path.display(),
        driver = %output.format.driver,
        archived = output.archived,
        "conversion written"
    );
    Ok(Written {
        path,
        bytes: output.bytes.len(),
        sha256: output.sha256,
    })
}

fn params(args: &ConvertArgs) -> anyhow::Result<ConversionParams> {
    let target_srs = args
        .t_srs
        .as_deref()
        .map(SpatialRef::parse)
        .transpose()
        .context("invalid --t-srs")?;
    let source_srs = args
        .s_srs
        .as_deref()
        .map(SpatialRef::parse)
        .transpose()
        .context("invalid --s-srs")?;
    let resampling = args
        .resampling
        .as_deref()
        .map(str::parse::<Resampling>)
        .transpose()?;
    let data_class = args
        .data_class
        .as_deref()
        .map(str::parse::<DataClass>)
        .transpose()?;
    let creation_options = args
        .creation_options
        .iter()
        .map(|o| o.parse::<CreationOption>())
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ConversionParams {
        target_srs,
        source_srs,
        resampling,
        data_class,
        layer_name: args.layer_name.clone(),
        creation_options,
    })
}

fn output_path(input: &Path, explicit: Option<&Path>, file_name: &str) -> PathBuf {
    match explicit {
        Some(path) => path.to_path_buf(),
        None => input.with_file_name(file_name),
    }
}
