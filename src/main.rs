use std::fs::File;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use scmtiff::convert;
use scmtiff::image::load;
use scmtiff::Scm;

/// Convert a map-projected raster into a Spherical Cube Map TIFF.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Output file
    #[arg(short, long, default_value = "out.tif")]
    output: PathBuf,

    /// Description embedded in the output preface
    #[arg(short = 't', long)]
    text: Option<String>,

    /// Page side in samples
    #[arg(short, long, default_value_t = 512)]
    n: u32,

    /// Quad-tree depth to emit
    #[arg(short, long, default_value_t = 0)]
    depth: u32,

    /// Output bits per channel (8, 16, or 32) [default: the input's]
    #[arg(short, long)]
    bits: Option<u32>,

    /// Output signedness, 0 or 1 [default: the input's]
    #[arg(short = 'g', long)]
    signed: Option<u8>,

    /// Blending window outer angles, degrees
    #[arg(long, default_value_t = 0.0)]
    lat0: f64,
    #[arg(long, default_value_t = 0.0)]
    lat1: f64,
    #[arg(long, default_value_t = 0.0)]
    lon0: f64,
    #[arg(long, default_value_t = 0.0)]
    lon1: f64,

    /// Blending window feather widths, degrees
    #[arg(long, default_value_t = 0.0)]
    dlat0: f64,
    #[arg(long, default_value_t = 0.0)]
    dlat1: f64,
    #[arg(long, default_value_t = 0.0)]
    dlon0: f64,
    #[arg(long, default_value_t = 0.0)]
    dlon1: f64,

    /// Normalization window [default: full scale for the output depth]
    #[arg(long, default_value_t = 0.0)]
    norm0: f64,
    #[arg(long, default_value_t = 0.0)]
    norm1: f64,

    /// Append the sorted page catalog after conversion
    #[arg(long)]
    catalog: bool,

    /// Append per-page extrema after conversion
    #[arg(long)]
    extrema: bool,

    /// Input image (.jpg, .png, .tif, .img, .lbl)
    input: PathBuf,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut img = load::load(&args.input)
        .with_context(|| format!("failed to load {}", args.input.display()))?;

    img.blend.lat0 = args.lat0.to_radians();
    img.blend.lat1 = args.lat1.to_radians();
    img.blend.lon0 = args.lon0.to_radians();
    img.blend.lon1 = args.lon1.to_radians();
    img.blend.dlat0 = args.dlat0.to_radians();
    img.blend.dlat1 = args.dlat1.to_radians();
    img.blend.dlon0 = args.dlon0.to_radians();
    img.blend.dlon1 = args.dlon1.to_radians();

    let bits = args.bits.unwrap_or_else(|| img.bits());
    let signed = args.signed.map(|v| v != 0).unwrap_or_else(|| img.is_signed());
    let text = args
        .text
        .unwrap_or_else(|| concat!("scmtiff ", env!("CARGO_PKG_VERSION")).to_owned());

    let file = File::options()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&args.output)
        .with_context(|| format!("failed to open {}", args.output.display()))?;

    let mut scm = Scm::create(file, args.n, img.channels(), bits, signed, &text)?;
    scm.set_norm(args.norm0, args.norm1);

    convert::process(&mut scm, &img, args.depth)?;
    scm.finalize(args.catalog, args.extrema)?;

    Ok(())
}
