mod logging;

use std::path::{Path, PathBuf};

use libapplehdr::{ColorPrimaries, ConversionOptions, SynthesizedHdrImage, ToneMapConfig, ZuneJpegDecoder};

use log::{error, info, warn, LevelFilter};
use clap::Parser;

/// Converts an Apple HDR JPEG (an SDR image with an MPF gain map) to a linear HDR image.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// The Apple HDR JPEG to process.
    input_file_path: PathBuf,
    /// The output file to write.
    /// Defaults to the input path with an `.exr` (or `.avif`) extension.
    #[arg(short='o', long="output")]
    output_file_path: Option<PathBuf>,
    /// Compress highlights into [0, 1] with an extended Reinhard curve.
    #[arg(long="tone-mapping")]
    tone_mapping: bool,
    /// Tone map with the plain Reinhard curve instead. Implies `--tone-mapping`.
    #[arg(long="reinhard")]
    reinhard: bool,
    /// Primaries of the base image (`srgb`, `p3`, `bt2020`), overriding the embedded color profile.
    #[arg(long="primaries", value_parser = parse_primaries)]
    primaries: Option<ColorPrimaries>,
    /// Print the MPF directory, gain map metadata and gain map statistics instead of converting.
    #[arg(long="analyze")]
    analyze: bool,
    /// Write HDR10 AVIF instead of OpenEXR.
    #[arg(long="avif")]
    avif: bool,
    /// Also write the log to `log.txt`.
    #[arg(long="log-file")]
    log_file: bool,
    /// Log debug (`-v`) or trace (`-vv`) records.
    #[arg(short='v', long="verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

fn parse_primaries(name: &str) -> Result<ColorPrimaries, String> {
    ColorPrimaries::from_name(name).ok_or_else(|| format!("unknown primaries `{}`", name))
}

fn main() {
    let args = Args::parse();

    let level = match args.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let mut logging_config = logging::LoggingConfig::default().level(level);
    if args.log_file {
        logging_config = logging_config.output_to_file();
    }
    if let Err(e) = logging_config.apply() {
        eprintln!("Failed to set up logging: {}", e);
        std::process::exit(1);
    }

    if let Err(message) = run(&args) {
        error!("{}", message);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), String> {
    let input_path = &args.input_file_path;
    let is_jpeg = input_path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"));
    if !is_jpeg {
        return Err(format!("Input file must be a JPEG file: {}", input_path.display()));
    }

    let content = std::fs::read(input_path)
        .map_err(|e| format!("Error reading input file {}: {}", input_path.display(), e))?;

    if args.analyze {
        return analyze(input_path, &content);
    }

    info!("Processing Apple HDR JPEG: {}", input_path.display());

    let tone_mapping = match (args.tone_mapping, args.reinhard) {
        (_, true) => Some(ToneMapConfig::reinhard()),
        (true, false) => Some(ToneMapConfig::default()),
        (false, false) => None,
    };
    let options = ConversionOptions {
        tone_mapping,
        source_primaries: args.primaries,
    };

    let conversion = libapplehdr::convert(&content, None, &ZuneJpegDecoder, &options)
        .map_err(|e| format!("Error converting {}: {}", input_path.display(), e))?;

    if let Some(reason) = &conversion.fallback {
        warn!("No HDR reconstruction ({}); writing the base image only", reason);
    }
    if let Some(metadata) = &conversion.metadata {
        info!("Headroom {:.4} ({:?}), gamma {}", metadata.headroom(), metadata.direction(), metadata.gamma());
    }

    let extension = if args.avif { "avif" } else { "exr" };
    let output_path = args.output_file_path
        .clone()
        .unwrap_or_else(|| input_path.with_extension(extension));

    write_output(&output_path, &conversion.image, args.avif)?;
    info!("Saved {}", output_path.display());

    Ok(())
}

fn analyze(input_path: &Path, content: &[u8]) -> Result<(), String> {
    let analysis = libapplehdr::analyze(content, &ZuneJpegDecoder)
        .map_err(|e| format!("Error analyzing {}: {}", input_path.display(), e))?;

    println!("Analyzing Apple HDR JPEG: {}", input_path.display());
    println!("{}", "=".repeat(60));

    println!("MPF directory:");
    for (index, entry) in analysis.directory.entries().iter().enumerate() {
        println!(
            "  #{} type 0x{:06X} offset {} length {}",
            index, entry.type_code.raw(), entry.offset, entry.length,
        );
    }

    println!("\nGain map metadata:");
    for (name, value) in analysis.tags.sorted() {
        println!("  {}: {:?}", name, value);
    }
    match libapplehdr::GainMapMetadata::from_raw_tags(&analysis.tags) {
        Ok(metadata) => println!("  => headroom {:.4}", metadata.headroom()),
        Err(e) => println!("  => unusable: {}", e),
    }

    let stats = &analysis.statistics;
    println!("\nGain map statistics:");
    println!("  size:   {}x{}", stats.width, stats.height);
    println!("  min:    {:.4}", stats.min);
    println!("  max:    {:.4}", stats.max);
    println!("  mean:   {:.4}", stats.mean);
    println!("  std:    {:.4}", stats.std_dev);
    println!("  median: {:.4}", stats.median);

    Ok(())
}

fn write_output(output_path: &Path, image: &SynthesizedHdrImage, avif: bool) -> Result<(), String> {
    if avif {
        return write_avif(output_path, image);
    }

    libapplehdr::outexr::write_hdr_image_to_exr(output_path, image)
        .map_err(|e| format!("Error writing {}: {}", output_path.display(), e))
}

#[cfg(feature = "avif")]
fn write_avif(output_path: &Path, image: &SynthesizedHdrImage) -> Result<(), String> {
    use libapplehdr::outavif::{write_hdr_image_to_avif, DEFAULT_SDR_WHITE_NITS};

    let mut file = std::fs::File::create(output_path)
        .map_err(|e| format!("Error creating {}: {}", output_path.display(), e))?;
    write_hdr_image_to_avif(&mut file, image, DEFAULT_SDR_WHITE_NITS)
        .map_err(|e| format!("Error writing {}: {}", output_path.display(), e))
}

#[cfg(not(feature = "avif"))]
fn write_avif(_output_path: &Path, _image: &SynthesizedHdrImage) -> Result<(), String> {
    Err("AVIF output requires building with the `avif` feature".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_conversion_flags() {
        let args = Args::try_parse_from(["applehdr2exr", "IMG_0001.JPG", "-o", "out.exr", "--reinhard", "--primaries", "p3"]).unwrap();
        assert_eq!(args.input_file_path, PathBuf::from("IMG_0001.JPG"));
        assert_eq!(args.output_file_path, Some(PathBuf::from("out.exr")));
        assert!(args.reinhard && !args.tone_mapping && !args.analyze);
        assert_eq!(args.primaries, Some(ColorPrimaries::DisplayP3));
    }

    #[test]
    fn rejects_unknown_primaries() {
        assert!(Args::try_parse_from(["applehdr2exr", "a.jpg", "--primaries", "cmyk"]).is_err());
    }

    #[test]
    fn rejects_non_jpeg_input() {
        let args = Args::try_parse_from(["applehdr2exr", "photo.heic"]).unwrap();
        assert!(run(&args).unwrap_err().contains("must be a JPEG"));
    }
}
