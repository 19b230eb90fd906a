use crate::decode::{self, ImageDecoder};
use crate::error::Result;
use crate::metadata::RawTags;
use crate::mpf::{MpfContainer, MpfDirectory};
use crate::raster::PixelRaster;

/// Summary of a gain map's first channel, in the normalized `[0, 1]` domain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainMapStatistics {
    pub width: usize,
    pub height: usize,
    pub min: f32,
    pub max: f32,
    pub mean: f32,
    /// Population standard deviation.
    pub std_dev: f32,
    pub median: f32,
}

impl GainMapStatistics {
    pub fn from_raster(raster: &PixelRaster) -> Self {
        let mut values: Vec<f32> = raster.pixels().map(|p| p[0]).collect();
        let (width, height) = raster.extent();
        if values.is_empty() {
            return Self { width, height, min: 0.0, max: 0.0, mean: 0.0, std_dev: 0.0, median: 0.0 };
        }

        let count = values.len() as f64;
        let mean = values.iter().map(|&v| v as f64).sum::<f64>() / count;
        let variance = values.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / count;

        values.sort_by(f32::total_cmp);
        let middle = values.len() / 2;
        let median = if values.len() % 2 == 0 {
            (values[middle - 1] + values[middle]) / 2.0
        } else {
            values[middle]
        };

        Self {
            width,
            height,
            min: values[0],
            max: values[values.len() - 1],
            mean: mean as f32,
            std_dev: variance.sqrt() as f32,
            median,
        }
    }
}

/// What an asset carries, without synthesizing anything.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub directory: MpfDirectory,
    pub tags: RawTags,
    pub statistics: GainMapStatistics,
}

/// Locates and decodes the gain map of `file` and summarizes it at its native resolution.
pub fn analyze<D: ImageDecoder + ?Sized>(file: &[u8], decoder: &D) -> Result<Analysis> {
    let container = MpfContainer::locate(file)?;
    let tags = crate::embedded_tags(&container);
    let gain = decode::decode_gain_map(decoder, container.gain_map)?;

    Ok(Analysis {
        directory: container.directory,
        tags,
        statistics: GainMapStatistics::from_raster(&gain),
    })
}
