//! Tiled DASH manifest data structures.
//! A manifest describes a grid of independently encoded video tiles, each with
//! its own bitrate ladder, plus one untiled audio track.

pub mod parser;
pub mod builder;

use std::str::FromStr;
use std::time::Duration;

use shared_utils::TileCoordinate;

use crate::error::DashError;

pub use parser::{parse_duration, parse_mpd};

/// Grid extent in tiles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GridSize {
    pub cols: u32,
    pub rows: u32,
}

/// Pixel extent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dimension {
    pub width: u32,
    pub height: u32,
}

/// One bitrate variant of a tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Representation {
    pub id: u32,
    /// Average bandwidth in bits per second.
    pub bandwidth: u64,
    /// Media segment path with a single `{}` (or `{:0N}`) slot for the 1-based segment number.
    pub media: String,
    /// Initialization segment path.
    pub initialization: String,
}

impl Representation {
    /// Media segment path for `segment_number`.
    pub fn media_path(&self, segment_number: u64) -> String {
        substitute_number(&self.media, segment_number)
    }

    pub fn initialization_path(&self) -> &str {
        &self.initialization
    }
}

fn substitute_number(template: &str, number: u64) -> String {
    let Some(open) = template.find('{') else {
        return template.to_string();
    };
    let Some(length) = template[open..].find('}') else {
        return template.to_string();
    };
    let close = open + length;
    let slot = &template[open + 1..close];
    let rendered = match slot.strip_prefix(":0").and_then(|width| width.parse::<usize>().ok()) {
        Some(width) => format!("{number:0width$}"),
        None => number.to_string(),
    };
    format!("{}{}{}", &template[..open], rendered, &template[close + 1..])
}

/// The adaptation set of one tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoAdaptationSet {
    pub coordinate: TileCoordinate,
    pub width: u32,
    pub height: u32,
    pub codecs: String,
    pub mime_type: String,
    /// Not sorted by bandwidth; order is document order.
    pub representations: Vec<Representation>,
}

impl VideoAdaptationSet {
    pub fn representation(&self, index: usize) -> &Representation {
        &self.representations[index]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioAdaptationSet {
    pub codecs: String,
    pub mime_type: String,
    pub sample_rate: u32,
    pub representation: Representation,
}

/// A parsed manifest. Immutable once built and shared read-only between tile workers.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub title: String,
    pub presentation_duration: Option<Duration>,
    pub min_buffer_time: Option<Duration>,
    pub max_segment_duration: Option<Duration>,
    pub grid: GridSize,
    /// Summed tile widths divided by the row count, summed heights by the column count.
    pub scale: Dimension,
    /// Raster ordered: the set at index `i` has `i = y * cols + x`.
    pub video_sets: Vec<VideoAdaptationSet>,
    pub audio_set: Option<AudioAdaptationSet>,
}

impl Manifest {
    pub fn grid_size(&self) -> GridSize {
        self.grid
    }

    pub fn frame_size(&self) -> Dimension {
        self.scale
    }

    pub fn tile_size(&self) -> Dimension {
        Dimension {
            width: self.scale.width / self.grid.cols.max(1),
            height: self.scale.height / self.grid.rows.max(1),
        }
    }

    pub fn tile_count(&self) -> usize {
        self.grid.cols as usize * self.grid.rows as usize
    }

    pub fn video_sets(&self) -> &[VideoAdaptationSet] {
        &self.video_sets
    }

    /// Panics if the coordinate lies outside the grid.
    pub fn video_set(&self, x: u32, y: u32) -> &VideoAdaptationSet {
        assert!(
            x < self.grid.cols && y < self.grid.rows,
            "tile ({x}, {y}) outside grid {}x{}",
            self.grid.cols,
            self.grid.rows
        );
        &self.video_sets[TileCoordinate::new(x, y).raster_index(self.grid.cols)]
    }

    pub fn audio_set(&self) -> Option<&AudioAdaptationSet> {
        self.audio_set.as_ref()
    }

    /// 1-based tile index, `x + y * cols + 1`.
    pub fn tile_index(&self, x: u32, y: u32) -> u32 {
        TileCoordinate::new(x, y).tile_index(self.grid.cols)
    }

    pub fn tile_coordinate(&self, index: u32) -> TileCoordinate {
        TileCoordinate::from_tile_index(index, self.grid.cols)
    }

    pub fn coordinates(&self) -> impl Iterator<Item = TileCoordinate> + '_ {
        self.video_sets.iter().map(|set| set.coordinate)
    }
}

impl FromStr for Manifest {
    type Err = DashError;

    fn from_str(document: &str) -> Result<Self, Self::Err> {
        parse_mpd(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn representation(media: &str) -> Representation {
        Representation {
            id: 1,
            bandwidth: 1_000,
            media: media.to_string(),
            initialization: "init.mp4".to_string(),
        }
    }

    #[test]
    fn media_path_fills_the_number_slot() {
        assert_eq!(representation("tile1_{}.m4s").media_path(7), "tile1_7.m4s");
        assert_eq!(representation("seg_{:05}.m4s").media_path(42), "seg_00042.m4s");
        assert_eq!(representation("static.m4s").media_path(3), "static.m4s");
    }
}
