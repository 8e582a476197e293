use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use once_cell::sync::Lazy;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use shared_utils::TileCoordinate;
use tracing::{debug, warn};

use crate::error::{DashResult, DurationParseError, ParseError};
use crate::mpd::{
    AudioAdaptationSet, Dimension, GridSize, Manifest, Representation, VideoAdaptationSet,
};

static DURATION_HMS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^PT(?:(?:(\d+)H)?(\d+)M)?(\d+\.\d+)S$").expect("valid duration regex"));
static DURATION_S: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^PT(\d+\.\d+)S$").expect("valid duration regex"));
static NUMBER_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$Number(?:%0(\d+)d)?\$").expect("valid placeholder regex"));

type Attributes = HashMap<String, String>;

#[derive(Debug, Default)]
struct RawRepresentation {
    attributes: Attributes,
    template: Option<Attributes>,
}

#[derive(Debug, Default)]
struct RawAdaptationSet {
    attributes: Attributes,
    /// `(schemeIdUri, value)` of every SupplementalProperty.
    properties: Vec<(String, String)>,
    template: Option<Attributes>,
    representations: Vec<RawRepresentation>,
}

impl RawAdaptationSet {
    fn mime_type(&self) -> Option<&str> {
        self.representations
            .first()
            .and_then(|rep| rep.attributes.get("mimeType"))
            .or_else(|| self.attributes.get("mimeType"))
            .map(String::as_str)
    }

    fn is_audio(&self) -> bool {
        self.mime_type().is_some_and(|mime| mime.contains("audio"))
            || self.attributes.get("contentType").is_some_and(|content| content == "audio")
    }

    fn spatial_description(&self) -> Option<&str> {
        self.properties
            .iter()
            .find(|(scheme, _)| scheme.contains("srd"))
            .or_else(|| self.properties.first())
            .map(|(_, value)| value.as_str())
    }

    /// Looks an attribute up on the first representation, then on the set.
    fn inherited(&self, key: &str) -> Option<&str> {
        self.representations
            .first()
            .and_then(|rep| rep.attributes.get(key))
            .or_else(|| self.attributes.get(key))
            .map(String::as_str)
    }
}

#[derive(Debug, Default)]
struct RawDocument {
    root: Option<Attributes>,
    title: Option<String>,
    sets: Vec<RawAdaptationSet>,
}

/// Streaming collector for the handful of MPD elements a tiled player needs.
#[derive(Default)]
struct DocumentReader {
    document: RawDocument,
    depth: usize,
    periods: usize,
    in_program_information: bool,
    in_title: bool,
    current_set: Option<RawAdaptationSet>,
    current_rep: Option<RawRepresentation>,
}

impl DocumentReader {
    fn open(&mut self, element: &BytesStart) -> Result<(), ParseError> {
        match element.local_name().as_ref() {
            b"MPD" => self.document.root = Some(collect_attributes(element)?),
            b"ProgramInformation" => self.in_program_information = true,
            b"Title" if self.in_program_information => {
                self.in_title = true;
                self.document.title.get_or_insert_with(String::new);
            }
            b"Period" => self.periods += 1,
            // Only the first period carries the tiles we stream.
            b"AdaptationSet" if self.periods == 1 => {
                self.current_set = Some(RawAdaptationSet {
                    attributes: collect_attributes(element)?,
                    ..Default::default()
                });
            }
            b"SupplementalProperty" => {
                if let Some(set) = self.current_set.as_mut() {
                    let attributes = collect_attributes(element)?;
                    if let Some(value) = attributes.get("value") {
                        let scheme = attributes.get("schemeIdUri").cloned().unwrap_or_default();
                        set.properties.push((scheme, value.clone()));
                    }
                }
            }
            b"Representation" => {
                if self.current_set.is_some() {
                    self.current_rep = Some(RawRepresentation {
                        attributes: collect_attributes(element)?,
                        template: None,
                    });
                }
            }
            b"SegmentTemplate" => {
                let attributes = collect_attributes(element)?;
                if let Some(rep) = self.current_rep.as_mut() {
                    rep.template = Some(attributes);
                } else if let Some(set) = self.current_set.as_mut() {
                    set.template = Some(attributes);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn close(&mut self, name: &[u8]) {
        match name {
            b"ProgramInformation" => self.in_program_information = false,
            b"Title" => self.in_title = false,
            b"Representation" => {
                if let (Some(rep), Some(set)) = (self.current_rep.take(), self.current_set.as_mut()) {
                    set.representations.push(rep);
                }
            }
            b"AdaptationSet" => {
                if let Some(set) = self.current_set.take() {
                    self.document.sets.push(set);
                }
            }
            _ => {}
        }
    }

    fn text(&mut self, text: &str) {
        if self.in_title {
            if let Some(title) = self.document.title.as_mut() {
                title.push_str(text.trim());
            }
        }
    }
}

fn collect_attributes(element: &BytesStart) -> Result<Attributes, ParseError> {
    let mut attributes = HashMap::new();
    for attribute in element.attributes() {
        let attribute = attribute?;
        let key = std::str::from_utf8(attribute.key.local_name().as_ref())
            .map_err(|e| ParseError::Xml(e.to_string()))?
            .to_string();
        let value = attribute.unescape_value()?.to_string();
        attributes.insert(key, value);
    }
    Ok(attributes)
}

fn read_document(xml: &str) -> Result<RawDocument, ParseError> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut collector = DocumentReader::default();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) => {
                collector.depth += 1;
                collector.open(e)?;
            }
            Event::Empty(ref e) => {
                collector.open(e)?;
                collector.close(e.local_name().as_ref());
            }
            Event::End(ref e) => {
                collector.depth = collector.depth.saturating_sub(1);
                collector.close(e.local_name().as_ref());
            }
            Event::Text(ref e) => {
                let text = e.unescape()?;
                collector.text(&text);
            }
            Event::CData(ref e) => {
                let text = std::str::from_utf8(e).map_err(|e| ParseError::Xml(e.to_string()))?;
                collector.text(text);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if collector.depth != 0 {
        return Err(ParseError::Xml("unexpected end of document".to_string()));
    }
    Ok(collector.document)
}

/// Parses a tiled MPD document.
///
/// Video tiles and the audio track are assembled concurrently; both are joined
/// before this returns.
pub fn parse_mpd(xml: &str) -> DashResult<Manifest> {
    let document = read_document(xml)?;
    let root = document.root.ok_or(ParseError::MissingElement("MPD"))?;

    let presentation_duration = optional_duration(&root, "mediaPresentationDuration")?;
    let min_buffer_time = optional_duration(&root, "minBufferTime")?;
    let max_segment_duration = optional_duration(&root, "maxSegmentDuration")?;
    let title = document.title.unwrap_or_default();

    let (audio, video): (Vec<_>, Vec<_>) = document.sets.into_iter().partition(RawAdaptationSet::is_audio);
    let first_video = video.first().ok_or(ParseError::MissingElement("AdaptationSet"))?;
    let grid = parse_grid_size(first_video, video.len())?;
    if audio.len() > 1 {
        warn!("Manifest declares {} audio adaptation sets, using the first", audio.len());
    }

    let (video_sets, audio_set) = thread::scope(|scope| {
        let video_job = scope.spawn(|| build_video_sets(&video, grid));
        let audio_job = scope.spawn(|| audio.first().map(build_audio_set).transpose());
        (
            video_job.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)),
            audio_job.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)),
        )
    });
    let video_sets = video_sets?;
    let audio_set = audio_set?;
    let scale = parse_scale_size(&video_sets, grid);

    debug!(
        "Parsed manifest '{}': grid {}x{}, scale {}x{}, audio: {}",
        title,
        grid.cols,
        grid.rows,
        scale.width,
        scale.height,
        audio_set.is_some()
    );

    Ok(Manifest {
        title,
        presentation_duration,
        min_buffer_time,
        max_segment_duration,
        grid,
        scale,
        video_sets,
        audio_set,
    })
}

/// Parses `PT[nH][nM]n.nnnS` (hours only together with minutes) at
/// millisecond precision.
pub fn parse_duration(value: &str) -> Result<Duration, DurationParseError> {
    let mismatch = || DurationParseError(value.to_string());
    let (hours, minutes, seconds) = if let Some(caps) = DURATION_HMS.captures(value) {
        (
            caps.get(1).map(|m| m.as_str()),
            caps.get(2).map(|m| m.as_str()),
            caps.get(3).map(|m| m.as_str()),
        )
    } else if let Some(caps) = DURATION_S.captures(value) {
        (None, None, caps.get(1).map(|m| m.as_str()))
    } else {
        return Err(mismatch());
    };

    let whole = |part: Option<&str>| -> Result<u64, DurationParseError> {
        part.map_or(Ok(0), |digits| digits.parse::<u64>().map_err(|_| mismatch()))
    };
    let hours = whole(hours)?;
    let minutes = whole(minutes)?;
    let seconds = seconds
        .ok_or_else(mismatch)?
        .parse::<f64>()
        .map_err(|_| mismatch())?;
    let millis = (seconds * 1000.0).round() as u64;

    Ok(Duration::from_secs(hours * 3600 + minutes * 60) + Duration::from_millis(millis))
}

fn optional_duration(root: &Attributes, key: &'static str) -> Result<Option<Duration>, ParseError> {
    root.get(key)
        .map(|value| parse_duration(value).map_err(ParseError::from))
        .transpose()
}

/// Splits a spatial relationship descriptor into `x, y, w, h, total_w, total_h`.
/// A leading source id (seven fields) is discarded.
fn split_spatial_description(value: &str) -> Result<[u32; 6], ParseError> {
    let invalid = || ParseError::InvalidValue {
        attribute: "SupplementalProperty@value",
        value: value.to_string(),
    };
    let fields = value
        .split(',')
        .map(|field| field.trim().parse::<u32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| invalid())?;
    let positional = match fields.len() {
        7 => &fields[1..],
        6 => &fields[..],
        _ => return Err(invalid()),
    };
    let mut spatial = [0u32; 6];
    spatial.copy_from_slice(positional);
    Ok(spatial)
}

/// Every tile needs its own adaptation set, so the grid can never hold more
/// tiles than there are video sets.
fn parse_grid_size(set: &RawAdaptationSet, video_sets: usize) -> Result<GridSize, ParseError> {
    let description = set.spatial_description().ok_or(ParseError::MissingElement("SupplementalProperty"))?;
    let [_, _, _, _, total_w, total_h] = split_spatial_description(description)?;
    if total_w == 0 || total_h == 0 {
        return Err(ParseError::Layout(format!("empty grid {total_w}x{total_h}")));
    }
    match total_w.checked_mul(total_h) {
        Some(tiles) if tiles as usize <= video_sets => {}
        _ => {
            return Err(ParseError::Layout(format!(
                "grid {total_w}x{total_h} declared with {video_sets} video sets"
            )))
        }
    }
    Ok(GridSize { cols: total_w, rows: total_h })
}

fn parse_scale_size(video_sets: &[VideoAdaptationSet], grid: GridSize) -> Dimension {
    let (width, height) = video_sets
        .iter()
        .fold((0u64, 0u64), |(w, h), set| (w + set.width as u64, h + set.height as u64));
    // Widths are divided by the row count and heights by the column count.
    Dimension {
        width: (width / grid.rows as u64) as u32,
        height: (height / grid.cols as u64) as u32,
    }
}

fn parse_number<T: std::str::FromStr>(attribute: &'static str, value: &str) -> Result<T, ParseError> {
    value.trim().parse::<T>().map_err(|_| ParseError::InvalidValue {
        attribute,
        value: value.to_string(),
    })
}

fn build_video_sets(sets: &[RawAdaptationSet], grid: GridSize) -> Result<Vec<VideoAdaptationSet>, ParseError> {
    let mut slots: Vec<Option<VideoAdaptationSet>> = vec![None; (grid.cols * grid.rows) as usize];
    for raw in sets {
        let video_set = build_video_set(raw, grid)?;
        let index = video_set.coordinate.raster_index(grid.cols);
        if slots[index].is_some() {
            return Err(ParseError::Layout(format!("tile {} declared twice", video_set.coordinate)));
        }
        slots[index] = Some(video_set);
    }
    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.ok_or_else(|| {
                let missing = TileCoordinate::from_tile_index(index as u32 + 1, grid.cols);
                ParseError::Layout(format!("tile {missing} has no adaptation set"))
            })
        })
        .collect()
}

fn build_video_set(raw: &RawAdaptationSet, grid: GridSize) -> Result<VideoAdaptationSet, ParseError> {
    let description = raw.spatial_description().ok_or(ParseError::MissingElement("SupplementalProperty"))?;
    let [x, y, ..] = split_spatial_description(description)?;
    if x >= grid.cols || y >= grid.rows {
        return Err(ParseError::Layout(format!(
            "tile ({x}, {y}) outside grid {}x{}",
            grid.cols, grid.rows
        )));
    }

    let dimension = |keys: [&'static str; 2]| -> Result<u32, ParseError> {
        let value = raw
            .attributes
            .get(keys[0])
            .map(String::as_str)
            .or_else(|| raw.inherited(keys[1]))
            .ok_or(ParseError::MissingAttribute {
                element: "AdaptationSet",
                attribute: keys[0],
            })?;
        parse_number(keys[0], value)
    };
    let width = dimension(["maxWidth", "width"])?;
    let height = dimension(["maxHeight", "height"])?;

    let codecs = raw.inherited("codecs").ok_or(ParseError::MissingAttribute {
        element: "Representation",
        attribute: "codecs",
    })?;
    let mime_type = raw.mime_type().ok_or(ParseError::MissingAttribute {
        element: "Representation",
        attribute: "mimeType",
    })?;
    if raw.representations.is_empty() {
        return Err(ParseError::MissingElement("Representation"));
    }
    let representations = raw
        .representations
        .iter()
        .map(|rep| build_representation(rep, raw.template.as_ref(), true))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(VideoAdaptationSet {
        coordinate: TileCoordinate::new(x, y),
        width,
        height,
        codecs: codecs.to_string(),
        mime_type: mime_type.to_string(),
        representations,
    })
}

fn build_audio_set(raw: &RawAdaptationSet) -> Result<AudioAdaptationSet, ParseError> {
    let rep = raw.representations.first().ok_or(ParseError::MissingElement("Representation"))?;
    let sample_rate = raw.inherited("audioSamplingRate").ok_or(ParseError::MissingAttribute {
        element: "Representation",
        attribute: "audioSamplingRate",
    })?;
    Ok(AudioAdaptationSet {
        codecs: raw.inherited("codecs").unwrap_or_default().to_string(),
        mime_type: raw.mime_type().unwrap_or_default().to_string(),
        sample_rate: parse_number("audioSamplingRate", sample_rate)?,
        representation: build_representation(rep, raw.template.as_ref(), false)?,
    })
}

fn build_representation(
    raw: &RawRepresentation,
    set_template: Option<&Attributes>,
    numbered: bool,
) -> Result<Representation, ParseError> {
    let attribute = |key: &'static str| {
        raw.attributes.get(key).ok_or(ParseError::MissingAttribute {
            element: "Representation",
            attribute: key,
        })
    };
    let id = attribute("id")?;
    let bandwidth = attribute("bandwidth")?;
    // A template on the representation wins over one on the adaptation set.
    let template = raw
        .template
        .as_ref()
        .or(set_template)
        .ok_or(ParseError::MissingElement("SegmentTemplate"))?;
    let template_attribute = |key: &'static str| {
        template.get(key).ok_or(ParseError::MissingAttribute {
            element: "SegmentTemplate",
            attribute: key,
        })
    };
    let media = template_attribute("media")?;
    let initialization = template_attribute("initialization")?;

    let (media, has_number) = format_media_template(&substitute_identifiers(media, id, bandwidth));
    if numbered && !has_number {
        return Err(ParseError::InvalidValue {
            attribute: "SegmentTemplate@media",
            value: media,
        });
    }

    Ok(Representation {
        id: parse_number("id", id)?,
        bandwidth: parse_number("bandwidth", bandwidth)?,
        media,
        initialization: substitute_identifiers(initialization, id, bandwidth),
    })
}

fn substitute_identifiers(template: &str, id: &str, bandwidth: &str) -> String {
    template
        .replace("$RepresentationID$", id)
        .replace("$Bandwidth$", bandwidth)
}

/// Rewrites the first `$Number$` / `$Number%0Nd$` into a `{}` / `{:0N}` slot.
fn format_media_template(media: &str) -> (String, bool) {
    let Some(caps) = NUMBER_PLACEHOLDER.captures(media) else {
        return (media.to_string(), false);
    };
    let slot = match caps.get(1) {
        Some(width) => format!("{{:0{}}}", width.as_str()),
        None => "{}".to_string(),
    };
    (NUMBER_PLACEHOLDER.replace(media, slot.as_str()).into_owned(), true)
}
