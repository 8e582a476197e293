use std::io::Cursor;
use std::time::Duration;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

/// One rung of the bitrate ladder shared by every tile.
#[derive(Debug, Clone)]
pub struct RepresentationDef {
    pub id: u32,
    pub bandwidth: u64,
}

#[derive(Debug, Clone)]
pub struct AudioDef {
    pub codecs: String,
    pub sample_rate: u32,
    pub bandwidth: u64,
}

/// Writes tiled on-demand MPDs in the layout the parser reads.
///
/// Tile `i` (1-based, `x + y * cols + 1`) gets
/// `tile{i}_rep$RepresentationID$_$Number$.m4s` media segments and a
/// `tile{i}_rep$RepresentationID$_init.mp4` initialization segment.
#[derive(Debug, Clone)]
pub struct MpdBuilder {
    pub title: String,
    pub cols: u32,
    pub rows: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub codecs: String,
    pub presentation_duration: Option<Duration>,
    pub min_buffer_time: Option<Duration>,
    pub max_segment_duration: Option<Duration>,
    /// Put the segment template on every representation instead of on the adaptation set.
    pub inline_templates: bool,
    pub representations: Vec<RepresentationDef>,
    pub audio: Option<AudioDef>,
}

impl MpdBuilder {
    pub fn tiled(cols: u32, rows: u32) -> Self {
        Self {
            title: String::new(),
            cols,
            rows,
            tile_width: 640,
            tile_height: 640,
            codecs: "hvc1.1.6.L93.90".to_string(),
            presentation_duration: None,
            min_buffer_time: None,
            max_segment_duration: None,
            inline_templates: false,
            representations: vec![],
            audio: None,
        }
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    pub fn tile_size(mut self, width: u32, height: u32) -> Self {
        self.tile_width = width;
        self.tile_height = height;
        self
    }

    pub fn codecs(mut self, codecs: &str) -> Self {
        self.codecs = codecs.to_string();
        self
    }

    pub fn presentation_duration(mut self, duration: Duration) -> Self {
        self.presentation_duration = Some(duration);
        self
    }

    pub fn min_buffer_time(mut self, duration: Duration) -> Self {
        self.min_buffer_time = Some(duration);
        self
    }

    pub fn max_segment_duration(mut self, duration: Duration) -> Self {
        self.max_segment_duration = Some(duration);
        self
    }

    pub fn inline_templates(mut self, inline: bool) -> Self {
        self.inline_templates = inline;
        self
    }

    /// Adds a representation to every tile. Ladder order is kept as given.
    pub fn add_representation(mut self, id: u32, bandwidth: u64) -> Self {
        self.representations.push(RepresentationDef { id, bandwidth });
        self
    }

    pub fn audio(mut self, codecs: &str, sample_rate: u32, bandwidth: u64) -> Self {
        self.audio = Some(AudioDef {
            codecs: codecs.to_string(),
            sample_rate,
            bandwidth,
        });
        self
    }

    pub fn media_path(tile_index: u32, representation_id: u32, segment_number: u64) -> String {
        format!("tile{tile_index}_rep{representation_id}_{segment_number}.m4s")
    }

    pub fn initialization_path(tile_index: u32, representation_id: u32) -> String {
        format!("tile{tile_index}_rep{representation_id}_init.mp4")
    }

    pub fn audio_media_path(segment_number: u64) -> String {
        format!("audio_{segment_number}.m4s")
    }

    pub fn audio_initialization_path() -> &'static str {
        "audio_init.mp4"
    }

    /**
     * Build the MPD XML string.
     * Adaptation sets are written in raster order, one per tile, followed by
     * the audio set if one was configured.
     */
    pub fn build_xml_string(&self) -> Result<String, Box<dyn std::error::Error>> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));

        let mut mpd = BytesStart::new("MPD");
        mpd.push_attribute(("xmlns", "urn:mpeg:dash:schema:mpd:2011"));
        mpd.push_attribute(("type", "static"));
        mpd.push_attribute(("profiles", "urn:mpeg:dash:profile:isoff-live:2011"));
        if let Some(duration) = self.presentation_duration {
            mpd.push_attribute(("mediaPresentationDuration", format_duration(duration).as_str()));
        }
        if let Some(duration) = self.min_buffer_time {
            mpd.push_attribute(("minBufferTime", format_duration(duration).as_str()));
        }
        if let Some(duration) = self.max_segment_duration {
            mpd.push_attribute(("maxSegmentDuration", format_duration(duration).as_str()));
        }
        writer.write_event(Event::Start(mpd))?;

        writer.write_event(Event::Start(BytesStart::new("ProgramInformation")))?;
        writer.write_event(Event::Start(BytesStart::new("Title")))?;
        writer.write_event(Event::Text(BytesText::new(&self.title)))?;
        writer.write_event(Event::End(BytesEnd::new("Title")))?;
        writer.write_event(Event::End(BytesEnd::new("ProgramInformation")))?;

        writer.write_event(Event::Start(BytesStart::new("Period")))?;
        for y in 0..self.rows {
            for x in 0..self.cols {
                self.write_tile(&mut writer, x, y)?;
            }
        }
        if let Some(audio) = &self.audio {
            self.write_audio(&mut writer, audio)?;
        }
        writer.write_event(Event::End(BytesEnd::new("Period")))?;
        writer.write_event(Event::End(BytesEnd::new("MPD")))?;

        let result = writer.into_inner().into_inner();
        Ok(String::from_utf8(result)?)
    }

    fn write_tile(&self, writer: &mut Writer<Cursor<Vec<u8>>>, x: u32, y: u32) -> Result<(), Box<dyn std::error::Error>> {
        let tile_index = x + y * self.cols + 1;
        let media = format!("tile{tile_index}_rep$RepresentationID$_$Number$.m4s");
        let initialization = format!("tile{tile_index}_rep$RepresentationID$_init.mp4");

        let mut adaptation = BytesStart::new("AdaptationSet");
        adaptation.push_attribute(("segmentAlignment", "true"));
        adaptation.push_attribute(("maxWidth", self.tile_width.to_string().as_str()));
        adaptation.push_attribute(("maxHeight", self.tile_height.to_string().as_str()));
        writer.write_event(Event::Start(adaptation))?;

        let mut srd = BytesStart::new("SupplementalProperty");
        srd.push_attribute(("schemeIdUri", "urn:mpeg:dash:srd:2014"));
        let value = format!("0,{x},{y},1,1,{},{}", self.cols, self.rows);
        srd.push_attribute(("value", value.as_str()));
        writer.write_event(Event::Empty(srd))?;

        if !self.inline_templates {
            write_template(writer, &initialization, &media)?;
        }
        for rep in &self.representations {
            let mut rep_el = BytesStart::new("Representation");
            rep_el.push_attribute(("id", rep.id.to_string().as_str()));
            rep_el.push_attribute(("mimeType", "video/mp4"));
            rep_el.push_attribute(("codecs", self.codecs.as_str()));
            rep_el.push_attribute(("width", self.tile_width.to_string().as_str()));
            rep_el.push_attribute(("height", self.tile_height.to_string().as_str()));
            rep_el.push_attribute(("bandwidth", rep.bandwidth.to_string().as_str()));
            if self.inline_templates {
                writer.write_event(Event::Start(rep_el))?;
                write_template(writer, &initialization, &media)?;
                writer.write_event(Event::End(BytesEnd::new("Representation")))?;
            } else {
                writer.write_event(Event::Empty(rep_el))?;
            }
        }

        writer.write_event(Event::End(BytesEnd::new("AdaptationSet")))?;
        Ok(())
    }

    fn write_audio(&self, writer: &mut Writer<Cursor<Vec<u8>>>, audio: &AudioDef) -> Result<(), Box<dyn std::error::Error>> {
        let mut adaptation = BytesStart::new("AdaptationSet");
        adaptation.push_attribute(("segmentAlignment", "true"));
        adaptation.push_attribute(("lang", "und"));
        writer.write_event(Event::Start(adaptation))?;

        let mut rep_el = BytesStart::new("Representation");
        rep_el.push_attribute(("id", "0"));
        rep_el.push_attribute(("mimeType", "audio/mp4"));
        rep_el.push_attribute(("codecs", audio.codecs.as_str()));
        rep_el.push_attribute(("audioSamplingRate", audio.sample_rate.to_string().as_str()));
        rep_el.push_attribute(("bandwidth", audio.bandwidth.to_string().as_str()));
        writer.write_event(Event::Start(rep_el))?;
        write_template(writer, Self::audio_initialization_path(), "audio_$Number$.m4s")?;
        writer.write_event(Event::End(BytesEnd::new("Representation")))?;

        writer.write_event(Event::End(BytesEnd::new("AdaptationSet")))?;
        Ok(())
    }
}

fn write_template(writer: &mut Writer<Cursor<Vec<u8>>>, initialization: &str, media: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut template = BytesStart::new("SegmentTemplate");
    template.push_attribute(("timescale", "1000"));
    template.push_attribute(("duration", "1000"));
    template.push_attribute(("startNumber", "1"));
    template.push_attribute(("initialization", initialization));
    template.push_attribute(("media", media));
    writer.write_event(Event::Empty(template))?;
    Ok(())
}

/// Formats a duration in the `PT[nH][nM]n.nnnS` form the parser accepts.
pub fn format_duration(duration: Duration) -> String {
    let total_millis = duration.as_millis() as u64;
    let hours = total_millis / 3_600_000;
    let minutes = (total_millis / 60_000) % 60;
    let seconds = (total_millis % 60_000) as f64 / 1000.0;
    if hours > 0 {
        format!("PT{hours}H{minutes}M{seconds:.3}S")
    } else if minutes > 0 {
        format!("PT{minutes}M{seconds:.3}S")
    } else {
        format!("PT{seconds:.3}S")
    }
}
