use std::time::Duration;

use dash_player::mpd::builder::MpdBuilder;
use dash_player::mpd::{parse_mpd, Manifest};
use dash_player::segment::{fetch_manifest, resolve_segment_url, MemoryTransport};
use dash_player::{DashError, ParseError};
use rstest::{fixture, rstest};
use shared_utils::TileCoordinate;

/// A 2x2 tiled presentation as a packager writes it: tiles out of raster
/// order, per-representation templates, padded segment numbers and an audio
/// track in the middle of the period.
const PACKAGED: &str = r#"<?xml version="1.0"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" minBufferTime="PT1.500S" type="static"
     mediaPresentationDuration="PT0H1M0.000S" maxSegmentDuration="PT0H0M1.000S"
     profiles="urn:mpeg:dash:profile:isoff-live:2011">
  <ProgramInformation moreInformationURL="http://gpac.io">
    <Title>gallery.mpd generated by GPAC</Title>
  </ProgramInformation>
  <Period duration="PT0H1M0.000S">
    <AdaptationSet segmentAlignment="true" maxWidth="960" maxHeight="540" maxFrameRate="30" par="16:9" lang="und">
      <SupplementalProperty schemeIdUri="urn:mpeg:dash:srd:2014" value="1,1,1,1,1,2,2"/>
      <Representation id="3" mimeType="video/mp4" codecs="hvc1.1.6.L93.90" width="960" height="540" bandwidth="800000">
        <SegmentTemplate media="tile4_$RepresentationID$_$Number%05d$.m4s" initialization="tile4_$RepresentationID$_init.mp4" timescale="30000" duration="30000" startNumber="1"/>
      </Representation>
      <Representation id="4" mimeType="video/mp4" codecs="hvc1.1.6.L93.90" width="960" height="540" bandwidth="2400000">
        <SegmentTemplate media="tile4_$RepresentationID$_$Number%05d$.m4s" initialization="tile4_$RepresentationID$_init.mp4" timescale="30000" duration="30000" startNumber="1"/>
      </Representation>
    </AdaptationSet>
    <AdaptationSet segmentAlignment="true" maxWidth="960" maxHeight="540">
      <SupplementalProperty schemeIdUri="urn:mpeg:dash:srd:2014" value="1,0,0,1,1,2,2"/>
      <Representation id="1" mimeType="video/mp4" codecs="hvc1.1.6.L93.90" bandwidth="800000">
        <SegmentTemplate media="tile1_$RepresentationID$_$Number%05d$.m4s" initialization="tile1_$RepresentationID$_init.mp4"/>
      </Representation>
      <Representation id="2" mimeType="video/mp4" codecs="hvc1.1.6.L93.90" bandwidth="2400000">
        <SegmentTemplate media="tile1_$RepresentationID$_$Number%05d$.m4s" initialization="tile1_$RepresentationID$_init.mp4"/>
      </Representation>
    </AdaptationSet>
    <AdaptationSet segmentAlignment="true" lang="und">
      <Representation id="9" mimeType="audio/mp4" codecs="mp4a.40.2" audioSamplingRate="48000" bandwidth="128000">
        <SegmentTemplate media="audio_$Number%05d$.m4s" initialization="audio_init.mp4"/>
      </Representation>
    </AdaptationSet>
    <AdaptationSet segmentAlignment="true" maxWidth="960" maxHeight="540">
      <SupplementalProperty schemeIdUri="urn:mpeg:dash:srd:2014" value="1,1,0,1,1,2,2"/>
      <Representation id="5" mimeType="video/mp4" codecs="hvc1.1.6.L93.90" bandwidth="800000">
        <SegmentTemplate media="tile2_$RepresentationID$_$Number%05d$.m4s" initialization="tile2_$RepresentationID$_init.mp4"/>
      </Representation>
    </AdaptationSet>
    <AdaptationSet segmentAlignment="true" maxWidth="960" maxHeight="540">
      <SupplementalProperty schemeIdUri="urn:mpeg:dash:srd:2014" value="1,0,1,1,1,2,2"/>
      <SegmentTemplate media="tile3_$RepresentationID$_$Number$.m4s" initialization="tile3_$RepresentationID$_init.mp4"/>
      <Representation id="7" mimeType="video/mp4" codecs="hvc1.1.6.L93.90" bandwidth="800000"/>
    </AdaptationSet>
  </Period>
</MPD>
"#;

#[fixture]
fn packaged() -> Manifest {
    parse_mpd(PACKAGED).expect("packaged manifest parses")
}

#[rstest]
fn root_attributes(packaged: Manifest) {
    assert_eq!(packaged.title, "gallery.mpd generated by GPAC");
    assert_eq!(packaged.presentation_duration, Some(Duration::from_secs(60)));
    assert_eq!(packaged.min_buffer_time, Some(Duration::from_millis(1500)));
    assert_eq!(packaged.max_segment_duration, Some(Duration::from_secs(1)));
}

#[rstest]
fn tiles_are_stored_in_raster_order(packaged: Manifest) {
    assert_eq!(packaged.grid_size().cols, 2);
    assert_eq!(packaged.grid_size().rows, 2);
    assert_eq!(packaged.tile_count(), 4);
    let coordinates: Vec<_> = packaged.coordinates().collect();
    assert_eq!(
        coordinates,
        vec![
            TileCoordinate::new(0, 0),
            TileCoordinate::new(1, 0),
            TileCoordinate::new(0, 1),
            TileCoordinate::new(1, 1),
        ]
    );
    for coordinate in coordinates {
        let set = packaged.video_set(coordinate.x, coordinate.y);
        assert_eq!(set.coordinate, coordinate);
        assert_eq!(set.width, 960);
        assert_eq!(set.codecs, "hvc1.1.6.L93.90");
        assert_eq!(set.mime_type, "video/mp4");
    }
}

#[rstest]
fn segment_templates(packaged: Manifest) {
    let tile = packaged.video_set(1, 1);
    assert_eq!(tile.representations.len(), 2);
    assert_eq!(tile.representation(1).id, 4);
    assert_eq!(tile.representation(1).bandwidth, 2_400_000);
    assert_eq!(tile.representation(1).media_path(12), "tile4_4_00012.m4s");
    assert_eq!(tile.representation(1).initialization_path(), "tile4_4_init.mp4");

    // Template inherited from the adaptation set.
    let inherited = packaged.video_set(0, 1).representation(0);
    assert_eq!(inherited.media_path(3), "tile3_7_3.m4s");
    assert_eq!(inherited.initialization_path(), "tile3_7_init.mp4");
}

#[rstest]
fn audio_track(packaged: Manifest) {
    let audio = packaged.audio_set().expect("audio set");
    assert_eq!(audio.sample_rate, 48_000);
    assert_eq!(audio.codecs, "mp4a.40.2");
    assert_eq!(audio.mime_type, "audio/mp4");
    assert_eq!(audio.representation.media_path(2), "audio_00002.m4s");
}

#[rstest]
fn pixel_scale_keeps_the_transposed_division(packaged: Manifest) {
    // Four 960x540 tiles: widths sum to 3840 over two rows, heights to 2160
    // over two columns.
    assert_eq!(packaged.frame_size().width, 1920);
    assert_eq!(packaged.frame_size().height, 1080);
    assert_eq!(packaged.tile_size().width, 960);
    assert_eq!(packaged.tile_size().height, 540);
}

#[rstest]
#[case(1, 1)]
#[case(3, 3)]
#[case(4, 2)]
fn builder_output_parses(#[case] cols: u32, #[case] rows: u32, #[values(false, true)] inline: bool) {
    let xml = MpdBuilder::tiled(cols, rows)
        .title("built")
        .tile_size(320, 180)
        .presentation_duration(Duration::from_millis(123_500))
        .inline_templates(inline)
        .add_representation(0, 500_000)
        .add_representation(1, 1_500_000)
        .audio("mp4a.40.2", 44_100, 96_000)
        .build_xml_string()
        .unwrap();
    let manifest: Manifest = xml.parse().unwrap();

    assert_eq!(manifest.title, "built");
    assert_eq!(manifest.presentation_duration, Some(Duration::from_millis(123_500)));
    assert_eq!(manifest.tile_count(), (cols * rows) as usize);
    for y in 0..rows {
        for x in 0..cols {
            let index = manifest.tile_index(x, y);
            assert_eq!(manifest.tile_coordinate(index), TileCoordinate::new(x, y));
            let rep = manifest.video_set(x, y).representation(1);
            assert_eq!(rep.media_path(5), MpdBuilder::media_path(index, 1, 5));
            assert_eq!(rep.initialization_path(), MpdBuilder::initialization_path(index, 1));
        }
    }
    assert_eq!(manifest.audio_set().map(|audio| audio.sample_rate), Some(44_100));
}

#[test]
fn audio_is_optional() {
    let xml = MpdBuilder::tiled(2, 1).add_representation(0, 1).build_xml_string().unwrap();
    let manifest = parse_mpd(&xml).unwrap();
    assert!(manifest.audio_set().is_none());
    assert!(manifest.presentation_duration.is_none());
}

#[test]
#[should_panic(expected = "outside grid")]
fn video_set_outside_the_grid_panics() {
    let xml = MpdBuilder::tiled(2, 2).add_representation(0, 1).build_xml_string().unwrap();
    parse_mpd(&xml).unwrap().video_set(2, 0);
}

fn replaced(from: &str, to: &str) -> String {
    assert!(PACKAGED.contains(from), "fixture lacks {from}");
    PACKAGED.replacen(from, to, 1)
}

#[rstest]
#[case::bad_duration(replaced(r#"minBufferTime="PT1.500S""#, r#"minBufferTime="PT1S""#))]
#[case::non_numeric_id(replaced(r#"id="3""#, r#"id="high""#))]
#[case::non_numeric_bandwidth(replaced(r#"bandwidth="2400000""#, r#"bandwidth="fast""#))]
#[case::outside_grid(replaced("1,1,1,1,1,2,2", "1,2,1,1,1,2,2"))]
#[case::duplicate_tile(replaced("1,1,1,1,1,2,2", "1,0,0,1,1,2,2"))]
#[case::oversized_grid(replaced("1,1,1,1,1,2,2", "1,1,1,1,1,70000,70000"))]
#[case::more_tiles_than_sets(replaced("1,1,1,1,1,2,2", "1,1,1,1,1,3,2"))]
#[case::short_descriptor(replaced("1,1,1,1,1,2,2", "1,1,1"))]
#[case::truncated(PACKAGED[..PACKAGED.len() / 2].to_string())]
#[case::mismatched_tags(replaced("</Period>", "</Perio>"))]
#[case::no_root("<Manifest/>".to_string())]
#[case::missing_media(replaced(r#"media="tile3_$RepresentationID$_$Number$.m4s""#, ""))]
#[case::media_without_number(replaced("tile3_$RepresentationID$_$Number$.m4s", "tile3.m4s"))]
fn malformed_manifests_are_parse_errors(#[case] xml: String) {
    let error = parse_mpd(&xml).unwrap_err();
    assert!(matches!(error, DashError::Parse(_)), "{error:?}");
}

#[rstest]
#[case("70000,70000")]
#[case("65536,65536")]
#[case("3,3")]
fn grid_larger_than_the_tile_sets_is_a_layout_error(#[case] totals: &str) {
    let xml = replaced("1,1,1,1,1,2,2", &format!("1,1,1,1,1,{totals}"));
    let outcome = std::panic::catch_unwind(|| parse_mpd(&xml));
    assert!(
        matches!(outcome, Ok(Err(DashError::Parse(ParseError::Layout(_))))),
        "{totals}: {outcome:?}"
    );
}

#[test]
fn bad_duration_is_reported_as_such() {
    let xml = replaced(r#"mediaPresentationDuration="PT0H1M0.000S""#, r#"mediaPresentationDuration="P1D""#);
    assert!(matches!(parse_mpd(&xml), Err(DashError::Parse(ParseError::Duration(_)))));
}

#[tokio::test]
async fn manifest_is_fetched_through_the_transport() {
    let url = "http://host/gallery/stream.mpd";
    let transport = MemoryTransport::new();
    transport.insert(url, PACKAGED);

    let manifest = fetch_manifest(&transport, url).await.unwrap();
    let rep = manifest.video_set(0, 0).representation(0);
    assert_eq!(
        resolve_segment_url(url, &rep.media_path(1)),
        "http://host/gallery/tile1_1_00001.m4s"
    );

    let missing = fetch_manifest(&transport, "http://host/other.mpd").await;
    assert!(matches!(missing, Err(DashError::BadResponse(_))));
}
