use dash_player::segment::{fetch_manifest, resolve_segment_url, HttpTransport};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // let mpd_url = "http://localhost:8080/gallery/tiled.mpd";
    let mpd_url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://127.0.0.1:3001/dash/tiled.mpd".to_string());

    let transport = HttpTransport::new();
    let manifest = fetch_manifest(&transport, &mpd_url).await?;

    println!("{} ({})", manifest.title, mpd_url);
    println!(
        "grid {}x{}, frame {}x{}, tile {}x{}",
        manifest.grid.cols,
        manifest.grid.rows,
        manifest.frame_size().width,
        manifest.frame_size().height,
        manifest.tile_size().width,
        manifest.tile_size().height
    );
    if let Some(duration) = manifest.presentation_duration {
        println!("duration {:.3}s", duration.as_secs_f64());
    }
    for set in &manifest.video_sets {
        let index = manifest.tile_index(set.coordinate.x, set.coordinate.y);
        println!("tile {} {} {} {}", index, set.coordinate, set.mime_type, set.codecs);
        for rep in &set.representations {
            println!(
                "  rep {} {} bps {}",
                rep.id,
                rep.bandwidth,
                resolve_segment_url(&mpd_url, &rep.media_path(1))
            );
        }
    }
    if let Some(audio) = manifest.audio_set() {
        println!("audio {} {} Hz {}", audio.mime_type, audio.sample_rate, audio.codecs);
    }
    Ok(())
}
