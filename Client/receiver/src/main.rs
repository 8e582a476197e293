use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use dash_player::{ConstantSelector, PredictiveSelector, Selector, ViewportPredictor};
use tile_receiver::args::{get_log_level_filter, parse_args, Quality};
use tile_receiver::Session;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, Layer};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = parse_args();

    // Build the FmtSubscriber layer
    let fmt_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_filter(get_log_level_filter(&args));
    let subscriber = tracing_subscriber::registry().with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting tile receiver (headless)");
    info!("{:?}", args);

    let config = args.session_config()?;
    // The predictor needs the grid, which is only known once the manifest is parsed.
    let predictor: Arc<OnceLock<ViewportPredictor>> = Arc::new(OnceLock::new());
    let selector: Arc<dyn Selector> = match args.quality {
        Quality::Viewport => {
            let predictor = predictor.clone();
            Arc::new(move |x: u32, y: u32, count: usize| match predictor.get() {
                Some(predictor) => PredictiveSelector::new(|x, y| predictor.predict(x, y)).select(x, y, count),
                None => 0,
            })
        }
        Quality::Lowest => Arc::new(ConstantSelector::lowest()),
        Quality::Highest => Arc::new(ConstantSelector::highest()),
    };
    let degrade_factor = config.predict_degrade_factor;
    let mut session = Session::create(config, move |x: u32, y: u32, count: usize| selector.select(x, y, count))?;
    let grid = session.grid_size();
    let _ = predictor.set(ViewportPredictor::new(grid, degrade_factor));
    session.prefetch()?;

    let frame = session.frame_size();
    info!(
        "Streaming {}x{} tiles, frame {}x{}",
        grid.cols, grid.rows, frame.width, frame.height
    );

    let frame_duration = Duration::from_secs_f64(1.0 / args.fps.max(1) as f64);
    let deadline = args.duration.map(|seconds| Instant::now() + Duration::from_secs(seconds));
    let mut window = Instant::now();
    let mut consumed = 0u64;
    let mut field_of_view = 0u32;

    while session.available() {
        let start = Instant::now();
        for y in 0..grid.rows {
            for x in 0..grid.cols {
                if let Some(frame) = session.poll_tile(x, y) {
                    consumed += 1;
                    debug!(
                        "Tile ({}, {}) segment {} frame {} ({} bytes)",
                        x, y, frame.segment_number, frame.frame_index, frame.data.len()
                    );
                }
            }
        }

        if window.elapsed() >= Duration::from_secs(1) {
            info!("Consumed {} frames in the last second", consumed);
            consumed = 0;
            window = Instant::now();
            // Pan the field of view one tile per second.
            field_of_view = (field_of_view + 1) % grid.cols.max(1);
            if let Some(predictor) = predictor.get() {
                predictor.set_field_of_view(field_of_view, 0);
            }
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            info!("Requested duration elapsed");
            break;
        }

        let elapsed = start.elapsed();
        if elapsed < frame_duration {
            std::thread::sleep(frame_duration - elapsed);
        } else {
            warn!("Frame consumption took longer than the target wait time.");
        }
    }

    session.shutdown();
    info!("{}", session.gather_metrics());
    Ok(())
}
