//! Stand-in vision producer.
//!
//! Writes a moving distance field, a few dozen telemetry series and an RGBA
//! frame into the segment, and reflects the bridge's control writes back as
//! `*_feedback` series so the whole loop can be exercised without a camera.

use anyhow::Context;
use pulsescope_config::SimConfig;
use pulsescope_shm::{ControlFields, ESDF_CELLS, ESDF_WIDTH, SegmentProducer};
use std::collections::BTreeMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing_subscriber::EnvFilter;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

fn fill_distance_field(cells: &mut [f32; ESDF_CELLS], t: f32) {
    let ox1 = 50.0 + (t * 0.9).sin() * 18.0;
    let oy1 = 45.0 + (t * 0.8).cos() * 14.0;
    let ox2 = 24.0 + (t * 0.5).sin() * 12.0;
    let oy2 = 75.0 + (t * 0.4).cos() * 10.0;

    for (idx, cell) in cells.iter_mut().enumerate() {
        let x = (idx % ESDF_WIDTH) as f32;
        let y = (idx / ESDF_WIDTH) as f32;
        let d1 = (x - ox1).hypot(y - oy1) / 18.0;
        let d2 = (x - ox2).hypot(y - oy2) / 14.0;
        let wave = 0.35 + 0.22 * (t * 1.4 + x * 0.08).sin() + 0.14 * (t * 1.1 + y * 0.07).cos();
        *cell = (d1.min(d2) + wave).clamp(0.0, 4.0);
    }
}

fn telemetry(
    t: f64,
    fps: f64,
    frame_id: u64,
    controls: &ControlFields,
    config: &SimConfig,
) -> BTreeMap<String, f64> {
    let mut series: BTreeMap<String, f64> = [
        ("ekf_x", 20.0 + (t * 1.7).sin() * 6.0 + (t * 0.3).sin() * 2.0),
        ("ekf_y", 24.0 + (t * 1.3).cos() * 5.0 + (t * 0.4).cos() * 3.0),
        ("target_dist", 2.2 + 0.7 * (t * 0.9).sin()),
        ("fps", fps),
        ("latency", 1.2 + (t * 2.8).sin().abs() * 0.7),
        ("pid_error", (t * 2.3).sin() * 1.6 + (t * 1.1).cos() * 0.4),
        ("gimbal_yaw", (t * 1.1).sin() * 28.0),
        ("gimbal_pitch", (t * 0.8).cos() * 14.0),
        ("pid_p_feedback", f64::from(controls.pid_p)),
        ("pid_i_feedback", f64::from(controls.pid_i)),
        ("pid_d_feedback", f64::from(controls.pid_d)),
        ("exposure_feedback", f64::from(controls.exposure_time)),
        ("fire_enabled_feedback", f64::from(controls.fire_enable)),
        ("frame_id", frame_id as f64),
        ("stress_channel_count", f64::from(config.stress_series)),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    let noise = f64::from(config.noise_level) / 100.0;
    for idx in 0..config.stress_series {
        let i = f64::from(idx);
        let f = 0.4 + f64::from(idx % 13) * 0.17;
        let phase = i * 0.37;
        let signal = (t * f + phase).sin() * (1.0 + f64::from(idx % 7) * 0.15)
            + 0.35 * (t * f * 1.7 + phase * 0.4).cos()
            + noise * (t * 50.0 + i * 1.9).sin();
        series.insert(format!("stress_{idx}"), signal);
    }
    series
}

fn paint_frame(rgba: &mut [u8], width: u32, height: u32, t: f32) {
    let (w, h) = (width as usize, height as usize);
    for y in 0..h {
        for x in 0..w {
            let nx = x as f32 / w as f32;
            let ny = y as f32 / h as f32;
            let px = &mut rgba[(y * w + x) * 4..][..4];
            px[0] = (16.0 + 26.0 * ny + 8.0 * (t * 0.8).sin()) as u8;
            px[1] = (28.0 + 80.0 * nx) as u8;
            px[2] = (42.0 + 48.0 * (0.5 + 0.5 * (t * 1.4 + nx * 6.0).sin())) as u8;
            px[3] = 255;
        }
    }

    let mut dot = |x: i64, y: i64, color: [u8; 3]| {
        if x < 0 || y < 0 || x >= w as i64 || y >= h as i64 {
            return;
        }
        let offset = (y as usize * w + x as usize) * 4;
        rgba[offset..offset + 3].copy_from_slice(&color);
        rgba[offset + 3] = 255;
    };

    let cx = ((0.5 + 0.35 * (t * 0.9).sin()) * w as f32) as i64;
    let cy = ((0.5 + 0.30 * (t * 1.1).cos()) * h as f32) as i64;
    let (bw, bh) = (28, 18);
    let cyan = [34, 211, 238];
    for x in cx - bw..=cx + bw {
        dot(x, cy - bh, cyan);
        dot(x, cy + bh, cyan);
    }
    for y in cy - bh..=cy + bh {
        dot(cx - bw, y, cyan);
        dot(cx + bw, y, cyan);
    }
    for d in -10..=10 {
        dot(cx + d, cy, [255; 3]);
        dot(cx, cy + d, [255; 3]);
    }
}

fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => SimConfig::load(&path).with_context(|| format!("loading {path}"))?,
        None => SimConfig::default(),
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let producer = SegmentProducer::create(&config.shm_path)
        .with_context(|| format!("creating {}", config.shm_path))?;
    producer.set_gains(1.0, 0.0, 0.1);
    tracing::info!(
        path = %config.shm_path,
        update_hz = config.update_hz,
        map_hz = config.map_hz,
        stress_series = config.stress_series,
        "simulator publishing"
    );

    let frame_period = Duration::from_micros(1_000_000 / u64::from(config.update_hz));
    let map_period = Duration::from_micros(1_000_000 / u64::from(config.map_hz));

    let mut cells = [0.0f32; ESDF_CELLS];
    let mut rgba = vec![0u8; config.video_width as usize * config.video_height as usize * 4];

    let start = Instant::now();
    let mut last_frame = start;
    let mut next_frame = start;
    let mut next_map = start;
    let mut frame_id: u64 = 0;
    let mut frame_warned = false;

    loop {
        next_frame += frame_period;
        let now = Instant::now();
        let t = now.duration_since(start).as_secs_f64();

        let dt = now.duration_since(last_frame).as_secs_f64();
        last_frame = now;
        let fps = if dt > 0.0 { 1.0 / dt } else { f64::from(config.update_hz) };

        let controls = producer.poll_controls();
        let json = sonic_rs::to_vec(&telemetry(t, fps, frame_id, &controls, &config))
            .context("encoding telemetry")?;
        paint_frame(&mut rgba, config.video_width, config.video_height, t as f32);

        let map_due = now >= next_map;
        if map_due {
            fill_distance_field(&mut cells, t as f32);
            while next_map <= now {
                next_map += map_period;
            }
        }

        {
            let w = producer.begin_write()?;
            w.set_timestamp_ms(now_ms());
            if map_due {
                w.write_grid(&cells);
            }
            if !w.write_telemetry_json(&json) {
                tracing::warn!(bytes = json.len(), "telemetry too large, frame skipped");
            }
            if !w.write_rgba_frame(config.video_width, config.video_height, &rgba) && !frame_warned {
                tracing::warn!(
                    width = config.video_width,
                    height = config.video_height,
                    "video frame does not fit the image region"
                );
                frame_warned = true;
            }
        }
        frame_id += 1;

        if frame_id % u64::from(config.update_hz * 10) == 0 {
            tracing::debug!(frame_id, ?controls, "still publishing");
        }

        let now = Instant::now();
        if next_frame > now {
            std::thread::sleep(next_frame - now);
        }
    }
}
