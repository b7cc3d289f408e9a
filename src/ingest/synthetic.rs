//! Synthetic scripted camera (`stub://<scene>`).
//!
//! Renders a flat background with a skin-toned hand shape so the whole
//! pipeline can run without hardware. Scenes:
//! - `still`: hand present and motionless
//! - `moving`: hand sweeping horizontally
//! - `empty`: no hand
//! - `cycle`: empty, still, moving, empty, repeating
//!
//! `?warmup=N` makes the first N frames zero-sized, like a camera that has
//! not delivered its first picture yet.

use anyhow::{anyhow, Context, Result};
use image::{Rgb, RgbImage};
use url::Url;

use super::CameraConfig;
use crate::frame::Frame;

pub const BACKGROUND: Rgb<u8> = Rgb([30, 30, 40]);
pub const SKIN: Rgb<u8> = Rgb([224, 172, 140]);

const CYCLE_FRAMES: u64 = 150;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scene {
    Still,
    Moving,
    Empty,
    Cycle,
}

impl Scene {
    fn parse(name: &str) -> Result<Self> {
        match name {
            "still" => Ok(Scene::Still),
            "moving" => Ok(Scene::Moving),
            "empty" => Ok(Scene::Empty),
            "cycle" | "" => Ok(Scene::Cycle),
            other => Err(anyhow!(
                "unknown synthetic scene '{}'; expected still, moving, empty or cycle",
                other
            )),
        }
    }
}

pub struct SyntheticSource {
    config: CameraConfig,
    scene: Scene,
    warmup: u64,
    frame_count: u64,
}

impl SyntheticSource {
    pub fn new(config: CameraConfig) -> Result<Self> {
        let url = Url::parse(&config.url).context("parse synthetic camera url")?;
        let scene = Scene::parse(url.host_str().unwrap_or(""))?;
        let mut warmup = 0;
        for (key, value) in url.query_pairs() {
            if key == "warmup" {
                warmup = value
                    .parse()
                    .map_err(|_| anyhow!("warmup must be a frame count"))?;
            }
        }
        Ok(Self {
            config,
            scene,
            warmup,
            frame_count: 0,
        })
    }

    pub fn scene(&self) -> Scene {
        self.scene
    }

    /// Synthetic sources are always "connected".
    pub fn connect(&mut self) -> Result<()> {
        log::info!("SyntheticSource: connected to {}", self.config.url);
        Ok(())
    }

    pub fn next_frame(&mut self) -> Result<Frame> {
        self.frame_count += 1;
        if self.frame_count <= self.warmup {
            return Ok(Frame::not_ready(self.frame_count));
        }
        let n = self.frame_count - self.warmup - 1;
        let image = render_scene(self.config.width, self.config.height, hand_center(self.scene, n));
        Ok(Frame::from_image(image, self.frame_count))
    }

    pub fn is_healthy(&self) -> bool {
        true
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }
}

/// Normalized hand centre for frame `n` of a scene, `None` when no hand is shown.
fn hand_center(scene: Scene, n: u64) -> Option<(f32, f32)> {
    match scene {
        Scene::Still => Some((0.5, 0.55)),
        Scene::Moving => Some((0.25 + 0.02 * (n % 25) as f32, 0.55)),
        Scene::Empty => None,
        Scene::Cycle => match n % CYCLE_FRAMES {
            0..=14 => None,
            15..=104 => Some((0.5, 0.55)),
            k @ 105..=134 => Some((0.25 + 0.02 * ((k - 105) % 25) as f32, 0.55)),
            _ => None,
        },
    }
}

fn render_scene(width: u32, height: u32, center: Option<(f32, f32)>) -> RgbImage {
    let mut image = RgbImage::from_pixel(width, height, BACKGROUND);
    if let Some((cx, cy)) = center {
        draw_hand(&mut image, cx, cy);
    }
    image
}

/// Palm, four fingers and a thumb, sized relative to the frame.
fn draw_hand(image: &mut RgbImage, cx: f32, cy: f32) {
    let w = image.width() as f32;
    let h = image.height() as f32;
    let palm_w = 0.18 * w;
    let palm_h = 0.22 * h;
    let palm_x = cx * w - palm_w / 2.0;
    let palm_y = cy * h - palm_h / 2.0 + 0.06 * h;
    fill_rect(image, palm_x, palm_y, palm_w, palm_h);

    let finger_w = palm_w / 5.0;
    let finger_h = 0.16 * h;
    for i in 0..4 {
        let fx = palm_x + finger_w * 0.3 + i as f32 * (finger_w * 1.2);
        fill_rect(image, fx, palm_y - finger_h, finger_w, finger_h);
    }
    let thumb_w = 0.07 * w;
    let thumb_h = finger_w;
    fill_rect(image, palm_x - thumb_w, palm_y + palm_h * 0.3, thumb_w, thumb_h);
}

fn fill_rect(image: &mut RgbImage, x: f32, y: f32, w: f32, h: f32) {
    let x0 = x.max(0.0) as u32;
    let y0 = y.max(0.0) as u32;
    let x1 = ((x + w).max(0.0) as u32).min(image.width());
    let y1 = ((y + h).max(0.0) as u32).min(image.height());
    for py in y0..y1 {
        for px in x0..x1 {
            image.put_pixel(px, py, SKIN);
        }
    }
}
