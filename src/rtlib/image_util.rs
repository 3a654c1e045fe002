use std::path::Path;

use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};
use imageproc::{
    drawing::{draw_filled_circle_mut, draw_polygon_mut},
    point::Point,
};

use crate::result::{to_terr, ThumbError, ThumbResult};

pub const THUMB_SIZE: u32 = 60;
const BADGE_FRACTION: f32 = 0.3;
const BADGE_INSET: i32 = 2;

const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "avi", "mov", "wmv", "flv", "webm", "m4v", "mpg", "mpeg", "ts",
];
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "wav", "m4a", "aac", "ogg", "wma", "opus"];
const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "webp", "tif", "tiff", "heic",
];
const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "rar", "7z", "tar", "gz", "bz2", "xz", "iso"];
const PART_EXTENSIONS: &[&str] = &["part", "crdownload", "partial"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileType {
    Video,
    Audio,
    Image,
    Archive,
    Part,
    Other,
}

impl FileType {
    pub fn determine(path: &str) -> Self {
        let ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        let ext = ext.as_str();
        if VIDEO_EXTENSIONS.contains(&ext) {
            Self::Video
        } else if AUDIO_EXTENSIONS.contains(&ext) {
            Self::Audio
        } else if IMAGE_EXTENSIONS.contains(&ext) {
            Self::Image
        } else if ARCHIVE_EXTENSIONS.contains(&ext) {
            Self::Archive
        } else if PART_EXTENSIONS.contains(&ext) {
            Self::Part
        } else {
            Self::Other
        }
    }

    pub fn is_media(&self) -> bool {
        matches!(self, Self::Video | Self::Image)
    }
}

pub fn read_image(path: &Path) -> ThumbResult<DynamicImage> {
    image::ImageReader::open(path)
        .map_err(to_terr)?
        .with_guessed_format()
        .map_err(to_terr)?
        .decode()
        .map_err(|e| ThumbError::Generation(format!("could not decode {path:?}, {e:?}")))
}

pub fn load_from_memory(bytes: &[u8]) -> ThumbResult<DynamicImage> {
    image::load_from_memory(bytes)
        .map_err(|e| ThumbError::Generation(format!("could not decode buffer, {e:?}")))
}

/// Samples up to a 20x20 grid and reports blank when no sampled channel
/// differs from the first sample by more than 5. Seeking into leaders or
/// credits often yields such frames.
pub fn is_blank_image(im: &DynamicImage) -> bool {
    let (w, h) = im.dimensions();
    if w <= 1 || h <= 1 {
        return true;
    }
    let step_x = (w / 20).max(1);
    let step_y = (h / 20).max(1);
    let first = im.get_pixel(0, 0);
    let mut y = 0;
    while y < h {
        let mut x = 0;
        while x < w {
            let px = im.get_pixel(x, y);
            for c in 0..4 {
                if px.0[c].abs_diff(first.0[c]) > 5 {
                    return false;
                }
            }
            x += step_x;
        }
        y += step_y;
    }
    true
}

/// Scales to fill the square thumbnail, center-crops, and stamps the play
/// badge onto video thumbnails.
pub fn process_thumbnail(im: &DynamicImage, file_type: FileType) -> DynamicImage {
    let (w, h) = im.dimensions();
    let scale = (THUMB_SIZE as f32 / w.max(1) as f32).max(THUMB_SIZE as f32 / h.max(1) as f32);
    let scaled_w = ((w as f32 * scale).round() as u32).max(THUMB_SIZE);
    let scaled_h = ((h as f32 * scale).round() as u32).max(THUMB_SIZE);
    let scaled = im.resize_exact(scaled_w, scaled_h, image::imageops::FilterType::Lanczos3);
    let x0 = (scaled_w - THUMB_SIZE) / 2;
    let y0 = (scaled_h - THUMB_SIZE) / 2;
    let mut thumb = scaled.crop_imm(x0, y0, THUMB_SIZE, THUMB_SIZE).to_rgba8();
    if file_type == FileType::Video {
        draw_play_badge(&mut thumb);
    }
    DynamicImage::ImageRgba8(thumb)
}

fn draw_play_badge(im: &mut RgbaImage) {
    let badge = (BADGE_FRACTION * THUMB_SIZE as f32).round() as i32;
    let radius = badge / 2;
    let cx = THUMB_SIZE as i32 - BADGE_INSET - radius;
    let cy = THUMB_SIZE as i32 - BADGE_INSET - radius;
    draw_filled_circle_mut(im, (cx, cy), radius, Rgba([20, 20, 20, 230]));
    let tri = radius / 2;
    // nudged right so the triangle looks optically centered
    let triangle = [
        Point::new(cx - tri + 1, cy - tri),
        Point::new(cx - tri + 1, cy + tri),
        Point::new(cx + tri + 1, cy),
    ];
    draw_polygon_mut(im, &triangle, Rgba([255, 255, 255, 255]));
}

/// Deterministic stand-in thumbnails for files without remote generation,
/// distinct per file type so lists stay scannable.
pub fn placeholder(file_type: FileType) -> DynamicImage {
    let (base, accent) = match file_type {
        FileType::Video => (Rgba([25, 28, 40, 255]), Rgba([90, 120, 200, 255])),
        FileType::Audio => (Rgba([30, 25, 40, 255]), Rgba([160, 90, 200, 255])),
        FileType::Image => (Rgba([25, 40, 30, 255]), Rgba([90, 200, 120, 255])),
        FileType::Archive => (Rgba([40, 35, 25, 255]), Rgba([200, 170, 90, 255])),
        FileType::Part => (Rgba([35, 35, 35, 255]), Rgba([140, 140, 140, 255])),
        FileType::Other => (Rgba([32, 32, 36, 255]), Rgba([110, 110, 120, 255])),
    };
    let mut im = RgbaImage::from_pixel(THUMB_SIZE, THUMB_SIZE, base);
    let margin = THUMB_SIZE / 5;
    for y in margin..THUMB_SIZE - margin {
        for x in margin..THUMB_SIZE - margin {
            let on_frame = x < margin + 2
                || x >= THUMB_SIZE - margin - 2
                || y < margin + 2
                || y >= THUMB_SIZE - margin - 2;
            if on_frame {
                im.put_pixel(x, y, accent);
            }
        }
    }
    let mut im = DynamicImage::ImageRgba8(im);
    if file_type == FileType::Video {
        let mut buf = im.to_rgba8();
        draw_play_badge(&mut buf);
        im = DynamicImage::ImageRgba8(buf);
    }
    im
}
