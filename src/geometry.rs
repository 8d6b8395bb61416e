use serde::{Deserialize, Serialize};

use crate::model::{LayoutPage, Word};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl BoundingBox {
    pub fn of_word(word: &Word) -> Self {
        Self {
            x0: word.x0,
            y0: word.y0,
            x1: word.x1,
            y1: word.y1,
        }
    }

    pub fn union(&self, other: &Self) -> Self {
        Self {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    pub fn width(&self) -> f64 {
        (self.x1 - self.x0).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.y1 - self.y0).max(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClientRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl ClientRect {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Rotation {
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        match degrees.rem_euclid(360) {
            0 => Some(Self::Deg0),
            90 => Some(Self::Deg90),
            180 => Some(Self::Deg180),
            270 => Some(Self::Deg270),
            _ => None,
        }
    }

    pub fn degrees(self) -> i32 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }

    fn swaps_axes(self) -> bool {
        matches!(self, Self::Deg90 | Self::Deg270)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SourceSpace {
    // Full-page raster: the frame a recognition pass ran against.
    Raster { width: f64, height: f64 },
    // Viewport of a rendered PDF page, pre-scale.
    Viewport { width: f64, height: f64 },
}

impl SourceSpace {
    pub fn for_layout_page(page: &LayoutPage) -> Self {
        if page.is_embedded_text() {
            Self::Viewport {
                width: page.page_width(),
                height: page.page_height(),
            }
        } else {
            Self::Raster {
                width: page.page_width(),
                height: page.page_height(),
            }
        }
    }

    pub fn frame(self) -> (f64, f64) {
        let (width, height) = match self {
            Self::Raster { width, height } | Self::Viewport { width, height } => (width, height),
        };
        (positive_or_one(width), positive_or_one(height))
    }
}

fn positive_or_one(value: f64) -> f64 {
    if value > 0.0 { value } else { 1.0 }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct TopLeftBox {
    x: f64,
    y: f64,
    w: f64,
    h: f64,
}

fn rotate_top_left_box(
    bbox: TopLeftBox,
    rotation: Rotation,
    ref_w: f64,
    ref_h: f64,
) -> TopLeftBox {
    let TopLeftBox { x, y, w, h } = bbox;
    match rotation {
        Rotation::Deg0 => bbox,
        Rotation::Deg90 => TopLeftBox {
            x: y,
            y: ref_w - (x + w),
            w: h,
            h: w,
        },
        Rotation::Deg180 => TopLeftBox {
            x: ref_w - (x + w),
            y: ref_h - (y + h),
            w,
            h,
        },
        Rotation::Deg270 => TopLeftBox {
            x: ref_h - (y + h),
            y: x,
            w: h,
            h: w,
        },
    }
}

/// Maps a source-space box onto a rendered page, relative to `host_rect`.
///
/// The box is rotated first and then normalized by the rotated frame: for
/// 90° and 270° the divisors are the swapped `(height, width)` of `source`,
/// not its unrotated width and height. A box covering the whole source page
/// therefore covers the whole `page_rect` at every rotation. Width and height
/// never drop below one pixel.
pub fn project(
    bbox: BoundingBox,
    source: SourceSpace,
    rotation: Rotation,
    page_rect: ClientRect,
    host_rect: ClientRect,
) -> ClientRect {
    let (ref_w, ref_h) = source.frame();
    let rotated = rotate_top_left_box(
        TopLeftBox {
            x: bbox.x0,
            y: bbox.y0,
            w: bbox.width(),
            h: bbox.height(),
        },
        rotation,
        ref_w,
        ref_h,
    );

    let (frame_w, frame_h) = if rotation.swaps_axes() {
        (ref_h, ref_w)
    } else {
        (ref_w, ref_h)
    };

    ClientRect {
        left: page_rect.left - host_rect.left + (rotated.x / frame_w) * page_rect.width,
        top: page_rect.top - host_rect.top + (rotated.y / frame_h) * page_rect.height,
        width: ((rotated.w / frame_w) * page_rect.width).max(1.0),
        height: ((rotated.h / frame_h) * page_rect.height).max(1.0),
    }
}

pub fn rotated_frame(source: SourceSpace, rotation: Rotation) -> (f64, f64) {
    let (width, height) = source.frame();
    if rotation.swaps_axes() {
        (height, width)
    } else {
        (width, height)
    }
}

pub fn to_percent(bbox: BoundingBox, width: f64, height: f64) -> BoundingBox {
    let clamp = |value: f64, dimension: f64| (value / dimension.max(1.0)).clamp(0.0, 1.0);
    BoundingBox {
        x0: clamp(bbox.x0, width),
        y0: clamp(bbox.y0, height),
        x1: clamp(bbox.x1, width),
        y1: clamp(bbox.y1, height),
    }
}
