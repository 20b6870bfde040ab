//! Transform and draw pipeline: one surface into one pane.

use kurbo::{Affine, Point, Rect, Vec2};
use tracing::{debug, trace};

use drawstream_ipc::ZoomTransform;

use crate::frame::{Canvas, RgbaFrame};
use crate::layout::PaneDescriptor;

/// Result of drawing one pane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawOutcome {
    /// Pixels were written.
    Drawn,

    /// The source has no intrinsic size yet; nothing was drawn this frame.
    SkippedEmpty,

    /// The pane does not intersect the canvas.
    OutsideCanvas,
}

/// Where a source lands inside a pane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    /// Pane-local space to canvas space (zoom/pan lives here).
    pub pane_transform: Affine,

    /// Destination rectangle in pane-local space.
    pub local_dest: Rect,

    /// Fitted source rectangle in pane-local space.
    pub content: Rect,

    /// Source is sampled right-to-left.
    pub flipped: bool,
}

impl Placement {
    /// Flip about the destination's vertical centerline. Applying it twice
    /// restores the original placement.
    pub fn mirrored(self) -> Self {
        let axis = (self.local_dest.x0 + self.local_dest.x1) / 2.0;
        let content = Rect::new(
            2.0 * axis - self.content.x1,
            self.content.y0,
            2.0 * axis - self.content.x0,
            self.content.y1,
        );
        Self {
            content,
            flipped: !self.flipped,
            ..self
        }
    }

    /// Maps source pixel coordinates to canvas coordinates.
    pub fn source_transform(&self, src_w: f64, src_h: f64) -> Affine {
        let sx = self.content.width() / src_w;
        let sy = self.content.height() / src_h;
        let local = if self.flipped {
            Affine::translate((self.content.x1, self.content.y0))
                * Affine::scale_non_uniform(-sx, sy)
        } else {
            Affine::translate((self.content.x0, self.content.y0))
                * Affine::scale_non_uniform(sx, sy)
        };
        self.pane_transform * local
    }

    /// Maps overlay pixel coordinates to canvas coordinates, stretching the
    /// overlay over the whole destination.
    pub fn overlay_transform(&self, overlay_w: f64, overlay_h: f64) -> Affine {
        self.pane_transform
            * Affine::translate(self.local_dest.origin().to_vec2())
            * Affine::scale_non_uniform(
                self.local_dest.width() / overlay_w,
                self.local_dest.height() / overlay_h,
            )
    }
}

/// Fit-cover: scale `src_w`×`src_h` to fill `dest` keeping aspect, centered
/// on the overflowing axis. Overflow is left for the clip to crop.
pub fn fit_cover(src_w: f64, src_h: f64, dest: Rect) -> Rect {
    let src_ratio = src_w / src_h;
    let dest_ratio = dest.width() / dest.height();

    if src_ratio > dest_ratio {
        let w = dest.height() * src_ratio;
        Rect::from_origin_size(
            (dest.x0 + (dest.width() - w) / 2.0, dest.y0),
            (w, dest.height()),
        )
    } else {
        let h = dest.width() / src_ratio;
        Rect::from_origin_size(
            (dest.x0, dest.y0 + (dest.height() - h) / 2.0),
            (dest.width(), h),
        )
    }
}

/// Compute the placement of a `src_w`×`src_h` source in `pane`.
///
/// For zoom-eligible panes the pan offset is converted to canvas pixels with
/// `scale_factor` and the pane origin is folded into the pane transform, so
/// zoom happens in pane-local space.
pub fn placement(
    pane: &PaneDescriptor,
    src_w: f64,
    src_h: f64,
    zoom: &ZoomTransform,
    scale_factor: f64,
) -> Placement {
    let (pane_transform, local_dest) = if pane.zoom_eligible {
        let origin = Vec2::new(
            pane.rect.x0 + zoom.offset.x * scale_factor,
            pane.rect.y0 + zoom.offset.y * scale_factor,
        );
        (
            Affine::translate(origin) * Affine::scale(zoom.scale),
            Rect::from_origin_size(Point::ORIGIN, pane.rect.size()),
        )
    } else {
        (Affine::IDENTITY, pane.rect)
    };

    let placed = Placement {
        pane_transform,
        local_dest,
        content: fit_cover(src_w, src_h, local_dest),
        flipped: false,
    };

    if pane.mirrored {
        placed.mirrored()
    } else {
        placed
    }
}

/// Draw `source` (and `overlay` on top) into `pane`, clipped to the pane.
pub fn draw_pane(
    canvas: &mut Canvas,
    pane: &PaneDescriptor,
    source: &RgbaFrame,
    overlay: Option<&RgbaFrame>,
    zoom: &ZoomTransform,
    scale_factor: f64,
) -> DrawOutcome {
    if source.is_empty() {
        trace!(source = ?pane.source, "Source has no frame yet, skipping pane");
        return DrawOutcome::SkippedEmpty;
    }
    if !source.is_well_formed() {
        debug!(
            source = ?pane.source,
            width = source.width,
            height = source.height,
            bytes = source.data.len(),
            "Source frame buffer does not match its size, skipping pane"
        );
        return DrawOutcome::SkippedEmpty;
    }

    let bounds = Rect::new(
        0.0,
        0.0,
        f64::from(canvas.width()),
        f64::from(canvas.height()),
    );
    let clip = pane.rect.intersect(bounds);
    if clip.area() <= 0.0 {
        return DrawOutcome::OutsideCanvas;
    }

    let placed = placement(
        pane,
        f64::from(source.width),
        f64::from(source.height),
        zoom,
        scale_factor,
    );

    blit(
        canvas,
        clip,
        source,
        placed.source_transform(f64::from(source.width), f64::from(source.height)),
        Blend::Opaque,
    );

    if let Some(overlay) = overlay.filter(|o| o.is_drawable()) {
        blit(
            canvas,
            clip,
            overlay,
            placed.overlay_transform(f64::from(overlay.width), f64::from(overlay.height)),
            Blend::SourceOver,
        );
    }

    DrawOutcome::Drawn
}

#[derive(Debug, Clone, Copy)]
enum Blend {
    /// Video frames: replace, force opaque.
    Opaque,
    /// Annotation layer: straight-alpha source-over.
    SourceOver,
}

/// Nearest-neighbour resample of `src` through `to_canvas`, limited to `clip`.
/// A canvas pixel is covered when its center lies inside the clip.
fn blit(canvas: &mut Canvas, clip: Rect, src: &RgbaFrame, to_canvas: Affine, blend: Blend) {
    let (sw, sh) = (f64::from(src.width), f64::from(src.height));
    let region = to_canvas
        .transform_rect_bbox(Rect::new(0.0, 0.0, sw, sh))
        .intersect(clip);
    if region.area() <= 0.0 {
        return;
    }

    let inverse = to_canvas.inverse();
    let x_start = region.x0.floor().max(0.0) as u32;
    let y_start = region.y0.floor().max(0.0) as u32;
    let x_end = (region.x1.ceil().max(0.0) as u32).min(canvas.width());
    let y_end = (region.y1.ceil().max(0.0) as u32).min(canvas.height());

    for y in y_start..y_end {
        let cy = f64::from(y) + 0.5;
        if cy < clip.y0 || cy >= clip.y1 {
            continue;
        }
        for x in x_start..x_end {
            let cx = f64::from(x) + 0.5;
            if cx < clip.x0 || cx >= clip.x1 {
                continue;
            }

            let p = inverse * Point::new(cx, cy);
            if p.x < 0.0 || p.y < 0.0 || p.x >= sw || p.y >= sh {
                continue;
            }

            let texel = src.pixel(p.x as u32, p.y as u32);
            match blend {
                Blend::Opaque => canvas.put(x, y, [texel[0], texel[1], texel[2], 255]),
                Blend::SourceOver => {
                    if texel[3] == 0 {
                        continue;
                    }
                    let dst = canvas.pixel(x, y);
                    canvas.put(x, y, over_opaque(dst, texel));
                }
            }
        }
    }
}

fn mul_div255(a: u16, b: u16) -> u16 {
    let t = a * b + 128;
    (t + (t >> 8)) >> 8
}

/// Straight-alpha `src` over an opaque `dst`.
fn over_opaque(dst: [u8; 4], src: [u8; 4]) -> [u8; 4] {
    let a = u16::from(src[3]);
    let inv = 255 - a;
    let mut out = [0u8, 0, 0, 255];
    for i in 0..3 {
        let v = mul_div255(u16::from(src[i]), a) + mul_div255(u16::from(dst[i]), inv);
        out[i] = v.min(255) as u8;
    }
    out
}
