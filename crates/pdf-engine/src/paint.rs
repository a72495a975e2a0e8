//! Draws page content onto a raster surface with `tiny-skia`.
//!
//! Paths, fills, strokes, clipping, device colours, constant alpha, images
//! and form XObjects are drawn. Text and shadings are not.

use crate::content::{number, PageContent, PageGeometry, Resources, XObject};
use crate::{PdfEngineError, RgbaImage};
use lopdf::content::Operation;
use lopdf::Object;
use tiny_skia::{
    Color, FillRule, FilterQuality, LineCap, LineJoin, Mask, Paint, PathBuilder, Pixmap,
    PixmapPaint, Stroke, Transform,
};

#[derive(Debug, Clone)]
struct GraphicsState {
    ctm: Transform,
    fill: [f32; 3],
    stroke: [f32; 3],
    fill_alpha: f32,
    stroke_alpha: f32,
    line_width: f32,
    line_cap: LineCap,
    line_join: LineJoin,
    miter_limit: f32,
    clip: Option<Mask>,
}

impl Default for GraphicsState {
    fn default() -> Self {
        Self {
            ctm: Transform::identity(),
            fill: [0.0; 3],
            stroke: [0.0; 3],
            fill_alpha: 1.0,
            stroke_alpha: 1.0,
            line_width: 1.0,
            line_cap: LineCap::Butt,
            line_join: LineJoin::Miter,
            miter_limit: 10.0,
            clip: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum PaintOp {
    Fill(FillRule),
    Stroke,
    FillStroke(FillRule),
    Discard,
}

struct Painter {
    pixmap: Pixmap,
    /// Default user space to device pixels.
    device: Transform,
    state: GraphicsState,
    saved: Vec<GraphicsState>,
    path: PathBuilder,
    current: (f32, f32),
    pending_clip: Option<FillRule>,
    skipped_text: bool,
}

/// Draw `content` into a `width` x `height` surface showing the visible area
/// of `geometry`.
pub(crate) fn render(
    content: &PageContent,
    geometry: &PageGeometry,
    width: u32,
    height: u32,
) -> Result<RgbaImage, PdfEngineError> {
    let mut pixmap = Pixmap::new(width, height).ok_or_else(|| {
        PdfEngineError::Backend(format!("cannot allocate a {width}x{height} pixmap"))
    })?;
    pixmap.fill(Color::WHITE);

    let mut painter = Painter {
        pixmap,
        device: device_transform(geometry, width, height),
        state: GraphicsState::default(),
        saved: Vec::new(),
        path: PathBuilder::new(),
        current: (0.0, 0.0),
        pending_clip: None,
        skipped_text: false,
    };
    painter.run(&content.operations, &[&content.resources]);
    if painter.skipped_text {
        log::debug!("text is not drawn by the built-in backend");
    }

    RgbaImage::from_raw(width, height, painter.pixmap.take())
        .ok_or_else(|| PdfEngineError::Backend("pixmap size mismatch".into()))
}

/// Map user space onto the surface: flip y, move the visible box to the
/// origin, then apply the page rotation.
fn device_transform(geometry: &PageGeometry, width: u32, height: u32) -> Transform {
    let (upright_w, upright_h) = if geometry.rotate % 180 == 90 {
        (height as f32, width as f32)
    } else {
        (width as f32, height as f32)
    };
    let sx = upright_w / geometry.width;
    let sy = upright_h / geometry.height;
    let base = Transform::from_row(
        sx,
        0.0,
        0.0,
        -sy,
        -sx * geometry.left,
        sy * (geometry.bottom + geometry.height),
    );

    let rotation = match geometry.rotate {
        90 => Transform::from_row(0.0, 1.0, -1.0, 0.0, upright_h, 0.0),
        180 => Transform::from_row(-1.0, 0.0, 0.0, -1.0, upright_w, upright_h),
        270 => Transform::from_row(0.0, -1.0, 1.0, 0.0, 0.0, upright_w),
        _ => Transform::identity(),
    };
    base.post_concat(rotation)
}

fn operands<const N: usize>(args: &[Object]) -> Option<[f32; N]> {
    if args.len() < N {
        return None;
    }
    let mut out = [0.0; N];
    for (slot, arg) in out.iter_mut().zip(args) {
        *slot = number(arg)?;
    }
    Some(out)
}

/// Device colour from 1 (gray), 3 (RGB) or 4 (CMYK) numeric operands.
fn device_color(args: &[Object]) -> Option<[f32; 3]> {
    let values: Vec<f32> = args.iter().map_while(number).collect();
    match values.as_slice() {
        &[gray] => Some([gray; 3]),
        &[r, g, b] => Some([r, g, b]),
        &[c, m, y, k] => Some([(1.0 - c) * (1.0 - k), (1.0 - m) * (1.0 - k), (1.0 - y) * (1.0 - k)]),
        _ => None,
    }
}

fn fill_paint(color: [f32; 3], alpha: f32) -> Paint<'static> {
    let [r, g, b] = color.map(|channel| channel.clamp(0.0, 1.0));
    let mut paint = Paint::default();
    paint.set_color(Color::from_rgba(r, g, b, alpha.clamp(0.0, 1.0)).unwrap_or(Color::BLACK));
    paint.anti_alias = true;
    paint
}

fn find_xobject<'r>(chain: &[&'r Resources], name: &[u8]) -> Option<&'r XObject> {
    chain.iter().copied().find_map(|resources: &'r Resources| resources.xobjects.get(name))
}

impl Painter {
    fn transform(&self) -> Transform {
        self.device.pre_concat(self.state.ctm)
    }

    fn run<'r>(&mut self, operations: &'r [Operation], resources: &[&'r Resources]) {
        for operation in operations {
            let args = operation.operands.as_slice();
            match operation.operator.as_str() {
                "q" => self.saved.push(self.state.clone()),
                "Q" => {
                    if let Some(state) = self.saved.pop() {
                        self.state = state;
                    }
                }
                "cm" => {
                    if let Some([a, b, c, d, e, f]) = operands::<6>(args) {
                        self.state.ctm = self.state.ctm.pre_concat(Transform::from_row(a, b, c, d, e, f));
                    }
                }
                "w" => {
                    if let Some([width]) = operands::<1>(args) {
                        self.state.line_width = width;
                    }
                }
                "J" => {
                    self.state.line_cap = match operands::<1>(args) {
                        Some([cap]) if cap == 1.0 => LineCap::Round,
                        Some([cap]) if cap == 2.0 => LineCap::Square,
                        _ => LineCap::Butt,
                    };
                }
                "j" => {
                    self.state.line_join = match operands::<1>(args) {
                        Some([join]) if join == 1.0 => LineJoin::Round,
                        Some([join]) if join == 2.0 => LineJoin::Bevel,
                        _ => LineJoin::Miter,
                    };
                }
                "M" => {
                    if let Some([limit]) = operands::<1>(args) {
                        self.state.miter_limit = limit.max(1.0);
                    }
                }
                "gs" => self.apply_graphics_state(args, resources),
                "g" | "rg" | "k" | "sc" | "scn" => {
                    if let Some(color) = device_color(args) {
                        self.state.fill = color;
                    }
                }
                "G" | "RG" | "K" | "SC" | "SCN" => {
                    if let Some(color) = device_color(args) {
                        self.state.stroke = color;
                    }
                }
                "cs" => self.state.fill = [0.0; 3],
                "CS" => self.state.stroke = [0.0; 3],
                "m" => {
                    if let Some([x, y]) = operands::<2>(args) {
                        self.path.move_to(x, y);
                        self.current = (x, y);
                    }
                }
                "l" => {
                    if let Some([x, y]) = operands::<2>(args) {
                        self.path.line_to(x, y);
                        self.current = (x, y);
                    }
                }
                "c" => {
                    if let Some([x1, y1, x2, y2, x, y]) = operands::<6>(args) {
                        self.path.cubic_to(x1, y1, x2, y2, x, y);
                        self.current = (x, y);
                    }
                }
                "v" => {
                    if let Some([x2, y2, x, y]) = operands::<4>(args) {
                        let (x1, y1) = self.current;
                        self.path.cubic_to(x1, y1, x2, y2, x, y);
                        self.current = (x, y);
                    }
                }
                "y" => {
                    if let Some([x1, y1, x, y]) = operands::<4>(args) {
                        self.path.cubic_to(x1, y1, x, y, x, y);
                        self.current = (x, y);
                    }
                }
                "h" => self.path.close(),
                "re" => {
                    if let Some([x, y, w, h]) = operands::<4>(args) {
                        self.path.move_to(x, y);
                        self.path.line_to(x + w, y);
                        self.path.line_to(x + w, y + h);
                        self.path.line_to(x, y + h);
                        self.path.close();
                        self.current = (x, y);
                    }
                }
                "f" | "F" => self.finish_path(PaintOp::Fill(FillRule::Winding)),
                "f*" => self.finish_path(PaintOp::Fill(FillRule::EvenOdd)),
                "S" => self.finish_path(PaintOp::Stroke),
                "s" => {
                    self.path.close();
                    self.finish_path(PaintOp::Stroke);
                }
                "B" => self.finish_path(PaintOp::FillStroke(FillRule::Winding)),
                "B*" => self.finish_path(PaintOp::FillStroke(FillRule::EvenOdd)),
                "b" => {
                    self.path.close();
                    self.finish_path(PaintOp::FillStroke(FillRule::Winding));
                }
                "b*" => {
                    self.path.close();
                    self.finish_path(PaintOp::FillStroke(FillRule::EvenOdd));
                }
                "n" => self.finish_path(PaintOp::Discard),
                "W" => self.pending_clip = Some(FillRule::Winding),
                "W*" => self.pending_clip = Some(FillRule::EvenOdd),
                "Do" => {
                    if let Some(name) = args.first().and_then(|arg| arg.as_name().ok()) {
                        self.draw_xobject(name, resources);
                    }
                }
                "Tj" | "TJ" | "'" | "\"" => self.skipped_text = true,
                _ => {}
            }
        }
    }

    fn apply_graphics_state(&mut self, args: &[Object], resources: &[&Resources]) {
        let Some(name) = args.first().and_then(|arg| arg.as_name().ok()) else {
            return;
        };
        let Some(params) = resources.iter().find_map(|r| r.graphics_states.get(name)) else {
            return;
        };
        if let Some(alpha) = params.fill_alpha {
            self.state.fill_alpha = alpha;
        }
        if let Some(alpha) = params.stroke_alpha {
            self.state.stroke_alpha = alpha;
        }
        if let Some(width) = params.line_width {
            self.state.line_width = width;
        }
    }

    /// Paint the current path, then apply a pending `W`/`W*` clip with it.
    fn finish_path(&mut self, op: PaintOp) {
        let clip = self.pending_clip.take();
        let Some(path) = std::mem::take(&mut self.path).finish() else {
            return;
        };
        let transform = self.transform();

        if let PaintOp::Fill(rule) | PaintOp::FillStroke(rule) = op {
            let paint = fill_paint(self.state.fill, self.state.fill_alpha);
            self.pixmap.fill_path(&path, &paint, rule, transform, self.state.clip.as_ref());
        }
        if let PaintOp::Stroke | PaintOp::FillStroke(_) = op {
            let paint = fill_paint(self.state.stroke, self.state.stroke_alpha);
            let stroke = Stroke {
                width: self.state.line_width.max(0.0),
                miter_limit: self.state.miter_limit,
                line_cap: self.state.line_cap,
                line_join: self.state.line_join,
                ..Stroke::default()
            };
            self.pixmap.stroke_path(&path, &paint, &stroke, transform, self.state.clip.as_ref());
        }

        if let Some(rule) = clip {
            match self.state.clip.as_mut() {
                Some(mask) => mask.intersect_path(&path, rule, true, transform),
                None => {
                    if let Some(mut mask) = Mask::new(self.pixmap.width(), self.pixmap.height()) {
                        mask.fill_path(&path, rule, true, transform);
                        self.state.clip = Some(mask);
                    }
                }
            }
        }
    }

    fn draw_xobject<'r>(&mut self, name: &[u8], resources: &[&'r Resources]) {
        match find_xobject(resources, name) {
            Some(XObject::Image(image)) => {
                let image: &Pixmap = image;
                // Images occupy the unit square, top row first.
                let unit = Transform::from_row(
                    1.0 / image.width() as f32,
                    0.0,
                    0.0,
                    -1.0 / image.height() as f32,
                    0.0,
                    1.0,
                );
                let paint = PixmapPaint {
                    opacity: self.state.fill_alpha.clamp(0.0, 1.0),
                    quality: FilterQuality::Bilinear,
                    ..PixmapPaint::default()
                };
                let transform = self.transform().pre_concat(unit);
                self.pixmap.draw_pixmap(0, 0, image.as_ref(), &paint, transform, self.state.clip.as_ref());
            }
            Some(XObject::Form(form)) => {
                let [a, b, c, d, e, f] = form.matrix;
                let mut chain = vec![&form.content.resources];
                chain.extend_from_slice(resources);

                self.saved.push(self.state.clone());
                self.state.ctm = self.state.ctm.pre_concat(Transform::from_row(a, b, c, d, e, f));
                self.run(&form.content.operations, &chain);
                if let Some(state) = self.saved.pop() {
                    self.state = state;
                }
            }
            None => log::debug!("unknown XObject {}", String::from_utf8_lossy(name)),
        }
    }
}
