use thiserror::Error;

use crate::broker::{Frame, FrameSource};

/// Geometry of the display the prompt is rendered onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayGeometry {
    pub width: u32,
    pub height: u32,
    pub dpi: u32,
}

/// Accessibility options carried with a prompt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UiOptions {
    pub inverted: bool,
    pub magnified: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("prompt is not valid UTF-8")]
    MalformedUtf8,
    #[error("layout element exceeds the frame bounds")]
    OutOfBounds,
    #[error("no translations for locale '{0}'")]
    LocalizationMiss(String),
}

/// Axis-aligned box, top-left origin, inclusive hit bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && x <= self.x + self.w && y >= self.y && y <= self.y + self.h
    }
}

/// Resolved positions of the layout elements for one render pass.
#[derive(Debug, Clone, Copy)]
struct Layout {
    shield: Rect,
    title: Rect,
    hint: Rect,
    body: Rect,
    ok: Rect,
    cancel: Rect,
}

struct LocaleStrings {
    ok: &'static str,
    cancel: &'static str,
    title: &'static str,
    hint: &'static str,
}

fn strings_for(locale: &str) -> Option<LocaleStrings> {
    // The language id may carry a region suffix ("en-US"); match the
    // language part only, like the HAL does.
    let lang = locale.split(['-', '_']).next().unwrap_or(locale);
    let s = match lang {
        "en" => LocaleStrings {
            ok: "Confirm",
            cancel: "Cancel",
            title: "Android Protected Confirmation",
            hint: "Double-check this message before you confirm",
        },
        "de" => LocaleStrings {
            ok: "Best\u{e4}tigen",
            cancel: "Abbrechen",
            title: "Android Protected Confirmation",
            hint: "Pr\u{fc}fe diese Nachricht, bevor du best\u{e4}tigst",
        },
        "fr" => LocaleStrings {
            ok: "Confirmer",
            cancel: "Annuler",
            title: "Android Protected Confirmation",
            hint: "V\u{e9}rifiez ce message avant de confirmer",
        },
        "es" => LocaleStrings {
            ok: "Confirmar",
            cancel: "Cancelar",
            title: "Android Protected Confirmation",
            hint: "Revisa este mensaje antes de confirmar",
        },
        "ja" => LocaleStrings {
            ok: "\u{78ba}\u{8a8d}",
            cancel: "\u{30ad}\u{30e3}\u{30f3}\u{30bb}\u{30eb}",
            title: "Android Protected Confirmation",
            hint: "\u{78ba}\u{8a8d}\u{524d}\u{306b}\u{5185}\u{5bb9}\u{3092}\u{3054}\u{78ba}\u{8a8d}\u{304f}\u{3060}\u{3055}\u{3044}",
        },
        _ => return None,
    };
    Some(s)
}

// Color scheme shared with the guest-side trusted UI.
const COLOR_BACKGROUND: u32 = 0xffffffff;
const COLOR_BACKGROUND_INV: u32 = 0xff212121;
const COLOR_ENABLED: u32 = 0xff212121;
const COLOR_SHIELD: u32 = 0xff778500;
const COLOR_SHIELD_INV: u32 = 0xffc4cb80;
const COLOR_TEXT: u32 = 0xff212121;
const COLOR_TEXT_INV: u32 = 0xffdedede;

/// Renders confirmation prompts into raw frames and answers hit-region
/// queries against the last rendered layout.
///
/// There is no font rasterizer on the host; text elements are drawn as
/// per-glyph blocks at the correct cell geometry, which keeps rendering
/// deterministic and the OK/CANCEL bounds exact. Repainting with identical
/// inputs produces byte-identical frames.
pub struct Renderer {
    display_index: usize,
    last_layout: Option<Layout>,
}

impl Renderer {
    pub fn new(display_index: usize) -> Self {
        Self {
            display_index,
            last_layout: None,
        }
    }

    pub fn render(
        &mut self,
        geometry: DisplayGeometry,
        prompt: &[u8],
        locale: &str,
        options: UiOptions,
    ) -> Result<Frame, RenderError> {
        let prompt = std::str::from_utf8(prompt).map_err(|_| RenderError::MalformedUtf8)?;
        let strings =
            strings_for(locale).ok_or_else(|| RenderError::LocalizationMiss(locale.to_string()))?;

        let layout = compute_layout(geometry, options)?;
        let (bg, text_color, shield_color) = if options.inverted {
            (COLOR_BACKGROUND_INV, COLOR_TEXT_INV, COLOR_SHIELD_INV)
        } else {
            (COLOR_BACKGROUND, COLOR_TEXT, COLOR_SHIELD)
        };

        let mut canvas = Canvas::new(geometry.width, geometry.height, bg);
        canvas.fill_rect(layout.shield, shield_color)?;
        let (font, body_font) = font_heights(geometry.dpi, options);
        canvas.draw_text_block(layout.title, strings.title, font, text_color)?;
        canvas.draw_text_block(layout.hint, strings.hint, font, text_color)?;
        canvas.draw_text_block(layout.body, prompt, body_font, text_color)?;
        // Buttons: shield-colored boxes with enabled-color labels, matching
        // the guest trusted UI palette.
        canvas.fill_rect(layout.ok, shield_color)?;
        canvas.fill_rect(layout.cancel, shield_color)?;
        canvas.draw_text_block(inset(layout.ok, 4), strings.ok, font, COLOR_ENABLED)?;
        canvas.draw_text_block(inset(layout.cancel, 4), strings.cancel, font, COLOR_ENABLED)?;

        self.last_layout = Some(layout);
        Ok(Frame {
            display_index: self.display_index,
            width: geometry.width,
            height: geometry.height,
            source: FrameSource::ConfUi,
            data: canvas.pixels,
        })
    }

    pub fn is_in_confirm(&self, x: u32, y: u32) -> bool {
        self.last_layout.is_some_and(|l| l.ok.contains(x, y))
    }

    pub fn is_in_cancel(&self, x: u32, y: u32) -> bool {
        self.last_layout.is_some_and(|l| l.cancel.contains(x, y))
    }
}

/// Density-independent pixels to physical pixels at the given DPI.
fn dp(value: u32, dpi: u32) -> u32 {
    (value * dpi).div_ceil(160)
}

fn font_heights(dpi: u32, options: UiOptions) -> (u32, u32) {
    if options.magnified {
        (dp(18, dpi), dp(20, dpi))
    } else {
        (dp(14, dpi), dp(16, dpi))
    }
}

fn inset(r: Rect, px: u32) -> Rect {
    Rect {
        x: r.x + px,
        y: r.y + px,
        w: r.w.saturating_sub(2 * px),
        h: r.h.saturating_sub(2 * px),
    }
}

fn compute_layout(geometry: DisplayGeometry, options: UiOptions) -> Result<Layout, RenderError> {
    let DisplayGeometry { width, height, dpi } = geometry;
    let margin = dp(24, dpi);
    let (font, _) = font_heights(dpi, options);
    let shield_side = dp(24, dpi);
    let button_h = dp(48, dpi);

    let content_w = width
        .checked_sub(2 * margin)
        .filter(|w| *w > 0)
        .ok_or(RenderError::OutOfBounds)?;

    let shield = Rect {
        x: margin,
        y: margin,
        w: shield_side,
        h: shield_side,
    };
    let title = Rect {
        x: margin,
        y: shield.y + shield.h + dp(8, dpi),
        w: content_w,
        h: font + dp(6, dpi),
    };
    let hint = Rect {
        x: margin,
        y: title.y + title.h + dp(4, dpi),
        w: content_w,
        h: font + dp(2, dpi),
    };

    // Buttons sit at the bottom; cancel left, ok right.
    let button_y = height
        .checked_sub(margin + button_h)
        .ok_or(RenderError::OutOfBounds)?;
    let button_w = content_w.checked_sub(margin).ok_or(RenderError::OutOfBounds)? / 2;
    let cancel = Rect {
        x: margin,
        y: button_y,
        w: button_w,
        h: button_h,
    };
    let ok = Rect {
        x: margin + button_w + margin,
        y: button_y,
        w: button_w,
        h: button_h,
    };

    let body_top = hint.y + hint.h + dp(8, dpi);
    let body_bottom = button_y.checked_sub(dp(8, dpi)).ok_or(RenderError::OutOfBounds)?;
    if body_bottom <= body_top {
        return Err(RenderError::OutOfBounds);
    }
    let body = Rect {
        x: margin,
        y: body_top,
        w: content_w,
        h: body_bottom - body_top,
    };

    Ok(Layout {
        shield,
        title,
        hint,
        body,
        ok,
        cancel,
    })
}

struct Canvas {
    width: u32,
    height: u32,
    pixels: Vec<u32>,
}

impl Canvas {
    fn new(width: u32, height: u32, background: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![background; (width * height) as usize],
        }
    }

    /// Alpha-composite one pixel. The top 8 bits of `color` are its alpha;
    /// each channel is blended independently and the destination alpha byte
    /// is preserved.
    fn put_pixel(&mut self, x: u32, y: u32, color: u32) -> Result<(), RenderError> {
        if x >= self.width || y >= self.height {
            return Err(RenderError::OutOfBounds);
        }
        let idx = (y * self.width + x) as usize;
        let dst = self.pixels[idx];
        let alpha = ((color >> 24) & 0xff) as f64 / 255.0;
        self.pixels[idx] = (dst & 0xff00_0000)
            | blend_channel(16, alpha, color, dst)
            | blend_channel(8, alpha, color, dst)
            | blend_channel(0, alpha, color, dst);
        Ok(())
    }

    fn fill_rect(&mut self, r: Rect, color: u32) -> Result<(), RenderError> {
        for y in r.y..r.y + r.h {
            for x in r.x..r.x + r.w {
                self.put_pixel(x, y, color)?;
            }
        }
        Ok(())
    }

    /// Draw text as glyph cells, wrapping at the box edge and clipping at
    /// its bottom. Whitespace advances the pen without painting.
    fn draw_text_block(
        &mut self,
        bounds: Rect,
        text: &str,
        glyph_h: u32,
        color: u32,
    ) -> Result<(), RenderError> {
        let glyph_w = (glyph_h / 2).max(1);
        let advance = glyph_w + glyph_w / 4 + 1;
        let line_advance = glyph_h + glyph_h / 4 + 1;
        let mut pen_x = bounds.x;
        let mut pen_y = bounds.y;
        for ch in text.chars() {
            if pen_x + glyph_w > bounds.x + bounds.w {
                pen_x = bounds.x;
                pen_y += line_advance;
            }
            if pen_y + glyph_h > bounds.y + bounds.h {
                break; // clipped, like overlong prompts on a small panel
            }
            if !ch.is_whitespace() {
                self.fill_rect(
                    Rect {
                        x: pen_x,
                        y: pen_y,
                        w: glyph_w,
                        h: glyph_h,
                    },
                    color,
                )?;
            }
            pen_x += advance;
        }
        Ok(())
    }
}

fn blend_channel(shift: u32, alpha: f64, src: u32, dst: u32) -> u32 {
    let s = (src >> shift) & 0xff;
    let d = (dst >> shift) & 0xff;
    let acc = alpha * s as f64 + (1.0 - alpha) * d as f64;
    if acc <= 0.0 {
        return 0;
    }
    let value = acc as u32;
    if value > 255 { 0xff << shift } else { value << shift }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GEOMETRY: DisplayGeometry = DisplayGeometry {
        width: 720,
        height: 1280,
        dpi: 320,
    };

    fn rendered(prompt: &str) -> (Renderer, Frame) {
        let mut r = Renderer::new(0);
        let frame = r
            .render(GEOMETRY, prompt.as_bytes(), "en", UiOptions::default())
            .unwrap();
        (r, frame)
    }

    #[test]
    fn identical_inputs_produce_identical_frames() {
        let (_, a) = rendered("Pay $5");
        let (_, b) = rendered("Pay $5");
        assert_eq!(a.data, b.data);
        assert_eq!(a.width, 720);
        assert_eq!(a.height, 1280);
        assert_eq!(a.data.len(), 720 * 1280);
    }

    #[test]
    fn different_prompts_produce_different_frames() {
        let (_, a) = rendered("Pay $5");
        let (_, b) = rendered("Pay $500");
        assert_ne!(a.data, b.data);
    }

    #[test]
    fn hit_regions_are_disjoint_and_inside_frame() {
        let (r, _) = rendered("Pay $5");
        let layout = r.last_layout.unwrap();
        assert!(layout.ok.x > layout.cancel.x + layout.cancel.w);
        assert!(layout.ok.x + layout.ok.w < GEOMETRY.width);
        assert!(layout.ok.y + layout.ok.h < GEOMETRY.height);
        for y in 0..GEOMETRY.height {
            for x in 0..GEOMETRY.width {
                assert!(!(r.is_in_confirm(x, y) && r.is_in_cancel(x, y)));
            }
        }
    }

    #[test]
    fn ok_region_center_hits_confirm() {
        let (r, _) = rendered("Pay $5");
        let ok = r.last_layout.unwrap().ok;
        assert!(r.is_in_confirm(ok.x + ok.w / 2, ok.y + ok.h / 2));
        assert!(!r.is_in_cancel(ok.x + ok.w / 2, ok.y + ok.h / 2));
        let cancel = r.last_layout.unwrap().cancel;
        assert!(r.is_in_cancel(cancel.x + cancel.w / 2, cancel.y + cancel.h / 2));
    }

    #[test]
    fn no_hits_before_first_render() {
        let r = Renderer::new(0);
        assert!(!r.is_in_confirm(10, 10));
        assert!(!r.is_in_cancel(10, 10));
    }

    #[test]
    fn invalid_utf8_prompt_rejected() {
        let mut r = Renderer::new(0);
        let err = r
            .render(GEOMETRY, &[0xc3, 0x28], "en", UiOptions::default())
            .unwrap_err();
        assert_eq!(err, RenderError::MalformedUtf8);
    }

    #[test]
    fn unknown_locale_is_a_localization_miss() {
        let mut r = Renderer::new(0);
        let err = r
            .render(GEOMETRY, b"hi", "xx", UiOptions::default())
            .unwrap_err();
        assert_eq!(err, RenderError::LocalizationMiss("xx".into()));
    }

    #[test]
    fn locale_region_suffix_is_ignored() {
        let mut r = Renderer::new(0);
        assert!(r.render(GEOMETRY, b"hi", "de-AT", UiOptions::default()).is_ok());
    }

    #[test]
    fn tiny_display_is_out_of_bounds() {
        let mut r = Renderer::new(0);
        let tiny = DisplayGeometry {
            width: 40,
            height: 40,
            dpi: 320,
        };
        let err = r.render(tiny, b"hi", "en", UiOptions::default()).unwrap_err();
        assert_eq!(err, RenderError::OutOfBounds);
    }

    #[test]
    fn inverted_palette_changes_background() {
        let mut r = Renderer::new(0);
        let normal = r
            .render(GEOMETRY, b"hi", "en", UiOptions::default())
            .unwrap();
        let inverted = r
            .render(
                GEOMETRY,
                b"hi",
                "en",
                UiOptions {
                    inverted: true,
                    magnified: false,
                },
            )
            .unwrap();
        assert_eq!(normal.data[0], COLOR_BACKGROUND);
        assert_eq!(inverted.data[0], COLOR_BACKGROUND_INV);
    }

    #[test]
    fn blend_is_opaque_at_full_alpha() {
        let mut canvas = Canvas::new(2, 1, COLOR_BACKGROUND);
        canvas.put_pixel(0, 0, COLOR_SHIELD).unwrap();
        assert_eq!(canvas.pixels[0], COLOR_SHIELD);
        // Half-transparent red over white keeps half the background.
        canvas.put_pixel(1, 0, 0x80ff0000).unwrap();
        let px = canvas.pixels[1];
        assert_eq!((px >> 24) & 0xff, 0xff); // destination alpha preserved
        assert!(((px >> 16) & 0xff) > 0x80); // red raised
        assert!(((px >> 8) & 0xff) < 0xff); // green lowered
    }

    #[test]
    fn out_of_bounds_write_fails() {
        let mut canvas = Canvas::new(2, 2, COLOR_BACKGROUND);
        assert_eq!(
            canvas.put_pixel(2, 0, COLOR_SHIELD),
            Err(RenderError::OutOfBounds)
        );
    }
}
