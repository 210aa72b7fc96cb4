// this_file: crates/sabre-core/src/shape.rs

//! Shaping coordination: style-run splitting, the shaper contract and
//! its simple (character map) and complex (bidi + full shaping)
//! implementations.

use unicode_bidi::{BidiInfo, Level};

use sabre_raster::geom::Vector;

use crate::text::{Effect, GlyphInfo, GlyphShape};
use crate::{RenderError, Result};

/// Mark glyph boundaries where any style dimension changes; run starts
/// become composition-run starts later.
pub(crate) fn split_style_runs(glyphs: &mut [GlyphInfo]) {
    if glyphs.is_empty() {
        return;
    }
    glyphs[0].starts_new_run = true;
    let mut last_effect_type = glyphs[0].effect_type;
    for i in 1..glyphs.len() {
        let (head, tail) = glyphs.split_at_mut(i);
        let last = &head[i - 1];
        let info = &mut tail[0];
        let effect_type = info.effect_type;
        info.starts_new_run = info.effect_timing != 0
            || (effect_type != Effect::None && effect_type != last_effect_type)
            || info.drawing_text.is_some()
            || last.drawing_text.is_some()
            || !same_face(last, info)
            || last.font_size != info.font_size
            || last.c != info.c
            || last.be != info.be
            || last.blur != info.blur
            || last.shadow_x != info.shadow_x
            || last.shadow_y != info.shadow_y
            || last.frx != info.frx
            || last.fry != info.fry
            || last.frz != info.frz
            || last.fax != info.fax
            || last.fay != info.fay
            || last.scale_x != info.scale_x
            || last.scale_y != info.scale_y
            || last.border_style != info.border_style
            || last.border_x != info.border_x
            || last.border_y != info.border_y
            || last.hspacing != info.hspacing
            || last.italic != info.italic
            || last.bold != info.bold
            || ((last.flags ^ info.flags) & !crate::text::DecoFlags::ROTATE)
                != crate::text::DecoFlags::empty();
        if effect_type != Effect::None {
            last_effect_type = effect_type;
        }
    }
}

fn same_face(a: &GlyphInfo, b: &GlyphInfo) -> bool {
    match (&a.face, &b.face) {
        (Some(fa), Some(fb)) => {
            std::sync::Arc::ptr_eq(fa, fb) || fa.family() == fb.family()
        }
        (None, None) => true,
        _ => false,
    }
}

/// Base paragraph direction from the style font encoding; 177/178 are
/// the Hebrew and Arabic charsets.
pub(crate) fn resolve_base_direction(encoding: i32) -> bool {
    matches!(encoding, 177 | 178)
}

/// Split into shape runs: a run shares face, size, attributes and
/// drawing-ness. Returns `(start, end)` glyph ranges.
fn shape_runs(glyphs: &[GlyphInfo], levels: Option<&[Level]>) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut start = 0;
    for i in 1..=glyphs.len() {
        let boundary = i == glyphs.len() || {
            let (a, b) = (&glyphs[i - 1], &glyphs[i]);
            a.drawing_text.is_some() != b.drawing_text.is_some()
                || !same_face(a, b)
                || a.font_size != b.font_size
                || a.bold != b.bold
                || a.italic != b.italic
                || a.symbol == '\n'
                || b.symbol == '\n'
                || levels.map_or(false, |l| l[i - 1] != l[i])
        };
        if boundary {
            runs.push((start, i));
            start = i;
        }
    }
    runs
}

/// The shaper contract: fill each cluster's physical glyph parts and
/// cluster advances, and produce the visual-order map per line.
pub(crate) trait Shaper {
    fn name(&self) -> &'static str;

    fn shape(&self, glyphs: &mut [GlyphInfo], base_rtl: bool) -> Result<()>;

    /// Visual-order permutation; `cmap[visual] = logical`. Line
    /// boundaries stay at the same visual slots.
    fn reorder(&self, glyphs: &[GlyphInfo], base_rtl: bool) -> Vec<usize>;
}

/// Character-mapping shaper: one glyph per cluster, left to right.
/// Advances are left to outline retrieval, matching the simple level of
/// classic renderers.
pub(crate) struct SimpleShaper;

impl Shaper for SimpleShaper {
    fn name(&self) -> &'static str {
        "simple"
    }

    fn shape(&self, glyphs: &mut [GlyphInfo], _base_rtl: bool) -> Result<()> {
        for info in glyphs.iter_mut() {
            let glyph_index = if info.drawing_text.is_some() {
                0
            } else {
                let face = info.face.as_ref().ok_or(RenderError::ShapingFailed)?;
                face.glyph_index(info.symbol).unwrap_or(0)
            };
            info.parts.clear();
            info.parts.push(GlyphShape {
                glyph_index,
                ..GlyphShape::default()
            });
        }
        Ok(())
    }

    fn reorder(&self, glyphs: &[GlyphInfo], _base_rtl: bool) -> Vec<usize> {
        (0..glyphs.len()).collect()
    }
}

/// Full shaper: paragraph bidi levels split the shape runs, each run is
/// shaped through the face's shaping hook, and lines are reordered into
/// visual order.
pub(crate) struct ComplexShaper;

impl ComplexShaper {
    fn text_of(glyphs: &[GlyphInfo]) -> String {
        glyphs.iter().map(|g| g.symbol).collect()
    }

    /// Per-glyph embedding levels for the whole event text.
    fn levels(glyphs: &[GlyphInfo], base_rtl: bool) -> Vec<Level> {
        let text = Self::text_of(glyphs);
        let base = if base_rtl { Some(Level::rtl()) } else { None };
        let bidi = BidiInfo::new(&text, base);
        let mut out = Vec::with_capacity(glyphs.len());
        for (byte, _) in text.char_indices() {
            out.push(bidi.levels[byte]);
        }
        out
    }
}

impl Shaper for ComplexShaper {
    fn name(&self) -> &'static str {
        "complex"
    }

    fn shape(&self, glyphs: &mut [GlyphInfo], base_rtl: bool) -> Result<()> {
        let levels = Self::levels(glyphs, base_rtl);
        let runs = shape_runs(glyphs, Some(&levels));

        for (start, end) in runs {
            let run = &mut glyphs[start..end];
            let rtl = levels[start].is_rtl();

            let is_drawing = run[0].drawing_text.is_some();
            let face = run[0].face.clone();
            let can_shape = !is_drawing && face.is_some() && run[0].symbol != '\n';
            let shaped = if can_shape {
                let text: String = run.iter().map(|g| g.symbol).collect();
                let size = run[0].font_size;
                face.as_ref().unwrap().shape_run(&text, size, rtl)
            } else {
                None
            };

            match shaped {
                Some(raws) => {
                    // Map cluster byte offsets back to run-local chars.
                    let text: String = run.iter().map(|g| g.symbol).collect();
                    let mut byte_to_char = vec![0usize; text.len() + 1];
                    for (ci, (bi, _)) in text.char_indices().enumerate() {
                        byte_to_char[bi] = ci;
                    }
                    for info in run.iter_mut() {
                        info.parts.clear();
                    }
                    for raw in &raws {
                        let ci = byte_to_char
                            .get(raw.cluster as usize)
                            .copied()
                            .unwrap_or(0)
                            .min(run.len() - 1);
                        let info = &mut run[ci];
                        info.parts.push(GlyphShape {
                            glyph_index: raw.glyph,
                            offset: Vector::new(
                                (raw.x_offset as f64 * info.scale_x) as i32,
                                (raw.y_offset as f64 * info.scale_y) as i32,
                            ),
                            advance: Vector::new(
                                (raw.x_advance as f64 * info.scale_x) as i32,
                                (raw.y_advance as f64 * info.scale_y) as i32,
                            ),
                            ..GlyphShape::default()
                        });
                    }
                    for info in run.iter_mut() {
                        if info.parts.is_empty() {
                            // Consumed by a ligature in the same run.
                            info.skip = true;
                            info.parts.push(GlyphShape::default());
                            info.cluster_advance = Vector::default();
                        } else {
                            info.cluster_advance = Vector::new(
                                info.parts.iter().map(|p| p.advance.x).sum(),
                                info.parts.iter().map(|p| p.advance.y).sum(),
                            );
                        }
                    }
                }
                None => {
                    // Fall back to character mapping for this run.
                    for info in run.iter_mut() {
                        let glyph_index = match (&info.face, info.drawing_text.is_some()) {
                            (Some(face), false) => face.glyph_index(info.symbol).unwrap_or(0),
                            _ => 0,
                        };
                        info.parts.clear();
                        info.parts.push(GlyphShape {
                            glyph_index,
                            ..GlyphShape::default()
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn reorder(&self, glyphs: &[GlyphInfo], base_rtl: bool) -> Vec<usize> {
        let text = Self::text_of(glyphs);
        let base = if base_rtl { Some(Level::rtl()) } else { None };
        let bidi = BidiInfo::new(&text, base);

        // char index ↔ byte index maps.
        let char_bytes: Vec<usize> = text.char_indices().map(|(b, _)| b).collect();
        let mut byte_to_char = vec![0usize; text.len() + 1];
        for (ci, &bi) in char_bytes.iter().enumerate() {
            byte_to_char[bi] = ci;
        }

        let mut cmap = Vec::with_capacity(glyphs.len());
        let mut line_start = 0usize;
        for i in 0..=glyphs.len() {
            let at_break = i == glyphs.len() || (i > line_start && glyphs[i].linebreak != 0);
            if !at_break {
                continue;
            }
            let (ls, le) = (line_start, i);
            line_start = i;
            if ls == le {
                continue;
            }
            let b0 = char_bytes[ls];
            let b1 = if le == glyphs.len() {
                text.len()
            } else {
                char_bytes[le]
            };

            let para = bidi
                .paragraphs
                .iter()
                .find(|p| p.range.start <= b0 && b0 < p.range.end.max(b0 + 1));
            let Some(para) = para else {
                cmap.extend(ls..le);
                continue;
            };
            let lb0 = b0.max(para.range.start);
            let lb1 = b1.min(para.range.end);
            if lb0 >= lb1 {
                cmap.extend(ls..le);
                continue;
            }

            let (levels, runs) = bidi.visual_runs(para, lb0..lb1);
            let mut visual: Vec<usize> = Vec::with_capacity(le - ls);
            for run in runs {
                let chars: Vec<usize> = text[run.clone()]
                    .char_indices()
                    .map(|(b, _)| byte_to_char[run.start + b])
                    .collect();
                if levels[run.start].is_rtl() {
                    visual.extend(chars.into_iter().rev());
                } else {
                    visual.extend(chars);
                }
            }
            // Bytes clamped out of the paragraph (a trailing '\n') keep
            // their logical slots.
            let mut emitted: Vec<bool> = vec![false; le - ls];
            for &c in &visual {
                if (ls..le).contains(&c) {
                    emitted[c - ls] = true;
                }
            }
            cmap.extend(visual.into_iter().filter(|c| (ls..le).contains(c)));
            for (off, done) in emitted.iter().enumerate() {
                if !done {
                    cmap.push(ls + off);
                }
            }
        }
        debug_assert_eq!(cmap.len(), glyphs.len());
        cmap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::{Face, SquareFace};
    use std::sync::Arc;

    fn glyph(sym: char) -> GlyphInfo {
        GlyphInfo {
            symbol: sym,
            face: Some(Arc::new(SquareFace::new("T")) as Arc<dyn Face>),
            font_size: 20.0,
            scale_x: 1.0,
            scale_y: 1.0,
            ..GlyphInfo::default()
        }
    }

    #[test]
    fn style_runs_split_on_colour_change() {
        let mut glyphs: Vec<GlyphInfo> = "abcd".chars().map(glyph).collect();
        let face = glyphs[0].face.clone();
        for g in &mut glyphs {
            g.face = face.clone();
        }
        glyphs[2].c[0] = 0x12345678;
        glyphs[3].c[0] = 0x12345678;
        split_style_runs(&mut glyphs);
        let starts: Vec<bool> = glyphs.iter().map(|g| g.starts_new_run).collect();
        assert_eq!(starts, vec![true, false, true, false]);
    }

    #[test]
    fn style_runs_split_on_karaoke_timing() {
        let mut glyphs: Vec<GlyphInfo> = "ab".chars().map(glyph).collect();
        let face = glyphs[0].face.clone();
        for g in &mut glyphs {
            g.face = face.clone();
        }
        glyphs[1].effect_type = Effect::Karaoke;
        glyphs[1].effect_timing = 100;
        split_style_runs(&mut glyphs);
        assert!(glyphs[1].starts_new_run);
    }

    #[test]
    fn simple_shaper_maps_characters() {
        let mut glyphs: Vec<GlyphInfo> = "ab".chars().map(glyph).collect();
        SimpleShaper.shape(&mut glyphs, false).unwrap();
        assert_eq!(glyphs[0].parts.len(), 1);
        assert_eq!(glyphs[0].parts[0].glyph_index, 'a' as u32);
        let cmap = SimpleShaper.reorder(&glyphs, false);
        assert_eq!(cmap, vec![0, 1]);
    }

    #[test]
    fn complex_shaper_falls_back_without_shape_hook() {
        // SquareFace has no shaping hook, so the complex shaper takes
        // the fallback path and still fills one part per cluster.
        let mut glyphs: Vec<GlyphInfo> = "hi".chars().map(glyph).collect();
        let face = glyphs[0].face.clone();
        for g in &mut glyphs {
            g.face = face.clone();
        }
        ComplexShaper.shape(&mut glyphs, false).unwrap();
        assert!(glyphs.iter().all(|g| g.parts.len() == 1));
        assert_eq!(glyphs[1].parts[0].glyph_index, 'i' as u32);
    }

    #[test]
    fn complex_reorder_reverses_rtl_text() {
        let mut glyphs: Vec<GlyphInfo> = "אבג".chars().map(glyph).collect();
        let face = glyphs[0].face.clone();
        for g in &mut glyphs {
            g.face = face.clone();
        }
        let cmap = ComplexShaper.reorder(&glyphs, false);
        assert_eq!(cmap, vec![2, 1, 0]);
    }

    #[test]
    fn complex_reorder_keeps_ltr_identity() {
        let glyphs: Vec<GlyphInfo> = "abc".chars().map(glyph).collect();
        let cmap = ComplexShaper.reorder(&glyphs, false);
        assert_eq!(cmap, vec![0, 1, 2]);
    }

    #[test]
    fn reorder_respects_line_boundaries() {
        let mut glyphs: Vec<GlyphInfo> = "ab\ncd".chars().map(glyph).collect();
        glyphs[3].linebreak = 2;
        let cmap = ComplexShaper.reorder(&glyphs, false);
        assert_eq!(cmap.len(), 5);
        // Second line occupies the same visual slots.
        assert_eq!(&cmap[3..], &[3, 4]);
    }

    #[test]
    fn base_direction_follows_encoding() {
        assert!(resolve_base_direction(177));
        assert!(resolve_base_direction(178));
        assert!(!resolve_base_direction(1));
    }
}
