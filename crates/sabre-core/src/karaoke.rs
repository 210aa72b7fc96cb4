// this_file: crates/sabre-core/src/karaoke.rs

//! Karaoke timing: turn per-syllable durations into per-glyph highlight
//! state. Runs after wrapping and before reorder, while glyph x is
//! still monotonic within a run.

use crate::text::Effect;
use crate::track::Event;
use crate::Renderer;

/// Fixed-point denominator for the KF sweep progress.
pub(crate) const KF_PROGRESS_ONE: i64 = 1 << 16;

impl Renderer {
    /// Walk syllables (glyphs carrying a karaoke tag open a syllable
    /// that runs to the next carrier) and write the resolved highlight
    /// into every glyph:
    ///
    /// - `\k`/`\ko`: `effect_timing` becomes 0 (not reached) or 1.
    /// - `\kf`: `effect_timing` becomes sweep progress in units of
    ///   [`KF_PROGRESS_ONE`].
    pub(crate) fn process_karaoke_effects(&mut self, event: &Event) {
        let tm_current = self.time - event.start;
        let glyphs = &mut self.text_info.glyphs;

        // Collect syllable boundaries first: carriers are glyphs with an
        // effect tag; text before the first carrier has no effect.
        let mut boundaries: Vec<usize> = glyphs
            .iter()
            .enumerate()
            .filter(|(_, g)| g.effect_type != Effect::None)
            .map(|(i, _)| i)
            .collect();
        if boundaries.is_empty() {
            return;
        }
        boundaries.push(glyphs.len());

        let mut tm_start: i64 = 0;
        for pair in boundaries.windows(2) {
            let (s, e) = (pair[0], pair[1]);
            let carrier = &glyphs[s];
            let effect = carrier.effect_type;

            if let Some(origin) = carrier.karaoke_origin {
                tm_start = origin;
            }
            tm_start += carrier.effect_skip_timing;
            let duration = carrier.effect_timing.max(0);
            let tm_end = tm_start + duration;

            let value = match effect {
                Effect::Karaoke | Effect::KaraokeKO => i64::from(tm_current >= tm_start),
                Effect::KaraokeKF => {
                    if tm_current < tm_start {
                        0
                    } else if tm_current >= tm_end {
                        KF_PROGRESS_ONE
                    } else {
                        KF_PROGRESS_ONE * (tm_current - tm_start) / duration.max(1)
                    }
                }
                Effect::None => 0,
            };

            for g in &mut glyphs[s..e] {
                g.effect_type = effect;
                g.effect_timing = value;
            }
            tm_start = tm_end;
        }
    }
}
