// this_file: crates/sabre/tests/scenarios.rs

//! End-to-end scenarios through the public API, with a synthetic
//! square-glyph face so no font files are required.

use std::sync::Arc;

use sabre::{
    ChangeLevel, Event, Library, MemoryFontProvider, Renderer, SquareFace, Style, Track,
};

fn renderer() -> Renderer {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut provider = MemoryFontProvider::new();
    provider.add_face("Arial", false, false, Arc::new(SquareFace::new("Arial")));
    let library = Arc::new(Library::with_provider(Box::new(provider)));
    let mut r = Renderer::new(library).unwrap();
    r.set_frame_size(640, 480);
    r
}

fn track() -> Track {
    Track {
        play_res_x: 640,
        play_res_y: 480,
        styles: vec![Style::default()],
        ..Track::default()
    }
}

fn event(text: &str) -> Event {
    Event {
        start: 0,
        duration: 1000,
        text: text.into(),
        ..Event::default()
    }
}

#[test]
fn hello_bottom_aligned_with_margin() {
    let mut r = renderer();
    let mut t = track();
    let mut e = event("Hello");
    e.margin_v = 20;
    t.events.push(e);

    let (frame, _) = r.render_frame(&t, 100);
    let frame = frame.unwrap();
    assert!(!frame.images.is_empty());

    // Default style carries an outline and shadow: shadow, border and
    // fill layers for one run.
    assert_eq!(frame.images.len(), 3);

    // The fill layer sits near the bottom margin.
    let fill = frame.images.last().unwrap();
    let bottom = fill.dst_y + fill.h;
    assert!(
        (bottom - (480 - 20)).abs() < 8,
        "fill bottom = {bottom}, expected near 460"
    );
    // Centred horizontally.
    let centre = fill.dst_x + fill.w / 2;
    assert!((centre - 320).abs() < 8, "fill centre = {centre}");
}

#[test]
fn same_anchor_events_stack_upwards() {
    let mut r = renderer();
    let mut t = track();
    let mut first = event("First line");
    first.read_order = 1;
    let mut second = event("Second line");
    second.read_order = 2;
    t.events.push(first);
    t.events.push(second);

    let (frame, _) = r.render_frame(&t, 100);
    let frame = frame.unwrap();

    // Both events render; the second event's images all sit above the
    // first event's images (subtitles shift up).
    let per_event = frame.images.len() / 2;
    let first_top = frame.images[..per_event]
        .iter()
        .map(|i| i.dst_y)
        .min()
        .unwrap();
    let second_bottom = frame.images[per_event..]
        .iter()
        .map(|i| i.dst_y + i.h)
        .max()
        .unwrap();
    assert!(
        second_bottom <= first_top + 4,
        "second event bottom {second_bottom} vs first top {first_top}"
    );
}

#[test]
fn positioned_event_is_independent_of_use_margins() {
    let mut r = renderer();
    let mut t = track();
    t.events.push(event("{\\pos(100,200)}X"));

    let (f1, _) = r.render_frame(&t, 100);
    r.set_use_margins(true);
    let (f2, _) = r.render_frame(&t, 100);

    let (a, b) = (f1.unwrap(), f2.unwrap());
    assert_eq!(a.images[0].dst_x, b.images[0].dst_x);
    assert_eq!(a.images[0].dst_y, b.images[0].dst_y);
}

#[test]
fn rotation_changes_projection_and_subpixel_quantization_is_stable() {
    let mut r = renderer();

    // 3D rotation produces a different raster than the flat text.
    let mut t = track();
    t.events.push(event("{\\bord0\\shad0\\pos(300,200)}W"));
    let (flat, _) = r.render_frame(&t, 100);
    let flat = flat.unwrap();

    let mut t = track();
    t.events
        .push(event("{\\bord0\\shad0\\pos(300,200)\\frx45\\fry45}W"));
    let (rot, c) = r.render_frame(&t, 100);
    let rot = rot.unwrap();
    assert_eq!(c, ChangeLevel::ContentChanged);
    assert_ne!(
        (flat.images[0].w, flat.images[0].h),
        (rot.images[0].w, rot.images[0].h),
    );

    // A whole-pixel move reuses the cached bitmap (same sub-pixel
    // phase): position-only change. A fractional move crosses the
    // 1/8-pixel quantization step and re-rasterizes.
    let mut t = track();
    t.events.push(event("{\\bord0\\shad0\\pos(300,200)}W"));
    let (f1, _) = r.render_frame(&t, 100);
    let mut t = track();
    t.events.push(event("{\\bord0\\shad0\\pos(301,200)}W"));
    let (f2, c2) = r.render_frame(&t, 100);
    assert_eq!(c2, ChangeLevel::PositionChanged);

    let mut t = track();
    t.events.push(event("{\\bord0\\shad0\\pos(300.4,200)}W"));
    let (f3, c3) = r.render_frame(&t, 100);
    assert_eq!(c3, ChangeLevel::ContentChanged, "0.4px crosses the step");
    drop((f1, f2, f3));
}

#[test]
fn kf_karaoke_sweeps_from_secondary_to_primary() {
    let style = Style::default();
    let primary = style.primary_colour;
    let secondary = style.secondary_colour;

    let fills_at = |now: i64| -> Vec<(u32, i32)> {
        let mut r = renderer();
        let mut t = track();
        let mut e = event("{\\bord0\\shad0\\kf50}ab{\\kf50}cd");
        e.duration = 3000;
        t.events.push(e);
        let (frame, _) = r.render_frame(&t, now);
        frame
            .unwrap()
            .images
            .iter()
            .map(|i| (i.color, i.w))
            .collect()
    };

    let width_of = |frames: &[(u32, i32)], colour: u32| {
        frames
            .iter()
            .filter(|(c, _)| *c == colour)
            .map(|(_, w)| *w)
            .sum::<i32>()
    };

    // Before the first syllable almost everything still shows the
    // secondary colour; nothing meaningful has been swept.
    let before = fills_at(0);
    assert!(width_of(&before, secondary) > 0);
    assert!(width_of(&before, primary) <= 2);

    // After both syllables everything swept to primary.
    let after = fills_at(2500);
    assert!(width_of(&after, primary) > 0);
    assert_eq!(width_of(&after, secondary), 0);

    // The swept width grows monotonically with time.
    let mut last = -1;
    for now in [100, 250, 400, 900, 1400] {
        let w = width_of(&fills_at(now), primary);
        assert!(w >= last, "sweep must advance monotonically");
        last = w;
    }
}

#[test]
fn k_karaoke_switches_colour_per_syllable() {
    let style = Style::default();
    let (primary, secondary) = (style.primary_colour, style.secondary_colour);

    let colours_at = |now: i64| -> Vec<u32> {
        let mut r = renderer();
        let mut t = track();
        let mut e = event("{\\bord0\\shad0\\k50}ab{\\k50}cd");
        e.duration = 3000;
        t.events.push(e);
        let (frame, _) = r.render_frame(&t, now);
        frame.unwrap().images.iter().map(|i| i.color).collect()
    };

    // First syllable highlighted, second not yet.
    let mid = colours_at(250);
    assert!(mid.contains(&primary));
    assert!(mid.contains(&secondary));

    let done = colours_at(1500);
    assert!(done.iter().all(|c| *c == primary));
}

#[test]
fn repeated_frames_and_move_change_levels() {
    let mut r = renderer();
    let mut t = track();
    t.events.push(event("{\\move(0,100,400,100)}Drift"));

    let (_, c1) = r.render_frame(&t, 100);
    assert_eq!(c1, ChangeLevel::ContentChanged);
    let (_, c2) = r.render_frame(&t, 100);
    assert_eq!(c2, ChangeLevel::Identical);
    let (_, c3) = r.render_frame(&t, 600);
    assert_eq!(c3, ChangeLevel::PositionChanged);
}

#[test]
fn scroll_and_banner_events_render() {
    let mut r = renderer();
    let mut t = track();
    let mut banner = event("Breaking news ticker");
    banner.effect = "Banner;10".into();
    banner.read_order = 1;
    let mut scroll = event("credits roll here");
    scroll.effect = "Scroll up;0;480;8".into();
    scroll.read_order = 2;
    t.events.push(banner);
    t.events.push(scroll);

    let (f1, _) = r.render_frame(&t, 100);
    let (f2, _) = r.render_frame(&t, 400);
    let (a, b) = (f1.unwrap(), f2.unwrap());
    assert!(!a.images.is_empty() && !b.images.is_empty());
    // The banner moved horizontally between the frames.
    assert_ne!(a.images[0].dst_x, b.images[0].dst_x);
}

#[test]
fn glyph_info_reports_monotonic_positions() {
    let mut r = renderer();
    let mut t = track();
    t.events.push(event("Wide"));
    let glyphs = r.glyph_info(&t, 100);
    assert_eq!(glyphs.len(), 4);
    for pair in glyphs.windows(2) {
        assert!(pair[0].pos_x < pair[1].pos_x);
    }
    assert!(glyphs.iter().all(|g| !g.segments.is_empty()));
}

#[test]
fn frames_can_outlive_the_renderer() {
    let frame = {
        let mut r = renderer();
        let mut t = track();
        t.events.push(event("Persist"));
        let (frame, _) = r.render_frame(&t, 100);
        frame.unwrap()
    };
    // The caller's Arc keeps the pixels alive after renderer teardown.
    let img = &frame.images[0];
    assert!(img.w > 0);
    let _ = img.row(0);
}

#[test]
fn border_style_3_draws_an_opaque_box() {
    let mut r = renderer();
    let mut t = track();
    t.events.push(event("Boxed"));
    t.styles[0].border_style = 3;
    t.styles[0].outline = 2.0;

    let (frame, _) = r.render_frame(&t, 100);
    let frame = frame.unwrap();
    assert!(frame.images.len() >= 2);
    // The box layer is wider than the fill layer it backs.
    let box_w = frame.images[..frame.images.len() - 1]
        .iter()
        .map(|i| i.w)
        .max()
        .unwrap();
    let fill_w = frame.images.last().unwrap().w;
    assert!(box_w >= fill_w);
}
