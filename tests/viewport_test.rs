use pageview::pdf::{
    GestureEvent, ListBounds, Offset, ViewportController, ViewportSize, ViewportState,
};

fn phone() -> ViewportController {
    ViewportController::new(ViewportSize::new(1080.0, 2280.0), 3.0)
}

#[test]
fn double_tap_at_center_toggles_between_fit_and_max_zoom() {
    let controller = phone();
    let center = controller.viewport().center();
    let start = ViewportState::default();

    let zoomed = controller.apply(start, GestureEvent::DoubleTap(center), ListBounds::FREE);
    assert_eq!(zoomed.state.scale, 3.0);
    assert_eq!(zoomed.state.offset, Offset::ZERO);

    let back = controller.apply(
        zoomed.state,
        GestureEvent::DoubleTap(center),
        ListBounds::FREE,
    );
    assert_eq!(back.state, start);
}

#[test]
fn pinch_then_pan_across_the_page() {
    let controller = phone();
    let mut state = ViewportState::default();
    let at_end = ListBounds {
        can_scroll_backward: true,
        can_scroll_forward: false,
    };

    // A pinch delivered as several small frames.
    for _ in 0..10 {
        state = controller
            .apply(
                state,
                GestureEvent::PanZoom {
                    pan: Offset::ZERO,
                    zoom: 1.1,
                },
                ListBounds::FREE,
            )
            .state;
    }
    assert!((state.scale - 1.1f32.powi(10).min(3.0)).abs() < 1e-4);

    // Dragging far right stops at the left edge of the content.
    let moved = controller.apply(
        state,
        GestureEvent::PanZoom {
            pan: Offset::new(5000.0, 0.0),
            zoom: 1.0,
        },
        at_end,
    );
    let edge = controller.edges(moved.state.scale);
    assert_eq!(moved.state.offset.x, edge.x);
    assert!(controller.is_within_bounds(&moved.state));

    // Dragging up at the end of the list moves the content, clamped.
    let up = controller.apply(
        moved.state,
        GestureEvent::PanZoom {
            pan: Offset::new(0.0, -10_000.0),
            zoom: 1.0,
        },
        at_end,
    );
    assert_eq!(up.scroll_delta, 0.0);
    assert_eq!(up.state.offset.y, -edge.y);
}

#[test]
fn unzoomed_pan_only_scrolls_the_list() {
    let controller = phone();
    let out = controller.apply(
        ViewportState::default(),
        GestureEvent::PanZoom {
            pan: Offset::new(30.0, -120.0),
            zoom: 1.0,
        },
        ListBounds::FREE,
    );

    assert_eq!(out.state, ViewportState::default());
    assert_eq!(out.scroll_delta, 120.0);
}

#[test]
fn clamp_repairs_states_from_a_larger_viewport() {
    let mut controller = phone();
    let state = controller.apply(
        ViewportState::default(),
        GestureEvent::DoubleTap(Offset::new(0.0, 0.0)),
        ListBounds::FREE,
    );
    controller.set_viewport(ViewportSize::new(540.0, 1140.0));

    assert!(!controller.is_within_bounds(&state.state));
    let fixed = controller.clamp(state.state);
    assert!(controller.is_within_bounds(&fixed));
    assert_eq!(fixed.offset, Offset::new(540.0, 1140.0));
}
