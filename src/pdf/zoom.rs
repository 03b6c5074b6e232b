//! Zoom and pan state for the page list
//!
//! Converts double-tap and pinch/pan gestures into a clamped scale + offset
//! and decides how much of a vertical pan should scroll the page list
//! instead of moving the zoomed content.

/// A point or displacement in viewport pixels
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Offset {
    pub x: f32,
    pub y: f32,
}

impl Offset {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    fn finite_or_zero(self) -> Self {
        Self {
            x: if self.x.is_finite() { self.x } else { 0.0 },
            y: if self.y.is_finite() { self.y } else { 0.0 },
        }
    }
}

/// Size of the visible rectangle in pixels
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewportSize {
    pub width: f32,
    pub height: f32,
}

impl ViewportSize {
    #[must_use]
    pub fn new(width: f32, height: f32) -> Self {
        let sane = |v: f32| if v.is_finite() { v.max(0.0) } else { 0.0 };
        Self {
            width: sane(width),
            height: sane(height),
        }
    }

    #[must_use]
    pub fn center(&self) -> Offset {
        Offset::new(self.width / 2.0, self.height / 2.0)
    }
}

/// Scale and translation applied to the page list
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewportState {
    /// Zoom factor, `1.0` = fit width
    pub scale: f32,
    /// Translation of the zoomed content from its centered position
    pub offset: Offset,
}

impl Default for ViewportState {
    fn default() -> Self {
        Self {
            scale: 1.0,
            offset: Offset::ZERO,
        }
    }
}

/// Discrete gesture input
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GestureEvent {
    /// Double tap at a viewport position
    DoubleTap(Offset),
    /// One frame of a pinch/drag: pan displacement and multiplicative zoom
    PanZoom { pan: Offset, zoom: f32 },
}

/// Whether the page list can still scroll in each direction
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ListBounds {
    pub can_scroll_backward: bool,
    pub can_scroll_forward: bool,
}

impl ListBounds {
    /// A list that can scroll both ways (somewhere in the middle)
    pub const FREE: Self = Self {
        can_scroll_backward: true,
        can_scroll_forward: true,
    };
}

/// Result of applying one gesture
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transition {
    pub state: ViewportState,
    /// Amount to scroll the page list by, in list pixels
    pub scroll_delta: f32,
}

/// Pure transform state machine
///
/// Invariant kept by every transition: `scale` lies in `[1, max_zoom]` and
/// `offset` lies inside `[-edge_x, edge_x] x [-edge_y, edge_y]` for that
/// scale, where `edge = (viewport * scale - viewport) / 2`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewportController {
    viewport: ViewportSize,
    max_zoom: f32,
}

impl ViewportController {
    pub const DEFAULT_MAX_ZOOM: f32 = 3.0;

    #[must_use]
    pub fn new(viewport: ViewportSize, max_zoom: f32) -> Self {
        let max_zoom = if max_zoom.is_finite() {
            max_zoom.max(1.0)
        } else {
            Self::DEFAULT_MAX_ZOOM
        };
        Self { viewport, max_zoom }
    }

    #[must_use]
    pub fn viewport(&self) -> ViewportSize {
        self.viewport
    }

    #[must_use]
    pub fn max_zoom(&self) -> f32 {
        self.max_zoom
    }

    pub fn set_viewport(&mut self, viewport: ViewportSize) {
        self.viewport = viewport;
    }

    /// Largest offset magnitude allowed on each axis at `scale`
    #[must_use]
    pub fn edges(&self, scale: f32) -> Offset {
        Offset::new(
            ((self.viewport.width * scale - self.viewport.width) / 2.0).max(0.0),
            ((self.viewport.height * scale - self.viewport.height) / 2.0).max(0.0),
        )
    }

    /// Bring an arbitrary state back inside the invariant
    #[must_use]
    pub fn clamp(&self, state: ViewportState) -> ViewportState {
        let scale = self.clamp_scale(state.scale);
        ViewportState {
            scale,
            offset: self.clamp_offset(state.offset.finite_or_zero(), scale),
        }
    }

    #[must_use]
    pub fn is_within_bounds(&self, state: &ViewportState) -> bool {
        let edge = self.edges(state.scale);
        (1.0..=self.max_zoom).contains(&state.scale)
            && state.offset.x.abs() <= edge.x
            && state.offset.y.abs() <= edge.y
    }

    /// Apply one gesture to `state`
    #[must_use]
    pub fn apply(
        &self,
        state: ViewportState,
        event: GestureEvent,
        list: ListBounds,
    ) -> Transition {
        match event {
            GestureEvent::DoubleTap(point) => Transition {
                state: self.double_tap(state, point),
                scroll_delta: 0.0,
            },
            GestureEvent::PanZoom { pan, zoom } => self.pan_zoom(state, pan, zoom, list),
        }
    }

    fn double_tap(&self, state: ViewportState, point: Offset) -> ViewportState {
        if state.scale > 1.0 {
            return ViewportState::default();
        }

        let center = self.viewport.center();
        let point = if point.x.is_finite() && point.y.is_finite() {
            point
        } else {
            center
        };
        // Shift so the tapped point ends up in the middle of the viewport.
        let factor = self.max_zoom - 1.0;
        let offset = Offset::new(
            -(point.x - center.x) * factor,
            -(point.y - center.y) * factor,
        );

        ViewportState {
            scale: self.max_zoom,
            offset: self.clamp_offset(offset, self.max_zoom),
        }
    }

    fn pan_zoom(
        &self,
        state: ViewportState,
        pan: Offset,
        zoom: f32,
        list: ListBounds,
    ) -> Transition {
        let pan = pan.finite_or_zero();
        let zoom = if zoom.is_finite() && zoom > 0.0 { zoom } else { 1.0 };
        let scale = self.clamp_scale(state.scale * zoom);
        let edge = self.edges(scale);
        let current = state.offset.finite_or_zero();

        let x = (current.x + pan.x).clamp(-edge.x, edge.x);

        // Dragging up pushes toward the end of the list, dragging down toward
        // the start. Only once the list is stuck at that end does the drag
        // move the zoomed content vertically.
        let at_end = pan.y < 0.0 && !list.can_scroll_forward;
        let at_start = pan.y > 0.0 && !list.can_scroll_backward;
        let (y, scroll_delta) = if at_end || at_start {
            ((current.y + pan.y).clamp(-edge.y, edge.y), 0.0)
        } else if pan.y == 0.0 {
            (current.y.clamp(-edge.y, edge.y), 0.0)
        } else {
            (current.y.clamp(-edge.y, edge.y), -pan.y / scale)
        };

        Transition {
            state: ViewportState {
                scale,
                offset: Offset::new(x, y),
            },
            scroll_delta,
        }
    }

    fn clamp_scale(&self, scale: f32) -> f32 {
        if scale.is_finite() {
            scale.clamp(1.0, self.max_zoom)
        } else {
            1.0
        }
    }

    fn clamp_offset(&self, offset: Offset, scale: f32) -> Offset {
        let edge = self.edges(scale);
        Offset::new(
            offset.x.clamp(-edge.x, edge.x),
            offset.y.clamp(-edge.y, edge.y),
        )
    }
}

impl Default for ViewportController {
    fn default() -> Self {
        Self::new(ViewportSize::new(0.0, 0.0), Self::DEFAULT_MAX_ZOOM)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn controller() -> ViewportController {
        ViewportController::new(ViewportSize::new(1000.0, 2000.0), 3.0)
    }

    fn pan(dx: f32, dy: f32) -> GestureEvent {
        GestureEvent::PanZoom {
            pan: Offset::new(dx, dy),
            zoom: 1.0,
        }
    }

    #[test]
    fn double_tap_toggles_zoom_at_center() {
        let c = controller();
        let center = c.viewport().center();

        let zoomed = c.apply(
            ViewportState::default(),
            GestureEvent::DoubleTap(center),
            ListBounds::FREE,
        );
        assert_eq!(zoomed.state.scale, 3.0);
        assert_eq!(zoomed.state.offset, Offset::ZERO);

        let reset = c.apply(
            zoomed.state,
            GestureEvent::DoubleTap(center),
            ListBounds::FREE,
        );
        assert_eq!(reset.state, ViewportState::default());
    }

    #[test]
    fn double_tap_centers_tapped_point() {
        let c = controller();
        let tapped = c.apply(
            ViewportState::default(),
            GestureEvent::DoubleTap(Offset::new(600.0, 900.0)),
            ListBounds::FREE,
        );

        // (600 - 500) * 2 = 200, (900 - 1000) * 2 = -200
        assert_eq!(tapped.state.offset, Offset::new(-200.0, 200.0));
        assert!(c.is_within_bounds(&tapped.state));
    }

    #[test]
    fn double_tap_outside_viewport_is_clamped() {
        let c = controller();
        let tapped = c.apply(
            ViewportState::default(),
            GestureEvent::DoubleTap(Offset::new(5000.0, -5000.0)),
            ListBounds::FREE,
        );
        assert_eq!(tapped.state.offset, Offset::new(-1000.0, 2000.0));
    }

    #[test]
    fn zoom_is_clamped_to_range() {
        let c = controller();
        let out = c.apply(
            ViewportState::default(),
            GestureEvent::PanZoom {
                pan: Offset::ZERO,
                zoom: 0.2,
            },
            ListBounds::FREE,
        );
        assert_eq!(out.state.scale, 1.0);

        let big = c.apply(
            ViewportState::default(),
            GestureEvent::PanZoom {
                pan: Offset::ZERO,
                zoom: 50.0,
            },
            ListBounds::FREE,
        );
        assert_eq!(big.state.scale, 3.0);
    }

    #[test]
    fn horizontal_pan_is_clamped_to_edge() {
        let c = controller();
        let state = ViewportState {
            scale: 2.0,
            offset: Offset::ZERO,
        };

        let moved = c.apply(state, pan(10_000.0, 0.0), ListBounds::FREE);
        // edge_x = (1000 * 2 - 1000) / 2
        assert_eq!(moved.state.offset.x, 500.0);
        assert_eq!(moved.scroll_delta, 0.0);
    }

    #[test]
    fn vertical_pan_scrolls_list_while_it_can_move() {
        let c = controller();
        let state = ViewportState {
            scale: 2.0,
            offset: Offset::new(0.0, 30.0),
        };

        let moved = c.apply(state, pan(0.0, -100.0), ListBounds::FREE);

        assert_eq!(moved.state.offset.y, 30.0);
        assert_eq!(moved.scroll_delta, 50.0);
    }

    #[test]
    fn vertical_pan_moves_content_at_list_boundary() {
        let c = controller();
        let state = ViewportState {
            scale: 2.0,
            offset: Offset::ZERO,
        };
        let at_end = ListBounds {
            can_scroll_backward: true,
            can_scroll_forward: false,
        };

        let up = c.apply(state, pan(0.0, -100.0), at_end);
        assert_eq!(up.state.offset.y, -100.0);
        assert_eq!(up.scroll_delta, 0.0);

        // Dragging back down can still scroll the list backward.
        let down = c.apply(up.state, pan(0.0, 40.0), at_end);
        assert_eq!(down.state.offset.y, -100.0);
        assert_eq!(down.scroll_delta, -20.0);
    }

    #[test]
    fn zooming_out_pulls_offset_back_inside() {
        let c = controller();
        let state = ViewportState {
            scale: 3.0,
            offset: Offset::new(1000.0, -2000.0),
        };

        let out = c.apply(
            state,
            GestureEvent::PanZoom {
                pan: Offset::ZERO,
                zoom: 0.5,
            },
            ListBounds::FREE,
        );

        assert_eq!(out.state.scale, 1.5);
        assert_eq!(out.state.offset, Offset::new(250.0, -500.0));
    }

    #[test]
    fn non_finite_input_is_ignored() {
        let c = controller();
        let state = ViewportState {
            scale: 2.0,
            offset: Offset::new(10.0, 10.0),
        };

        let out = c.apply(
            state,
            GestureEvent::PanZoom {
                pan: Offset::new(f32::NAN, f32::INFINITY),
                zoom: f32::NAN,
            },
            ListBounds::FREE,
        );

        assert_eq!(out.state, state);
        assert!(out.scroll_delta.is_finite());
    }

    fn gesture() -> impl Strategy<Value = GestureEvent> {
        prop_oneof![
            (-200.0f32..1200.0, -200.0f32..2200.0)
                .prop_map(|(x, y)| GestureEvent::DoubleTap(Offset::new(x, y))),
            (-3000.0f32..3000.0, -3000.0f32..3000.0, 0.05f32..8.0).prop_map(
                |(dx, dy, zoom)| GestureEvent::PanZoom {
                    pan: Offset::new(dx, dy),
                    zoom,
                },
            ),
        ]
    }

    fn list_bounds() -> impl Strategy<Value = ListBounds> {
        (any::<bool>(), any::<bool>()).prop_map(|(back, fwd)| ListBounds {
            can_scroll_backward: back,
            can_scroll_forward: fwd,
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn every_transition_stays_in_bounds(
            events in prop::collection::vec((gesture(), list_bounds()), 1..40),
        ) {
            let c = controller();
            let mut state = ViewportState::default();
            for (event, list) in events {
                let next = c.apply(state, event, list);
                prop_assert!(c.is_within_bounds(&next.state), "{:?} -> {:?}", event, next.state);
                prop_assert!(next.scroll_delta.is_finite());
                state = next.state;
            }
        }
    }
}
