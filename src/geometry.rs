//! Coordinate transforms and the axis-aligned rectangle used for damage,
//! hit-testing bounds, and layer placement.
//!
//! `Rect` is carried over almost unchanged from anyOS's
//! `compositor::rect::Rect` — union/intersect/clip are exactly the
//! operations the damage queue and render loop need. `device_to_window` /
//! `window_to_device` / `aabb_of_rect_in_device` are new: anyOS never
//! rotates windows, only chrome buttons and blur kernels, so the rotation
//! math here is worked out directly from first principles.

use std::f64::consts::PI;

/// An axis-aligned rectangle with integer coordinates, in device space
/// unless documented otherwise.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Rect { x, y, width, height }
    }

    pub fn right(&self) -> i32 {
        self.x + self.width as i32
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height as i32
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn contains(&self, px: i32, py: i32) -> bool {
        px >= self.x && px < self.right() && py >= self.y && py < self.bottom()
    }

    /// Intersection of two rects, `None` if they don't overlap.
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let r = self.right().min(other.right());
        let b = self.bottom().min(other.bottom());
        if r > x && b > y {
            Some(Rect::new(x, y, (r - x) as u32, (b - y) as u32))
        } else {
            None
        }
    }

    /// Bounding box union of two rects.
    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let r = self.right().max(other.right());
        let b = self.bottom().max(other.bottom());
        Rect::new(x, y, (r - x) as u32, (b - y) as u32)
    }

    /// Expand by `n` pixels on every side (used for resize-outline slack).
    pub fn expand(&self, n: i32) -> Rect {
        Rect::new(
            self.x - n,
            self.y - n,
            (self.width as i32 + n * 2).max(0) as u32,
            (self.height as i32 + n * 2).max(0) as u32,
        )
    }

    pub fn clip_to_screen(&self, w: u32, h: u32) -> Rect {
        let x = self.x.max(0);
        let y = self.y.max(0);
        let r = self.right().min(w as i32);
        let b = self.bottom().min(h as i32);
        if r > x && b > y {
            Rect::new(x, y, (r - x) as u32, (b - y) as u32)
        } else {
            Rect::new(0, 0, 0, 0)
        }
    }
}

/// A point in either device or window-local space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Point { x, y }
    }
}

fn deg_to_rad(rot: i64) -> f64 {
    PI * (rot as f64) / 180.0
}

/// Rotate `p` by `angle_deg` degrees (counterclockwise for positive angles,
/// screen y-down) about `center`.
fn rotate_about(p: Point, center: Point, angle_deg: i64) -> Point {
    if angle_deg % 360 == 0 {
        return p;
    }
    let theta = deg_to_rad(angle_deg);
    let (sin, cos) = theta.sin_cos();
    let dx = p.x - center.x;
    let dy = p.y - center.y;
    Point::new(
        center.x + dx * cos - dy * sin,
        center.y + dx * sin + dy * cos,
    )
}

/// Map a device-space point into a window's local coordinate space.
/// Positive `rotation` is counterclockwise at composite time, so hit-testing
/// (which must undo the composite transform) rotates by `-rotation`.
pub fn device_to_window(
    win_x: i32,
    win_y: i32,
    win_w: u32,
    win_h: u32,
    rotation: i64,
    dx: i32,
    dy: i32,
) -> (i32, i32) {
    let local = Point::new((dx - win_x) as f64, (dy - win_y) as f64);
    if rotation % 360 == 0 {
        return (local.x.trunc() as i32, local.y.trunc() as i32);
    }
    let center = Point::new(win_w as f64 / 2.0, win_h as f64 / 2.0);
    let p = rotate_about(local, center, -rotation);
    (p.x.trunc() as i32, p.y.trunc() as i32)
}

/// Inverse of `device_to_window`: map a window-local point back to device space.
pub fn window_to_device(
    win_x: i32,
    win_y: i32,
    win_w: u32,
    win_h: u32,
    rotation: i64,
    wx: i32,
    wy: i32,
) -> (i32, i32) {
    let local = Point::new(wx as f64, wy as f64);
    let rotated = if rotation % 360 == 0 {
        local
    } else {
        let center = Point::new(win_w as f64 / 2.0, win_h as f64 / 2.0);
        rotate_about(local, center, rotation)
    };
    (
        (rotated.x + win_x as f64).trunc() as i32,
        (rotated.y + win_y as f64).trunc() as i32,
    )
}

/// Axis-aligned bounding box, in device coordinates, of a window-local rect
/// `(x, y, width, height)` after the window's rotation is applied. For
/// `rotation == 0` this is exactly the window-local rect translated to
/// device space.
pub fn aabb_of_rect_in_device(
    win_x: i32,
    win_y: i32,
    win_w: u32,
    win_h: u32,
    rotation: i64,
    x: i32,
    y: i32,
    width: u32,
    height: u32,
) -> Rect {
    if rotation % 360 == 0 {
        return Rect::new(win_x + x, win_y + y, width, height);
    }

    let corners = [
        (x, y),
        (x + width as i32, y),
        (x, y + height as i32),
        (x + width as i32, y + height as i32),
    ];

    let mut min_x = i32::MAX;
    let mut min_y = i32::MAX;
    let mut max_x = i32::MIN;
    let mut max_y = i32::MIN;
    for (cx, cy) in corners {
        let (dx, dy) = window_to_device(win_x, win_y, win_w, win_h, rotation, cx, cy);
        min_x = min_x.min(dx);
        min_y = min_y.min(dy);
        max_x = max_x.max(dx);
        max_y = max_y.max(dy);
    }
    Rect::new(min_x, min_y, (max_x - min_x).max(0) as u32, (max_y - min_y).max(0) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersect_overlapping() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(5, 5, 10, 10);
        assert_eq!(a.intersect(&b), Some(Rect::new(5, 5, 5, 5)));
    }

    #[test]
    fn intersect_disjoint_is_none() {
        let a = Rect::new(0, 0, 5, 5);
        let b = Rect::new(10, 10, 5, 5);
        assert_eq!(a.intersect(&b), None);
    }

    #[test]
    fn union_contains_both() {
        let a = Rect::new(0, 0, 5, 5);
        let b = Rect::new(10, 10, 5, 5);
        assert_eq!(a.union(&b), Rect::new(0, 0, 15, 15));
    }

    #[test]
    fn round_trip_zero_rotation() {
        let (wx, wy) = device_to_window(80, 80, 100, 100, 0, 100, 100);
        assert_eq!((wx, wy), (20, 20));
        let (dx, dy) = window_to_device(80, 80, 100, 100, 0, wx, wy);
        assert_eq!((dx, dy), (100, 100));
    }

    #[test]
    fn round_trip_with_rotation_is_approximately_inverse() {
        for rot in [0, 30, 45, 90, 180, -37] {
            let (wx, wy) = device_to_window(50, 60, 200, 100, rot, 120, 90);
            let (dx, dy) = window_to_device(50, 60, 200, 100, rot, wx, wy);
            // Integer truncation at each stage means this is only approximate.
            assert!((dx - 120).abs() <= 2, "rot={rot} dx={dx}");
            assert!((dy - 90).abs() <= 2, "rot={rot} dy={dy}");
        }
    }

    #[test]
    fn aabb_zero_rotation_is_exact_rect() {
        let r = aabb_of_rect_in_device(10, 20, 100, 50, 0, 0, 0, 100, 50);
        assert_eq!(r, Rect::new(10, 20, 100, 50));
    }

    #[test]
    fn aabb_rotated_contains_transformed_corners() {
        let win_x = 0;
        let win_y = 0;
        let w = 100;
        let h = 50;
        let rot = 45;
        let r = aabb_of_rect_in_device(win_x, win_y, w, h, rot, 0, 0, w, h);
        for (cx, cy) in [(0, 0), (w as i32, 0), (0, h as i32), (w as i32, h as i32)] {
            let (dx, dy) = window_to_device(win_x, win_y, w, h, rot, cx, cy);
            assert!(r.contains(dx, dy) || dx == r.right() || dy == r.bottom());
        }
    }
}
