#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_corners(a: Point, b: Point) -> Self {
        let x = a.x.min(b.x);
        let y = a.y.min(b.y);
        Self::new(x, y, (a.x - b.x).abs(), (a.y - b.y).abs())
    }

    pub fn origin(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn far_corner(&self) -> Point {
        Point::new(self.x + self.width, self.y + self.height)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Orientation {
    #[default]
    Rotate0,
    Rotate90,
    Rotate180,
    Rotate270,
    FlipHorizontal,
    FlipVertical,
}

impl Orientation {
    pub const ALL: [Orientation; 6] = [
        Orientation::Rotate0,
        Orientation::Rotate90,
        Orientation::Rotate180,
        Orientation::Rotate270,
        Orientation::FlipHorizontal,
        Orientation::FlipVertical,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Orientation::Rotate0 => "0°",
            Orientation::Rotate90 => "90°",
            Orientation::Rotate180 => "180°",
            Orientation::Rotate270 => "270°",
            Orientation::FlipHorizontal => "flip-h",
            Orientation::FlipVertical => "flip-v",
        }
    }

    pub fn next(self) -> Self {
        let idx = Self::ALL.iter().position(|o| *o == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }

    pub fn swaps_axes(self) -> bool {
        matches!(self, Orientation::Rotate90 | Orientation::Rotate270)
    }

    /// Linear part in screen space (y grows downward, rotation clockwise).
    fn linear(self) -> Affine {
        let [a, b, c, d] = match self {
            Orientation::Rotate0 => [1.0, 0.0, 0.0, 1.0],
            Orientation::Rotate90 => [0.0, 1.0, -1.0, 0.0],
            Orientation::Rotate180 => [-1.0, 0.0, 0.0, -1.0],
            Orientation::Rotate270 => [0.0, -1.0, 1.0, 0.0],
            Orientation::FlipHorizontal => [-1.0, 0.0, 0.0, 1.0],
            Orientation::FlipVertical => [1.0, 0.0, 0.0, -1.0],
        };
        Affine([a, b, c, d, 0.0, 0.0])
    }
}

/// 2D affine map `[a, b, c, d, e, f]`: `x' = a*x + c*y + e`, `y' = b*x + d*y + f`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine(pub [f64; 6]);

impl Default for Affine {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Affine {
    pub const IDENTITY: Self = Self([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    pub fn translate(dx: f64, dy: f64) -> Self {
        Self([1.0, 0.0, 0.0, 1.0, dx, dy])
    }

    pub fn scale(s: f64) -> Self {
        Self([s, 0.0, 0.0, s, 0.0, 0.0])
    }

    /// `self` applied after `inner`.
    pub fn compose(self, inner: Affine) -> Affine {
        let [oa, ob, oc, od, oe, of] = self.0;
        let [ia, ib, ic, id, ie, if_] = inner.0;
        Affine([
            oa * ia + oc * ib,
            ob * ia + od * ib,
            oa * ic + oc * id,
            ob * ic + od * id,
            oa * ie + oc * if_ + oe,
            ob * ie + od * if_ + of,
        ])
    }

    pub fn apply(&self, p: Point) -> Point {
        let [a, b, c, d, e, f] = self.0;
        Point::new(a * p.x + c * p.y + e, b * p.x + d * p.y + f)
    }

    /// Maps an axis-aligned rect; exact for the quarter-turn and flip
    /// transforms built by [`view_transform`].
    pub fn apply_rect(&self, rect: Rect) -> Rect {
        Rect::from_corners(self.apply(rect.origin()), self.apply(rect.far_corner()))
    }
}

/// Output canvas size for a frame of `size` at `scale`.
pub fn view_size(size: Size, scale: f64, orientation: Orientation) -> Size {
    let scaled = Size::new(size.width * scale, size.height * scale);
    if orientation.swaps_axes() {
        Size::new(scaled.height, scaled.width)
    } else {
        scaled
    }
}

/// Translate the frame center to the origin, scale, rotate or flip, then
/// translate to the center of the output canvas.
pub fn view_transform(size: Size, scale: f64, orientation: Orientation) -> Affine {
    let out = view_size(size, scale, orientation);
    Affine::translate(out.width / 2.0, out.height / 2.0)
        .compose(orientation.linear())
        .compose(Affine::scale(scale))
        .compose(Affine::translate(-size.width / 2.0, -size.height / 2.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_view_keeps_points() {
        let t = view_transform(Size::new(100.0, 50.0), 1.0, Orientation::Rotate0);
        assert_eq!(t.apply(Point::new(10.0, 20.0)), Point::new(10.0, 20.0));
    }

    #[test]
    fn quarter_turn_maps_top_left_to_top_right() {
        let size = Size::new(100.0, 50.0);
        let t = view_transform(size, 1.0, Orientation::Rotate90);
        assert_eq!(view_size(size, 1.0, Orientation::Rotate90), Size::new(50.0, 100.0));
        assert_eq!(t.apply(Point::new(0.0, 0.0)), Point::new(50.0, 0.0));
        assert_eq!(
            t.apply_rect(Rect::new(0.0, 0.0, 10.0, 10.0)),
            Rect::new(40.0, 0.0, 10.0, 10.0)
        );
    }

    #[test]
    fn flips_and_scale() {
        let size = Size::new(100.0, 50.0);
        let h = view_transform(size, 2.0, Orientation::FlipHorizontal);
        assert_eq!(h.apply(Point::new(0.0, 0.0)), Point::new(200.0, 0.0));
        let v = view_transform(size, 1.0, Orientation::FlipVertical);
        assert_eq!(v.apply(Point::new(0.0, 0.0)), Point::new(0.0, 50.0));
        let r = view_transform(size, 1.0, Orientation::Rotate180);
        assert_eq!(r.apply(Point::new(0.0, 0.0)), Point::new(100.0, 50.0));
    }

    #[test]
    fn orientation_cycles_through_all() {
        let mut o = Orientation::Rotate0;
        for _ in 0..Orientation::ALL.len() {
            o = o.next();
        }
        assert_eq!(o, Orientation::Rotate0);
    }
}
