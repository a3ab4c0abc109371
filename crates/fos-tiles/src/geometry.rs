//! Tiling Geometry
//!
//! Integer rects and sizes in layer or content space, plus the float rect
//! used when scaling between the two. Arithmetic saturates so that huge
//! skewports or scales never wrap around.

/// Integer size
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Size {
    pub width: i32,
    pub height: i32,
}

impl Size {
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    /// True if either dimension is zero or negative
    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Area in pixels (zero when empty)
    pub fn area(&self) -> i64 {
        if self.is_empty() {
            0
        } else {
            self.width as i64 * self.height as i64
        }
    }

    /// Scale and round each dimension up
    pub fn scale_to_ceiled(&self, scale: f32) -> Size {
        Size {
            width: (self.width as f64 * scale as f64).ceil() as i32,
            height: (self.height as f64 * scale as f64).ceil() as i32,
        }
    }
}

/// Integer rectangle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// Rect at the origin covering `size`
    pub const fn from_size(size: Size) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    pub fn right(&self) -> i32 {
        self.x.saturating_add(self.width)
    }

    pub fn bottom(&self) -> i32 {
        self.y.saturating_add(self.height)
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Strict overlap test; empty rects intersect nothing
    pub fn intersects(&self, other: &Rect) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    /// Intersection, or the empty rect when disjoint
    pub fn intersect(&self, other: &Rect) -> Rect {
        if !self.intersects(other) {
            return Rect::default();
        }
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        Rect::new(x, y, right - x, bottom - y)
    }

    /// Bounding union; empty operands are ignored
    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        Rect::new(x, y, right.saturating_sub(x), bottom.saturating_sub(y))
    }

    /// True if `other` lies entirely inside this rect
    pub fn contains(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// Move each edge inwards. Width and height clamp at zero.
    pub fn inset(&self, left: i32, top: i32, right: i32, bottom: i32) -> Rect {
        let width = (self.width as i64 - left as i64 - right as i64).max(0);
        let height = (self.height as i64 - top as i64 - bottom as i64).max(0);
        Rect::new(
            self.x.saturating_add(left),
            self.y.saturating_add(top),
            clamp_i64(width),
            clamp_i64(height),
        )
    }

    /// Grow every edge by `amount`
    pub fn outset(&self, amount: i32) -> Rect {
        let amount = amount.saturating_neg();
        self.inset(amount, amount, amount, amount)
    }

    /// Smallest integer rect enclosing this rect scaled by `scale`
    pub fn scale_to_enclosing(&self, scale: f32) -> Rect {
        RectF::from(*self).scale(scale).to_enclosing_rect()
    }

    /// Manhattan distance between the closest interior points of two rects.
    ///
    /// Zero when they overlap; adjacent rects are one pixel apart.
    pub fn manhattan_internal_distance(&self, other: &Rect) -> i64 {
        let c = self.union(other);
        let x = (c.width as i64 - self.width as i64 - other.width as i64 + 1).max(0);
        let y = (c.height as i64 - self.height as i64 - other.height as i64 + 1).max(0);
        x + y
    }

    /// Parts of this rect not covered by `other` (at most four bands)
    pub fn subtract(&self, other: &Rect) -> Vec<Rect> {
        if !self.intersects(other) {
            return if self.is_empty() { Vec::new() } else { vec![*self] };
        }
        let hole = self.intersect(other);
        let bands = [
            Rect::new(self.x, self.y, self.width, hole.y - self.y),
            Rect::new(self.x, hole.bottom(), self.width, self.bottom() - hole.bottom()),
            Rect::new(self.x, hole.y, hole.x - self.x, hole.height),
            Rect::new(hole.right(), hole.y, self.right() - hole.right(), hole.height),
        ];
        bands.into_iter().filter(|r| !r.is_empty()).collect()
    }
}

fn clamp_i64(value: i64) -> i32 {
    value.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

/// Float rectangle used for scale conversions
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RectF {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl RectF {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn scale(&self, scale: f32) -> RectF {
        RectF::new(self.x * scale, self.y * scale, self.width * scale, self.height * scale)
    }

    /// Round outwards to whole pixels
    pub fn to_enclosing_rect(&self) -> Rect {
        let left = self.x.floor() as f64;
        let top = self.y.floor() as f64;
        let right = (self.x + self.width).ceil() as f64;
        let bottom = (self.y + self.height).ceil() as f64;
        Rect::new(
            left as i32,
            top as i32,
            (right - left).max(0.0) as i32,
            (bottom - top).max(0.0) as i32,
        )
    }
}

impl From<Rect> for RectF {
    fn from(rect: Rect) -> Self {
        RectF::new(rect.x as f32, rect.y as f32, rect.width as f32, rect.height as f32)
    }
}

/// A set of rects; overlap between members is allowed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Region {
    rects: Vec<Rect>,
}

impl Region {
    pub const fn new() -> Self {
        Self { rects: Vec::new() }
    }

    pub fn from_rect(rect: Rect) -> Self {
        let mut region = Self::new();
        region.union_rect(rect);
        region
    }

    /// Add a rect; empty rects are dropped
    pub fn union_rect(&mut self, rect: Rect) {
        if !rect.is_empty() {
            self.rects.push(rect);
        }
    }

    pub fn clear(&mut self) {
        self.rects.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    pub fn rects(&self) -> &[Rect] {
        &self.rects
    }

    /// Bounding box of every member
    pub fn bounds(&self) -> Rect {
        self.rects.iter().fold(Rect::default(), |acc, r| acc.union(r))
    }

    /// True if any member overlaps `rect`
    pub fn intersects(&self, rect: &Rect) -> bool {
        self.rects.iter().any(|r| r.intersects(rect))
    }

    /// True if the union of members covers all of `rect`
    pub fn contains_rect(&self, rect: &Rect) -> bool {
        if rect.is_empty() {
            return false;
        }
        let mut remaining = vec![*rect];
        for member in &self.rects {
            remaining = remaining.iter().flat_map(|r| r.subtract(member)).collect();
            if remaining.is_empty() {
                return true;
            }
        }
        false
    }
}

impl From<Rect> for Region {
    fn from(rect: Rect) -> Self {
        Region::from_rect(rect)
    }
}
