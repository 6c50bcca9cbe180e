/// Rectangle structure for treemap layout
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    /// Area shared with `other`; zero when they only touch.
    pub fn overlap_area(&self, other: &Rect) -> f32 {
        let w = self.right().min(other.right()) - self.x.max(other.x);
        let h = self.bottom().min(other.bottom()) - self.y.max(other.y);
        if w <= 0.0 || h <= 0.0 {
            0.0
        } else {
            w * h
        }
    }
}

/// Item to be laid out in the treemap
#[derive(Debug, Clone)]
pub struct TreemapItem {
    pub size: u64,
    /// Caller's index, carried through to the result.
    pub index: usize,
}

/// Result of the treemap layout calculation
#[derive(Debug, Clone)]
pub struct LayoutRect {
    pub rect: Rect,
    pub index: usize,
    /// Which band the item was placed in, counting from 0.
    pub band: usize,
}

/// Placed items in drawing order: largest first.
#[derive(Debug, Clone, Default)]
pub struct TreemapLayout {
    rects: Vec<LayoutRect>,
}

impl TreemapLayout {
    /// Rectangle assigned to the item with this caller index.
    pub fn get(&self, index: usize) -> Option<Rect> {
        self.rects.iter().find(|r| r.index == index).map(|r| r.rect)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LayoutRect> {
        self.rects.iter()
    }

    pub fn len(&self) -> usize {
        self.rects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    /// Caller index of the item drawn at this point, if any.
    pub fn hit(&self, x: f32, y: f32) -> Option<usize> {
        self.rects
            .iter()
            .find(|r| r.rect.contains(x, y))
            .map(|r| r.index)
    }
}

/// Band treemap.
///
/// Items are taken largest first and grouped into bands; a band closes once
/// its sizes reach half of the total of *all* items, or at the last item. Each
/// band is a strip along the longer side of what is left of the container,
/// as thick as its share of the total times the remaining thickness, and its
/// members split the strip in proportion to their sizes.
///
/// Because every band's share is taken of the full total while its thickness
/// is taken of the remaining rectangle, layouts with more than one band leave
/// part of the container uncovered. That is the intended behavior.
pub struct BandTreemap;

impl BandTreemap {
    pub fn layout(items: &[TreemapItem], container: Rect) -> TreemapLayout {
        if items.is_empty() {
            return TreemapLayout::default();
        }

        let total_size = items
            .iter()
            .fold(0u64, |acc, item| acc.saturating_add(item.size));
        if total_size == 0 {
            return TreemapLayout::default();
        }

        // Stable, so equal sizes keep the caller's order.
        let mut sorted: Vec<&TreemapItem> = items.iter().collect();
        sorted.sort_by(|a, b| b.size.cmp(&a.size));

        let threshold = total_size / 2;
        let last = sorted.len() - 1;

        let mut result = Vec::with_capacity(items.len());
        let mut remaining = container;
        let mut band: Vec<&TreemapItem> = Vec::new();
        let mut band_size = 0u64;
        let mut band_index = 0usize;

        for (pos, item) in sorted.into_iter().enumerate() {
            band.push(item);
            band_size = band_size.saturating_add(item.size);

            if band_size >= threshold || pos == last {
                remaining = Self::layout_band(
                    &band,
                    band_size,
                    total_size,
                    band_index,
                    remaining,
                    &mut result,
                );
                band.clear();
                band_size = 0;
                band_index += 1;
            }
        }

        TreemapLayout { rects: result }
    }

    /// Place one band against the origin of `container` and return what is
    /// left of it.
    fn layout_band(
        band: &[&TreemapItem],
        band_size: u64,
        total_size: u64,
        band_index: usize,
        container: Rect,
        result: &mut Vec<LayoutRect>,
    ) -> Rect {
        let horizontal = container.width >= container.height;
        let (length, breadth) = if horizontal {
            (container.width, container.height)
        } else {
            (container.height, container.width)
        };

        let band_ratio = band_size as f64 / total_size as f64;
        let band_breadth = (band_ratio * breadth as f64) as f32;

        let mut offset = 0.0f32;
        for item in band {
            let item_length = if band_size > 0 {
                (item.size as f64 / band_size as f64 * length as f64) as f32
            } else {
                0.0
            };

            let rect = if horizontal {
                Rect::new(container.x + offset, container.y, item_length, band_breadth)
            } else {
                Rect::new(container.x, container.y + offset, band_breadth, item_length)
            };

            result.push(LayoutRect {
                rect,
                index: item.index,
                band: band_index,
            });
            offset += item_length;
        }

        if horizontal {
            Rect::new(
                container.x,
                container.y + band_breadth,
                container.width,
                container.height - band_breadth,
            )
        } else {
            Rect::new(
                container.x + band_breadth,
                container.y,
                container.width - band_breadth,
                container.height,
            )
        }
    }
}
