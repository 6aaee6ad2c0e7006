//! Dimensions, tiles and blocked register layouts.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::ScalarType;

// ─── Dim ──────────────────────────────────────────────────────────

/// A problem dimension name, e.g. `m`, `k`, `oc`, `kw`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dim(String);

impl Dim {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Dim {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ─── Tile / Coord ─────────────────────────────────────────────────

/// Per-dimension extents. Absent dimensions have extent 1.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tile(BTreeMap<Dim, i64>);

impl Tile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, i64)>) -> Self {
        Self(pairs.into_iter().map(|(d, v)| (Dim::new(d), v)).collect())
    }

    pub fn get(&self, dim: &Dim) -> Option<i64> {
        self.0.get(dim).copied()
    }

    pub fn get_or(&self, dim: &Dim, default: i64) -> i64 {
        self.get(dim).unwrap_or(default)
    }

    pub fn has(&self, dim: &Dim) -> bool {
        self.0.contains_key(dim)
    }

    pub fn set(&mut self, dim: Dim, value: i64) {
        self.0.insert(dim, value);
    }

    pub fn unset(&mut self, dim: &Dim) {
        self.0.remove(dim);
    }

    pub fn dims(&self) -> impl Iterator<Item = &Dim> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Dim, i64)> {
        self.0.iter().map(|(d, v)| (d, *v))
    }

    pub fn elems(&self) -> i64 {
        self.0.values().product()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A point inside a tile. Absent dimensions are at zero.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Coord(BTreeMap<Dim, i64>);

impl Coord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, dim: &Dim) -> i64 {
        self.0.get(dim).copied().unwrap_or(0)
    }

    pub fn set(&mut self, dim: Dim, value: i64) {
        self.0.insert(dim, value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Dim, i64)> {
        self.0.iter().map(|(d, v)| (d, *v))
    }
}

/// Visit every coordinate of `sizes` in steps of `step`, with `order`
/// listing dimensions outermost first. Dimensions of `sizes` missing from
/// `order` are iterated innermost, in name order.
pub fn for_each(sizes: &Tile, step: &Tile, order: &[Dim], mut f: impl FnMut(&Coord)) {
    let mut dims: Vec<Dim> = order.iter().filter(|d| sizes.has(d)).cloned().collect();
    for d in sizes.dims() {
        if !dims.contains(d) {
            dims.push(d.clone());
        }
    }
    let steps: Vec<i64> = dims.iter().map(|d| step.get_or(d, 1).max(1)).collect();
    let bounds: Vec<i64> = dims.iter().map(|d| sizes.get_or(d, 1)).collect();
    if bounds.iter().any(|&b| b <= 0) {
        return;
    }
    let mut idx = vec![0i64; dims.len()];
    loop {
        let mut coord = Coord::new();
        for (d, v) in dims.iter().zip(&idx) {
            coord.set(d.clone(), *v);
        }
        f(&coord);
        // Advance innermost (last) first.
        let mut i = dims.len();
        loop {
            if i == 0 {
                return;
            }
            i -= 1;
            idx[i] += steps[i];
            if idx[i] < bounds[i] {
                break;
            }
            idx[i] = 0;
        }
    }
}

// ─── Layout ───────────────────────────────────────────────────────

/// One level of blocking: `size` elements of `dim`, `stride` elements apart.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Block {
    pub dim: Dim,
    pub size: i64,
    pub stride: i64,
}

/// A blocked layout of a register tile. Blocks are listed innermost first;
/// a dimension may appear in several blocks (inner blocks vary fastest).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Layout {
    pub ty: ScalarType,
    pub blocks: Vec<Block>,
}

impl Layout {
    /// Dense layout over `dims`, innermost first.
    pub fn dense(ty: ScalarType, dims: &[(&str, i64)]) -> Self {
        let mut stride = 1;
        let mut blocks = Vec::with_capacity(dims.len());
        for (d, size) in dims {
            blocks.push(Block {
                dim: Dim::new(*d),
                size: *size,
                stride,
            });
            stride *= size;
        }
        Self { ty, blocks }
    }

    pub fn nblocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn elems(&self) -> i64 {
        self.blocks.iter().map(|b| b.size).product()
    }

    /// Size in bytes, including holes between strided blocks.
    pub fn size(&self) -> u32 {
        let max_off: i64 = self.blocks.iter().map(|b| (b.size - 1) * b.stride).sum();
        ((max_off + 1) * self.ty.size() as i64) as u32
    }

    /// Stride (in elements) of the innermost block.
    pub fn inner_stride(&self) -> i64 {
        self.blocks.first().map(|b| b.stride).unwrap_or(1)
    }

    /// Offset in elements of `coord`. Dimensions absent from the layout
    /// do not contribute.
    pub fn offset(&self, coord: &Coord) -> i64 {
        let mut rem: BTreeMap<&Dim, i64> = BTreeMap::new();
        let mut off = 0;
        for b in &self.blocks {
            let r = rem.entry(&b.dim).or_insert_with(|| coord.get(&b.dim));
            off += (*r % b.size) * b.stride;
            *r /= b.size;
        }
        off
    }

    pub fn offset_in_bytes(&self, coord: &Coord) -> i64 {
        self.offset(coord) * self.ty.size() as i64
    }

    /// Extent of each dimension.
    pub fn dim_sizes(&self) -> Tile {
        let mut t = Tile::new();
        for b in &self.blocks {
            let cur = t.get_or(&b.dim, 1);
            t.set(b.dim.clone(), cur * b.size);
        }
        t
    }

    /// Same blocking with another element type. With `dense`, strides are
    /// recomputed so that the layout has no holes.
    pub fn retype(&self, ty: ScalarType, dense: bool) -> Self {
        let mut ret = Self {
            ty,
            blocks: self.blocks.clone(),
        };
        if dense {
            let mut stride = 1;
            for b in &mut ret.blocks {
                b.stride = stride;
                stride *= b.size;
            }
        }
        ret
    }

    /// Sub-layout covering `[0, tile)` of every dimension, keeping strides.
    pub fn map(&self, tile: &Tile) -> Self {
        let mut rem: BTreeMap<Dim, i64> = BTreeMap::new();
        let mut blocks = Vec::new();
        for b in &self.blocks {
            let r = rem
                .entry(b.dim.clone())
                .or_insert_with(|| tile.get_or(&b.dim, 1));
            if *r <= 1 {
                continue;
            }
            let size = b.size.min(*r);
            blocks.push(Block {
                dim: b.dim.clone(),
                size,
                stride: b.stride,
            });
            *r = (*r + size - 1) / size;
        }
        Self { ty: self.ty, blocks }
    }

    /// Keep only blocks of the given dimensions, densely repacked.
    pub fn restrict(&self, keep: impl Fn(&Dim) -> bool) -> Self {
        let blocks = self
            .blocks
            .iter()
            .filter(|b| keep(&b.dim))
            .cloned()
            .collect();
        Self { ty: self.ty, blocks }.retype(self.ty, true)
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.ty.name())?;
        for (i, b) in self.blocks.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}{}:{}", b.dim, b.size, b.stride)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dim(s: &str) -> Dim {
        Dim::new(s)
    }

    #[test]
    fn test_dense_layout_offsets() {
        let l = Layout::dense(ScalarType::F32, &[("n", 16), ("m", 4)]);
        assert_eq!(l.elems(), 64);
        assert_eq!(l.size(), 256);
        let mut c = Coord::new();
        c.set(dim("m"), 2);
        c.set(dim("n"), 3);
        assert_eq!(l.offset(&c), 2 * 16 + 3);
        assert_eq!(l.offset_in_bytes(&c), (2 * 16 + 3) * 4);
    }

    #[test]
    fn test_split_dim_offset() {
        // n split into 8 x 2 blocks with m in between.
        let l = Layout {
            ty: ScalarType::F32,
            blocks: vec![
                Block { dim: dim("n"), size: 8, stride: 1 },
                Block { dim: dim("m"), size: 2, stride: 8 },
                Block { dim: dim("n"), size: 2, stride: 16 },
            ],
        };
        let mut c = Coord::new();
        c.set(dim("n"), 9);
        c.set(dim("m"), 1);
        assert_eq!(l.offset(&c), 1 + 8 + 16);
        assert_eq!(l.dim_sizes().get(&dim("n")), Some(16));
    }

    #[test]
    fn test_map_keeps_strides() {
        let l = Layout::dense(ScalarType::F32, &[("n", 16), ("m", 4)]);
        let sub = l.map(&Tile::from_pairs([("m", 1), ("n", 16)]));
        assert_eq!(sub.blocks.len(), 1);
        assert_eq!(sub.elems(), 16);
        let sub = l.map(&Tile::from_pairs([("m", 2), ("n", 8)]));
        assert_eq!(sub.blocks[1].stride, 16);
        assert_eq!(sub.elems(), 16);
    }

    #[test]
    fn test_retype_dense() {
        let l = Layout::dense(ScalarType::F32, &[("n", 16), ("m", 4)]).map(&Tile::from_pairs([
            ("m", 2),
            ("n", 8),
        ]));
        let d = l.retype(ScalarType::F16, true);
        assert_eq!(d.blocks[1].stride, 8);
        assert_eq!(d.size(), 32);
    }

    #[test]
    fn test_for_each_order() {
        let sizes = Tile::from_pairs([("m", 2), ("n", 4)]);
        let step = Tile::from_pairs([("n", 2)]);
        let mut seen = Vec::new();
        for_each(&sizes, &step, &[dim("m"), dim("n")], |c| {
            seen.push((c.get(&dim("m")), c.get(&dim("n"))));
        });
        assert_eq!(seen, vec![(0, 0), (0, 2), (1, 0), (1, 2)]);
    }
}
