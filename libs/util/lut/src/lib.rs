// This file is part of Horizon.
//
// Horizon is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// Horizon is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with Horizon.  If not, see <http://www.gnu.org/licenses/>.
mod dump;

pub use crate::dump::dump_table;

use std::fmt;
use thiserror::Error;
use zerocopy::AsBytes;

/// Every texel is 4 f32 channels.
pub type Texel = [f32; 4];

pub const TEXEL_SIZE: usize = std::mem::size_of::<Texel>();

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LutError {
    #[error("table data is {actual} bytes, but a {extent} table needs {expected}")]
    SizeMismatch {
        extent: Extent,
        expected: usize,
        actual: usize,
    },
    #[error("cannot copy a {src} table into a {dst} table")]
    ExtentMismatch { src: Extent, dst: Extent },
}

/// Dimensions of a table. 2D tables have a depth of 1.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Extent {
    pub const fn new_2d(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            depth: 1,
        }
    }

    pub const fn new_3d(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    pub fn is_3d(&self) -> bool {
        self.depth > 1
    }

    pub fn layer_len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn texel_count(&self) -> usize {
        self.layer_len() * self.depth as usize
    }

    pub fn byte_len(&self) -> usize {
        self.texel_count() * TEXEL_SIZE
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_3d() {
            write!(f, "{}x{}x{}", self.width, self.height, self.depth)
        } else {
            write!(f, "{}x{}", self.width, self.height)
        }
    }
}

/// A host side copy of a 2D or 3D table of RGBA f32 texels. Storage is
/// row-major within a layer with layers outermost, which is also the layout
/// of the raw cache files and of a tightly packed texture readback.
#[derive(Clone, PartialEq)]
pub struct LookupTable {
    extent: Extent,
    texels: Vec<Texel>,
}

impl fmt::Debug for LookupTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "LookupTable({})", self.extent)
    }
}

impl LookupTable {
    pub fn new(extent: Extent) -> Self {
        Self {
            extent,
            texels: vec![[0f32; 4]; extent.texel_count()],
        }
    }

    pub fn from_fn<F>(extent: Extent, mut f: F) -> Self
    where
        F: FnMut(u32, u32, u32) -> Texel,
    {
        let mut texels = Vec::with_capacity(extent.texel_count());
        for z in 0..extent.depth {
            for y in 0..extent.height {
                for x in 0..extent.width {
                    texels.push(f(x, y, z));
                }
            }
        }
        Self { extent, texels }
    }

    /// Rebuild a table from raw machine-endian bytes. The length must match
    /// the extent exactly.
    pub fn from_bytes(extent: Extent, bytes: &[u8]) -> Result<Self, LutError> {
        if bytes.len() != extent.byte_len() {
            return Err(LutError::SizeMismatch {
                extent,
                expected: extent.byte_len(),
                actual: bytes.len(),
            });
        }
        let texels = bytes
            .chunks_exact(TEXEL_SIZE)
            .map(|chunk| {
                let mut texel = [0f32; 4];
                for (channel, word) in texel.iter_mut().zip(chunk.chunks_exact(4)) {
                    *channel = f32::from_ne_bytes([word[0], word[1], word[2], word[3]]);
                }
                texel
            })
            .collect();
        Ok(Self { extent, texels })
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    pub fn texels(&self) -> &[Texel] {
        &self.texels
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.texels.as_bytes()
    }

    pub fn layer(&self, z: u32) -> &[Texel] {
        let len = self.extent.layer_len();
        let start = z as usize * len;
        &self.texels[start..start + len]
    }

    pub fn layer_mut(&mut self, z: u32) -> &mut [Texel] {
        let len = self.extent.layer_len();
        let start = z as usize * len;
        &mut self.texels[start..start + len]
    }

    #[inline]
    fn offset(&self, x: u32, y: u32, z: u32) -> usize {
        debug_assert!(x < self.extent.width && y < self.extent.height && z < self.extent.depth);
        (z as usize * self.extent.height as usize + y as usize) * self.extent.width as usize
            + x as usize
    }

    #[inline]
    pub fn texel(&self, x: u32, y: u32, z: u32) -> Texel {
        self.texels[self.offset(x, y, z)]
    }

    #[inline]
    pub fn set_texel(&mut self, x: u32, y: u32, z: u32, value: Texel) {
        let offset = self.offset(x, y, z);
        self.texels[offset] = value;
    }

    pub fn copy_from(&mut self, other: &LookupTable) -> Result<(), LutError> {
        if other.extent != self.extent {
            return Err(LutError::ExtentMismatch {
                src: other.extent,
                dst: self.extent,
            });
        }
        self.texels.copy_from_slice(&other.texels);
        Ok(())
    }

    /// Bilinear sample of layer 0 at normalized coordinates, with the
    /// texel-center and clamp-to-edge conventions of a GPU linear sampler.
    pub fn sample_2d(&self, u: f32, v: f32) -> Texel {
        let (x0, x1, fx) = filter_taps(u, self.extent.width);
        let (y0, y1, fy) = filter_taps(v, self.extent.height);
        let top = lerp(self.texel(x0, y0, 0), self.texel(x1, y0, 0), fx);
        let bottom = lerp(self.texel(x0, y1, 0), self.texel(x1, y1, 0), fx);
        lerp(top, bottom, fy)
    }

    /// Trilinear sample at normalized coordinates.
    pub fn sample_3d(&self, u: f32, v: f32, w: f32) -> Texel {
        let (x0, x1, fx) = filter_taps(u, self.extent.width);
        let (y0, y1, fy) = filter_taps(v, self.extent.height);
        let (z0, z1, fz) = filter_taps(w, self.extent.depth);
        let plane = |z| {
            let top = lerp(self.texel(x0, y0, z), self.texel(x1, y0, z), fx);
            let bottom = lerp(self.texel(x0, y1, z), self.texel(x1, y1, z), fx);
            lerp(top, bottom, fy)
        };
        lerp(plane(z0), plane(z1), fz)
    }

    pub fn min_max(&self) -> (f32, f32) {
        self.texels
            .iter()
            .flat_map(|t| t.iter())
            .fold((f32::MAX, f32::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)))
    }
}

fn filter_taps(coord: f32, size: u32) -> (u32, u32, f32) {
    let max = size.saturating_sub(1) as i64;
    let x = coord * size as f32 - 0.5;
    let base = x.floor();
    let frac = if base.is_finite() { x - base } else { 0.0 };
    let i0 = if base.is_finite() { base as i64 } else { 0 };
    let c0 = i0.clamp(0, max) as u32;
    let c1 = (i0 + 1).clamp(0, max) as u32;
    (c0, c1, frac)
}

#[inline]
pub fn lerp(a: Texel, b: Texel, t: f32) -> Texel {
    [
        a[0] + (b[0] - a[0]) * t,
        a[1] + (b[1] - a[1]) * t,
        a[2] + (b[2] - a[2]) * t,
        a[3] + (b[3] - a[3]) * t,
    ]
}

/// Two owned slots where one is readable and the other is the target of the
/// next accumulation. Swapping flips roles without moving either slot.
#[derive(Clone, Debug)]
pub struct DoubleBuffer<T> {
    slots: [T; 2],
    read: usize,
}

impl<T> DoubleBuffer<T> {
    pub fn new(read: T, write: T) -> Self {
        Self {
            slots: [read, write],
            read: 0,
        }
    }

    pub fn read(&self) -> &T {
        &self.slots[self.read]
    }

    pub fn write(&self) -> &T {
        &self.slots[1 - self.read]
    }

    pub fn write_mut(&mut self) -> &mut T {
        &mut self.slots[1 - self.read]
    }

    pub fn read_index(&self) -> usize {
        self.read
    }

    pub fn swap(&mut self) {
        self.read = 1 - self.read;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_from_bytes_round_trip() -> Result<(), LutError> {
        let extent = Extent::new_3d(4, 3, 2);
        let table = LookupTable::from_fn(extent, |x, y, z| {
            [x as f32, y as f32, z as f32, (x * y + z) as f32 * 0.25]
        });
        assert_eq!(table.as_bytes().len(), extent.byte_len());
        let copy = LookupTable::from_bytes(extent, table.as_bytes())?;
        assert_eq!(copy, table);
        Ok(())
    }

    #[test]
    fn test_from_bytes_rejects_truncated() {
        let extent = Extent::new_2d(8, 8);
        let bytes = vec![0u8; extent.byte_len() - 16];
        let err = LookupTable::from_bytes(extent, &bytes).unwrap_err();
        assert_eq!(
            err,
            LutError::SizeMismatch {
                extent,
                expected: 1024,
                actual: 1008
            }
        );
    }

    #[test]
    fn test_layer_major_layout() {
        let extent = Extent::new_3d(2, 2, 3);
        let mut table = LookupTable::new(extent);
        table.set_texel(1, 0, 2, [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(table.layer(2)[1], [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(table.texels()[2 * 4 + 1], [1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_sample_2d_hits_texel_centers() {
        let table = LookupTable::from_fn(Extent::new_2d(4, 2), |x, y, _| {
            [x as f32, y as f32, 0.0, 1.0]
        });
        let t = table.sample_2d(2.5 / 4.0, 0.5 / 2.0);
        assert_relative_eq!(t[0], 2.0);
        assert_relative_eq!(t[1], 0.0);

        // Halfway between two texel centers.
        let t = table.sample_2d(2.0 / 4.0, 1.0 / 2.0);
        assert_relative_eq!(t[0], 1.5);
        assert_relative_eq!(t[1], 0.5);
    }

    #[test]
    fn test_sample_clamps_to_edge() {
        let table = LookupTable::from_fn(Extent::new_2d(4, 1), |x, _, _| {
            [x as f32, 0.0, 0.0, 0.0]
        });
        assert_relative_eq!(table.sample_2d(-1.0, 0.5)[0], 0.0);
        assert_relative_eq!(table.sample_2d(0.0, 0.5)[0], 0.0);
        assert_relative_eq!(table.sample_2d(1.0, 0.5)[0], 3.0);
        assert_relative_eq!(table.sample_2d(7.0, 0.5)[0], 3.0);
    }

    #[test]
    fn test_sample_3d_interpolates_layers() {
        let table = LookupTable::from_fn(Extent::new_3d(2, 2, 2), |_, _, z| {
            [z as f32 * 10.0, 0.0, 0.0, 0.0]
        });
        assert_relative_eq!(table.sample_3d(0.5, 0.5, 0.25)[0], 0.0);
        assert_relative_eq!(table.sample_3d(0.5, 0.5, 0.5)[0], 5.0);
        assert_relative_eq!(table.sample_3d(0.5, 0.5, 0.75)[0], 10.0);
    }

    #[test]
    fn test_double_buffer_swap() {
        let mut pair = DoubleBuffer::new("a", "b");
        assert_eq!((*pair.read(), *pair.write()), ("a", "b"));
        pair.swap();
        assert_eq!((*pair.read(), *pair.write()), ("b", "a"));
        assert_eq!(pair.read_index(), 1);
        pair.swap();
        assert_eq!(pair.read_index(), 0);
    }

    #[test]
    fn test_copy_from_checks_extent() {
        let mut a = LookupTable::new(Extent::new_2d(2, 2));
        let b = LookupTable::new(Extent::new_2d(2, 3));
        assert!(a.copy_from(&b).is_err());
    }
}
