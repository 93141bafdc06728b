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
use crate::{Extent, LookupTable};
use anyhow::{anyhow, Result};
use image::{ImageBuffer, Luma, Rgb};
use log::info;
use std::path::{Path, PathBuf};

fn describe_range(table: &LookupTable, name: &str) -> String {
    let (lo, hi) = table.min_max();
    format!("RANGE: {} -> {} in {}", lo, hi, name)
}

// Tone map with a simple exposure curve; channel 3 goes to a separate luma
// image since it carries the Mie red channel in the in-scatter tables.
fn split_pixels(table: &LookupTable, exposure: f32) -> (Vec<u8>, Vec<u8>) {
    let count = table.extent().texel_count();
    let mut rgb = Vec::with_capacity(count * 3);
    let mut alpha = Vec::with_capacity(count);
    let map = |v: f32| {
        let mapped = (1.0 - (-v * exposure).exp()).powf(1.0 / 2.2);
        if mapped.is_nan() {
            0u8
        } else {
            (mapped.clamp(0.0, 1.0) * 255f32) as u8
        }
    };
    for texel in table.texels() {
        rgb.push(map(texel[0]));
        rgb.push(map(texel[1]));
        rgb.push(map(texel[2]));
        alpha.push(map(texel[3]));
    }
    (rgb, alpha)
}

fn save_layered(
    data: &[u8],
    px_size: usize,
    extent: Extent,
    prefix: &Path,
    written: &mut Vec<PathBuf>,
) -> Result<()> {
    let layer_size = extent.layer_len() * px_size;
    for layer_num in 0..extent.depth as usize {
        let data = data[layer_num * layer_size..(layer_num + 1) * layer_size].to_vec();
        let name = PathBuf::from(format!("{}-layer{:02}.png", prefix.display(), layer_num));
        if px_size == 3 {
            ImageBuffer::<Rgb<u8>, _>::from_raw(extent.width, extent.height, data)
                .ok_or_else(|| anyhow!("rgb layer does not fit {}", extent))?
                .save(&name)?;
        } else {
            ImageBuffer::<Luma<u8>, _>::from_raw(extent.width, extent.height, data)
                .ok_or_else(|| anyhow!("luma layer does not fit {}", extent))?
                .save(&name)?;
        }
        written.push(name);
    }
    Ok(())
}

/// Write every layer of `table` as `<prefix>-layerNN.png` plus a matching
/// `<prefix>-alpha-layerNN.png` and log its value range. Returns the files
/// written.
pub fn dump_table(table: &LookupTable, prefix: &Path, exposure: f32) -> Result<Vec<PathBuf>> {
    info!("{}", describe_range(table, &prefix.display().to_string()));
    let (rgb, alpha) = split_pixels(table, exposure);
    let mut written = Vec::new();
    save_layered(&rgb, 3, table.extent(), prefix, &mut written)?;
    let alpha_prefix = PathBuf::from(format!("{}-alpha", prefix.display()));
    save_layered(&alpha, 1, table.extent(), &alpha_prefix, &mut written)?;
    Ok(written)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_dump_writes_each_layer() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let table = LookupTable::from_fn(Extent::new_3d(4, 4, 2), |x, y, z| {
            [x as f32, y as f32, z as f32, 1.0]
        });
        let written = dump_table(&table, &dir.path().join("scatter"), 1.0)?;
        assert_eq!(written.len(), 4);
        for path in &written {
            assert!(path.exists(), "missing {}", path.display());
        }
        Ok(())
    }

    #[test]
    fn test_range_covers_every_channel() {
        let table = LookupTable::from_fn(Extent::new_2d(2, 1), |x, _, _| {
            [x as f32, -2.0, 0.5, 3.0]
        });
        assert_eq!(describe_range(&table, "t"), "RANGE: -2 -> 3 in t");
    }

    #[test]
    fn test_split_pixels_handles_nan() {
        let table = LookupTable::from_fn(Extent::new_2d(1, 1), |_, _, _| {
            [f32::NAN, 0.0, 1000.0, -1.0]
        });
        let (rgb, alpha) = split_pixels(&table, 1.0);
        assert_eq!(rgb, vec![0, 0, 255]);
        assert_eq!(alpha, vec![0]);
    }
}
