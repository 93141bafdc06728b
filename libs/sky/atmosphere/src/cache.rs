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
use crate::{
    params::PrecomputeConfig,
    pipeline::{PrecomputedTables, ScatteringPipeline},
    ScatteringUniforms,
};
use anyhow::Result;
use compute::ComputeBackend;
use log::{info, trace, warn};
use lut::{Extent, LookupTable};
use memmap::MmapOptions;
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;

const TABLE_NAMES: [&str; 3] = ["transmittance", "irradiance", "inscatter"];

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CacheLayout {
    /// `<table>.<fingerprint>.raw`; a change to the configuration misses.
    Fingerprinted,

    /// `<table>.raw`. Compatible with older caches, but tables built from a
    /// different configuration with the same sizes will load silently.
    Legacy,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    pub directory: PathBuf,
    pub layout: CacheLayout,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            layout: CacheLayout::Fingerprinted,
        }
    }
}

impl CacheConfig {
    pub fn in_directory<P: AsRef<Path>>(directory: P) -> Self {
        Self {
            directory: directory.as_ref().to_owned(),
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss(PathBuf),
    Corrupt(PathBuf),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache file {path:?} does not exist")]
    Missing { path: PathBuf },
    #[error("cache file {path:?} is {actual} bytes, expected {expected}")]
    WrongSize {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },
    #[error("failed to read cache file {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl CacheError {
    pub fn path(&self) -> &Path {
        match self {
            Self::Missing { path } | Self::WrongSize { path, .. } | Self::Io { path, .. } => path,
        }
    }

    pub fn status(&self) -> CacheStatus {
        match self {
            Self::Missing { path } => CacheStatus::Miss(path.to_owned()),
            _ => CacheStatus::Corrupt(self.path().to_owned()),
        }
    }
}

/// Raw machine-endian f32 texels, one file per final table, with no header.
/// The files are only usable on a machine of the same endianness.
pub struct DiskCache {
    config: CacheConfig,
    fingerprint: String,
    extents: [Extent; 3],
}

impl DiskCache {
    pub fn new(config: CacheConfig, precompute: &PrecomputeConfig) -> Self {
        let dims = &precompute.dimensions;
        Self {
            config,
            fingerprint: precompute.fingerprint(),
            extents: [dims.transmittance(), dims.irradiance(), dims.inscatter()],
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Transmittance, irradiance and inscatter, in that order.
    pub fn paths(&self) -> [PathBuf; 3] {
        TABLE_NAMES.map(|name| {
            let filename = match self.config.layout {
                CacheLayout::Fingerprinted => format!("{}.{}.raw", name, self.fingerprint),
                CacheLayout::Legacy => format!("{}.raw", name),
            };
            self.config.directory.join(filename)
        })
    }

    fn read_file(path: &Path, extent: Extent) -> Result<LookupTable, CacheError> {
        let io_error = |source| CacheError::Io {
            path: path.to_owned(),
            source,
        };
        let fp = match fs::File::open(path) {
            Ok(fp) => fp,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CacheError::Missing {
                    path: path.to_owned(),
                })
            }
            Err(e) => return Err(io_error(e)),
        };
        let actual = fp.metadata().map_err(io_error)?.len() as usize;
        if actual != extent.byte_len() {
            return Err(CacheError::WrongSize {
                path: path.to_owned(),
                expected: extent.byte_len(),
                actual,
            });
        }
        let map = unsafe { MmapOptions::new().map(&fp) }.map_err(io_error)?;
        LookupTable::from_bytes(extent, &map).map_err(|_| CacheError::WrongSize {
            path: path.to_owned(),
            expected: extent.byte_len(),
            actual: map.len(),
        })
    }

    /// All three files are read and checked before anything is returned.
    pub fn read(&self) -> Result<PrecomputedTables, CacheError> {
        let [transmittance_path, irradiance_path, inscatter_path] = self.paths();
        let [transmittance_extent, irradiance_extent, inscatter_extent] = self.extents;
        Ok(PrecomputedTables {
            transmittance: Self::read_file(&transmittance_path, transmittance_extent)?,
            irradiance: Self::read_file(&irradiance_path, irradiance_extent)?,
            inscatter: Self::read_file(&inscatter_path, inscatter_extent)?,
        })
    }

    /// Upload cached tables into the pipeline's final slots. On anything but
    /// a hit the pipeline's tables are left untouched.
    pub fn load<B>(&self, pipeline: &mut ScatteringPipeline<B>) -> Result<CacheStatus>
    where
        B: ComputeBackend<ScatteringUniforms>,
    {
        match self.read() {
            Ok(tables) => {
                pipeline.write_tables(&tables)?;
                info!("loaded atmosphere tables from {:?}", self.config.directory);
                Ok(CacheStatus::Hit)
            }
            Err(e @ CacheError::Missing { .. }) => {
                info!("atmosphere cache miss: {}", e);
                Ok(e.status())
            }
            Err(e) => {
                warn!("ignoring atmosphere cache: {}", e);
                Ok(e.status())
            }
        }
    }

    pub fn save(&self, tables: &PrecomputedTables) -> Result<()> {
        fs::create_dir_all(&self.config.directory)?;
        let [transmittance_path, irradiance_path, inscatter_path] = self.paths();
        for (path, table) in [
            (transmittance_path, &tables.transmittance),
            (irradiance_path, &tables.irradiance),
            (inscatter_path, &tables.inscatter),
        ] {
            trace!("writing {:?}", path);
            fs::write(&path, table.as_bytes())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use compute::CpuBackend;

    fn tables(config: &PrecomputeConfig, seed: f32) -> PrecomputedTables {
        let dims = &config.dimensions;
        let fill = |x: u32, y: u32, z: u32| [seed + x as f32, y as f32, z as f32, seed];
        PrecomputedTables {
            transmittance: LookupTable::from_fn(dims.transmittance(), fill),
            irradiance: LookupTable::from_fn(dims.irradiance(), fill),
            inscatter: LookupTable::from_fn(dims.inscatter(), fill),
        }
    }

    #[test]
    fn test_round_trip_is_exact() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = PrecomputeConfig::tiny();
        let cache = DiskCache::new(CacheConfig::in_directory(dir.path().join("nested")), &config);
        let original = tables(&config, 0.25);
        cache.save(&original)?;
        for path in cache.paths() {
            assert!(path.exists());
        }
        assert_eq!(cache.read()?, original);
        Ok(())
    }

    #[test]
    fn test_missing_file_is_a_miss() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = PrecomputeConfig::tiny();
        let cache = DiskCache::new(CacheConfig::in_directory(dir.path()), &config);
        cache.save(&tables(&config, 1.0))?;
        let irradiance = cache.paths()[1].clone();
        fs::remove_file(&irradiance)?;
        let err = cache.read().unwrap_err();
        assert_eq!(err.status(), CacheStatus::Miss(irradiance));
        Ok(())
    }

    #[test]
    fn test_truncated_file_is_corrupt() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = PrecomputeConfig::tiny();
        let cache = DiskCache::new(CacheConfig::in_directory(dir.path()), &config);
        cache.save(&tables(&config, 1.0))?;
        let inscatter = cache.paths()[2].clone();
        let bytes = fs::read(&inscatter)?;
        fs::write(&inscatter, &bytes[..bytes.len() - 16])?;
        assert_eq!(
            cache.read().unwrap_err().status(),
            CacheStatus::Corrupt(inscatter)
        );
        Ok(())
    }

    #[test]
    fn test_failed_load_leaves_tables_alone() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = PrecomputeConfig::tiny();
        let cache = DiskCache::new(CacheConfig::in_directory(dir.path()), &config);
        cache.save(&tables(&config, 1.0))?;
        // The last file is bad, so the first two must not be uploaded.
        fs::write(&cache.paths()[2], b"short")?;

        let mut pipeline = ScatteringPipeline::new(CpuBackend::new(), config)?;
        let before = pipeline.read_tables()?;
        let status = cache.load(&mut pipeline)?;
        assert!(matches!(status, CacheStatus::Corrupt(_)));
        assert_eq!(pipeline.read_tables()?, before);
        Ok(())
    }

    #[test]
    fn test_load_uploads_on_hit() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = PrecomputeConfig::tiny();
        let cache = DiskCache::new(CacheConfig::in_directory(dir.path()), &config);
        let saved = tables(&config, 3.0);
        cache.save(&saved)?;

        let mut pipeline = ScatteringPipeline::new(CpuBackend::new(), config)?;
        assert_eq!(cache.load(&mut pipeline)?, CacheStatus::Hit);
        assert_eq!(pipeline.read_tables()?, saved);
        Ok(())
    }

    #[test]
    fn test_fingerprint_separates_configs() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = PrecomputeConfig::tiny();
        let cache = DiskCache::new(CacheConfig::in_directory(dir.path()), &config);
        cache.save(&tables(&config, 1.0))?;

        let mut changed = config;
        changed.atmosphere.mie_g = 0.7;
        let other = DiskCache::new(CacheConfig::in_directory(dir.path()), &changed);
        assert!(matches!(
            other.read().unwrap_err().status(),
            CacheStatus::Miss(_)
        ));
        Ok(())
    }

    #[test]
    fn test_legacy_layout_ignores_config() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let legacy = CacheConfig {
            directory: dir.path().to_owned(),
            layout: CacheLayout::Legacy,
        };
        let config = PrecomputeConfig::tiny();
        let cache = DiskCache::new(legacy.clone(), &config);
        assert_eq!(cache.paths()[0], dir.path().join("transmittance.raw"));
        assert_eq!(cache.paths()[1], dir.path().join("irradiance.raw"));
        assert_eq!(cache.paths()[2], dir.path().join("inscatter.raw"));
        let saved = tables(&config, 2.0);
        cache.save(&saved)?;

        let mut changed = config;
        changed.atmosphere.mie_g = 0.7;
        assert_eq!(DiskCache::new(legacy, &changed).read()?, saved);
        Ok(())
    }
}
