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
use compute::TableId;
use log::trace;
use nalgebra::{Vector3, Vector4};
use std::collections::{BTreeMap, HashSet};

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum UniformValue {
    Int(i32),
    Float(f32),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
}

impl From<i32> for UniformValue {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<[f32; 3]> for UniformValue {
    fn from(v: [f32; 3]) -> Self {
        Self::Vec3(v)
    }
}

impl From<Vector3<f32>> for UniformValue {
    fn from(v: Vector3<f32>) -> Self {
        Self::Vec3([v.x, v.y, v.z])
    }
}

impl From<Vector4<f32>> for UniformValue {
    fn from(v: Vector4<f32>) -> Self {
        Self::Vec4([v.x, v.y, v.z, v.w])
    }
}

/// Whatever consumes sky uniforms at shading time. Texture units are shared
/// across programs, so binding a table to a unit is global state.
pub trait ShaderProgram {
    /// Returns false if the program has no uniform with this name.
    fn set_uniform(&mut self, name: &str, value: UniformValue) -> bool;

    fn bind_unit(&mut self, unit: u32, table: TableId);

    /// Point `sampler` at `unit` and attach `table` there. Nothing is bound
    /// unless the program declares the sampler.
    fn bind_table(&mut self, sampler: &str, unit: u32, table: TableId) -> bool {
        if self.set_uniform(sampler, UniformValue::Int(unit as i32)) {
            self.bind_unit(unit, table);
            true
        } else {
            false
        }
    }
}

/// A program that remembers what it was given. Hosts without a renderer use
/// it to report the uniforms, and tests use it to inspect them.
#[derive(Clone, Debug, Default)]
pub struct RecordingProgram {
    accepts: Option<HashSet<String>>,
    uniforms: BTreeMap<String, UniformValue>,
    units: BTreeMap<u32, TableId>,
}

impl RecordingProgram {
    /// Only accept the named uniforms, like a linked program would.
    pub fn with_uniforms(names: &[&str]) -> Self {
        Self {
            accepts: Some(names.iter().map(|s| s.to_string()).collect()),
            ..Default::default()
        }
    }

    pub fn uniform(&self, name: &str) -> Option<&UniformValue> {
        self.uniforms.get(name)
    }

    pub fn unit(&self, unit: u32) -> Option<TableId> {
        self.units.get(&unit).copied()
    }

    /// In name order.
    pub fn uniforms(&self) -> impl Iterator<Item = (&str, &UniformValue)> {
        self.uniforms.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn units(&self) -> impl Iterator<Item = (u32, TableId)> + '_ {
        self.units.iter().map(|(&k, &v)| (k, v))
    }
}

impl ShaderProgram for RecordingProgram {
    fn set_uniform(&mut self, name: &str, value: UniformValue) -> bool {
        if let Some(accepts) = &self.accepts {
            if !accepts.contains(name) {
                trace!("program has no uniform {}", name);
                return false;
            }
        }
        self.uniforms.insert(name.to_owned(), value);
        true
    }

    fn bind_unit(&mut self, unit: u32, table: TableId) {
        self.units.insert(unit, table);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use anyhow::Result;
    use compute::{ComputeBackend, CpuBackend};
    use lut::Extent;

    #[test]
    fn test_bind_table_requires_sampler() -> Result<()> {
        let mut backend = CpuBackend::<u32>::new();
        let table = backend.create_table("t", Extent::new_2d(2, 2))?;

        let mut program = RecordingProgram::with_uniforms(&["s_Table"]);
        assert!(!program.bind_table("s_Other", 2, table));
        assert_eq!(program.unit(2), None);
        assert!(program.bind_table("s_Table", 3, table));
        assert_eq!(program.unit(3), Some(table));
        assert_eq!(program.uniform("s_Table"), Some(&UniformValue::Int(3)));
        Ok(())
    }

    #[test]
    fn test_open_program_accepts_everything() {
        let mut program = RecordingProgram::default();
        assert!(program.set_uniform("anything", 1.5f32.into()));
        assert_eq!(program.uniforms().count(), 1);
    }

    #[test]
    fn test_uniforms_iterate_by_name() {
        let mut program = RecordingProgram::default();
        for name in ["exposure", "Z", "sky_model", "A", "u_Direction"] {
            program.set_uniform(name, 0i32.into());
        }
        let names = program.uniforms().map(|(name, _)| name).collect::<Vec<_>>();
        assert_eq!(names, ["A", "Z", "exposure", "sky_model", "u_Direction"]);
    }
}
