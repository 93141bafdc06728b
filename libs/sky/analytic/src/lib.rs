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

//! Sky models fit to measured or simulated skies. Each evaluates a handful
//! of coefficients on the host per update and fills a small table that the
//! shading stage samples per pixel.
mod hosek;
mod preetham;
mod table;

pub use crate::{
    hosek::{
        evaluate, evaluate_spline, hosek_table, DatasetError, HosekCoefficients, HosekDataset,
        HosekWilkieSkyModel, DATASET_BYTES, HOSEK_ROWS, PARAMETER_COUNT, RGB_DATASET,
    },
    preetham::{
        perez_lower, perez_upper, preetham_table, zenith_chromaticity, Lambdas,
        PerezCoefficients, PreethamSkyModel, PREETHAM_ROWS,
    },
    table::{
        rgb_to_xyz, zenith_luminance, AnalyticTable, TableSkyModel, TableState, TableUniforms,
        DEFAULT_TABLE_TURBIDITY, TABLE_SIZE, TABLE_UNIT,
    },
};
