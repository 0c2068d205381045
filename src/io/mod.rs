//! Raster access traits and on-disk model/LUT formats

pub mod lut;
pub mod meta;
pub mod raster;

pub use lut::{read_lut_array, write_lut_array, LutDataset, LutMeta, LutSamples};
pub use meta::ModelMeta;
pub use raster::{MemoryRaster, RasterReader, RasterWriter};
