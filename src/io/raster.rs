use ndarray::{s, Array2, Array3};

use crate::core::block::BlockRegion;
use crate::types::{Category, OutputDataType, SpecError, SpecResult};

/// Read access to a multi-band raster.
///
/// The processing core never assumes a specific file format; concrete
/// format drivers implement this trait outside the crate. Band indices are
/// zero-based.
pub trait RasterReader {
    fn width(&self) -> usize;
    fn height(&self) -> usize;
    fn band_count(&self) -> usize;

    /// Display names of all bands, in band order
    fn band_names(&self) -> Vec<String>;

    /// No-data value for a band, if one is defined
    fn no_data(&self, band: usize) -> Option<f32>;

    /// Read one band restricted to a block region, shape (height, width)
    fn read_block(&self, band: usize, region: &BlockRegion) -> SpecResult<Array2<f32>>;
}

/// Write access to a multi-band output raster.
pub trait RasterWriter {
    fn width(&self) -> usize;
    fn height(&self) -> usize;
    fn band_count(&self) -> usize;

    /// Write one band's data into a block region, shape (height, width)
    fn write_block(&mut self, band: usize, region: &BlockRegion, data: &Array2<f32>)
        -> SpecResult<()>;

    fn set_no_data(&mut self, band: usize, value: f32) -> SpecResult<()>;

    fn set_band_name(&mut self, band: usize, name: &str) -> SpecResult<()>;

    /// Declare the intended storage type of the output samples
    fn set_data_type(&mut self, data_type: OutputDataType) -> SpecResult<()>;

    /// Attach a categorical legend (classifier outputs only)
    fn set_categories(&mut self, band: usize, categories: &[Category]) -> SpecResult<()>;
}

/// In-memory raster used for tests and in-process pipelines.
///
/// Stores all bands as a dense (band, row, col) cube of f32 regardless of
/// the declared output data type.
#[derive(Debug, Clone)]
pub struct MemoryRaster {
    data: Array3<f32>,
    band_names: Vec<String>,
    no_data: Vec<Option<f32>>,
    data_type: OutputDataType,
    categories: Vec<Vec<Category>>,
}

impl MemoryRaster {
    /// Create a raster filled with zeros
    pub fn zeros(band_count: usize, height: usize, width: usize) -> Self {
        Self {
            data: Array3::zeros((band_count, height, width)),
            band_names: (0..band_count).map(|i| format!("band {}", i + 1)).collect(),
            no_data: vec![None; band_count],
            data_type: OutputDataType::Float32,
            categories: vec![Vec::new(); band_count],
        }
    }

    /// Create a raster from a (band, row, col) cube
    pub fn from_cube(data: Array3<f32>) -> Self {
        let band_count = data.dim().0;
        Self {
            band_names: (0..band_count).map(|i| format!("band {}", i + 1)).collect(),
            no_data: vec![None; band_count],
            data_type: OutputDataType::Float32,
            categories: vec![Vec::new(); band_count],
            data,
        }
    }

    pub fn with_band_names(mut self, names: Vec<String>) -> Self {
        assert_eq!(names.len(), self.data.dim().0);
        self.band_names = names;
        self
    }

    pub fn with_no_data(mut self, value: f32) -> Self {
        for nd in self.no_data.iter_mut() {
            *nd = Some(value);
        }
        self
    }

    /// Full data cube (band, row, col)
    pub fn cube(&self) -> &Array3<f32> {
        &self.data
    }

    /// One full band as a (row, col) view
    pub fn band(&self, band: usize) -> Array2<f32> {
        self.data.slice(s![band, .., ..]).to_owned()
    }

    pub fn data_type(&self) -> OutputDataType {
        self.data_type
    }

    pub fn categories(&self, band: usize) -> &[Category] {
        &self.categories[band]
    }

    fn check_band(&self, band: usize) -> SpecResult<()> {
        if band >= self.data.dim().0 {
            return Err(SpecError::Configuration(format!(
                "Band index {} out of range (raster has {} bands)",
                band,
                self.data.dim().0
            )));
        }
        Ok(())
    }

    fn check_region(&self, region: &BlockRegion) -> SpecResult<()> {
        let (_, height, width) = self.data.dim();
        if region.x_offset + region.width > width || region.y_offset + region.height > height {
            return Err(SpecError::Configuration(format!(
                "Block region {:?} exceeds raster extent {}x{}",
                region, width, height
            )));
        }
        Ok(())
    }
}

impl RasterReader for MemoryRaster {
    fn width(&self) -> usize {
        self.data.dim().2
    }

    fn height(&self) -> usize {
        self.data.dim().1
    }

    fn band_count(&self) -> usize {
        self.data.dim().0
    }

    fn band_names(&self) -> Vec<String> {
        self.band_names.clone()
    }

    fn no_data(&self, band: usize) -> Option<f32> {
        self.no_data.get(band).copied().flatten()
    }

    fn read_block(&self, band: usize, region: &BlockRegion) -> SpecResult<Array2<f32>> {
        self.check_band(band)?;
        self.check_region(region)?;
        Ok(self
            .data
            .slice(s![
                band,
                region.y_offset..region.y_offset + region.height,
                region.x_offset..region.x_offset + region.width
            ])
            .to_owned())
    }
}

impl RasterWriter for MemoryRaster {
    fn width(&self) -> usize {
        self.data.dim().2
    }

    fn height(&self) -> usize {
        self.data.dim().1
    }

    fn band_count(&self) -> usize {
        self.data.dim().0
    }

    fn write_block(
        &mut self,
        band: usize,
        region: &BlockRegion,
        data: &Array2<f32>,
    ) -> SpecResult<()> {
        self.check_band(band)?;
        self.check_region(region)?;
        if data.dim() != (region.height, region.width) {
            return Err(SpecError::Processing(format!(
                "Block data shape {:?} does not match region {:?}",
                data.dim(),
                region
            )));
        }
        self.data
            .slice_mut(s![
                band,
                region.y_offset..region.y_offset + region.height,
                region.x_offset..region.x_offset + region.width
            ])
            .assign(data);
        Ok(())
    }

    fn set_no_data(&mut self, band: usize, value: f32) -> SpecResult<()> {
        self.check_band(band)?;
        self.no_data[band] = Some(value);
        Ok(())
    }

    fn set_band_name(&mut self, band: usize, name: &str) -> SpecResult<()> {
        self.check_band(band)?;
        self.band_names[band] = name.to_string();
        Ok(())
    }

    fn set_data_type(&mut self, data_type: OutputDataType) -> SpecResult<()> {
        self.data_type = data_type;
        Ok(())
    }

    fn set_categories(&mut self, band: usize, categories: &[Category]) -> SpecResult<()> {
        self.check_band(band)?;
        self.categories[band] = categories.to_vec();
        Ok(())
    }
}
