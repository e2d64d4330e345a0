use crate::blocks::{BlockBounds, BlockGrid};
use crate::datatype::{DataType, Sample};
use crate::error::{OverviewError, Result};
use crate::palette::ColorTable;
use log::debug;
use ndarray::{s, Array2, ArrayView2};
use std::collections::BTreeMap;

/// Metadata domain holding layout facts such as `NBITS` and `COMPRESSION`.
pub const IMAGE_STRUCTURE: &str = "IMAGE_STRUCTURE";

/// Metadata key recording how an overview level was resampled.
pub const RESAMPLING_KEY: &str = "RESAMPLING";

pub type MetadataDomains = BTreeMap<String, BTreeMap<String, String>>;

/// One 2-D grid of samples, stored as lazily allocated blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterBand {
    width: usize,
    height: usize,
    data_type: DataType,
    grid: BlockGrid,
    blocks: Vec<Option<Array2<f64>>>,
    nodata: Option<f64>,
    color_table: Option<ColorTable>,
    metadata: MetadataDomains,
    description: String,
}

impl RasterBand {
    pub fn new(
        width: usize,
        height: usize,
        data_type: DataType,
        block_size: (usize, usize),
    ) -> Self {
        let grid = BlockGrid::new(width, height, block_size.0, block_size.1);
        Self {
            width,
            height,
            data_type,
            grid,
            blocks: vec![None; grid.total_blocks],
            nodata: None,
            color_table: None,
            metadata: MetadataDomains::new(),
            description: String::new(),
        }
    }

    pub fn x_size(&self) -> usize {
        self.width
    }

    pub fn y_size(&self) -> usize {
        self.height
    }

    pub fn size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn block_size(&self) -> (usize, usize) {
        self.grid.block_size()
    }

    pub fn block_grid(&self) -> &BlockGrid {
        &self.grid
    }

    pub fn no_data_value(&self) -> Option<f64> {
        self.nodata
    }

    pub fn set_no_data_value(&mut self, nodata: Option<f64>) {
        self.nodata = nodata;
    }

    pub fn color_table(&self) -> Option<&ColorTable> {
        self.color_table.as_ref()
    }

    pub fn set_color_table(&mut self, table: Option<ColorTable>) {
        self.color_table = table;
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn set_description(&mut self, description: &str) {
        self.description = description.to_string();
    }

    pub fn metadata(&self, domain: &str) -> Option<&BTreeMap<String, String>> {
        self.metadata.get(domain)
    }

    pub fn metadata_domains(&self) -> &MetadataDomains {
        &self.metadata
    }

    pub fn set_metadata(&mut self, domain: &str, items: BTreeMap<String, String>) {
        if items.is_empty() {
            self.metadata.remove(domain);
        } else {
            self.metadata.insert(domain.to_string(), items);
        }
    }

    pub fn metadata_item(&self, key: &str, domain: &str) -> Option<&str> {
        self.metadata
            .get(domain)
            .and_then(|items| items.get(key))
            .map(String::as_str)
    }

    pub fn set_metadata_item(&mut self, key: &str, value: &str, domain: &str) {
        self.metadata
            .entry(domain.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    /// Bits per sample when narrower than the datatype (e.g. 1-bit images).
    pub fn nbits(&self) -> Option<u32> {
        self.metadata_item("NBITS", IMAGE_STRUCTURE)
            .and_then(|v| v.parse().ok())
    }

    pub fn is_bilevel(&self) -> bool {
        self.data_type == DataType::Byte && self.nbits() == Some(1)
    }

    /// Value that unwritten pixels read back as.
    fn fill_value(&self) -> f64 {
        self.nodata.map(|nd| self.data_type.coerce(nd)).unwrap_or(0.0)
    }

    pub fn is_block_allocated(&self, block_x: usize, block_y: usize) -> bool {
        self.blocks
            .get(self.grid.index_of(block_x, block_y))
            .is_some_and(Option::is_some)
    }

    pub(crate) fn allocated_blocks(&self) -> impl Iterator<Item = (usize, &Array2<f64>)> {
        self.blocks
            .iter()
            .enumerate()
            .filter_map(|(idx, block)| block.as_ref().map(|b| (idx, b)))
    }

    pub(crate) fn restore_block(&mut self, block_idx: usize, data: Array2<f64>) -> Result<()> {
        let (bw, bh) = self.grid.block_size();
        if block_idx >= self.blocks.len() || data.dim() != (bh, bw) {
            return Err(OverviewError::IoFailure(format!(
                "block {} of shape {:?} does not fit a {}x{} grid of {} blocks",
                block_idx,
                data.dim(),
                bw,
                bh,
                self.blocks.len()
            )));
        }
        self.blocks[block_idx] = Some(data);
        Ok(())
    }

    fn check_block(&self, block_x: usize, block_y: usize) -> Result<BlockBounds> {
        if block_x >= self.grid.num_blocks_x || block_y >= self.grid.num_blocks_y {
            return Err(OverviewError::IoFailure(format!(
                "block ({}, {}) outside {}x{} block grid",
                block_x, block_y, self.grid.num_blocks_x, self.grid.num_blocks_y
            )));
        }
        Ok(self.grid.bounds_at(block_x, block_y))
    }

    fn check_window(&self, x: usize, y: usize, w: usize, h: usize) -> Result<()> {
        if w == 0 || h == 0 || x + w > self.width || y + h > self.height {
            return Err(OverviewError::IoFailure(format!(
                "window ({}, {}) {}x{} outside {}x{} band",
                x, y, w, h, self.width, self.height
            )));
        }
        Ok(())
    }

    /// Read one block, clipped to the band extent (edge blocks are smaller).
    pub fn read_block(&self, block_x: usize, block_y: usize) -> Result<Array2<f64>> {
        let bounds = self.check_block(block_x, block_y)?;
        let (w, h) = (bounds.width(), bounds.height());
        match &self.blocks[self.grid.index_of(block_x, block_y)] {
            Some(block) => Ok(block.slice(s![..h, ..w]).to_owned()),
            None => Ok(Array2::from_elem((h, w), self.fill_value())),
        }
    }

    /// Write one block; `data` must have the block's clipped size.
    pub fn write_block(&mut self, block_x: usize, block_y: usize, data: ArrayView2<'_, f64>) -> Result<()> {
        let bounds = self.check_block(block_x, block_y)?;
        if data.dim() != (bounds.height(), bounds.width()) {
            return Err(OverviewError::IoFailure(format!(
                "block ({}, {}) expects {}x{} samples, got {}x{}",
                block_x,
                block_y,
                bounds.width(),
                bounds.height(),
                data.ncols(),
                data.nrows()
            )));
        }
        self.write_window(bounds.x_min, bounds.y_min, data)
    }

    /// Read a window that may span several blocks.
    pub fn read_window(&self, x: usize, y: usize, w: usize, h: usize) -> Result<Array2<f64>> {
        self.check_window(x, y, w, h)?;

        let (bw, bh) = self.grid.block_size();
        let fill = self.fill_value();
        let mut out = Array2::from_elem((h, w), fill);

        for block_y in y / bh..=(y + h - 1) / bh {
            for block_x in x / bw..=(x + w - 1) / bw {
                let Some(block) = &self.blocks[self.grid.index_of(block_x, block_y)] else {
                    continue;
                };
                let bx0 = block_x * bw;
                let by0 = block_y * bh;
                let x0 = x.max(bx0);
                let x1 = (x + w).min(bx0 + bw);
                let y0 = y.max(by0);
                let y1 = (y + h).min(by0 + bh);
                out.slice_mut(s![y0 - y..y1 - y, x0 - x..x1 - x])
                    .assign(&block.slice(s![y0 - by0..y1 - by0, x0 - bx0..x1 - bx0]));
            }
        }

        Ok(out)
    }

    /// Write a window, coercing samples to the band's datatype and
    /// allocating untouched blocks on first write.
    pub fn write_window(&mut self, x: usize, y: usize, data: ArrayView2<'_, f64>) -> Result<()> {
        let (h, w) = data.dim();
        self.check_window(x, y, w, h)?;

        let (bw, bh) = self.grid.block_size();
        let fill = self.fill_value();
        let data_type = self.data_type;

        for block_y in y / bh..=(y + h - 1) / bh {
            for block_x in x / bw..=(x + w - 1) / bw {
                let idx = self.grid.index_of(block_x, block_y);
                let block = self.blocks[idx].get_or_insert_with(|| {
                    debug!("Allocating block ({}, {})", block_x, block_y);
                    Array2::from_elem((bh, bw), fill)
                });
                let bx0 = block_x * bw;
                let by0 = block_y * bh;
                let x0 = x.max(bx0);
                let x1 = (x + w).min(bx0 + bw);
                let y0 = y.max(by0);
                let y1 = (y + h).min(by0 + bh);
                block
                    .slice_mut(s![y0 - by0..y1 - by0, x0 - bx0..x1 - bx0])
                    .zip_mut_with(&data.slice(s![y0 - y..y1 - y, x0 - x..x1 - x]), |dst, &src| {
                        *dst = data_type.coerce(src)
                    });
            }
        }

        Ok(())
    }

    /// Typed read, like GDAL's `read_as`.
    pub fn read_as<T: Sample>(&self, x: usize, y: usize, w: usize, h: usize) -> Result<Array2<T>> {
        Ok(self.read_window(x, y, w, h)?.mapv(T::from_f64))
    }

    pub fn write_from<T: Sample>(&mut self, x: usize, y: usize, data: ArrayView2<'_, T>) -> Result<()> {
        self.write_window(x, y, data.mapv(T::to_f64).view())
    }

    pub fn read_all(&self) -> Result<Array2<f64>> {
        self.read_window(0, 0, self.width, self.height)
    }

    pub fn fill(&mut self, value: f64) -> Result<()> {
        let data = Array2::from_elem((self.height, self.width), value);
        self.write_window(0, 0, data.view())
    }

    /// An empty band with this band's datatype, nodata, palette and
    /// metadata but a different extent.
    pub(crate) fn derive(&self, width: usize, height: usize, block_size: (usize, usize)) -> Self {
        let mut band = RasterBand::new(width, height, self.data_type, block_size);
        band.nodata = self.nodata;
        band.color_table = self.color_table.clone();
        band.description = self.description.clone();
        band.metadata = self.metadata.clone();
        band
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    fn ramp(width: usize, height: usize) -> Array2<f64> {
        Array2::from_shape_fn((height, width), |(r, c)| (r * width + c) as f64)
    }

    #[test]
    fn test_window_across_blocks() {
        let mut band = RasterBand::new(10, 10, DataType::Int32, (4, 4));
        band.write_window(0, 0, ramp(10, 10).view()).unwrap();

        let window = band.read_window(3, 3, 3, 2).unwrap();
        assert_eq!(window, arr2(&[[33.0, 34.0, 35.0], [43.0, 44.0, 45.0]]));
    }

    #[test]
    fn test_partial_edge_block() {
        let mut band = RasterBand::new(10, 10, DataType::Int32, (4, 4));
        band.write_window(0, 0, ramp(10, 10).view()).unwrap();

        let block = band.read_block(2, 2).unwrap();
        assert_eq!(block.dim(), (2, 2));
        assert_eq!(block[[0, 0]], 88.0);
        assert_eq!(block[[1, 1]], 99.0);
    }

    #[test]
    fn test_window_past_extent_fails() {
        let band = RasterBand::new(10, 10, DataType::Byte, (4, 4));
        assert!(matches!(
            band.read_window(8, 8, 3, 2),
            Err(OverviewError::IoFailure(_))
        ));
        assert!(band.read_block(3, 0).is_err());
    }

    #[test]
    fn test_lazy_allocation() {
        let mut band = RasterBand::new(8, 8, DataType::Byte, (4, 4));
        band.set_no_data_value(Some(7.0));
        assert!(!band.is_block_allocated(1, 1));
        assert_eq!(band.read_window(4, 4, 1, 1).unwrap()[[0, 0]], 7.0);

        band.write_window(5, 5, arr2(&[[1.0]]).view()).unwrap();
        assert!(band.is_block_allocated(1, 1));
        assert!(!band.is_block_allocated(0, 0));
        let block = band.read_block(1, 1).unwrap();
        assert_eq!(block[[1, 1]], 1.0);
        assert_eq!(block[[0, 0]], 7.0);
    }

    #[test]
    fn test_write_coerces_datatype() {
        let mut band = RasterBand::new(2, 1, DataType::Byte, (2, 1));
        band.write_window(0, 0, arr2(&[[127.5, 400.0]]).view()).unwrap();
        assert_eq!(band.read_all().unwrap(), arr2(&[[128.0, 255.0]]));
    }

    #[test]
    fn test_typed_read_write() {
        let mut band = RasterBand::new(3, 1, DataType::UInt16, (3, 1));
        band.write_from::<u16>(0, 0, arr2(&[[1u16, 500, 65535]]).view()).unwrap();
        let data = band.read_as::<u16>(0, 0, 3, 1).unwrap();
        assert_eq!(data, arr2(&[[1u16, 500, 65535]]));
    }

    #[test]
    fn test_write_block_size_checked() {
        let mut band = RasterBand::new(5, 5, DataType::Byte, (4, 4));
        assert!(band.write_block(1, 1, Array2::zeros((4, 4)).view()).is_err());
        assert!(band.write_block(1, 1, Array2::zeros((1, 1)).view()).is_ok());
    }

    #[test]
    fn test_metadata_items() {
        let mut band = RasterBand::new(1, 1, DataType::Byte, (1, 1));
        band.set_metadata_item("NBITS", "1", IMAGE_STRUCTURE);
        band.set_metadata_item(RESAMPLING_KEY, "AVERAGE", "");
        assert!(band.is_bilevel());
        assert_eq!(band.metadata_item(RESAMPLING_KEY, ""), Some("AVERAGE"));
        assert_eq!(band.metadata("").map(|m| m.len()), Some(1));
    }
}
