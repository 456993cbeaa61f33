use anyhow::{Context, Result, bail};
use std::path::Path;

/// An elevation raster loaded from an ESRI ASCII grid (`.asc`).
///
/// Values are stored row-major with the first row at the top (north) edge,
/// as laid out in the file. Sampling is nearest-cell with no interpolation.
#[derive(Clone, Debug)]
pub struct GridRaster {
    ncols: usize,
    nrows: usize,
    xll: f64,
    yll: f64,
    cellsize: f64,
    nodata: Option<f64>,
    values: Vec<f64>,
}

impl GridRaster {
    pub fn from_ascii_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Raster: failed to read {:?}", path))?;
        Self::from_ascii(&text).with_context(|| format!("Raster: failed to parse {:?}", path))
    }

    pub fn from_ascii(text: &str) -> Result<Self> {
        let mut tokens = text.split_whitespace().peekable();

        let mut ncols = None;
        let mut nrows = None;
        let mut xll = None;
        let mut yll = None;
        let mut cellsize = None;
        let mut nodata = None;
        let mut xll_is_center = false;
        let mut yll_is_center = false;

        // Header lines are `key value` pairs; the first non-keyword token
        // starts the data block.
        while let Some(&token) = tokens.peek() {
            let key = token.to_ascii_lowercase();
            let slot = match key.as_str() {
                "ncols" | "nrows" | "xllcorner" | "yllcorner" | "xllcenter" | "yllcenter"
                | "cellsize" | "nodata_value" => key,
                _ => break,
            };
            tokens.next();
            let value: f64 = tokens
                .next()
                .with_context(|| format!("missing value for header '{}'", slot))?
                .parse()
                .with_context(|| format!("invalid value for header '{}'", slot))?;
            match slot.as_str() {
                "ncols" => ncols = Some(value as usize),
                "nrows" => nrows = Some(value as usize),
                "xllcorner" => xll = Some(value),
                "xllcenter" => {
                    xll = Some(value);
                    xll_is_center = true;
                }
                "yllcorner" => yll = Some(value),
                "yllcenter" => {
                    yll = Some(value);
                    yll_is_center = true;
                }
                "cellsize" => cellsize = Some(value),
                "nodata_value" => nodata = Some(value),
                _ => unreachable!(),
            }
        }

        let ncols = ncols.context("missing 'ncols' header")?;
        let nrows = nrows.context("missing 'nrows' header")?;
        let cellsize = cellsize.context("missing 'cellsize' header")?;
        if cellsize <= 0.0 {
            bail!("cellsize must be positive, got {}", cellsize);
        }
        let mut xll = xll.context("missing 'xllcorner' header")?;
        let mut yll = yll.context("missing 'yllcorner' header")?;
        if xll_is_center {
            xll -= cellsize / 2.0;
        }
        if yll_is_center {
            yll -= cellsize / 2.0;
        }

        let values: Vec<f64> = tokens
            .map(|t| t.parse::<f64>().with_context(|| format!("bad cell value '{}'", t)))
            .collect::<Result<_>>()?;
        if values.len() != ncols * nrows {
            bail!(
                "expected {} cell values ({} x {}), found {}",
                ncols * nrows,
                ncols,
                nrows,
                values.len()
            );
        }

        Ok(Self {
            ncols,
            nrows,
            xll,
            yll,
            cellsize,
            nodata,
            values,
        })
    }

    fn is_nodata(&self, value: f64) -> bool {
        self.nodata.map(|nd| value == nd).unwrap_or(false)
    }

    /// Samples the cell containing (x, y). Returns `None` outside the grid
    /// extent or on a nodata cell.
    pub fn sample(&self, x: f64, y: f64) -> Option<f64> {
        let col = ((x - self.xll) / self.cellsize).floor();
        let row_from_bottom = ((y - self.yll) / self.cellsize).floor();
        if col < 0.0 || row_from_bottom < 0.0 {
            return None;
        }
        let col = col as usize;
        let row_from_bottom = row_from_bottom as usize;
        if col >= self.ncols || row_from_bottom >= self.nrows {
            return None;
        }
        let row = self.nrows - 1 - row_from_bottom;
        let value = self.values[row * self.ncols + col];
        if self.is_nodata(value) { None } else { Some(value) }
    }

    /// Iterates all data cells as (center x, center y, value), skipping
    /// nodata. Used by zonal statistics to visit every zone in one pass.
    pub fn cells(&self) -> impl Iterator<Item = (f64, f64, f64)> + '_ {
        (0..self.nrows).flat_map(move |row| {
            (0..self.ncols).filter_map(move |col| {
                let value = self.values[row * self.ncols + col];
                if self.is_nodata(value) {
                    return None;
                }
                let x = self.xll + (col as f64 + 0.5) * self.cellsize;
                let y = self.yll + ((self.nrows - 1 - row) as f64 + 0.5) * self.cellsize;
                Some((x, y, value))
            })
        })
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRID: &str = "\
ncols 3
nrows 2
xllcorner 0.0
yllcorner 0.0
cellsize 1.0
NODATA_value -9999
1 2 3
4 -9999 6
";

    #[test]
    fn parses_header_and_values() {
        let raster = GridRaster::from_ascii(GRID).unwrap();
        assert_eq!(raster.ncols(), 3);
        assert_eq!(raster.nrows(), 2);
    }

    #[test]
    fn samples_nearest_cell() {
        let raster = GridRaster::from_ascii(GRID).unwrap();
        // Bottom row of the file is the southernmost row.
        assert_eq!(raster.sample(0.5, 0.5), Some(4.0));
        assert_eq!(raster.sample(2.5, 1.5), Some(3.0));
        // Anywhere within a cell hits that cell, no interpolation.
        assert_eq!(raster.sample(0.01, 1.99), Some(1.0));
    }

    #[test]
    fn sample_outside_extent_is_none() {
        let raster = GridRaster::from_ascii(GRID).unwrap();
        assert_eq!(raster.sample(-0.1, 0.5), None);
        assert_eq!(raster.sample(0.5, 2.1), None);
        assert_eq!(raster.sample(3.0, 0.5), None);
    }

    #[test]
    fn nodata_cell_is_none() {
        let raster = GridRaster::from_ascii(GRID).unwrap();
        assert_eq!(raster.sample(1.5, 0.5), None);
    }

    #[test]
    fn cells_skip_nodata_and_report_centers() {
        let raster = GridRaster::from_ascii(GRID).unwrap();
        let cells: Vec<_> = raster.cells().collect();
        assert_eq!(cells.len(), 5);
        assert!(cells.contains(&(0.5, 1.5, 1.0)));
        assert!(cells.contains(&(0.5, 0.5, 4.0)));
        assert!(!cells.iter().any(|&(_, _, v)| v == -9999.0));
    }

    #[test]
    fn xllcenter_header_shifts_origin() {
        let grid = "\
ncols 1
nrows 1
xllcenter 0.5
yllcenter 0.5
cellsize 1.0
7
";
        let raster = GridRaster::from_ascii(grid).unwrap();
        assert_eq!(raster.sample(0.1, 0.1), Some(7.0));
        assert_eq!(raster.sample(-0.1, 0.1), None);
    }

    #[test]
    fn rejects_short_data_block() {
        let grid = "ncols 2\nnrows 2\nxllcorner 0\nyllcorner 0\ncellsize 1\n1 2 3\n";
        let err = GridRaster::from_ascii(grid).unwrap_err();
        assert!(err.to_string().contains("expected 4 cell values"));
    }
}
