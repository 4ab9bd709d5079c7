//! Tiled GeoTIFF raster backend.
//!
//! Decodes one tile (TIFF "chunk") at a time through the `tiff` crate and
//! shares decoded tiles across requests via the [`BlockCache`]. Georeferencing
//! is read from the standard GeoTIFF tags: ModelPixelScale (33550) +
//! ModelTiepoint (33922) for the transform, GeoKeyDirectory (34735) for the
//! EPSG code, and GDAL_NODATA (42113) for the nodata sentinel.

use crate::crs::Crs;
use crate::error::{Error, Result};
use crate::io::cache::{BlockCache, BlockKey};
use crate::raster::{GeoTransform, RasterHandle, RasterSource};
use ndarray::{s, Array2};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;

// GeoTIFF tag ids (not named in the tiff crate)
const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
const TAG_MODEL_TIEPOINT: u16 = 33922;
const TAG_GEO_KEY_DIRECTORY: u16 = 34735;
const TAG_GDAL_NODATA: u16 = 42113;

// GeoKey ids inside the key directory
const KEY_GEOGRAPHIC_TYPE: u32 = 2048;
const KEY_PROJECTED_CS_TYPE: u32 = 3072;
const USER_DEFINED: u32 = 32767;

struct OpenTiff {
    handle: Arc<RasterHandle>,
    decoder: Mutex<Decoder<BufReader<File>>>,
    blocks_across: usize,
}

/// A [`RasterSource`] over local tiled GeoTIFF files.
///
/// One instance serves the whole process; decoded tiles live in a shared
/// [`BlockCache`] so concurrent requests over the same terrain pay for each
/// tile's decompression once.
pub struct GeoTiffSource {
    cache: Arc<BlockCache>,
    open_files: Mutex<HashMap<String, Arc<OpenTiff>>>,
    next_id: AtomicU64,
}

impl GeoTiffSource {
    /// Create a source with the given tile-cache capacity (decoded tiles).
    pub fn new(cache_capacity: usize) -> Self {
        Self {
            cache: Arc::new(BlockCache::new(cache_capacity)),
            open_files: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    fn open_tiff(&self, path: &str) -> Result<Arc<OpenTiff>> {
        if let Some(open) = self.open_files.lock().unwrap().get(path) {
            return Ok(Arc::clone(open));
        }

        let file = File::open(Path::new(path))
            .map_err(|e| Error::Io(format!("cannot open {path}: {e}")))?;
        let mut decoder = Decoder::new(BufReader::new(file))?;

        let (width, height) = decoder.dimensions()?;
        let (block_cols, block_rows) = decoder.chunk_dimensions();
        let blocks_across = (width as usize).div_ceil(block_cols as usize);

        let transform = read_geotransform(&mut decoder)
            .ok_or_else(|| Error::Io(format!("{path} carries no usable georeferencing tags")))?;
        let crs = read_crs(&mut decoder)
            .ok_or_else(|| Error::Io(format!("{path} carries no EPSG code in its geo keys")))?;
        let nodata = read_nodata(&mut decoder);

        let handle = Arc::new(RasterHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            path: path.to_string(),
            rows: height as usize,
            cols: width as usize,
            transform,
            crs,
            nodata,
            block_rows: block_rows as usize,
            block_cols: block_cols as usize,
        });

        let open = Arc::new(OpenTiff {
            handle,
            decoder: Mutex::new(decoder),
            blocks_across,
        });

        // A racing open of the same path may have landed first; keep the
        // earlier entry so the tile cache sees one raster id per file.
        let mut files = self.open_files.lock().unwrap();
        let open = Arc::clone(files.entry(path.to_string()).or_insert(open));
        drop(files);

        Ok(open)
    }

    fn read_block(&self, open: &OpenTiff, block_row: usize, block_col: usize) -> Result<Arc<Array2<f64>>> {
        let key = BlockKey {
            raster_id: open.handle.id,
            block_row,
            block_col,
        };

        self.cache.get_or_fill(key, || {
            let chunk_index = (block_row * open.blocks_across + block_col) as u32;

            let mut decoder = open.decoder.lock().unwrap();
            let (data_cols, data_rows) = decoder.chunk_data_dimensions(chunk_index);
            let decoded = decoder.read_chunk(chunk_index)?;
            drop(decoder);

            let values = decode_to_f64(decoded)?;
            let (rows, cols) = (data_rows as usize, data_cols as usize);
            if values.len() != rows * cols {
                return Err(Error::Io(format!(
                    "chunk {chunk_index} of {} decoded to {} values, expected {}",
                    open.handle.path,
                    values.len(),
                    rows * cols
                )));
            }

            Array2::from_shape_vec((rows, cols), values)
                .map_err(|e| Error::Io(e.to_string()))
        })
    }
}

impl RasterSource for GeoTiffSource {
    fn open(&self, path: &str) -> Result<Arc<RasterHandle>> {
        Ok(Arc::clone(&self.open_tiff(path)?.handle))
    }

    fn read_window(
        &self,
        handle: &RasterHandle,
        row_off: usize,
        col_off: usize,
        rows: usize,
        cols: usize,
    ) -> Result<Array2<f64>> {
        let open = self.open_tiff(&handle.path)?;

        let mut out = Array2::from_elem((rows, cols), handle.nodata);

        let block_row_lo = row_off / handle.block_rows;
        let block_row_hi = (row_off + rows - 1) / handle.block_rows;
        let block_col_lo = col_off / handle.block_cols;
        let block_col_hi = (col_off + cols - 1) / handle.block_cols;

        for block_row in block_row_lo..=block_row_hi {
            for block_col in block_col_lo..=block_col_hi {
                let block = self.read_block(&open, block_row, block_col)?;

                // Intersection of the block and the requested window, in
                // full-raster coordinates.
                let b_row0 = block_row * handle.block_rows;
                let b_col0 = block_col * handle.block_cols;
                let lo_r = b_row0.max(row_off);
                let lo_c = b_col0.max(col_off);
                let hi_r = (b_row0 + block.nrows()).min(row_off + rows);
                let hi_c = (b_col0 + block.ncols()).min(col_off + cols);

                if lo_r >= hi_r || lo_c >= hi_c {
                    continue;
                }

                out.slice_mut(s![lo_r - row_off..hi_r - row_off, lo_c - col_off..hi_c - col_off])
                    .assign(&block.slice(s![lo_r - b_row0..hi_r - b_row0, lo_c - b_col0..hi_c - b_col0]));
            }
        }

        Ok(out)
    }
}

fn read_geotransform<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
) -> Option<GeoTransform> {
    // The tiff crate names these tags, and its decoder stores them under the
    // named variants, so `Tag::Unknown(33550)` would never match on read.
    let scale = decoder.get_tag_f64_vec(Tag::ModelPixelScaleTag).ok()?;
    let tiepoint = decoder.get_tag_f64_vec(Tag::ModelTiepointTag).ok()?;
    GeoTransform::from_geotiff_tags(&scale, &tiepoint)
}

/// Pull the EPSG code out of the GeoKeyDirectory.
///
/// The directory is `[version, revision, minor, count, (id, loc, count,
/// value) * count]`; a projected CS key (3072) wins over a geographic one
/// (2048). User-defined (32767) codes are unusable here.
fn read_crs<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>) -> Option<Crs> {
    let directory = decoder
        .get_tag_u32_vec(Tag::GeoKeyDirectoryTag)
        .ok()?;
    if directory.len() < 4 {
        return None;
    }

    let num_keys = directory[3] as usize;
    let mut geographic = None;
    let mut projected = None;

    for i in 0..num_keys {
        let base = 4 + i * 4;
        if base + 4 > directory.len() {
            break;
        }
        let (key_id, location, value) = (directory[base], directory[base + 1], directory[base + 3]);
        if location != 0 || value == USER_DEFINED {
            continue;
        }
        match key_id {
            KEY_GEOGRAPHIC_TYPE => geographic = Some(value),
            KEY_PROJECTED_CS_TYPE => projected = Some(value),
            _ => {}
        }
    }

    projected.or(geographic).map(Crs::from_epsg)
}

fn read_nodata<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>) -> f64 {
    decoder
        .get_tag_ascii_string(Tag::GdalNodata)
        .ok()
        .and_then(|s| s.trim().trim_end_matches('\0').parse::<f64>().ok())
        .unwrap_or(f64::NAN)
}

fn decode_to_f64(result: DecodingResult) -> Result<Vec<f64>> {
    Ok(match result {
        DecodingResult::U8(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::U16(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::U32(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::U64(buf) => buf.into_iter().map(|v| v as f64).collect(),
        DecodingResult::I8(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::I16(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::I32(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::I64(buf) => buf.into_iter().map(|v| v as f64).collect(),
        DecodingResult::F32(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::F64(buf) => buf,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;
    use tempfile::NamedTempFile;
    use tiff::encoder::colortype::Gray32Float;
    use tiff::encoder::TiffEncoder;

    /// Encode a small projected GeoTIFF (EPSG:32613, 10 m cells, origin at
    /// (500, 600)) whose pixel values are their flat index.
    fn write_test_tiff(rows: u32, cols: u32) -> NamedTempFile {
        let mut tmp = NamedTempFile::with_suffix(".tif").unwrap();
        let data: Vec<f32> = (0..rows * cols).map(|i| i as f32).collect();

        let mut encoder = TiffEncoder::new(tmp.as_file_mut()).unwrap();
        let mut image = encoder.new_image::<Gray32Float>(cols, rows).unwrap();

        let scale = vec![10.0, 10.0, 0.0];
        image
            .encoder()
            .write_tag(Tag::Unknown(TAG_MODEL_PIXEL_SCALE), scale.as_slice())
            .unwrap();

        let tiepoint = vec![0.0, 0.0, 0.0, 500.0, 600.0, 0.0];
        image
            .encoder()
            .write_tag(Tag::Unknown(TAG_MODEL_TIEPOINT), tiepoint.as_slice())
            .unwrap();

        // Version 1.1.0, 3 keys: projected model, pixel-is-area, UTM 13N.
        let geokeys: Vec<u16> = vec![
            1, 1, 0, 3, //
            1024, 0, 1, 1, //
            1025, 0, 1, 1, //
            3072, 0, 1, 32613,
        ];
        image
            .encoder()
            .write_tag(Tag::Unknown(TAG_GEO_KEY_DIRECTORY), geokeys.as_slice())
            .unwrap();

        image.write_data(&data).unwrap();
        tmp
    }

    #[test]
    fn reads_georeferencing_and_pixels() {
        let tif = write_test_tiff(3, 4);
        let source = GeoTiffSource::new(8);
        let handle = source.open(tif.path().to_str().unwrap()).unwrap();

        assert_eq!((handle.rows, handle.cols), (3, 4));
        assert!(handle.crs.is_equivalent(&Crs::from_epsg(32613)));
        assert_eq!(handle.transform.origin_x, 500.0);
        assert_eq!(handle.transform.origin_y, 600.0);
        assert_eq!(handle.transform.cell_width, 10.0);
        assert!(handle.nodata.is_nan());

        let window = source.read_window(&handle, 1, 1, 2, 2).unwrap();
        assert_eq!(window[[0, 0]], 5.0);
        assert_eq!(window[[1, 1]], 10.0);
    }

    #[test]
    fn racing_opens_share_one_raster_id() {
        let tif = write_test_tiff(2, 2);
        let path = tif.path().to_str().unwrap().to_string();
        let source = Arc::new(GeoTiffSource::new(8));

        // Racing opens of one path must all come back with the same raster
        // id, or the block cache would hold this file's tiles once per id.
        let barrier = Arc::new(Barrier::new(4));
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let source = Arc::clone(&source);
                let barrier = Arc::clone(&barrier);
                let path = path.clone();
                thread::spawn(move || {
                    barrier.wait();
                    source.open(&path).unwrap()
                })
            })
            .collect();

        let ids: Vec<u64> = workers
            .into_iter()
            .map(|w| w.join().unwrap().id)
            .collect();
        assert!(ids.iter().all(|&id| id == ids[0]));
        assert_eq!(source.open_files.lock().unwrap().len(), 1);
    }
}
