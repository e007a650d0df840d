//! Raster backend seam: the "concrete raster-I/O library" the core
//! treats as an external collaborator.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// One band to warp out of a source raster, identified by its
/// 1-based index within the file.
#[derive(Debug, Clone, Copy)]
pub struct BandRequest {
    pub band_num: u32,
}

/// The destination grid and warp parameters for one request.
#[derive(Debug, Clone)]
pub struct WarpTarget {
    pub srs: String,
    /// `(left, bottom, right, top)`.
    pub bounds: (f64, f64, f64, f64),
    pub width: u32,
    pub height: u32,
    pub resampling: String,
    pub num_threads: u32,
    /// Per-band source nodata, in the same order as the band
    /// request list. `None` when the collection's nodata metadata
    /// for the group was partial (the caller has already logged a
    /// warning and chosen to omit `-srcnodata`).
    pub src_nodata: Option<Vec<f64>>,
}

/// The warped result: one row-major `width * height` plane of
/// `f64` per requested band, NaN where nodata.
#[derive(Debug, Clone)]
pub struct WarpedRaster {
    pub width: u32,
    pub height: u32,
    pub bands: Vec<Vec<f64>>,
}

/// Abstracts the raster-I/O library that performs reprojection and
/// resampling. `spec.md` puts the concrete implementation out of
/// scope; this is the seam it specifies instead.
pub trait RasterBackend: Send + Sync {
    /// Opens `descriptor` and warps the requested bands into a
    /// single in-memory raster matching `target` exactly.
    fn warp(&self, descriptor: &str, bands: &[BandRequest], target: &WarpTarget) -> Result<WarpedRaster>;
}

#[cfg(feature = "gdal")]
pub use gdal_backend::GdalBackend;

#[cfg(feature = "gdal")]
mod gdal_backend {
    use super::*;
    use gdal_sys::{
        CSLDestroy, GDALClose, GDALCreate, GDALDatasetH, GDALGetDriverByName,
        GDALGetRasterBand, GDALOpenEx, GDALRasterIO, GDALWarp, GDALWarpAppOptionsFree,
        GDALWarpAppOptionsNew,
    };
    use std::ffi::CString;
    use std::os::raw::c_void;
    use std::ptr;

    /// Warps via `GDALWarp`'s app-options entry point, assembling
    /// the same argument list the source's `CPLStringList warp_args`
    /// does (`-t_srs`, `-te`, `-dstnodata nan`, `-ot Float64`, `-ts`,
    /// `-r`, `-wo NUM_THREADS=`), plus `-b` per requested band.
    pub struct GdalBackend;

    impl GdalBackend {
        pub fn new() -> Self {
            unsafe { gdal_sys::GDALAllRegister() };
            GdalBackend
        }
    }

    impl Default for GdalBackend {
        fn default() -> Self {
            Self::new()
        }
    }

    struct CslGuard(*mut *mut i8);
    impl Drop for CslGuard {
        fn drop(&mut self) {
            unsafe { CSLDestroy(self.0) };
        }
    }

    fn csl_add(list: *mut *mut i8, arg: &str) -> Result<*mut *mut i8> {
        let c = CString::new(arg).map_err(|e| Error::Other(e.into()))?;
        Ok(unsafe { gdal_sys::CSLAddString(list, c.as_ptr()) })
    }

    impl RasterBackend for GdalBackend {
        fn warp(&self, descriptor: &str, bands: &[BandRequest], target: &WarpTarget) -> Result<WarpedRaster> {
            let path = CString::new(descriptor).map_err(|e| Error::Other(e.into()))?;
            let src = unsafe {
                GDALOpenEx(
                    path.as_ptr(),
                    gdal_sys::GDAL_OF_RASTER | gdal_sys::GDAL_OF_READONLY,
                    ptr::null(),
                    ptr::null(),
                    ptr::null(),
                )
            };
            if src.is_null() {
                return Err(Error::Io(format!("cannot open source raster {descriptor}")));
            }

            let mut args: *mut *mut i8 = ptr::null_mut();
            args = csl_add(args, "-t_srs")?;
            args = csl_add(args, &target.srs)?;
            args = csl_add(args, "-te")?;
            args = csl_add(args, &target.bounds.0.to_string())?;
            args = csl_add(args, &target.bounds.1.to_string())?;
            args = csl_add(args, &target.bounds.2.to_string())?;
            args = csl_add(args, &target.bounds.3.to_string())?;
            args = csl_add(args, "-dstnodata")?;
            args = csl_add(args, "nan")?;
            if let Some(nodata) = &target.src_nodata {
                if nodata.len() == 1 {
                    args = csl_add(args, "-srcnodata")?;
                    args = csl_add(args, &nodata[0].to_string())?;
                } else if nodata.len() == bands.len() {
                    args = csl_add(args, "-srcnodata")?;
                    let joined = nodata.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(" ");
                    args = csl_add(args, &joined)?;
                }
            }
            args = csl_add(args, "-ot")?;
            args = csl_add(args, "Float64")?;
            args = csl_add(args, "-ts")?;
            args = csl_add(args, &target.width.to_string())?;
            args = csl_add(args, &target.height.to_string())?;
            args = csl_add(args, "-r")?;
            args = csl_add(args, &target.resampling)?;
            args = csl_add(args, "-wo")?;
            args = csl_add(args, &format!("NUM_THREADS={}", target.num_threads))?;
            args = csl_add(args, "-wo")?;
            args = csl_add(args, "INIT_DEST=nan")?;
            for b in bands {
                args = csl_add(args, "-b")?;
                args = csl_add(args, &b.band_num.to_string())?;
            }
            let _csl_guard = CslGuard(args);

            let options = unsafe { GDALWarpAppOptionsNew(args, ptr::null_mut()) };
            if options.is_null() {
                unsafe { GDALClose(src) };
                return Err(Error::Io("failed to build warp options".to_string()));
            }

            let mem_driver = unsafe {
                let name = CString::new("MEM").unwrap();
                GDALGetDriverByName(name.as_ptr())
            };
            let dst = unsafe {
                GDALCreate(
                    mem_driver,
                    ptr::null(),
                    target.width as i32,
                    target.height as i32,
                    bands.len() as i32,
                    gdal_sys::GDALDataType::GDT_Float64,
                    ptr::null_mut(),
                )
            };
            if dst.is_null() {
                unsafe {
                    GDALWarpAppOptionsFree(options);
                    GDALClose(src);
                }
                return Err(Error::Io("failed to allocate warp destination".to_string()));
            }

            let mut src_ds: GDALDatasetH = src;
            let mut err: i32 = 0;
            let result = unsafe { GDALWarp(ptr::null(), dst, 1, &mut src_ds, options, &mut err) };

            unsafe {
                GDALWarpAppOptionsFree(options);
                GDALClose(src);
            }

            if result.is_null() || err != 0 {
                unsafe { GDALClose(dst) };
                return Err(Error::Io(format!("warp failed for {descriptor}")).into());
            }

            let plane_len = target.width as usize * target.height as usize;
            let mut out_bands = Vec::with_capacity(bands.len());
            for i in 0..bands.len() {
                let mut buf = vec![0f64; plane_len];
                let band_h = unsafe { GDALGetRasterBand(dst, (i + 1) as i32) };
                let rc = unsafe {
                    GDALRasterIO(
                        band_h,
                        gdal_sys::GDALRWFlag::GF_Read,
                        0,
                        0,
                        target.width as i32,
                        target.height as i32,
                        buf.as_mut_ptr() as *mut c_void,
                        target.width as i32,
                        target.height as i32,
                        gdal_sys::GDALDataType::GDT_Float64,
                        0,
                        0,
                    )
                };
                if rc != gdal_sys::CPLErr::CE_None {
                    unsafe { GDALClose(dst) };
                    return Err(Error::Io(format!("reading warped band {} of {descriptor}", i + 1)));
                }
                out_bands.push(buf);
            }

            unsafe { GDALClose(dst) };

            Ok(WarpedRaster { width: target.width, height: target.height, bands: out_bands })
        }
    }
}

/// An in-memory stand-in for the raster backend, keyed by descriptor
/// string, holding pre-set per-band pixel grids. "Warping" is a
/// direct nearest-neighbor resample with no reprojection — every
/// test scenario in `spec.md` §8 runs against this, so the suite
/// never needs real GDAL datasets on disk.
#[derive(Default, Clone)]
pub struct MemoryBackend {
    rasters: Arc<Mutex<HashMap<String, MemoryRaster>>>,
}

#[derive(Clone)]
struct MemoryRaster {
    width: u32,
    height: u32,
    /// Row-major plane per 1-based band number.
    bands: HashMap<u32, Vec<f64>>,
    nodata: HashMap<u32, f64>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a source raster's pixel data for `descriptor`. Panics
    /// on malformed input (test-only helper).
    pub fn set_raster(&self, descriptor: impl Into<String>, width: u32, height: u32, bands: HashMap<u32, Vec<f64>>) {
        for plane in bands.values() {
            assert_eq!(plane.len(), (width * height) as usize);
        }
        let mut guard = self.rasters.lock().unwrap();
        guard.insert(descriptor.into(), MemoryRaster { width, height, bands, nodata: HashMap::new() });
    }

    pub fn set_nodata(&self, descriptor: &str, band_num: u32, value: f64) {
        let mut guard = self.rasters.lock().unwrap();
        if let Some(r) = guard.get_mut(descriptor) {
            r.nodata.insert(band_num, value);
        }
    }
}

impl RasterBackend for MemoryBackend {
    fn warp(&self, descriptor: &str, bands: &[BandRequest], target: &WarpTarget) -> Result<WarpedRaster> {
        let guard = self.rasters.lock().unwrap();
        let raster = guard
            .get(descriptor)
            .ok_or_else(|| Error::Io(format!("no such test raster: {descriptor}")))?;

        let mut out_bands = Vec::with_capacity(bands.len());
        for req in bands {
            let plane = raster
                .bands
                .get(&req.band_num)
                .ok_or_else(|| Error::Io(format!("{descriptor} has no band {}", req.band_num)))?;
            let nodata = raster.nodata.get(&req.band_num).copied();

            let mut resampled = vec![0f64; (target.width * target.height) as usize];
            for ty in 0..target.height {
                let sy = (ty as u64 * raster.height as u64 / target.height.max(1) as u64).min(raster.height as u64 - 1) as u32;
                for tx in 0..target.width {
                    let sx = (tx as u64 * raster.width as u64 / target.width.max(1) as u64).min(raster.width as u64 - 1) as u32;
                    let src_idx = (sy * raster.width + sx) as usize;
                    let mut v = plane[src_idx];
                    if let Some(nd) = nodata {
                        if v == nd {
                            v = f64::NAN;
                        }
                    }
                    resampled[(ty * target.width + tx) as usize] = v;
                }
            }
            out_bands.push(resampled);
        }

        Ok(WarpedRaster { width: target.width, height: target.height, bands: out_bands })
    }
}
