//! The image-collection query interface.
//!
//! The core consumes only two methods from the external collection;
//! everything else (ingestion, the SQLite index, spatial/temporal
//! filtering, validity checks) is out of scope and left to whatever
//! indexed the collection before handing it to a cube.

use crate::geometry::Bounds;

/// One band available in the collection, as reported by
/// `get_bands()`.
#[derive(Debug, Clone, PartialEq)]
pub struct BandInfo {
    pub name: String,
    pub unit: String,
    pub nodata: Option<f64>,
    pub element_type: String,
    pub scale: f64,
    pub offset: f64,
}

/// One `(descriptor, band)` observation returned by
/// `find_range_st`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    /// Opaque file identifier the raster backend can open.
    pub descriptor: String,
    pub band_name: String,
    /// 1-based band index within the file.
    pub band_num: u32,
    pub datetime: crate::datetime::DateTime,
    pub bounds: Bounds,
    pub srs: String,
}

/// The external collaborator: an opaque, already-indexed image
/// collection. The core never constructs or mutates one; it only
/// queries.
pub trait ImageCollection: Send + Sync {
    fn get_bands(&self) -> Vec<BandInfo>;

    /// Records overlapping `bounds` (spatial window plus temporal
    /// range), ordered by `descriptor` ascending so consecutive
    /// records sharing a descriptor can be grouped into one
    /// file-level read plan.
    fn find_range_st(&self, bounds: &Bounds, t_range: (crate::datetime::DateTime, crate::datetime::DateTime)) -> Vec<ImageRecord>;
}

/// An in-memory `ImageCollection`, sufficient to exercise the engine
/// without a SQLite-backed ingestion pipeline.
pub struct VecImageCollection {
    bands: Vec<BandInfo>,
    records: Vec<ImageRecord>,
}

impl VecImageCollection {
    pub fn new(bands: Vec<BandInfo>, mut records: Vec<ImageRecord>) -> Self {
        records.sort_by(|a, b| a.descriptor.cmp(&b.descriptor));
        VecImageCollection { bands, records }
    }
}

impl ImageCollection for VecImageCollection {
    fn get_bands(&self) -> Vec<BandInfo> {
        self.bands.clone()
    }

    fn find_range_st(&self, bounds: &Bounds, t_range: (crate::datetime::DateTime, crate::datetime::DateTime)) -> Vec<ImageRecord> {
        use crate::geometry::BoundsExt;
        let (t0, t1) = t_range;
        self.records
            .iter()
            .filter(|r| r.datetime >= t0 && r.datetime < t1 && bounds.intersect(&r.bounds).is_some())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datetime::DateTime;
    use chrono::NaiveDate;

    fn dt(y: i32, m: u32, d: u32) -> DateTime {
        DateTime::from_naive(NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(0, 0, 0).unwrap())
    }

    #[test]
    fn find_range_st_orders_by_descriptor() {
        let bands = vec![BandInfo { name: "b1".into(), unit: String::new(), nodata: None, element_type: "float64".into(), scale: 1.0, offset: 0.0 }];
        let records = vec![
            ImageRecord { descriptor: "z.tif".into(), band_name: "b1".into(), band_num: 1, datetime: dt(2020, 1, 2), bounds: Bounds::new((0.0, 0.0), (1.0, 1.0)), srs: "EPSG:4326".into() },
            ImageRecord { descriptor: "a.tif".into(), band_name: "b1".into(), band_num: 1, datetime: dt(2020, 1, 1), bounds: Bounds::new((0.0, 0.0), (1.0, 1.0)), srs: "EPSG:4326".into() },
        ];
        let coll = VecImageCollection::new(bands, records);
        let result = coll.find_range_st(&Bounds::new((0.0, 0.0), (1.0, 1.0)), (dt(2019, 1, 1), dt(2021, 1, 1)));
        assert_eq!(result[0].descriptor, "a.tif");
        assert_eq!(result[1].descriptor, "z.tif");
    }

    #[test]
    fn find_range_st_excludes_non_overlapping() {
        let coll = VecImageCollection::new(vec![], vec![
            ImageRecord { descriptor: "a.tif".into(), band_name: "b1".into(), band_num: 1, datetime: dt(2020, 1, 1), bounds: Bounds::new((100.0, 100.0), (101.0, 101.0)), srs: "EPSG:4326".into() },
        ]);
        let result = coll.find_range_st(&Bounds::new((0.0, 0.0), (1.0, 1.0)), (dt(2019, 1, 1), dt(2021, 1, 1)));
        assert!(result.is_empty());
    }
}
