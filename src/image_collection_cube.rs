//! The image-collection source cube: the leaf operator that warps
//! and aggregates source rasters into one output chunk.

use crate::aggregation::{AggregationMethod, AggregationState};
use crate::backend::{BandRequest, RasterBackend, WarpTarget};
use crate::band::Band;
use crate::collection::ImageCollection;
use crate::cube::{Cube, CubeBase};
use crate::error::{Error, Result};
use crate::stref::{ChunkGeometry, STRef};
use std::sync::{Arc, Mutex, Weak};

/// The view augments an `STRef` with the aggregation and resampling
/// choices that parameterize how overlapping observations combine.
#[derive(Debug, Clone)]
pub struct View {
    pub aggregation: AggregationMethod,
    pub resampling: String,
    pub num_threads: u32,
}

pub struct ImageCollectionCube {
    base: CubeBase,
    collection: Arc<dyn ImageCollection>,
    backend: Arc<dyn RasterBackend>,
    view: Mutex<View>,
    /// Per-band (lower-cased name) source nodata, as declared by the
    /// collection; used to decide whether `-srcnodata` can be passed
    /// through for a read group.
    source_nodata: std::collections::HashMap<String, Option<f64>>,
}

impl ImageCollectionCube {
    pub fn create(
        collection: Arc<dyn ImageCollection>,
        backend: Arc<dyn RasterBackend>,
        st_ref: STRef,
        chunk_size: (u32, u32, u32),
        view: View,
    ) -> Result<Arc<Self>> {
        let collection_bands = collection.get_bands();
        let source_nodata = collection_bands
            .iter()
            .map(|b| (b.name.to_lowercase(), b.nodata))
            .collect();
        let bands = collection_bands
            .into_iter()
            .map(|b| Band {
                name: b.name,
                unit: b.unit,
                nodata: b.nodata.map(|n| n.to_string()).unwrap_or_else(|| "nan".to_string()),
                element_type: b.element_type,
                scale: b.scale,
                offset: b.offset,
            })
            .collect();

        Ok(Arc::new(ImageCollectionCube {
            base: CubeBase::new(st_ref, bands, chunk_size),
            collection,
            backend,
            view: Mutex::new(view),
            source_nodata,
        }))
    }

    fn geometry(&self) -> Result<ChunkGeometry> {
        ChunkGeometry::new(self.base.st_ref(), self.base.chunk_size())
    }
}

impl Cube for ImageCollectionCube {
    fn read_chunk(&self, id: u64) -> Result<crate::chunkbuf::ChunkBuffer> {
        use crate::chunkbuf::ChunkBuffer;

        let geometry = self.geometry()?;
        let bands = self.base.bands();
        let (ct, cy, cx) = geometry.chunk_size(id)?;
        let (t0, t1, left, right, bottom, top) = geometry.bounds_from_chunk(id)?;
        let st_ref = self.base.st_ref();

        let chunk_bounds = crate::geometry::Bounds::new((left, bottom), (right, top));
        let records = self.collection.find_range_st(&chunk_bounds, (t0, t1));
        if records.is_empty() {
            return Ok(ChunkBuffer::empty_with_bands(bands.len() as u32));
        }

        let view = self.view.lock().unwrap().clone();
        let mut output = ndarray::Array4::from_elem(
            (bands.len(), ct as usize, cy as usize, cx as usize),
            f64::NAN,
        );

        let band_index: std::collections::HashMap<String, usize> = bands
            .iter()
            .enumerate()
            .map(|(i, b)| (b.lower_name(), i))
            .collect();

        let mut agg = AggregationState::new(view.aggregation);

        // Records are sorted by descriptor; group consecutive
        // records sharing one descriptor into a single file-level
        // read plan whose band list is the union of that group's
        // bands.
        let mut i = 0;
        while i < records.len() {
            let descriptor = records[i].descriptor.clone();
            let mut j = i;
            while j < records.len() && records[j].descriptor == descriptor {
                j += 1;
            }
            let group = &records[i..j];
            i = j;

            let mut band_nums = Vec::new();
            let mut out_slots = Vec::new();
            let mut t_indices = Vec::new();
            let mut nodata_values = Vec::new();
            for rec in group {
                let lower_name = rec.band_name.to_lowercase();
                let out_idx = match band_index.get(&lower_name) {
                    Some(idx) => *idx,
                    None => continue,
                };
                let t_idx = rec.datetime.offset_in(&t0, &st_ref.dt);
                if t_idx < 0 || t_idx as u32 >= ct {
                    continue;
                }
                band_nums.push(BandRequest { band_num: rec.band_num });
                out_slots.push(out_idx);
                t_indices.push(t_idx as usize);
                nodata_values.push(self.source_nodata.get(&lower_name).copied().flatten());
            }
            if band_nums.is_empty() {
                continue;
            }

            let src_nodata = reconcile_nodata(&nodata_values);

            let target = WarpTarget {
                srs: st_ref.srs.clone(),
                bounds: (left, bottom, right, top),
                width: cx,
                height: cy,
                resampling: view.resampling.clone(),
                num_threads: view.num_threads,
                src_nodata,
            };

            let warped = self
                .backend
                .warp(&descriptor, &band_nums, &target)
                .map_err(|e| Error::Io(format!("warping {descriptor}: {e}")))?;

            for (slot, (out_idx, t_idx)) in out_slots.iter().zip(t_indices.iter()).enumerate() {
                let plane = &warped.bands[slot];
                for y in 0..cy as usize {
                    for x in 0..cx as usize {
                        let v = plane[y * cx as usize + x];
                        if v.is_nan() {
                            continue;
                        }
                        let cell = (*out_idx, *t_idx, y, x);
                        if matches!(view.aggregation, AggregationMethod::None) {
                            output[cell] = v;
                        } else {
                            agg.update(&mut output, v, cell);
                        }
                    }
                }
            }
        }

        agg.finalize(&mut output);

        Ok(ChunkBuffer::from_array(output))
    }

    fn make_constructible_json(&self) -> serde_json::Value {
        let view = self.view.lock().unwrap();
        let (ct, cy, cx) = self.base.chunk_size();
        serde_json::json!({
            "cube_type": "image_collection",
            "chunk_size": [ct, cy, cx],
            "st_ref": self.base.st_ref().to_json(),
            "view": {
                "aggregation": view.aggregation.as_str(),
                "resampling": view.resampling,
                "num_threads": view.num_threads,
            },
        })
    }

    fn set_st_reference(&self, r: STRef) {
        self.base.set_st_reference(r);
    }

    fn st_ref(&self) -> STRef {
        self.base.st_ref()
    }

    fn bands(&self) -> Vec<Band> {
        self.base.bands()
    }

    fn chunk_size(&self) -> (u32, u32, u32) {
        self.base.chunk_size()
    }

    fn count_chunks(&self) -> u64 {
        self.base.count_chunks()
    }

    fn register_parent(&self, parent: Weak<dyn Cube>) {
        self.base.register_parent(parent);
    }

    fn parents(&self) -> Vec<Weak<dyn Cube>> {
        self.base.parents()
    }
}

/// Per-group nodata reconciliation (§4.E step 5): pass the value
/// through when the collection's declaration is either complete (one
/// value per group band) or a single shared value; otherwise omit
/// `-srcnodata` and let the caller log the warning.
fn reconcile_nodata(values: &[Option<f64>]) -> Option<Vec<f64>> {
    let present: Vec<f64> = values.iter().filter_map(|v| *v).collect();
    if present.is_empty() {
        None
    } else if present.len() == values.len() {
        Some(present)
    } else {
        log::warn!("partial nodata metadata for a read group; omitting srcnodata");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::collection::{BandInfo, ImageRecord, VecImageCollection};
    use crate::datetime::{DateTime, Duration, TimeUnit};
    use chrono::NaiveDate;
    use std::collections::HashMap;

    fn dt(y: i32, m: u32, d: u32) -> DateTime {
        DateTime::from_naive(NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(0, 0, 0).unwrap())
    }

    fn sample_st_ref(nt: u32) -> STRef {
        STRef::builder()
            .with_window(0.0, 0.0, 1.0, 1.0)
            .with_srs("EPSG:4326")
            .with_extent(1, 1, nt)
            .with_time(dt(2020, 1, 1), dt(2020, 1, 1 + nt), Duration::new(TimeUnit::Day, 1))
            .build()
            .unwrap()
    }

    fn band_info() -> BandInfo {
        BandInfo { name: "b1".into(), unit: String::new(), nodata: None, element_type: "float64".into(), scale: 1.0, offset: 0.0 }
    }

    #[test]
    fn empty_overlap_yields_empty_buffer() {
        let collection = Arc::new(VecImageCollection::new(vec![band_info()], vec![]));
        let backend = Arc::new(MemoryBackend::new());
        let cube = ImageCollectionCube::create(
            collection,
            backend,
            sample_st_ref(1),
            (1, 1, 1),
            View { aggregation: AggregationMethod::None, resampling: "near".into(), num_threads: 1 },
        )
        .unwrap();

        let buf = cube.read_chunk(0).unwrap();
        assert_eq!(buf.size(), (1, 0, 0, 0));
        assert_eq!(buf.total_size_bytes(), 0);
    }

    #[test]
    fn mean_of_two_images() {
        let collection = Arc::new(VecImageCollection::new(
            vec![band_info()],
            vec![
                ImageRecord {
                    descriptor: "a.tif".into(),
                    band_name: "b1".into(),
                    band_num: 1,
                    datetime: dt(2020, 1, 1),
                    bounds: crate::geometry::Bounds::new((0.0, 0.0), (1.0, 1.0)),
                    srs: "EPSG:4326".into(),
                },
                ImageRecord {
                    descriptor: "b.tif".into(),
                    band_name: "b1".into(),
                    band_num: 1,
                    datetime: dt(2020, 1, 1),
                    bounds: crate::geometry::Bounds::new((0.0, 0.0), (1.0, 1.0)),
                    srs: "EPSG:4326".into(),
                },
            ],
        ));
        let backend = Arc::new(MemoryBackend::new());
        let mut pixels_a = HashMap::new();
        pixels_a.insert(1u32, vec![2.0]);
        backend.set_raster("a.tif", 1, 1, pixels_a);
        let mut pixels_b = HashMap::new();
        pixels_b.insert(1u32, vec![4.0]);
        backend.set_raster("b.tif", 1, 1, pixels_b);

        let cube = ImageCollectionCube::create(
            collection,
            backend,
            sample_st_ref(1),
            (1, 1, 1),
            View { aggregation: AggregationMethod::Mean, resampling: "near".into(), num_threads: 1 },
        )
        .unwrap();

        let buf = cube.read_chunk(0).unwrap();
        assert_eq!(buf.size(), (1, 1, 1, 1));
        assert_eq!(buf.as_slice().unwrap()[0], 3.0);
    }
}
