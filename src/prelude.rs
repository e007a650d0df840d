//! Convenience re-exports of the crate's public surface.

pub use crate::aggregation::{AggregationMethod, AggregationState};
pub use crate::apply_pixel::ApplyPixelCube;
pub use crate::backend::{BandRequest, MemoryBackend, RasterBackend, WarpTarget, WarpedRaster};
#[cfg(feature = "gdal")]
pub use crate::backend::GdalBackend;
pub use crate::band::Band;
pub use crate::cache::ChunkCache;
pub use crate::chunkbuf::ChunkBuffer;
pub use crate::collection::{BandInfo, ImageCollection, ImageRecord, VecImageCollection};
pub use crate::cube::{wire, Cube, CubeBase};
pub use crate::datetime::{DateTime, Duration, TimeUnit};
pub use crate::error::{Error, Result};
pub use crate::factory::{create_from_json, FactoryContext};
pub use crate::fill_time::{FillMethod, FillTimeCube};
pub use crate::filter_predicate::FilterPredicateCube;
pub use crate::geometry::{Bounds, BoundsExt};
pub use crate::image_collection_cube::{ImageCollectionCube, View};
pub use crate::stref::{ChunkCoord, ChunkGeometry, STRef, STRefBuilder};
