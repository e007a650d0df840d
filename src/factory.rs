//! The cube factory: materializes a DAG from a JSON description.

use crate::apply_pixel::ApplyPixelCube;
use crate::backend::RasterBackend;
use crate::collection::ImageCollection;
use crate::cube::Cube;
use crate::datetime::{DateTime, Duration, TimeUnit};
use crate::error::{Error, Result};
use crate::fill_time::FillTimeCube;
use crate::filter_predicate::FilterPredicateCube;
use crate::image_collection_cube::{ImageCollectionCube, View};
use crate::stref::STRef;
use chrono::NaiveDateTime;
use serde_json::Value;
use std::sync::Arc;

/// Shared context every `image_collection` leaf dispatch needs.
/// Operators above the leaf never reference the collection/backend
/// directly, so this is only consulted at the one tag that does.
#[derive(Clone)]
pub struct FactoryContext {
    pub collection: Arc<dyn ImageCollection>,
    pub backend: Arc<dyn RasterBackend>,
}

/// Recursively constructs a cube from its JSON description,
/// dispatching on the `cube_type` tag. Children are built before
/// parents and wired via each operator's own `create`.
pub fn create_from_json(json: &Value, ctx: &FactoryContext) -> Result<Arc<dyn Cube>> {
    let cube_type = json
        .get("cube_type")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidConfiguration("cube descriptor missing cube_type".to_string()))?;

    match cube_type {
        "image_collection" => {
            let view = json.get("view").cloned().unwrap_or(Value::Null);
            let st_ref = parse_st_ref(json.get("st_ref").unwrap_or(&Value::Null))?;
            let chunk_size = parse_chunk_size(json)?;
            let aggregation = view
                .get("aggregation")
                .and_then(Value::as_str)
                .map(crate::aggregation::AggregationMethod::parse)
                .transpose()?
                .unwrap_or(crate::aggregation::AggregationMethod::First);
            let resampling = view
                .get("resampling")
                .and_then(Value::as_str)
                .unwrap_or("near")
                .to_string();
            let num_threads = view.get("num_threads").and_then(Value::as_u64).unwrap_or(1) as u32;

            let cube = ImageCollectionCube::create(
                ctx.collection.clone(),
                ctx.backend.clone(),
                st_ref,
                chunk_size,
                View { aggregation, resampling, num_threads },
            )?;
            Ok(cube as Arc<dyn Cube>)
        }
        "apply_pixel" => {
            let in_cube = create_from_json(require_field(json, "in_cube")?, ctx)?;
            let expr = json
                .get("expr")
                .and_then(Value::as_array)
                .ok_or_else(|| Error::InvalidConfiguration("apply_pixel missing expr".to_string()))?
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect::<Option<Vec<String>>>()
                .ok_or_else(|| Error::InvalidConfiguration("apply_pixel expr must be strings".to_string()))?;
            let band_names = json.get("band_names").and_then(Value::as_array).map(|arr| {
                arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect::<Vec<_>>()
            });
            Ok(ApplyPixelCube::create(in_cube, expr, band_names)? as Arc<dyn Cube>)
        }
        "filter_predicate" => {
            let in_cube = create_from_json(require_field(json, "in_cube")?, ctx)?;
            let predicate = json
                .get("predicate")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::InvalidConfiguration("filter_predicate missing predicate".to_string()))?
                .to_string();
            Ok(FilterPredicateCube::create(in_cube, predicate)? as Arc<dyn Cube>)
        }
        "fill_time" => {
            let in_cube = create_from_json(require_field(json, "in_cube")?, ctx)?;
            let method = json.get("method").and_then(Value::as_str).unwrap_or("near");
            Ok(FillTimeCube::create(in_cube, method)? as Arc<dyn Cube>)
        }
        other => Err(Error::InvalidConfiguration(format!("unknown cube_type '{other}'"))),
    }
}

fn require_field<'a>(json: &'a Value, field: &str) -> Result<&'a Value> {
    json.get(field)
        .ok_or_else(|| Error::InvalidConfiguration(format!("cube descriptor missing '{field}'")))
}

fn parse_chunk_size(json: &Value) -> Result<(u32, u32, u32)> {
    let arr = json
        .get("chunk_size")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::InvalidConfiguration("image_collection missing chunk_size".to_string()))?;
    if arr.len() != 3 {
        return Err(Error::InvalidConfiguration("chunk_size must have 3 entries".to_string()));
    }
    let get = |i: usize| arr[i].as_u64().map(|v| v as u32);
    Ok((
        get(0).ok_or_else(|| Error::InvalidConfiguration("bad chunk_size".to_string()))?,
        get(1).ok_or_else(|| Error::InvalidConfiguration("bad chunk_size".to_string()))?,
        get(2).ok_or_else(|| Error::InvalidConfiguration("bad chunk_size".to_string()))?,
    ))
}

fn parse_st_ref(json: &Value) -> Result<STRef> {
    let num = |field: &str| -> Result<f64> {
        json.get(field)
            .and_then(Value::as_f64)
            .ok_or_else(|| Error::InvalidConfiguration(format!("st_ref missing '{field}'")))
    };
    let uint = |field: &str| -> Result<u32> {
        json.get(field)
            .and_then(Value::as_u64)
            .map(|v| v as u32)
            .ok_or_else(|| Error::InvalidConfiguration(format!("st_ref missing '{field}'")))
    };
    let str_field = |field: &str| -> Result<String> {
        json.get(field)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::InvalidConfiguration(format!("st_ref missing '{field}'")))
    };
    let parse_dt = |field: &str| -> Result<DateTime> {
        let s = str_field(field)?;
        let naive = NaiveDateTime::parse_from_str(&s, "%Y-%m-%dT%H:%M:%S")
            .map_err(|e| Error::InvalidConfiguration(format!("bad datetime '{s}': {e}")))?;
        Ok(DateTime::from_naive(naive))
    };

    let dt_unit_str = str_field("dt_unit")?;
    let dt_unit = TimeUnit::parse(&dt_unit_str)
        .ok_or_else(|| Error::InvalidConfiguration(format!("unknown time unit '{dt_unit_str}'")))?;
    let dt_amount = json.get("dt_amount").and_then(Value::as_i64).unwrap_or(1);

    STRef::builder()
        .with_window(num("left")?, num("bottom")?, num("right")?, num("top")?)
        .with_srs(str_field("srs")?)
        .with_extent(uint("nx")?, uint("ny")?, uint("nt")?)
        .with_time(parse_dt("t0")?, parse_dt("t1")?, Duration::new(dt_unit, dt_amount))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::collection::{BandInfo, VecImageCollection};

    fn ctx() -> FactoryContext {
        let collection = Arc::new(VecImageCollection::new(
            vec![BandInfo { name: "b1".into(), unit: String::new(), nodata: None, element_type: "float64".into(), scale: 1.0, offset: 0.0 }],
            vec![],
        ));
        FactoryContext { collection, backend: Arc::new(MemoryBackend::new()) }
    }

    fn image_collection_json() -> Value {
        serde_json::json!({
            "cube_type": "image_collection",
            "chunk_size": [1, 2, 2],
            "st_ref": {
                "left": 0.0, "bottom": 0.0, "right": 2.0, "top": 2.0,
                "srs": "EPSG:4326",
                "nx": 2, "ny": 2, "nt": 1,
                "t0": "2020-01-01T00:00:00", "t1": "2020-01-02T00:00:00",
                "dt_unit": "day", "dt_amount": 1
            },
            "view": { "aggregation": "first", "resampling": "near", "num_threads": 1 }
        })
    }

    #[test]
    fn unknown_tag_fails() {
        let json = serde_json::json!({"cube_type": "nonsense"});
        assert!(create_from_json(&json, &ctx()).is_err());
    }

    #[test]
    fn builds_image_collection_leaf() {
        let cube = create_from_json(&image_collection_json(), &ctx()).unwrap();
        assert_eq!(cube.count_chunks(), 1);
    }

    #[test]
    fn wraps_leaf_with_fill_time() {
        let json = serde_json::json!({
            "cube_type": "fill_time",
            "method": "locf",
            "in_cube": image_collection_json(),
        });
        let cube = create_from_json(&json, &ctx()).unwrap();
        let rendered = cube.make_constructible_json();
        assert_eq!(rendered["cube_type"], "fill_time");
        assert_eq!(rendered["method"], "locf");
    }
}
