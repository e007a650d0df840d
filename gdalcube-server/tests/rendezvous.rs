//! End-to-end check of the download rendezvous (spec.md §8 scenario
//! 6): `POST .../start` followed immediately by `GET .../download`
//! blocks until the worker finishes, then serves the chunk header.

use gdalcube::backend::MemoryBackend;
use gdalcube::collection::{BandInfo, ImageRecord, VecImageCollection};
use gdalcube::factory::FactoryContext;
use gdalcube_server::http;
use gdalcube_server::server::ServerState;
use std::collections::HashMap;
use std::convert::TryInto;
use std::sync::Arc;
use std::time::Duration;
use tiny_http::Server;

fn start_server() -> (String, std::thread::JoinHandle<()>) {
    let band = BandInfo {
        name: "b1".into(),
        unit: String::new(),
        nodata: None,
        element_type: "float64".into(),
        scale: 1.0,
        offset: 0.0,
    };
    let record = ImageRecord {
        descriptor: "a.tif".into(),
        band_name: "b1".into(),
        band_num: 1,
        datetime: gdalcube::datetime::DateTime::from_naive(
            chrono::NaiveDate::from_ymd_opt(2020, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap(),
        ),
        bounds: gdalcube::geometry::Bounds::new((0.0, 0.0), (1.0, 1.0)),
        srs: "EPSG:4326".into(),
    };
    let collection = Arc::new(VecImageCollection::new(vec![band], vec![record]));
    let backend = Arc::new(MemoryBackend::new());
    let mut pixels = HashMap::new();
    pixels.insert(1u32, vec![7.0]);
    backend.set_raster("a.tif", 1, 1, pixels);

    let factory_ctx = FactoryContext { collection, backend };
    let workdir = std::env::temp_dir().join("gdalcubes-rendezvous-test");
    std::fs::create_dir_all(&workdir).unwrap();
    let state = ServerState::new(2, 1 << 30, workdir, "/gdalcubes/api".to_string(), factory_ctx);

    let server = Server::http("127.0.0.1:0").unwrap();
    let addr = server.server_addr().to_string();

    let handle = std::thread::spawn(move || {
        for request in server.incoming_requests() {
            let state = state.clone();
            std::thread::spawn(move || http::handle(&state, request));
        }
    });

    (format!("http://{addr}/gdalcubes/api"), handle)
}

#[test]
fn start_then_download_rendezvous() {
    let (base, _handle) = start_server();
    let agent = ureq::AgentBuilder::new().timeout(Duration::from_secs(5)).build();

    let cube_json = serde_json::json!({
        "cube_type": "image_collection",
        "chunk_size": [1, 1, 1],
        "st_ref": {
            "left": 0.0, "bottom": 0.0, "right": 1.0, "top": 1.0,
            "srs": "EPSG:4326",
            "nx": 1, "ny": 1, "nt": 1,
            "t0": "2020-01-01T00:00:00", "t1": "2020-01-02T00:00:00",
            "dt_unit": "day", "dt_amount": 1
        },
        "view": { "aggregation": "first", "resampling": "near", "num_threads": 1 }
    });

    let cube_id: u32 = agent
        .post(&format!("{base}/cube"))
        .send_string(&cube_json.to_string())
        .unwrap()
        .into_string()
        .unwrap()
        .parse()
        .unwrap();

    let status_before = agent
        .get(&format!("{base}/cube/{cube_id}/0/status"))
        .call()
        .unwrap()
        .into_string()
        .unwrap();
    assert_eq!(status_before, "notrequested");

    agent.post(&format!("{base}/cube/{cube_id}/0/start")).call().unwrap();

    let response = agent.get(&format!("{base}/cube/{cube_id}/0/download")).call().unwrap();
    let mut body = Vec::new();
    std::io::Read::read_to_end(&mut response.into_reader(), &mut body).unwrap();

    assert_eq!(body.len(), 16 + 8);
    let b = u32::from_le_bytes(body[0..4].try_into().unwrap());
    let t = u32::from_le_bytes(body[4..8].try_into().unwrap());
    let y = u32::from_le_bytes(body[8..12].try_into().unwrap());
    let x = u32::from_le_bytes(body[12..16].try_into().unwrap());
    assert_eq!((b, t, y, x), (1, 1, 1, 1));
    let value = f64::from_le_bytes(body[16..24].try_into().unwrap());
    assert_eq!(value, 7.0);

    let status_after = agent
        .get(&format!("{base}/cube/{cube_id}/0/status"))
        .call()
        .unwrap()
        .into_string()
        .unwrap();
    assert_eq!(status_after, "finished");
}
