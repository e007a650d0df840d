use clap::Arg;
use gdalcube::collection::VecImageCollection;
use gdalcube::factory::FactoryContext;
use gdalcube_server::server::ServerState;
use gdalcube_server::{args_parser, http, opt};
use std::path::PathBuf;
use std::sync::Arc;
use tiny_http::Server;

#[cfg(feature = "gdal")]
fn build_backend() -> Arc<dyn gdalcube::backend::RasterBackend> {
    Arc::new(gdalcube::backend::GdalBackend::new())
}

#[cfg(not(feature = "gdal"))]
fn build_backend() -> Arc<dyn gdalcube::backend::RasterBackend> {
    Arc::new(gdalcube::backend::MemoryBackend::new())
}

gdalcube_server::sync_main!(run());

fn run() -> gdalcube::Result<()> {
    env_logger::init();

    let matches = args_parser!("gdalcubesd")
        .about("HTTP compute server for gdalcube data cubes")
        .arg(
            opt!("basepath")
                .short("b")
                .help("base path the HTTP resource tree is mounted under")
                .default_value("/gdalcubes/api"),
        )
        .arg(
            opt!("port")
                .short("p")
                .help("TCP port to listen on")
                .default_value("1111"),
        )
        // built by hand rather than via opt!: that macro kebab-cases
        // the flag name, which would yield --worker-threads instead
        // of the literal --worker_threads
        .arg(
            Arg::with_name("worker_threads")
                .short("t")
                .long("worker_threads")
                .value_name("WORKER_THREADS")
                .help("maximum number of concurrent chunk-compute workers")
                .default_value("1"),
        )
        .arg(opt!("dir").short("D").help("working directory for uploaded files"))
        .arg(
            Arg::with_name("ssl")
                .long("ssl")
                .takes_value(false)
                .help("reserved; SSL is not implemented and this flag is rejected if set"),
        )
        .get_matches();

    if matches.is_present("ssl") {
        return Err(gdalcube::Error::InvalidConfiguration(
            "--ssl is reserved; SSL is not implemented".to_string(),
        ));
    }

    let base_path = matches.value_of("basepath").unwrap().to_string();
    let port: u16 = matches
        .value_of("port")
        .unwrap()
        .parse()
        .map_err(|_| gdalcube::Error::InvalidConfiguration("bad --port".to_string()))?;
    let worker_threads: u32 = matches
        .value_of("worker_threads")
        .unwrap()
        .parse()
        .map_err(|_| gdalcube::Error::InvalidConfiguration("bad --worker_threads".to_string()))?;
    let workdir: PathBuf = match matches.value_of("dir") {
        Some(d) => PathBuf::from(d),
        None => std::env::temp_dir().join("gdalcubes"),
    };
    http::upload_dir(&workdir)?;

    // The raster backend owns process-global GDAL driver state; it
    // must be constructed once at startup and live for the process
    // lifetime (spec.md's §5 init/teardown requirement). There is no
    // catalog/database format specified for sourcing image
    // collections (spec.md's Open Questions leave the filter/query
    // helpers unspecified), so the server starts with an empty
    // collection; `image_collection` cubes built against it simply
    // have no records until a future catalog format is specified.
    let backend = build_backend();
    let collection = Arc::new(VecImageCollection::new(vec![], vec![]));
    let factory_ctx = FactoryContext { collection, backend };

    let state = ServerState::new(worker_threads, 1 << 30, workdir, base_path, factory_ctx);

    let address = format!("0.0.0.0:{port}");
    let server = Server::http(&address)
        .map_err(|e| gdalcube::Error::Io(format!("cannot bind {address}: {e}")))?;
    log::info!("gdalcubesd listening on {address}");

    for request in server.incoming_requests() {
        let state = state.clone();
        std::thread::spawn(move || http::handle(&state, request));
    }

    Ok(())
}
