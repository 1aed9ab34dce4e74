//! Synthetic feeds shared by the unit tests.
use std::{
    collections::BTreeMap,
    io::{Cursor, Write},
    path::PathBuf,
};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
};
use zip::{ZipWriter, write::FileOptions};

/// One metro line, id M1, blue, four points.
pub const SAMPLE_METRO_KML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2">
  <Document>
    <name>Metro Lines</name>
    <Placemark id="M1">
      <name>Blue Line</name>
      <Style><LineStyle><color>ffff0000</color><width>5</width></LineStyle></Style>
      <LineString>
        <coordinates>73.01,33.61,0 73.02,33.62 73.03,33.63 73.04,33.64</coordinates>
      </LineString>
    </Placemark>
  </Document>
</kml>
"#;

/// Route A is red with a three point shape, route B has no color and a two point shape.
pub fn sample_feed_files() -> BTreeMap<&'static str, String> {
    BTreeMap::from([
        (
            "routes.txt",
            "route_id,agency_id,route_short_name,route_long_name,route_type,route_color\n\
             A,ag,A,Airport Road,3,FF0000\n\
             B,ag,B,,3,\n"
                .to_string(),
        ),
        (
            "trips.txt",
            "route_id,service_id,trip_id,shape_id\n\
             A,wk,t1,shA\n\
             A,wk,t2,shA\n\
             B,wk,t3,shB\n"
                .to_string(),
        ),
        (
            "shapes.txt",
            "shape_id,shape_pt_lat,shape_pt_lon,shape_pt_sequence\n\
             shA,33.1,73.1,1\n\
             shA,33.2,73.2,2\n\
             shA,33.3,73.3,3\n\
             shB,33.5,73.5,1\n\
             shB,33.6,73.6,2\n"
                .to_string(),
        ),
        (
            "stops.txt",
            "stop_id,stop_name,stop_lat,stop_lon\n\
             s1,Central,33.1,73.1\n\
             s2,Market,33.5,73.5\n"
                .to_string(),
        ),
    ])
}

pub fn gtfs_zip(files: &BTreeMap<&'static str, String>) -> Vec<u8> {
    zip_entries(&files.iter().collect::<Vec<_>>())
}

pub fn zip_entries<N: AsRef<str>, B: AsRef<str>>(entries: &[(N, B)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, body) in entries {
        let name: &str = name.as_ref();
        let body: &str = body.as_ref();
        writer.start_file(name, FileOptions::default()).unwrap();
        writer.write_all(body.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// A fresh, empty directory unique to the test and the process.
pub fn scratch_dir(test: &str) -> PathBuf {
    let dir = std::env::temp_dir()
        .join("transit_kmz-tests")
        .join(format!("{test}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Serves every request on 127.0.0.1 with an empty body and `status_line`,
/// e.g. `"401 Unauthorized"`. Returns a URL pointing at the server.
pub async fn serve_status(status_line: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut request = vec![];
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => request.extend_from_slice(&buf[..n]),
                }
            }

            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
            );
            _ = socket.write_all(response.as_bytes()).await;
            _ = socket.shutdown().await;
        }
    });

    format!("http://{address}/metro.kmz")
}
