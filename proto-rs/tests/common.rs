use strapre_proto::*;
use url::Url;

// Sample records covering the default application shell
pub fn sample_records() -> Vec<CacheRecord> {
    let origin = Url::parse("https://strapre.example").unwrap();
    vec![
        record(
            &origin,
            "/",
            StoredResponse::new(
                200,
                vec![
                    ("content-type".to_string(), "text/html; charset=utf-8".to_string()),
                    ("vary".to_string(), "Accept-Encoding".to_string()),
                ],
                b"<!doctype html><title>Strapre</title>".to_vec(),
            ),
            &[("accept-encoding".to_string(), "gzip".to_string())],
        ),
        record(
            &origin,
            "/manifest.json",
            StoredResponse::new(
                200,
                vec![("content-type".to_string(), "application/manifest+json".to_string())],
                br#"{"name":"Strapre","start_url":"/"}"#.to_vec(),
            ),
            &[],
        ),
        record(
            &origin,
            "/android/android-launchericon-192-192.png",
            StoredResponse::new(
                200,
                vec![("content-type".to_string(), "image/png".to_string())],
                vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a],
            ),
            &[],
        ),
    ]
}

fn record(origin: &Url, path: &str, response: StoredResponse, headers: &[(String, String)]) -> CacheRecord {
    let mut record = CacheRecord::new(RequestKey::get(&origin.join(path).unwrap()), headers, response);
    // Fixed timestamp so records compare equal across runs
    record.stored_at = 1_722_550_000_000;
    record.body_sha256 = format!("{:064x}", path.len());
    record
}
