//! Dump the contents of a cache generation file
//!
//! Usage: swcg-inspect <file.swc>

use std::fs::File;
use std::process::ExitCode;
use strapre_proto::RecordReader;

fn main() -> ExitCode {
    let Some(path) = std::env::args().nth(1) else {
        eprintln!("usage: swcg-inspect <file.swc>");
        return ExitCode::from(2);
    };

    let file = match File::open(&path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("{}: {}", path, e);
            return ExitCode::FAILURE;
        }
    };

    let mut reader = RecordReader::new(file);
    let header = match reader.read_header() {
        Ok(header) => header,
        Err(e) => {
            eprintln!("{}: {}", path, e);
            return ExitCode::FAILURE;
        }
    };
    println!("SWCG v{} created_at={}", header.version, header.created_at);

    let mut count = 0usize;
    loop {
        match reader.read_record() {
            Ok(Some(record)) => {
                count += 1;
                println!(
                    "{:>4} {} {} -> {} ({} bytes, sha256={})",
                    count,
                    record.key.method,
                    record.key.url,
                    record.response.status,
                    record.response.body.len(),
                    record.body_sha256.get(..16).unwrap_or(&record.body_sha256),
                );
            }
            Ok(None) => break,
            Err(e) => {
                eprintln!("error after {} records: {}", count, e);
                return ExitCode::FAILURE;
            }
        }
    }

    println!("{} records", count);
    ExitCode::SUCCESS
}
