//! Module archive fixtures

use flate2::Compression;
use flate2::write::GzEncoder;
use std::io::Write;

/// Files of a small but realistic module
pub const MODULE_FILES: &[(&str, &[u8])] = &[
    ("saved_model.pb", b"\x08\x01\x12\x04graph"),
    ("tfhub_module.pb", b"\x08\x03"),
    ("variables/variables.index", b"index"),
    ("variables/variables.data-00000-of-00001", &[7u8; 4096]),
];

/// Build an uncompressed tar archive holding `files`
pub fn tar_archive(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, name, *data)
            .expect("append tar entry");
    }
    builder.into_inner().expect("finish tar archive")
}

/// Build a gzip-compressed tar archive holding `files`
pub fn tgz_archive(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&tar_archive(files))
        .expect("compress tar archive");
    encoder.finish().expect("finish gzip stream")
}

/// A gzip-compressed tar archive whose only entry is named `name`
///
/// Writes the raw header name so paths the builder refuses (`../x`) can be
/// produced.
pub fn tgz_with_raw_entry(name: &[u8], kind: tar::EntryType, data: &[u8]) -> Vec<u8> {
    let mut header = tar::Header::new_old();
    header.as_old_mut().name[..name.len()].copy_from_slice(name);
    header.set_entry_type(kind);
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();

    let mut builder = tar::Builder::new(Vec::new());
    builder.append(&header, data).expect("append raw entry");
    let tar = builder.into_inner().expect("finish tar archive");

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar).expect("compress tar archive");
    encoder.finish().expect("finish gzip stream")
}

/// An uncompressed tar archive of `count` small files, slow enough to unpack
/// that a caller can give up halfway through
pub fn many_files_tar(count: usize) -> Vec<u8> {
    let data = [5u8; 16];
    let mut builder = tar::Builder::new(Vec::new());
    for i in 0..count {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, format!("variables/shard-{i:06}.bin"), &data[..])
            .expect("append tar entry");
    }
    builder.into_inner().expect("finish tar archive")
}
