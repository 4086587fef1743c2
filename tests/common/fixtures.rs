//! Block fixtures and on-disk segment generators

use std::io::{Read, Write};
use std::path::Path;

use block_fetch::{BlockId, BlockStream, BlocksByAddress, DirectoryResolver, ServerAddress};
use flate2::Compression;
use flate2::write::ZlibEncoder;

/// Server address `exec-<n>@host-<n>:7337`
pub fn server(n: u16) -> ServerAddress {
    ServerAddress::new(format!("host-{n}"), 7337, format!("exec-{n}"))
}

/// Deterministic, mildly compressible content for a block
pub fn block_content(block_id: &BlockId) -> Vec<u8> {
    format!("{block_id};").repeat(16).into_bytes()
}

/// Zlib-compress `data`
pub fn compress(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// `per_server[i]` shuffle blocks for server `i + 1`, each advertised with its compressed size
pub fn layout(shuffle_id: u32, per_server: &[u64]) -> BlocksByAddress {
    let mut next_map = 0u64;
    per_server
        .iter()
        .enumerate()
        .map(|(i, &count)| {
            let blocks = (next_map..next_map + count)
                .map(|m| {
                    let id = BlockId::shuffle(shuffle_id, m, 0);
                    let size = compress(&block_content(&id)).len() as i64;
                    (id, size)
                })
                .collect();
            next_map += count;
            (server(i as u16 + 1), blocks)
        })
        .collect()
}

/// Write every block of `input` as a compressed segment file under `root`
pub fn write_segments(root: &Path, input: &BlocksByAddress) -> DirectoryResolver {
    let resolver = DirectoryResolver::new(root);
    for (_, blocks) in input {
        for (id, _) in blocks {
            std::fs::write(resolver.segment_path(id), compress(&block_content(id))).unwrap();
        }
    }
    resolver
}

/// Read a delivered stream to the end
pub fn read_all(mut stream: BlockStream) -> Vec<u8> {
    let mut out = Vec::new();
    stream.read_to_end(&mut out).unwrap();
    out
}

/// Total number of blocks listed in `input`
pub fn block_count(input: &BlocksByAddress) -> usize {
    input.iter().map(|(_, blocks)| blocks.len()).sum()
}
