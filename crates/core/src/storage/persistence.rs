//! Binary persistence for HNSW indexes.
//!
//! The stream is a direct structural dump: header, then one record per point
//! in internal-id order carrying the label, top layer, stored vector and every
//! adjacency list. Loading rebuilds the exact topology without re-running
//! insertion. All integers are little-endian.
//!
//! ```text
//! "HNSW" | version u32 | dimension u32 | space u8 | m u32 | ef_construction u32
//! max_elements u32 | count u32 | entry_point u32
//! count × { label u32 | top_layer u32 | dimension × f32
//!           (top_layer + 1) × { n u32 | n × neighbor u32 } }
//! "HCR1" | crc32 u32
//! ```
//!
//! The CRC covers every byte before the footer. File writes use atomic
//! temp-file + rename.

use crate::config;
use crate::error::{HnswError, Result};
use crate::hnsw::{HnswConfig, HnswGraph, SpaceType};
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

/// magic + version + dimension + space + m + ef_construction + max_elements + count + entry.
const HEADER_LEN: usize = 4 + 4 + 4 + 1 + 4 + 4 + 4 + 4 + 4;
const FOOTER_LEN: usize = 8;

/// Serializes `graph` into a byte buffer.
///
/// Callers must keep inserts out while this runs; a point that is still being
/// linked makes the snapshot fail rather than capture a partial node.
pub fn encode(graph: &HnswGraph) -> Result<Vec<u8>> {
    let count = graph.len();
    let dimension = graph.dimension();
    let cfg = &graph.config;
    let per_point = 8 + dimension * 4 + 4 * (cfg.m_max(0) + 1);
    let mut out = Vec::with_capacity(HEADER_LEN + count * per_point + FOOTER_LEN);

    out.extend_from_slice(config::INDEX_MAGIC);
    put_u32(&mut out, config::INDEX_FORMAT_VERSION);
    put_u32(&mut out, dimension as u32);
    out.push(cfg.space.to_code());
    put_u32(&mut out, cfg.m as u32);
    put_u32(&mut out, cfg.ef_construction as u32);
    put_u32(&mut out, cfg.max_elements as u32);
    put_u32(&mut out, count as u32);
    let entry = graph.entry_point();
    put_u32(&mut out, entry.id.unwrap_or(config::NO_ENTRY_POINT));

    for id in 0..count as u32 {
        let point = graph.store.get(id).ok_or_else(|| {
            HnswError::InvalidArgument(format!("point {id} is still being inserted"))
        })?;
        let links = graph.layers.node(id).read();
        let Some(top_layer) = links.len().checked_sub(1) else {
            return Err(HnswError::InvalidArgument(format!(
                "point {id} is still being inserted"
            )));
        };
        put_u32(&mut out, point.label);
        put_u32(&mut out, top_layer as u32);
        for &x in point.vector.iter() {
            out.extend_from_slice(&x.to_le_bytes());
        }
        for list in links.iter() {
            put_u32(&mut out, list.len() as u32);
            for &n in list {
                put_u32(&mut out, n);
            }
        }
    }

    let crc = crc32fast::hash(&out);
    out.extend_from_slice(config::INDEX_CRC_MAGIC);
    put_u32(&mut out, crc);
    Ok(out)
}

/// Writes the serialized index to `writer`.
pub fn write_index<W: Write>(graph: &HnswGraph, mut writer: W) -> Result<()> {
    let bytes = encode(graph)?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

/// Saves the index to `path` atomically (temp file, then rename).
pub fn save_index(graph: &HnswGraph, path: &Path) -> Result<()> {
    let bytes = encode(graph)?;
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = Path::new(&tmp_name);

    fs::write(tmp_path, &bytes)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(tmp_path, fs::Permissions::from_mode(0o600))?;
    }
    fs::rename(tmp_path, path)?;

    tracing::info!(
        path = %path.display(),
        points = graph.len(),
        bytes = bytes.len(),
        "saved hnsw index"
    );
    Ok(())
}

/// Rebuilds an index from a serialized buffer.
///
/// `dimension` and `space` are what the caller expects; a stream built with
/// anything else is rejected with [`HnswError::DimensionMismatch`] or
/// [`HnswError::SpaceMismatch`]. `ef_search` and the random seed come back at
/// their defaults.
pub fn decode(bytes: &[u8], dimension: usize, space: SpaceType) -> Result<HnswGraph> {
    let payload = verify_footer(bytes)?;
    let mut r = ByteReader::new(payload);

    if r.take(4)? != config::INDEX_MAGIC {
        return Err(HnswError::corrupt("bad magic"));
    }
    let version = r.u32()?;
    if version != config::INDEX_FORMAT_VERSION {
        return Err(HnswError::corrupt(format!(
            "unsupported format version {version}"
        )));
    }

    let stored_dimension = r.u32()? as usize;
    if stored_dimension != dimension {
        return Err(HnswError::DimensionMismatch {
            expected: dimension,
            actual: stored_dimension,
        });
    }
    let code = r.u8()?;
    let stored_space = SpaceType::from_code(code)
        .ok_or_else(|| HnswError::corrupt(format!("unknown space code {code}")))?;
    if stored_space != space {
        return Err(HnswError::SpaceMismatch {
            expected: space,
            actual: stored_space,
        });
    }

    let m = r.u32()? as usize;
    let ef_construction = r.u32()? as usize;
    let max_elements = r.u32()? as usize;
    let count = r.u32()? as usize;
    let entry = r.u32()?;

    let cfg = HnswConfig::new(dimension, max_elements, space)
        .with_m(m)
        .with_ef_construction(ef_construction);
    cfg.validate()
        .map_err(|e| HnswError::corrupt(format!("invalid header: {e}")))?;
    if count > max_elements {
        return Err(HnswError::corrupt(format!(
            "count {count} exceeds max_elements {max_elements}"
        )));
    }
    // label + top_layer + vector + one layer-0 length
    let min_record = 4 + 4 + dimension * 4 + 4;
    if count
        .checked_mul(min_record)
        .map_or(true, |need| need > r.remaining())
    {
        return Err(HnswError::corrupt(format!(
            "{count} points cannot fit in {} bytes",
            r.remaining()
        )));
    }

    let mut labels = Vec::with_capacity(count);
    let mut vectors = Vec::with_capacity(count);
    let mut links: Vec<Vec<Vec<u32>>> = Vec::with_capacity(count);
    for id in 0..count {
        labels.push(r.u32()?);
        let top_layer = r.u32()? as usize;
        if top_layer >= config::HNSW_MAX_LAYERS {
            return Err(HnswError::corrupt(format!(
                "point {id} has top layer {top_layer}"
            )));
        }
        vectors.push(r.f32s(dimension)?);

        let mut layers = Vec::with_capacity(top_layer + 1);
        for layer in 0..=top_layer {
            let n = r.u32()? as usize;
            if n > cfg.m_max(layer) {
                return Err(HnswError::corrupt(format!(
                    "point {id} has {n} neighbors on layer {layer}"
                )));
            }
            let mut list = Vec::with_capacity(n);
            for _ in 0..n {
                let nb = r.u32()?;
                if nb as usize >= count || nb as usize == id {
                    return Err(HnswError::corrupt(format!(
                        "point {id} links to invalid neighbor {nb} on layer {layer}"
                    )));
                }
                list.push(nb);
            }
            layers.push(list);
        }
        links.push(layers);
    }
    if r.remaining() != 0 {
        return Err(HnswError::corrupt(format!(
            "{} trailing bytes",
            r.remaining()
        )));
    }

    for (id, layers) in links.iter().enumerate() {
        for (layer, list) in layers.iter().enumerate() {
            if let Some(&nb) = list.iter().find(|&&nb| links[nb as usize].len() <= layer) {
                return Err(HnswError::corrupt(format!(
                    "point {id} links to {nb} on layer {layer} above its top layer"
                )));
            }
        }
    }

    let max_layer = links.iter().map(|l| l.len() - 1).max();
    let entry_level = match (entry, max_layer) {
        (config::NO_ENTRY_POINT, None) => None,
        (e, Some(max)) if (e as usize) < count && links[e as usize].len() - 1 == max => Some(max),
        _ => {
            return Err(HnswError::corrupt(format!(
                "invalid entry point {entry} for {count} points"
            )))
        }
    };

    let graph = HnswGraph::new(cfg)?;
    for (id, ((label, vector), layers)) in labels.into_iter().zip(vectors).zip(links).enumerate() {
        let reserved = graph.store.reserve()?;
        debug_assert_eq!(reserved as usize, id);
        graph.layers.init_node(reserved, layers.len() - 1);
        graph.store.publish(reserved, label, vector);
        *graph.layers.node(reserved).write() = layers;
    }
    if let Some(level) = entry_level {
        graph.layers.promote_entry(entry, level);
    }

    tracing::debug!(points = count, dimension, space = %space, "decoded hnsw index");
    Ok(graph)
}

/// Reads the whole stream and rebuilds the index. See [`decode`].
pub fn read_index<R: Read>(mut reader: R, dimension: usize, space: SpaceType) -> Result<HnswGraph> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    decode(&bytes, dimension, space)
        .inspect_err(|e| tracing::warn!(error = %e, "rejected hnsw stream"))
}

/// Loads an index saved by [`save_index`].
pub fn load_index(path: &Path, dimension: usize, space: SpaceType) -> Result<HnswGraph> {
    let bytes = fs::read(path)?;
    let graph = decode(&bytes, dimension, space).inspect_err(|e| {
        tracing::warn!(path = %path.display(), error = %e, "rejected hnsw index file")
    })?;
    tracing::info!(
        path = %path.display(),
        points = graph.len(),
        "loaded hnsw index"
    );
    Ok(graph)
}

/// Checks the `[magic][crc32]` footer and returns the payload it covers.
fn verify_footer(bytes: &[u8]) -> Result<&[u8]> {
    if bytes.len() < HEADER_LEN + FOOTER_LEN {
        return Err(HnswError::corrupt(format!(
            "stream too short ({} bytes)",
            bytes.len()
        )));
    }
    let (payload, footer) = bytes.split_at(bytes.len() - FOOTER_LEN);
    if &footer[..4] != config::INDEX_CRC_MAGIC {
        return Err(HnswError::corrupt("missing checksum footer"));
    }
    let stored = u32::from_le_bytes([footer[4], footer[5], footer[6], footer[7]]);
    let computed = crc32fast::hash(payload);
    if stored != computed {
        return Err(HnswError::corrupt(format!(
            "CRC32 mismatch: stored {stored:#010x}, computed {computed:#010x}"
        )));
    }
    Ok(payload)
}

#[inline]
fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// Bounds-checked little-endian cursor.
struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(HnswError::corrupt(format!(
                "truncated at offset {} (need {n} bytes, have {})",
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f32s(&mut self, n: usize) -> Result<Vec<f32>> {
        let bytes = self.take(n * 4)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }
}
