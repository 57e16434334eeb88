//! Metadata blob: the descriptor table handed from build time to run time
//!
//! Layout (all integers little-endian, offsets absolute from the blob start):
//!
//! ```text
//! header    "HWCP" | u32 version | u32 function count | u32 region count
//! functions u64 id | u32 counters off | u32 counter count | u32 source off | u32 qualified off
//! regions   u64 id | u32 counters off | u32 counter count | u32 file off | u32 start | u32 end | pad
//! pool      u32 counter codes, NUL-terminated UTF-8 strings
//! ```
//!
//! The reader validates every offset and never panics, whatever the input.

use crate::catalog::{DescriptorCatalog, FunctionDescriptor, RegionDescriptor};
use crate::counters::CounterRef;
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const MAGIC: &[u8; 4] = b"HWCP";
pub const VERSION: u32 = 1;

const HEADER_LEN: usize = 16;
const FUNCTION_RECORD_LEN: usize = 24;
const REGION_RECORD_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("metadata blob truncated: {0}")]
    Truncated(&'static str),

    #[error("not a metadata blob (bad magic)")]
    BadMagic,

    #[error("unsupported metadata version {0}")]
    UnsupportedVersion(u32),

    #[error("{what} at offset {offset} is out of range")]
    OutOfRange { what: &'static str, offset: usize },

    #[error("string at offset {0} is not NUL-terminated")]
    Unterminated(usize),

    #[error("string at offset {0} is not valid UTF-8")]
    InvalidUtf8(usize),

    #[error("string {0:?} contains a NUL byte")]
    InteriorNul(String),

    #[error("descriptor table does not fit in 32-bit offsets")]
    TooLarge,

    #[error("failed to access metadata blob {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, MetadataError>;

/// Function record as stored in the blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionRecord {
    pub id: u64,
    pub counters: Vec<CounterRef>,
    pub source_name: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub qualified_name: String,
}

impl From<&FunctionDescriptor> for FunctionRecord {
    fn from(desc: &FunctionDescriptor) -> Self {
        Self {
            id: desc.id,
            counters: desc.counters.clone(),
            source_name: desc.source_name.clone(),
            qualified_name: desc.qualified_name.clone(),
        }
    }
}

/// Region record as stored in the blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionRecord {
    pub id: u64,
    pub counters: Vec<CounterRef>,
    pub file: String,
    pub start_line: u32,
    pub end_line: u32,
}

impl From<&RegionDescriptor> for RegionRecord {
    fn from(desc: &RegionDescriptor) -> Self {
        Self {
            id: desc.id,
            counters: desc.counters.clone(),
            file: desc.file.clone(),
            start_line: desc.start_line,
            end_line: desc.end_line,
        }
    }
}

/// Decoded (or to-be-encoded) descriptor table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub functions: Vec<FunctionRecord>,
    pub regions: Vec<RegionRecord>,
}

impl Metadata {
    /// Snapshot every descriptor of a catalog, duplicates included
    pub fn from_catalog(catalog: &DescriptorCatalog) -> Self {
        Self {
            functions: catalog.functions().iter().map(FunctionRecord::from).collect(),
            regions: catalog.regions().iter().map(RegionRecord::from).collect(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let tables = self
            .functions
            .len()
            .checked_mul(FUNCTION_RECORD_LEN)
            .and_then(|f| {
                self.regions
                    .len()
                    .checked_mul(REGION_RECORD_LEN)
                    .and_then(|r| f.checked_add(r))
            })
            .and_then(|t| t.checked_add(HEADER_LEN))
            .ok_or(MetadataError::TooLarge)?;

        let mut pool = Pool::new(tables);
        let mut out = Vec::with_capacity(tables);
        out.extend_from_slice(MAGIC);
        put_u32(&mut out, VERSION);
        put_u32(&mut out, to_u32(self.functions.len())?);
        put_u32(&mut out, to_u32(self.regions.len())?);

        for function in &self.functions {
            out.extend_from_slice(&function.id.to_le_bytes());
            put_u32(&mut out, pool.counters(&function.counters)?);
            put_u32(&mut out, to_u32(function.counters.len())?);
            put_u32(&mut out, pool.string(&function.source_name)?);
            put_u32(&mut out, pool.string(&function.qualified_name)?);
        }

        for region in &self.regions {
            out.extend_from_slice(&region.id.to_le_bytes());
            put_u32(&mut out, pool.counters(&region.counters)?);
            put_u32(&mut out, to_u32(region.counters.len())?);
            put_u32(&mut out, pool.string(&region.file)?);
            put_u32(&mut out, region.start_line);
            put_u32(&mut out, region.end_line);
            put_u32(&mut out, 0);
        }

        out.extend_from_slice(&pool.bytes);
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = bytes
            .get(..HEADER_LEN)
            .ok_or(MetadataError::Truncated("header"))?;
        if &header[..4] != MAGIC {
            return Err(MetadataError::BadMagic);
        }
        let version = read_u32(bytes, 4)?;
        if version != VERSION {
            return Err(MetadataError::UnsupportedVersion(version));
        }
        let function_count = read_u32(bytes, 8)? as usize;
        let region_count = read_u32(bytes, 12)? as usize;

        let regions_at = function_count
            .checked_mul(FUNCTION_RECORD_LEN)
            .and_then(|len| len.checked_add(HEADER_LEN))
            .ok_or(MetadataError::Truncated("function table"))?;
        let tables_end = region_count
            .checked_mul(REGION_RECORD_LEN)
            .and_then(|len| len.checked_add(regions_at))
            .ok_or(MetadataError::Truncated("region table"))?;
        if tables_end > bytes.len() {
            return Err(MetadataError::Truncated("descriptor tables"));
        }

        let mut functions = Vec::with_capacity(function_count);
        for index in 0..function_count {
            let at = HEADER_LEN + index * FUNCTION_RECORD_LEN;
            functions.push(FunctionRecord {
                id: read_u64(bytes, at)?,
                counters: read_counters(
                    bytes,
                    read_u32(bytes, at + 8)?,
                    read_u32(bytes, at + 12)?,
                )?,
                source_name: read_str(bytes, read_u32(bytes, at + 16)?)?,
                qualified_name: read_str(bytes, read_u32(bytes, at + 20)?)?,
            });
        }

        let mut regions = Vec::with_capacity(region_count);
        for index in 0..region_count {
            let at = regions_at + index * REGION_RECORD_LEN;
            regions.push(RegionRecord {
                id: read_u64(bytes, at)?,
                counters: read_counters(
                    bytes,
                    read_u32(bytes, at + 8)?,
                    read_u32(bytes, at + 12)?,
                )?,
                file: read_str(bytes, read_u32(bytes, at + 16)?)?,
                start_line: read_u32(bytes, at + 20)?,
                end_line: read_u32(bytes, at + 24)?,
            });
        }

        Ok(Self { functions, regions })
    }

    /// Encode and write the blob to `path`
    pub fn write_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let bytes = self.encode()?;
        std::fs::write(path, bytes).map_err(|source| MetadataError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(
            "wrote {} function and {} region records to {}",
            self.functions.len(),
            self.regions.len(),
            path.display()
        );
        Ok(())
    }

    /// Memory-map and decode the blob at `path`
    pub fn read_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let io_error = |source| MetadataError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(io_error)?;
        // SAFETY: read-only map, dropped before returning
        let mmap = unsafe { Mmap::map(&file) }.map_err(io_error)?;
        Self::decode(&mmap)
    }
}

/// Write a catalog's descriptor table as a blob file
pub fn write_blob<P: AsRef<Path>>(catalog: &DescriptorCatalog, path: P) -> Result<()> {
    Metadata::from_catalog(catalog).write_file(path)
}

struct Pool {
    base: usize,
    bytes: Vec<u8>,
}

impl Pool {
    fn new(base: usize) -> Self {
        Self {
            base,
            bytes: Vec::new(),
        }
    }

    fn offset(&self) -> Result<u32> {
        to_u32(self.base + self.bytes.len())
    }

    fn counters(&mut self, counters: &[CounterRef]) -> Result<u32> {
        let offset = self.offset()?;
        for counter in counters {
            put_u32(&mut self.bytes, counter.code());
        }
        Ok(offset)
    }

    fn string(&mut self, value: &str) -> Result<u32> {
        if value.as_bytes().contains(&0) {
            return Err(MetadataError::InteriorNul(value.to_string()));
        }
        let offset = self.offset()?;
        self.bytes.extend_from_slice(value.as_bytes());
        self.bytes.push(0);
        Ok(offset)
    }
}

fn to_u32(value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| MetadataError::TooLarge)
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn read_array<const N: usize>(bytes: &[u8], at: usize, what: &'static str) -> Result<[u8; N]> {
    at.checked_add(N)
        .and_then(|end| bytes.get(at..end))
        .and_then(|slice| slice.try_into().ok())
        .ok_or(MetadataError::OutOfRange { what, offset: at })
}

fn read_u32(bytes: &[u8], at: usize) -> Result<u32> {
    read_array::<4>(bytes, at, "u32").map(u32::from_le_bytes)
}

fn read_u64(bytes: &[u8], at: usize) -> Result<u64> {
    read_array::<8>(bytes, at, "u64").map(u64::from_le_bytes)
}

fn read_counters(bytes: &[u8], offset: u32, count: u32) -> Result<Vec<CounterRef>> {
    let offset = offset as usize;
    let end = (count as usize)
        .checked_mul(4)
        .and_then(|len| len.checked_add(offset))
        .filter(|end| *end <= bytes.len())
        .ok_or(MetadataError::OutOfRange {
            what: "counter array",
            offset,
        })?;
    Ok(bytes[offset..end]
        .chunks_exact(4)
        .map(|chunk| CounterRef(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])))
        .collect())
}

fn read_str(bytes: &[u8], offset: u32) -> Result<String> {
    let offset = offset as usize;
    let tail = bytes.get(offset..).ok_or(MetadataError::OutOfRange {
        what: "string",
        offset,
    })?;
    let len = tail
        .iter()
        .position(|b| *b == 0)
        .ok_or(MetadataError::Unterminated(offset))?;
    std::str::from_utf8(&tail[..len])
        .map(str::to_string)
        .map_err(|_| MetadataError::InvalidUtf8(offset))
}
