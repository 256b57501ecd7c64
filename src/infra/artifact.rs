use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use memmap2::Mmap;
use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use crate::core::Result;

/// Compiled-artifact container: a small header (metadata key/values plus a
/// section table) followed by raw section payloads. Everything is
/// little-endian.
pub const ARTIFACT_MAGIC: &[u8; 4] = b"DSAR";
pub const ARTIFACT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactValue {
    String(String),
    Uint(u64),
    Float(f32),
    Bool(bool),
}

impl ArtifactValue {
    fn type_tag(&self) -> u8 {
        match self {
            ArtifactValue::String(_) => 0,
            ArtifactValue::Uint(_) => 1,
            ArtifactValue::Float(_) => 2,
            ArtifactValue::Bool(_) => 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SectionInfo {
    pub name: String,
    pub offset: u64,
    pub len: u64,
}

/// A parsed artifact with its payload memory-mapped.
pub struct ArtifactFile {
    pub version: u32,
    pub metadata: HashMap<String, ArtifactValue>,
    pub sections: Vec<SectionInfo>,
    data_offset: usize,
    mmap: Mmap,
}

impl ArtifactFile {
    pub fn open(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        let mut reader = Cursor::new(&mmap[..]);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != ARTIFACT_MAGIC {
            anyhow::bail!("invalid artifact magic in {}", path.display());
        }

        let version = reader.read_u32::<LittleEndian>()?;
        if version > ARTIFACT_VERSION {
            anyhow::bail!("unsupported artifact version {}", version);
        }

        let metadata_count = reader.read_u64::<LittleEndian>()? as usize;
        let mut metadata = HashMap::new();
        for _ in 0..metadata_count {
            let key = read_string(&mut reader)?;
            let value = read_value(&mut reader)?;
            metadata.insert(key, value);
        }

        let section_count = reader.read_u64::<LittleEndian>()? as usize;
        let mut sections = Vec::with_capacity(section_count);
        for _ in 0..section_count {
            let name = read_string(&mut reader)?;
            let offset = reader.read_u64::<LittleEndian>()?;
            let len = reader.read_u64::<LittleEndian>()?;
            sections.push(SectionInfo { name, offset, len });
        }

        let data_offset = reader.position() as usize;

        for s in &sections {
            let end = data_offset as u64 + s.offset + s.len;
            if end > mmap.len() as u64 {
                anyhow::bail!("section {} extends past end of file", s.name);
            }
        }

        Ok(Self {
            version,
            metadata,
            sections,
            data_offset,
            mmap,
        })
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.metadata.get(key) {
            Some(ArtifactValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn get_uint(&self, key: &str) -> Option<u64> {
        match self.metadata.get(key) {
            Some(ArtifactValue::Uint(v)) => Some(*v),
            _ => None,
        }
    }

    /// Entry points are stored as a comma-separated metadata value.
    pub fn entry_points(&self) -> Vec<String> {
        self.get_string("module.entry_points")
            .map(|s| s.split(',').map(|e| e.trim().to_string()).collect())
            .unwrap_or_default()
    }

    pub fn section(&self, name: &str) -> Option<&[u8]> {
        self.sections.iter().find(|s| s.name == name).map(|s| {
            let start = self.data_offset + s.offset as usize;
            &self.mmap[start..start + s.len as usize]
        })
    }

    /// Copy of a section as f32 values; handles unaligned payloads.
    pub fn section_f32(&self, name: &str) -> Result<Vec<f32>> {
        let bytes = self
            .section(name)
            .ok_or_else(|| anyhow::anyhow!("no such section: {}", name))?;
        if bytes.len() % 4 != 0 {
            anyhow::bail!("section {} is not a whole number of f32 values", name);
        }
        Ok(bytemuck::pod_collect_to_vec(bytes))
    }
}

/// Serialize an artifact. Sections are written in order, back to back.
pub fn write_artifact(
    path: &Path,
    metadata: &[(String, ArtifactValue)],
    sections: &[(String, Vec<u8>)],
) -> Result<()> {
    let mut out = std::io::BufWriter::new(std::fs::File::create(path)?);

    out.write_all(ARTIFACT_MAGIC)?;
    out.write_u32::<LittleEndian>(ARTIFACT_VERSION)?;

    out.write_u64::<LittleEndian>(metadata.len() as u64)?;
    for (key, value) in metadata {
        write_string(&mut out, key)?;
        write_value(&mut out, value)?;
    }

    out.write_u64::<LittleEndian>(sections.len() as u64)?;
    let mut offset = 0u64;
    for (name, data) in sections {
        write_string(&mut out, name)?;
        out.write_u64::<LittleEndian>(offset)?;
        out.write_u64::<LittleEndian>(data.len() as u64)?;
        offset += data.len() as u64;
    }

    for (_, data) in sections {
        out.write_all(data)?;
    }

    out.flush()?;
    Ok(())
}

fn read_string<R: Read>(reader: &mut R) -> Result<String> {
    let len = reader.read_u64::<LittleEndian>()? as usize;
    if len == 0 {
        return Ok(String::new());
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(String::from_utf8(buf)?)
}

fn write_string<W: Write>(writer: &mut W, s: &str) -> Result<()> {
    writer.write_u64::<LittleEndian>(s.len() as u64)?;
    writer.write_all(s.as_bytes())?;
    Ok(())
}

fn read_value<R: Read>(reader: &mut R) -> Result<ArtifactValue> {
    let tag = reader.read_u8()?;
    match tag {
        0 => Ok(ArtifactValue::String(read_string(reader)?)),
        1 => Ok(ArtifactValue::Uint(reader.read_u64::<LittleEndian>()?)),
        2 => Ok(ArtifactValue::Float(reader.read_f32::<LittleEndian>()?)),
        3 => Ok(ArtifactValue::Bool(reader.read_u8()? != 0)),
        _ => anyhow::bail!("unknown artifact value type: {}", tag),
    }
}

fn write_value<W: Write>(writer: &mut W, value: &ArtifactValue) -> Result<()> {
    writer.write_u8(value.type_tag())?;
    match value {
        ArtifactValue::String(s) => write_string(writer, s)?,
        ArtifactValue::Uint(v) => writer.write_u64::<LittleEndian>(*v)?,
        ArtifactValue::Float(v) => writer.write_f32::<LittleEndian>(*v)?,
        ArtifactValue::Bool(v) => writer.write_u8(*v as u8)?,
    }
    Ok(())
}
