//! PCD (Point Cloud Data) I/O
//!
//! PCD is the native format for Point Cloud Library (PCL). Reading supports `ascii` and
//! uncompressed `binary` data sections; writing produces `ascii` with double precision
//! coordinates.

use crate::{Error, Result};
use cv_core::point_cloud::PointCloud;
use nalgebra::{Point3, Vector3};
use std::io::{BufRead, Write};

/// PCD data format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcdData {
    Ascii,
    Binary,
    BinaryCompressed,
}

#[derive(Debug, Clone)]
struct PcdField {
    name: String,
    size: usize,
    kind: char,
    count: usize,
}

#[derive(Debug)]
struct PcdHeader {
    fields: Vec<PcdField>,
    points: usize,
    data: PcdData,
}

impl PcdHeader {
    fn position(&self, names: &[&str]) -> Option<usize> {
        self.fields.iter().position(|f| names.contains(&f.name.as_str()))
    }

    /// Column of the first element of every field in an ASCII row, byte offset in a binary record.
    fn offsets(&self, binary: bool) -> Vec<usize> {
        let mut offsets = Vec::with_capacity(self.fields.len());
        let mut at: usize = 0;
        for f in &self.fields {
            offsets.push(at);
            let width = if binary { f.size.saturating_mul(f.count) } else { f.count };
            at = at.saturating_add(width);
        }
        offsets
    }

    /// Bytes per binary record; `None` on overflow.
    fn record_size(&self) -> Option<usize> {
        self.fields
            .iter()
            .try_fold(0usize, |acc, f| acc.checked_add(f.size.checked_mul(f.count)?))
    }
}

/// Field positions resolved once per file.
struct Layout {
    xyz: [usize; 3],
    normal: Option<[usize; 3]>,
    rgb: Option<usize>,
}

impl Layout {
    fn resolve(header: &PcdHeader) -> Result<Self> {
        let axis = |name: &str| {
            header
                .position(&[name])
                .ok_or_else(|| Error::Parse(format!("PCD has no '{name}' field")))
        };
        let xyz = [axis("x")?, axis("y")?, axis("z")?];
        let normal = match (
            header.position(&["normal_x", "nx"]),
            header.position(&["normal_y", "ny"]),
            header.position(&["normal_z", "nz"]),
        ) {
            (Some(a), Some(b), Some(c)) => Some([a, b, c]),
            _ => None,
        };
        let rgb = header.position(&["rgb", "rgba"]);
        Ok(Self { xyz, normal, rgb })
    }
}

/// Read a PCD file
pub fn read_pcd<R: BufRead>(mut reader: R) -> Result<PointCloud> {
    let header = read_header(&mut reader)?;
    let layout = Layout::resolve(&header)?;

    // POINTS is untrusted until the data section has been checked against it.
    let mut points = Vec::new();
    let mut normals = layout.normal.map(|_| Vec::new());
    let mut colors = layout.rgb.map(|_| Vec::new());

    match header.data {
        PcdData::Ascii => {
            let offsets = header.offsets(false);
            let mut line = String::new();
            while points.len() < header.points {
                line.clear();
                if reader.read_line(&mut line)? == 0 {
                    break;
                }
                let tokens: Vec<&str> = line.split_whitespace().collect();
                if tokens.is_empty() {
                    continue;
                }
                let row = points.len();
                let value = |field: usize| -> Result<f64> {
                    let token = tokens
                        .get(offsets[field])
                        .ok_or_else(|| Error::Parse(format!("PCD row {row} is too short")))?;
                    token
                        .parse::<f64>()
                        .map_err(|_| Error::Parse(format!("Invalid number: {token}")))
                };

                points.push(Point3::new(
                    value(layout.xyz[0])?,
                    value(layout.xyz[1])?,
                    value(layout.xyz[2])?,
                ));
                if let (Some(n), Some(idx)) = (normals.as_mut(), layout.normal) {
                    n.push(Vector3::new(value(idx[0])?, value(idx[1])?, value(idx[2])?));
                }
                if let (Some(c), Some(idx)) = (colors.as_mut(), layout.rgb) {
                    let token = tokens
                        .get(offsets[idx])
                        .ok_or_else(|| Error::Parse("PCD row is missing rgb".to_string()))?;
                    let packed = if header.fields[idx].kind == 'F' {
                        token
                            .parse::<f32>()
                            .map(f32::to_bits)
                            .map_err(|_| Error::Parse(format!("Invalid rgb: {token}")))?
                    } else {
                        token
                            .parse::<f64>()
                            .map(|v| v as u32)
                            .map_err(|_| Error::Parse(format!("Invalid rgb: {token}")))?
                    };
                    c.push(unpack_rgb(packed));
                }
            }
        }
        PcdData::Binary => {
            let offsets = header.offsets(true);
            let record = match header.record_size() {
                Some(0) => return Err(Error::Parse("binary PCD record size is zero".to_string())),
                Some(record) => record,
                None => return Err(Error::Parse("binary PCD record size overflows".to_string())),
            };
            let expected = record.checked_mul(header.points).ok_or_else(|| {
                Error::Parse(format!("binary PCD of {} points overflows", header.points))
            })?;
            let mut data = Vec::new();
            reader.read_to_end(&mut data)?;
            if data.len() < expected {
                return Err(Error::Parse(format!(
                    "binary PCD data holds {} bytes, expected {}",
                    data.len(),
                    expected
                )));
            }

            points.reserve(header.points);
            if let Some(n) = normals.as_mut() {
                n.reserve(header.points);
            }
            if let Some(c) = colors.as_mut() {
                c.reserve(header.points);
            }

            for chunk in data.chunks_exact(record).take(header.points) {
                let value = |field: usize| decode_scalar(&header.fields[field], &chunk[offsets[field]..]);
                points.push(Point3::new(
                    value(layout.xyz[0])?,
                    value(layout.xyz[1])?,
                    value(layout.xyz[2])?,
                ));
                if let (Some(n), Some(idx)) = (normals.as_mut(), layout.normal) {
                    n.push(Vector3::new(value(idx[0])?, value(idx[1])?, value(idx[2])?));
                }
                if let (Some(c), Some(idx)) = (colors.as_mut(), layout.rgb) {
                    let bytes = chunk
                        .get(offsets[idx]..offsets[idx] + 4)
                        .ok_or_else(|| Error::Parse("rgb field must be 4 bytes".to_string()))?;
                    let packed = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                    c.push(unpack_rgb(packed));
                }
            }
        }
        PcdData::BinaryCompressed => {
            return Err(Error::UnsupportedFormat(
                "binary_compressed PCD is not supported".to_string(),
            ));
        }
    }

    if points.len() < header.points {
        return Err(Error::Parse(format!(
            "PCD declares {} points but holds {}",
            header.points,
            points.len()
        )));
    }

    let mut cloud = PointCloud::new(points);
    cloud.normals = normals;
    cloud.colors = colors;
    Ok(cloud)
}

fn read_header<R: BufRead>(reader: &mut R) -> Result<PcdHeader> {
    let mut fields: Vec<String> = Vec::new();
    let mut sizes: Vec<usize> = Vec::new();
    let mut types: Vec<char> = Vec::new();
    let mut counts: Vec<usize> = Vec::new();
    let mut width = 0usize;
    let mut height = 1usize;
    let mut points_count: Option<usize> = None;

    let mut line = String::new();
    let data = loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(Error::Parse("Unexpected EOF in header".to_string()));
        }
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let parts: Vec<&str> = trimmed.split_whitespace().collect();
        let number = |s: Option<&&str>| -> Result<usize> {
            s.and_then(|s| s.parse().ok())
                .ok_or_else(|| Error::Parse(format!("Invalid PCD header line: {trimmed}")))
        };
        match parts[0] {
            "FIELDS" => fields = parts[1..].iter().map(|s| s.to_string()).collect(),
            "SIZE" => {
                sizes = parts[1..]
                    .iter()
                    .map(|s| s.parse().map_err(|_| Error::Parse(format!("Invalid SIZE: {s}"))))
                    .collect::<Result<_>>()?
            }
            "TYPE" => types = parts[1..].iter().filter_map(|s| s.chars().next()).collect(),
            "COUNT" => {
                counts = parts[1..]
                    .iter()
                    .map(|s| s.parse().map_err(|_| Error::Parse(format!("Invalid COUNT: {s}"))))
                    .collect::<Result<_>>()?
            }
            "WIDTH" => width = number(parts.get(1))?,
            "HEIGHT" => height = number(parts.get(1))?,
            "POINTS" => points_count = Some(number(parts.get(1))?),
            "DATA" => {
                break match parts.get(1).copied() {
                    Some("ascii") => PcdData::Ascii,
                    Some("binary") => PcdData::Binary,
                    Some("binary_compressed") => PcdData::BinaryCompressed,
                    other => {
                        return Err(Error::Parse(format!("Unknown PCD DATA type {other:?}")))
                    }
                };
            }
            // VERSION, VIEWPOINT
            _ => {}
        }
    };

    if fields.is_empty() {
        return Err(Error::Parse("PCD header has no FIELDS".to_string()));
    }
    if counts.is_empty() {
        counts = vec![1; fields.len()];
    }
    if sizes.len() != fields.len() || types.len() != fields.len() || counts.len() != fields.len() {
        return Err(Error::Parse(format!(
            "PCD header lists {} fields but {} sizes, {} types, {} counts",
            fields.len(),
            sizes.len(),
            types.len(),
            counts.len()
        )));
    }

    let fields = fields
        .into_iter()
        .zip(sizes)
        .zip(types)
        .zip(counts)
        .map(|(((name, size), kind), count)| PcdField {
            name,
            size,
            kind,
            count,
        })
        .collect();

    let points = match points_count {
        Some(points) => points,
        None => width
            .checked_mul(height)
            .ok_or_else(|| Error::Parse(format!("PCD size {width}x{height} overflows")))?,
    };

    Ok(PcdHeader {
        fields,
        points,
        data,
    })
}

fn decode_scalar(field: &PcdField, bytes: &[u8]) -> Result<f64> {
    let take = |n: usize| -> Result<&[u8]> {
        bytes
            .get(..n)
            .ok_or_else(|| Error::Parse(format!("truncated field '{}'", field.name)))
    };
    let value = match (field.kind, field.size) {
        ('F', 4) => f32::from_le_bytes(to_array(take(4)?)) as f64,
        ('F', 8) => f64::from_le_bytes(to_array(take(8)?)),
        ('U', 1) => take(1)?[0] as f64,
        ('I', 1) => take(1)?[0] as i8 as f64,
        ('U', 2) => u16::from_le_bytes(to_array(take(2)?)) as f64,
        ('I', 2) => i16::from_le_bytes(to_array(take(2)?)) as f64,
        ('U', 4) => u32::from_le_bytes(to_array(take(4)?)) as f64,
        ('I', 4) => i32::from_le_bytes(to_array(take(4)?)) as f64,
        ('U', 8) => u64::from_le_bytes(to_array(take(8)?)) as f64,
        ('I', 8) => i64::from_le_bytes(to_array(take(8)?)) as f64,
        (kind, size) => {
            return Err(Error::Parse(format!(
                "unsupported PCD field type {kind}{size} for '{}'",
                field.name
            )))
        }
    };
    Ok(value)
}

fn to_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

fn unpack_rgb(packed: u32) -> Point3<f64> {
    Point3::new(
        ((packed >> 16) & 0xFF) as f64 / 255.0,
        ((packed >> 8) & 0xFF) as f64 / 255.0,
        (packed & 0xFF) as f64 / 255.0,
    )
}

fn pack_rgb(color: &Point3<f64>) -> u32 {
    let r = (color.x.clamp(0.0, 1.0) * 255.0).round() as u32;
    let g = (color.y.clamp(0.0, 1.0) * 255.0).round() as u32;
    let b = (color.z.clamp(0.0, 1.0) * 255.0).round() as u32;
    (r << 16) | (g << 8) | b
}

/// Write point cloud to PCD format (ASCII)
pub fn write_pcd<W: Write>(writer: &mut W, cloud: &PointCloud) -> Result<()> {
    let num_points = cloud.len();
    let has_normals = cloud.normals.is_some();
    let has_colors = cloud.colors.is_some();

    writeln!(writer, "# .PCD v0.7 - Point Cloud Data file format")?;
    writeln!(writer, "VERSION 0.7")?;

    let mut fields = vec!["x", "y", "z"];
    let mut sizes = vec!["8"; 3];
    let mut types = vec!["F"; 3];
    if has_normals {
        fields.extend(["normal_x", "normal_y", "normal_z"]);
        sizes.extend(["8"; 3]);
        types.extend(["F"; 3]);
    }
    if has_colors {
        fields.push("rgb");
        sizes.push("4");
        types.push("U");
    }
    writeln!(writer, "FIELDS {}", fields.join(" "))?;
    writeln!(writer, "SIZE {}", sizes.join(" "))?;
    writeln!(writer, "TYPE {}", types.join(" "))?;
    writeln!(writer, "COUNT {}", vec!["1"; fields.len()].join(" "))?;
    writeln!(writer, "WIDTH {}", num_points)?;
    writeln!(writer, "HEIGHT 1")?;
    writeln!(writer, "VIEWPOINT 0 0 0 1 0 0 0")?;
    writeln!(writer, "POINTS {}", num_points)?;
    writeln!(writer, "DATA ascii")?;

    for i in 0..num_points {
        let p = cloud.points[i];
        write!(writer, "{} {} {}", p.x, p.y, p.z)?;

        if let Some(ref normals) = cloud.normals {
            let n = normals[i];
            write!(writer, " {} {} {}", n.x, n.y, n.z)?;
        }

        if let Some(ref colors) = cloud.colors {
            write!(writer, " {}", pack_rgb(&colors[i]))?;
        }

        writeln!(writer)?;
    }

    Ok(())
}
