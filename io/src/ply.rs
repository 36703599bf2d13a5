//! PLY (Polygon File Format) I/O
//!
//! PLY is a flexible format for storing 3D data with arbitrary properties. Only the ASCII
//! encoding is handled. Vertex properties are matched by name, so their order in the header
//! does not matter; other elements are skipped.

use crate::{Error, Result};
use cv_core::point_cloud::PointCloud;
use nalgebra::{Point3, Vector3};
use std::io::{BufRead, Write};

struct Element {
    name: String,
    count: usize,
    properties: Vec<String>,
}

/// Read a PLY file from a reader
pub fn read_ply<R: BufRead>(reader: R) -> Result<PointCloud> {
    let mut lines = reader.lines();

    // Parse header
    let mut format = String::new();
    let mut elements: Vec<Element> = Vec::new();

    match lines.next() {
        Some(Ok(magic)) if magic.trim() == "ply" => {}
        _ => return Err(Error::Parse("Missing 'ply' magic line".to_string())),
    }

    loop {
        let line = lines
            .next()
            .ok_or_else(|| Error::Parse("Unexpected EOF in header".to_string()))??;
        let parts: Vec<&str> = line.split_whitespace().collect();

        match parts.as_slice() {
            ["format", f, ..] => format = f.to_string(),
            ["element", name, count] => elements.push(Element {
                name: name.to_string(),
                count: count
                    .parse()
                    .map_err(|_| Error::Parse(format!("Invalid element count: {count}")))?,
                properties: Vec::new(),
            }),
            ["property", .., name] => {
                if let Some(element) = elements.last_mut() {
                    element.properties.push(name.to_string());
                }
            }
            ["end_header"] => break,
            _ => {}
        }
    }

    if format != "ascii" {
        return Err(Error::UnsupportedFormat(format!(
            "PLY format '{}' not supported, only ASCII",
            format
        )));
    }

    let mut cloud = None;
    for element in &elements {
        if element.name != "vertex" {
            for _ in 0..element.count {
                lines
                    .next()
                    .ok_or_else(|| Error::Parse("Unexpected EOF in data".to_string()))??;
            }
            continue;
        }
        cloud = Some(read_vertices(&mut lines, element)?);
        break;
    }

    cloud.ok_or_else(|| Error::Parse("PLY file has no vertex element".to_string()))
}

fn read_vertices<I>(lines: &mut I, element: &Element) -> Result<PointCloud>
where
    I: Iterator<Item = std::io::Result<String>>,
{
    let index = |name: &str| element.properties.iter().position(|p| p == name);
    let xyz = match (index("x"), index("y"), index("z")) {
        (Some(x), Some(y), Some(z)) => [x, y, z],
        _ => return Err(Error::Parse("PLY vertex element lacks x/y/z".to_string())),
    };
    let normal = match (index("nx"), index("ny"), index("nz")) {
        (Some(x), Some(y), Some(z)) => Some([x, y, z]),
        _ => None,
    };
    let color = match (index("red"), index("green"), index("blue")) {
        (Some(r), Some(g), Some(b)) => Some([r, g, b]),
        _ => None,
    };

    // The declared count is untrusted; rows are pushed as they are read.
    let mut points = Vec::new();
    let mut normals = normal.map(|_| Vec::new());
    let mut colors = color.map(|_| Vec::new());

    for _ in 0..element.count {
        let line = lines
            .next()
            .ok_or_else(|| Error::Parse("Unexpected EOF in data".to_string()))??;

        let values: Vec<f64> = line
            .split_whitespace()
            .map(|s| {
                s.parse()
                    .map_err(|_| Error::Parse(format!("Invalid number: {}", s)))
            })
            .collect::<Result<Vec<_>>>()?;

        if values.len() < element.properties.len() {
            return Err(Error::Parse(format!(
                "Vertex row has {} values, expected {}",
                values.len(),
                element.properties.len()
            )));
        }

        points.push(Point3::new(values[xyz[0]], values[xyz[1]], values[xyz[2]]));
        if let (Some(n), Some(idx)) = (normals.as_mut(), normal) {
            n.push(Vector3::new(values[idx[0]], values[idx[1]], values[idx[2]]));
        }
        if let (Some(c), Some(idx)) = (colors.as_mut(), color) {
            c.push(Point3::new(
                values[idx[0]] / 255.0,
                values[idx[1]] / 255.0,
                values[idx[2]] / 255.0,
            ));
        }
    }

    let mut pc = PointCloud::new(points);
    pc.normals = normals;
    pc.colors = colors;
    Ok(pc)
}

/// Write a point cloud to PLY format
pub fn write_ply<W: Write>(writer: &mut W, cloud: &PointCloud) -> Result<()> {
    let num_points = cloud.len();

    writeln!(writer, "ply")?;
    writeln!(writer, "format ascii 1.0")?;
    writeln!(writer, "element vertex {}", num_points)?;
    writeln!(writer, "property double x")?;
    writeln!(writer, "property double y")?;
    writeln!(writer, "property double z")?;

    if cloud.normals.is_some() {
        writeln!(writer, "property double nx")?;
        writeln!(writer, "property double ny")?;
        writeln!(writer, "property double nz")?;
    }

    if cloud.colors.is_some() {
        writeln!(writer, "property uchar red")?;
        writeln!(writer, "property uchar green")?;
        writeln!(writer, "property uchar blue")?;
    }

    writeln!(writer, "end_header")?;

    for i in 0..num_points {
        let p = cloud.points[i];
        write!(writer, "{} {} {}", p.x, p.y, p.z)?;

        if let Some(ref normals) = cloud.normals {
            let n = normals[i];
            write!(writer, " {} {} {}", n.x, n.y, n.z)?;
        }

        if let Some(ref colors) = cloud.colors {
            let [r, g, b] = to_uchar(&colors[i]);
            write!(writer, " {} {} {}", r, g, b)?;
        }

        writeln!(writer)?;
    }

    Ok(())
}

/// Write a polyline or graph as a PLY line set: vertices plus `edge` elements, each edge
/// painted with `color` (components in [0, 1]).
pub fn write_line_set_ply<W: Write>(
    writer: &mut W,
    points: &[Point3<f64>],
    edges: &[[usize; 2]],
    color: &Point3<f64>,
) -> Result<()> {
    if let Some(bad) = edges.iter().find(|e| e[0] >= points.len() || e[1] >= points.len()) {
        return Err(Error::InvalidInput(format!(
            "edge {:?} references a vertex outside 0..{}",
            bad,
            points.len()
        )));
    }

    writeln!(writer, "ply")?;
    writeln!(writer, "format ascii 1.0")?;
    writeln!(writer, "element vertex {}", points.len())?;
    writeln!(writer, "property double x")?;
    writeln!(writer, "property double y")?;
    writeln!(writer, "property double z")?;
    writeln!(writer, "element edge {}", edges.len())?;
    writeln!(writer, "property int vertex1")?;
    writeln!(writer, "property int vertex2")?;
    writeln!(writer, "property uchar red")?;
    writeln!(writer, "property uchar green")?;
    writeln!(writer, "property uchar blue")?;
    writeln!(writer, "end_header")?;

    for p in points {
        writeln!(writer, "{} {} {}", p.x, p.y, p.z)?;
    }
    let [r, g, b] = to_uchar(color);
    for [a, c] in edges {
        writeln!(writer, "{} {} {} {} {}", a, c, r, g, b)?;
    }
    Ok(())
}

fn to_uchar(c: &Point3<f64>) -> [u8; 3] {
    [
        (c.x.clamp(0.0, 1.0) * 255.0).round() as u8,
        (c.y.clamp(0.0, 1.0) * 255.0).round() as u8,
        (c.z.clamp(0.0, 1.0) * 255.0).round() as u8,
    ]
}
