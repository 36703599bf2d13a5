use cv_core::point_cloud::PointCloud;
use cv_io::{
    read_pcd, read_ply, read_point_cloud, write_point_cloud, write_trajectory_ply, Error,
    FrameDirectory,
};
use nalgebra::{Point3, Vector3};
use std::fs;
use std::io::Cursor;
use tempfile::tempdir;

fn sample_cloud() -> PointCloud {
    let points = vec![
        Point3::new(0.0, 0.0, 0.0),
        Point3::new(0.25, -1.5, 2.0),
        Point3::new(1e-3, 3.75, -0.125),
    ];
    let normals = vec![Vector3::z(), Vector3::x(), Vector3::new(0.0, -1.0, 0.0)];
    PointCloud::new(points).with_normals(normals).unwrap()
}

#[test]
fn test_round_trip_through_files() {
    let dir = tempdir().unwrap();
    let cloud = sample_cloud();

    for name in ["cloud.pcd", "cloud.ply", "UPPER.PLY"] {
        let path = dir.path().join(name);
        write_point_cloud(&path, &cloud).unwrap();
        let loaded = read_point_cloud(&path).unwrap();
        assert_eq!(loaded.points, cloud.points, "{name}");
        assert_eq!(loaded.normals, cloud.normals, "{name}");
    }
}

#[test]
fn test_read_errors() {
    let dir = tempdir().unwrap();

    let missing = dir.path().join("absent.pcd");
    assert!(matches!(read_point_cloud(&missing), Err(Error::FileNotFound(_))));

    let xyz = dir.path().join("cloud.xyz");
    fs::write(&xyz, "0 0 0\n").unwrap();
    assert!(matches!(read_point_cloud(&xyz), Err(Error::UnsupportedFormat(_))));

    let broken = dir.path().join("broken.pcd");
    fs::write(&broken, "VERSION 0.7\nFIELDS x y z\n").unwrap();
    assert!(matches!(read_point_cloud(&broken), Err(Error::Parse(_))));
}

fn pcd_header(size: &str, points: &str, data: &str) -> String {
    format!(
        "VERSION 0.7\nFIELDS x y z\nSIZE {size}\nTYPE F F F\nCOUNT 1 1 1\n{points}\nDATA {data}\n"
    )
}

#[test]
fn test_malformed_headers_are_parse_errors() {
    let parse_pcd = |text: String| read_pcd(Cursor::new(text.into_bytes()));

    // Zero-sized binary records
    let mut zero = pcd_header("0 0 0", "POINTS 1", "binary").into_bytes();
    zero.extend_from_slice(&[0u8; 12]);
    assert!(matches!(read_pcd(Cursor::new(zero)), Err(Error::Parse(_))));

    // Declared sizes that overflow
    let wide = pcd_header("18446744073709551615 4 4", "POINTS 1", "binary");
    assert!(matches!(parse_pcd(wide), Err(Error::Parse(_))));
    let many = pcd_header("4 4 4", "POINTS 18446744073709551615", "binary");
    assert!(matches!(parse_pcd(many), Err(Error::Parse(_))));
    let grid = pcd_header("4 4 4", "WIDTH 18446744073709551615\nHEIGHT 2", "ascii");
    assert!(matches!(parse_pcd(grid), Err(Error::Parse(_))));

    // Huge point counts with a single row of data
    let ascii = pcd_header("4 4 4", "POINTS 1000000000000000000", "ascii") + "1 2 3\n";
    assert!(matches!(parse_pcd(ascii), Err(Error::Parse(_))));
    let ply = "ply\nformat ascii 1.0\nelement vertex 1000000000000000000\nproperty float x\n\
               property float y\nproperty float z\nend_header\n1 2 3\n";
    assert!(matches!(read_ply(Cursor::new(ply)), Err(Error::Parse(_))));
}

#[test]
fn test_frame_directory_sorted_by_name() {
    let dir = tempdir().unwrap();
    let cloud = sample_cloud();

    for name in ["010.pcd", "002.ply", "001.pcd"] {
        write_point_cloud(dir.path().join(name), &cloud).unwrap();
    }
    fs::write(dir.path().join("notes.txt"), "not a frame").unwrap();
    fs::create_dir(dir.path().join("nested.pcd")).unwrap();

    let frames = FrameDirectory::open(dir.path()).unwrap();
    let names: Vec<_> = frames
        .files()
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, ["001.pcd", "002.ply", "010.pcd"]);

    assert_eq!(frames.load(1).unwrap().points, cloud.points);
    assert!(matches!(frames.load(3), Err(Error::InvalidInput(_))));
}

#[test]
fn test_frame_directory_missing_or_empty() {
    let dir = tempdir().unwrap();
    assert!(FrameDirectory::open(dir.path()).unwrap().is_empty());
    assert!(matches!(
        FrameDirectory::open(dir.path().join("nope")),
        Err(Error::FileNotFound(_))
    ));
}

#[test]
fn test_trajectory_export() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("trajectory.ply");
    let positions = vec![Point3::origin(), Point3::new(0.1, 0.0, 0.0), Point3::new(0.2, 0.0, 0.0)];

    write_trajectory_ply(&path, &positions, &[[0, 1], [1, 2]], &Point3::new(1.0, 0.0, 0.0)).unwrap();

    let text = fs::read_to_string(&path).unwrap();
    assert!(text.contains("element edge 2"));
    assert_eq!(read_point_cloud(&path).unwrap().points, positions);
}
