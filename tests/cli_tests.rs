//! End-to-end runs of the `cv-mapping` binary.

use std::process::Command;

use cv_mapping::io::{read_point_cloud, write_point_cloud};
use cv_mapping::{PointCloud, RigidTransform};
use nalgebra::{Point3, Vector3};
use tempfile::tempdir;

/// Floor and two walls, offset off the voxel grid.
fn corner_scene() -> PointCloud {
    let s = 0.05;
    let offset = Vector3::new(0.003, 0.004, 0.002);
    let mut points = Vec::new();
    for i in 0..20 {
        for j in 0..14 {
            points.push(Point3::new(i as f64 * s, j as f64 * s, 0.0) + offset);
        }
    }
    for j in 0..14 {
        for k in 1..10 {
            points.push(Point3::new(0.0, j as f64 * s, k as f64 * s) + offset);
        }
    }
    for i in 1..20 {
        for k in 1..6 {
            points.push(Point3::new(i as f64 * s, 0.0, k as f64 * s) + offset);
        }
    }
    PointCloud::new(points)
}

#[test]
fn test_cli_writes_map_and_trajectory() {
    let dir = tempdir().unwrap();
    let data = dir.path().join("frames");
    std::fs::create_dir(&data).unwrap();
    for i in 0..3 {
        let sensor = RigidTransform::from_translation(Vector3::new(0.1 * i as f64, 0.0, 0.0));
        let frame = corner_scene().transformed(&sensor.inverse());
        write_point_cloud(data.join(format!("{i:03}.pcd")), &frame).unwrap();
    }

    let config = dir.path().join("session.toml");
    std::fs::write(
        &config,
        "[coarse]\nenabled = false\n\n[fine]\nmax_correspondence_distance = 0.25\nmax_iterations = 60\n",
    )
    .unwrap();

    let map = dir.path().join("map.ply");
    let trajectory = dir.path().join("trajectory.ply");
    let output = Command::new(env!("CARGO_BIN_EXE_cv-mapping"))
        .arg(&data)
        .arg("--config")
        .arg(&config)
        .arg("--map")
        .arg(&map)
        .arg("--trajectory")
        .arg(&trajectory)
        .args(["--strict", "--seed", "4", "--log-level", "warn"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.lines().filter(|l| l.starts_with("frame")).count(), 3);

    assert!(!read_point_cloud(&map).unwrap().is_empty());
    let positions = read_point_cloud(&trajectory).unwrap().points;
    assert_eq!(positions.len(), 3);
    assert!((positions[2] - Point3::new(0.2, 0.0, 0.0)).norm() < 0.01);
}

#[test]
fn test_cli_fails_on_missing_directory() {
    let dir = tempdir().unwrap();
    let status = Command::new(env!("CARGO_BIN_EXE_cv-mapping"))
        .arg(dir.path().join("absent"))
        .args(["--log-level", "error"])
        .current_dir(dir.path())
        .status()
        .unwrap();
    assert!(!status.success());
}
