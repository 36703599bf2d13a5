use cv_core::point_cloud::PointCloud;
use cv_core::RigidTransform;
use nalgebra::{Point3, Vector3};
use std::f64::consts::FRAC_PI_2;

#[test]
fn test_point_cloud_result_handling() {
    let points = vec![Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0)];
    let cloud = PointCloud::new(points);

    // 1. Valid colors
    let colors = vec![Point3::new(1.0, 0.0, 0.0), Point3::new(0.0, 1.0, 0.0)];
    let cloud_with_colors = cloud.clone().with_colors(colors);
    assert!(cloud_with_colors.is_ok());

    // 2. Invalid colors (count mismatch)
    let bad_colors = vec![Point3::new(1.0, 0.0, 0.0)];
    let cloud_bad_colors = cloud.clone().with_colors(bad_colors);
    assert!(cloud_bad_colors.is_err());
    assert!(cloud_bad_colors.unwrap_err().to_string().contains("Color count"));

    // 3. Valid normals
    let normals = vec![Vector3::new(0.0, 0.0, 1.0), Vector3::new(0.0, 0.0, 1.0)];
    let cloud_with_normals = cloud.clone().with_normals(normals);
    assert!(cloud_with_normals.is_ok());

    // 4. Invalid normals (count mismatch)
    let bad_normals = vec![Vector3::new(0.0, 0.0, 1.0)];
    let cloud_bad_normals = cloud.with_normals(bad_normals);
    assert!(cloud_bad_normals.is_err());
    assert!(cloud_bad_normals.unwrap_err().to_string().contains("Normal count"));
}

#[test]
fn test_transform_rotates_normals_but_does_not_translate_them() {
    let cloud = PointCloud::new(vec![Point3::new(1.0, 0.0, 0.0)])
        .with_normals(vec![Vector3::new(1.0, 0.0, 0.0)])
        .unwrap();
    let t = RigidTransform::from_axis_angle(&Vector3::z(), FRAC_PI_2, Vector3::new(0.0, 0.0, 5.0));

    let moved = cloud.transformed(&t);
    assert!((moved.points[0] - Point3::new(0.0, 1.0, 5.0)).norm() < 1e-12);
    let n = moved.normals.as_ref().unwrap()[0];
    assert!((n - Vector3::new(0.0, 1.0, 0.0)).norm() < 1e-12);
}

#[test]
fn test_extend_keeps_only_shared_attributes() {
    let mut map = PointCloud::new(vec![Point3::origin()])
        .with_colors(vec![Point3::new(1.0, 0.0, 0.0)])
        .unwrap();
    let with_normals = PointCloud::new(vec![Point3::new(1.0, 0.0, 0.0)])
        .with_normals(vec![Vector3::z()])
        .unwrap();

    map.extend_from(&with_normals);
    assert_eq!(map.len(), 2);
    assert!(map.colors.is_none());
    assert!(map.normals.is_none());

    let mut empty = PointCloud::default();
    empty.extend_from(&with_normals);
    assert_eq!(empty.normals.as_ref().map(Vec::len), Some(1));
}

#[test]
fn test_select_by_index_preserves_requested_order() {
    let cloud = PointCloud::new(vec![
        Point3::new(0.0, 0.0, 0.0),
        Point3::new(1.0, 0.0, 0.0),
        Point3::new(2.0, 0.0, 0.0),
    ]);
    let picked = cloud.select_by_index(&[2, 0]);
    assert_eq!(picked.points, vec![Point3::new(2.0, 0.0, 0.0), Point3::origin()]);
    assert_eq!(cloud.centroid(), Some(Point3::new(1.0, 0.0, 0.0)));
}
