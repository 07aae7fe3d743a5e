//! Loading scenes from disk: relative STL references, shipped configs and
//! setup-time rejection.

use std::fs;
use std::path::{Path, PathBuf};

use orchestrator::{create_scene, SetupError};
use uuid::Uuid;

fn scratch_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("dem-scene-{}", Uuid::new_v4()));
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// Binary STL with the given triangles.
fn write_stl(path: &Path, triangles: &[[[f32; 3]; 3]]) {
    let mut bytes = vec![0u8; 80];
    bytes.extend_from_slice(&(triangles.len() as u32).to_le_bytes());
    for tri in triangles {
        bytes.extend_from_slice(&[0u8; 12]);
        for v in tri {
            for c in v {
                bytes.extend_from_slice(&c.to_le_bytes());
            }
        }
        bytes.extend_from_slice(&[0u8; 2]);
    }
    fs::write(path, bytes).unwrap();
}

const SCENE: &str = r#"{
    "name": "stl floor",
    "geometry": {"type": "stl", "path": "meshes/floor.stl"},
    "materials": [{
        "name": "glass", "youngs_modulus": 6.0e7, "poisson_ratio": 0.25,
        "density": 2500.0, "restitution": 0.6, "friction": 0.4
    }],
    "sources": [{
        "material": "glass",
        "kind": {
            "type": "volume_fill",
            "region": {"min": [-0.02, 0.01, -0.02], "max": [0.02, 0.05, 0.02]},
            "target_count": 25
        },
        "size": {"type": "uniform", "min": 0.0015, "max": 0.0025}
    }],
    "duration": 0.01
}"#;

#[test]
fn stl_geometry_resolves_against_the_scene_directory() {
    let dir = scratch_dir();
    fs::create_dir_all(dir.join("meshes")).unwrap();
    write_stl(
        &dir.join("meshes/floor.stl"),
        &[
            [[-0.1, 0.0, -0.1], [-0.1, 0.0, 0.1], [0.1, 0.0, 0.1]],
            [[-0.1, 0.0, -0.1], [0.1, 0.0, 0.1], [0.1, 0.0, -0.1]],
        ],
    );
    fs::write(dir.join("scene.json"), SCENE).unwrap();

    let scene = create_scene(dir.join("scene.json")).unwrap();
    assert_eq!(scene.walls().len(), 2);
    assert_eq!(scene.geometry_reference(), "stl:meshes/floor.stl");
    assert_eq!(scene.estimate().peak_bodies, 25);
    // Smallest possible radius sets the bound.
    let critical = scene.critical_timestep().unwrap();
    let expected = kernel::rayleigh_timestep(0.0015, 2500.0, 6.0e7 / 2.5, 0.25);
    assert!((critical - expected).abs() < 1e-15);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn degenerate_stl_triangle_fails_setup() {
    let dir = scratch_dir();
    fs::create_dir_all(dir.join("meshes")).unwrap();
    write_stl(
        &dir.join("meshes/floor.stl"),
        &[[[0.0, 0.0, 0.0], [0.1, 0.0, 0.0], [0.2, 0.0, 0.0]]],
    );
    fs::write(dir.join("scene.json"), SCENE).unwrap();

    assert!(matches!(
        create_scene(dir.join("scene.json")),
        Err(SetupError::Geometry(_))
    ));
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn missing_scene_file_is_an_io_error() {
    assert!(matches!(
        create_scene("no/such/scene.json"),
        Err(SetupError::Io { .. })
    ));
}

#[test]
fn shipped_configs_assemble() {
    let configs = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../configs");
    let mut seen = 0;
    for entry in fs::read_dir(&configs).unwrap() {
        let path = entry.unwrap().path();
        if path.extension().is_some_and(|e| e == "json") {
            create_scene(&path).unwrap_or_else(|e| panic!("{}: {e}", path.display()));
            seen += 1;
        }
    }
    assert!(seen >= 3);
}
