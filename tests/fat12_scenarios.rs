use fat12::volume::Volume;

/// Reserve a unique scratch path via `tempfile`, then release it: `Volume::format`
/// wants to `create_new` the image itself, so the slot must be vacant again.
fn temp_image_path(name: &str) -> std::path::PathBuf {
    let _ = env_logger::builder().is_test(true).try_init();
    let file = tempfile::Builder::new().prefix(&format!("fat12-test-{}-", name)).suffix(".img").tempfile().unwrap();
    file.path().to_path_buf()
}

#[test]
fn scenario_format_and_list_empty() {
    let path = temp_image_path("format-empty");
    let registry = fat12::geometry::GeometryRegistry::builtin().unwrap();
    let geometry = registry.get("IBM PC 3.5IN 1.44MB").unwrap();
    let mut vol = Volume::format(&path, geometry, "EMPTYDISK").unwrap();
    assert!(vol.list_dir().unwrap().is_empty());
    vol.unmount().unwrap();
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn scenario_write_and_read_short_name() {
    let path = temp_image_path("short-name");
    let registry = fat12::geometry::GeometryRegistry::builtin().unwrap();
    let geometry = registry.get("IBM PC 3.5IN 1.44MB").unwrap();
    let mut vol = Volume::format(&path, geometry, "NO NAME").unwrap();
    vol.write_file("NOTES.TXT", b"first draft").unwrap();
    assert_eq!(vol.read_file("NOTES.TXT").unwrap(), b"first draft");
    vol.unmount().unwrap();

    let mut reopened = Volume::mount(&path).unwrap();
    assert_eq!(reopened.read_file("NOTES.TXT").unwrap(), b"first draft");
    reopened.unmount().unwrap();
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn scenario_long_name_round_trip() {
    let path = temp_image_path("long-name");
    let registry = fat12::geometry::GeometryRegistry::builtin().unwrap();
    let geometry = registry.get("IBM PC 3.5IN 1.44MB").unwrap();
    let mut vol = Volume::format(&path, geometry, "NO NAME").unwrap();
    let long_name = "quarterly financial report draft.xlsx";
    vol.write_file(long_name, b"spreadsheet bytes").unwrap();
    vol.unmount().unwrap();

    let mut reopened = Volume::mount(&path).unwrap();
    let entries = reopened.list_dir().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, long_name);
    assert_eq!(reopened.read_file(long_name).unwrap(), b"spreadsheet bytes");
    reopened.unmount().unwrap();
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn scenario_delete_frees_clusters() {
    let path = temp_image_path("delete-frees");
    let registry = fat12::geometry::GeometryRegistry::builtin().unwrap();
    let geometry = registry.get("IBM PC 3.5IN 1.44MB").unwrap();
    let mut vol = Volume::format(&path, geometry, "NO NAME").unwrap();
    let before = vol.free_cluster_count();
    vol.write_file("PAYLOAD.BIN", &vec![0xaau8; 50_000]).unwrap();
    assert!(vol.free_cluster_count() < before);
    vol.delete_file("PAYLOAD.BIN").unwrap();
    assert_eq!(vol.free_cluster_count(), before);
    assert!(vol.list_dir().unwrap().is_empty());
    vol.unmount().unwrap();
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn scenario_rename_collision_is_rejected() {
    let path = temp_image_path("rename-collision");
    let registry = fat12::geometry::GeometryRegistry::builtin().unwrap();
    let geometry = registry.get("IBM PC 3.5IN 1.44MB").unwrap();
    let mut vol = Volume::format(&path, geometry, "NO NAME").unwrap();
    vol.write_file("ONE.TXT", b"one").unwrap();
    vol.write_file("TWO.TXT", b"two").unwrap();
    assert!(vol.rename_file("ONE.TXT", "TWO.TXT").is_err());
    vol.rename_file("ONE.TXT", "THREE.TXT").unwrap();
    assert_eq!(vol.read_file("THREE.TXT").unwrap(), b"one");
    vol.unmount().unwrap();
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn scenario_fills_volume_to_its_cluster_boundary() {
    let path = temp_image_path("boundary-fill");
    let registry = fat12::geometry::GeometryRegistry::builtin().unwrap();
    let geometry = registry.get("IBM PC 5.25IN 320KB").unwrap();
    let mut vol = Volume::format(&path, geometry, "NO NAME").unwrap();
    let free = vol.free_cluster_count();
    let bytes_per_cluster = geometry.bytes_per_sector as u32 * geometry.sectors_per_cluster as u32;
    let data = vec![0x5au8; (free * bytes_per_cluster) as usize];
    vol.write_file("FULLDISK.BIN", &data).unwrap();
    assert_eq!(vol.free_cluster_count(), 0);
    assert!(vol.write_file("ONEMORE.BIN", b"x").is_err());
    assert_eq!(vol.read_file("FULLDISK.BIN").unwrap(), data);
    vol.unmount().unwrap();
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn directories_nest_and_isolate_their_contents() {
    let path = temp_image_path("nested-dirs");
    let registry = fat12::geometry::GeometryRegistry::builtin().unwrap();
    let geometry = registry.get("IBM PC 3.5IN 1.44MB").unwrap();
    let mut vol = Volume::format(&path, geometry, "NO NAME").unwrap();
    vol.make_dir("DOCS").unwrap();
    vol.change_dir("DOCS").unwrap();
    vol.write_file("INNER.TXT", b"nested content").unwrap();
    vol.change_dir("..").unwrap();
    assert!(vol.read_file("INNER.TXT").is_err());
    vol.change_dir("DOCS").unwrap();
    assert_eq!(vol.read_file("INNER.TXT").unwrap(), b"nested content");
    vol.unmount().unwrap();
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn mount_rejects_an_unformatted_file() {
    let path = temp_image_path("garbage");
    std::fs::write(&path, vec![0u8; 1_474_560]).unwrap();
    assert!(Volume::mount(&path).is_err());
    std::fs::remove_file(&path).unwrap();
}
