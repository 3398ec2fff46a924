use terrastream::{HeadlessBackend, Material, MaterialPool, PixelStore, Result, StreamSettings, TiledTextureCache};

#[test]
fn terrain_materials_follow_stream_edits() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let settings = StreamSettings::parse("tile_resolution=64\ntile_overlap=false\nwindow_size=64\n");
    let backend = HeadlessBackend::new();

    let height = PixelStore::create(dir.path().join("height.tsr"), 256, 256, 1, 16, settings.window_size)?;
    let colour = PixelStore::create(dir.path().join("colour.tsr"), 128, 128, 4, 8, settings.window_size)?;

    let mut pool = MaterialPool::new(Material::new("terrain"));
    pool.add_stream("height", TiledTextureCache::from_settings(height, backend.clone(), &settings)?)?;
    pool.add_stream("colour", TiledTextureCache::from_settings(colour, backend.clone(), &settings)?)?;
    pool.initialise()?;
    pool.set_coordinates([2048.0, 2048.0], [-1024.0, -1024.0]);
    assert_eq!(pool.get_divisions(), 4);

    let handle = pool.get_material(3, 1)?;
    assert_eq!(backend.live(), 2);
    let material = pool.material(handle).unwrap();
    let height_info = material.info("height_info").unwrap();
    assert_eq!(height_info.world_to_uv(512.0, -512.0), [0.0, 0.0]);
    let colour_info = material.info("colour_info").unwrap();
    assert_eq!(colour_info.world_to_uv(0.0, -1024.0), [0.0, 0.0]);

    pool.stream_mut("colour").unwrap().set_pixel(100, 10, &[1, 2, 3, 4])?;
    assert_eq!(pool.update_textures()?, 1);
    let texture = pool.material(handle).unwrap().texture("colour").unwrap();
    let at = (10 * 64 + 36) * 4;
    assert_eq!(&texture.pixels()[at..at + 4], &[1, 2, 3, 4]);

    pool.release(handle)?;
    assert_eq!(backend.live(), 0);
    Ok(())
}
