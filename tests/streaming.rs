use terrastream::{HeadlessBackend, PixelRect, PixelStore, Result, TiledTextureCache};

#[test]
fn edits_outside_the_window_survive_reopen() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("height.tsr");

    let mut store = PixelStore::create(&path, 256, 256, 1, 8, 64)?;
    store.set_pixel(100, 100, &[5])?;
    store.set_pixel(200, 200, &[9])?;
    assert!(store.window_rect().contains_point(200, 200));
    assert!(!store.window_rect().contains_point(100, 100));

    // Read back through the file without moving the window.
    let mut px = [0u8];
    store.get_pixel(100, 100, &mut px)?;
    assert_eq!(px, [5]);
    store.close()?;

    let mut store = PixelStore::open(&path, 64)?;
    assert_eq!((store.width(), store.height(), store.pixel_size()), (256, 256, 1));
    store.get_pixel(100, 100, &mut px)?;
    assert_eq!(px, [5]);
    store.get_pixel(200, 200, &mut px)?;
    assert_eq!(px, [9]);
    store.get_pixel(0, 0, &mut px)?;
    assert_eq!(px, [0]);
    Ok(())
}

#[test]
fn large_writes_split_between_window_and_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("colour.tsr");

    let mut store = PixelStore::create(&path, 128, 128, 4, 16, 32)?;
    let rect = PixelRect::new(10, 20, 90, 70);
    let data: Vec<u8> = (0..rect.byte_len(8)).map(|i| (i % 251) as u8).collect();
    store.set_pixels(rect, &data)?;

    let sub = PixelRect::new(50, 40, 17, 9);
    let mut got = vec![0u8; sub.byte_len(8)];
    store.get_pixels(sub, &mut got)?;
    for row in 0..sub.h {
        let src = (((sub.y - rect.y + row) * rect.w + (sub.x - rect.x)) * 8) as usize;
        let dst = (row * sub.w * 8) as usize;
        assert_eq!(&got[dst..dst + sub.w as usize * 8], &data[src..src + sub.w as usize * 8]);
    }

    drop(store);
    let mut store = PixelStore::open(&path, 32)?;
    let mut all = vec![0u8; rect.byte_len(8)];
    store.get_pixels(rect, &mut all)?;
    assert_eq!(all, data);
    Ok(())
}

#[test]
fn cache_over_a_raw_file_refreshes_tiles() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = PixelStore::create(dir.path().join("height.tsr"), 256, 256, 1, 8, 64)?;
    let backend = HeadlessBackend::new();
    let mut cache = TiledTextureCache::new(store, backend.clone());
    cache.initialise(64, false)?;
    assert_eq!(cache.get_divisions(), 4);

    let tile = cache.get_texture(1, 1)?;
    cache.set_pixel(70, 65, &[42])?;
    cache.set_pixel(250, 250, &[1])?;
    assert_eq!(cache.update_textures()?, 1);
    assert_eq!(tile.pixels()[64 + 6], 42);
    assert_eq!(cache.dirty_rect(), None);

    cache.drop_texture(1, 1)?;
    assert!(!tile.is_alive());
    assert_eq!(backend.live(), 0);
    Ok(())
}
