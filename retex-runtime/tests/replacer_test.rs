// Integration tests for the texture replacement cache
#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::io::Cursor;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    use retex_core::hash::{hash_bytes, hash_rows, ReplacementHash};
    use retex_core::PackConfig;
    use retex_runtime::{
        FormatSupport, MemoryAccessor, ReplacedTextureDecodeInfo, ReplacerDecimateMode,
        ReplacerSettings, Task, TaskScheduler, TextureFormat, TextureReplacer, VecMemory,
    };

    /// Scheduler stub that records tasks instead of running them.
    #[derive(Default)]
    struct CollectingScheduler {
        tasks: Mutex<Vec<Box<dyn Task>>>,
    }

    impl TaskScheduler for CollectingScheduler {
        fn enqueue(&self, task: Box<dyn Task>) {
            self.tasks.lock().unwrap().push(task);
        }
    }

    impl CollectingScheduler {
        fn len(&self) -> usize {
            self.tasks.lock().unwrap().len()
        }

        fn run_all(&self) {
            for task in self.tasks.lock().unwrap().drain(..) {
                task.run();
            }
        }
    }

    fn section(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|&(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn quick_pack() -> PackConfig {
        PackConfig {
            options: section(&[("hash", "quick")]),
            ..Default::default()
        }
    }

    fn replacer_with(
        scheduler: Arc<CollectingScheduler>,
        base: &Path,
        settings: ReplacerSettings,
        pack: Option<&PackConfig>,
    ) -> TextureReplacer {
        let mut replacer = TextureReplacer::new(FormatSupport::default(), scheduler);
        replacer.notify_config_changed(settings, base, pack);
        assert!(replacer.enabled());
        replacer
    }

    fn replace_only() -> ReplacerSettings {
        ReplacerSettings {
            replace_textures: true,
            save_new_textures: false,
        }
    }

    fn save_only() -> ReplacerSettings {
        ReplacerSettings {
            replace_textures: false,
            save_new_textures: true,
        }
    }

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let image = image::RgbaImage::from_fn(w, h, |x, y| {
            image::Rgba([x as u8, y as u8, 0x80, 0xFF])
        });
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_disabled_replacer_returns_nothing() {
        let scheduler = Arc::new(CollectingScheduler::default());
        let mut replacer = TextureReplacer::new(FormatSupport::default(), scheduler);
        assert!(!replacer.enabled());
        assert!(replacer.find_replacement(0x1, 0xAAAA, 64, 64).is_none());
        assert!(replacer.find_filtering(0x1, 0xAAAA).is_none());
    }

    #[test]
    fn test_find_replacement_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = Arc::new(CollectingScheduler::default());
        let pack = quick_pack();
        let mut replacer = replacer_with(scheduler, dir.path(), replace_only(), Some(&pack));

        let first = replacer.find_replacement(0x1, 0xAAAA, 64, 64).unwrap();
        assert_eq!(replacer.alias_resolutions(), 1);
        let second = replacer.find_replacement(0x1, 0xAAAA, 64, 64).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        // The second call was a fast-tier hit; no new resolution ran.
        assert_eq!(replacer.alias_resolutions(), 1);
    }

    #[test]
    fn test_same_alias_shares_one_handle() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = Arc::new(CollectingScheduler::default());
        let mut pack = quick_pack();
        pack.hashes = section(&[
            ("00000000000000010000aaaa", "foo.png"),
            ("00000000000000010000bbbb", "foo.png"),
        ]);
        let mut replacer = replacer_with(scheduler, dir.path(), replace_only(), Some(&pack));

        let a = replacer.find_replacement(0x1, 0xAAAA, 64, 64).unwrap();
        assert_eq!(a.hashfiles(), "foo.png");
        let b = replacer.find_replacement(0x1, 0xBBBB, 64, 64).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_ignored_alias_is_memoized() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = Arc::new(CollectingScheduler::default());
        let mut pack = quick_pack();
        pack.hashes = section(&[("00000000000000010000aaaa", "")]);
        let mut replacer = replacer_with(scheduler, dir.path(), replace_only(), Some(&pack));

        assert!(replacer.find_replacement(0x1, 0xAAAA, 64, 64).is_none());
        assert_eq!(replacer.alias_resolutions(), 1);
        // Negative result is cached; resolution does not run again.
        assert!(replacer.find_replacement(0x1, 0xAAAA, 64, 64).is_none());
        assert_eq!(replacer.alias_resolutions(), 1);
    }

    #[test]
    fn test_filtering_override_reaches_handle() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = Arc::new(CollectingScheduler::default());
        let mut pack = quick_pack();
        pack.filtering = section(&[("00000000000000010000aaaa", "nearest")]);
        let mut replacer = replacer_with(scheduler, dir.path(), replace_only(), Some(&pack));

        use retex_core::TextureFiltering;
        assert_eq!(
            replacer.find_filtering(0x1, 0xAAAA),
            Some(TextureFiltering::ForceNearest)
        );
        let handle = replacer.find_replacement(0x1, 0xAAAA, 64, 64).unwrap();
        assert_eq!(handle.force_filtering(), Some(TextureFiltering::ForceNearest));
    }

    #[test]
    fn test_compute_hash_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = Arc::new(CollectingScheduler::default());
        let pack = quick_pack();
        let replacer = replacer_with(scheduler, dir.path(), replace_only(), Some(&pack));

        let mut mem = VecMemory::new(0x0400_0000, 64 * 64 * 4);
        let pattern: Vec<u8> = (0..64 * 64 * 4u32).map(|i| (i * 13) as u8).collect();
        mem.write_bytes(0x0400_0000, &pattern);

        let h1 = replacer.compute_hash(
            &mem,
            0x0400_0000,
            64,
            64,
            64,
            TextureFormat::Rgba8888,
            0,
        );
        let h2 = replacer.compute_hash(
            &mem,
            0x0400_0000,
            64,
            64,
            64,
            TextureFormat::Rgba8888,
            0,
        );
        assert_eq!(h1, h2);
        // Contiguous path hashes the whole region in one run.
        assert_eq!(h1, hash_bytes(ReplacementHash::Quick, &pattern));
    }

    #[test]
    fn test_hash_range_applies_to_hash_and_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = Arc::new(CollectingScheduler::default());
        let mut pack = quick_pack();
        pack.hashranges = section(&[("0x100,512,512", "480,272")]);
        let mut replacer = replacer_with(scheduler, dir.path(), replace_only(), Some(&pack));

        let stride = 512 * 4;
        let len = stride * 272;
        let mut mem = VecMemory::new(0x100, len);
        let pattern: Vec<u8> = (0..len as u32).map(|i| (i ^ (i >> 8)) as u8).collect();
        mem.write_bytes(0x100, &pattern);

        // 512x512 at this address hashes as 480x272: bufw (512) > w (480)
        // forces the strided row fold.
        let computed = replacer.compute_hash(
            &mem,
            0x100,
            512,
            512,
            512,
            TextureFormat::Rgba8888,
            0,
        );
        let expected = hash_rows(ReplacementHash::Quick, &pattern, stride, 480 * 4, 272);
        assert_eq!(computed, expected);

        // The override dimensions flow into the handle too.
        let cachekey = 0x100u64 << 32;
        let handle = replacer.find_replacement(cachekey, computed, 512, 512).unwrap();
        assert_eq!(handle.target_dims(), (480, 272));
    }

    #[test]
    fn test_max_seen_rows_clamp_full_height() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = Arc::new(CollectingScheduler::default());
        let pack = quick_pack();
        let replacer = replacer_with(scheduler, dir.path(), replace_only(), Some(&pack));

        let mut mem = VecMemory::new(0x0400_0000, 16 * 512 * 4);
        let pattern: Vec<u8> = (0..16 * 512 * 4u32).map(|i| (i * 31) as u8).collect();
        mem.write_bytes(0x0400_0000, &pattern);

        let clamped = replacer.compute_hash(
            &mem,
            0x0400_0000,
            16,
            16,
            512,
            TextureFormat::Rgba8888,
            100,
        );
        // Only the first 100 rows are hashed.
        assert_eq!(
            clamped,
            hash_bytes(ReplacementHash::Quick, &pattern[..16 * 100 * 4])
        );
        let full = replacer.compute_hash(
            &mem,
            0x0400_0000,
            16,
            16,
            512,
            TextureFormat::Rgba8888,
            0,
        );
        assert_ne!(clamped, full);
    }

    #[test]
    fn test_decimate_forced_clears_payload_and_reloads_lazily() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("foo.png"), png_bytes(4, 4)).unwrap();
        let scheduler = Arc::new(CollectingScheduler::default());
        let mut pack = quick_pack();
        pack.hashes = section(&[("00000000000000010000aaaa", "foo.png")]);
        let mut replacer = replacer_with(scheduler, dir.path(), replace_only(), Some(&pack));

        let handle = replacer.find_replacement(0x1, 0xAAAA, 4, 4).unwrap();
        assert_eq!(handle.total_data_size(), 0);
        assert!(handle.level(0).is_some());
        assert_eq!(handle.total_data_size(), 4 * 4 * 4);

        // A normal sweep keeps payload touched within the last 90 seconds.
        replacer.decimate(ReplacerDecimateMode::Normal);
        assert_eq!(handle.total_data_size(), 4 * 4 * 4);
        replacer.decimate(ReplacerDecimateMode::UnderPressure);
        assert_eq!(handle.total_data_size(), 4 * 4 * 4);

        // A forced sweep clears everything but keeps the handle; access
        // reloads instead of re-resolving.
        replacer.decimate(ReplacerDecimateMode::Forced);
        assert_eq!(handle.total_data_size(), 0);
        assert!(handle.level(0).is_some());

        let again = replacer.find_replacement(0x1, 0xAAAA, 4, 4).unwrap();
        assert!(Arc::ptr_eq(&handle, &again));
    }

    #[test]
    fn test_save_runs_once_per_content() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = Arc::new(CollectingScheduler::default());
        let mut replacer = replacer_with(scheduler.clone(), dir.path(), save_only(), None);

        let info = ReplacedTextureDecodeInfo {
            cachekey: 0x1,
            hash: 0x42,
            addr: 0x0400_0000,
            is_video: false,
        };
        let data = vec![0xABu8; 8 * 8 * 4];
        replacer.notify_texture_decoded(&info, &data, 8 * 4, 0, 8, 8, 8, 8);
        assert_eq!(scheduler.len(), 1);
        // Identical (cachekey, hash, level): deduplicated before the first
        // write even runs.
        replacer.notify_texture_decoded(&info, &data, 8 * 4, 0, 8, 8, 8, 8);
        assert_eq!(scheduler.len(), 1);
        assert_eq!(replacer.saved_dimensions(0x1, 0x42, 0), Some((8, 8)));

        // A different mip level still gets its own task.
        replacer.notify_texture_decoded(&info, &data, 8 * 4, 1, 8, 8, 8, 8);
        assert_eq!(scheduler.len(), 2);
    }

    #[test]
    fn test_save_task_writes_png_to_staging_dir() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = Arc::new(CollectingScheduler::default());
        let mut replacer = replacer_with(scheduler.clone(), dir.path(), save_only(), None);

        let info = ReplacedTextureDecodeInfo {
            cachekey: 0x2,
            hash: 0x1234,
            addr: 0x0400_0000,
            is_video: false,
        };
        // 4x4 image inside a buffer with a wider pitch; padding must not
        // leak into the file.
        let pitch = 6 * 4;
        let mut data = vec![0u8; pitch * 4];
        for y in 0..4 {
            for x in 0..4 {
                let o = y * pitch + x * 4;
                data[o..o + 4].copy_from_slice(&[x as u8, y as u8, 0, 0xFF]);
            }
        }
        replacer.notify_texture_decoded(&info, &data, pitch, 0, 4, 4, 4, 4);
        scheduler.run_all();

        // Filename is the canonical hash name for (cachekey, hash).
        let saved = dir.path().join("new/000000000000000200001234.png");
        assert!(saved.exists());
        let image = image::open(&saved).unwrap().to_rgba8();
        assert_eq!(image.dimensions(), (4, 4));
        assert_eq!(image.get_pixel(3, 2).0, [3, 2, 0, 0xFF]);
    }

    #[test]
    fn test_save_skipped_when_alias_covers_key() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = Arc::new(CollectingScheduler::default());
        let mut pack = quick_pack();
        pack.hashes = section(&[
            ("00000000000000010000aaaa", "foo.png"),
            ("00000000000000020000bbbb", ""),
        ]);
        let settings = ReplacerSettings {
            replace_textures: true,
            save_new_textures: true,
        };
        let mut replacer =
            replacer_with(scheduler.clone(), dir.path(), settings, Some(&pack));

        let data = vec![0u8; 4 * 4 * 4];
        // Aliased: the pack already replaces this, nothing to capture.
        let aliased = ReplacedTextureDecodeInfo {
            cachekey: 0x1,
            hash: 0xAAAA,
            addr: 0x0400_0000,
            is_video: false,
        };
        replacer.notify_texture_decoded(&aliased, &data, 4 * 4, 0, 4, 4, 4, 4);
        // Explicitly ignored: deliberately not captured either.
        let ignored = ReplacedTextureDecodeInfo {
            cachekey: 0x2,
            hash: 0xBBBB,
            addr: 0x0400_0000,
            is_video: false,
        };
        replacer.notify_texture_decoded(&ignored, &data, 4 * 4, 0, 4, 4, 4, 4);
        assert_eq!(scheduler.len(), 0);
    }

    #[test]
    fn test_will_save_policy_exclusions() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = Arc::new(CollectingScheduler::default());
        let replacer = replacer_with(scheduler, dir.path(), save_only(), None);

        let base = ReplacedTextureDecodeInfo {
            cachekey: 0x1,
            hash: 0x42,
            addr: 0x0400_0000,
            is_video: false,
        };
        assert!(replacer.will_save(&base));
        // System/UI texture range is never dumped.
        assert!(!replacer.will_save(&ReplacedTextureDecodeInfo {
            addr: 0x0600_0000,
            ..base
        }));
        // Video frames are excluded unless the pack allows them.
        assert!(!replacer.will_save(&ReplacedTextureDecodeInfo {
            is_video: true,
            ..base
        }));
    }
}
