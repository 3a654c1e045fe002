use std::{
    collections::{HashMap, VecDeque},
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use image::DynamicImage;
use percent_encoding::{percent_encode, NON_ALPHANUMERIC};
use tracing::warn;

use crate::{
    cfg::get_default_cachedir,
    result::{to_terr, ThumbError, ThumbResult},
};

/// Derives the flat on-disk file name of a cached thumbnail from its remote
/// path. Injective: literal characters are alphanumeric only, so the `_xx`
/// runs left by the escapes cannot be confused with path content.
pub fn cache_file_name(remote_path: &str) -> String {
    let encoded = percent_encode(remote_path.as_bytes(), NON_ALPHANUMERIC).to_string();
    let mut name = encoded.replace(['/', '%'], "_");
    name.push_str(".thumb");
    name
}

#[derive(Clone, Debug)]
pub struct ThumbCacheCfg {
    pub count_limit: usize,
    pub cachedir: PathBuf,
}

impl Default for ThumbCacheCfg {
    fn default() -> Self {
        Self {
            count_limit: 150,
            cachedir: get_default_cachedir(),
        }
    }
}

#[derive(Default)]
struct MemCache {
    images: HashMap<String, DynamicImage>,
    // front is oldest
    order: VecDeque<String>,
}

impl MemCache {
    fn touch(&mut self, key: &str) {
        self.order.retain(|k| k != key);
        self.order.push_back(key.to_string());
    }
    fn insert(&mut self, key: &str, image: DynamicImage, limit: usize) {
        self.images.insert(key.to_string(), image);
        self.touch(key);
        while self.images.len() > limit {
            if let Some(oldest) = self.order.pop_front() {
                self.images.remove(&oldest);
            }
        }
    }
}

/// Two-level thumbnail store. The memory level is a count-bounded LRU, the
/// disk level holds losslessly encoded images that survive restarts. Disk
/// failures degrade the cache to memory-only instead of failing the caller.
pub struct ThumbCache {
    cfg: ThumbCacheCfg,
    mem: Mutex<MemCache>,
}

impl ThumbCache {
    pub fn new(cfg: ThumbCacheCfg) -> Self {
        Self {
            cfg,
            mem: Mutex::new(MemCache::default()),
        }
    }

    fn disk_path(&self, remote_path: &str) -> PathBuf {
        self.cfg.cachedir.join(cache_file_name(remote_path))
    }

    pub fn lookup(&self, remote_path: &str) -> Option<DynamicImage> {
        {
            let mut mem = self.mem.lock().unwrap();
            if let Some(im) = mem.images.get(remote_path).cloned() {
                mem.touch(remote_path);
                return Some(im);
            }
        }
        let p = self.disk_path(remote_path);
        if p.exists() {
            match read_disk_image(&p) {
                Ok(im) => {
                    let mut mem = self.mem.lock().unwrap();
                    mem.insert(remote_path, im.clone(), self.cfg.count_limit);
                    return Some(im);
                }
                Err(e) => {
                    warn!("could not read cached thumbnail {p:?}, {e:?}");
                    self.remove(remote_path);
                }
            }
        }
        None
    }

    pub fn store(&self, remote_path: &str, image: &DynamicImage) -> ThumbResult<()> {
        {
            let mut mem = self.mem.lock().unwrap();
            mem.insert(remote_path, image.clone(), self.cfg.count_limit);
        }
        fs::create_dir_all(&self.cfg.cachedir)
            .map_err(|e| ThumbError::CacheIo(format!("{e:?}")))?;
        let p = self.disk_path(remote_path);
        image
            .save_with_format(&p, image::ImageFormat::Png)
            .map_err(|e| ThumbError::CacheIo(format!("could not write {p:?}, {e:?}")))?;
        Ok(())
    }

    pub fn remove(&self, remote_path: &str) {
        {
            let mut mem = self.mem.lock().unwrap();
            mem.images.remove(remote_path);
            mem.order.retain(|k| k != remote_path);
        }
        let p = self.disk_path(remote_path);
        if p.exists() {
            if let Err(e) = fs::remove_file(&p) {
                warn!("could not remove cached thumbnail {p:?}, {e:?}");
            }
        }
    }

    pub fn clear(&self) -> ThumbResult<()> {
        {
            let mut mem = self.mem.lock().unwrap();
            *mem = MemCache::default();
        }
        if self.cfg.cachedir.exists() {
            fs::remove_dir_all(&self.cfg.cachedir).map_err(to_terr)?;
        }
        Ok(())
    }

    pub fn size_in_mb(&self) -> f64 {
        let Ok(entries) = fs::read_dir(&self.cfg.cachedir) else {
            return 0.0;
        };
        let n_bytes: u64 = entries
            .flatten()
            .filter_map(|e| e.metadata().ok())
            .map(|md| md.len())
            .sum();
        n_bytes as f64 / (1024.0 * 1024.0)
    }

    pub fn n_in_memory(&self) -> usize {
        self.mem.lock().unwrap().images.len()
    }

    #[cfg(test)]
    pub fn clear_memory(&self) {
        *self.mem.lock().unwrap() = MemCache::default();
    }
}

fn read_disk_image(p: &Path) -> ThumbResult<DynamicImage> {
    image::ImageReader::open(p)
        .map_err(to_terr)?
        .with_guessed_format()
        .map_err(to_terr)?
        .decode()
        .map_err(|e| ThumbError::CacheIo(format!("{e:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defer_folder_removal;
    use image::{Rgba, RgbaImage};

    fn test_cachedir(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join("remthumb-test")
            .join(format!("{name}_{}", uuid::Uuid::new_v4()))
    }

    fn test_cache(cachedir: &Path, count_limit: usize) -> ThumbCache {
        ThumbCache::new(ThumbCacheCfg {
            count_limit,
            cachedir: cachedir.to_path_buf(),
        })
    }

    fn checker(w: u32, h: u32) -> DynamicImage {
        let im = RgbaImage::from_fn(w, h, |x, y| {
            if (x + y) % 2 == 0 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 255, 255])
            }
        });
        DynamicImage::ImageRgba8(im)
    }

    #[test]
    fn test_cache_file_name() {
        let name = cache_file_name("/media/videos/some clip (1).mp4");
        assert!(name.ends_with(".thumb"));
        assert!(!name.contains('/'));
        assert!(!name.contains('%'));
        assert!(!name.contains(' '));
        assert_ne!(
            cache_file_name("/a/b.mp4"),
            cache_file_name("/a_b.mp4"),
            "separator and literal underscore must stay distinguishable via escapes"
        );
    }

    #[test]
    fn test_roundtrip_is_pixel_equal() {
        let cachedir = test_cachedir("roundtrip");
        defer_folder_removal!(&cachedir);
        let cache = test_cache(&cachedir, 10);
        let im = checker(60, 60);
        cache.store("/data/a.mp4", &im).unwrap();
        // force the disk path
        cache.clear_memory();
        let restored = cache.lookup("/data/a.mp4").unwrap();
        assert_eq!(im.to_rgba8().as_raw(), restored.to_rgba8().as_raw());
    }

    #[test]
    fn test_memory_count_limit() {
        let cachedir = test_cachedir("limit");
        defer_folder_removal!(&cachedir);
        let cache = test_cache(&cachedir, 3);
        for i in 0..5 {
            cache.store(&format!("/data/{i}.mp4"), &checker(4, 4)).unwrap();
        }
        assert_eq!(cache.n_in_memory(), 3);
        // the two oldest were evicted from memory but survive on disk
        assert!(cache.lookup("/data/0.mp4").is_some());
    }

    #[test]
    fn test_lookup_touches_lru_order() {
        let cachedir = test_cachedir("lru");
        defer_folder_removal!(&cachedir);
        let cache = test_cache(&cachedir, 2);
        cache.store("/a", &checker(4, 4)).unwrap();
        cache.store("/b", &checker(4, 4)).unwrap();
        cache.lookup("/a");
        cache.store("/c", &checker(4, 4)).unwrap();
        let mem = cache.mem.lock().unwrap();
        assert!(mem.images.contains_key("/a"));
        assert!(!mem.images.contains_key("/b"));
    }

    #[test]
    fn test_remove_and_miss() {
        let cachedir = test_cachedir("remove");
        defer_folder_removal!(&cachedir);
        let cache = test_cache(&cachedir, 10);
        assert!(cache.lookup("/nope").is_none());
        cache.store("/data/a.mp4", &checker(4, 4)).unwrap();
        cache.remove("/data/a.mp4");
        assert!(cache.lookup("/data/a.mp4").is_none());
    }

    #[test]
    fn test_corrupt_disk_entry_is_dropped() {
        let cachedir = test_cachedir("corrupt");
        defer_folder_removal!(&cachedir);
        fs::create_dir_all(&cachedir).unwrap();
        let p = cachedir.join(cache_file_name("/data/a.mp4"));
        fs::write(&p, b"not an image").unwrap();
        let cache = test_cache(&cachedir, 10);
        assert!(cache.lookup("/data/a.mp4").is_none());
        // the undecodable file is gone, the next lookup is a plain miss
        assert!(!p.exists());
        assert!(cache.lookup("/data/a.mp4").is_none());
    }

    #[test]
    fn test_clear_wipes_memory_and_disk() {
        let cachedir = test_cachedir("clear");
        let cache = test_cache(&cachedir, 10);
        cache.store("/data/a.mp4", &checker(4, 4)).unwrap();
        cache.clear().unwrap();
        assert_eq!(cache.n_in_memory(), 0);
        assert!(!cachedir.exists());
        assert!(cache.lookup("/data/a.mp4").is_none());
    }
}
