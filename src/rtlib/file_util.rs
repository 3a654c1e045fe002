use crate::result::{to_terr, ThumbResult};
use lazy_static::lazy_static;
use std::{
    fmt::Debug,
    fs, io,
    path::{Path, PathBuf},
};
use tracing::{error, info};
use uuid::Uuid;

lazy_static! {
    pub static ref DEFAULT_TMPDIR: PathBuf = std::env::temp_dir().join("remthumb");
}
lazy_static! {
    pub static ref DEFAULT_HOMEDIR: PathBuf = match dirs::home_dir() {
        Some(p) => p.join(".remthumb"),
        _ => std::env::temp_dir().join("remthumb"),
    };
}

pub fn get_log_folder() -> PathBuf {
    DEFAULT_HOMEDIR.join("logs")
}

/// Local destination for one downloaded remote frame. The caller removes it
/// via `defer_file_removal!` once decoding is done.
pub fn tmp_download_path() -> ThumbResult<PathBuf> {
    fs::create_dir_all(DEFAULT_TMPDIR.as_path()).map_err(to_terr)?;
    Ok(DEFAULT_TMPDIR.join(format!("{}.jpg", Uuid::new_v4())))
}

pub fn read_to_string<P>(p: P) -> ThumbResult<String>
where
    P: AsRef<Path> + Debug,
{
    fs::read_to_string(&p).map_err(|e| crate::generr!("could not read {:?} due to {:?}", p, e))
}

pub fn write<P, C>(path: P, contents: C) -> ThumbResult<()>
where
    P: AsRef<Path> + Debug,
    C: AsRef<[u8]>,
{
    fs::write(&path, contents)
        .map_err(|e| crate::generr!("could not write to {:?} since {:?}", path, e))
}

pub struct Defer<F: FnMut()> {
    pub func: F,
}
impl<F: FnMut()> Drop for Defer<F> {
    fn drop(&mut self) {
        (self.func)();
    }
}
#[macro_export]
macro_rules! defer {
    ($f:expr) => {
        let _dfr = $crate::file_util::Defer { func: $f };
    };
}
pub fn checked_remove<'a, P: AsRef<Path> + Debug>(
    path: &'a P,
    func: fn(p: &'a P) -> io::Result<()>,
) {
    match func(path) {
        Ok(_) => info!("removed {path:?}"),
        Err(e) => error!("could not remove {path:?} due to {e:?}"),
    }
}
#[macro_export]
macro_rules! defer_folder_removal {
    ($path:expr) => {
        let func = || $crate::file_util::checked_remove($path, std::fs::remove_dir_all);
        $crate::defer!(func);
    };
}
#[macro_export]
macro_rules! defer_file_removal {
    ($path:expr) => {
        let func = || $crate::file_util::checked_remove($path, std::fs::remove_file);
        $crate::defer!(func);
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defer_runs_on_all_paths() {
        let mut n = 0;
        {
            let f = || n += 1;
            let _d = Defer { func: f };
        }
        assert_eq!(n, 1);
    }

    #[test]
    fn test_tmp_download_path_unique() {
        let a = tmp_download_path().unwrap();
        let b = tmp_download_path().unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with(DEFAULT_TMPDIR.as_path()));
    }
}
