/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Process-wide temporary-file management.
//!
//! All intermediate files of the build and query pipelines are created in
//! a single per-process directory under a user-chosen base. The directory
//! is removed on [`cleanup`] and, best-effort, when the process is killed
//! with `SIGINT` or `SIGABRT`, so interrupted runs do not leave gigabytes
//! of sort runs behind.

use anyhow::{Context, Result};
use log::warn;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

static TEMP_FILES: OnceLock<TempFiles> = OnceLock::new();

/// The registry handing out unique paths inside the process temp
/// directory.
pub struct TempFiles {
    dir: PathBuf,
    counter: AtomicU64,
}

impl TempFiles {
    /// A fresh unique path; the file is not created.
    pub fn create_path(&self, prefix: &str) -> PathBuf {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        self.dir.join(format!("{}{:08x}", prefix, n))
    }

    /// The directory all temporary files live in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Removes a single temporary file; missing files are fine.
    pub fn delete(&self, path: &Path) {
        let _ = std::fs::remove_file(path);
    }
}

/// Initializes the temp-file registry under `base`.
///
/// May be called once; later calls with a different base are ignored with
/// a warning. If the registry is used without initialization, it defaults
/// to the system temporary directory.
pub fn init(base: &Path) -> Result<()> {
    let dir = tempfile::Builder::new()
        .prefix("cdbg-")
        .tempdir_in(base)
        .with_context(|| format!("Could not create a temporary directory in {}", base.display()))?
        .keep();
    let tf = TempFiles {
        dir,
        counter: AtomicU64::new(0),
    };
    let dir = tf.dir.clone();
    if TEMP_FILES.set(tf).is_err() {
        let _ = std::fs::remove_dir_all(&dir);
        if get().dir().parent() != Some(base) {
            warn!(
                "Temporary directory already initialized at {}; ignoring {}",
                get().dir().display(),
                base.display()
            );
        }
    } else {
        install_signal_cleanup(get().dir().to_owned());
    }
    Ok(())
}

/// The process-wide registry, initialized on first use if needed.
pub fn get() -> &'static TempFiles {
    TEMP_FILES.get_or_init(|| {
        let dir = tempfile::Builder::new()
            .prefix("cdbg-")
            .tempdir()
            .expect("Could not create a temporary directory")
            .keep();
        install_signal_cleanup(dir.clone());
        TempFiles {
            dir,
            counter: AtomicU64::new(0),
        }
    })
}

/// Removes the whole temporary directory.
pub fn cleanup() {
    if let Some(tf) = TEMP_FILES.get() {
        let _ = std::fs::remove_dir_all(&tf.dir);
    }
}

static SIGNAL_DIR: OnceLock<PathBuf> = OnceLock::new();

extern "C" fn signal_cleanup(sig: libc::c_int) {
    if let Some(dir) = SIGNAL_DIR.get() {
        let _ = std::fs::remove_dir_all(dir);
    }
    unsafe { libc::_exit(128 + sig) };
}

fn install_signal_cleanup(dir: PathBuf) {
    if SIGNAL_DIR.set(dir).is_ok() {
        let handler: extern "C" fn(libc::c_int) = signal_cleanup;
        unsafe {
            libc::signal(libc::SIGINT, handler as libc::sighandler_t);
            libc::signal(libc::SIGABRT, handler as libc::sighandler_t);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_paths() {
        let a = get().create_path("run-");
        let b = get().create_path("run-");
        assert_ne!(a, b);
        assert!(a.starts_with(get().dir()));
    }
}
