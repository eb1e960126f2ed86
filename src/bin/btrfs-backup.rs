//! Main entry point for btrfs-backup

#![deny(warnings, missing_docs, trivial_casts, unused_qualifications)]
#![allow(unsafe_code)]

use btrfs_backup::application::BTRFS_BACKUP_APP;

/// Boot btrfs-backup
fn main() {
    // The Rust runtime ignores SIGPIPE and spawned children inherit that
    // disposition; the btrfs/filter pipelines we build rely on the default
    // one. Workaround until unix_sigpipe
    // (https://github.com/rust-lang/rust/issues/97889) is available.
    #[cfg(not(windows))]
    #[allow(unsafe_code)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    abscissa_core::boot(&BTRFS_BACKUP_APP);
}
