/*!
btrfs-backup

Application based on the [Abscissa] framework.

[Abscissa]: https://github.com/iqlusioninc/abscissa
*/

#![forbid(unsafe_code)]
#![warn(
    rust_2018_idioms,
    trivial_casts,
    unused_lifetimes,
    unused_qualifications,
    bad_style,
    dead_code,
    improper_ctypes,
    missing_copy_implementations,
    missing_debug_implementations,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overflowing_literals,
    path_statements,
    patterns_in_fns_without_body,
    trivial_numeric_casts,
    unused_results,
    unused_extern_crates,
    unused_import_braces,
    unconditional_recursion,
    unused,
    unused_allocation,
    unused_comparisons,
    unused_parens,
    while_true,
    clippy::cast_lossless,
    clippy::default_trait_access,
    clippy::doc_markdown,
    clippy::manual_string_new,
    clippy::match_same_arms,
    clippy::semicolon_if_nothing_returned,
    clippy::trivially_copy_pass_by_ref
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::redundant_pub_crate,
    clippy::missing_const_for_fn
)]

pub mod application;
pub(crate) mod commands;
pub(crate) mod config;
pub(crate) mod helpers;

// btrfs_backup Public API

/// Abscissa core prelude
pub use abscissa_core::prelude::*;
pub use abscissa_core::status_err;

/// Application state
pub use crate::application::BTRFS_BACKUP_APP;

/// btrfs-backup config
pub use crate::config::BtrfsBackupConfig;
