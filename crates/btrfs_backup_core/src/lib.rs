/*!
A library for incremental, snapshot-based backups of btrfs subvolumes.

# Overview

A *repository* is a directory containing snapshots of one or more
subvolumes — either live read-only btrfs subvolumes or, in *file
repositories*, opaque snapshot files produced by user supplied filter
commands. [`sync`] takes a fresh snapshot of a subvolume when needed and
transfers it to a second repository through a pipeline of external
processes built from `btrfs send`, the user's filters, an optional remote
command wrapper and `btrfs receive`; [`restore`] runs the transfer in the
opposite direction. [`Repository::purge`] retires snapshots under a
retention duration, always keeping the most recent one.

All btrfs operations are delegated to the host's `btrfs` utility; this
crate decides when a snapshot is needed, which common snapshot serves as
the parent of an incremental transfer, and how the process pipeline is
wired, run and torn down.
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
#![allow(clippy::module_name_repetitions)]

pub(crate) mod command;
pub(crate) mod commands;
pub(crate) mod error;
pub(crate) mod pipeline;
pub(crate) mod repository;
pub(crate) mod snapshot;

// btrfs_backup_core Public API
pub use crate::{
    command::StderrMode,
    commands::{
        restore::{restore, RestoreOptions},
        sync::{sync, Filters, SyncOptions, SyncOutcome},
    },
    error::{
        BackupError, BackupErrorKind, BackupResult, CommandErrorKind, PipelineErrorKind,
        RepositoryErrorKind, SnapshotErrorKind, SyncErrorKind,
    },
    pipeline::{Sink, Source, Stage},
    repository::{Repository, RepositoryKind, RepositoryOptions},
    snapshot::{SnapshotName, Subvolume},
};
