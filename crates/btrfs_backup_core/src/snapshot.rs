//! Snapshot names and the subvolumes they are taken from.

use std::{
    cmp::Ordering,
    fmt::{self, Display},
    path::{Path, PathBuf},
    str::FromStr,
};

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::{BackupError, BackupResult, SnapshotErrorKind};

/// The time format embedded in snapshot names.
///
/// Lexicographic order of the formatted timestamps has to agree with
/// chronological order, so that sorted directory listings list the most
/// recent snapshot last.
pub(crate) const TIME_FORMAT: &str = "%Y-%m-%d_%H:%M:%S";

/// The width of a timestamp formatted with [`TIME_FORMAT`].
const TIME_LEN: usize = 19;

/// A subvolume eligible for backup or restoration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subvolume {
    path: PathBuf,
    tag: String,
}

impl Subvolume {
    /// Create a new [`Subvolume`] from its path.
    ///
    /// The base name of the path becomes the subvolume's tag, which is
    /// embedded in the name of every snapshot taken of it.
    ///
    /// # Errors
    ///
    /// * [`SnapshotErrorKind::NoBaseName`] - If the path has no base name
    /// * [`SnapshotErrorKind::NonUnicodePath`] - If the base name is not valid unicode
    pub fn new(path: impl Into<PathBuf>) -> BackupResult<Self> {
        let path = path.into();
        let name = path
            .file_name()
            .ok_or_else(|| SnapshotErrorKind::NoBaseName(path.clone()))?;
        let tag = name
            .to_str()
            .ok_or_else(|| SnapshotErrorKind::NonUnicodePath(path.clone()))?
            .to_string();
        Ok(Self { path, tag })
    }

    /// The path of the subvolume.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The tag under which snapshots of this subvolume are filed.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }
}

/// The parsed form of a snapshot name.
///
/// A snapshot is named `<tag>-<YYYY-MM-DD_HH:MM:SS>_<gen>[.<ext>]`: the tag
/// of the subvolume it was taken from, its UTC creation time, a generation
/// number disambiguating snapshots taken within the same second, and, in
/// file repositories, the repository's file extension.
///
/// # Note
///
/// [`SnapshotName`] implements [`Eq`], [`PartialEq`], [`Ord`], [`PartialOrd`]
/// by comparing only the `(time, generation)` fields. Snapshots of different
/// subvolumes only ever meet in listings already filtered to a single tag.
#[derive(Clone, Debug)]
pub struct SnapshotName {
    /// The tag of the subvolume this snapshot belongs to.
    pub tag: String,
    /// The UTC creation time, at second precision.
    pub time: DateTime<Utc>,
    /// Disambiguates snapshots of the same subvolume and second.
    pub generation: u64,
    /// The file extension, set in file repositories only.
    pub extension: Option<String>,
}

impl SnapshotName {
    /// Create a new [`SnapshotName`].
    #[must_use]
    pub fn new(
        tag: impl Into<String>,
        time: DateTime<Utc>,
        generation: u64,
        extension: Option<String>,
    ) -> Self {
        Self {
            tag: tag.into(),
            time,
            generation,
            extension,
        }
    }

    /// Pick the next free generation for a snapshot of `tag` taken at `time`.
    ///
    /// Returns a generation greater than that of every existing snapshot
    /// sharing tag and timestamp, starting at 0.
    #[must_use]
    pub fn next_generation(existing: &[Self], tag: &str, time: DateTime<Utc>) -> u64 {
        existing
            .iter()
            .filter(|snapshot| snapshot.tag == tag && snapshot.time == time)
            .map(|snapshot| snapshot.generation + 1)
            .max()
            .unwrap_or(0)
    }

    /// This snapshot's name with the extension replaced.
    #[must_use]
    pub(crate) fn with_extension(&self, extension: Option<String>) -> Self {
        Self {
            extension,
            ..self.clone()
        }
    }
}

impl Display for SnapshotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}_{}",
            self.tag,
            self.time.format(TIME_FORMAT),
            self.generation
        )?;
        if let Some(extension) = &self.extension {
            write!(f, ".{extension}")?;
        }
        Ok(())
    }
}

impl FromStr for SnapshotName {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SnapshotErrorKind::InvalidName(s.to_string());

        // the generation (and extension) follow the last underscore; the
        // timestamp itself contains exactly one, between date and time
        let (rest, generation) = s.rsplit_once('_').ok_or_else(invalid)?;
        let (generation, extension) = match generation.split_once('.') {
            Some((_, ext)) if ext.is_empty() => return Err(invalid().into()),
            Some((generation, ext)) => (generation, Some(ext.to_string())),
            None => (generation, None),
        };
        let generation = generation
            .parse()
            .map_err(|err| SnapshotErrorKind::InvalidGeneration(s.to_string(), err))?;

        // the timestamp occupies the fixed-width tail of the remainder
        if rest.len() < TIME_LEN + 2 {
            return Err(invalid().into());
        }
        let (tag, stamp) = rest.split_at(rest.len() - TIME_LEN);
        let tag = tag.strip_suffix('-').ok_or_else(invalid)?;
        if tag.is_empty() {
            return Err(invalid().into());
        }
        let time = NaiveDateTime::parse_from_str(stamp, TIME_FORMAT)
            .map_err(|err| SnapshotErrorKind::InvalidTimestamp(s.to_string(), err))?
            .and_utc();

        Ok(Self {
            tag: tag.to_string(),
            time,
            generation,
            extension,
        })
    }
}

impl PartialEq for SnapshotName {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.generation == other.generation
    }
}

impl Eq for SnapshotName {}

impl PartialOrd for SnapshotName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SnapshotName {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.time, self.generation).cmp(&(other.time, other.generation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn time(s: &str) -> DateTime<Utc> {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .unwrap()
            .and_utc()
    }

    #[test]
    fn names_format_per_the_grammar() {
        let name = SnapshotName::new("sv", time("2024-01-15 12:00:00"), 0, None);
        assert_eq!(name.to_string(), "sv-2024-01-15_12:00:00_0");

        let name = SnapshotName::new("sv", time("2024-01-15 12:00:00"), 3, Some("gpg".into()));
        assert_eq!(name.to_string(), "sv-2024-01-15_12:00:00_3.gpg");
    }

    #[test]
    fn parsing_is_the_inverse_of_formatting() {
        for name in [
            "sv-2024-01-15_12:00:00_0",
            "sv-2024-01-15_12:00:00_17.gpg",
            "data-old-2023-12-31_23:59:59_1",
            "tagged.dir-2024-02-29_00:00:00_2.bin",
        ] {
            assert_eq!(name.parse::<SnapshotName>().unwrap().to_string(), name);
        }
    }

    #[test]
    fn parsed_fields_are_as_expected() {
        let name: SnapshotName = "data-old-2023-12-31_23:59:59_12.gpg".parse().unwrap();
        assert_eq!(name.tag, "data-old");
        assert_eq!(name.time, time("2023-12-31 23:59:59"));
        assert_eq!(name.generation, 12);
        assert_eq!(name.extension.as_deref(), Some("gpg"));
    }

    #[test]
    fn invalid_names_are_rejected() {
        for name in [
            "",
            "sv",
            "sv-2024-01-15_12:00:00",
            "-2024-01-15_12:00:00_0",
            "sv-2024-01-15_12:00:00_x",
            "sv-2024-01-15_12:00:00_0.",
            "sv-2024-13-40_12:00:00_0",
            "sv_2024-01-15-12:00:00_0",
            "lost+found",
        ] {
            assert!(name.parse::<SnapshotName>().is_err(), "{name}");
        }
    }

    #[test]
    fn snapshots_order_by_time_then_generation() {
        let older = SnapshotName::new("sv", time("2024-01-15 12:00:00"), 1, None);
        let newer = SnapshotName::new("sv", time("2024-01-15 12:05:00"), 0, None);
        let same_second = SnapshotName::new("sv", time("2024-01-15 12:00:00"), 2, None);

        assert!(older < newer);
        assert!(older < same_second);
        assert!(same_second < newer);
        assert_eq!(
            older,
            SnapshotName::new("other", time("2024-01-15 12:00:00"), 1, Some("gpg".into()))
        );
    }

    #[test]
    fn same_second_snapshots_get_consecutive_generations() {
        let now = time("2024-01-15 12:00:00");
        let mut existing = Vec::new();

        assert_eq!(SnapshotName::next_generation(&existing, "sv", now), 0);
        existing.push(SnapshotName::new("sv", now, 0, None));
        assert_eq!(SnapshotName::next_generation(&existing, "sv", now), 1);
        existing.push(SnapshotName::new("sv", now, 1, None));
        assert_eq!(SnapshotName::next_generation(&existing, "sv", now), 2);

        // other tags and times do not count
        existing.push(SnapshotName::new("other", now, 7, None));
        existing.push(SnapshotName::new("sv", time("2024-01-15 12:00:01"), 7, None));
        assert_eq!(SnapshotName::next_generation(&existing, "sv", now), 2);
    }

    #[test]
    fn subvolume_tag_is_the_base_name() {
        let subvolume = Subvolume::new("/mnt/data/home").unwrap();
        assert_eq!(subvolume.tag(), "home");
        assert_eq!(subvolume.path(), Path::new("/mnt/data/home"));

        let trailing = Subvolume::new("/mnt/data/home/").unwrap();
        assert_eq!(trailing.tag(), "home");

        assert!(Subvolume::new("/").is_err());
    }
}
