// src/flags.rs

//! Named bitmask sets: transaction flags and signature levels
//!
//! Both sets are plain bitmasks with a fixed table of names. Any subset of
//! the known toggles is valid; unknown names are rejected with
//! [`Error::Config`] instead of being ignored.

use crate::error::{Error, Result};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

macro_rules! flag_set {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $( $(#[$fmeta:meta])* $flag:ident = $bits:expr => [$($alias:literal),+] ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name(u32);

        impl $name {
            $( $(#[$fmeta])* pub const $flag: $name = $name($bits); )+

            const NAMES: &'static [(&'static [&'static str], $name)] = &[
                $( (&[$($alias),+], $name::$flag), )+
            ];

            /// The empty set
            pub const fn empty() -> Self {
                $name(0)
            }

            /// Every known toggle
            pub const fn all() -> Self {
                $name(0 $( | $bits )+)
            }

            /// Raw bit value
            pub const fn bits(self) -> u32 {
                self.0
            }

            /// Build from raw bits, dropping unknown ones
            pub const fn from_bits_truncate(bits: u32) -> Self {
                $name(bits & Self::all().0)
            }

            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            pub const fn intersects(self, other: Self) -> bool {
                self.0 & other.0 != 0
            }

            pub fn insert(&mut self, other: Self) {
                self.0 |= other.0;
            }

            pub fn remove(&mut self, other: Self) {
                self.0 &= !other.0;
            }

            /// Look up a single toggle by name
            pub fn from_name(name: &str) -> Result<Self> {
                Self::NAMES
                    .iter()
                    .find(|(aliases, _)| aliases.contains(&name))
                    .map(|(_, flag)| *flag)
                    .ok_or_else(|| Error::Config {
                        kind: $kind,
                        name: name.to_string(),
                    })
            }

            /// Combine a list of toggle names into one set
            pub fn from_names<I, S>(names: I) -> Result<Self>
            where
                I: IntoIterator<Item = S>,
                S: AsRef<str>,
            {
                names
                    .into_iter()
                    .try_fold(Self::empty(), |acc, name| Ok(acc | Self::from_name(name.as_ref())?))
            }

            /// Canonical names of every toggle in this set
            pub fn names(self) -> Vec<&'static str> {
                Self::NAMES
                    .iter()
                    .filter(|(_, flag)| self.contains(*flag))
                    .map(|(aliases, _)| aliases[0])
                    .collect()
            }

            /// Canonical names of every known toggle
            pub fn known_names() -> Vec<&'static str> {
                Self::NAMES.iter().map(|(aliases, _)| aliases[0]).collect()
            }
        }

        impl BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                $name(self.0 | rhs.0)
            }
        }

        impl BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl std::str::FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Self::from_name(s)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.names().join("|"))
            }
        }
    };
}

flag_set! {
    /// Behavior toggles passed to `Handle::begin_transaction`
    TransFlags, "transaction flag" {
        /// Skip dependency checks
        NO_DEPS = 1 => ["ignore-dependencies", "nodeps"],
        /// Overwrite conflicting files
        FORCE = 1 << 1 => ["force-overwrite", "force"],
        /// Delete modified backup files instead of saving `.pacsave` copies
        NO_SAVE = 1 << 2 => ["no-backup-save", "nosave"],
        /// Ignore version constraints of dependencies
        NO_DEP_VERSION = 1 << 3 => ["ignore-dep-versions", "nodepversion"],
        /// Remove packages depending on removal targets
        CASCADE = 1 << 4 => ["cascade-remove", "cascade"],
        /// Remove dependencies that become unneeded
        RECURSE = 1 << 5 => ["recurse-remove-deps", "recurse"],
        /// Modify the database but not the filesystem
        DB_ONLY = 1 << 6 => ["db-only", "dbonly"],
        /// Mark installed packages as dependencies
        ALL_DEPS = 1 << 8 => ["mark-as-dependency", "alldeps"],
        /// Stop after making sure package files are available
        DOWNLOAD_ONLY = 1 << 9 => ["download-only", "downloadonly"],
        /// Do not run install scriptlets
        NO_SCRIPTLET = 1 << 10 => ["skip-scriptlets", "noscriptlet"],
        /// Ignore dependency conflicts
        NO_CONFLICTS = 1 << 11 => ["ignore-conflicts", "noconflicts"],
        /// Skip targets that are already up to date
        NEEDED = 1 << 13 => ["skip-if-up-to-date", "needed"],
        /// Mark installed packages as explicitly installed
        ALL_EXPLICIT = 1 << 14 => ["mark-as-explicit", "allexplicit"],
        /// Drop removal targets that other packages still need
        UNNEEDED = 1 << 15 => ["skip-if-needed-elsewhere", "unneeded"],
        /// With `RECURSE`, also remove explicitly installed dependencies
        RECURSE_ALL = 1 << 16 => ["recurse-remove-unneeded-explicit", "recurseall"],
        /// Do not take the database lock
        NO_LOCK = 1 << 17 => ["skip-db-lock", "nolock"],
    }
}

flag_set! {
    /// Signature verification policy for packages and databases
    SigLevel, "signature level" {
        PACKAGE = 1 => ["package"],
        PACKAGE_OPTIONAL = 1 << 1 => ["package-optional", "packageOptional"],
        PACKAGE_MARGINAL_OK = 1 << 2 => ["package-marginal-ok", "packageMarginalOk"],
        PACKAGE_UNKNOWN_OK = 1 << 3 => ["package-unknown-ok", "packageUnknownOk"],
        DATABASE = 1 << 10 => ["database"],
        DATABASE_OPTIONAL = 1 << 11 => ["database-optional", "databaseOptional"],
        DATABASE_MARGINAL_OK = 1 << 12 => ["database-marginal-ok", "databaseMarginalOk"],
        DATABASE_UNKNOWN_OK = 1 << 13 => ["database-unknown-ok", "databaseUnknownOk"],
        PACKAGE_SET = 1 << 27 => ["package-set", "packageSet"],
        PACKAGE_TRUST_SET = 1 << 28 => ["package-trust-set", "packageTrustSet"],
        USE_DEFAULT = 1 << 30 => ["use-default", "useDefault"],
    }
}

impl SigLevel {
    /// Replace `USE_DEFAULT` with the handle's default level
    pub fn resolve(self, default: SigLevel) -> SigLevel {
        if self.contains(SigLevel::USE_DEFAULT) {
            default
        } else {
            self
        }
    }
}

/// What a signature level demands for one kind of file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SigRequirement {
    Never,
    Optional,
    Required,
}

impl SigLevel {
    pub(crate) fn for_packages(self) -> SigRequirement {
        Self::requirement(self, SigLevel::PACKAGE, SigLevel::PACKAGE_OPTIONAL)
    }

    pub(crate) fn for_databases(self) -> SigRequirement {
        Self::requirement(self, SigLevel::DATABASE, SigLevel::DATABASE_OPTIONAL)
    }

    fn requirement(self, check: SigLevel, optional: SigLevel) -> SigRequirement {
        if !self.contains(check) {
            SigRequirement::Never
        } else if self.contains(optional) {
            SigRequirement::Optional
        } else {
            SigRequirement::Required
        }
    }
}
