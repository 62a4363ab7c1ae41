// src/transaction/prepare.rs

//! Dependency and conflict checks run by `Transaction::prepare`
//!
//! Missing dependencies are reported, never pulled in: the caller stages
//! what it needs and prepares again.

use crate::error::{ErrorCode, PrepareProblem};
use crate::flags::TransFlags;
use crate::package::{Depend, InstallReason, Package};
use crate::version::vercmp;
use std::cmp::Ordering;

/// The checked transaction contents
pub(super) struct Resolution<'a> {
    pub added: Vec<Package<'a>>,
    pub removed: Vec<Package<'a>>,
    /// Targets dropped or kept back, as log messages
    pub skipped: Vec<String>,
}

/// Error code summarizing a list of problems
pub(super) fn problem_code(problems: &[PrepareProblem]) -> ErrorCode {
    match problems.first() {
        Some(PrepareProblem::InvalidArch { .. }) => ErrorCode::PkgInvalidArch,
        Some(PrepareProblem::Conflict { .. }) => ErrorCode::ConflictingDeps,
        _ => ErrorCode::UnsatisfiedDeps,
    }
}

/// Installed packages together with the staged changes
struct Plan<'p, 'a> {
    installed: &'p [Package<'a>],
    targets: Vec<Package<'a>>,
    removal: Vec<Package<'a>>,
    ignore_version: bool,
}

impl<'a> Plan<'_, 'a> {
    fn is_removed(&self, name: &str) -> bool {
        self.removal.iter().any(|p| p.name() == name)
    }

    fn is_replaced(&self, name: &str) -> bool {
        self.targets.iter().any(|p| p.name() == name)
    }

    /// Installed packages that survive the transaction unchanged
    fn kept(&self) -> impl Iterator<Item = &Package<'a>> {
        self.installed
            .iter()
            .filter(|p| !self.is_removed(p.name()) && !self.is_replaced(p.name()))
    }

    fn satisfies(&self, pkg: &Package<'_>, dep: &Depend) -> bool {
        pkg.record().satisfies(dep, self.ignore_version)
    }

    /// Whether `dep` holds once the transaction is applied
    fn satisfied_after(&self, dep: &Depend) -> bool {
        self.kept().any(|p| self.satisfies(p, dep)) || self.targets.iter().any(|p| self.satisfies(p, dep))
    }

    /// Dependencies of kept packages that the transaction breaks
    fn breakages(&self) -> Vec<PrepareProblem> {
        let mut problems = Vec::new();
        for pkg in self.kept() {
            for dep in pkg.depends() {
                if self.satisfied_after(dep) {
                    continue;
                }
                // Only report what this transaction breaks
                if let Some(previous) = self.installed.iter().find(|p| self.satisfies(p, dep)) {
                    problems.push(PrepareProblem::BreaksDependency {
                        removed: previous.name().to_string(),
                        dependent: pkg.name().to_string(),
                        depend: dep.to_string(),
                    });
                }
            }
        }
        problems
    }

    /// Add installed packages whose dependencies the removal breaks
    fn cascade(&mut self) {
        loop {
            let dependents: Vec<String> = self
                .breakages()
                .into_iter()
                .filter_map(|problem| match problem {
                    PrepareProblem::BreaksDependency { dependent, .. } => Some(dependent),
                    _ => None,
                })
                .collect();

            let before = self.removal.len();
            for name in dependents {
                if self.is_removed(&name) {
                    continue;
                }
                if let Some(pkg) = self.installed.iter().find(|p| p.name() == name) {
                    self.removal.push(pkg.clone());
                }
            }
            if self.removal.len() == before {
                break;
            }
        }
    }

    /// Drop removal targets that kept packages still need
    fn keep_needed(&mut self, skipped: &mut Vec<String>) {
        loop {
            let needed: Vec<(String, String)> = self
                .breakages()
                .into_iter()
                .filter_map(|problem| match problem {
                    PrepareProblem::BreaksDependency {
                        removed, dependent, ..
                    } => Some((removed, dependent)),
                    _ => None,
                })
                .collect();

            let before = self.removal.len();
            for (removed, dependent) in needed {
                if self.is_removed(&removed) {
                    self.removal.retain(|p| p.name() != removed);
                    skipped.push(format!("not removing {} (required by {})", removed, dependent));
                }
            }
            if self.removal.len() == before {
                break;
            }
        }
    }

    /// Add dependencies of removal targets that nothing else needs
    ///
    /// Only packages installed as dependencies qualify unless
    /// `include_explicit` is set.
    fn recurse(&mut self, include_explicit: bool) {
        loop {
            let mut changed = false;
            for candidate in self.installed {
                if self.is_removed(candidate.name()) {
                    continue;
                }
                if !include_explicit && candidate.reason() == InstallReason::Explicit {
                    continue;
                }

                let needed_by_removal = self
                    .removal
                    .iter()
                    .any(|r| r.depends().iter().any(|d| self.satisfies(candidate, d)));
                if !needed_by_removal {
                    continue;
                }

                let required_elsewhere = self
                    .kept()
                    .chain(self.targets.iter())
                    .filter(|p| p.name() != candidate.name())
                    .any(|p| p.depends().iter().any(|d| self.satisfies(candidate, d)));
                if required_elsewhere {
                    continue;
                }

                self.removal.push(candidate.clone());
                changed = true;
            }
            if !changed {
                break;
            }
        }
    }

    fn missing_dependencies(&self) -> Vec<PrepareProblem> {
        let mut problems = Vec::new();
        for target in &self.targets {
            for dep in target.depends() {
                if !self.satisfied_after(dep) {
                    problems.push(PrepareProblem::MissingDependency {
                        target: target.name().to_string(),
                        depend: dep.to_string(),
                    });
                }
            }
        }
        problems
    }

    fn conflicts(&self) -> Vec<PrepareProblem> {
        let mut problems = Vec::new();

        let conflict = |a: &Package<'_>, b: &Package<'_>| -> Option<PrepareProblem> {
            if a.name() == b.name() {
                return None;
            }
            let found = a
                .conflicts()
                .iter()
                .find(|c| self.satisfies(b, c))
                .or_else(|| b.conflicts().iter().find(|c| self.satisfies(a, c)))?;
            Some(PrepareProblem::Conflict {
                package1: a.name().to_string(),
                package2: b.name().to_string(),
                reason: found.to_string(),
            })
        };

        for (i, a) in self.targets.iter().enumerate() {
            for b in &self.targets[i + 1..] {
                problems.extend(conflict(a, b));
            }
            for installed in self.kept() {
                problems.extend(conflict(a, installed));
            }
        }
        problems
    }
}

/// Check and complete the staged sets
pub(super) fn resolve<'a>(
    flags: TransFlags,
    arch: &str,
    installed: &[Package<'a>],
    added: &[Package<'a>],
    removed: &[Package<'a>],
) -> Result<Resolution<'a>, Vec<PrepareProblem>> {
    let mut skipped = Vec::new();
    let mut problems = Vec::new();

    let mut targets: Vec<Package<'a>> = Vec::new();
    for pkg in added {
        match targets.iter_mut().find(|t| t.name() == pkg.name()) {
            Some(existing) if vercmp(pkg.version(), existing.version()) == Ordering::Greater => {
                skipped.push(format!("replacing target {} with {}", existing, pkg));
                *existing = pkg.clone();
            }
            Some(_) => skipped.push(format!("skipping duplicate target {}", pkg)),
            None => targets.push(pkg.clone()),
        }
    }

    for pkg in &targets {
        if let Some(pkg_arch) = pkg.arch() {
            if pkg_arch != "any" && pkg_arch != arch {
                problems.push(PrepareProblem::InvalidArch {
                    package: pkg.name().to_string(),
                    arch: pkg_arch.to_string(),
                });
            }
        }
    }

    if flags.contains(TransFlags::NEEDED) {
        targets.retain(|pkg| {
            let up_to_date = installed
                .iter()
                .any(|local| local.name() == pkg.name() && vercmp(local.version(), pkg.version()) == Ordering::Equal);
            if up_to_date {
                skipped.push(format!("{} is up to date -- skipping", pkg));
            }
            !up_to_date
        });
    }

    let mut removal: Vec<Package<'a>> = Vec::new();
    for pkg in removed {
        if !removal.iter().any(|p| p.name() == pkg.name()) {
            removal.push(pkg.clone());
        }
    }

    let mut plan = Plan {
        installed,
        targets,
        removal,
        ignore_version: flags.contains(TransFlags::NO_DEP_VERSION),
    };

    let recurse = flags.contains(TransFlags::RECURSE);
    let include_explicit = flags.contains(TransFlags::RECURSE_ALL);
    let cascade = flags.contains(TransFlags::CASCADE);

    if recurse && !cascade {
        plan.recurse(include_explicit);
    }

    if !flags.contains(TransFlags::NO_DEPS) {
        if cascade {
            plan.cascade();
        } else if flags.contains(TransFlags::UNNEEDED) {
            plan.keep_needed(&mut skipped);
        }
    }

    if recurse && cascade {
        plan.recurse(include_explicit);
    }

    if !flags.contains(TransFlags::NO_DEPS) {
        problems.extend(plan.missing_dependencies());
        problems.extend(plan.breakages());
    }

    if !flags.contains(TransFlags::NO_CONFLICTS) {
        problems.extend(plan.conflicts());
    }

    if !problems.is_empty() {
        return Err(problems);
    }

    Ok(Resolution {
        added: plan.targets,
        removed: plan.removal,
        skipped,
    })
}
