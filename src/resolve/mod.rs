//! Dependency resolution.
//!
//! The resolver walks a frontier of requirements, intersecting every range
//! recorded for a package name and provisionally picking the highest version
//! that fits. A later, tighter requirement can invalidate an earlier pick; the
//! package is then re-picked under the combined range, a bounded number of
//! times. Conflicts are reported, never relaxed.

use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use crate::context::ResolvedContext;
use crate::error::{Requirer, ResolutionError};
use crate::package::{PackageDatabase, PackageVariant, Requirement, VersionRange, sort_variants};

/// How many times one package may be re-picked before giving up.
pub const MAX_REPICKS: usize = 3;

/// One recorded requirement and who made it.
#[derive(Debug, Clone)]
struct Constraint {
    requirer: Requirer,
    requirement: Requirement,
}

impl Constraint {
    fn from_request(requirement: &Requirement) -> Self {
        Self {
            requirer: Requirer::Request {
                requirement: requirement.to_string(),
            },
            requirement: requirement.clone(),
        }
    }

    fn from_package(variant: &PackageVariant, requirement: &Requirement) -> Self {
        Self {
            requirer: Requirer::Package {
                name: variant.name.clone(),
                version: variant.version.to_string(),
                requirement: requirement.to_string(),
            },
            requirement: requirement.clone(),
        }
    }

    fn is_from(&self, package: &str) -> bool {
        self.requirer.package_name() == Some(package)
    }
}

/// Per-call resolution state. Nothing here outlives one `resolve`.
#[derive(Default)]
struct State {
    frontier: VecDeque<Constraint>,
    constraints: BTreeMap<String, Vec<Constraint>>,
    chosen: BTreeMap<String, PackageVariant>,
    repicks: HashMap<String, usize>,
    variants: HashMap<String, Vec<PackageVariant>>,
}

impl State {
    fn range_of(&self, name: &str) -> VersionRange {
        self.constraints
            .get(name)
            .into_iter()
            .flatten()
            .fold(VersionRange::any(), |acc, c| acc.intersect(&c.requirement.range))
    }

    /// Drop everything a variant contributed: its recorded constraints and
    /// its requirements still waiting in the frontier.
    fn retract(&mut self, package: &str) {
        for list in self.constraints.values_mut() {
            list.retain(|c| !c.is_from(package));
        }
        self.frontier.retain(|c| !c.is_from(package));
    }

    /// Chosen packages nobody requires any more, after a retraction.
    fn drop_orphans(&mut self) {
        loop {
            let orphan = self
                .chosen
                .keys()
                .find(|name| self.constraints.get(*name).is_none_or(Vec::is_empty))
                .cloned();
            let Some(name) = orphan else {
                break;
            };
            debug!("Dropping '{}': no longer required", name);
            self.chosen.remove(&name);
            self.retract(&name);
        }
    }
}

/// Resolves requirements against an injected, read-only package database.
pub struct Resolver<'a, D: PackageDatabase + ?Sized> {
    database: &'a D,
}

impl<'a, D: PackageDatabase + ?Sized> Resolver<'a, D> {
    pub fn new(database: &'a D) -> Self {
        Self { database }
    }

    /// Resolve `requests` into a context ordered dependencies first.
    #[tracing::instrument(skip(self, requests), fields(requests = requests.len()))]
    pub fn resolve(&self, requests: &[Requirement]) -> Result<ResolvedContext, ResolutionError> {
        let variants = self.resolve_variants(requests)?;
        info!(
            "Resolved {} package(s): {}",
            variants.len(),
            variants
                .iter()
                .map(PackageVariant::qualified_name)
                .collect::<Vec<_>>()
                .join(" ")
        );
        Ok(ResolvedContext::new(requests, &variants))
    }

    /// The chosen variants, dependencies before dependents.
    pub fn resolve_variants(
        &self,
        requests: &[Requirement],
    ) -> Result<Vec<PackageVariant>, ResolutionError> {
        let mut state = State::default();
        state
            .frontier
            .extend(requests.iter().map(Constraint::from_request));

        while let Some(constraint) = state.frontier.pop_front() {
            let name = constraint.requirement.name.clone();
            state
                .constraints
                .entry(name.clone())
                .or_default()
                .push(constraint.clone());

            let range = state.range_of(&name);
            if range.is_empty() {
                return Err(conflict(&name, &state.constraints[&name]));
            }

            match state.chosen.get(&name) {
                Some(current) if range.contains(&current.version) => continue,
                Some(current) => {
                    let attempts = state.repicks.entry(name.clone()).or_default();
                    *attempts += 1;
                    if *attempts > MAX_REPICKS {
                        return Err(ResolutionError::Unstable {
                            package: name,
                            attempts: MAX_REPICKS,
                        });
                    }
                    debug!(
                        "'{}' invalidates {}, re-picking",
                        constraint.requirement,
                        current.qualified_name()
                    );
                    state.chosen.remove(&name);
                    state.retract(&name);
                    state.drop_orphans();
                    self.raise_loosened(&mut state)?;
                }
                None => {}
            }

            // the retraction above may have withdrawn constraints on this name too
            if state.constraints.get(&name).is_none_or(Vec::is_empty) {
                continue;
            }
            let range = state.range_of(&name);
            self.choose(&mut state, &name, &constraint, &range)?;
        }

        let reachable = reachable(&state.chosen, requests);
        state.chosen.retain(|name, _| reachable.contains(name));
        verify(&state.chosen, requests)?;
        Ok(dependency_order(state.chosen))
    }

    /// Re-pick chosen packages whose range got looser after a retraction,
    /// so a pick made under a withdrawn constraint does not stay low.
    fn raise_loosened(&self, state: &mut State) -> Result<(), ResolutionError> {
        loop {
            let loosened = state.chosen.iter().find_map(|(name, current)| {
                let range = state.range_of(name);
                let best = state
                    .variants
                    .get(name)?
                    .iter()
                    .find(|v| range.contains(&v.version))?;
                (best.version > current.version).then(|| name.clone())
            });
            let Some(name) = loosened else {
                return Ok(());
            };

            let attempts = state.repicks.entry(name.clone()).or_default();
            *attempts += 1;
            if *attempts > MAX_REPICKS {
                return Err(ResolutionError::Unstable {
                    package: name,
                    attempts: MAX_REPICKS,
                });
            }
            debug!("Range of '{}' loosened, re-picking", name);
            state.chosen.remove(&name);
            state.retract(&name);
            state.drop_orphans();

            let Some(trigger) = state.constraints.get(&name).and_then(|l| l.first()).cloned() else {
                continue;
            };
            let range = state.range_of(&name);
            self.choose(state, &name, &trigger, &range)?;
        }
    }

    fn choose(
        &self,
        state: &mut State,
        name: &str,
        trigger: &Constraint,
        range: &VersionRange,
    ) -> Result<(), ResolutionError> {
        let database = self.database;
        let variants = state
            .variants
            .entry(name.to_string())
            .or_insert_with(|| {
                let mut found = database.find_variants(name);
                sort_variants(&mut found);
                found
            });

        if variants.is_empty() {
            return Err(ResolutionError::NotFound {
                package: name.to_string(),
                requirement: trigger.requirement.to_string(),
                requested_by: trigger.requirer.clone(),
            });
        }

        // variants are sorted best first; the first match is the pick
        let Some(pick) = variants.iter().find(|v| range.contains(&v.version)).cloned() else {
            let constraints = &state.constraints[name];
            let unsatisfiable = constraints.iter().find(|c| {
                !variants
                    .iter()
                    .any(|v| c.requirement.range.contains(&v.version))
            });
            return Err(match unsatisfiable {
                Some(c) => ResolutionError::NotFound {
                    package: name.to_string(),
                    requirement: c.requirement.to_string(),
                    requested_by: c.requirer.clone(),
                },
                None => conflict(name, constraints),
            });
        };

        debug!("Picked {} for '{}'", pick.qualified_name(), trigger.requirement);
        state.frontier.extend(
            pick.requires
                .iter()
                .map(|r| Constraint::from_package(&pick, r)),
        );
        state.chosen.insert(name.to_string(), pick);
        Ok(())
    }
}

/// Conflict naming the first pair of requirers that cannot both hold, or
/// every requirer when only the combination is unsatisfiable.
fn conflict(name: &str, constraints: &[Constraint]) -> ResolutionError {
    for (i, a) in constraints.iter().enumerate() {
        for b in &constraints[i + 1..] {
            if a.requirement.range.intersect(&b.requirement.range).is_empty() {
                return ResolutionError::Conflict {
                    package: name.to_string(),
                    requirers: vec![a.requirer.clone(), b.requirer.clone()],
                };
            }
        }
    }
    ResolutionError::Conflict {
        package: name.to_string(),
        requirers: constraints.iter().map(|c| c.requirer.clone()).collect(),
    }
}

fn reachable(chosen: &BTreeMap<String, PackageVariant>, requests: &[Requirement]) -> BTreeSet<String> {
    let mut seen = BTreeSet::new();
    let mut queue: VecDeque<&str> = requests.iter().map(|r| r.name.as_str()).collect();

    while let Some(name) = queue.pop_front() {
        if !seen.insert(name.to_string()) {
            continue;
        }
        if let Some(variant) = chosen.get(name) {
            queue.extend(variant.requires.iter().map(|r| r.name.as_str()));
        }
    }
    seen
}

fn verify(
    chosen: &BTreeMap<String, PackageVariant>,
    requests: &[Requirement],
) -> Result<(), ResolutionError> {
    let request_constraints = requests.iter().map(Constraint::from_request);
    let package_constraints = chosen
        .values()
        .flat_map(|v| v.requires.iter().map(move |r| Constraint::from_package(v, r)));

    for constraint in request_constraints.chain(package_constraints) {
        let name = constraint.requirement.name.clone();
        match chosen.get(&name) {
            Some(v) if constraint.requirement.is_satisfied_by(&v.name, &v.version) => {}
            Some(_) => return Err(conflict(&name, &[constraint])),
            None => {
                return Err(ResolutionError::NotFound {
                    package: name,
                    requirement: constraint.requirement.to_string(),
                    requested_by: constraint.requirer,
                });
            }
        }
    }
    Ok(())
}

/// Topological order, dependencies first. Ties go by name; a cycle is
/// broken at its alphabetically first member.
fn dependency_order(mut chosen: BTreeMap<String, PackageVariant>) -> Vec<PackageVariant> {
    let mut ordered = Vec::with_capacity(chosen.len());
    let mut emitted: BTreeSet<String> = BTreeSet::new();

    while !chosen.is_empty() {
        let ready = chosen
            .iter()
            .find(|(_, v)| {
                v.requires
                    .iter()
                    .all(|r| emitted.contains(&r.name) || !chosen.contains_key(&r.name) || r.name == v.name)
            })
            .map(|(name, _)| name.clone());

        // Nothing ready means a cycle; BTreeMap order makes the first key the smallest name.
        let next = match ready.or_else(|| chosen.keys().next().cloned()) {
            Some(name) => name,
            None => break,
        };
        if let Some(variant) = chosen.remove(&next) {
            emitted.insert(next);
            ordered.push(variant);
        }
    }
    ordered
}
