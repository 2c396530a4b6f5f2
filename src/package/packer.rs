use std::collections::HashSet;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::debug;

use crate::config::PackagerConfig;

use super::Manifest;

/// A budget-bounded fragment of a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    pub index: usize,
    pub manifest: Manifest,
    /// Weighted member count, fixed-type baseline included.
    pub weight: usize,
}

/// Greedy, order-preserving packer of manifests into chunks.
#[derive(Debug, Clone)]
pub struct Packager {
    budget: usize,
    fixed_types: Vec<String>,
    related_types: IndexMap<String, Vec<String>>,
    type_weights: IndexMap<String, usize>,
    member_weights: IndexMap<String, IndexMap<String, usize>>,
}

impl Packager {
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            fixed_types: Vec::new(),
            related_types: IndexMap::new(),
            type_weights: IndexMap::new(),
            member_weights: IndexMap::new(),
        }
    }

    pub fn from_config(config: &PackagerConfig) -> Self {
        Self {
            budget: config.budget,
            fixed_types: config.fixed_types.clone(),
            related_types: config.related_types.clone(),
            type_weights: config.type_weights.clone(),
            member_weights: config.member_weights.clone(),
        }
    }

    pub fn with_budget(mut self, budget: usize) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_fixed_type(mut self, type_name: &str) -> Self {
        self.fixed_types.push(type_name.to_string());
        self
    }

    pub fn with_related_types(mut self, fixed_type: &str, related: &[&str]) -> Self {
        self.related_types.insert(
            fixed_type.to_string(),
            related.iter().map(|name| name.to_string()).collect(),
        );
        self
    }

    pub fn with_type_weight(mut self, type_name: &str, weight: usize) -> Self {
        self.type_weights.insert(type_name.to_string(), weight);
        self
    }

    pub fn with_member_weight(mut self, type_name: &str, member: &str, weight: usize) -> Self {
        self.member_weights
            .entry(type_name.to_string())
            .or_default()
            .insert(member.to_string(), weight);
        self
    }

    /// Weight of one member: member override, then type override, then 1.
    pub fn weight(&self, type_name: &str, member: &str) -> usize {
        self.member_weights
            .get(type_name)
            .and_then(|members| members.get(member))
            .or_else(|| self.type_weights.get(type_name))
            .copied()
            .unwrap_or(1)
    }

    fn is_fixed(&self, type_name: &str) -> bool {
        self.fixed_types.iter().any(|fixed| fixed == type_name)
    }

    /// Splits the manifest into chunks whose weight stays within the budget.
    ///
    /// Fixed-type members are copied into every chunk and their weight seeds
    /// each chunk's total. A member that cannot fit even in an otherwise
    /// empty chunk gets a chunk of its own.
    pub fn pack(&self, manifest: &Manifest) -> Vec<Chunk> {
        let mut accumulator = self.accumulator(manifest);
        for type_name in self.packing_order(manifest) {
            for member in manifest.members(type_name) {
                accumulator.push(&[(type_name, member.as_str())], self.weight(type_name, member));
            }
        }
        let chunks = accumulator.finish();
        debug!(chunks = chunks.len(), budget = self.budget, "manifest packed");
        chunks
    }

    /// Packs a container type together with its per-member companion type.
    ///
    /// Each container member travels with the companion members whose names
    /// start with `member.`; the group's weight is the sum of both. Companion
    /// members without an owner are packed right after the containers.
    ///
    /// When either type is fixed, or the manifest lists no container, there
    /// is nothing to group and the manifest is packed as by [`Self::pack`].
    pub fn pack_with_companions(
        &self,
        manifest: &Manifest,
        container: &str,
        companion: &str,
    ) -> Vec<Chunk> {
        if container == companion
            || self.is_fixed(container)
            || self.is_fixed(companion)
            || !manifest.types.contains_key(container)
        {
            debug!(container, companion, "no companion grouping, packing members alone");
            return self.pack(manifest);
        }

        let mut accumulator = self.accumulator(manifest);
        for type_name in self.packing_order(manifest) {
            if type_name == companion {
                continue;
            }
            if type_name != container {
                for member in manifest.members(type_name) {
                    accumulator.push(&[(type_name, member.as_str())], self.weight(type_name, member));
                }
                continue;
            }

            let companions = manifest.members(companion);
            let mut owned = vec![false; companions.len()];
            for member in manifest.members(container) {
                let prefix = format!("{member}.");
                let mut group = vec![(container, member.as_str())];
                let mut weight = self.weight(container, member);
                for (index, candidate) in companions.iter().enumerate() {
                    if !owned[index] && candidate.starts_with(&prefix) {
                        owned[index] = true;
                        group.push((companion, candidate.as_str()));
                        weight += self.weight(companion, candidate);
                    }
                }
                accumulator.push(&group, weight);
            }
            for (index, orphan) in companions.iter().enumerate() {
                if !owned[index] {
                    accumulator.push(&[(companion, orphan.as_str())], self.weight(companion, orphan));
                }
            }
        }

        accumulator.finish()
    }

    fn accumulator(&self, manifest: &Manifest) -> ChunkAccumulator {
        let mut baseline = Manifest {
            types: IndexMap::new(),
            version: manifest.version.clone(),
        };
        let mut baseline_weight = 0;
        for (type_name, members) in &manifest.types {
            if !self.is_fixed(type_name) {
                continue;
            }
            for member in members {
                baseline.add(type_name, member);
                baseline_weight += self.weight(type_name, member);
            }
        }
        ChunkAccumulator::new(self.budget, baseline, baseline_weight)
    }

    /// Non-fixed types in packing order. Related types of a fixed type that
    /// has a single member come first, in the order they are listed; the
    /// rest follow in manifest order.
    fn packing_order<'m>(&self, manifest: &'m Manifest) -> Vec<&'m str> {
        let mut order: Vec<&'m str> = Vec::new();
        let mut placed: HashSet<&str> = HashSet::new();

        for (fixed_type, related) in &self.related_types {
            if manifest.members(fixed_type).len() != 1 {
                continue;
            }
            for related_type in related {
                if let Some((name, _)) = manifest.types.get_key_value(related_type.as_str()) {
                    if !self.is_fixed(name) && placed.insert(name.as_str()) {
                        order.push(name.as_str());
                    }
                }
            }
        }
        for type_name in manifest.types.keys() {
            if !self.is_fixed(type_name) && placed.insert(type_name.as_str()) {
                order.push(type_name.as_str());
            }
        }
        order
    }
}

/// What the accumulator does with the next member group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Accumulating,
    Flushing,
}

struct ChunkAccumulator {
    budget: usize,
    baseline: Manifest,
    baseline_weight: usize,
    current: Manifest,
    total: usize,
    carried: usize,
    chunks: Vec<Chunk>,
}

impl ChunkAccumulator {
    fn new(budget: usize, baseline: Manifest, baseline_weight: usize) -> Self {
        Self {
            budget,
            current: baseline.clone(),
            baseline,
            baseline_weight,
            total: baseline_weight,
            carried: 0,
            chunks: Vec::new(),
        }
    }

    /// A chunk is closed only when it already carries members, so an
    /// oversized group always lands in a chunk of its own.
    fn step(&self, weight: usize) -> Step {
        if self.carried > 0 && self.total + weight > self.budget {
            Step::Flushing
        } else {
            Step::Accumulating
        }
    }

    fn push(&mut self, group: &[(&str, &str)], weight: usize) {
        if self.step(weight) == Step::Flushing {
            self.flush();
        }
        for (type_name, member) in group {
            self.current.add(type_name, member);
        }
        self.total += weight;
        self.carried += group.len();
    }

    fn flush(&mut self) {
        let manifest = std::mem::replace(&mut self.current, self.baseline.clone());
        self.chunks.push(Chunk {
            index: self.chunks.len(),
            manifest,
            weight: self.total,
        });
        self.total = self.baseline_weight;
        self.carried = 0;
    }

    fn finish(mut self) -> Vec<Chunk> {
        let baseline_only = self.chunks.is_empty() && !self.baseline.is_empty();
        if self.carried > 0 || baseline_only {
            self.flush();
        }
        self.chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn manifest(entries: &[(&str, &[&str])]) -> Manifest {
        let mut manifest = Manifest::new();
        for (type_name, members) in entries {
            manifest.types.entry(type_name.to_string()).or_default();
            for member in *members {
                manifest.add(type_name, member);
            }
        }
        manifest
    }

    fn layout(chunks: &[Chunk]) -> Vec<Vec<(String, Vec<String>)>> {
        chunks
            .iter()
            .map(|chunk| {
                chunk
                    .manifest
                    .types
                    .iter()
                    .map(|(name, members)| (name.clone(), members.clone()))
                    .collect()
            })
            .collect()
    }

    fn entry(type_name: &str, members: &[&str]) -> (String, Vec<String>) {
        (
            type_name.to_string(),
            members.iter().map(|member| member.to_string()).collect(),
        )
    }

    #[test]
    fn splits_when_the_budget_is_reached() {
        let chunks = Packager::new(2).pack(&manifest(&[("ApexClass", &["A", "B", "C"])]));
        assert_eq!(
            layout(&chunks),
            vec![
                vec![entry("ApexClass", &["A", "B"])],
                vec![entry("ApexClass", &["C"])],
            ]
        );
        assert_eq!(chunks[1].index, 1);
    }

    #[test]
    fn oversized_members_get_their_own_chunk() {
        let packager = Packager::new(3).with_member_weight("CustomObject", "Account", 10);
        let chunks = packager.pack(&manifest(&[
            ("ApexClass", &["A"]),
            ("CustomObject", &["Account", "Contact"]),
        ]));
        assert_eq!(
            layout(&chunks),
            vec![
                vec![entry("ApexClass", &["A"])],
                vec![entry("CustomObject", &["Account"])],
                vec![entry("CustomObject", &["Contact"])],
            ]
        );
        assert_eq!(chunks[1].weight, 10);
    }

    #[test]
    fn fixed_types_seed_every_chunk() {
        let packager = Packager::new(3).with_fixed_type("Profile");
        let chunks = packager.pack(&manifest(&[
            ("Profile", &["Admin"]),
            ("ApexClass", &["A", "B", "C"]),
        ]));
        assert_eq!(
            layout(&chunks),
            vec![
                vec![entry("Profile", &["Admin"]), entry("ApexClass", &["A", "B"])],
                vec![entry("Profile", &["Admin"]), entry("ApexClass", &["C"])],
            ]
        );
        assert_eq!(chunks[0].weight, 3);
    }

    #[test]
    fn related_types_travel_first_with_a_single_fixed_member() {
        let packager = Packager::new(10)
            .with_fixed_type("Profile")
            .with_related_types("Profile", &["CustomObject"]);
        let chunks = packager.pack(&manifest(&[
            ("ApexClass", &["A"]),
            ("CustomObject", &["Account"]),
            ("Profile", &["Admin"]),
        ]));
        assert_eq!(
            layout(&chunks),
            vec![vec![
                entry("Profile", &["Admin"]),
                entry("CustomObject", &["Account"]),
                entry("ApexClass", &["A"]),
            ]]
        );
    }

    #[test]
    fn companions_follow_their_container() {
        let packager = Packager::new(3);
        let chunks = packager.pack_with_companions(
            &manifest(&[
                ("CustomObject", &["Account", "Contact"]),
                ("RecordType", &["Contact.Partner", "Account.Business", "Lead.Web"]),
            ]),
            "CustomObject",
            "RecordType",
        );
        assert_eq!(
            layout(&chunks),
            vec![
                vec![
                    entry("CustomObject", &["Account"]),
                    entry("RecordType", &["Account.Business"]),
                ],
                vec![
                    entry("CustomObject", &["Contact"]),
                    entry("RecordType", &["Contact.Partner", "Lead.Web"]),
                ],
            ]
        );
    }

    #[test]
    fn companions_of_a_fixed_container_are_packed_alone() {
        let packager = Packager::new(5).with_fixed_type("CustomObject");
        let chunks = packager.pack_with_companions(
            &manifest(&[
                ("CustomObject", &["Account"]),
                ("RecordType", &["Account.Business"]),
                ("ApexClass", &["A"]),
            ]),
            "CustomObject",
            "RecordType",
        );
        assert_eq!(
            layout(&chunks),
            vec![vec![
                entry("CustomObject", &["Account"]),
                entry("RecordType", &["Account.Business"]),
                entry("ApexClass", &["A"]),
            ]]
        );
    }

    #[test]
    fn type_weights_apply_below_member_overrides() {
        let packager = Packager::new(4)
            .with_type_weight("CustomObject", 3)
            .with_member_weight("CustomObject", "Lead", 1);
        assert_eq!(packager.weight("CustomObject", "Account"), 3);
        assert_eq!(packager.weight("CustomObject", "Lead"), 1);
        assert_eq!(packager.weight("ApexClass", "A"), 1);

        let chunks = packager.pack(&manifest(&[
            ("ApexClass", &["A"]),
            ("CustomObject", &["Account", "Contact"]),
        ]));
        assert_eq!(
            layout(&chunks),
            vec![
                vec![entry("ApexClass", &["A"]), entry("CustomObject", &["Account"])],
                vec![entry("CustomObject", &["Contact"])],
            ]
        );
        assert_eq!((chunks[0].weight, chunks[1].weight), (4, 3));
    }

    #[test]
    fn empty_manifest_yields_no_chunk() {
        assert!(Packager::new(5).pack(&Manifest::new()).is_empty());
    }

    proptest! {
        #[test]
        fn chunks_partition_the_manifest(
            sizes in proptest::collection::vec(0usize..6, 1..5),
            budget in 1usize..8,
            heavy in 1usize..12,
        ) {
            let mut input = Manifest::new();
            for (type_index, size) in sizes.iter().enumerate() {
                for member_index in 0..*size {
                    input.add(&format!("Type{type_index}"), &format!("m{member_index}"));
                }
            }
            let packager = Packager::new(budget).with_member_weight("Type0", "m0", heavy);
            let chunks = packager.pack(&input);

            let mut seen: Vec<(String, String)> = Vec::new();
            for chunk in &chunks {
                let members: usize = chunk.manifest.member_count();
                prop_assert!(members > 0);
                prop_assert!(chunk.weight <= budget || members == 1);
                for (type_name, names) in &chunk.manifest.types {
                    for name in names {
                        seen.push((type_name.clone(), name.clone()));
                    }
                }
            }

            let mut expected: Vec<(String, String)> = input
                .types
                .iter()
                .flat_map(|(type_name, names)| {
                    names.iter().map(move |name| (type_name.clone(), name.clone()))
                })
                .collect();
            let unique: HashSet<(String, String)> = seen.iter().cloned().collect();
            prop_assert_eq!(unique.len(), seen.len());
            seen.sort();
            expected.sort();
            prop_assert_eq!(seen, expected);
        }

        #[test]
        fn companion_packing_keeps_every_member(
            sizes in proptest::collection::vec(0usize..5, 2..5),
            budget in 1usize..8,
            fixed in 0usize..4,
            related in any::<bool>(),
        ) {
            // Type0 holds containers `m<n>`, Type1 companions `m<n % 3>.c<n>`.
            let mut input = Manifest::new();
            for (type_index, size) in sizes.iter().enumerate() {
                for member_index in 0..*size {
                    let member = match type_index {
                        1 => format!("m{}.c{member_index}", member_index % 3),
                        _ => format!("m{member_index}"),
                    };
                    input.add(&format!("Type{type_index}"), &member);
                }
            }
            let fixed_type = format!("Type{fixed}");
            let mut packager = Packager::new(budget).with_fixed_type(&fixed_type);
            if related {
                packager = packager.with_related_types(&fixed_type, &["Type1", "Type2"]);
            }
            let chunks = packager.pack_with_companions(&input, "Type0", "Type1");

            let baseline = input.members(&fixed_type).to_vec();
            let mut seen: Vec<(String, String)> = Vec::new();
            for chunk in &chunks {
                prop_assert!(chunk.manifest.member_count() > 0);
                prop_assert_eq!(chunk.manifest.members(&fixed_type), baseline.as_slice());
                for (type_name, names) in &chunk.manifest.types {
                    if *type_name == fixed_type {
                        continue;
                    }
                    for name in names {
                        seen.push((type_name.clone(), name.clone()));
                    }
                }
            }

            let mut expected: Vec<(String, String)> = input
                .types
                .iter()
                .filter(|(type_name, _)| **type_name != fixed_type)
                .flat_map(|(type_name, names)| {
                    names.iter().map(move |name| (type_name.clone(), name.clone()))
                })
                .collect();
            let unique: HashSet<(String, String)> = seen.iter().cloned().collect();
            prop_assert_eq!(unique.len(), seen.len());
            seen.sort();
            expected.sort();
            prop_assert_eq!(seen, expected);
            prop_assert_eq!(chunks.is_empty(), input.member_count() == 0);
        }
    }
}
